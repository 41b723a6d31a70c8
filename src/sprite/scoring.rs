//! Mouth-openness scoring and open/closed frame picking.
//!
//! Two pickers share one output contract, a [`MouthPick`] of "best open"
//! and "best closed" frame indices:
//!
//! - [`HeuristicMouthPicker`] scores each frame's mouth region with a
//!   pluggable [`FrameScorer`] and takes the extremes.
//! - [`AnalysisMouthPicker`] reads the recommendations of a sheet analysis.
//!
//! Pickers work over frame slots; an unready slot (`None`) is never picked
//! and picked indices are always slot indices.
//!
//! Identical open and closed picks are accepted but reported as degenerate.

use image::RgbaImage;

use crate::sprite::analysis::{FacePart, FacePartRect, SpriteSheetAnalysis};
use crate::telemetry;

/// Scores how "open" a region of a frame looks. Higher is more open.
pub trait FrameScorer {
    fn score(&self, frame: &RgbaImage, region: &FacePartRect) -> f32;
}

/// Brightness variance inside the region
///
/// An open mouth shows a dark interior against lips and teeth, which raises
/// luma variance. Fully transparent pixels are ignored. Luma is normalized
/// to [0, 1] so scores fall in [0, 0.25].
#[derive(Debug, Clone, Copy, Default)]
pub struct PixelVarianceScorer;

impl FrameScorer for PixelVarianceScorer {
    fn score(&self, frame: &RgbaImage, region: &FacePartRect) -> f32 {
        let Some((x0, y0, w, h)) = region.to_pixels(frame.width(), frame.height()) else {
            return 0.0;
        };

        let mut count = 0u32;
        let mut sum = 0.0f64;
        let mut sum_sq = 0.0f64;
        for y in y0..y0 + h {
            for x in x0..x0 + w {
                let px = frame.get_pixel(x, y);
                if px[3] == 0 {
                    continue;
                }
                let luma = (0.299 * px[0] as f64 + 0.587 * px[1] as f64 + 0.114 * px[2] as f64) / 255.0;
                sum += luma;
                sum_sq += luma * luma;
                count += 1;
            }
        }
        if count == 0 {
            return 0.0;
        }
        let mean = sum / count as f64;
        (sum_sq / count as f64 - mean * mean).max(0.0) as f32
    }
}

/// Best open-mouth and closed-mouth frame indices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MouthPick {
    pub open: usize,
    pub closed: usize,
}

impl MouthPick {
    pub fn is_degenerate(&self) -> bool {
        self.open == self.closed
    }
}

pub trait MouthFramePicker {
    /// `None` when there is nothing to pick from.
    fn pick(&self, frames: &[Option<RgbaImage>]) -> Option<MouthPick>;
}

/// Picks the highest- and lowest-scoring frames
pub struct HeuristicMouthPicker<S: FrameScorer> {
    scorer: S,
    region: FacePartRect,
}

impl<S: FrameScorer> HeuristicMouthPicker<S> {
    pub fn new(scorer: S, region: FacePartRect) -> Self {
        Self { scorer, region }
    }

    /// Score of every ready slot, keyed by slot index.
    pub fn scores(&self, frames: &[Option<RgbaImage>]) -> Vec<(usize, f32)> {
        frames
            .iter()
            .enumerate()
            .filter_map(|(index, frame)| {
                frame
                    .as_ref()
                    .map(|frame| (index, self.scorer.score(frame, &self.region)))
            })
            .collect()
    }
}

impl<S: FrameScorer> MouthFramePicker for HeuristicMouthPicker<S> {
    fn pick(&self, frames: &[Option<RgbaImage>]) -> Option<MouthPick> {
        let scores = self.scores(frames);
        let (first, rest) = scores.split_first()?;
        // First slot wins on equal scores
        let mut open = *first;
        let mut closed = *first;
        for entry in rest {
            if entry.1 > open.1 {
                open = *entry;
            }
            if entry.1 < closed.1 {
                closed = *entry;
            }
        }

        let pick = MouthPick {
            open: open.0,
            closed: closed.0,
        };
        log::debug!(
            "[MouthPicker] heuristic open={} ({:.4}) closed={} ({:.4})",
            open.0,
            open.1,
            closed.0,
            closed.1
        );
        report_degenerate(&pick, Some(open.1));
        Some(pick)
    }
}

/// Reads the mouth recommendations of an analysis
pub struct AnalysisMouthPicker<'a> {
    analysis: &'a SpriteSheetAnalysis,
}

impl<'a> AnalysisMouthPicker<'a> {
    pub fn new(analysis: &'a SpriteSheetAnalysis) -> Self {
        Self { analysis }
    }
}

impl MouthFramePicker for AnalysisMouthPicker<'_> {
    fn pick(&self, frames: &[Option<RgbaImage>]) -> Option<MouthPick> {
        let in_range = |index: &usize| *index < frames.len();
        let open = self.analysis.recommended(FacePart::MouthOpen).filter(in_range)?;
        let closed = self.analysis.recommended(FacePart::MouthClosed).filter(in_range)?;
        let pick = MouthPick { open, closed };
        report_degenerate(&pick, None);
        Some(pick)
    }
}

/// Open/closed pick for a set of frame slots.
///
/// The analysis recommendations win when both are present and in range;
/// otherwise the frames are scored inside `mouth_region`.
pub fn pick_mouth_frames(
    frames: &[Option<RgbaImage>],
    analysis: Option<&SpriteSheetAnalysis>,
    mouth_region: FacePartRect,
) -> Option<MouthPick> {
    analysis
        .and_then(|analysis| AnalysisMouthPicker::new(analysis).pick(frames))
        .or_else(|| HeuristicMouthPicker::new(PixelVarianceScorer, mouth_region).pick(frames))
}

/// Ties are accepted; they are only surfaced in the log and telemetry.
fn report_degenerate(pick: &MouthPick, score: Option<f32>) {
    if pick.is_degenerate() {
        log::warn!(
            "[MouthPicker] open and closed picks are both frame {}; mouth will not move",
            pick.open
        );
        telemetry::hub().record_degenerate_pick(pick.open, score);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sprite::analysis::parse_analysis_text;
    use image::Rgba;

    const MOUTH: FacePartRect = FacePartRect::new(0.25, 0.5, 0.5, 0.25);

    fn slots(frames: Vec<RgbaImage>) -> Vec<Option<RgbaImage>> {
        frames.into_iter().map(Some).collect()
    }

    fn flat(value: u8) -> RgbaImage {
        RgbaImage::from_pixel(16, 16, Rgba([value, value, value, 255]))
    }

    /// Frame with a dark hole in the middle of the mouth region.
    fn open_mouth() -> RgbaImage {
        let mut frame = flat(220);
        for y in 9..11 {
            for x in 6..10 {
                frame.put_pixel(x, y, Rgba([10, 10, 10, 255]));
            }
        }
        frame
    }

    #[test]
    fn test_flat_region_scores_zero() {
        assert_eq!(PixelVarianceScorer.score(&flat(128), &MOUTH), 0.0);
        assert!(PixelVarianceScorer.score(&open_mouth(), &MOUTH) > 0.05);
    }

    #[test]
    fn test_transparent_pixels_are_ignored() {
        let frame = RgbaImage::from_pixel(16, 16, Rgba([0, 0, 0, 0]));
        assert_eq!(PixelVarianceScorer.score(&frame, &MOUTH), 0.0);
    }

    #[test]
    fn test_heuristic_picks_extremes() {
        let frames = slots(vec![flat(200), open_mouth(), flat(50)]);
        let picker = HeuristicMouthPicker::new(PixelVarianceScorer, MOUTH);
        let pick = picker.pick(&frames).unwrap();
        assert_eq!(pick, MouthPick { open: 1, closed: 0 });
        assert!(!pick.is_degenerate());
    }

    #[test]
    fn test_identical_frames_yield_accepted_tie() {
        let frames = slots(vec![flat(90); 4]);
        let picker = HeuristicMouthPicker::new(PixelVarianceScorer, MOUTH);
        let pick = picker.pick(&frames).unwrap();
        assert!(pick.is_degenerate());
        assert_eq!(pick.open, 0);
    }

    #[test]
    fn test_no_frames_no_pick() {
        let picker = HeuristicMouthPicker::new(PixelVarianceScorer, MOUTH);
        assert!(picker.pick(&[]).is_none());
    }

    #[test]
    fn test_unready_slots_keep_their_indices() {
        let frames = vec![None, Some(flat(200)), None, Some(open_mouth())];
        let picker = HeuristicMouthPicker::new(PixelVarianceScorer, MOUTH);
        assert_eq!(picker.pick(&frames).unwrap(), MouthPick { open: 3, closed: 1 });
        assert!(picker.pick(&[None, None]).is_none());
    }

    #[test]
    fn test_pick_prefers_analysis_then_heuristic() {
        let frames = slots(vec![flat(200), open_mouth(), flat(50), flat(60)]);
        let analysis = parse_analysis_text(
            r#"{"frames": [], "recommendedMouthOpenFrame": 3, "recommendedMouthClosedFrame": 2}"#,
            4,
        )
        .unwrap();
        assert_eq!(
            pick_mouth_frames(&frames, Some(&analysis), MOUTH),
            Some(MouthPick { open: 3, closed: 2 })
        );

        let partial = parse_analysis_text(r#"{"frames": [], "recommendedMouthOpenFrame": 3}"#, 4).unwrap();
        assert_eq!(
            pick_mouth_frames(&frames, Some(&partial), MOUTH),
            Some(MouthPick { open: 1, closed: 0 })
        );
    }

    #[test]
    fn test_analysis_picker_uses_recommendations() {
        let analysis = parse_analysis_text(
            r#"{"frames": [], "recommendedMouthOpenFrame": 5, "recommendedMouthClosedFrame": 2}"#,
            16,
        )
        .unwrap();
        let frames = slots(vec![flat(0); 16]);
        let pick = AnalysisMouthPicker::new(&analysis).pick(&frames).unwrap();
        assert_eq!(pick, MouthPick { open: 5, closed: 2 });

        assert!(AnalysisMouthPicker::new(&analysis).pick(&frames[..4]).is_none());
    }
}
