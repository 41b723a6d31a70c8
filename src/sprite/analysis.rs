// Sprite-sheet analysis - per-frame eye/mouth labels and face-part rects
//
// The analysis is produced once by a remote classifier and is immutable
// afterwards. Parsing is strict about structure (malformed JSON is an error,
// frame indices must address the sheet) but lenient about label spelling:
// unrecognised labels become `Unknown` instead of failing the whole sheet.

use serde::{Deserialize, Serialize};

use crate::error::RemoteError;

/// Eye label reported for one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EyesLabel {
    Open,
    Closed,
    #[serde(other)]
    Unknown,
}

/// Mouth label reported for one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouthLabel {
    Open,
    #[serde(alias = "half", alias = "half-open", alias = "half_open")]
    Mid,
    Closed,
    #[serde(other)]
    Unknown,
}

/// Normalized rectangle within one frame, all components in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FacePartRect {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl FacePartRect {
    pub const fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    /// Clamp into the unit square, shrinking the size to fit.
    pub fn clamped(&self) -> Self {
        let x = finite_or_zero(self.x).clamp(0.0, 1.0);
        let y = finite_or_zero(self.y).clamp(0.0, 1.0);
        Self {
            x,
            y,
            w: finite_or_zero(self.w).clamp(0.0, 1.0 - x),
            h: finite_or_zero(self.h).clamp(0.0, 1.0 - y),
        }
    }

    /// Pixel rect `(x, y, w, h)` inside a `width × height` frame, `None` if
    /// the clamped rect covers no pixel.
    pub fn to_pixels(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let rect = self.clamped();
        let x = ((rect.x * width as f32).floor() as u32).min(width);
        let y = ((rect.y * height as f32).floor() as u32).min(height);
        let w = ((rect.w * width as f32).round() as u32).min(width - x);
        let h = ((rect.h * height as f32).round() as u32).min(height - y);
        if w == 0 || h == 0 {
            None
        } else {
            Some((x, y, w, h))
        }
    }
}

fn finite_or_zero(value: f32) -> f32 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// The four named face parts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FacePart {
    EyesOpen,
    EyesClosed,
    MouthOpen,
    MouthClosed,
}

impl FacePart {
    pub const ALL: [FacePart; 4] = [
        FacePart::EyesOpen,
        FacePart::EyesClosed,
        FacePart::MouthOpen,
        FacePart::MouthClosed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FacePart::EyesOpen => "eyes_open",
            FacePart::EyesClosed => "eyes_closed",
            FacePart::MouthOpen => "mouth_open",
            FacePart::MouthClosed => "mouth_closed",
        }
    }

    fn is_eyes(&self) -> bool {
        matches!(self, FacePart::EyesOpen | FacePart::EyesClosed)
    }

    /// Whether a frame's labels show this part.
    fn labels(&self, frame: &FrameClassification) -> bool {
        match self {
            FacePart::EyesOpen => frame.eyes_state == EyesLabel::Open,
            FacePart::EyesClosed => frame.eyes_state == EyesLabel::Closed,
            FacePart::MouthOpen => frame.mouth_state == MouthLabel::Open,
            FacePart::MouthClosed => frame.mouth_state == MouthLabel::Closed,
        }
    }
}

/// Classification of one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameClassification {
    pub frame_index: usize,
    pub eyes_state: EyesLabel,
    pub mouth_state: MouthLabel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emotion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub face_rect: Option<FacePartRect>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eyes_rect: Option<FacePartRect>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mouth_rect: Option<FacePartRect>,
}

/// Whole-sheet classification with recommended frames
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpriteSheetAnalysis {
    pub frames: Vec<FrameClassification>,
    #[serde(default)]
    pub recommended_eyes_open_frame: Option<usize>,
    #[serde(default)]
    pub recommended_eyes_closed_frame: Option<usize>,
    #[serde(default)]
    pub recommended_mouth_open_frame: Option<usize>,
    #[serde(default)]
    pub recommended_mouth_closed_frame: Option<usize>,
}

impl SpriteSheetAnalysis {
    pub fn frame(&self, index: usize) -> Option<&FrameClassification> {
        self.frames.iter().find(|f| f.frame_index == index)
    }

    /// Recommended frame for a part, falling back to the first frame
    /// labelled accordingly.
    pub fn recommended(&self, part: FacePart) -> Option<usize> {
        let explicit = match part {
            FacePart::EyesOpen => self.recommended_eyes_open_frame,
            FacePart::EyesClosed => self.recommended_eyes_closed_frame,
            FacePart::MouthOpen => self.recommended_mouth_open_frame,
            FacePart::MouthClosed => self.recommended_mouth_closed_frame,
        };
        explicit.or_else(|| {
            self.frames
                .iter()
                .find(|frame| part.labels(frame))
                .map(|frame| frame.frame_index)
        })
    }

    /// Check every index addresses a frame of a `frame_count` sheet.
    pub fn validate(&self, frame_count: usize) -> Result<(), RemoteError> {
        for frame in &self.frames {
            if frame.frame_index >= frame_count {
                return Err(RemoteError::InvalidAnalysis {
                    reason: format!(
                        "frameIndex {} outside 0..{}",
                        frame.frame_index, frame_count
                    ),
                });
            }
        }
        let recommended = [
            ("recommendedEyesOpenFrame", self.recommended_eyes_open_frame),
            ("recommendedEyesClosedFrame", self.recommended_eyes_closed_frame),
            ("recommendedMouthOpenFrame", self.recommended_mouth_open_frame),
            ("recommendedMouthClosedFrame", self.recommended_mouth_closed_frame),
        ];
        for (field, index) in recommended {
            if let Some(index) = index {
                if index >= frame_count {
                    return Err(RemoteError::InvalidAnalysis {
                        reason: format!("{} {} outside 0..{}", field, index, frame_count),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Parse classifier output, tolerating a Markdown code fence around it.
pub fn parse_analysis_text(text: &str, frame_count: usize) -> Result<SpriteSheetAnalysis, RemoteError> {
    let analysis: SpriteSheetAnalysis = serde_json::from_str(strip_code_fence(text))?;
    analysis.validate(frame_count)?;
    log::debug!(
        "[Analysis] parsed {} frame labels (mouth open={:?} closed={:?})",
        analysis.frames.len(),
        analysis.recommended(FacePart::MouthOpen),
        analysis.recommended(FacePart::MouthClosed)
    );
    Ok(analysis)
}

/// Strip a surrounding ```` ``` ```` / ```` ```json ```` fence if present.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (e.g. "json") up to the first newline
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// User-editable rects for the four named parts
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FacePartRectMap {
    pub eyes_open: FacePartRect,
    pub eyes_closed: FacePartRect,
    pub mouth_open: FacePartRect,
    pub mouth_closed: FacePartRect,
}

impl FacePartRectMap {
    pub const DEFAULT_EYES: FacePartRect = FacePartRect::new(0.25, 0.28, 0.5, 0.16);
    pub const DEFAULT_MOUTH: FacePartRect = FacePartRect::new(0.35, 0.58, 0.3, 0.16);

    pub fn get(&self, part: FacePart) -> FacePartRect {
        match part {
            FacePart::EyesOpen => self.eyes_open,
            FacePart::EyesClosed => self.eyes_closed,
            FacePart::MouthOpen => self.mouth_open,
            FacePart::MouthClosed => self.mouth_closed,
        }
    }

    pub fn set(&mut self, part: FacePart, rect: FacePartRect) {
        let rect = rect.clamped();
        match part {
            FacePart::EyesOpen => self.eyes_open = rect,
            FacePart::EyesClosed => self.eyes_closed = rect,
            FacePart::MouthOpen => self.mouth_open = rect,
            FacePart::MouthClosed => self.mouth_closed = rect,
        }
    }

    /// Seed each part from the matching rect of its recommended frame.
    pub fn seeded_from(analysis: &SpriteSheetAnalysis) -> Self {
        let mut map = Self::default();
        for part in FacePart::ALL {
            let rect = analysis
                .recommended(part)
                .and_then(|index| analysis.frame(index))
                .and_then(|frame| if part.is_eyes() { frame.eyes_rect } else { frame.mouth_rect });
            if let Some(rect) = rect {
                map.set(part, rect);
            }
        }
        map
    }
}

impl Default for FacePartRectMap {
    fn default() -> Self {
        Self {
            eyes_open: Self::DEFAULT_EYES,
            eyes_closed: Self::DEFAULT_EYES,
            mouth_open: Self::DEFAULT_MOUTH,
            mouth_closed: Self::DEFAULT_MOUTH,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "frames": [
            {"frameIndex": 0, "eyesState": "open", "mouthState": "closed", "emotion": "neutral",
             "mouthRect": {"x": 0.4, "y": 0.6, "w": 0.2, "h": 0.1}},
            {"frameIndex": 1, "eyesState": "open", "mouthState": "open",
             "mouthRect": {"x": 0.38, "y": 0.58, "w": 0.24, "h": 0.16}},
            {"frameIndex": 2, "eyesState": "closed", "mouthState": "half-open",
             "eyesRect": {"x": 0.2, "y": 0.3, "w": 0.6, "h": 0.1}},
            {"frameIndex": 3, "eyesState": "squinting", "mouthState": "grin"}
        ],
        "recommendedEyesOpenFrame": 0,
        "recommendedEyesClosedFrame": 2,
        "recommendedMouthOpenFrame": 1,
        "recommendedMouthClosedFrame": 0
    }"#;

    #[test]
    fn test_parse_with_lenient_labels() {
        let analysis = parse_analysis_text(SAMPLE, 16).unwrap();
        assert_eq!(analysis.frames.len(), 4);
        assert_eq!(analysis.frames[2].mouth_state, MouthLabel::Mid);
        assert_eq!(analysis.frames[3].eyes_state, EyesLabel::Unknown);
        assert_eq!(analysis.frames[3].mouth_state, MouthLabel::Unknown);
        assert_eq!(analysis.frames[0].emotion.as_deref(), Some("neutral"));
        assert_eq!(analysis.recommended(FacePart::MouthOpen), Some(1));
    }

    #[test]
    fn test_code_fence_is_stripped() {
        let fenced = format!("```json\n{}\n```\n", SAMPLE);
        assert!(parse_analysis_text(&fenced, 16).is_ok());
        assert_eq!(strip_code_fence("```\n{}\n```"), "{}");
        assert_eq!(strip_code_fence("  {} "), "{}");
    }

    #[test]
    fn test_malformed_json_is_a_hard_failure() {
        let err = parse_analysis_text("{\"frames\": [", 16).unwrap_err();
        assert!(matches!(err, RemoteError::MalformedJson { .. }));

        let err = parse_analysis_text("Sorry, I cannot help with that.", 16).unwrap_err();
        assert!(matches!(err, RemoteError::MalformedJson { .. }));
    }

    #[test]
    fn test_out_of_range_indices_are_rejected() {
        let err = parse_analysis_text(SAMPLE, 3).unwrap_err();
        assert!(matches!(err, RemoteError::InvalidAnalysis { .. }));

        let json = r#"{"frames": [], "recommendedMouthOpenFrame": 16}"#;
        let err = parse_analysis_text(json, 16).unwrap_err();
        assert!(matches!(err, RemoteError::InvalidAnalysis { .. }));
    }

    #[test]
    fn test_recommendation_falls_back_to_labels() {
        let json = r#"{"frames": [
            {"frameIndex": 5, "eyesState": "closed", "mouthState": "closed"},
            {"frameIndex": 7, "eyesState": "open", "mouthState": "open"}
        ]}"#;
        let analysis = parse_analysis_text(json, 16).unwrap();
        assert_eq!(analysis.recommended(FacePart::EyesClosed), Some(5));
        assert_eq!(analysis.recommended(FacePart::MouthOpen), Some(7));
        assert_eq!(analysis.recommended(FacePart::EyesOpen), Some(7));
    }

    #[test]
    fn test_rect_map_seeding() {
        let analysis = parse_analysis_text(SAMPLE, 16).unwrap();
        let map = FacePartRectMap::seeded_from(&analysis);
        assert_eq!(map.mouth_open, FacePartRect::new(0.38, 0.58, 0.24, 0.16));
        assert_eq!(map.mouth_closed, FacePartRect::new(0.4, 0.6, 0.2, 0.1));
        assert_eq!(map.eyes_closed, FacePartRect::new(0.2, 0.3, 0.6, 0.1));
        // Frame 0 carries no eyes rect
        assert_eq!(map.eyes_open, FacePartRectMap::DEFAULT_EYES);
    }

    #[test]
    fn test_rect_clamping_and_pixels() {
        let rect = FacePartRect::new(0.9, -0.5, 0.5, 2.0).clamped();
        assert!((rect.w - 0.1).abs() < 1e-6);
        assert_eq!(rect.y, 0.0);
        assert_eq!(rect.h, 1.0);

        assert_eq!(FacePartRect::new(0.0, 0.0, 0.0, 0.5).to_pixels(64, 64), None);
        assert_eq!(
            FacePartRect::new(0.25, 0.5, 0.5, 0.25).to_pixels(64, 64),
            Some((16, 32, 32, 16))
        );
    }
}
