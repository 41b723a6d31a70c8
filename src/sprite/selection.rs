// Frame resolution table - (eye, mouth) → sprite frame index
//
// Resolution for a key never fails. The chain is:
//   user override → recommended (analysis or heuristic) → [mid only: open
//   resolution for the same eye] → 0
// Every candidate is checked against the frame count so a stale override
// from a larger sheet can never produce an out-of-range index.

use std::collections::HashMap;

use serde::Serialize;

use crate::analysis::viseme::MouthState;
use crate::animation::EyeState;
use crate::sprite::analysis::{EyesLabel, FacePart, MouthLabel, SpriteSheetAnalysis};
use crate::sprite::scoring::MouthPick;

/// One of the six (eye, mouth) combinations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SelectionKey {
    pub eye: EyeState,
    pub mouth: MouthState,
}

impl SelectionKey {
    pub const ALL: [SelectionKey; 6] = [
        SelectionKey::new(EyeState::Open, MouthState::Open),
        SelectionKey::new(EyeState::Open, MouthState::Mid),
        SelectionKey::new(EyeState::Open, MouthState::Closed),
        SelectionKey::new(EyeState::Closed, MouthState::Open),
        SelectionKey::new(EyeState::Closed, MouthState::Mid),
        SelectionKey::new(EyeState::Closed, MouthState::Closed),
    ];

    pub const fn new(eye: EyeState, mouth: MouthState) -> Self {
        Self { eye, mouth }
    }
}

/// Which link of the chain produced a resolved index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionSource {
    User,
    Recommended,
    /// Mid fell back to the open-mouth resolution
    OpenMouth,
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub key: SelectionKey,
    pub frame_index: usize,
    pub source: ResolutionSource,
}

/// User overrides plus recommended defaults
#[derive(Debug, Clone, Default)]
pub struct FrameSelection {
    user: HashMap<SelectionKey, usize>,
    recommended: HashMap<SelectionKey, usize>,
}

impl FrameSelection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(&self, eye: EyeState, mouth: MouthState, frame_count: usize) -> usize {
        self.resolve_key(SelectionKey::new(eye, mouth), frame_count)
            .frame_index
    }

    pub fn resolve_key(&self, key: SelectionKey, frame_count: usize) -> Resolution {
        let valid = |index: &usize| *index < frame_count;

        if let Some(index) = self.user.get(&key).copied().filter(valid) {
            return Resolution {
                key,
                frame_index: index,
                source: ResolutionSource::User,
            };
        }
        if let Some(index) = self.recommended.get(&key).copied().filter(valid) {
            return Resolution {
                key,
                frame_index: index,
                source: ResolutionSource::Recommended,
            };
        }
        if key.mouth == MouthState::Mid {
            let open = self.resolve_key(SelectionKey::new(key.eye, MouthState::Open), frame_count);
            if open.source != ResolutionSource::Default {
                return Resolution {
                    key,
                    frame_index: open.frame_index,
                    source: ResolutionSource::OpenMouth,
                };
            }
        }
        Resolution {
            key,
            frame_index: 0,
            source: ResolutionSource::Default,
        }
    }

    /// Resolve all six keys.
    pub fn table(&self, frame_count: usize) -> Vec<Resolution> {
        SelectionKey::ALL
            .iter()
            .map(|key| self.resolve_key(*key, frame_count))
            .collect()
    }

    pub fn user_override(&self, key: SelectionKey) -> Option<usize> {
        self.user.get(&key).copied()
    }

    pub fn set_user(&mut self, key: SelectionKey, frame_index: usize) {
        log::debug!(
            "[Selection] user override eyes={} mouth={} → {}",
            key.eye.as_str(),
            key.mouth.as_str(),
            frame_index
        );
        self.user.insert(key, frame_index);
    }

    pub fn clear_user(&mut self, key: SelectionKey) {
        self.user.remove(&key);
    }

    /// Drop every user override.
    pub fn reset_user(&mut self) {
        self.user.clear();
    }

    /// Replace recommended defaults from an analysis. User overrides survive.
    ///
    /// Keys without an exactly labelled frame fall back to `pick`, the
    /// best open/closed mouth frames (see `scoring::pick_mouth_frames`).
    pub fn seed_from_analysis(&mut self, analysis: &SpriteSheetAnalysis, pick: Option<MouthPick>) {
        self.recommended.clear();
        for key in SelectionKey::ALL {
            if let Some(index) = recommend_for_key(analysis, pick, key) {
                self.recommended.insert(key, index);
            }
        }
        log::debug!(
            "[Selection] seeded {} recommended keys from analysis",
            self.recommended.len()
        );
    }

    /// Replace recommended defaults from an open/closed mouth pick. Both eye
    /// states map to the picked frames; mid is left to the open fallback.
    pub fn seed_from_pick(&mut self, pick: MouthPick) {
        self.recommended.clear();
        for eye in EyeState::ALL {
            self.recommended
                .insert(SelectionKey::new(eye, MouthState::Open), pick.open);
            self.recommended
                .insert(SelectionKey::new(eye, MouthState::Closed), pick.closed);
        }
    }

    pub fn clear_recommended(&mut self) {
        self.recommended.clear();
    }
}

/// Pick a frame for a key from an analysis.
///
/// Prefers a frame labelled with both the key's eye and mouth state, checking
/// recommended frames before the rest. Falls back to the mouth pick for open
/// eyes, and to the eyes-closed recommendation (then the mouth pick) for
/// closed eyes.
fn recommend_for_key(analysis: &SpriteSheetAnalysis, pick: Option<MouthPick>, key: SelectionKey) -> Option<usize> {
    let recommended = FacePart::ALL
        .iter()
        .filter_map(|part| analysis.recommended(*part));
    let all = analysis.frames.iter().map(|frame| frame.frame_index);

    let exact = recommended.chain(all).find(|index| {
        analysis
            .frame(*index)
            .map(|frame| eye_matches(frame.eyes_state, key.eye) && mouth_matches(frame.mouth_state, key.mouth))
            .unwrap_or(false)
    });
    if exact.is_some() {
        return exact;
    }

    let picked = pick.map(|pick| match key.mouth {
        MouthState::Open => pick.open,
        MouthState::Mid | MouthState::Closed => pick.closed,
    });
    match (key.eye, key.mouth) {
        (_, MouthState::Mid) => None,
        (EyeState::Open, _) => picked,
        (EyeState::Closed, _) => analysis.recommended(FacePart::EyesClosed).or(picked),
    }
}

fn eye_matches(label: EyesLabel, eye: EyeState) -> bool {
    matches!(
        (label, eye),
        (EyesLabel::Open, EyeState::Open) | (EyesLabel::Closed, EyeState::Closed)
    )
}

fn mouth_matches(label: MouthLabel, mouth: MouthState) -> bool {
    matches!(
        (label, mouth),
        (MouthLabel::Open, MouthState::Open)
            | (MouthLabel::Mid, MouthState::Mid)
            | (MouthLabel::Closed, MouthState::Closed)
    )
}
