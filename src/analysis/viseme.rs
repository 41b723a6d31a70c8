// Viseme module - three-way mouth classification and transition smoothing
//
// Classification maps an instantaneous loudness to {open, mid, closed} using
// two thresholds. Smoothing constrains the displayed state so it never cuts
// directly between open and closed: one tick of `mid` is always inserted.
//
// Transition table (previous → target = displayed):
//   closed → open   = mid
//   open   → closed = mid
//   mid    → open   = open
//   mid    → closed = closed
//   x      → x      = x

use serde::{Deserialize, Serialize};

/// Displayed mouth shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouthState {
    Open,
    Mid,
    Closed,
}

impl MouthState {
    pub const ALL: [MouthState; 3] = [MouthState::Open, MouthState::Mid, MouthState::Closed];

    pub fn as_str(&self) -> &'static str {
        match self {
            MouthState::Open => "open",
            MouthState::Mid => "mid",
            MouthState::Closed => "closed",
        }
    }
}

/// Loudness thresholds for the three-way classification
///
/// `mid >= open` is a caller configuration error; classification still maps
/// every value to a bucket but the mid bucket becomes unreachable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VisemeThresholds {
    pub mid: f64,
    pub open: f64,
}

impl VisemeThresholds {
    /// Factor applied to the base threshold to derive the open threshold.
    pub const OPEN_FACTOR: f64 = 3.0;

    pub fn new(mid: f64, open: f64) -> Self {
        Self { mid, open }
    }

    /// Derive both thresholds from the analyzer's base threshold.
    pub fn from_base(threshold: f64) -> Self {
        Self {
            mid: threshold,
            open: threshold * Self::OPEN_FACTOR,
        }
    }

    pub fn with_overrides(mut self, mid: Option<f64>, open: Option<f64>) -> Self {
        if let Some(mid) = mid {
            self.mid = mid;
        }
        if let Some(open) = open {
            self.open = open;
        }
        if self.mid >= self.open {
            log::warn!(
                "[Viseme] mid threshold {} >= open threshold {}; mid state unreachable",
                self.mid,
                self.open
            );
        }
        self
    }

    /// Classify a loudness value. Values on a threshold resolve upward.
    pub fn classify(&self, volume: f64) -> MouthState {
        if volume >= self.open {
            MouthState::Open
        } else if volume >= self.mid {
            MouthState::Mid
        } else {
            MouthState::Closed
        }
    }
}

impl Default for VisemeThresholds {
    fn default() -> Self {
        Self::from_base(0.01)
    }
}

/// Next displayed state given the previously displayed state and the newly
/// classified target.
pub fn next_displayed_state(previous: MouthState, target: MouthState) -> MouthState {
    match (previous, target) {
        (MouthState::Closed, MouthState::Open) | (MouthState::Open, MouthState::Closed) => {
            MouthState::Mid
        }
        (_, target) => target,
    }
}

/// Fold step used by the recording loop.
///
/// `None` means nothing has been displayed yet; the first target is shown
/// as-is.
pub fn smooth_step(previous: Option<MouthState>, target: MouthState) -> MouthState {
    match previous {
        Some(previous) => next_displayed_state(previous, target),
        None => target,
    }
}

/// Apply [`smooth_step`] across a whole target sequence.
pub fn smooth_sequence<I>(targets: I) -> Vec<MouthState>
where
    I: IntoIterator<Item = MouthState>,
{
    targets
        .into_iter()
        .scan(None, |displayed: &mut Option<MouthState>, target| {
            let next = smooth_step(*displayed, target);
            *displayed = Some(next);
            Some(next)
        })
        .collect()
}
