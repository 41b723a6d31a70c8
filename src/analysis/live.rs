//! Live mouth tracking for the preview path.
//!
//! Feeds windows of incoming samples through the same RMS smoother the
//! offline analyzer uses, classifies the smoothed value three ways and
//! applies transition smoothing.

use crate::analysis::loudness::{rms, RmsSmoother};
use crate::analysis::viseme::{smooth_step, MouthState, VisemeThresholds};

pub struct LiveMouthTracker {
    smoother: RmsSmoother,
    thresholds: VisemeThresholds,
    displayed: Option<MouthState>,
}

impl LiveMouthTracker {
    pub fn new(thresholds: VisemeThresholds, smoothing: f64) -> Self {
        Self {
            smoother: RmsSmoother::new(smoothing),
            thresholds,
            displayed: None,
        }
    }

    /// Push one analysis window and return the state to display.
    pub fn push_window(&mut self, window: &[f32]) -> MouthState {
        let volume = self.smoother.push(rms(window));
        let next = smooth_step(self.displayed, self.thresholds.classify(volume));
        self.displayed = Some(next);
        next
    }

    pub fn volume(&self) -> f64 {
        self.smoother.value()
    }

    pub fn displayed(&self) -> MouthState {
        self.displayed.unwrap_or(MouthState::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loud_input_opens_through_mid() {
        let mut tracker = LiveMouthTracker::new(VisemeThresholds::new(0.05, 0.2), 1.0);
        assert_eq!(tracker.push_window(&[0.0; 32]), MouthState::Closed);
        assert_eq!(tracker.push_window(&[0.9; 32]), MouthState::Mid);
        assert_eq!(tracker.push_window(&[0.9; 32]), MouthState::Open);
        assert_eq!(tracker.push_window(&[0.0; 32]), MouthState::Mid);
        assert_eq!(tracker.push_window(&[0.0; 32]), MouthState::Closed);
    }

    #[test]
    fn test_default_display_is_closed() {
        let tracker = LiveMouthTracker::new(VisemeThresholds::default(), 0.3);
        assert_eq!(tracker.displayed(), MouthState::Closed);
        assert_eq!(tracker.volume(), 0.0);
    }
}
