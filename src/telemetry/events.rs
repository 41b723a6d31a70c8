//! Telemetry event types describing animator activity exposed to the CLI.

use serde::{Deserialize, Serialize};

use crate::animation::EyeState;
use crate::recording::RecordingPhase;

/// Why a preview tick drew nothing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The resolved frame is not decoded yet
    FrameNotReady,
    /// The recording pipeline owns the surface
    SurfaceBusy,
}

/// Animator events covering blink, preview, pick and recording activity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum MetricEvent {
    PhaseChanged {
        phase: RecordingPhase,
        timestamp_ms: u64,
    },
    BlinkTransition {
        eye: EyeState,
    },
    TickSkipped {
        reason: SkipReason,
        total: u64,
    },
    DegeneratePick {
        frame_index: usize,
        /// Heuristic score of the tied frame, absent for analysis picks
        score: Option<f32>,
    },
    RecordingSummary {
        video_frames: usize,
        audio_frames: usize,
        duration_ms: u64,
        bytes: usize,
    },
    Error {
        code: i32,
        context: String,
    },
}
