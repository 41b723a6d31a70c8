// Recording phase state machine
//
//   Idle → Preparing → Recording → Finalizing → Done
//              ↓           ↓           ↓
//            Error       Error       Error
//
// Finalizing → Error covers chunk assembly and mux failures.
//
// Done and Error are resting phases: a new trigger re-enters Preparing, and
// replacing the audio source drops back to Idle.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::telemetry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingPhase {
    Idle,
    Preparing,
    Recording,
    Finalizing,
    Done,
    Error,
}

impl RecordingPhase {
    pub fn can_transition_to(self, next: RecordingPhase) -> bool {
        use RecordingPhase::*;
        matches!(
            (self, next),
            (Idle | Done | Error, Preparing)
                | (Preparing, Recording)
                | (Recording, Finalizing)
                | (Finalizing, Done)
                | (Preparing | Recording | Finalizing, Error)
                | (Done | Error, Idle)
        )
    }

    /// A recording sequence is in flight.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            RecordingPhase::Preparing | RecordingPhase::Recording | RecordingPhase::Finalizing
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordingPhase::Idle => "idle",
            RecordingPhase::Preparing => "preparing",
            RecordingPhase::Recording => "recording",
            RecordingPhase::Finalizing => "finalizing",
            RecordingPhase::Done => "done",
            RecordingPhase::Error => "error",
        }
    }
}

/// Publishes phase changes to watchers and telemetry
pub struct PhaseTracker {
    tx: watch::Sender<RecordingPhase>,
}

impl PhaseTracker {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(RecordingPhase::Idle);
        Self { tx }
    }

    pub fn current(&self) -> RecordingPhase {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<RecordingPhase> {
        self.tx.subscribe()
    }

    /// Move to `next`. Illegal transitions are refused and logged.
    pub fn advance(&self, next: RecordingPhase) -> bool {
        let current = self.current();
        if current == next {
            return true;
        }
        if !current.can_transition_to(next) {
            log::warn!(
                "[Recorder] refused phase change {} → {}",
                current.as_str(),
                next.as_str()
            );
            return false;
        }
        self.tx.send_replace(next);
        log::info!("[Recorder] phase {} → {}", current.as_str(), next.as_str());
        telemetry::hub().record_phase(next);
        true
    }
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}
