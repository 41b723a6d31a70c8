// Recording session - idempotence and single-flight guard around the pipeline
//
// A recording is identified by (audio source, regenerate key). The key is
// recorded when a recording starts, so a finished or failed attempt is not
// repeated for the same key; only a new key or a new audio source records
// again. While one attempt is in flight every other trigger is ignored.
//
// Attempts run one at a time on a single-permit slot. An invalidated attempt
// is aborted, but its task may still be unwinding on another worker; the next
// attempt waits for the slot, so the old surface claim is gone before the new
// pipeline claims the surface.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{oneshot, watch, Semaphore};
use tokio::task::JoinHandle;

use crate::audio::AudioSourceId;
use crate::error::{log_recording_error, RecordingError};
use crate::recording::avi::VideoArtifact;
use crate::recording::pipeline::{run_pipeline, PipelineInputs, PipelineSettings};
use crate::recording::state::{PhaseTracker, RecordingPhase};
use crate::telemetry;

/// What a recording is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordingKey {
    pub audio: AudioSourceId,
    pub regenerate: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    Started,
    /// The same key was already recorded (or attempted)
    SkippedUpToDate,
    /// Another recording is still running
    SkippedInFlight,
    /// No audio source is loaded
    NoAudio,
}

#[derive(Default)]
struct Outcome {
    attempted: Option<RecordingKey>,
    /// Attempt allowed to publish its result
    publishing: Option<u64>,
    artifact: Option<Arc<VideoArtifact>>,
    error: Option<RecordingError>,
}

pub struct RecordingSession {
    phase: Arc<PhaseTracker>,
    outcome: Arc<Mutex<Outcome>>,
    slot: Arc<Semaphore>,
    attempts: u64,
    cancel_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl RecordingSession {
    pub fn new() -> Self {
        Self {
            phase: Arc::new(PhaseTracker::new()),
            outcome: Arc::new(Mutex::new(Outcome::default())),
            slot: Arc::new(Semaphore::new(1)),
            attempts: 0,
            cancel_tx: None,
            handle: None,
        }
    }

    fn outcome(&self) -> MutexGuard<'_, Outcome> {
        lock(&self.outcome)
    }

    pub fn phase(&self) -> RecordingPhase {
        self.phase.current()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<RecordingPhase> {
        self.phase.subscribe()
    }

    /// Recordings started over the session lifetime.
    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    pub fn artifact(&self) -> Option<Arc<VideoArtifact>> {
        self.outcome().artifact.clone()
    }

    pub fn last_error(&self) -> Option<RecordingError> {
        self.outcome().error.clone()
    }

    /// Start a recording for `key` unless one is running or `key` was
    /// already attempted.
    pub fn trigger(&mut self, key: RecordingKey, inputs: PipelineInputs, settings: PipelineSettings) -> TriggerOutcome {
        if self.phase.current().is_active() {
            log::debug!("[RecordingSession] trigger ignored, recording in flight");
            return TriggerOutcome::SkippedInFlight;
        }
        {
            let mut outcome = lock(&self.outcome);
            if outcome.attempted == Some(key) {
                log::debug!("[RecordingSession] trigger ignored, {:?} already recorded", key);
                return TriggerOutcome::SkippedUpToDate;
            }
            if !self.phase.advance(RecordingPhase::Preparing) {
                return TriggerOutcome::SkippedInFlight;
            }
            self.attempts += 1;
            outcome.attempted = Some(key);
            outcome.publishing = Some(self.attempts);
            outcome.artifact = None;
            outcome.error = None;
        }
        let attempt = self.attempts;

        let (cancel_tx, cancel_rx) = oneshot::channel();
        let phase = Arc::clone(&self.phase);
        let outcome = Arc::clone(&self.outcome);
        let slot = Arc::clone(&self.slot);
        let handle = tokio::spawn(async move {
            // Held for the whole attempt; declared first so it is released
            // after the pipeline future (and its surface claim) is dropped
            let _permit = match slot.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            let result = run_pipeline(inputs, settings, Arc::clone(&phase), cancel_rx).await;
            let mut outcome = lock(&outcome);
            if outcome.publishing != Some(attempt) {
                return;
            }
            outcome.publishing = None;
            match result {
                Ok(artifact) => {
                    outcome.artifact = Some(Arc::new(artifact));
                    phase.advance(RecordingPhase::Done);
                }
                Err(err) => {
                    log_recording_error(&err, "RecordingSession::trigger");
                    telemetry::hub().record_error(&err, "recording");
                    outcome.error = Some(err);
                    phase.advance(RecordingPhase::Error);
                }
            }
        });

        self.cancel_tx = Some(cancel_tx);
        self.handle = Some(handle);
        log::info!("[RecordingSession] recording started for {:?}", key);
        TriggerOutcome::Started
    }

    /// Wait for the current attempt to reach Done or Error. Without a
    /// published result (never triggered, or invalidated) this is `Cancelled`.
    ///
    /// Cancel safe: dropping the future keeps the attempt joinable.
    pub async fn wait(&mut self) -> Result<Arc<VideoArtifact>, RecordingError> {
        if let Some(handle) = self.handle.as_mut() {
            let joined = handle.await;
            self.handle = None;
            if joined.is_err() {
                return Err(RecordingError::Cancelled);
            }
        }
        self.cancel_tx = None;
        let outcome = self.outcome();
        match (&outcome.artifact, &outcome.error) {
            (Some(artifact), _) => Ok(Arc::clone(artifact)),
            (None, Some(err)) => Err(err.clone()),
            (None, None) => Err(RecordingError::Cancelled),
        }
    }

    /// Ask the running attempt to stop. It ends in the Error phase.
    pub fn cancel(&mut self) {
        if let Some(tx) = self.cancel_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Forget the previous result, e.g. after the audio source changed.
    /// A running attempt is cancelled and its task stopped; the next attempt
    /// starts once that task has released the surface.
    pub fn invalidate(&mut self) {
        self.cancel();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        {
            let mut outcome = self.outcome();
            *outcome = Outcome::default();
        }
        let phase = self.phase.current();
        if phase.is_active() {
            self.phase.advance(RecordingPhase::Error);
        }
        if phase != RecordingPhase::Idle {
            self.phase.advance(RecordingPhase::Idle);
        }
    }
}

impl Default for RecordingSession {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RecordingSession {
    fn drop(&mut self) {
        self.cancel();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
