// Recording module - lip-synced video capture
//
// - state: phase machine (Idle → Preparing → Recording → Finalizing → Done)
// - capture: surface/audio chunk recorder
// - avi: RIFF muxer for the final artifact
// - pipeline: the playback-synchronized classify/render/capture loop
// - session: idempotence and single-flight guard

pub mod avi;
pub mod capture;
pub mod pipeline;
pub mod session;
pub mod state;

pub use avi::{mux, VideoArtifact, AVI_MIME};
pub use capture::{CapturedStreams, ChunkRecorder};
pub use pipeline::{run_pipeline, PipelineInputs, PipelineSettings, SUPPORTED_CONTAINERS};
pub use session::{RecordingKey, RecordingSession, TriggerOutcome};
pub use state::{PhaseTracker, RecordingPhase};
