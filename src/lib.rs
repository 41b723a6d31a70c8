// Sprite Lip-Sync Core
// Audio-driven mouth and blink animation over 4x4 sprite sheets, with a
// playback-synchronized recorder producing MJPEG + PCM video

// Module declarations
pub mod analysis;
pub mod animation;
pub mod audio;
pub mod config;
pub mod error;
pub mod recording;
pub mod remote;
pub mod render;
pub mod session;
pub mod sprite;
pub mod telemetry;

// Re-exports for convenience
pub use analysis::{LoudnessFrame, LoudnessParams, MouthState, VisemeThresholds};
pub use animation::{BlinkScheduler, BlinkTimings, EyeState};
pub use audio::{AudioSourceId, DecodedAudio};
pub use config::AppConfig;
pub use recording::{RecordingPhase, TriggerOutcome, VideoArtifact};
pub use session::AnimatorSession;
pub use sprite::{FacePart, FacePartRect, FrameSelection, SelectionKey, SpriteSheetAnalysis};
