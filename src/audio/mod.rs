// Audio module - decoded audio sources and the recording playhead

pub mod decode;
pub mod playback;

// Re-export commonly used types for convenience
pub use decode::{AudioSourceId, DecodedAudio};
pub use playback::{AudioPlayback, PcmChunk};
