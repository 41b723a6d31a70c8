// Analysis module - audio-to-viseme signal processing
//
// This module turns decoded audio into mouth states:
// - loudness: offline RMS + smoothing + release hysteresis → LoudnessFrame list
// - viseme: three-way classification and open/closed transition smoothing
// - live: streaming variant for the preview path
//
// The recording pipeline consumes the precomputed LoudnessFrame sequence and
// classifies each frame three ways as playback reaches its timestamp.

pub mod live;
pub mod loudness;
pub mod viseme;

pub use live::LiveMouthTracker;
pub use loudness::{analyze, analyze_samples, FrameMouth, LoudnessFrame, LoudnessParams};
pub use viseme::{next_displayed_state, smooth_step, MouthState, VisemeThresholds};
