// Render module - drawable surface and the live preview loop

pub mod live;
pub mod surface;

pub use live::{render_tick, FrameSet, LivePreview, PreviewInputs, PreviewStats, TickOutcome};
pub use surface::{RecordingClaim, SharedSurface, SurfaceOwner};
