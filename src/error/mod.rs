// Error types for the sprite lip-sync pipeline
//
// This module defines custom error types for media decoding, the recording
// pipeline and the remote generation service, providing structured error
// handling with stable numeric codes.

mod media;
mod recording;
mod remote;

pub use media::{log_media_error, MediaError, MediaErrorCodes};
pub use recording::{log_recording_error, RecordingError, RecordingErrorCodes};
pub use remote::{log_remote_error, RemoteError, RemoteErrorCodes};

/// Error codes for structured error reporting
///
/// This trait provides a standard way to get error codes and messages
/// from custom error types, enabling consistent reporting in the CLI and
/// in telemetry events.
pub trait ErrorCode {
    /// Get the numeric error code
    fn code(&self) -> i32;

    /// Get the human-readable error message
    fn message(&self) -> String;
}
