// Recording pipeline error types and constants

use crate::error::{ErrorCode, MediaError};
use log::error;
use std::fmt;

/// Recording error code constants
///
/// Error code range: 2001-2006
pub struct RecordingErrorCodes {}

impl RecordingErrorCodes {
    /// Requested container/codec is not supported by the recorder
    pub const UNSUPPORTED_FORMAT: i32 = 2001;

    /// No audio source has been loaded
    pub const NO_AUDIO: i32 = 2002;

    /// No sprite frames are available to render
    pub const NO_FRAMES: i32 = 2003;

    /// Recording was cancelled before finishing
    pub const CANCELLED: i32 = 2004;

    /// Surface capture or chunk assembly failed
    pub const CAPTURE_FAILED: i32 = 2005;

    /// Wrapped media error during setup or encoding
    pub const MEDIA: i32 = 2006;
}

/// Log a recording error with structured context
pub fn log_recording_error(err: &RecordingError, context: &str) {
    error!(
        "Recording error in {}: code={}, component=RecordingPipeline, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Recording pipeline errors
///
/// Any of these aborts the pipeline into its error phase; no partial
/// artifact is exposed.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordingError {
    /// Container name is not one the muxer can produce
    UnsupportedFormat { container: String },

    /// Recording requested without a loaded audio source
    NoAudio,

    /// Recording requested without any sprite frames
    NoFrames,

    /// Session ended while recording
    Cancelled,

    /// Capture of the surface or audio track failed
    CaptureFailed { reason: String },

    /// Media error raised while preparing or encoding
    Media(MediaError),
}

impl ErrorCode for RecordingError {
    fn code(&self) -> i32 {
        match self {
            RecordingError::UnsupportedFormat { .. } => RecordingErrorCodes::UNSUPPORTED_FORMAT,
            RecordingError::NoAudio => RecordingErrorCodes::NO_AUDIO,
            RecordingError::NoFrames => RecordingErrorCodes::NO_FRAMES,
            RecordingError::Cancelled => RecordingErrorCodes::CANCELLED,
            RecordingError::CaptureFailed { .. } => RecordingErrorCodes::CAPTURE_FAILED,
            RecordingError::Media(_) => RecordingErrorCodes::MEDIA,
        }
    }

    fn message(&self) -> String {
        match self {
            RecordingError::UnsupportedFormat { container } => {
                format!("Recording format '{}' is not supported", container)
            }
            RecordingError::NoAudio => "No audio loaded. Load an audio source first.".to_string(),
            RecordingError::NoFrames => {
                "No sprite frames available. Load a sprite sheet first.".to_string()
            }
            RecordingError::Cancelled => "Recording cancelled".to_string(),
            RecordingError::CaptureFailed { reason } => format!("Capture failed: {}", reason),
            RecordingError::Media(err) => err.message(),
        }
    }
}

impl fmt::Display for RecordingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordingError (code {}): {}", self.code(), self.message())
    }
}

impl std::error::Error for RecordingError {}

impl From<MediaError> for RecordingError {
    fn from(err: MediaError) -> Self {
        RecordingError::Media(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_error_codes() {
        assert_eq!(
            RecordingError::UnsupportedFormat {
                container: "webm".to_string()
            }
            .code(),
            2001
        );
        assert_eq!(RecordingError::NoAudio.code(), 2002);
        assert_eq!(RecordingError::NoFrames.code(), 2003);
        assert_eq!(RecordingError::Cancelled.code(), 2004);
        assert_eq!(
            RecordingError::Media(MediaError::Io {
                details: "x".to_string()
            })
            .code(),
            2006
        );
    }

    #[test]
    fn test_media_error_is_wrapped() {
        let err: RecordingError = MediaError::EncodeFailed {
            reason: "bad frame".to_string(),
        }
        .into();
        assert_eq!(err.code(), RecordingErrorCodes::MEDIA);
        assert!(err.message().contains("bad frame"));
    }

    #[test]
    fn test_unsupported_format_message_names_container() {
        let err = RecordingError::UnsupportedFormat {
            container: "webm".to_string(),
        };
        assert!(format!("{}", err).contains("webm"));
    }
}
