// Media error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Media error code constants
///
/// Error code range: 1001-1006
pub struct MediaErrorCodes {}

impl MediaErrorCodes {
    /// Audio payload could not be decoded
    pub const AUDIO_DECODE_FAILED: i32 = 1001;

    /// Audio uses a sample layout the decoder does not handle
    pub const UNSUPPORTED_AUDIO: i32 = 1002;

    /// Image payload could not be decoded
    pub const IMAGE_DECODE_FAILED: i32 = 1003;

    /// Sprite sheet dimensions do not fit the configured grid
    pub const INVALID_SHEET: i32 = 1004;

    /// Frame or container encoding failed
    pub const ENCODE_FAILED: i32 = 1005;

    /// File system error while reading or writing media
    pub const IO: i32 = 1006;
}

/// Log a media error with structured context
///
/// The logging is non-blocking and will not panic on failure.
pub fn log_media_error(err: &MediaError, context: &str) {
    error!(
        "Media error in {}: code={}, component=Media, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Media-related errors
///
/// These cover decoding of the audio source and sprite sheet, and encoding
/// of captured frames.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaError {
    /// Audio bytes are not a readable WAV stream
    AudioDecodeFailed { reason: String },

    /// Audio format is readable but not supported (bit depth, channel count)
    UnsupportedAudio { detail: String },

    /// Image bytes could not be decoded
    ImageDecodeFailed { reason: String },

    /// Sheet is too small or otherwise unsliceable
    InvalidSheet { reason: String },

    /// JPEG or container encoding failed
    EncodeFailed { reason: String },

    /// Underlying I/O failure
    Io { details: String },
}

impl ErrorCode for MediaError {
    fn code(&self) -> i32 {
        match self {
            MediaError::AudioDecodeFailed { .. } => MediaErrorCodes::AUDIO_DECODE_FAILED,
            MediaError::UnsupportedAudio { .. } => MediaErrorCodes::UNSUPPORTED_AUDIO,
            MediaError::ImageDecodeFailed { .. } => MediaErrorCodes::IMAGE_DECODE_FAILED,
            MediaError::InvalidSheet { .. } => MediaErrorCodes::INVALID_SHEET,
            MediaError::EncodeFailed { .. } => MediaErrorCodes::ENCODE_FAILED,
            MediaError::Io { .. } => MediaErrorCodes::IO,
        }
    }

    fn message(&self) -> String {
        match self {
            MediaError::AudioDecodeFailed { reason } => {
                format!("Failed to decode audio: {}", reason)
            }
            MediaError::UnsupportedAudio { detail } => {
                format!("Unsupported audio format: {}", detail)
            }
            MediaError::ImageDecodeFailed { reason } => {
                format!("Failed to decode image: {}", reason)
            }
            MediaError::InvalidSheet { reason } => format!("Invalid sprite sheet: {}", reason),
            MediaError::EncodeFailed { reason } => format!("Encoding failed: {}", reason),
            MediaError::Io { details } => format!("I/O error: {}", details),
        }
    }
}

impl fmt::Display for MediaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MediaError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for MediaError {}

impl From<std::io::Error> for MediaError {
    fn from(err: std::io::Error) -> Self {
        MediaError::Io {
            details: err.to_string(),
        }
    }
}

impl From<image::ImageError> for MediaError {
    fn from(err: image::ImageError) -> Self {
        match err {
            image::ImageError::IoError(io) => io.into(),
            image::ImageError::Encoding(enc) => MediaError::EncodeFailed {
                reason: enc.to_string(),
            },
            other => MediaError::ImageDecodeFailed {
                reason: other.to_string(),
            },
        }
    }
}
