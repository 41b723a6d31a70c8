// Remote generation/analysis error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Remote error code constants
///
/// Error code range: 3001-3006
pub struct RemoteErrorCodes {}

impl RemoteErrorCodes {
    /// Network or client failure before a response was received
    pub const TRANSPORT: i32 = 3001;

    /// Service answered with a non-success status
    pub const STATUS: i32 = 3002;

    /// Generation response carried no image data
    pub const MISSING_IMAGE: i32 = 3003;

    /// Analysis response was not valid JSON of the expected shape
    pub const MALFORMED_JSON: i32 = 3004;

    /// Analysis JSON parsed but carried out-of-range values
    pub const INVALID_ANALYSIS: i32 = 3005;

    /// No API key configured
    pub const MISSING_CREDENTIALS: i32 = 3006;
}

/// Log a remote call error with structured context
pub fn log_remote_error(err: &RemoteError, context: &str) {
    error!(
        "Remote error in {}: code={}, component=RemoteClient, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Errors from the remote generation and analysis calls
///
/// None of these are retried automatically.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteError {
    Transport { reason: String },
    Status { status: u16, body: String },
    MissingImage,
    MalformedJson { reason: String },
    InvalidAnalysis { reason: String },
    MissingCredentials,
}

impl ErrorCode for RemoteError {
    fn code(&self) -> i32 {
        match self {
            RemoteError::Transport { .. } => RemoteErrorCodes::TRANSPORT,
            RemoteError::Status { .. } => RemoteErrorCodes::STATUS,
            RemoteError::MissingImage => RemoteErrorCodes::MISSING_IMAGE,
            RemoteError::MalformedJson { .. } => RemoteErrorCodes::MALFORMED_JSON,
            RemoteError::InvalidAnalysis { .. } => RemoteErrorCodes::INVALID_ANALYSIS,
            RemoteError::MissingCredentials => RemoteErrorCodes::MISSING_CREDENTIALS,
        }
    }

    fn message(&self) -> String {
        match self {
            RemoteError::Transport { reason } => format!("Request failed: {}", reason),
            RemoteError::Status { status, body } => {
                format!("Service returned HTTP {}: {}", status, body)
            }
            RemoteError::MissingImage => "Response did not contain image data".to_string(),
            RemoteError::MalformedJson { reason } => {
                format!("Malformed analysis JSON: {}", reason)
            }
            RemoteError::InvalidAnalysis { reason } => format!("Invalid analysis: {}", reason),
            RemoteError::MissingCredentials => "No API key configured".to_string(),
        }
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RemoteError (code {}): {}", self.code(), self.message())
    }
}

impl std::error::Error for RemoteError {}

impl From<serde_json::Error> for RemoteError {
    fn from(err: serde_json::Error) -> Self {
        RemoteError::MalformedJson {
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_codes() {
        assert_eq!(RemoteError::MissingImage.code(), 3003);
        assert_eq!(
            RemoteError::Status {
                status: 500,
                body: String::new()
            }
            .code(),
            RemoteErrorCodes::STATUS
        );
        assert_eq!(RemoteError::MissingCredentials.code(), 3006);
    }

    #[test]
    fn test_serde_error_maps_to_malformed_json() {
        let err: RemoteError = serde_json::from_str::<serde_json::Value>("{not json")
            .unwrap_err()
            .into();
        assert_eq!(err.code(), RemoteErrorCodes::MALFORMED_JSON);
    }
}
