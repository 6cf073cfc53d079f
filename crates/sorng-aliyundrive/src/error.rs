//! Error types for the Aliyun Drive integration.
//!
//! All public API surfaces in this crate return `DriveResult<T>`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Convenience alias.
pub type DriveResult<T> = Result<T, DriveError>;

/// Broad classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriveErrorKind {
    /// Connection / IO failure below the application protocol.
    Transport,
    /// Structured `{code, message}` error returned by the service.
    Api,
    /// Rejected locally before any network call.
    Validation,
    /// Aborted by a progress callback or a cancelled rate-limited read.
    Cancelled,
    /// Upload completion reported a non-available status.
    UploadFailed,
    /// (De)serialization error.
    Serialization,
    /// Local file / stream error.
    Io,
    /// Invalid client configuration.
    Config,
}

impl fmt::Display for DriveErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Structured error returned by every public function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriveError {
    pub kind: DriveErrorKind,
    pub message: String,
    /// Application error code reported by the service, e.g. `AccessTokenInvalid`.
    pub api_code: Option<String>,
}

impl fmt::Display for DriveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.api_code {
            Some(ref code) => write!(f, "[{}] Code={}, Message={}", self.kind, code, self.message),
            None => write!(f, "[{}] {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for DriveError {}

impl DriveError {
    pub fn new(kind: DriveErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            api_code: None,
        }
    }

    /// Application error carrying the server's code and message.
    pub fn api(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: DriveErrorKind::Api,
            message: message.into(),
            api_code: Some(code.into()),
        }
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::new(DriveErrorKind::Transport, msg)
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::new(DriveErrorKind::Validation, msg)
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::new(DriveErrorKind::Cancelled, msg)
    }

    pub fn upload_failed(msg: impl Into<String>) -> Self {
        Self::new(DriveErrorKind::UploadFailed, msg)
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::new(DriveErrorKind::Config, msg)
    }

    /// True when the user (or a shutdown) aborted the operation.
    pub fn is_cancelled(&self) -> bool {
        self.kind == DriveErrorKind::Cancelled
    }

    /// True when the service answered with the given application code.
    pub fn has_api_code(&self, code: &str) -> bool {
        self.api_code.as_deref() == Some(code)
    }
}

impl From<reqwest::Error> for DriveError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::transport(format!("Request timed out: {}", err))
        } else if err.is_connect() {
            Self::transport(format!("Connection failed: {}", err))
        } else if err.is_decode() {
            Self::new(DriveErrorKind::Serialization, format!("Decode error: {}", err))
        } else {
            Self::transport(format!("HTTP error: {}", err))
        }
    }
}

impl From<serde_json::Error> for DriveError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(DriveErrorKind::Serialization, format!("JSON error: {}", err))
    }
}

impl From<std::io::Error> for DriveError {
    fn from(err: std::io::Error) -> Self {
        Self::new(DriveErrorKind::Io, err.to_string())
    }
}

impl From<url::ParseError> for DriveError {
    fn from(err: url::ParseError) -> Self {
        Self::invalid(format!("URL parse error: {}", err))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_display_includes_code() {
        let err = DriveError::api("NotFound.File", "file not exist");
        let s = err.to_string();
        assert!(s.contains("Code=NotFound.File"));
        assert!(s.contains("file not exist"));
        assert!(err.has_api_code("NotFound.File"));
    }

    #[test]
    fn plain_error_display() {
        let err = DriveError::invalid("chunk size must be positive");
        assert_eq!(err.to_string(), "[Validation] chunk size must be positive");
        assert!(err.api_code.is_none());
    }

    #[test]
    fn cancelled_is_distinguishable() {
        assert!(DriveError::cancelled("user stop").is_cancelled());
        assert!(!DriveError::transport("reset").is_cancelled());
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "short read");
        let err: DriveError = io.into();
        assert_eq!(err.kind, DriveErrorKind::Io);
        assert!(err.message.contains("short read"));
    }

    #[test]
    fn json_error_converts() {
        let bad = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: DriveError = bad.into();
        assert_eq!(err.kind, DriveErrorKind::Serialization);
    }
}
