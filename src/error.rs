//! Errors surfaced by the ads platform collaborators
//!
//! The flattening engine itself does not fail on malformed data; it only
//! reports errors raised by a caller's value extractor. Remote calls fail in
//! two ways that callers treat differently: permission denied is recoverable
//! (substitute a default and move on), everything else is fatal.

use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum AdsError {
    #[error("Permission denied (request {request_id}): {message}")]
    PermissionDenied { request_id: String, message: String },

    #[error("{0}")]
    Remote(RemoteFailure),

    #[error("Missing query parameter: {name}")]
    MissingQueryParameter { name: String },

    #[error("Failed to flatten response: {0}")]
    Extraction(#[from] anyhow::Error),
}

pub type AdsResult<T> = std::result::Result<T, AdsError>;

/// A failed remote call as reported by the platform
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteFailure {
    pub request_id: String,
    pub status: String,
    pub errors: Vec<FieldError>,
}

/// One validation error, optionally pointing at the offending field
#[derive(Debug, Clone, PartialEq)]
pub struct FieldError {
    pub message: String,
    pub field_path: Vec<String>,
}

impl std::fmt::Display for RemoteFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Request {} failed with status {}", self.request_id, self.status)?;
        for error in &self.errors {
            write!(f, "; {}", error)?;
        }
        Ok(())
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.field_path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{} (on field {})", self.message, self.field_path.join("."))
        }
    }
}

impl AdsError {
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, AdsError::PermissionDenied { .. })
    }

    /// Request id of a failed remote call, if the error came from one
    pub fn request_id(&self) -> Option<&str> {
        match self {
            AdsError::PermissionDenied { request_id, .. } => Some(request_id),
            AdsError::Remote(failure) => Some(&failure.request_id),
            _ => None,
        }
    }
}

/// Recover from permission denied by returning `default`; every other error
/// propagates.
pub fn handle_permission_denied<T>(result: AdsResult<T>, default: T) -> AdsResult<T> {
    match result {
        Err(AdsError::PermissionDenied { request_id, message }) => {
            warn!(%request_id, %message, "Permission denied, using default result");
            Ok(default)
        }
        other => other,
    }
}
