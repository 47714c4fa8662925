//! Error types surfaced to API callers

use std::collections::BTreeMap;

use transport::{ClassifiedError, ErrorKind};

/// Errors from API calls.
///
/// `Clone` because a single refresh failure is delivered to every request
/// queued behind it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The backend rejected the call, or retries were exhausted.
    #[error(transparent)]
    Api(#[from] ClassifiedError),

    /// The token refresh failed; credentials have been cleared.
    #[error("session expired: {0}")]
    SessionExpired(ClassifiedError),

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("credential store error: {0}")]
    Credential(String),
}

impl Error {
    /// The classified backend failure behind this error, if any.
    pub fn classified(&self) -> Option<&ClassifiedError> {
        match self {
            Error::Api(e) | Error::SessionExpired(e) => Some(e),
            _ => None,
        }
    }

    pub fn kind(&self) -> Option<ErrorKind> {
        self.classified().map(|e| e.kind)
    }

    /// Field-level validation messages for form display.
    pub fn validation_errors(&self) -> Option<&BTreeMap<String, Vec<String>>> {
        self.classified().and_then(|e| e.validation.as_ref())
    }

    pub fn is_session_expired(&self) -> bool {
        matches!(self, Error::SessionExpired(_))
    }
}

impl From<session_store::Error> for Error {
    fn from(e: session_store::Error) -> Self {
        Error::Credential(e.to_string())
    }
}

/// Result alias for API calls.
pub type Result<T> = std::result::Result<T, Error>;
