//! Error classification for backend responses
//!
//! Maps a transport outcome to a typed error with a retryability flag. The
//! refresh coordinator branches on `ErrorKind::Unauthorized`; the retry
//! executor branches on `retryable`. The two never overlap: 401 is not
//! retryable, and no retryable kind triggers a refresh.
//!
//! When the backend supplies its standard error payload
//! (`{"success": false, "message": ..., "errors": {...}, "code": ...}`) the
//! message, field errors and code are carried through for display.

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;

use crate::{TransportFailure, TransportResult};

/// Failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No response (unreachable, timeout)
    Network,
    /// 401, resolved by a token refresh
    Unauthorized,
    /// 400/422, field-level errors for the caller
    Validation,
    /// 404/409
    ClientError,
    /// 429
    RateLimited,
    /// 5xx
    ServerError,
    /// Anything else
    Unknown,
}

impl ErrorKind {
    /// Label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Validation => "validation",
            ErrorKind::ClientError => "client_error",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::ServerError => "server_error",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Typed, retry-aware failure. Derived from a transport outcome, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} error: {message}")]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub message: String,
    pub http_status: Option<u16>,
    pub retryable: bool,
    /// Field name → messages, when the backend reported validation errors.
    pub validation: Option<BTreeMap<String, Vec<String>>>,
    /// Backend error code, when supplied.
    pub code: Option<String>,
}

impl ClassifiedError {
    pub fn is_unauthorized(&self) -> bool {
        self.kind == ErrorKind::Unauthorized
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FieldMessages {
    Many(Vec<String>),
    One(String),
}

#[derive(Deserialize)]
struct ErrorPayload {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    errors: Option<BTreeMap<String, FieldMessages>>,
    #[serde(default)]
    code: Option<String>,
}

fn parse_payload(body: &[u8]) -> Option<ErrorPayload> {
    if body.is_empty() {
        return None;
    }
    serde_json::from_slice(body).ok()
}

fn kind_for_status(status: u16) -> (ErrorKind, bool) {
    match status {
        401 => (ErrorKind::Unauthorized, false),
        400 | 422 => (ErrorKind::Validation, false),
        404 | 409 => (ErrorKind::ClientError, false),
        429 => (ErrorKind::RateLimited, true),
        500..=599 => (ErrorKind::ServerError, true),
        other => (ErrorKind::Unknown, other >= 500),
    }
}

fn default_message(kind: ErrorKind, status: u16) -> String {
    match kind {
        ErrorKind::Unauthorized => "authentication required".to_string(),
        ErrorKind::Validation => "request validation failed".to_string(),
        ErrorKind::ClientError => format!("request rejected with status {status}"),
        ErrorKind::RateLimited => "too many requests".to_string(),
        ErrorKind::ServerError => format!("server error (status {status})"),
        ErrorKind::Network | ErrorKind::Unknown => {
            format!("unexpected response (status {status})")
        }
    }
}

/// Classify a non-2xx response by status code and body.
pub fn classify_status(status: u16, body: &[u8]) -> ClassifiedError {
    let (kind, retryable) = kind_for_status(status);
    let payload = parse_payload(body);

    let (message, validation, code) = match payload {
        Some(p) => {
            let validation = p.errors.filter(|e| !e.is_empty()).map(|errors| {
                errors
                    .into_iter()
                    .map(|(field, messages)| {
                        let messages = match messages {
                            FieldMessages::Many(m) => m,
                            FieldMessages::One(m) => vec![m],
                        };
                        (field, messages)
                    })
                    .collect()
            });
            let message = p
                .message
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| default_message(kind, status));
            (message, validation, p.code)
        }
        None => (default_message(kind, status), None, None),
    };

    ClassifiedError {
        kind,
        message,
        http_status: Some(status),
        retryable,
        validation,
        code,
    }
}

/// Classify a dispatch that produced no response.
pub fn classify_failure(failure: &TransportFailure) -> ClassifiedError {
    let message = if failure.timed_out {
        format!("request timed out: {}", failure.message)
    } else {
        format!("network unreachable: {}", failure.message)
    };
    ClassifiedError {
        kind: ErrorKind::Network,
        message,
        http_status: None,
        retryable: true,
        validation: None,
        code: None,
    }
}

/// Classify a transport outcome. Returns `None` for 2xx responses.
pub fn classify(outcome: &TransportResult) -> Option<ClassifiedError> {
    match outcome {
        Ok(response) if response.is_success() => None,
        Ok(response) => Some(classify_status(response.status, &response.body)),
        Err(failure) => Some(classify_failure(failure)),
    }
}
