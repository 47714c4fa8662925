//! Network boundary for the finance API client
//!
//! Defines the `Transport` trait that decouples the client pipeline (token
//! injection, refresh, retry) from the wire. `HttpTransport` is the reqwest
//! implementation; tests substitute scripted transports.
//!
//! A transport reports exactly two outcomes: a response with any status code,
//! or no response at all (`TransportFailure`). Turning either into a typed,
//! retry-aware error is the job of `classify`.

pub mod classify;
pub mod http;

pub use classify::{ClassifiedError, ErrorKind, classify, classify_failure, classify_status};
pub use http::HttpTransport;
pub use reqwest::Method;
pub use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};

use bytes::Bytes;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Header carrying the per-call correlation id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Per-call metadata, created once per logical request and carried across
/// retries and the refresh-driven reissue.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub id: String,
    pub started_at: Instant,
    /// Retries performed by the retry executor (0 on the first attempt).
    pub retry_count: u32,
    /// Set once the request has been reissued after a token refresh. A second
    /// 401 on a marked request is surfaced instead of refreshing again.
    pub retried_after_auth: bool,
}

impl RequestContext {
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            started_at: Instant::now(),
            retry_count: 0,
            retried_after_auth: false,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Upload progress callback, called with the fraction sent in `0.0..=1.0`.
pub type ProgressFn = Arc<dyn Fn(f64) + Send + Sync>;

/// Multipart upload: a `file` part plus flattened text fields.
#[derive(Clone)]
pub struct UploadForm {
    pub file_name: String,
    pub content_type: Option<String>,
    pub contents: Bytes,
    pub fields: Vec<(String, String)>,
    pub progress: Option<ProgressFn>,
}

impl UploadForm {
    pub fn new(file_name: impl Into<String>, contents: impl Into<Bytes>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: None,
            contents: contents.into(),
            fields: Vec::new(),
            progress: None,
        }
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Add a text field sent alongside the file.
    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    pub fn on_progress(mut self, callback: impl Fn(f64) + Send + Sync + 'static) -> Self {
        self.progress = Some(Arc::new(callback));
        self
    }
}

impl fmt::Debug for UploadForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadForm")
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("len", &self.contents.len())
            .field("fields", &self.fields)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// Request payload.
#[derive(Debug, Clone)]
pub enum RequestBody {
    Empty,
    Json(serde_json::Value),
    Multipart(UploadForm),
}

/// A fully described outbound call. Cheap to clone so it can be reissued.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    /// Path relative to the transport's base URL, e.g. `/transactions`.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
    pub body: RequestBody,
    pub context: RequestContext,
}

impl OutboundRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
            context: RequestContext::new(),
        }
    }

    /// Bearer token currently attached, if any.
    pub fn bearer_token(&self) -> Option<&str> {
        self.headers
            .get(reqwest::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
    }
}

/// Any HTTP response, successful or not.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// No response was received: connect error, timeout, broken body.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct TransportFailure {
    pub message: String,
    pub timed_out: bool,
}

impl TransportFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timed_out: false,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timed_out: true,
        }
    }
}

/// Outcome of a single dispatch.
pub type TransportResult = std::result::Result<TransportResponse, TransportFailure>;

/// Abstraction over the wire.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn Transport>`).
/// Implementations must return non-2xx statuses as `Ok` responses; only a
/// missing response is an `Err`.
pub trait Transport: Send + Sync {
    fn send<'a>(
        &'a self,
        request: &'a OutboundRequest,
    ) -> Pin<Box<dyn Future<Output = TransportResult> + Send + 'a>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_contexts_get_unique_ids() {
        let a = RequestContext::new();
        let b = RequestContext::new();
        assert_ne!(a.id, b.id);
        assert_eq!(a.retry_count, 0);
        assert!(!a.retried_after_auth);
    }

    #[test]
    fn elapsed_measures_from_context_creation() {
        let ctx = RequestContext::new();
        std::thread::sleep(Duration::from_millis(5));
        assert!(ctx.elapsed() >= Duration::from_millis(5));
    }

    #[test]
    fn bearer_token_reads_authorization_header() {
        let mut req = OutboundRequest::new(Method::GET, "/budgets");
        assert!(req.bearer_token().is_none());

        req.headers.insert(
            reqwest::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer at_123"),
        );
        assert_eq!(req.bearer_token(), Some("at_123"));
    }

    #[test]
    fn success_range_is_2xx_only() {
        let resp = |status| TransportResponse {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        };
        assert!(resp(200).is_success());
        assert!(resp(204).is_success());
        assert!(!resp(304).is_success());
        assert!(!resp(401).is_success());
    }

    #[test]
    fn upload_form_debug_hides_contents() {
        let form = UploadForm {
            file_name: "statement.pdf".into(),
            content_type: None,
            contents: Bytes::from_static(b"%PDF-1.7 secret"),
            fields: vec![("month".into(), "2026-09".into())],
            progress: None,
        };
        let debug = format!("{form:?}");
        assert!(debug.contains("statement.pdf"));
        assert!(!debug.contains("secret"));
    }
}
