//! reqwest-backed transport
//!
//! Joins request paths onto the configured base URL, applies a fixed
//! per-request timeout, and encodes JSON or multipart bodies. Uploads are
//! streamed in chunks so progress can be reported as the body is consumed.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use reqwest::multipart::{Form, Part};
use tracing::{debug, warn};

use crate::{
    OutboundRequest, RequestBody, Transport, TransportFailure, TransportResponse, TransportResult,
    UploadForm,
};

/// Chunk size for streamed upload bodies.
const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// HTTP transport for the finance API.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    /// Build a transport rooted at `base_url` with a fixed per-request timeout.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TransportFailure> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| TransportFailure::new(format!("building HTTP client: {e}")))?;
        Ok(Self::with_client(client, base_url))
    }

    /// Wrap an existing reqwest client.
    pub fn with_client(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    async fn dispatch(&self, request: &OutboundRequest) -> TransportResult {
        let url = self.url_for(&request.path);
        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .headers(request.headers.clone());

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }

        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(value),
            RequestBody::Multipart(upload) => builder.multipart(multipart_form(upload)?),
        };

        debug!(
            request_id = %request.context.id,
            method = %request.method,
            url = %url,
            "dispatching request"
        );

        let response = builder.send().await.map_err(failure_from)?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(|e| {
            warn!(request_id = %request.context.id, error = %e, "failed to read response body");
            failure_from(e)
        })?;

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}

impl Transport for HttpTransport {
    fn send<'a>(
        &'a self,
        request: &'a OutboundRequest,
    ) -> Pin<Box<dyn Future<Output = TransportResult> + Send + 'a>> {
        Box::pin(self.dispatch(request))
    }
}

fn failure_from(error: reqwest::Error) -> TransportFailure {
    if error.is_timeout() {
        TransportFailure::timeout(error.to_string())
    } else {
        TransportFailure::new(error.to_string())
    }
}

/// Build the multipart form: text fields first, then the `file` part.
fn multipart_form(upload: &UploadForm) -> Result<Form, TransportFailure> {
    let mut form = Form::new();
    for (name, value) in &upload.fields {
        form = form.text(name.clone(), value.clone());
    }

    let total = upload.contents.len() as u64;
    let chunks: Vec<Bytes> = (0..upload.contents.len())
        .step_by(UPLOAD_CHUNK_SIZE)
        .map(|start| {
            let end = (start + UPLOAD_CHUNK_SIZE).min(upload.contents.len());
            upload.contents.slice(start..end)
        })
        .collect();

    let progress = upload.progress.clone();
    if total == 0
        && let Some(report) = &progress
    {
        report(1.0);
    }

    let mut sent: u64 = 0;
    let stream = futures_util::stream::iter(chunks).map(move |chunk| {
        sent += chunk.len() as u64;
        if let Some(report) = &progress {
            report(sent as f64 / total as f64);
        }
        Ok::<Bytes, std::io::Error>(chunk)
    });

    let mut part = Part::stream_with_length(reqwest::Body::wrap_stream(stream), total)
        .file_name(upload.file_name.clone());
    if let Some(content_type) = &upload.content_type {
        part = part
            .mime_str(content_type)
            .map_err(|e| TransportFailure::new(format!("invalid content type: {e}")))?;
    }

    Ok(form.part("file", part))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{HeaderValue, Method};
    use std::sync::{Arc, Mutex};

    fn transport(url: &str) -> HttpTransport {
        HttpTransport::new(url, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn joins_paths_without_double_slash() {
        let t = transport("https://api.example.com/v1/");
        assert_eq!(t.base_url(), "https://api.example.com/v1");
        assert_eq!(t.url_for("/budgets"), "https://api.example.com/v1/budgets");
        assert_eq!(t.url_for("budgets"), "https://api.example.com/v1/budgets");
    }

    #[tokio::test]
    async fn sends_headers_and_returns_error_statuses_as_responses() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/transactions")
            .match_header("authorization", "Bearer at_1")
            .with_status(401)
            .with_body(r#"{"success":false,"message":"jwt expired"}"#)
            .create_async()
            .await;

        let mut request = OutboundRequest::new(Method::GET, "/transactions");
        request.headers.insert(
            reqwest::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer at_1"),
        );

        let response = transport(&server.url()).send(&request).await.unwrap();
        assert_eq!(response.status, 401);
        assert!(String::from_utf8_lossy(&response.body).contains("jwt expired"));
    }

    #[tokio::test]
    async fn encodes_query_and_json_body() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/expenses")
            .match_query(mockito::Matcher::UrlEncoded("month".into(), "2026-10".into()))
            .match_body(mockito::Matcher::Json(serde_json::json!({"amount": 42})))
            .with_status(201)
            .with_body(r#"{"id":1}"#)
            .create_async()
            .await;

        let mut request = OutboundRequest::new(Method::POST, "/expenses");
        request.query.push(("month".into(), "2026-10".into()));
        request.body = RequestBody::Json(serde_json::json!({"amount": 42}));

        let response = transport(&server.url()).send(&request).await.unwrap();
        assert_eq!(response.status, 201);
        assert_eq!(&response.body[..], br#"{"id":1}"#);
    }

    #[tokio::test]
    async fn uploads_multipart_and_reports_progress() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/receipts")
            .match_body(mockito::Matcher::AllOf(vec![
                mockito::Matcher::Regex(r#"name="file"; filename="receipt.csv""#.into()),
                mockito::Matcher::Regex(r#"name="expenseId""#.into()),
            ]))
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let seen = Arc::new(Mutex::new(Vec::<f64>::new()));
        let sink = seen.clone();
        let contents = vec![b'x'; UPLOAD_CHUNK_SIZE * 2 + 10];

        let mut request = OutboundRequest::new(Method::POST, "/receipts");
        request.body = RequestBody::Multipart(UploadForm {
            file_name: "receipt.csv".into(),
            content_type: Some("text/csv".into()),
            contents: Bytes::from(contents),
            fields: vec![("expenseId".into(), "17".into())],
            progress: Some(Arc::new(move |fraction| sink.lock().unwrap().push(fraction))),
        });

        let response = transport(&server.url()).send(&request).await.unwrap();
        assert_eq!(response.status, 200);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3, "one report per chunk, got {seen:?}");
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(*seen.last().unwrap(), 1.0);
    }

    #[tokio::test]
    async fn unreachable_host_is_a_failure_not_a_response() {
        // Port 1 on loopback refuses connections
        let request = OutboundRequest::new(Method::GET, "/health");
        let result = transport("http://127.0.0.1:1").send(&request).await;
        let failure = result.unwrap_err();
        assert!(!failure.timed_out);
    }

    #[test]
    fn rejects_invalid_content_type() {
        let upload = UploadForm {
            file_name: "a.bin".into(),
            content_type: Some("not a mime".into()),
            contents: Bytes::from_static(b"abc"),
            fields: vec![],
            progress: None,
        };
        assert!(multipart_form(&upload).is_err());
    }
}
