//! HTTP facade for the finance API
//!
//! `ApiClient` is the only entry point feature code uses. Each verb runs the
//! full pipeline: intercept, authorize, retry, refresh on 401 and reissue
//! once, then decode. Responses in the backend's `{success, data}` envelope
//! are unwrapped to `data` before decoding.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use session_store::{
    CredentialStore, Credentials, LOGIN_PATH, LOGOUT_PATH, LoginRequest, parse_login,
};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use transport::{
    ClassifiedError, HttpTransport, Method, OutboundRequest, RequestBody, Transport,
    TransportResponse, UploadForm, classify, classify_failure,
};

use crate::error::{Error, Result};
use crate::interceptor::{Interceptor, attach_token};
use crate::refresh::{RefreshCoordinator, SessionEvent};
use crate::retry::{RetryConfig, RetryExecutor};

/// Capacity of the session event channel. Slow subscribers lag, they never
/// block the pipeline.
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Settings for an `ApiClient` backed by `HttpTransport`.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    /// Applied to every request; expiry surfaces as a `Network` error.
    pub timeout: Duration,
    pub retry: RetryConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000/api".to_string(),
            timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
        }
    }
}

/// Authenticated client. Cheap to clone; clones share the refresh coordinator,
/// so concurrent calls from any clone single-flight their refresh.
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    store: Arc<dyn CredentialStore>,
    interceptor: Interceptor,
    retry: RetryExecutor,
    refresh: RefreshCoordinator,
    events: broadcast::Sender<SessionEvent>,
}

impl ApiClient {
    pub fn new(transport: Arc<dyn Transport>, store: Arc<dyn CredentialStore>) -> Self {
        Self::with_retry(transport, store, RetryConfig::default())
    }

    pub fn with_retry(
        transport: Arc<dyn Transport>,
        store: Arc<dyn CredentialStore>,
        retry: RetryConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let refresh = RefreshCoordinator::new(store.clone(), transport.clone(), events.clone());
        Self {
            interceptor: Interceptor::new(store.clone()),
            retry: RetryExecutor::new(retry),
            transport,
            store,
            refresh,
            events,
        }
    }

    /// Build a client talking HTTP to `config.base_url`.
    pub fn from_config(config: &ClientConfig, store: Arc<dyn CredentialStore>) -> Result<Self> {
        let transport = HttpTransport::new(&config.base_url, config.timeout)
            .map_err(|e| Error::InvalidRequest(e.message))?;
        Ok(Self::with_retry(
            Arc::new(transport),
            store,
            config.retry.clone(),
        ))
    }

    /// Session lifecycle notifications (login, refresh, expiry, logout).
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.execute(OutboundRequest::new(Method::GET, path)).await
    }

    pub async fn get_with_query<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        let mut request = OutboundRequest::new(Method::GET, path);
        request.query = query
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.execute(request).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.execute(with_json(Method::POST, path, body)?).await
    }

    pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.execute(with_json(Method::PUT, path, body)?).await
    }

    pub async fn patch<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.execute(with_json(Method::PATCH, path, body)?).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.execute(OutboundRequest::new(Method::DELETE, path)).await
    }

    /// Multipart upload: the file as part `file` plus the form's text fields.
    /// Progress, if requested on the form, is reported per chunk sent.
    pub async fn upload_file<T: DeserializeOwned>(
        &self,
        path: &str,
        form: UploadForm,
    ) -> Result<T> {
        let mut request = OutboundRequest::new(Method::POST, path);
        request.body = RequestBody::Multipart(form);
        self.execute(request).await
    }

    /// Run a prepared request through the full pipeline and decode the body.
    pub async fn execute<T: DeserializeOwned>(&self, request: OutboundRequest) -> Result<T> {
        let request = self.interceptor.intercept(request);
        let method = request.method.clone();
        let context = request.context.clone();
        let outcome = self.run_pipeline(request).await;

        let label = match &outcome {
            Ok(_) => "success",
            Err(e) if e.is_session_expired() => "session_expired",
            Err(_) => "error",
        };
        metrics::counter!("api_client_requests_total", "method" => method.to_string(), "outcome" => label)
            .increment(1);
        debug!(
            request_id = %context.id,
            method = %method,
            outcome = label,
            elapsed_ms = context.elapsed().as_millis() as u64,
            "request finished"
        );

        decode(&outcome?.body)
    }

    async fn run_pipeline(&self, mut request: OutboundRequest) -> Result<TransportResponse> {
        let sent_with = self.interceptor.authorize(&mut request).await;

        match self.dispatch_with_retry(&request).await {
            Err(err) if err.is_unauthorized() && !request.context.retried_after_auth => {
                debug!(request_id = %request.context.id, path = %request.path, "unauthorized, awaiting token refresh");
                let token = self
                    .refresh
                    .acquire(&request.context.id, sent_with.as_ref())
                    .await?;

                request.context.retried_after_auth = true;
                attach_token(&mut request, &token);
                debug!(request_id = %request.context.id, "reissuing with refreshed token");
                // A second 401 is surfaced as-is
                Ok(self.dispatch_with_retry(&request).await?)
            }
            outcome => Ok(outcome?),
        }
    }

    /// One logical attempt sequence: dispatch and classify, backing off on
    /// retryable failures.
    async fn dispatch_with_retry(
        &self,
        request: &OutboundRequest,
    ) -> std::result::Result<TransportResponse, ClassifiedError> {
        self.retry
            .run(&request.context.id, |attempt| {
                let mut attempt_request = request.clone();
                attempt_request.context.retry_count = attempt;
                async move {
                    let outcome = self.transport.send(&attempt_request).await;
                    if let Some(err) = classify(&outcome) {
                        debug!(
                            request_id = %attempt_request.context.id,
                            attempt,
                            kind = %err.kind,
                            status = ?err.http_status,
                            "attempt failed"
                        );
                        return Err(err);
                    }
                    outcome.map_err(|f| classify_failure(&f))
                }
            })
            .await
    }

    /// Exchange email and password for a session. Stores the token pair and
    /// the returned profile, which is also returned to the caller.
    ///
    /// A rejected login is reported as `Unauthorized`; it never triggers a
    /// refresh.
    pub async fn login(&self, email: &str, password: &str) -> Result<Option<Value>> {
        let request = self
            .interceptor
            .intercept(with_json(Method::POST, LOGIN_PATH, &LoginRequest { email, password })?);

        let response = self.dispatch_with_retry(&request).await?;
        let (tokens, profile) = parse_login(&response.body)
            .map_err(|e| Error::Decode(e.to_string()))?
            .into_parts();

        self.store
            .set(Credentials::new(tokens, profile.clone()))
            .await?;
        info!(request_id = %request.context.id, "logged in");
        let _ = self.events.send(SessionEvent::LoggedIn);
        Ok(profile)
    }

    /// End the session. The backend is told once, best-effort; credentials are
    /// cleared whatever it answers.
    pub async fn logout(&self) -> Result<()> {
        if self.store.get().await.is_some() {
            let mut request = self
                .interceptor
                .intercept(OutboundRequest::new(Method::POST, LOGOUT_PATH));
            self.interceptor.authorize(&mut request).await;

            if let Some(err) = classify(&self.transport.send(&request).await) {
                warn!(request_id = %request.context.id, error = %err, "logout request failed, clearing session anyway");
            }
        }

        self.store.clear().await?;
        info!("logged out");
        let _ = self.events.send(SessionEvent::LoggedOut);
        Ok(())
    }

    /// The user profile cached at login.
    pub async fn profile(&self) -> Option<Value> {
        self.store.get().await.and_then(|c| c.profile)
    }

    pub async fn is_authenticated(&self) -> bool {
        self.store.get().await.is_some()
    }
}

fn with_json<B: Serialize + ?Sized>(method: Method, path: &str, body: &B) -> Result<OutboundRequest> {
    let value = serde_json::to_value(body)
        .map_err(|e| Error::InvalidRequest(format!("encoding request body: {e}")))?;
    let mut request = OutboundRequest::new(method, path);
    request.body = RequestBody::Json(value);
    Ok(request)
}

/// Decode a 2xx body. A backend envelope (an object with a boolean `success`
/// and a `data` key) is unwrapped to `data`; anything else decodes whole. An
/// empty body decodes as `null`.
fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    let value: Value = if body.iter().all(u8::is_ascii_whitespace) {
        Value::Null
    } else {
        serde_json::from_slice(body).map_err(|e| Error::Decode(e.to_string()))?
    };

    let payload = match value {
        Value::Object(mut map)
            if map.get("success").is_some_and(Value::is_boolean) && map.contains_key("data") =>
        {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    };

    serde_json::from_value(payload).map_err(|e| Error::Decode(e.to_string()))
}
