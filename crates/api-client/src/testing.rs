//! Scripted in-memory backend for pipeline tests

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use session_store::{CredentialStore, Credentials, MemoryCredentialStore, TokenPair};
use transport::{
    HeaderMap, Method, OutboundRequest, RequestBody, Transport, TransportResponse, TransportResult,
};

/// What the backend saw for one dispatch.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: Method,
    pub path: String,
    pub bearer: Option<String>,
    pub request_id: String,
    pub retry_count: u32,
    pub retried_after_auth: bool,
    pub body: RequestBody,
    pub at: tokio::time::Instant,
}

type Handler = dyn Fn(&OutboundRequest) -> TransportResult + Send + Sync;

/// Transport answering from a closure and recording every call.
pub struct ScriptedBackend {
    handler: Box<Handler>,
    latency: Option<Duration>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedBackend {
    pub fn new(
        handler: impl Fn(&OutboundRequest) -> TransportResult + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Box::new(handler),
            latency: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Delay every response, so concurrent requests overlap.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, path: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.path == path)
            .collect()
    }
}

impl Transport for ScriptedBackend {
    fn send<'a>(
        &'a self,
        request: &'a OutboundRequest,
    ) -> Pin<Box<dyn Future<Output = TransportResult> + Send + 'a>> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(RecordedCall {
                method: request.method.clone(),
                path: request.path.clone(),
                bearer: request.bearer_token().map(str::to_string),
                request_id: request.context.id.clone(),
                retry_count: request.context.retry_count,
                retried_after_auth: request.context.retried_after_auth,
                body: request.body.clone(),
                at: tokio::time::Instant::now(),
            });
            if let Some(latency) = self.latency {
                tokio::time::sleep(latency).await;
            }
            (self.handler)(request)
        })
    }
}

pub fn respond(status: u16, body: serde_json::Value) -> TransportResult {
    Ok(TransportResponse {
        status,
        headers: HeaderMap::new(),
        body: Bytes::from(body.to_string()),
    })
}

pub fn token_pair(access: &str, refresh: &str) -> TransportResult {
    respond(
        200,
        serde_json::json!({ "accessToken": access, "refreshToken": refresh }),
    )
}

pub fn logged_in_store(access: &str, refresh: &str) -> Arc<MemoryCredentialStore> {
    Arc::new(MemoryCredentialStore::with_credentials(Credentials::new(
        TokenPair {
            access_token: access.into(),
            refresh_token: refresh.into(),
        },
        Some(serde_json::json!({ "id": 1, "name": "Test User" })),
    )))
}

pub async fn stored_access_token(store: &dyn CredentialStore) -> Option<String> {
    store.get().await.map(|c| c.access_token.expose().clone())
}
