//! Single-flight token refresh
//!
//! When requests fail with 401, exactly one refresh exchange runs no matter
//! how many requests discover the expired token at once. Every such request
//! waits in a FIFO queue; when the exchange settles the whole queue is drained
//! in one critical section.
//!
//! States:
//! - Idle: `in_flight == false`, queue empty
//! - Refreshing: `in_flight == true`, queue grows with each 401
//! - Draining: the exchange settled; queue is released in arrival order and
//!   the coordinator returns to Idle
//!
//! On success the new pair is written to the store and each waiter receives
//! the new access token to reissue its request with. On failure every waiter
//! receives `Error::SessionExpired`, the store is cleared, and
//! `SessionEvent::SessionExpired` is broadcast. The exchange is never retried.
//!
//! The exchange runs in a spawned task, so a caller that stops waiting cannot
//! leave the rest of the queue stranded. A panic inside the exchange (from a
//! transport or store implementation) is caught and treated as a failed
//! refresh.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use common::Secret;
use futures_util::FutureExt;
use session_store::{CredentialStore, REFRESH_TOKEN_PATH, RefreshTokenRequest, parse_token_pair};
use tokio::sync::{Mutex, broadcast, oneshot};
use tracing::{debug, info, warn};
use transport::{
    ClassifiedError, ErrorKind, Method, OutboundRequest, RequestBody, Transport, classify,
};

use crate::error::{Error, Result};

/// Session lifecycle notifications for the surrounding application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    LoggedIn,
    /// A refresh exchange replaced the token pair.
    Refreshed,
    /// The refresh exchange failed and credentials were cleared. The
    /// application should navigate to its unauthenticated entry point.
    SessionExpired { reason: String },
    LoggedOut,
}

/// A request parked until the in-flight refresh settles.
struct QueuedRequest {
    request_id: String,
    waiter: oneshot::Sender<Result<Secret<String>>>,
}

#[derive(Default)]
struct RefreshState {
    in_flight: bool,
    queue: Vec<QueuedRequest>,
}

impl RefreshState {
    /// Park a request. Returns true when the caller must start the exchange.
    fn enqueue(
        &mut self,
        request_id: &str,
        waiter: oneshot::Sender<Result<Secret<String>>>,
    ) -> bool {
        self.queue.push(QueuedRequest {
            request_id: request_id.to_string(),
            waiter,
        });
        if self.in_flight {
            false
        } else {
            self.in_flight = true;
            true
        }
    }

    /// Return to Idle, releasing every parked request in arrival order.
    /// Returns the released request ids.
    fn settle(&mut self, outcome: Result<Secret<String>>) -> Vec<String> {
        self.in_flight = false;
        std::mem::take(&mut self.queue)
            .into_iter()
            .map(|queued| {
                // A waiter that gave up has dropped its receiver
                let _ = queued.waiter.send(outcome.clone());
                queued.request_id
            })
            .collect()
    }
}

struct Inner {
    state: Mutex<RefreshState>,
    store: Arc<dyn CredentialStore>,
    transport: Arc<dyn Transport>,
    events: broadcast::Sender<SessionEvent>,
}

/// Serializes token refresh across all requests sharing a credential store.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        transport: Arc<dyn Transport>,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(RefreshState::default()),
                store,
                transport,
                events,
            }),
        }
    }

    /// Whether an exchange is currently in flight.
    pub async fn is_refreshing(&self) -> bool {
        self.inner.state.lock().await.in_flight
    }

    /// Obtain a fresh access token for a request that was answered with 401.
    ///
    /// `sent_with` is the token the request carried. If the store already
    /// holds a different token, a refresh completed after the request left and
    /// that token is returned without a new exchange. Otherwise the request
    /// joins the queue, starting the exchange if none is in flight.
    pub async fn acquire(
        &self,
        request_id: &str,
        sent_with: Option<&Secret<String>>,
    ) -> Result<Secret<String>> {
        let (tx, rx) = oneshot::channel();

        let start_exchange = {
            let mut state = self.inner.state.lock().await;
            if !state.in_flight
                && let Some(current) = self.inner.store.get().await
                && sent_with != Some(&current.access_token)
            {
                debug!(request_id, "token already refreshed, reissuing without exchange");
                return Ok(current.access_token);
            }
            state.enqueue(request_id, tx)
        };

        if start_exchange {
            debug!(request_id, "starting token refresh");
            let inner = self.inner.clone();
            tokio::spawn(async move {
                if AssertUnwindSafe(inner.run_exchange())
                    .catch_unwind()
                    .await
                    .is_err()
                {
                    inner
                        .end_session(refresh_failure("refresh task panicked", None))
                        .await;
                }
            });
        } else {
            debug!(request_id, "refresh in flight, queued");
        }

        rx.await.unwrap_or_else(|_| {
            Err(Error::SessionExpired(refresh_failure(
                "refresh task ended without a result",
                None,
            )))
        })
    }
}

impl Inner {
    async fn run_exchange(&self) {
        match self.exchange().await {
            Ok(pair) => {
                let token = Secret::new(pair.access_token.clone());
                if let Err(e) = self.store.update_tokens(pair).await {
                    warn!(error = %e, "failed to persist refreshed token");
                }
                metrics::counter!("api_client_token_refresh_total", "outcome" => "success")
                    .increment(1);
                let _ = self.events.send(SessionEvent::Refreshed);
                let released = self.state.lock().await.settle(Ok(token));
                info!(released = released.len(), "token refresh succeeded");
            }
            Err(err) => self.end_session(err).await,
        }
    }

    /// Failure path: clear credentials, announce the expiry, then reject every
    /// queued request. Subscribers see the event before any caller sees its
    /// error.
    async fn end_session(&self, err: ClassifiedError) {
        warn!(kind = %err.kind, status = ?err.http_status, error = %err.message, "token refresh failed, ending session");
        if let Err(e) = self.store.clear().await {
            warn!(error = %e, "failed to clear credentials after refresh failure");
        }
        metrics::counter!("api_client_token_refresh_total", "outcome" => "failure").increment(1);
        let _ = self.events.send(SessionEvent::SessionExpired {
            reason: err.message.clone(),
        });
        let released = self
            .state
            .lock()
            .await
            .settle(Err(Error::SessionExpired(err)));
        debug!(rejected = released.len(), "rejected queued requests");
    }

    /// One `POST /auth/refresh-token` round-trip.
    async fn exchange(&self) -> std::result::Result<session_store::TokenPair, ClassifiedError> {
        let credentials = self
            .store
            .get()
            .await
            .ok_or_else(|| refresh_failure("no refresh token available", None))?;

        let body = serde_json::to_value(RefreshTokenRequest {
            refresh_token: credentials.refresh_token.expose(),
        })
        .map_err(|e| refresh_failure(&format!("encoding refresh request: {e}"), None))?;

        let mut request = OutboundRequest::new(Method::POST, REFRESH_TOKEN_PATH);
        request.body = RequestBody::Json(body);

        let outcome = self.transport.send(&request).await;
        if let Some(err) = classify(&outcome) {
            return Err(err);
        }

        let response = outcome.map_err(|f| refresh_failure(&f.message, None))?;
        parse_token_pair(&response.body)
            .map_err(|e| refresh_failure(&e.to_string(), Some(response.status)))
    }
}

fn refresh_failure(message: &str, http_status: Option<u16>) -> ClassifiedError {
    ClassifiedError {
        kind: ErrorKind::Unauthorized,
        message: message.to_string(),
        http_status,
        retryable: false,
        validation: None,
        code: None,
    }
}
