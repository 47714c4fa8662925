//! Outbound request stamping
//!
//! Every call gets a fresh `RequestContext` and `x-request-id` header, and the
//! current access token as `Authorization: Bearer <token>`. Missing credentials
//! are not an error here: the request goes out unauthenticated and the
//! backend's 401 is handled by the refresh coordinator.

use std::sync::Arc;

use common::Secret;
use session_store::CredentialStore;
use tracing::warn;
use transport::{
    AUTHORIZATION, HeaderName, HeaderValue, OutboundRequest, REQUEST_ID_HEADER, RequestContext,
};

#[derive(Clone)]
pub struct Interceptor {
    store: Arc<dyn CredentialStore>,
}

impl Interceptor {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    /// Stamp a fresh context and correlation header onto a new call.
    pub fn intercept(&self, mut request: OutboundRequest) -> OutboundRequest {
        request.context = RequestContext::new();
        if let Ok(value) = HeaderValue::from_str(&request.context.id) {
            request
                .headers
                .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
        }
        request
    }

    /// Attach the stored access token. Returns the token attached, if any.
    pub async fn authorize(&self, request: &mut OutboundRequest) -> Option<Secret<String>> {
        match self.store.get().await {
            Some(credentials) => {
                attach_token(request, &credentials.access_token);
                Some(credentials.access_token)
            }
            None => {
                request.headers.remove(AUTHORIZATION);
                None
            }
        }
    }
}

/// Set `Authorization: Bearer <token>`, replacing any previous value.
pub fn attach_token(request: &mut OutboundRequest, token: &Secret<String>) {
    match HeaderValue::from_str(&format!("Bearer {}", token.expose())) {
        Ok(mut value) => {
            value.set_sensitive(true);
            request.headers.insert(AUTHORIZATION, value);
        }
        Err(e) => {
            warn!(request_id = %request.context.id, error = %e, "access token is not a valid header value, sending unauthenticated");
            request.headers.remove(AUTHORIZATION);
        }
    }
}
