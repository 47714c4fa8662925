//! Authenticated HTTP client for the finance backend
//!
//! Composes the request pipeline every API call goes through:
//!
//! 1. `Interceptor` stamps a fresh `RequestContext` and the current bearer token
//! 2. `RetryExecutor` dispatches, classifying failures and backing off on
//!    retryable ones (network, 429, 5xx)
//! 3. On 401, `RefreshCoordinator` runs a single refresh exchange shared by
//!    every request that hit the same expired token, then each request is
//!    reissued once with the new token
//! 4. A failed refresh clears the credential store and broadcasts
//!    `SessionEvent::SessionExpired`; the application should return to its
//!    unauthenticated entry point
//!
//! The coordinator and store are explicitly constructed and injected into
//! `ApiClient`; there is no process-wide state.

pub mod client;
pub mod error;
pub mod interceptor;
pub mod refresh;
pub mod retry;

#[cfg(test)]
mod testing;

pub use client::{ApiClient, ClientConfig};
pub use error::{Error, Result};
pub use interceptor::Interceptor;
pub use refresh::{RefreshCoordinator, SessionEvent};
pub use retry::{RetryConfig, RetryExecutor};
pub use transport::{ClassifiedError, ErrorKind, UploadForm};
