//! Session credential storage for the finance API client
//!
//! Holds the access token, refresh token and cached user profile behind the
//! `CredentialStore` trait. The store is a dumb persistent map: it never
//! validates token shape and never signals the application on `clear()`;
//! the client broadcasts session events after clearing.
//!
//! Credential lifecycle:
//! 1. Login response stored via `CredentialStore::set()`
//! 2. Every outgoing request reads the access token via `CredentialStore::get()`
//! 3. Refresh success replaces both tokens via `CredentialStore::update_tokens()`
//! 4. Logout or refresh failure wipes all three keys via `CredentialStore::clear()`

pub mod constants;
pub mod credentials;
pub mod error;
pub mod token;

pub use constants::*;
pub use credentials::{
    CredentialStore, Credentials, FileCredentialStore, MemoryCredentialStore, StoreFuture,
};
pub use error::{Error, Result};
pub use token::{
    LoginRequest, LoginResponse, RefreshTokenRequest, TokenPair, parse_login, parse_token_pair,
};
