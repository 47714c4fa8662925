//! Wire types for the login and refresh-token endpoints
//!
//! The backend answers either with the bare payload or wrapped in its
//! standard envelope (`{"success": true, "data": {...}}`). Both shapes are
//! accepted; an empty token in either position is rejected so a half-filled
//! pair can never reach the store.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Body of `POST /auth/refresh-token`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenRequest<'a> {
    pub refresh_token: &'a str,
}

/// Body of `POST /auth/login`.
#[derive(Debug, Serialize)]
pub struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

/// Access/refresh pair returned by a successful refresh exchange.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Login response: a token pair plus the user profile to cache.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default, alias = "profile")]
    pub user: Option<serde_json::Value>,
}

impl LoginResponse {
    /// Split into the token pair and the cached profile.
    pub fn into_parts(self) -> (TokenPair, Option<serde_json::Value>) {
        (
            TokenPair {
                access_token: self.access_token,
                refresh_token: self.refresh_token,
            },
            self.user,
        )
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Envelope<T> {
    Wrapped { data: T },
    Bare(T),
}

impl<T> Envelope<T> {
    fn into_inner(self) -> T {
        match self {
            Envelope::Wrapped { data } => data,
            Envelope::Bare(inner) => inner,
        }
    }
}

fn parse_enveloped<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    serde_json::from_slice::<Envelope<T>>(body)
        .map(Envelope::into_inner)
        .map_err(|e| Error::TokenResponse(format!("unrecognized payload: {e}")))
}

fn check_tokens(access: &str, refresh: &str) -> Result<()> {
    if access.is_empty() || refresh.is_empty() {
        return Err(Error::TokenResponse(
            "access token and refresh token must both be present".into(),
        ));
    }
    Ok(())
}

/// Parse a refresh-token exchange response body.
pub fn parse_token_pair(body: &[u8]) -> Result<TokenPair> {
    let pair: TokenPair = parse_enveloped(body)?;
    check_tokens(&pair.access_token, &pair.refresh_token)?;
    Ok(pair)
}

/// Parse a login response body.
pub fn parse_login(body: &[u8]) -> Result<LoginResponse> {
    let login: LoginResponse = parse_enveloped(body)?;
    check_tokens(&login.access_token, &login.refresh_token)?;
    Ok(login)
}
