//! Error types for credential storage and token payloads

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("credential parse error: {0}")]
    CredentialParse(String),

    #[error("invalid token response: {0}")]
    TokenResponse(String),
}

/// Result alias for session store operations.
pub type Result<T> = std::result::Result<T, Error>;
