//! Well-known storage keys and auth endpoint paths
//!
//! Paths are relative to the configured API base URL.

/// Persisted key for the short-lived bearer token
pub const ACCESS_TOKEN_KEY: &str = "accessToken";

/// Persisted key for the refresh token
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";

/// Persisted key for the cached user profile
pub const PROFILE_KEY: &str = "user";

/// Refresh-token exchange endpoint
pub const REFRESH_TOKEN_PATH: &str = "/auth/refresh-token";

/// Email/password login endpoint
pub const LOGIN_PATH: &str = "/auth/login";

/// Server-side session invalidation endpoint
pub const LOGOUT_PATH: &str = "/auth/logout";
