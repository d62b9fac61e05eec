//! Client configuration for the ward API.
//!
//! Holds the normalized API base URL, the bearer credential supplied by the
//! auth collaborator, and the request timeout applied to every network
//! attempt (the sync path treats a timeout like any other transient
//! failure).

use std::time::Duration;

use crate::error::{Error, Result};
use crate::util::{is_http_url, normalize_text_option};

/// Default bound for a single network request.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Environment variable carrying the API base URL.
pub const ENV_API_URL: &str = "WARD_API_URL";
/// Environment variable carrying the bearer token.
pub const ENV_TOKEN: &str = "WARD_TOKEN";

/// Connection settings for the remote ward API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    base_url: String,
    token: Option<String>,
    request_timeout: Duration,
}

impl ApiConfig {
    /// Create a configuration for the given API base URL.
    ///
    /// The URL must include an `http://` or `https://` scheme; a trailing
    /// slash is stripped.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let base_url = normalize_text_option(Some(base_url.into()))
            .ok_or_else(|| Error::InvalidInput("API base URL must not be empty".to_string()))?;
        if !is_http_url(&base_url) {
            return Err(Error::InvalidInput(
                "API base URL must include http:// or https://".to_string(),
            ));
        }
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        })
    }

    /// Resolve configuration from `WARD_API_URL` / `WARD_TOKEN`.
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var(ENV_API_URL)
            .ok()
            .and_then(|value| normalize_text_option(Some(value)))
            .ok_or_else(|| {
                Error::InvalidInput(format!("{ENV_API_URL} is not set; cannot reach the ward API"))
            })?;
        let mut config = Self::new(base_url)?;
        if let Some(token) = std::env::var(ENV_TOKEN)
            .ok()
            .and_then(|value| normalize_text_option(Some(value)))
        {
            config = config.with_token(token);
        }
        Ok(config)
    }

    /// Attach the bearer credential sent with every request.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = normalize_text_option(Some(token.into()));
        self
    }

    /// Override the per-request timeout.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub const fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Absolute URL for an API path (`path` starts with `/`).
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

impl std::fmt::Display for ApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Token deliberately omitted
        write!(f, "{} (timeout {:?})", self.base_url, self.request_timeout)
    }
}
