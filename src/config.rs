use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use url::Url;

pub const DEFAULT_BACKEND_URL: &str = "http://localhost:5000";

#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the analysis backend; the run endpoint is `{base}/run`.
    pub backend_url: String,
    /// Optional client-side timeout for backend calls. `None` leaves a hung
    /// request pending, which keeps the trigger disabled.
    pub request_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            request_timeout: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            backend_url: std::env::var("BACKEND_URL")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string()),
            ..Self::default()
        }
    }

    pub fn with_backend_url(mut self, url: impl Into<String>) -> Self {
        self.backend_url = url.into();
        self
    }

    /// Parse and validate the configured base URL.
    pub fn base_url(&self) -> Result<Url> {
        let url = Url::parse(self.backend_url.trim())
            .with_context(|| format!("invalid backend url: {}", self.backend_url))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(anyhow!("unsupported backend url scheme: {}", other)),
        }
    }
}
