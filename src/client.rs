use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::config::Config;

/// Scenario ids the backend knows how to force.
pub const KNOWN_SCENARIOS: &[&str] = &[
    "crash_reflex",
    "concentration_guard",
    "disciplined_observer",
    "dead_capital",
    "greedy_trap",
];

/// Query parameters for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunRequest {
    pub scenario: Option<String>,
    pub symbol: Option<String>,
}

impl RunRequest {
    /// `NORMAL` and blank scenarios mean the backend's default inputs.
    pub fn new(scenario: Option<&str>, symbol: Option<&str>) -> Self {
        let clean = |v: Option<&str>| v.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);
        Self {
            scenario: clean(scenario).filter(|s| !s.eq_ignore_ascii_case("NORMAL")),
            symbol: clean(symbol),
        }
    }

    pub fn is_known_scenario(&self) -> bool {
        match &self.scenario {
            Some(s) => KNOWN_SCENARIOS.contains(&s.as_str()),
            None => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Health {
    pub status: String,
    #[serde(default)]
    pub service: Option<String>,
}

// =============================================================================
// Failure taxonomy
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    TransportFailure,
    PayloadErrorMarker,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Backend unreachable or the connection broke.
    Transport(String),
    /// Non-2xx status. `message` is the body's error text when it had one.
    Status { code: u16, message: Option<String> },
    /// 2xx but the body was not JSON.
    InvalidBody(String),
    /// Well-formed JSON that reports an upstream failure.
    ErrorMarker(String),
}

impl FetchError {
    pub fn kind(&self) -> FailureKind {
        match self {
            FetchError::ErrorMarker(_) => FailureKind::PayloadErrorMarker,
            _ => FailureKind::TransportFailure,
        }
    }

    /// Short tag for logs.
    pub fn tag(&self) -> &'static str {
        match self {
            FetchError::Transport(_) => "transport",
            FetchError::Status { .. } => "status",
            FetchError::InvalidBody(_) => "invalid_body",
            FetchError::ErrorMarker(_) => "error_marker",
        }
    }

    /// Plain-text message for the operator.
    pub fn operator_message(&self) -> String {
        match self {
            FetchError::Transport(detail) => format!("Backend unreachable: {}", detail),
            FetchError::Status {
                code,
                message: Some(m),
            } => format!("Backend returned HTTP {}: {}", code, m),
            FetchError::Status { code, message: None } => {
                format!("Backend returned HTTP {}", code)
            }
            FetchError::InvalidBody(detail) => {
                format!("Backend sent an unreadable response: {}", detail)
            }
            FetchError::ErrorMarker(m) => format!("Backend reported a failure: {}", m),
        }
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.operator_message())
    }
}

impl std::error::Error for FetchError {}

/// Detect a payload that reports its own failure: an `error` key carrying
/// something, or `status == "FAILED"`. `null`, `false`, `0` and blank
/// strings under `error` mean no error.
pub fn error_marker(payload: &Value) -> Option<String> {
    let obj = payload.as_object()?;
    let marker = match obj.get("error") {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Bool(true)) => Some("unspecified error".to_string()),
        Some(Value::Number(n)) if n.as_f64() != Some(0.0) => Some(format!("error code {}", n)),
        Some(err @ Value::Object(inner)) => Some(
            inner
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| err.to_string()),
        ),
        Some(err @ Value::Array(items)) if !items.is_empty() => Some(err.to_string()),
        _ => None,
    };
    if marker.is_some() {
        return marker;
    }
    match obj.get("status").and_then(Value::as_str) {
        Some(s) if s.eq_ignore_ascii_case("FAILED") => Some("status FAILED".to_string()),
        _ => None,
    }
}

/// Reject payloads carrying an error marker.
pub fn check_payload(payload: Value) -> Result<Value, FetchError> {
    match error_marker(&payload) {
        Some(message) => Err(FetchError::ErrorMarker(message)),
        None => Ok(payload),
    }
}

// =============================================================================
// Backend collaborator
// =============================================================================

#[async_trait]
pub trait Backend {
    /// `GET {base}/run`. Returns the raw JSON body; error-marker
    /// classification happens in the sequencer.
    async fn fetch_run(&self, request: &RunRequest) -> Result<Value, FetchError>;
    async fn health(&self) -> Result<Health, FetchError>;
}

pub struct HttpBackend {
    client: Client,
    base: Url,
}

impl HttpBackend {
    pub fn new(cfg: &Config) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = cfg.request_timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
            base: cfg.base_url()?,
        })
    }

    pub fn run_url(&self, request: &RunRequest) -> Url {
        let mut url = endpoint(&self.base, "run");
        let pairs: Vec<(&str, &str)> = [
            ("scenario", request.scenario.as_deref()),
            ("symbol", request.symbol.as_deref()),
        ]
        .into_iter()
        .filter_map(|(k, v)| v.map(|v| (k, v)))
        .collect();
        if !pairs.is_empty() {
            url.query_pairs_mut().extend_pairs(pairs);
        }
        url
    }

    async fn get_json(&self, url: Url) -> Result<Value, FetchError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        if !status.is_success() {
            let message = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| error_marker(&v));
            return Err(FetchError::Status {
                code: status.as_u16(),
                message,
            });
        }
        serde_json::from_str(&body).map_err(|e| FetchError::InvalidBody(e.to_string()))
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn fetch_run(&self, request: &RunRequest) -> Result<Value, FetchError> {
        self.get_json(self.run_url(request)).await
    }

    async fn health(&self) -> Result<Health, FetchError> {
        let body = self.get_json(endpoint(&self.base, "health")).await?;
        serde_json::from_value(body).map_err(|e| FetchError::InvalidBody(e.to_string()))
    }
}

/// Append one path segment to the base, keeping any base path.
fn endpoint(base: &Url, segment: &str) -> Url {
    let mut url = base.clone();
    url.set_query(None);
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.pop_if_empty().push(segment);
    }
    url
}
