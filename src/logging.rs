//! Structured logging for the presentation pipeline.
//!
//! Every record is one JSON object per line:
//! `{ts, session_id, seq, lvl, component, event, msg, run_id?, data}`.
//!
//! Records go to stderr because stdout belongs to the presentation sink.
//! When `LOG_DIR` is set, records are also appended to
//! `<LOG_DIR>/<session_id>/events.jsonl` (info and above) and
//! `trace.jsonl` (trace/debug).

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::Instant;

// =============================================================================
// Log Levels
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    Fatal = 5,
}

impl Level {
    pub fn from_env() -> Self {
        Self::parse(std::env::var("LOG_LEVEL").as_deref().unwrap_or("info"))
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "trace" => Level::Trace,
            "debug" => Level::Debug,
            "warn" => Level::Warn,
            "error" => Level::Error,
            "fatal" => Level::Fatal,
            _ => Level::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Fatal => "fatal",
        }
    }
}

// =============================================================================
// Log Domains (categories for filtering)
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Fetch,     // Backend requests and responses
    Normalize, // Payload normalization, schema gaps
    Render,    // Fragment construction
    Run,       // Run lifecycle, re-entrancy
    Sink,      // Presentation sink writes
    System,    // Startup, shutdown, config
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Fetch => "fetch",
            Domain::Normalize => "normalize",
            Domain::Render => "render",
            Domain::Run => "run",
            Domain::Sink => "sink",
            Domain::System => "system",
        }
    }

    pub fn is_enabled(&self) -> bool {
        // LOG_DOMAINS: comma-separated list or "all"
        match std::env::var("LOG_DOMAINS").as_deref() {
            Ok("all") | Err(_) => true,
            Ok(domains) => domains.split(',').any(|d| d.trim() == self.as_str()),
        }
    }
}

// =============================================================================
// Session context
// =============================================================================

static LOG_SEQ: AtomicU64 = AtomicU64::new(0);
static SESSION: OnceLock<LogSession> = OnceLock::new();

fn next_seq() -> u64 {
    LOG_SEQ.fetch_add(1, Ordering::SeqCst)
}

#[derive(Debug)]
struct LogSession {
    session_id: String,
    files: Option<SessionFiles>,
}

#[derive(Debug)]
struct SessionFiles {
    events: Mutex<BufWriter<File>>,
    trace: Mutex<BufWriter<File>>,
}

fn ensure_session() -> &'static LogSession {
    SESSION.get_or_init(|| {
        let session_id = std::env::var("SESSION_ID")
            .unwrap_or_else(|_| format!("s-{}-{}", ts_epoch_ms(), process::id()));
        let files = std::env::var("LOG_DIR")
            .ok()
            .and_then(|base| open_session_files(PathBuf::from(base).join(&session_id)));
        LogSession { session_id, files }
    })
}

fn open_session_files(dir: PathBuf) -> Option<SessionFiles> {
    if let Err(err) = create_dir_all(&dir) {
        eprintln!("[log] failed to create log dir {}: {}", dir.display(), err);
        return None;
    }
    let open = |name: &str| match File::create(dir.join(name)) {
        Ok(f) => Some(Mutex::new(BufWriter::new(f))),
        Err(err) => {
            eprintln!("[log] failed to create {}: {}", name, err);
            None
        }
    };
    Some(SessionFiles {
        events: open("events.jsonl")?,
        trace: open("trace.jsonl")?,
    })
}

fn sanitize_fields(mut fields: Map<String, Value>) -> Map<String, Value> {
    let redacted = Value::String("[REDACTED]".to_string());
    for key in ["authorization", "Authorization", "api_key", "token", "cookie"] {
        if fields.contains_key(key) {
            fields.insert(key.to_string(), redacted.clone());
        }
    }
    fields
}

fn split_fields(mut fields: Map<String, Value>) -> (Map<String, Value>, Map<String, Value>) {
    let mut top = Map::new();
    for key in ["run_id", "stage", "msg"] {
        if let Some(value) = fields.remove(key) {
            top.insert(key.to_string(), value);
        }
    }
    (top, fields)
}

fn write_line(writer: &Mutex<BufWriter<File>>, line: &str) {
    if let Ok(mut w) = writer.lock() {
        let _ = writeln!(w, "{}", line);
        let _ = w.flush();
    }
}

// =============================================================================
// Core logging functions
// =============================================================================

/// RFC3339 timestamp with milliseconds
pub fn ts_now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Epoch milliseconds
pub fn ts_epoch_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

/// Emit a structured log entry
pub fn log(level: Level, domain: Domain, event: &str, fields: Map<String, Value>) {
    if level < Level::from_env() || !domain.is_enabled() {
        return;
    }
    emit_record(level, domain.as_str(), event, fields);
}

fn build_record(
    session_id: &str,
    level: Level,
    component: &str,
    event: &str,
    fields: Map<String, Value>,
) -> Value {
    let (mut top, data) = split_fields(sanitize_fields(fields));

    let msg = top.remove("msg").unwrap_or(Value::String(String::new()));
    let mut entry = Map::new();
    entry.insert("ts".to_string(), json!(ts_now()));
    entry.insert("session_id".to_string(), json!(session_id));
    entry.insert("seq".to_string(), json!(next_seq()));
    entry.insert("lvl".to_string(), json!(level.as_str().to_uppercase()));
    entry.insert("component".to_string(), json!(component));
    entry.insert("event".to_string(), json!(event));
    entry.insert("msg".to_string(), msg);
    for (k, v) in top {
        entry.insert(k, v);
    }
    entry.insert("data".to_string(), Value::Object(data));
    Value::Object(entry)
}

fn emit_record(level: Level, component: &str, event: &str, fields: Map<String, Value>) {
    let session = ensure_session();
    let line = build_record(&session.session_id, level, component, event, fields).to_string();

    if let Some(files) = &session.files {
        match level {
            Level::Trace | Level::Debug => write_line(&files.trace, &line),
            _ => write_line(&files.events, &line),
        }
    }
    eprintln!("{}", line);
}

// =============================================================================
// Domain-Specific Logging Helpers
// =============================================================================

pub fn log_run_started(run_id: &str, scenario: Option<&str>, symbol: Option<&str>) {
    log(
        Level::Info,
        Domain::Run,
        "run_started",
        obj(&[
            ("run_id", v_str(run_id)),
            ("scenario", scenario.map(v_str).unwrap_or(Value::Null)),
            ("symbol", symbol.map(v_str).unwrap_or(Value::Null)),
        ]),
    );
}

pub fn log_run_finished(run_id: &str, status: &str, elapsed_ms: f64, identity: Option<&str>) {
    log(
        Level::Info,
        Domain::Run,
        "run_finished",
        obj(&[
            ("run_id", v_str(run_id)),
            ("status", v_str(status)),
            ("elapsed_ms", v_num(elapsed_ms)),
            ("identity", identity.map(v_str).unwrap_or(Value::Null)),
        ]),
    );
}

pub fn log_trigger_ignored(live_run_id: &str, live_status: &str) {
    log(
        Level::Debug,
        Domain::Run,
        "trigger_ignored",
        obj(&[
            ("msg", v_str("run already in progress")),
            ("live_run_id", v_str(live_run_id)),
            ("live_status", v_str(live_status)),
        ]),
    );
}

pub fn log_fetch(run_id: &str, outcome: &str, elapsed_ms: f64, detail: Option<&str>) {
    let level = if outcome == "ok" { Level::Info } else { Level::Warn };
    log(
        level,
        Domain::Fetch,
        "fetch_resolved",
        obj(&[
            ("run_id", v_str(run_id)),
            ("outcome", v_str(outcome)),
            ("elapsed_ms", v_num(elapsed_ms)),
            ("detail", detail.map(v_str).unwrap_or(Value::Null)),
        ]),
    );
}

pub fn log_schema_gaps(run_id: &str, payload_digest: &str, defaulted: &[String]) {
    log(
        Level::Debug,
        Domain::Normalize,
        "schema_gaps",
        obj(&[
            ("run_id", v_str(run_id)),
            ("payload_digest", v_str(payload_digest)),
            ("count", json!(defaulted.len())),
            (
                "fields",
                Value::Array(defaulted.iter().map(|f| v_str(f)).collect()),
            ),
        ]),
    );
}

// =============================================================================
// Utility Functions
// =============================================================================

/// Short SHA-256 fingerprint of a payload, for correlating runs without
/// logging the payload itself.
pub fn payload_digest(payload: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload.to_string().as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..16].to_string()
}

pub fn obj(pairs: &[(&str, Value)]) -> Map<String, Value> {
    let mut map = Map::new();
    for (k, v) in pairs {
        map.insert((*k).to_string(), v.clone());
    }
    map
}

pub fn v_str(s: &str) -> Value {
    Value::String(s.to_string())
}

pub fn v_num(n: f64) -> Value {
    json!(n)
}

// =============================================================================
// Profiling Scope
// =============================================================================

/// Emits a trace-level timing record on drop.
pub struct ProfileScope {
    domain: Domain,
    label: &'static str,
    context: Option<Map<String, Value>>,
    started: Instant,
}

impl ProfileScope {
    pub fn new(domain: Domain, label: &'static str) -> Self {
        Self {
            domain,
            label,
            context: None,
            started: Instant::now(),
        }
    }

    pub fn with_context(domain: Domain, label: &'static str, fields: &[(&str, Value)]) -> Self {
        Self {
            domain,
            label,
            context: Some(obj(fields)),
            started: Instant::now(),
        }
    }
}

impl Drop for ProfileScope {
    fn drop(&mut self) {
        let elapsed_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        let mut fields = self.context.take().unwrap_or_default();
        fields.insert("label".to_string(), v_str(self.label));
        fields.insert("elapsed_ms".to_string(), v_num(elapsed_ms));
        log(Level::Trace, self.domain, "profile", fields);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(Level::Trace < Level::Debug);
        assert!(Level::Debug < Level::Info);
        assert!(Level::Info < Level::Warn);
        assert!(Level::Warn < Level::Error);
        assert!(Level::Error < Level::Fatal);
    }

    #[test]
    fn test_level_parse_defaults_to_info() {
        assert_eq!(Level::parse("debug"), Level::Debug);
        assert_eq!(Level::parse("verbose"), Level::Info);
    }

    #[test]
    fn test_payload_digest_deterministic() {
        let a = json!({"signals": {"news_score": 62}});
        let b = json!({"signals": {"news_score": 62}});
        assert_eq!(payload_digest(&a), payload_digest(&b));
        assert_eq!(payload_digest(&a).len(), 16);
    }

    #[test]
    fn test_payload_digest_differs() {
        assert_ne!(
            payload_digest(&json!({"a": 1})),
            payload_digest(&json!({"a": 2}))
        );
    }

    #[test]
    fn test_record_hoists_run_id_and_redacts() {
        let record = build_record(
            "s-test",
            Level::Warn,
            "fetch",
            "fetch_resolved",
            obj(&[
                ("run_id", v_str("r-1-0")),
                ("msg", v_str("hello")),
                ("authorization", v_str("Bearer secret")),
            ]),
        );
        assert_eq!(record["run_id"], "r-1-0");
        assert_eq!(record["msg"], "hello");
        assert_eq!(record["lvl"], "WARN");
        assert_eq!(record["data"]["authorization"], "[REDACTED]");
        assert!(record["data"].get("run_id").is_none());
    }

    #[test]
    fn test_obj_helper() {
        let m = obj(&[("key", v_str("value")), ("num", v_num(42.0))]);
        assert_eq!(m.get("key").unwrap(), "value");
        assert_eq!(m.get("num").unwrap(), 42.0);
    }

    #[test]
    fn test_seq_increments() {
        let s1 = next_seq();
        let s2 = next_seq();
        assert!(s2 > s1);
    }
}
