//! Presentation sinks.
//!
//! The sequencer is the only writer. Sinks receive whole fragments and
//! visibility changes; they never see the view model.

use serde::Serialize;
use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

use crate::fragment::{Fragment, Slot};
use crate::logging::{log, obj, v_str, Domain, Level};

pub trait PresentationSink {
    /// Drop everything in the container and show `fragment`.
    fn replace(&self, fragment: Fragment);
    /// Add a fragment after the current content. Stage fragments stay
    /// hidden until [`PresentationSink::mark_visible`].
    fn append(&self, fragment: Fragment);
    /// Swap the fragment occupying `fragment.slot` in place.
    fn update(&self, fragment: Fragment);
    fn mark_visible(&self, slot: Slot);
    fn set_trigger_enabled(&self, enabled: bool);
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SinkOp {
    Replace { fragment: Fragment },
    Append { fragment: Fragment },
    Update { fragment: Fragment },
    MarkVisible { slot: Slot },
    TriggerEnabled { enabled: bool },
}

// =============================================================================
// In-memory sink
// =============================================================================

/// Records every operation with the (tokio) instant it happened.
/// Clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    ops: Arc<Mutex<Vec<(Instant, SinkOp)>>>,
}

/// Container state reconstructed from the op log.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Container {
    pub entries: Vec<(Fragment, bool)>,
    pub trigger_enabled: bool,
}

impl Container {
    pub fn visible(&self) -> impl Iterator<Item = &Fragment> {
        self.entries.iter().filter(|(_, v)| *v).map(|(f, _)| f)
    }

    pub fn get(&self, slot: Slot) -> Option<&Fragment> {
        self.entries.iter().map(|(f, _)| f).find(|f| f.slot == slot)
    }

    pub fn slots(&self) -> Vec<Slot> {
        self.entries.iter().map(|(f, _)| f.slot).collect()
    }
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, op: SinkOp) {
        if let Ok(mut ops) = self.ops.lock() {
            ops.push((Instant::now(), op));
        }
    }

    pub fn ops(&self) -> Vec<SinkOp> {
        self.timed_ops().into_iter().map(|(_, op)| op).collect()
    }

    pub fn timed_ops(&self) -> Vec<(Instant, SinkOp)> {
        self.ops.lock().map(|ops| ops.clone()).unwrap_or_default()
    }

    /// Replay the log into the container it describes.
    pub fn container(&self) -> Container {
        let mut c = Container {
            entries: Vec::new(),
            trigger_enabled: true,
        };
        for op in self.ops() {
            match op {
                SinkOp::Replace { fragment } => {
                    c.entries.clear();
                    c.entries.push((fragment, true));
                }
                SinkOp::Append { fragment } => {
                    let visible = !matches!(fragment.slot, Slot::Stage(_));
                    c.entries.push((fragment, visible));
                }
                SinkOp::Update { fragment } => {
                    if let Some(entry) = c.entries.iter_mut().find(|(f, _)| f.slot == fragment.slot) {
                        entry.0 = fragment;
                    }
                }
                SinkOp::MarkVisible { slot } => {
                    if let Some(entry) = c.entries.iter_mut().find(|(f, _)| f.slot == slot) {
                        entry.1 = true;
                    }
                }
                SinkOp::TriggerEnabled { enabled } => c.trigger_enabled = enabled,
            }
        }
        c
    }
}

impl PresentationSink for RecordingSink {
    fn replace(&self, fragment: Fragment) {
        self.record(SinkOp::Replace { fragment });
    }

    fn append(&self, fragment: Fragment) {
        self.record(SinkOp::Append { fragment });
    }

    fn update(&self, fragment: Fragment) {
        self.record(SinkOp::Update { fragment });
    }

    fn mark_visible(&self, slot: Slot) {
        self.record(SinkOp::MarkVisible { slot });
    }

    fn set_trigger_enabled(&self, enabled: bool) {
        self.record(SinkOp::TriggerEnabled { enabled });
    }
}

// =============================================================================
// Terminal sink
// =============================================================================

/// Plain-text output on stdout. Stage fragments are held back until they
/// are marked visible.
#[derive(Debug, Default)]
pub struct TerminalSink {
    pending: Mutex<HashMap<Slot, Fragment>>,
}

impl TerminalSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn print(&self, fragment: &Fragment) {
        println!("{}", fragment);
    }
}

impl PresentationSink for TerminalSink {
    fn replace(&self, fragment: Fragment) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.clear();
        }
        println!("{}", "-".repeat(60));
        self.print(&fragment);
    }

    fn append(&self, fragment: Fragment) {
        if matches!(fragment.slot, Slot::Stage(_)) {
            if let Ok(mut pending) = self.pending.lock() {
                pending.insert(fragment.slot, fragment);
            }
        } else {
            self.print(&fragment);
        }
    }

    fn update(&self, fragment: Fragment) {
        self.print(&fragment);
    }

    fn mark_visible(&self, slot: Slot) {
        let fragment = self.pending.lock().ok().and_then(|mut p| p.remove(&slot));
        if let Some(fragment) = fragment {
            println!();
            self.print(&fragment);
        }
    }

    fn set_trigger_enabled(&self, enabled: bool) {
        if enabled {
            println!("{}", "-".repeat(60));
        }
    }
}

// =============================================================================
// JSON-lines sink
// =============================================================================

/// Writes each operation as one JSON line. Used for `--json` output and
/// transcripts.
/// Write failures are logged and counted, never propagated to the run.
pub struct JsonlSink<W: Write> {
    out: Mutex<W>,
    failures: AtomicU64,
}

impl<W: Write> JsonlSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
            failures: AtomicU64::new(0),
        }
    }

    /// Operations that could not be written.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    fn write_op(&self, op: &SinkOp) {
        let result = serde_json::to_string(op)
            .map_err(|e| format!("encode: {}", e))
            .and_then(|line| {
                let mut out = self.out.lock().map_err(|_| "writer lock poisoned".to_string())?;
                writeln!(out, "{}", line)
                    .and_then(|_| out.flush())
                    .map_err(|e| format!("write: {}", e))
            });
        if let Err(msg) = result {
            self.failures.fetch_add(1, Ordering::Relaxed);
            log(
                Level::Warn,
                Domain::Sink,
                "sink_write_failed",
                obj(&[("sink", v_str("jsonl")), ("msg", v_str(&msg))]),
            );
        }
    }
}

impl<W: Write> PresentationSink for JsonlSink<W> {
    fn replace(&self, fragment: Fragment) {
        self.write_op(&SinkOp::Replace { fragment });
    }

    fn append(&self, fragment: Fragment) {
        self.write_op(&SinkOp::Append { fragment });
    }

    fn update(&self, fragment: Fragment) {
        self.write_op(&SinkOp::Update { fragment });
    }

    fn mark_visible(&self, slot: Slot) {
        self.write_op(&SinkOp::MarkVisible { slot });
    }

    fn set_trigger_enabled(&self, enabled: bool) {
        self.write_op(&SinkOp::TriggerEnabled { enabled });
    }
}

/// Fans every operation out to several sinks.
pub struct TeeSink {
    sinks: Vec<Box<dyn PresentationSink + Send + Sync>>,
}

impl TeeSink {
    pub fn new(sinks: Vec<Box<dyn PresentationSink + Send + Sync>>) -> Self {
        Self { sinks }
    }
}

impl PresentationSink for TeeSink {
    fn replace(&self, fragment: Fragment) {
        for s in &self.sinks {
            s.replace(fragment.clone());
        }
    }

    fn append(&self, fragment: Fragment) {
        for s in &self.sinks {
            s.append(fragment.clone());
        }
    }

    fn update(&self, fragment: Fragment) {
        for s in &self.sinks {
            s.update(fragment.clone());
        }
    }

    fn mark_visible(&self, slot: Slot) {
        for s in &self.sinks {
            s.mark_visible(slot);
        }
    }

    fn set_trigger_enabled(&self, enabled: bool) {
        for s in &self.sinks {
            s.set_trigger_enabled(enabled);
        }
    }
}
