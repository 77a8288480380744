//! Run orchestration: fetch ⨝ thinking → reveal, or → error.
//!
//! One run is live at a time. A trigger while a run is live is ignored;
//! there is no queue and no cancellation. The fetch and the thinking
//! sequence are joined, so the reveal starts after the slower of the two.

use std::fmt;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::time::{sleep, Instant};

use crate::client::{check_payload, Backend, FetchError, RunRequest};
use crate::error_view::render_error;
use crate::fragment::{Slot, Stage, StepPhase};
use crate::logging::{
    log, log_fetch, log_run_finished, log_run_started, log_schema_gaps, log_trigger_ignored, obj,
    payload_digest, ts_epoch_ms, v_num, v_str, Domain, Level, ProfileScope,
};
use crate::normalize::{normalize_with_report, Normalized};
use crate::render::{render_header, render_posture, render_stage, DecisionExpansion};
use crate::sink::PresentationSink;
use crate::thinking::{thinking_panel, Timing};
use crate::view::Posture;

// =============================================================================
// Run context state machine
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Idle,
    /// Waiting on the backend; the thinking sequence may still be running.
    Fetching,
    /// Backend answered; holding for the thinking floor.
    Animating,
    Revealing,
    Done,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Done | RunStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Idle => "IDLE",
            RunStatus::Fetching => "FETCHING",
            RunStatus::Animating => "ANIMATING",
            RunStatus::Revealing => "REVEALING",
            RunStatus::Done => "DONE",
            RunStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionError {
    pub from: RunStatus,
    pub to: RunStatus,
}

impl fmt::Display for TransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid run transition {} -> {}", self.from, self.to)
    }
}

impl std::error::Error for TransitionError {}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunContext {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub status: RunStatus,
}

impl RunContext {
    pub fn new(run_id: String, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            started_at,
            status: RunStatus::Idle,
        }
    }

    pub fn advance(&mut self, next: RunStatus) -> Result<(), TransitionError> {
        use RunStatus::*;
        let allowed = match (self.status, next) {
            (from, to) if from == to => true,
            (Idle, Fetching) => true,
            (Fetching, Animating) | (Fetching, Revealing) | (Fetching, Failed) => true,
            (Animating, Revealing) | (Animating, Failed) => true,
            (Revealing, Done) => true,
            _ => false,
        };
        if !allowed {
            return Err(TransitionError {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}

/// Human-distinguishable run identity: `RUN-<YYYYmmdd-HHMMSS>-<LABEL>`.
pub fn run_identity(now: DateTime<Utc>, posture_label: &str) -> String {
    let label: String = posture_label
        .trim()
        .to_uppercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    let label = if label.is_empty() { "NEUTRAL".to_string() } else { label };
    format!("RUN-{}-{}", now.format("%Y%m%d-%H%M%S"), label)
}

// =============================================================================
// Outcomes
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Revealed { identity: String },
    Failed(FetchError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub context: RunContext,
    pub outcome: RunOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TriggerOutcome {
    Completed(RunReport),
    Ignored { live_run_id: String },
}

impl TriggerOutcome {
    pub fn is_ignored(&self) -> bool {
        matches!(self, TriggerOutcome::Ignored { .. })
    }

    pub fn report(&self) -> Option<&RunReport> {
        match self {
            TriggerOutcome::Completed(r) => Some(r),
            TriggerOutcome::Ignored { .. } => None,
        }
    }
}

// =============================================================================
// Sequencer
// =============================================================================

#[derive(Debug)]
struct DisplayedRun {
    identity: String,
    posture: Posture,
    expansion: DecisionExpansion,
}

#[derive(Debug, Default)]
struct SequencerState {
    live: Option<RunContext>,
    last: Option<RunContext>,
    displayed: Option<DisplayedRun>,
    fetch_done: bool,
    thinking_done: bool,
    runs_started: u64,
}

pub struct RunSequencer {
    backend: Box<dyn Backend + Send + Sync>,
    sink: Box<dyn PresentationSink + Send + Sync>,
    request: RunRequest,
    timing: Timing,
    state: Mutex<SequencerState>,
}

impl RunSequencer {
    pub fn new(
        backend: Box<dyn Backend + Send + Sync>,
        sink: Box<dyn PresentationSink + Send + Sync>,
        request: RunRequest,
    ) -> Self {
        Self {
            backend,
            sink,
            request,
            timing: Timing::default(),
            state: Mutex::new(SequencerState::default()),
        }
    }

    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    pub fn timing(&self) -> &Timing {
        &self.timing
    }

    fn state(&self) -> MutexGuard<'_, SequencerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Status of the live run, else of the last finished run, else IDLE.
    pub fn status(&self) -> RunStatus {
        let state = self.state();
        state
            .live
            .as_ref()
            .or(state.last.as_ref())
            .map(|c| c.status)
            .unwrap_or(RunStatus::Idle)
    }

    pub fn live_run(&self) -> Option<RunContext> {
        self.state().live.clone()
    }

    pub fn last_run(&self) -> Option<RunContext> {
        self.state().last.clone()
    }

    pub fn displayed_identity(&self) -> Option<String> {
        self.state().displayed.as_ref().map(|d| d.identity.clone())
    }

    pub fn trigger_enabled(&self) -> bool {
        self.state().live.is_none()
    }

    /// Start a run, or do nothing if one is live.
    pub async fn trigger(&self) -> TriggerOutcome {
        let ctx = match self.begin() {
            Ok(ctx) => ctx,
            Err(live) => {
                log_trigger_ignored(&live.run_id, live.status.as_str());
                return TriggerOutcome::Ignored {
                    live_run_id: live.run_id,
                };
            }
        };
        let run_id = ctx.run_id.clone();
        let started = Instant::now();
        log_run_started(
            &run_id,
            self.request.scenario.as_deref(),
            self.request.symbol.as_deref(),
        );

        self.sink.set_trigger_enabled(false);
        self.write(&run_id, |sink| sink.replace(thinking_panel()));

        // Barrier, not a race: both sides must finish.
        let (fetched, ()) = tokio::join!(self.fetch(&run_id), self.think(&run_id));

        let outcome = match fetched.and_then(check_payload) {
            Ok(raw) => RunOutcome::Revealed {
                identity: self.reveal(&run_id, &raw).await,
            },
            Err(err) => {
                self.fail(&run_id, &err);
                RunOutcome::Failed(err)
            }
        };

        let context = self.finish(ctx, &outcome);
        self.sink.set_trigger_enabled(true);

        let identity = match &outcome {
            RunOutcome::Revealed { identity } => Some(identity.as_str()),
            RunOutcome::Failed(_) => None,
        };
        log_run_finished(
            &run_id,
            context.status.as_str(),
            started.elapsed().as_secs_f64() * 1000.0,
            identity,
        );
        TriggerOutcome::Completed(RunReport { context, outcome })
    }

    /// Flip one decision card of the displayed run and redraw stage 3.
    /// Returns the card's new expanded state, or `None` when there is no
    /// such card.
    pub fn toggle_decision(&self, index: usize) -> Option<bool> {
        // The guard stays held through the sink write so a run starting
        // concurrently cannot interleave between render and update.
        let mut state = self.state();
        if state.live.is_some() {
            return None;
        }
        let displayed = state.displayed.as_mut()?;
        if index >= displayed.posture.decisions.len() {
            return None;
        }
        let expanded = displayed.expansion.toggle(index);
        self.sink
            .update(render_posture(&displayed.posture, &displayed.expansion));
        Some(expanded)
    }

    // -------------------------------------------------------------------------
    // Phases
    // -------------------------------------------------------------------------

    fn begin(&self) -> Result<RunContext, RunContext> {
        let mut state = self.state();
        if let Some(live) = &state.live {
            return Err(live.clone());
        }
        state.runs_started += 1;
        let mut ctx = RunContext::new(
            format!("r-{}-{}", ts_epoch_ms(), state.runs_started),
            Utc::now(),
        );
        // Idle -> Fetching is always valid for a fresh context.
        let _ = ctx.advance(RunStatus::Fetching);
        state.live = Some(ctx.clone());
        state.displayed = None;
        state.fetch_done = false;
        state.thinking_done = false;
        Ok(ctx)
    }

    async fn fetch(&self, run_id: &str) -> Result<Value, FetchError> {
        let started = Instant::now();
        let result = self.backend.fetch_run(&self.request).await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        match &result {
            Ok(_) => log_fetch(run_id, "ok", elapsed_ms, None),
            Err(err) => log_fetch(run_id, err.tag(), elapsed_ms, Some(&err.to_string())),
        }

        self.with_live(run_id, |state| {
            state.fetch_done = true;
            if !state.thinking_done {
                Some(RunStatus::Animating)
            } else {
                None
            }
        });
        result
    }

    async fn think(&self, run_id: &str) {
        for (index, stage) in self.timing.thinking.iter().enumerate() {
            self.write(run_id, |sink| sink.append(stage.fragment(index, StepPhase::Active)));
            sleep(stage.duration).await;
            self.write(run_id, |sink| sink.update(stage.fragment(index, StepPhase::Done)));
        }
        self.with_live(run_id, |state| {
            state.thinking_done = true;
            None
        });
    }

    async fn reveal(&self, run_id: &str, raw: &Value) -> String {
        self.with_live(run_id, |_| Some(RunStatus::Revealing));

        let Normalized { view, defaulted } = normalize_with_report(raw);
        if !defaulted.is_empty() {
            log_schema_gaps(run_id, &payload_digest(raw), &defaulted);
        }

        let identity = run_identity(Utc::now(), &view.posture.label);
        let expansion = DecisionExpansion::collapsed();
        self.write(run_id, |sink| sink.replace(render_header(&identity)));

        for stage in Stage::ALL {
            sleep(self.timing.reveal_delay).await;
            let fragment = {
                let _scope = ProfileScope::with_context(
                    Domain::Render,
                    "render_stage",
                    &[("stage", v_num(stage.number() as f64))],
                );
                render_stage(stage, &view, &expansion)
            };
            self.write(run_id, |sink| {
                sink.append(fragment);
                sink.mark_visible(Slot::Stage(stage));
            });
        }

        self.state().displayed = Some(DisplayedRun {
            identity: identity.clone(),
            posture: view.posture,
            expansion,
        });
        identity
    }

    fn fail(&self, run_id: &str, err: &FetchError) {
        log(
            Level::Warn,
            Domain::Run,
            "run_failed",
            obj(&[
                ("run_id", v_str(run_id)),
                ("kind", v_str(err.tag())),
                ("msg", v_str(&err.operator_message())),
            ]),
        );
        self.write(run_id, |sink| sink.replace(render_error(&err.operator_message())));
    }

    fn finish(&self, mut ctx: RunContext, outcome: &RunOutcome) -> RunContext {
        let mut state = self.state();
        if let Some(live) = state.live.take() {
            ctx = live;
        }
        let terminal = match outcome {
            RunOutcome::Revealed { .. } => RunStatus::Done,
            RunOutcome::Failed(_) => RunStatus::Failed,
        };
        if let Err(err) = ctx.advance(terminal) {
            log(
                Level::Error,
                Domain::Run,
                "transition_rejected",
                obj(&[("run_id", v_str(&ctx.run_id)), ("msg", v_str(&err.to_string()))]),
            );
            ctx.status = terminal;
        }
        state.last = Some(ctx.clone());
        ctx
    }

    // -------------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------------

    /// Mutate progress of the live run; the closure may request a status.
    fn with_live(&self, run_id: &str, f: impl FnOnce(&mut SequencerState) -> Option<RunStatus>) {
        let mut state = self.state();
        if state.live.as_ref().map(|c| c.run_id.as_str()) != Some(run_id) {
            return;
        }
        let Some(next) = f(&mut *state) else {
            return;
        };
        if let Some(live) = state.live.as_mut() {
            if let Err(err) = live.advance(next) {
                log(
                    Level::Warn,
                    Domain::Run,
                    "transition_rejected",
                    obj(&[("run_id", v_str(run_id)), ("msg", v_str(&err.to_string()))]),
                );
            }
        }
    }

    /// Sink writes are dropped unless `run_id` is the live run.
    fn write(&self, run_id: &str, f: impl FnOnce(&dyn PresentationSink)) {
        let owns = self.state().live.as_ref().map(|c| c.run_id.as_str()) == Some(run_id);
        if owns {
            f(self.sink.as_ref());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_happy_path_transitions() {
        let mut ctx = RunContext::new("r-1".into(), Utc::now());
        assert!(ctx.advance(RunStatus::Fetching).is_ok());
        assert!(ctx.advance(RunStatus::Animating).is_ok());
        assert!(ctx.advance(RunStatus::Revealing).is_ok());
        assert!(ctx.advance(RunStatus::Done).is_ok());
        assert!(ctx.status.is_terminal());
    }

    #[test]
    fn test_failure_from_either_wait_state() {
        let mut a = RunContext::new("r-1".into(), Utc::now());
        a.advance(RunStatus::Fetching).unwrap();
        assert!(a.advance(RunStatus::Failed).is_ok());

        let mut b = RunContext::new("r-2".into(), Utc::now());
        b.advance(RunStatus::Fetching).unwrap();
        b.advance(RunStatus::Animating).unwrap();
        assert!(b.advance(RunStatus::Failed).is_ok());
    }

    #[test]
    fn test_invalid_transitions_rejected() {
        let mut ctx = RunContext::new("r-1".into(), Utc::now());
        assert!(ctx.advance(RunStatus::Revealing).is_err());
        ctx.advance(RunStatus::Fetching).unwrap();
        assert!(ctx.advance(RunStatus::Done).is_err());
        ctx.advance(RunStatus::Failed).unwrap();
        let err = ctx.advance(RunStatus::Revealing).unwrap_err();
        assert_eq!(err.from, RunStatus::Failed);
        assert_eq!(ctx.status, RunStatus::Failed);
    }

    #[test]
    fn test_run_identity_is_time_and_label() {
        let t = Utc.with_ymd_and_hms(2026, 1, 31, 10, 5, 9).unwrap();
        assert_eq!(run_identity(t, "NEUTRAL"), "RUN-20260131-100509-NEUTRAL");
        assert_eq!(run_identity(t, "risk off"), "RUN-20260131-100509-RISK_OFF");
        assert_eq!(run_identity(t, ""), "RUN-20260131-100509-NEUTRAL");
    }

    #[test]
    fn test_status_serializes_screaming() {
        let v = serde_json::to_value(RunStatus::Animating).unwrap();
        assert_eq!(v, "ANIMATING");
    }
}
