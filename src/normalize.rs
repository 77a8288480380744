//! Backend payload → [`ViewModel`].
//!
//! Normalization never fails. Backends have shipped the same data under
//! several shapes (`phase2` vs `signals`, `market_posture` vs `posture`,
//! snake_case vs camelCase leaves), so every lookup goes through a list of
//! aliases and every leaf has a default:
//!
//! | field | default |
//! |---|---|
//! | input counts | `0` |
//! | volatility state | `STABLE` |
//! | news score, confidence | `50` |
//! | explanations | [`EXPLANATION_PLACEHOLDER`] |
//! | posture label | `NEUTRAL` |
//! | risk | `MEDIUM` |
//! | primary reason | first posture reason, else [`REASON_PLACEHOLDER`] |
//! | decision reasons | `[REASON_PLACEHOLDER]` |
//! | summary decision | posture label |
//! | summary counts | length of allowed / blocked |
//! | summary mode | posture risk literal |

use serde_json::{Map, Value};

use crate::logging::{Domain, ProfileScope};
use crate::view::{
    AllowedAction, BlockedAction, Concentration, Decision, InputStats, Posture, RiskLevel, Safety,
    SafetySummary, Signals, ViewModel, VolatilityState,
};

pub const EXPLANATION_PLACEHOLDER: &str = "No explanation provided by the analysis engine.";
pub const REASON_PLACEHOLDER: &str = "No specific reason recorded.";
pub const DEFAULT_POSTURE: &str = "NEUTRAL";
pub const DEFAULT_SCORE: f64 = 50.0;
pub const UNKNOWN: &str = "UNKNOWN";
pub const DEFAULT_ACTION: &str = "REVIEW";

type Obj = Map<String, Value>;

/// Normalized view plus the field paths that fell back to defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub view: ViewModel,
    pub defaulted: Vec<String>,
}

pub fn normalize(raw: &Value) -> ViewModel {
    normalize_with_report(raw).view
}

pub fn normalize_with_report(raw: &Value) -> Normalized {
    let _scope = ProfileScope::new(Domain::Normalize, "normalize");
    let mut gaps = Gaps::default();
    let root = raw.as_object();

    let input = read_input(root, &mut gaps);
    let signals = read_signals(root, &mut gaps);
    let posture = read_posture(root, &mut gaps);
    let safety = read_safety(root, &posture, &mut gaps);

    Normalized {
        view: ViewModel {
            input,
            signals,
            posture,
            safety,
        },
        defaulted: gaps.paths,
    }
}

// =============================================================================
// Groups
// =============================================================================

fn read_input(root: Option<&Obj>, gaps: &mut Gaps) -> InputStats {
    let g = group(root, &["input_stats", "inputStats", "input"]);
    InputStats {
        positions: gaps.count(field(g, &["positions"]), "input.positions"),
        candles: gaps.count(field(g, &["candles"]), "input.candles"),
        headlines: gaps.count(field(g, &["headlines"]), "input.headlines"),
    }
}

fn read_signals(root: Option<&Obj>, gaps: &mut Gaps) -> Signals {
    let g = group(root, &["phase2", "signals"]);

    let volatility_state = match field(g, &["volatility_state", "volatilityState"]).and_then(as_text) {
        Some(s) => VolatilityState::parse(&s),
        None => {
            gaps.push("signals.volatilityState");
            VolatilityState::Stable
        }
    };

    Signals {
        volatility_state,
        volatility_explanation: gaps.explanation(
            field(g, &["volatility_explanation", "volatilityExplanation"]),
            "signals.volatilityExplanation",
        ),
        news_score: gaps.score(field(g, &["news_score", "newsScore"]), "signals.newsScore"),
        news_explanation: gaps.explanation(
            field(g, &["news_explanation", "newsExplanation"]),
            "signals.newsExplanation",
        ),
        confidence: gaps.score(
            field(g, &["sector_confidence", "sectorConfidence", "confidence"]),
            "signals.confidence",
        ),
        confidence_explanation: gaps.explanation(
            field(g, &["confidence_explanation", "confidenceExplanation"]),
            "signals.confidenceExplanation",
        ),
    }
}

fn read_posture(root: Option<&Obj>, gaps: &mut Gaps) -> Posture {
    // Older backends send the posture as a bare label string.
    let (g, bare_label) = match field(root, &["market_posture", "marketPosture", "posture"]) {
        Some(Value::Object(m)) => (Some(m), None),
        Some(other) => (None, as_text(other)),
        None => (None, None),
    };

    let label = match field(g, &["label", "market_posture", "posture"])
        .and_then(as_text)
        .or(bare_label)
    {
        Some(l) => l,
        None => {
            gaps.push("posture.label");
            DEFAULT_POSTURE.to_string()
        }
    };

    let risk = match field(g, &["risk", "risk_level", "riskLevel"]).and_then(as_text) {
        Some(r) => RiskLevel::parse(&r),
        None => {
            gaps.push("posture.risk");
            RiskLevel::Medium
        }
    };

    let reasons = field(g, &["reasons"]).map(text_list).unwrap_or_default();
    let primary_reason = match field(g, &["primary_reason", "primaryReason"])
        .and_then(as_text)
        .or_else(|| reasons.first().cloned())
    {
        Some(r) => r,
        None => {
            gaps.push("posture.primaryReason");
            REASON_PLACEHOLDER.to_string()
        }
    };

    let raw_decisions = list(g, &["decisions"]).or_else(|| list(root, &["decisions"]));
    let decisions = match raw_decisions {
        Some(items) => items
            .iter()
            .enumerate()
            .filter_map(|(i, item)| read_decision(item, i, gaps))
            .collect(),
        None => {
            gaps.push("posture.decisions");
            Vec::new()
        }
    };

    Posture {
        label,
        risk,
        primary_reason,
        decisions,
    }
}

fn read_decision(item: &Value, index: usize, gaps: &mut Gaps) -> Option<Decision> {
    let Some(d) = item.as_object() else {
        gaps.push(&format!("posture.decisions[{}]", index));
        return None;
    };
    let d = Some(d);
    let path = |leaf: &str| format!("posture.decisions[{}].{}", index, leaf);

    let mut reasons = field(d, &["reasons"]).map(text_list).unwrap_or_default();
    if reasons.is_empty() {
        match field(d, &["reason"]).and_then(as_text) {
            Some(r) => reasons.push(r),
            None => {
                gaps.push(&path("reasons"));
                reasons.push(REASON_PLACEHOLDER.to_string());
            }
        }
    }

    Some(Decision {
        target: gaps.text(field(d, &["target", "symbol"]), &path("target"), UNKNOWN),
        kind: gaps.text(field(d, &["kind", "type"]), &path("kind"), UNKNOWN),
        action: gaps.text(field(d, &["action"]), &path("action"), DEFAULT_ACTION),
        reasons,
    })
}

fn read_safety(root: Option<&Obj>, posture: &Posture, gaps: &mut Gaps) -> Safety {
    let g = group(root, &["safety"]);

    let allowed: Vec<AllowedAction> = list(g, &["allowed", "allowed_actions", "allowedActions"])
        .or_else(|| list(root, &["allowed_actions", "allowedActions", "execution_plan", "executionPlan"]))
        .map(|items| {
            items
                .iter()
                .enumerate()
                .filter_map(|(i, item)| {
                    let a = item.as_object();
                    if a.is_none() {
                        gaps.push(&format!("safety.allowed[{}]", i));
                        return None;
                    }
                    let path = |leaf: &str| format!("safety.allowed[{}].{}", i, leaf);
                    Some(AllowedAction {
                        symbol: gaps.text(field(a, &["symbol", "target"]), &path("symbol"), UNKNOWN),
                        action: gaps.text(field(a, &["action"]), &path("action"), DEFAULT_ACTION),
                        reason: gaps.text(field(a, &["reason"]), &path("reason"), REASON_PLACEHOLDER),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let blocked: Vec<BlockedAction> = list(g, &["blocked", "blocked_actions", "blockedActions"])
        .or_else(|| list(root, &["blocked_actions", "blockedActions", "blocked_by_safety", "blockedBySafety"]))
        .map(|items| {
            items
                .iter()
                .enumerate()
                .filter_map(|(i, item)| {
                    let b = item.as_object();
                    if b.is_none() {
                        gaps.push(&format!("safety.blocked[{}]", i));
                        return None;
                    }
                    let path = |leaf: &str| format!("safety.blocked[{}].{}", i, leaf);
                    Some(BlockedAction {
                        symbol: gaps.text(field(b, &["symbol", "target"]), &path("symbol"), UNKNOWN),
                        action: gaps.text(field(b, &["action"]), &path("action"), DEFAULT_ACTION),
                        blocking_reason: gaps.text(
                            field(
                                b,
                                &[
                                    "blocking_reason",
                                    "blockingReason",
                                    "safety_reason",
                                    "reason_blocked",
                                    "blocking_guard",
                                    "reason",
                                ],
                            ),
                            &path("blockingReason"),
                            REASON_PLACEHOLDER,
                        ),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let s = group(g, &["summary"]).or_else(|| group(root, &["execution_summary", "executionSummary", "summary"]));
    let summary = SafetySummary {
        decision: gaps.text(
            field(s, &["decision", "primary_intent"]),
            "safety.summary.decision",
            &posture.label,
        ),
        proposed_count: field(s, &["proposed_count", "proposedCount", "actions_proposed"])
            .and_then(as_count)
            .unwrap_or_else(|| {
                gaps.push("safety.summary.proposedCount");
                allowed.len() as u64
            }),
        blocked_count: field(s, &["blocked_count", "blockedCount", "actions_blocked"])
            .and_then(as_count)
            .unwrap_or_else(|| {
                gaps.push("safety.summary.blockedCount");
                blocked.len() as u64
            }),
        mode: gaps.text(
            field(s, &["mode", "final_mode", "finalMode"]),
            "safety.summary.mode",
            posture.risk.as_str(),
        ),
    };

    let c = group(root, &["concentration_risk", "concentrationRisk", "concentration"])
        .or_else(|| group(g, &["concentration"]));
    let defaults = Concentration::default();
    let concentration = Concentration {
        is_concentrated: field(c, &["is_concentrated", "isConcentrated"])
            .and_then(as_bool)
            .unwrap_or(defaults.is_concentrated),
        dominant_sector: field(c, &["dominant_sector", "dominantSector"])
            .and_then(as_text)
            .unwrap_or(defaults.dominant_sector),
        exposure: field(c, &["exposure"])
            .and_then(as_number)
            .map(|e| e.clamp(0.0, 1.0))
            .unwrap_or(defaults.exposure),
        severity: field(c, &["severity"]).and_then(as_text).unwrap_or(defaults.severity),
    };
    if c.is_none() {
        gaps.push("safety.concentration");
    }

    Safety {
        allowed,
        blocked,
        summary,
        concentration,
    }
}

// =============================================================================
// Defaults bookkeeping
// =============================================================================

#[derive(Debug, Default)]
struct Gaps {
    paths: Vec<String>,
}

impl Gaps {
    fn push(&mut self, path: &str) {
        self.paths.push(path.to_string());
    }

    fn text(&mut self, v: Option<&Value>, path: &str, default: &str) -> String {
        v.and_then(as_text).unwrap_or_else(|| {
            self.push(path);
            default.to_string()
        })
    }

    fn explanation(&mut self, v: Option<&Value>, path: &str) -> String {
        self.text(v, path, EXPLANATION_PLACEHOLDER)
    }

    fn score(&mut self, v: Option<&Value>, path: &str) -> f64 {
        match v.and_then(as_number) {
            Some(n) => n.clamp(0.0, 100.0),
            None => {
                self.push(path);
                DEFAULT_SCORE
            }
        }
    }

    fn count(&mut self, v: Option<&Value>, path: &str) -> u64 {
        v.and_then(as_count).unwrap_or_else(|| {
            self.push(path);
            0
        })
    }
}

// =============================================================================
// Lenient lookups
// =============================================================================

/// First alias whose value is an object.
fn group<'a>(parent: Option<&'a Obj>, keys: &[&str]) -> Option<&'a Obj> {
    let parent = parent?;
    keys.iter().find_map(|k| parent.get(*k).and_then(Value::as_object))
}

/// First alias whose value is present and not null.
fn field<'a>(parent: Option<&'a Obj>, keys: &[&str]) -> Option<&'a Value> {
    let parent = parent?;
    keys.iter()
        .find_map(|k| parent.get(*k).filter(|v| !v.is_null()))
}

fn list<'a>(parent: Option<&'a Obj>, keys: &[&str]) -> Option<&'a Vec<Value>> {
    let parent = parent?;
    keys.iter().find_map(|k| parent.get(*k).and_then(Value::as_array))
}

fn as_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => {
            let t = s.trim();
            (!t.is_empty()).then(|| t.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn as_number(v: &Value) -> Option<f64> {
    let n = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

fn as_count(v: &Value) -> Option<u64> {
    match v {
        Value::Array(items) => Some(items.len() as u64),
        other => as_number(other).map(|n| n.max(0.0).floor() as u64),
    }
}

fn as_bool(v: &Value) -> Option<bool> {
    match v {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn text_list(v: &Value) -> Vec<String> {
    match v {
        Value::Array(items) => items.iter().filter_map(as_text).collect(),
        other => as_text(other).into_iter().collect(),
    }
}
