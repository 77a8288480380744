//! Normalization properties over a spread of malformed and partial payloads,
//! plus stage rendering of the result.

use std::fs;
use std::io::BufWriter;

use serde_json::{json, Value};

use postureview::fragment::{NoticeKind, Stage};
use postureview::normalize::{
    normalize, normalize_with_report, DEFAULT_POSTURE, DEFAULT_SCORE, EXPLANATION_PLACEHOLDER,
    REASON_PLACEHOLDER,
};
use postureview::render::{render_safety, render_stage, DecisionExpansion};
use postureview::sink::{JsonlSink, PresentationSink};
use postureview::view::{RiskLevel, VolatilityState};

fn odd_payloads() -> Vec<Value> {
    vec![
        json!({}),
        json!(null),
        json!([]),
        json!("FAILED?"),
        json!({"phase2": null, "market_posture": null, "execution_summary": null}),
        json!({"signals": {"news_score": "n/a", "volatility_state": 7}}),
        json!({"decisions": [null, 3, {"target": null}]}),
        json!({"blocked_by_safety": {"not": "a list"}}),
        json!({"market_posture": "AGGRESSIVE"}),
        json!({"execution_summary": {"actions_proposed": -4, "actions_blocked": "2"}}),
    ]
}

#[test]
fn every_field_populated_for_any_payload() {
    for raw in odd_payloads() {
        let view = normalize(&raw);

        assert!(!view.signals.volatility_explanation.is_empty(), "{}", raw);
        assert!(!view.signals.news_explanation.is_empty(), "{}", raw);
        assert!(!view.signals.confidence_explanation.is_empty(), "{}", raw);
        assert!((0.0..=100.0).contains(&view.signals.news_score), "{}", raw);
        assert!((0.0..=100.0).contains(&view.signals.confidence), "{}", raw);
        assert!(!view.posture.label.is_empty(), "{}", raw);
        assert!(!view.posture.primary_reason.is_empty(), "{}", raw);
        for d in &view.posture.decisions {
            assert!(!d.target.is_empty());
            assert!(!d.action.is_empty());
            assert!(!d.reasons.is_empty());
        }
        assert!(!view.safety.summary.decision.is_empty(), "{}", raw);
        assert!(!view.safety.summary.mode.is_empty(), "{}", raw);

        // Every stage renders without touching the view.
        let before = view.clone();
        for stage in Stage::ALL {
            let _ = render_stage(stage, &view, &DecisionExpansion::collapsed());
        }
        assert_eq!(view, before);
    }
}

#[test]
fn normalization_is_idempotent() {
    for raw in odd_payloads() {
        assert_eq!(normalize(&raw), normalize(&raw));
        assert_eq!(normalize_with_report(&raw), normalize_with_report(&raw));
    }
}

#[test]
fn empty_object_uses_documented_defaults() {
    let view = normalize(&json!({}));
    assert_eq!(view.signals.volatility_state, VolatilityState::Stable);
    assert_eq!(view.signals.news_score, DEFAULT_SCORE);
    assert_eq!(view.signals.news_explanation, EXPLANATION_PLACEHOLDER);
    assert_eq!(view.posture.label, DEFAULT_POSTURE);
    assert_eq!(view.posture.risk, RiskLevel::Medium);
    assert_eq!(view.posture.primary_reason, REASON_PLACEHOLDER);
    assert!(view.posture.decisions.is_empty());
    assert!(view.safety.allowed.is_empty());
    assert!(view.safety.blocked.is_empty());
}

#[test]
fn news_score_only_payload() {
    let view = normalize(&json!({"signals": {"news_score": 62}}));
    assert_eq!(view.signals.news_score, 62.0);
    assert_eq!(view.signals.volatility_state, VolatilityState::Stable);
    assert_eq!(view.posture.label, "NEUTRAL");
    assert!(view.safety.blocked.is_empty());

    let stage4 = render_safety(&view.safety);
    assert!(stage4.has_notice(NoticeKind::NothingBlocked));
}

#[test]
fn view_model_serializes_camel_case() {
    let view = normalize(&json!({"signals": {"news_score": 62}}));
    let v = serde_json::to_value(&view).expect("serialize");
    assert_eq!(v["signals"]["newsScore"], 62.0);
    assert_eq!(v["signals"]["volatilityState"], "STABLE");
    assert_eq!(v["posture"]["label"], "NEUTRAL");
    assert_eq!(v["safety"]["blocked"], json!([]));
}

#[test]
fn transcript_file_holds_one_op_per_line() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("transcript.jsonl");
    {
        let file = fs::File::create(&path).expect("create");
        let sink = JsonlSink::new(BufWriter::new(file));
        let view = normalize(&json!({}));
        for stage in Stage::ALL {
            sink.append(render_stage(stage, &view, &DecisionExpansion::collapsed()));
        }
        sink.set_trigger_enabled(true);
    }

    let text = fs::read_to_string(&path).expect("read");
    let lines: Vec<Value> = text
        .lines()
        .map(|l| serde_json::from_str(l).expect("json line"))
        .collect();
    assert_eq!(lines.len(), 6);
    assert_eq!(lines[0]["op"], "append");
    assert_eq!(lines[0]["fragment"]["slot"]["index"], "input");
    assert_eq!(lines[5], json!({"op": "trigger_enabled", "enabled": true}));
}
