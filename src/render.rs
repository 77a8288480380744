//! Stage renderers: view-model slices → fragments.
//!
//! Each function reads its slice and returns a fresh [`Fragment`]. None of
//! them touch the sink.

use std::collections::BTreeSet;

use crate::classify::{posture_class, risk_class, score_class, volatility_class, Tone};
use crate::fragment::{Fragment, Node, NoticeKind, Slot, Stage};
use crate::view::{InputStats, Posture, Safety, SafetySummary, Signals, ViewModel};

pub const NOTHING_BLOCKED: &str = "Nothing blocked. Every proposed action passed the safety guardrails.";
pub const NOTHING_PROPOSED: &str = "No actions proposed.";
pub const NO_DECISIONS: &str = "No decisions in this run. Holding current posture.";

/// Which decision cards are expanded. All cards start collapsed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecisionExpansion {
    expanded: BTreeSet<usize>,
}

impl DecisionExpansion {
    pub fn collapsed() -> Self {
        Self::default()
    }

    pub fn is_expanded(&self, index: usize) -> bool {
        self.expanded.contains(&index)
    }

    /// Flip one card. Returns the new state of that card.
    pub fn toggle(&mut self, index: usize) -> bool {
        if !self.expanded.remove(&index) {
            self.expanded.insert(index);
            true
        } else {
            false
        }
    }
}

pub fn render_header(identity: &str) -> Fragment {
    Fragment::new(Slot::Header)
        .heading("Analysis complete")
        .push(Node::Stat {
            label: "Run".to_string(),
            value: identity.to_string(),
            tone: None,
        })
}

/// Stage 1.
pub fn render_input(input: &InputStats) -> Fragment {
    let stat = |label: &str, value: u64| Node::Stat {
        label: label.to_string(),
        value: value.to_string(),
        tone: None,
    };
    Fragment::new(Slot::Stage(Stage::Input))
        .heading(Stage::Input.title())
        .push(stat("Positions", input.positions))
        .push(stat("Candles", input.candles))
        .push(stat("Headlines", input.headlines))
}

/// Stage 2.
pub fn render_signals(signals: &Signals) -> Fragment {
    Fragment::new(Slot::Stage(Stage::Signals))
        .heading(Stage::Signals.title())
        .push(Node::SignalCard {
            title: "Volatility".to_string(),
            value: signals.volatility_state.to_string(),
            detail: signals.volatility_explanation.clone(),
            tone: volatility_class(&signals.volatility_state),
        })
        .push(Node::SignalCard {
            title: "News sentiment".to_string(),
            value: format_score(signals.news_score),
            detail: signals.news_explanation.clone(),
            tone: score_class(signals.news_score),
        })
        .push(Node::SignalCard {
            title: "Sector confidence".to_string(),
            value: format_score(signals.confidence),
            detail: signals.confidence_explanation.clone(),
            tone: score_class(signals.confidence),
        })
}

/// Stage 3. Reasons are emitted only for expanded cards.
pub fn render_posture(posture: &Posture, expansion: &DecisionExpansion) -> Fragment {
    let mut fragment = Fragment::new(Slot::Stage(Stage::Posture))
        .heading(Stage::Posture.title())
        .push(Node::Banner {
            label: posture.label.clone(),
            risk: posture.risk.to_string(),
            reason: posture.primary_reason.clone(),
            tone: posture_class(&posture.label),
            risk_tone: risk_class(Some(posture.risk.as_str())),
        });

    if posture.decisions.is_empty() {
        return fragment.push(Node::Notice {
            kind: NoticeKind::NoDecisions,
            text: NO_DECISIONS.to_string(),
            tone: Tone::Neutral,
        });
    }

    fragment = fragment.heading(format!("Decisions ({})", posture.decisions.len()));
    for (index, d) in posture.decisions.iter().enumerate() {
        let expanded = expansion.is_expanded(index);
        fragment = fragment.push(Node::DecisionCard {
            index,
            target: d.target.clone(),
            kind: d.kind.clone(),
            action: d.action.clone(),
            expanded,
            reason_count: d.reasons.len(),
            reasons: if expanded { d.reasons.clone() } else { Vec::new() },
        });
    }
    fragment
}

/// Stage 4. An empty blocked list yields the affirmative
/// [`NoticeKind::NothingBlocked`] notice.
pub fn render_safety(safety: &Safety) -> Fragment {
    let mut fragment = Fragment::new(Slot::Stage(Stage::Safety)).heading(Stage::Safety.title());

    let c = &safety.concentration;
    if c.is_concentrated {
        fragment = fragment.push(Node::Notice {
            kind: NoticeKind::ConcentrationAlert,
            text: format!(
                "{} sector over-concentrated ({:.0}% of capital, {}).",
                c.dominant_sector,
                c.exposure * 100.0,
                c.severity
            ),
            tone: Tone::Bad,
        });
    }

    fragment = fragment.heading(format!("Allowed ({})", safety.allowed.len()));
    if safety.allowed.is_empty() {
        fragment = fragment.push(Node::Notice {
            kind: NoticeKind::NothingProposed,
            text: NOTHING_PROPOSED.to_string(),
            tone: Tone::Neutral,
        });
    }
    for a in &safety.allowed {
        fragment = fragment.push(Node::ActionItem {
            symbol: a.symbol.clone(),
            action: a.action.clone(),
            reason: a.reason.clone(),
            blocked: false,
        });
    }

    fragment = fragment.heading(format!("Blocked ({})", safety.blocked.len()));
    if safety.blocked.is_empty() {
        fragment = fragment.push(Node::Notice {
            kind: NoticeKind::NothingBlocked,
            text: NOTHING_BLOCKED.to_string(),
            tone: Tone::Good,
        });
    }
    for b in &safety.blocked {
        fragment = fragment.push(Node::ActionItem {
            symbol: b.symbol.clone(),
            action: b.action.clone(),
            reason: b.blocking_reason.clone(),
            blocked: true,
        });
    }
    fragment
}

/// Stage 5.
pub fn render_summary(summary: &SafetySummary) -> Fragment {
    let blocked_tone = if summary.blocked_count == 0 {
        Tone::Good
    } else {
        Tone::Caution
    };
    Fragment::new(Slot::Stage(Stage::Summary))
        .heading(Stage::Summary.title())
        .push(Node::Stat {
            label: "Decision".to_string(),
            value: summary.decision.clone(),
            tone: Some(posture_class(&summary.decision)),
        })
        .push(Node::Stat {
            label: "Actions proposed".to_string(),
            value: summary.proposed_count.to_string(),
            tone: None,
        })
        .push(Node::Stat {
            label: "Actions blocked".to_string(),
            value: summary.blocked_count.to_string(),
            tone: Some(blocked_tone),
        })
        .push(Node::Stat {
            label: "Final mode".to_string(),
            value: summary.mode.clone(),
            tone: None,
        })
}

/// Dispatch one reveal stage.
pub fn render_stage(stage: Stage, view: &ViewModel, expansion: &DecisionExpansion) -> Fragment {
    match stage {
        Stage::Input => render_input(&view.input),
        Stage::Signals => render_signals(&view.signals),
        Stage::Posture => render_posture(&view.posture, expansion),
        Stage::Safety => render_safety(&view.safety),
        Stage::Summary => render_summary(&view.safety.summary),
    }
}

fn format_score(score: f64) -> String {
    if score.fract() == 0.0 {
        format!("{:.0}/100", score)
    } else {
        format!("{:.1}/100", score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize;
    use serde_json::json;

    fn card_reasons(fragment: &Fragment, index: usize) -> (bool, Vec<String>) {
        fragment
            .decision_cards()
            .find_map(|n| match n {
                Node::DecisionCard {
                    index: i,
                    expanded,
                    reasons,
                    ..
                } if *i == index => Some((*expanded, reasons.clone())),
                _ => None,
            })
            .expect("card present")
    }

    #[test]
    fn test_toggle_flips_single_card() {
        let mut exp = DecisionExpansion::collapsed();
        assert!(exp.toggle(1));
        assert!(exp.is_expanded(1));
        assert!(!exp.is_expanded(0));
        assert!(!exp.toggle(1));
        assert!(!exp.is_expanded(1));
    }

    #[test]
    fn test_posture_cards_collapsed_by_default() {
        let vm = normalize(&json!({
            "posture": {"label": "DEFENSIVE", "decisions": [
                {"target": "AMD", "action": "TRIM_RISK", "reasons": ["vitals low", "sector crowded"]},
                {"target": "NVDA", "action": "HOLD", "reasons": ["strong vitals"]}
            ]}
        }));
        let f = render_posture(&vm.posture, &DecisionExpansion::collapsed());
        assert_eq!(f.decision_cards().count(), 2);
        assert_eq!(card_reasons(&f, 0), (false, vec![]));
        assert_eq!(card_reasons(&f, 1), (false, vec![]));
        assert!(!f.contains_text("vitals low"));
    }

    #[test]
    fn test_expanding_one_card_leaves_others_collapsed() {
        let vm = normalize(&json!({
            "decisions": [
                {"target": "AMD", "reasons": ["vitals low", "sector crowded"]},
                {"target": "NVDA", "reasons": ["strong vitals"]}
            ]
        }));
        let mut exp = DecisionExpansion::collapsed();
        exp.toggle(0);
        let f = render_posture(&vm.posture, &exp);
        assert_eq!(
            card_reasons(&f, 0),
            (true, vec!["vitals low".to_string(), "sector crowded".to_string()])
        );
        assert_eq!(card_reasons(&f, 1), (false, vec![]));
    }

    #[test]
    fn test_posture_banner_tones() {
        let vm = normalize(&json!({"market_posture": {"market_posture": "RISK_OFF", "risk_level": "HIGH"}}));
        let f = render_posture(&vm.posture, &DecisionExpansion::collapsed());
        let banner = f.nodes.iter().find(|n| matches!(n, Node::Banner { .. })).unwrap();
        match banner {
            Node::Banner { tone, risk_tone, .. } => {
                assert_eq!(*tone, Tone::RiskOff);
                assert_eq!(risk_tone.as_str(), "high");
            }
            _ => unreachable!(),
        }
        assert!(f.has_notice(NoticeKind::NoDecisions));
    }

    #[test]
    fn test_signal_tones() {
        let vm = normalize(&json!({"signals": {"volatility_state": "EXPANDING", "news_score": 62, "confidence": 30}}));
        let f = render_signals(&vm.signals);
        let tones: Vec<Tone> = f
            .nodes
            .iter()
            .filter_map(|n| match n {
                Node::SignalCard { tone, .. } => Some(tone.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(tones, vec![Tone::HighRisk, Tone::Caution, Tone::Bad]);
        assert!(f.contains_text("62/100"));
    }

    #[test]
    fn test_empty_blocked_list_renders_affirmative_notice() {
        let vm = normalize(&json!({}));
        let f = render_safety(&vm.safety);
        assert!(f.has_notice(NoticeKind::NothingBlocked));
        assert_eq!(f.action_items(true).count(), 0);
    }

    #[test]
    fn test_blocked_items_replace_affirmative_notice() {
        let vm = normalize(&json!({
            "blocked_by_safety": [{"target": "TSLA", "action": "ALLOCATE", "safety_reason": "volatility"}]
        }));
        let f = render_safety(&vm.safety);
        assert!(!f.has_notice(NoticeKind::NothingBlocked));
        assert_eq!(f.action_items(true).count(), 1);
        assert!(f.contains_text("volatility"));
    }

    #[test]
    fn test_concentration_alert() {
        let vm = normalize(&json!({
            "concentration_risk": {"is_concentrated": true, "dominant_sector": "TECH", "exposure": 0.72, "severity": "BREACHED"}
        }));
        let f = render_safety(&vm.safety);
        assert!(f.has_notice(NoticeKind::ConcentrationAlert));
        assert!(f.contains_text("TECH sector over-concentrated (72%"));
    }

    #[test]
    fn test_summary_grid() {
        let vm = normalize(&json!({
            "posture": "DEFENSIVE",
            "execution_summary": {"actions_proposed": 3, "actions_blocked": 1, "final_mode": "CAPITAL_PRESERVATION"}
        }));
        let f = render_summary(&vm.safety.summary);
        let text = f.to_string();
        assert!(text.contains("DEFENSIVE"));
        assert!(text.contains("CAPITAL_PRESERVATION"));
        assert_eq!(f.nodes.len(), 5);
    }

    #[test]
    fn test_renderers_do_not_mutate_view() {
        let vm = normalize(&json!({"decisions": [{"target": "AMD"}]}));
        let before = vm.clone();
        for stage in Stage::ALL {
            let _ = render_stage(stage, &vm, &DecisionExpansion::collapsed());
        }
        assert_eq!(vm, before);
    }
}
