//! Renderable fragment descriptions.
//!
//! A fragment is a typed node tree tagged with the container slot it
//! occupies. Fragments carry classification tones, not styling. Sinks
//! decide how to draw them.

use serde::Serialize;
use std::fmt;

use crate::classify::Tone;

/// The five reveal stages, in reveal order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Input,
    Signals,
    Posture,
    Safety,
    Summary,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Input,
        Stage::Signals,
        Stage::Posture,
        Stage::Safety,
        Stage::Summary,
    ];

    /// 1-based position in the reveal sequence.
    pub fn number(&self) -> usize {
        match self {
            Stage::Input => 1,
            Stage::Signals => 2,
            Stage::Posture => 3,
            Stage::Safety => 4,
            Stage::Summary => 5,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Stage::Input => "Inputs analyzed",
            Stage::Signals => "Market signals",
            Stage::Posture => "Market posture",
            Stage::Safety => "Safety guardrails",
            Stage::Summary => "Execution summary",
        }
    }
}

/// Where a fragment lives in the presentation container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "slot", content = "index", rename_all = "snake_case")]
pub enum Slot {
    ThinkingPanel,
    Thinking(usize),
    Header,
    Stage(Stage),
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    NothingBlocked,
    NothingProposed,
    NoDecisions,
    ConcentrationAlert,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepPhase {
    Active,
    Done,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum Node {
    Heading {
        text: String,
    },
    Text {
        text: String,
    },
    Stat {
        label: String,
        value: String,
        tone: Option<Tone>,
    },
    SignalCard {
        title: String,
        value: String,
        detail: String,
        tone: Tone,
    },
    Banner {
        label: String,
        risk: String,
        reason: String,
        tone: Tone,
        risk_tone: Tone,
    },
    DecisionCard {
        index: usize,
        target: String,
        kind: String,
        action: String,
        expanded: bool,
        reason_count: usize,
        /// Populated only while expanded.
        reasons: Vec<String>,
    },
    ActionItem {
        symbol: String,
        action: String,
        reason: String,
        blocked: bool,
    },
    Notice {
        kind: NoticeKind,
        text: String,
        tone: Tone,
    },
    Step {
        index: usize,
        title: String,
        subtitle: String,
        phase: StepPhase,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Fragment {
    pub slot: Slot,
    pub nodes: Vec<Node>,
}

impl Fragment {
    pub fn new(slot: Slot) -> Self {
        Self {
            slot,
            nodes: Vec::new(),
        }
    }

    pub fn push(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn heading(self, text: impl Into<String>) -> Self {
        self.push(Node::Heading { text: text.into() })
    }

    pub fn has_notice(&self, kind: NoticeKind) -> bool {
        self.nodes
            .iter()
            .any(|n| matches!(n, Node::Notice { kind: k, .. } if *k == kind))
    }

    pub fn decision_cards(&self) -> impl Iterator<Item = &Node> {
        self.nodes
            .iter()
            .filter(|n| matches!(n, Node::DecisionCard { .. }))
    }

    pub fn action_items(&self, blocked: bool) -> impl Iterator<Item = &Node> + '_ {
        self.nodes
            .iter()
            .filter(move |n| matches!(n, Node::ActionItem { blocked: b, .. } if *b == blocked))
    }

    /// True when any node's text mentions `needle`.
    pub fn contains_text(&self, needle: &str) -> bool {
        self.to_string().contains(needle)
    }
}

// =============================================================================
// Plain-text rendering
// =============================================================================

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Heading { text } => write!(f, "== {} ==", text),
            Node::Text { text } => write!(f, "{}", text),
            Node::Stat { label, value, tone } => match tone {
                Some(t) => write!(f, "  {:<18} {} [{}]", label, value, t),
                None => write!(f, "  {:<18} {}", label, value),
            },
            Node::SignalCard {
                title,
                value,
                detail,
                tone,
            } => write!(f, "  {:<18} {} [{}]\n    {}", title, value, tone, detail),
            Node::Banner {
                label,
                risk,
                reason,
                tone,
                risk_tone,
            } => write!(
                f,
                "  POSTURE {} [{}]  RISK {} [{}]\n    {}",
                label, tone, risk, risk_tone, reason
            ),
            Node::DecisionCard {
                index,
                target,
                kind,
                action,
                expanded,
                reason_count,
                reasons,
            } => {
                let marker = if *expanded { "-" } else { "+" };
                write!(
                    f,
                    "  {} [{}] {:<10} {:<10} {} ({} reason{})",
                    marker,
                    index,
                    target,
                    kind,
                    action,
                    reason_count,
                    if *reason_count == 1 { "" } else { "s" }
                )?;
                for r in reasons {
                    write!(f, "\n      - {}", r)?;
                }
                Ok(())
            }
            Node::ActionItem {
                symbol,
                action,
                reason,
                blocked,
            } => {
                let mark = if *blocked { "X" } else { "*" };
                write!(f, "  {} {:<10} {}\n    {}", mark, symbol, action, reason)
            }
            Node::Notice { text, tone, .. } => write!(f, "  ({}) {}", tone, text),
            Node::Step {
                index,
                title,
                subtitle,
                phase,
            } => {
                let mark = match phase {
                    StepPhase::Active => "..",
                    StepPhase::Done => "ok",
                };
                write!(f, "  [{}] {}. {} - {}", mark, index + 1, title, subtitle)
            }
        }
    }
}

impl fmt::Display for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, node) in self.nodes.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", node)?;
        }
        Ok(())
    }
}
