//! The fixed "thinking" sequence shown while the backend works.

use std::time::Duration;

use crate::fragment::{Fragment, Node, Slot, StepPhase};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThinkingStage {
    pub title: &'static str,
    pub subtitle: &'static str,
    pub duration: Duration,
}

impl ThinkingStage {
    pub const fn new(title: &'static str, subtitle: &'static str, millis: u64) -> Self {
        Self {
            title,
            subtitle,
            duration: Duration::from_millis(millis),
        }
    }

    pub fn fragment(&self, index: usize, phase: StepPhase) -> Fragment {
        Fragment::new(Slot::Thinking(index)).push(Node::Step {
            index,
            title: self.title.to_string(),
            subtitle: self.subtitle.to_string(),
            phase,
        })
    }
}

pub const THINKING_STAGES: [ThinkingStage; 5] = [
    ThinkingStage::new("Scanning portfolio", "Reading positions and capital allocation", 600),
    ThinkingStage::new("Measuring volatility", "Comparing current ATR against baseline", 600),
    ThinkingStage::new("Scoring news flow", "Weighing sector headlines", 600),
    ThinkingStage::new("Forming market posture", "Combining signals into a risk stance", 600),
    ThinkingStage::new("Applying guardrails", "Checking concentration and cash reserve limits", 600),
];

pub const REVEAL_DELAY: Duration = Duration::from_millis(350);

/// Timing of one run: the thinking floor plus the gap between reveals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timing {
    pub thinking: Vec<ThinkingStage>,
    pub reveal_delay: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            thinking: THINKING_STAGES.to_vec(),
            reveal_delay: REVEAL_DELAY,
        }
    }
}

impl Timing {
    /// Minimum time between trigger and the first reveal.
    pub fn thinking_total(&self) -> Duration {
        self.thinking.iter().map(|s| s.duration).sum()
    }
}

pub fn thinking_panel() -> Fragment {
    Fragment::new(Slot::ThinkingPanel).heading("Analyzing portfolio")
}
