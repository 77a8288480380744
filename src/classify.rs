//! Severity classification used for fragment coloring.
//!
//! All helpers are total: any input maps to some tone.

use serde::{Serialize, Serializer};
use std::fmt;

use crate::view::VolatilityState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tone {
    HighRisk,
    LowRisk,
    Neutral,
    Good,
    Caution,
    Bad,
    Opportunity,
    RiskOff,
    /// Lower-cased risk literal, e.g. `medium`.
    Risk(String),
}

impl Tone {
    pub fn as_str(&self) -> &str {
        match self {
            Tone::HighRisk => "high-risk",
            Tone::LowRisk => "low-risk",
            Tone::Neutral => "neutral",
            Tone::Good => "good",
            Tone::Caution => "caution",
            Tone::Bad => "bad",
            Tone::Opportunity => "opportunity",
            Tone::RiskOff => "risk_off",
            Tone::Risk(level) => level,
        }
    }
}

impl fmt::Display for Tone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Tone {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

pub const GOOD_SCORE: f64 = 65.0;
pub const CAUTION_SCORE: f64 = 40.0;

pub fn volatility_class(state: &VolatilityState) -> Tone {
    match state {
        VolatilityState::Expanding => Tone::HighRisk,
        VolatilityState::Contracting => Tone::LowRisk,
        _ => Tone::Neutral,
    }
}

pub fn score_class(score: f64) -> Tone {
    if score >= GOOD_SCORE {
        Tone::Good
    } else if score >= CAUTION_SCORE {
        Tone::Caution
    } else {
        Tone::Bad
    }
}

pub fn posture_class(label: &str) -> Tone {
    match label.trim().to_lowercase().as_str() {
        "opportunity" | "aggressive" => Tone::Opportunity,
        "defensive" | "risk_off" => Tone::RiskOff,
        _ => Tone::Neutral,
    }
}

pub fn risk_class(risk: Option<&str>) -> Tone {
    match risk.map(str::trim).filter(|r| !r.is_empty()) {
        Some(level) => Tone::Risk(level.to_lowercase()),
        None => Tone::Risk("medium".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volatility_classes() {
        assert_eq!(volatility_class(&VolatilityState::Expanding), Tone::HighRisk);
        assert_eq!(volatility_class(&VolatilityState::Contracting), Tone::LowRisk);
        assert_eq!(volatility_class(&VolatilityState::Stable), Tone::Neutral);
        assert_eq!(
            volatility_class(&VolatilityState::Other("CHOPPY".into())),
            Tone::Neutral
        );
    }

    #[test]
    fn test_score_boundaries() {
        assert_eq!(score_class(65.0), Tone::Good);
        assert_eq!(score_class(64.9), Tone::Caution);
        assert_eq!(score_class(40.0), Tone::Caution);
        assert_eq!(score_class(39.9), Tone::Bad);
        assert_eq!(score_class(0.0), Tone::Bad);
    }

    #[test]
    fn test_posture_classes() {
        assert_eq!(posture_class("OPPORTUNITY"), Tone::Opportunity);
        assert_eq!(posture_class("aggressive"), Tone::Opportunity);
        assert_eq!(posture_class("DEFENSIVE"), Tone::RiskOff);
        assert_eq!(posture_class("RISK_OFF"), Tone::RiskOff);
        assert_eq!(posture_class("NEUTRAL"), Tone::Neutral);
        assert_eq!(posture_class(""), Tone::Neutral);
    }

    #[test]
    fn test_risk_class_lowercases_and_defaults() {
        assert_eq!(risk_class(Some("HIGH")).as_str(), "high");
        assert_eq!(risk_class(Some("Extreme")).as_str(), "extreme");
        assert_eq!(risk_class(None).as_str(), "medium");
        assert_eq!(risk_class(Some("  ")).as_str(), "medium");
    }
}
