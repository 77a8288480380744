//! Canonical view model.
//!
//! Everything downstream of normalization reads these types only. Every
//! field is populated; missing backend data is replaced by documented
//! defaults in [`crate::normalize`].

use serde::{Serialize, Serializer};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewModel {
    pub input: InputStats,
    pub signals: Signals,
    pub posture: Posture,
    pub safety: Safety,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InputStats {
    pub positions: u64,
    pub candles: u64,
    pub headlines: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Signals {
    pub volatility_state: VolatilityState,
    pub volatility_explanation: String,
    pub news_score: f64,
    pub news_explanation: String,
    pub confidence: f64,
    pub confidence_explanation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Posture {
    pub label: String,
    pub risk: RiskLevel,
    pub primary_reason: String,
    pub decisions: Vec<Decision>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub target: String,
    pub kind: String,
    pub action: String,
    /// Never empty.
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Safety {
    pub allowed: Vec<AllowedAction>,
    pub blocked: Vec<BlockedAction>,
    pub summary: SafetySummary,
    pub concentration: Concentration,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AllowedAction {
    pub symbol: String,
    pub action: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockedAction {
    pub symbol: String,
    pub action: String,
    pub blocking_reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SafetySummary {
    pub decision: String,
    pub proposed_count: u64,
    pub blocked_count: u64,
    pub mode: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Concentration {
    pub is_concentrated: bool,
    pub dominant_sector: String,
    /// Fraction of capital in the dominant sector, 0.0..=1.0.
    pub exposure: f64,
    pub severity: String,
}

impl Default for Concentration {
    fn default() -> Self {
        Self {
            is_concentrated: false,
            dominant_sector: "NONE".to_string(),
            exposure: 0.0,
            severity: "OK".to_string(),
        }
    }
}

// =============================================================================
// Open enums: known values plus whatever a newer backend sends
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolatilityState {
    Expanding,
    Contracting,
    Stable,
    Other(String),
}

impl VolatilityState {
    /// Empty input maps to `Stable`.
    pub fn parse(raw: &str) -> Self {
        let upper = raw.trim().to_uppercase();
        match upper.as_str() {
            "EXPANDING" => Self::Expanding,
            "CONTRACTING" => Self::Contracting,
            "STABLE" | "" => Self::Stable,
            _ => Self::Other(upper),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Expanding => "EXPANDING",
            Self::Contracting => "CONTRACTING",
            Self::Stable => "STABLE",
            Self::Other(s) => s,
        }
    }
}

impl Default for VolatilityState {
    fn default() -> Self {
        Self::Stable
    }
}

impl fmt::Display for VolatilityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for VolatilityState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Other(String),
}

impl RiskLevel {
    /// Empty input maps to `Medium`.
    pub fn parse(raw: &str) -> Self {
        let upper = raw.trim().to_uppercase();
        match upper.as_str() {
            "LOW" => Self::Low,
            "MEDIUM" | "" => Self::Medium,
            "HIGH" => Self::High,
            _ => Self::Other(upper),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Other(s) => s,
        }
    }
}

impl Default for RiskLevel {
    fn default() -> Self {
        Self::Medium
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for RiskLevel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volatility_parse_is_case_insensitive() {
        assert_eq!(VolatilityState::parse("expanding"), VolatilityState::Expanding);
        assert_eq!(VolatilityState::parse(" Contracting "), VolatilityState::Contracting);
        assert_eq!(VolatilityState::parse(""), VolatilityState::Stable);
        assert_eq!(
            VolatilityState::parse("whipsaw"),
            VolatilityState::Other("WHIPSAW".to_string())
        );
    }

    #[test]
    fn test_risk_level_serializes_as_literal() {
        let v = serde_json::to_value(RiskLevel::parse("high")).unwrap();
        assert_eq!(v, "HIGH");
        let v = serde_json::to_value(RiskLevel::parse("extreme")).unwrap();
        assert_eq!(v, "EXTREME");
    }
}
