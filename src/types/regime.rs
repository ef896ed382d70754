use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Market regime labels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegimeLabel {
    Bull,
    Bear,
    Neutral,
    Crisis,
}

impl RegimeLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegimeLabel::Bull => "BULL",
            RegimeLabel::Bear => "BEAR",
            RegimeLabel::Neutral => "NEUTRAL",
            RegimeLabel::Crisis => "CRISIS",
        }
    }

    pub fn all() -> [RegimeLabel; 4] {
        [
            RegimeLabel::Bull,
            RegimeLabel::Bear,
            RegimeLabel::Neutral,
            RegimeLabel::Crisis,
        ]
    }
}

impl fmt::Display for RegimeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for RegimeLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "BULL" => Ok(RegimeLabel::Bull),
            "BEAR" => Ok(RegimeLabel::Bear),
            "NEUTRAL" => Ok(RegimeLabel::Neutral),
            "CRISIS" => Ok(RegimeLabel::Crisis),
            other => Err(format!("unknown regime label: {}", other)),
        }
    }
}

/// Standardized signals for one bar. Every `*_z` field is a z-score of the raw
/// indicator against its trailing baseline window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub return_z: f64,
    pub volatility_z: f64,
    pub drawdown_z: f64,
    pub macd_diff_z: f64,
    pub bb_width_z: f64,
    pub rsi_z: f64,
    pub roc_z: f64,
    pub is_valid: bool,
}

impl FeatureVector {
    pub fn values(&self) -> [f64; 7] {
        [
            self.return_z,
            self.volatility_z,
            self.drawdown_z,
            self.macd_diff_z,
            self.bb_width_z,
            self.rsi_z,
            self.roc_z,
        ]
    }
}

/// Per-bar classification before persistence filtering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRegimeCandidate {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub label: RegimeLabel,
    pub prob_bull: f64,
    pub prob_bear: f64,
    pub prob_neutral: f64,
}

impl RawRegimeCandidate {
    pub fn probability_sum(&self) -> f64 {
        self.prob_bull + self.prob_bear + self.prob_neutral
    }
}
