//! Threshold classifier mapping one feature vector to a raw regime candidate.
//!
//! Thresholds are asymmetric: BULL needs a strong return near the trailing peak
//! with calm volatility, BEAR needs a weak return plus a meaningful drawdown.
//! A volatility spike overrides both as CRISIS.

use serde::{Deserialize, Serialize};

use crate::types::{FeatureVector, RawRegimeCandidate, RegimeLabel};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// BULL requires `return_z` above this
    pub bull_return_z: f64,
    /// BULL requires `drawdown_z` above this (near peak)
    pub bull_drawdown_z: f64,
    /// BULL requires `volatility_z` below this
    pub bull_volatility_z: f64,
    /// BEAR requires `return_z` below this
    pub bear_return_z: f64,
    /// BEAR requires `drawdown_z` below this
    pub bear_drawdown_z: f64,
    /// CRISIS when `volatility_z` exceeds this, regardless of other bands
    pub crisis_volatility_z: f64,
    /// Slope of the logistic used for class probabilities
    pub probability_steepness: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            bull_return_z: 1.0,
            bull_drawdown_z: -0.2,
            bull_volatility_z: 0.5,
            bear_return_z: -1.0,
            bear_drawdown_z: -0.5,
            crisis_volatility_z: 2.0,
            probability_steepness: 4.0,
        }
    }
}

impl ClassifierConfig {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.bear_return_z >= self.bull_return_z {
            errors.push("classifier: bear_return_z must be < bull_return_z".to_string());
        }
        if self.crisis_volatility_z <= self.bull_volatility_z {
            errors.push("classifier: crisis_volatility_z must be > bull_volatility_z".to_string());
        }
        if self.probability_steepness <= 0.0 || !self.probability_steepness.is_finite() {
            errors.push("classifier: probability_steepness must be > 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RegimeClassifier {
    config: ClassifierConfig,
}

impl RegimeClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Pure function of `features`; never consults prior state.
    pub fn classify(&self, features: &FeatureVector) -> RawRegimeCandidate {
        let label = self.label(features);
        let (prob_bull, prob_bear, prob_neutral) = self.probabilities(features);

        RawRegimeCandidate {
            symbol: features.symbol.clone(),
            timestamp: features.timestamp,
            label,
            prob_bull,
            prob_bear,
            prob_neutral,
        }
    }

    pub fn label(&self, features: &FeatureVector) -> RegimeLabel {
        let cfg = &self.config;
        let r = features.return_z;
        let d = features.drawdown_z;
        let v = features.volatility_z;

        if v > cfg.crisis_volatility_z {
            RegimeLabel::Crisis
        } else if r > cfg.bull_return_z && d > cfg.bull_drawdown_z && v < cfg.bull_volatility_z {
            RegimeLabel::Bull
        } else if r < cfg.bear_return_z && d < cfg.bear_drawdown_z {
            RegimeLabel::Bear
        } else {
            RegimeLabel::Neutral
        }
    }

    /// Class probabilities as normalised products of logistic distances to each
    /// band edge. Monotonic in every distance; sums to 1.
    pub fn probabilities(&self, features: &FeatureVector) -> (f64, f64, f64) {
        let cfg = &self.config;
        let k = cfg.probability_steepness;
        let r = features.return_z;
        let d = features.drawdown_z;
        let v = features.volatility_z;

        let bull = sigmoid(k * (r - cfg.bull_return_z))
            * sigmoid(k * (d - cfg.bull_drawdown_z))
            * sigmoid(k * (cfg.bull_volatility_z - v));
        let bear = sigmoid(k * (cfg.bear_return_z - r)) * sigmoid(k * (cfg.bear_drawdown_z - d));
        let neutral = (1.0 - bull) * (1.0 - bear);

        let total = bull + bear + neutral;
        if total > 0.0 && total.is_finite() {
            (bull / total, bear / total, neutral / total)
        } else {
            (0.0, 0.0, 1.0)
        }
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}
