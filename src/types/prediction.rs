use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{FeatureVector, RawRegimeCandidate, RegimeLabel};

/// Version of the canonical payload schema. Any change to field names or
/// layout in this module requires a bump.
pub const PAYLOAD_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegimeProbabilities {
    pub bull: f64,
    pub bear: f64,
    pub neutral: f64,
}

impl From<&RawRegimeCandidate> for RegimeProbabilities {
    fn from(candidate: &RawRegimeCandidate) -> Self {
        Self {
            bull: candidate.prob_bull,
            bear: candidate.prob_bear,
            neutral: candidate.prob_neutral,
        }
    }
}

/// The z-scores that produced a prediction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureSnapshot {
    pub return_z: f64,
    pub volatility_z: f64,
    pub drawdown_z: f64,
    pub macd_diff_z: f64,
    pub bb_width_z: f64,
    pub rsi_z: f64,
    pub roc_z: f64,
}

impl From<&FeatureVector> for FeatureSnapshot {
    fn from(fv: &FeatureVector) -> Self {
        Self {
            return_z: fv.return_z,
            volatility_z: fv.volatility_z,
            drawdown_z: fv.drawdown_z,
            macd_diff_z: fv.macd_diff_z,
            bb_width_z: fv.bb_width_z,
            rsi_z: fv.rsi_z,
            roc_z: fv.roc_z,
        }
    }
}

/// Why a prediction was emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PredictionTrigger {
    /// A confirmed regime change.
    Transition {
        from: RegimeLabel,
        candidate_run: u32,
    },
    /// Periodic re-attestation of a regime that is still holding.
    Reattestation {
        held_since: DateTime<Utc>,
        bars_since_transition: u32,
    },
}

/// Everything that gets signed. Signature fields live on [`SignedPrediction`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionPayload {
    pub schema_version: u32,
    pub prediction_id: Uuid,
    pub agent_id: String,
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub issued_at: DateTime<Utc>,
    pub regime: RegimeLabel,
    pub probabilities: RegimeProbabilities,
    pub features: FeatureSnapshot,
    pub trigger: PredictionTrigger,
}

/// Unsigned prediction handed to the signer. The signer fills in identity and
/// issue time from its own agent id and clock.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionDraft {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub regime: RegimeLabel,
    pub probabilities: RegimeProbabilities,
    pub features: FeatureSnapshot,
    pub trigger: PredictionTrigger,
}

impl PredictionDraft {
    pub fn new(
        features: &FeatureVector,
        candidate: &RawRegimeCandidate,
        regime: RegimeLabel,
        trigger: PredictionTrigger,
    ) -> Self {
        Self {
            symbol: candidate.symbol.clone(),
            timestamp: candidate.timestamp,
            regime,
            probabilities: RegimeProbabilities::from(candidate),
            features: FeatureSnapshot::from(features),
            trigger,
        }
    }

    pub fn into_payload(self, agent_id: &str, issued_at: DateTime<Utc>) -> PredictionPayload {
        PredictionPayload {
            schema_version: PAYLOAD_SCHEMA_VERSION,
            prediction_id: Uuid::new_v4(),
            agent_id: agent_id.to_string(),
            symbol: self.symbol,
            timestamp: self.timestamp,
            issued_at,
            regime: self.regime,
            probabilities: self.probabilities,
            features: self.features,
            trigger: self.trigger,
        }
    }
}

/// An attested prediction. Only the attestation signer constructs these, and
/// only after the signature has verified against the embedded public key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedPrediction {
    #[serde(flatten)]
    payload: PredictionPayload,
    signature_hex: String,
    public_key_hex: String,
    signature_verified: bool,
}

impl SignedPrediction {
    pub(crate) fn verified(
        payload: PredictionPayload,
        signature_hex: String,
        public_key_hex: String,
    ) -> Self {
        Self {
            payload,
            signature_hex,
            public_key_hex,
            signature_verified: true,
        }
    }

    pub fn payload(&self) -> &PredictionPayload {
        &self.payload
    }

    pub fn symbol(&self) -> &str {
        &self.payload.symbol
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.payload.timestamp
    }

    pub fn regime(&self) -> RegimeLabel {
        self.payload.regime
    }

    pub fn signature_hex(&self) -> &str {
        &self.signature_hex
    }

    pub fn public_key_hex(&self) -> &str {
        &self.public_key_hex
    }

    pub fn signature_verified(&self) -> bool {
        self.signature_verified
    }
}
