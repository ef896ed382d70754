use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use std::sync::Arc;
use tracing::{debug, error};

use super::canonical::canonical_bytes;
use super::clock::Clock;
use super::keys::KeyPair;
use super::verifier;
use crate::error::{RegimeError, Result};
use crate::types::{PredictionDraft, PredictionPayload, SignedPrediction};

/// Signs prediction drafts under one agent identity.
///
/// Every signature is checked against the public key before the record is
/// returned; a record that fails its own check is never handed out.
pub struct AttestationSigner {
    agent_id: String,
    keys: KeyPair,
    clock: Arc<dyn Clock>,
}

impl AttestationSigner {
    pub fn new(agent_id: impl Into<String>, keys: KeyPair, clock: Arc<dyn Clock>) -> Self {
        Self {
            agent_id: agent_id.into(),
            keys,
            clock,
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn public_key_hex(&self) -> String {
        self.keys.public_key_hex()
    }

    pub fn fingerprint(&self) -> String {
        self.keys.fingerprint()
    }

    pub fn sign(&self, draft: PredictionDraft) -> Result<SignedPrediction> {
        let payload = draft.into_payload(&self.agent_id, self.clock.now());
        seal(payload, self.keys.signing_key(), &self.keys.verifying_key())
    }
}

impl std::fmt::Debug for AttestationSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttestationSigner")
            .field("agent_id", &self.agent_id)
            .field("keys", &self.keys)
            .finish()
    }
}

fn seal(
    payload: PredictionPayload,
    signing_key: &SigningKey,
    verifying_key: &VerifyingKey,
) -> Result<SignedPrediction> {
    let message = canonical_bytes(&payload)?;
    let signature = signing_key.sign(&message);
    let signature_hex = hex::encode(signature.to_bytes());
    let public_key_hex = hex::encode(verifying_key.to_bytes());

    if !verifier::verify(&payload, &signature_hex, &public_key_hex) {
        error!(
            "Self-verification failed for {} at {}, prediction discarded",
            payload.symbol, payload.timestamp
        );
        return Err(RegimeError::SelfVerificationFailure {
            symbol: payload.symbol,
            timestamp: payload.timestamp,
        });
    }

    debug!(
        "Signed {} {} prediction {} ({} bytes)",
        payload.symbol,
        payload.regime,
        payload.prediction_id,
        message.len()
    );
    Ok(SignedPrediction::verified(payload, signature_hex, public_key_hex))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attest::canonical::tests::sample_payload;
    use crate::attest::FixedClock;
    use chrono::{Duration, TimeZone, Utc};

    fn draft_from_sample() -> PredictionDraft {
        let p = sample_payload();
        PredictionDraft {
            symbol: p.symbol,
            timestamp: p.timestamp,
            regime: p.regime,
            probabilities: p.probabilities,
            features: p.features,
            trigger: p.trigger,
        }
    }

    #[test]
    fn test_sign_stamps_identity_and_clock() {
        let issued = Utc.with_ymd_and_hms(2024, 3, 1, 21, 5, 0).unwrap();
        let clock = Arc::new(FixedClock::new(issued));
        let signer = AttestationSigner::new("agent-7", KeyPair::generate(), clock.clone());

        let first = signer.sign(draft_from_sample()).unwrap();
        assert!(first.signature_verified());
        assert_eq!(first.payload().agent_id, "agent-7");
        assert_eq!(first.payload().issued_at, issued);
        assert_eq!(first.public_key_hex(), signer.public_key_hex());
        assert_eq!(first.signature_hex().len(), 128);

        clock.advance(Duration::seconds(30));
        let second = signer.sign(draft_from_sample()).unwrap();
        assert_eq!(second.payload().issued_at, issued + Duration::seconds(30));
        assert_ne!(first.payload().prediction_id, second.payload().prediction_id);
    }

    #[test]
    fn test_mismatched_key_fails_self_verification() {
        let signing = KeyPair::generate();
        let other = KeyPair::generate();
        let err = seal(sample_payload(), signing.signing_key(), &other.verifying_key()).unwrap_err();
        assert!(matches!(err, RegimeError::SelfVerificationFailure { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_non_finite_draft_is_not_signed() {
        let signer = AttestationSigner::new(
            "agent",
            KeyPair::generate(),
            Arc::new(FixedClock::new(Utc::now())),
        );
        let mut draft = draft_from_sample();
        draft.features.volatility_z = f64::INFINITY;
        assert!(matches!(
            signer.sign(draft),
            Err(RegimeError::NonFinitePayload { field: "features.volatility_z" })
        ));
    }

    #[test]
    fn test_debug_hides_secret() {
        let keys = KeyPair::from_secret_hex(&"42".repeat(32)).unwrap();
        let signer = AttestationSigner::new("agent", keys, Arc::new(FixedClock::new(Utc::now())));
        let debug = format!("{:?}", signer);
        assert!(!debug.contains(&"42".repeat(32)));
        assert!(debug.contains("agent"));
    }
}
