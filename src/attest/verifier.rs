//! Stateless signature checks for stored predictions.
//!
//! Every function here returns `false` on any malformed input instead of
//! erroring. A `false` means the record must not be trusted.

use ed25519_dalek::{Signature, VerifyingKey, PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH};

use super::canonical::canonical_bytes;
use crate::types::{PredictionPayload, SignedPrediction};

pub const PUBLIC_KEY_HEX_LEN: usize = PUBLIC_KEY_LENGTH * 2;
pub const SIGNATURE_HEX_LEN: usize = SIGNATURE_LENGTH * 2;

/// Rebuilds the canonical bytes of `payload` and checks the signature.
pub fn verify(payload: &PredictionPayload, signature_hex: &str, public_key_hex: &str) -> bool {
    match canonical_bytes(payload) {
        Ok(bytes) => verify_canonical(&bytes, signature_hex, public_key_hex),
        Err(_) => false,
    }
}

/// Checks a signature over already-canonical bytes.
pub fn verify_canonical(message: &[u8], signature_hex: &str, public_key_hex: &str) -> bool {
    let Some(key_bytes) = decode_lower_hex::<PUBLIC_KEY_LENGTH>(public_key_hex) else {
        return false;
    };
    let Some(sig_bytes) = decode_lower_hex::<SIGNATURE_LENGTH>(signature_hex) else {
        return false;
    };
    let Ok(verifying_key) = VerifyingKey::from_bytes(&key_bytes) else {
        return false;
    };
    let signature = Signature::from_bytes(&sig_bytes);
    verifying_key.verify_strict(message, &signature).is_ok()
}

/// Full consumer-side check of a stored record against its embedded key.
pub fn verify_record(record: &SignedPrediction) -> bool {
    record.signature_verified()
        && verify(record.payload(), record.signature_hex(), record.public_key_hex())
}

/// As [`verify_record`], additionally requiring the record to be signed by
/// `trusted_public_key_hex`.
pub fn verify_record_with_key(record: &SignedPrediction, trusted_public_key_hex: &str) -> bool {
    record.public_key_hex() == trusted_public_key_hex && verify_record(record)
}

fn decode_lower_hex<const N: usize>(text: &str) -> Option<[u8; N]> {
    if text.len() != N * 2 || !text.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
        return None;
    }
    let decoded = hex::decode(text).ok()?;
    decoded.as_slice().try_into().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attest::canonical::tests::sample_payload;
    use crate::attest::{AttestationSigner, FixedClock, KeyPair};
    use crate::types::{PredictionDraft, RegimeLabel};
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    fn signer() -> AttestationSigner {
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 22, 0, 0).unwrap());
        AttestationSigner::new("regime-agent", KeyPair::generate(), Arc::new(clock))
    }

    fn draft() -> PredictionDraft {
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
    fn test_sign_then_verify_round_trip() {
        let signer = signer();
        for regime in RegimeLabel::all() {
            let mut d = draft();
            d.regime = regime;
            let signed = signer.sign(d).unwrap();
            assert!(verify(signed.payload(), signed.signature_hex(), signed.public_key_hex()));
            assert!(verify_record(&signed));
            assert!(verify_record_with_key(&signed, &signer.public_key_hex()));
        }
    }

    #[test]
    fn test_any_flipped_byte_fails() {
        let signed = signer().sign(draft()).unwrap();
        let bytes = canonical_bytes(signed.payload()).unwrap();
        assert!(verify_canonical(&bytes, signed.signature_hex(), signed.public_key_hex()));

        for i in 0..bytes.len() {
            let mut tampered = bytes.clone();
            tampered[i] ^= 0x01;
            assert!(
                !verify_canonical(&tampered, signed.signature_hex(), signed.public_key_hex()),
                "flip at byte {} still verified",
                i
            );
        }
    }

    #[test]
    fn test_tampered_payload_fails() {
        let signed = signer().sign(draft()).unwrap();
        let mut payload = signed.payload().clone();
        payload.regime = RegimeLabel::Bear;
        assert!(!verify(&payload, signed.signature_hex(), signed.public_key_hex()));

        let mut payload = signed.payload().clone();
        payload.probabilities.bull += 1e-12;
        assert!(!verify(&payload, signed.signature_hex(), signed.public_key_hex()));
    }

    #[test]
    fn test_bad_key_lengths_return_false() {
        let signed = signer().sign(draft()).unwrap();
        let pk = signed.public_key_hex();
        let sig = signed.signature_hex();
        let payload = signed.payload();

        assert!(!verify(payload, sig, ""));
        assert!(!verify(payload, sig, &pk[..62]));
        assert!(!verify(payload, sig, &format!("{}00", pk)));
        assert!(!verify(payload, sig, &"zz".repeat(32)));
        assert!(!verify(payload, sig, &pk.to_uppercase()));
        assert!(!verify(payload, &sig[..126], pk));
        assert!(!verify(payload, "", pk));
        assert!(!verify(payload, &"g".repeat(128), pk));
    }

    #[test]
    fn test_wrong_key_fails() {
        let signed = signer().sign(draft()).unwrap();
        let other = KeyPair::generate().public_key_hex();
        assert!(!verify(signed.payload(), signed.signature_hex(), &other));
        assert!(!verify_record_with_key(&signed, &other));
    }

    #[test]
    fn test_unverified_flag_is_rejected() {
        let signed = signer().sign(draft()).unwrap();
        let mut json = serde_json::to_value(&signed).unwrap();
        json["signature_verified"] = serde_json::Value::Bool(false);
        let forged: SignedPrediction = serde_json::from_value(json).unwrap();
        assert!(!verify_record(&forged));
    }
}
