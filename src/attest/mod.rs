//! Ed25519 attestation of confirmed regime predictions.

pub mod canonical;
pub mod clock;
pub mod keys;
pub mod signer;
pub mod verifier;

pub use canonical::{canonical_bytes, canonical_string};
pub use clock::{Clock, FixedClock, SystemClock};
pub use keys::KeyPair;
pub use signer::AttestationSigner;
pub use verifier::{verify, verify_canonical, verify_record, verify_record_with_key};
