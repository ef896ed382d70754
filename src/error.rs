use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors raised by the classification and attestation core.
#[derive(Debug, Error)]
pub enum RegimeError {
    /// Baseline window not yet full for the requested bar.
    #[error("{symbol}: insufficient history at bar {index}, need at least {required} bars")]
    InsufficientHistory {
        symbol: String,
        index: usize,
        required: usize,
    },

    /// Input bars are not a single-symbol, strictly increasing sequence.
    #[error("{symbol}: invalid price series: {reason}")]
    InvalidSeries { symbol: String, reason: String },

    #[error("{symbol}: candidate at {received} is not after last seen {last_seen}")]
    OutOfOrderInput {
        symbol: String,
        last_seen: DateTime<Utc>,
        received: DateTime<Utc>,
    },

    #[error("{symbol}: gap between {last_seen} and {received} exceeds {max_gap_secs}s")]
    SequenceGap {
        symbol: String,
        last_seen: DateTime<Utc>,
        received: DateTime<Utc>,
        max_gap_secs: i64,
    },

    /// The filter refused input after an earlier fatal error.
    #[error("{symbol}: persistence filter halted after a fatal error, reset required")]
    FilterHalted { symbol: String },

    /// A freshly produced signature did not verify. Never retried.
    #[error("{symbol}: self-verification failed for prediction at {timestamp}")]
    SelfVerificationFailure {
        symbol: String,
        timestamp: DateTime<Utc>,
    },

    #[error("payload field {field} is not a finite number")]
    NonFinitePayload { field: &'static str },

    #[error("payload canonicalization failed: {0}")]
    Canonicalization(#[from] serde_json::Error),

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("invalid configuration: {}", .0.join(", "))]
    Config(Vec<String>),
}

impl RegimeError {
    /// Fatal errors halt the symbol's pipeline; the rest are handled locally.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RegimeError::OutOfOrderInput { .. }
                | RegimeError::SequenceGap { .. }
                | RegimeError::FilterHalted { .. }
                | RegimeError::SelfVerificationFailure { .. }
                | RegimeError::InvalidSeries { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, RegimeError>;

/// Errors raised by the prediction ledger.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record is not marked signature_verified")]
    Unverified,

    #[error("record signature does not verify against its public key")]
    SignatureRejected,

    #[error("prediction for {symbol} at {timestamp} already stored")]
    Duplicate {
        symbol: String,
        timestamp: DateTime<Utc>,
    },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("record serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}
