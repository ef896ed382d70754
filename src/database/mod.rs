use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use tracing::{info, warn};

use crate::attest::{verify_record, verify_record_with_key};
use crate::error::StoreError;
use crate::types::SignedPrediction;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Append-only ledger of attested predictions, keyed by `(symbol, timestamp)`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PredictionStore: Send + Sync {
    /// Rejects records that are unverified or fail re-verification, and any
    /// second record for the same `(symbol, timestamp)`.
    async fn append(&self, record: &SignedPrediction) -> StoreResult<()>;

    async fn get(&self, symbol: &str, timestamp: DateTime<Utc>)
        -> StoreResult<Option<SignedPrediction>>;

    /// All stored records for `symbol`, oldest first, exactly as persisted.
    async fn list(&self, symbol: &str) -> StoreResult<Vec<SignedPrediction>>;
}

/// Result of re-verifying every stored row for one symbol.
#[derive(Debug, Default)]
pub struct LedgerAudit {
    pub verified: Vec<SignedPrediction>,
    /// Rows that failed to decode or whose signature no longer verifies
    pub rejected: usize,
}

impl LedgerAudit {
    pub fn checked(&self) -> usize {
        self.verified.len() + self.rejected
    }
}

pub struct SqlitePredictionStore {
    pool: SqlitePool,
}

impl SqlitePredictionStore {
    /// Opens (creating if missing) the ledger at `database_url`.
    pub async fn new(database_url: &str) -> StoreResult<Self> {
        info!("Opening prediction ledger at: {}", database_url);

        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        // every connection to an in-memory database is a separate database
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.create_schema().await?;
        Ok(store)
    }

    async fn create_schema(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS predictions (
                prediction_id TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                regime TEXT NOT NULL,
                agent_id TEXT NOT NULL,
                public_key_hex TEXT NOT NULL,
                signature_hex TEXT NOT NULL,
                record_json TEXT NOT NULL,
                stored_at TEXT NOT NULL,
                UNIQUE (symbol, timestamp)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_predictions_symbol ON predictions(symbol, timestamp)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Records for `symbol` that still verify. Failures are logged and dropped.
    pub async fn list_verified(&self, symbol: &str) -> StoreResult<Vec<SignedPrediction>> {
        Ok(self.audit(symbol, None).await?.verified)
    }

    /// Re-verifies each stored row for `symbol` on its own, against the
    /// embedded public key or `trusted_public_key_hex` when given. A row that
    /// does not decode counts as rejected instead of failing the whole read.
    pub async fn audit(&self, symbol: &str, trusted_public_key_hex: Option<&str>) -> StoreResult<LedgerAudit> {
        let rows = sqlx::query(
            "SELECT prediction_id, timestamp, record_json FROM predictions WHERE symbol = ? ORDER BY timestamp",
        )
        .bind(symbol)
        .fetch_all(&self.pool)
        .await?;

        let mut audit = LedgerAudit::default();
        for row in &rows {
            let prediction_id: String = row.get("prediction_id");
            let timestamp: String = row.get("timestamp");

            let record: SignedPrediction = match serde_json::from_str(row.get("record_json")) {
                Ok(record) => record,
                Err(e) => {
                    warn!("Dropping {} prediction {} at {}: record does not decode: {}", symbol, prediction_id, timestamp, e);
                    audit.rejected += 1;
                    continue;
                }
            };

            let ok = match trusted_public_key_hex {
                Some(key) => verify_record_with_key(&record, key),
                None => verify_record(&record),
            };
            if ok {
                audit.verified.push(record);
            } else {
                warn!("Dropping {} prediction {} at {}: signature does not verify", symbol, prediction_id, timestamp);
                audit.rejected += 1;
            }
        }

        if audit.rejected > 0 {
            warn!("{}: {} of {} stored predictions rejected", symbol, audit.rejected, audit.checked());
        }
        Ok(audit)
    }

    /// Distinct symbols present in the ledger.
    pub async fn symbols(&self) -> StoreResult<Vec<String>> {
        let rows = sqlx::query("SELECT DISTINCT symbol FROM predictions ORDER BY symbol")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|row| row.get("symbol")).collect())
    }

    #[cfg(test)]
    async fn overwrite_json(&self, symbol: &str, timestamp: DateTime<Utc>, json: &str) -> StoreResult<()> {
        sqlx::query("UPDATE predictions SET record_json = ? WHERE symbol = ? AND timestamp = ?")
            .bind(json)
            .bind(symbol)
            .bind(timestamp.to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl PredictionStore for SqlitePredictionStore {
    async fn append(&self, record: &SignedPrediction) -> StoreResult<()> {
        if !record.signature_verified() {
            return Err(StoreError::Unverified);
        }
        if !verify_record(record) {
            return Err(StoreError::SignatureRejected);
        }

        let payload = record.payload();
        let result = sqlx::query(
            r#"
            INSERT INTO predictions (
                prediction_id, symbol, timestamp, regime, agent_id,
                public_key_hex, signature_hex, record_json, stored_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(payload.prediction_id.to_string())
        .bind(&payload.symbol)
        .bind(payload.timestamp.to_rfc3339())
        .bind(payload.regime.as_str())
        .bind(&payload.agent_id)
        .bind(record.public_key_hex())
        .bind(record.signature_hex())
        .bind(serde_json::to_string(record)?)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(StoreError::Duplicate {
                symbol: payload.symbol.clone(),
                timestamp: payload.timestamp,
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, symbol: &str, timestamp: DateTime<Utc>) -> StoreResult<Option<SignedPrediction>> {
        let row = sqlx::query("SELECT record_json FROM predictions WHERE symbol = ? AND timestamp = ?")
            .bind(symbol)
            .bind(timestamp.to_rfc3339())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(serde_json::from_str(row.get("record_json"))?)),
            None => Ok(None),
        }
    }

    async fn list(&self, symbol: &str) -> StoreResult<Vec<SignedPrediction>> {
        let rows = sqlx::query("SELECT record_json FROM predictions WHERE symbol = ? ORDER BY timestamp")
            .bind(symbol)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| serde_json::from_str(row.get("record_json")).map_err(StoreError::from))
            .collect()
    }
}
