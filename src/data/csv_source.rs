use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

use super::PriceSource;
use crate::types::{check_series, PriceBar};

#[derive(Debug, Deserialize)]
struct CsvRow {
    timestamp: DateTime<Utc>,
    open: String,
    high: String,
    low: String,
    close: String,
    volume: String,
}

fn parse_decimal(field: &str, value: &str) -> Result<Decimal> {
    Decimal::from_str(value.trim()).with_context(|| format!("{} is not a decimal: {:?}", field, value))
}

/// Reads `<dir>/<SYMBOL>.csv` files with a
/// `timestamp,open,high,low,close,volume` header and RFC 3339 timestamps.
#[derive(Debug, Clone)]
pub struct CsvPriceSource {
    dir: PathBuf,
}

impl CsvPriceSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, symbol: &str) -> PathBuf {
        self.dir.join(format!("{}.csv", symbol))
    }

    pub fn read_file(symbol: &str, path: &Path) -> Result<Vec<PriceBar>> {
        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("failed to open {}", path.display()))?;

        let mut bars = Vec::new();
        for (line, row) in reader.deserialize::<CsvRow>().enumerate() {
            let context = || format!("{}: bad row {}", path.display(), line + 2);
            let row = row.with_context(context)?;
            bars.push(PriceBar {
                symbol: symbol.to_string(),
                timestamp: row.timestamp,
                open: parse_decimal("open", &row.open).with_context(context)?,
                high: parse_decimal("high", &row.high).with_context(context)?,
                low: parse_decimal("low", &row.low).with_context(context)?,
                close: parse_decimal("close", &row.close).with_context(context)?,
                volume: parse_decimal("volume", &row.volume).with_context(context)?,
            });
        }

        check_series(&bars).map_err(|reason| anyhow::anyhow!("{}: {}", path.display(), reason))?;
        debug!("Loaded {} bars for {} from {}", bars.len(), symbol, path.display());
        Ok(bars)
    }
}

#[async_trait]
impl PriceSource for CsvPriceSource {
    async fn fetch_bars(&self, symbol: &str) -> Result<Vec<PriceBar>> {
        let path = self.path_for(symbol);
        let owned = symbol.to_string();
        tokio::task::spawn_blocking(move || Self::read_file(&owned, &path))
            .await
            .context("csv reader task panicked")?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Write;

    fn write_csv(dir: &Path, symbol: &str, body: &str) {
        let mut file = std::fs::File::create(dir.join(format!("{}.csv", symbol))).unwrap();
        file.write_all(body.as_bytes()).unwrap();
    }

    #[tokio::test]
    async fn test_reads_bars() {
        let dir = tempfile::tempdir().unwrap();
        write_csv(
            dir.path(),
            "SPY",
            "timestamp,open,high,low,close,volume\n\
             2024-01-02T00:00:00Z,470.1,473.0,469.5,472.65,1000\n\
             2024-01-03T00:00:00Z,472.65,474.2,468.0,468.79,1200\n",
        );

        let source = CsvPriceSource::new(dir.path());
        let bars = source.fetch_bars("SPY").await.unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].symbol, "SPY");
        assert_eq!(bars[1].close, dec!(468.79));
    }

    #[tokio::test]
    async fn test_rejects_unordered_file() {
        let dir = tempfile::tempdir().unwrap();
        write_csv(
            dir.path(),
            "SPY",
            "timestamp,open,high,low,close,volume\n\
             2024-01-03T00:00:00Z,1,1,1,1,1\n\
             2024-01-02T00:00:00Z,1,1,1,1,1\n",
        );
        let source = CsvPriceSource::new(dir.path());
        assert!(source.fetch_bars("SPY").await.is_err());
        assert!(source.fetch_bars("MISSING").await.is_err());
    }
}
