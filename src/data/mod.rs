pub mod csv_source;
pub mod synthetic;

pub use csv_source::CsvPriceSource;
pub use synthetic::{Segment, SyntheticSeries};

use async_trait::async_trait;
use std::collections::HashMap;

use crate::types::PriceBar;

/// Upstream price supplier. Implementations deliver bars already deduplicated
/// and gap-checked; the core never repairs a series.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn fetch_bars(&self, symbol: &str) -> anyhow::Result<Vec<PriceBar>>;
}

/// Serves seeded synthetic series, one per registered symbol.
#[derive(Debug, Clone, Default)]
pub struct SyntheticPriceSource {
    series: HashMap<String, SyntheticSeries>,
}

impl SyntheticPriceSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_series(mut self, symbol: &str, series: SyntheticSeries) -> Self {
        self.series.insert(symbol.to_string(), series);
        self
    }
}

#[async_trait]
impl PriceSource for SyntheticPriceSource {
    async fn fetch_bars(&self, symbol: &str) -> anyhow::Result<Vec<PriceBar>> {
        self.series
            .get(symbol)
            .map(|s| s.generate())
            .ok_or_else(|| anyhow::anyhow!("no synthetic series registered for {}", symbol))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_synthetic_source_serves_registered_symbols() {
        let source = SyntheticPriceSource::new()
            .with_series("SPY", SyntheticSeries::rally_scenario("SPY", 1));
        let bars = source.fetch_bars("SPY").await.unwrap();
        assert_eq!(bars.len(), 343);
        assert!(source.fetch_bars("QQQ").await.is_err());
    }
}
