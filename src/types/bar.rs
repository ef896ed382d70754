use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One OHLCV bar for a symbol. Bars are immutable once ingested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl PriceBar {
    pub fn close_f64(&self) -> f64 {
        self.close.try_into().unwrap_or(f64::NAN)
    }
}

/// Checks that a slice holds bars of a single symbol in strictly increasing
/// timestamp order. Returns a description of the first violation.
pub fn check_series(bars: &[PriceBar]) -> Result<(), String> {
    let Some(first) = bars.first() else {
        return Ok(());
    };

    for (i, pair) in bars.windows(2).enumerate() {
        let (prev, curr) = (&pair[0], &pair[1]);
        if curr.symbol != first.symbol {
            return Err(format!(
                "bar {} belongs to {} but series is {}",
                i + 1,
                curr.symbol,
                first.symbol
            ));
        }
        if curr.timestamp <= prev.timestamp {
            return Err(format!(
                "bar {} at {} is not after {}",
                i + 1,
                curr.timestamp,
                prev.timestamp
            ));
        }
    }
    Ok(())
}

pub fn closes(bars: &[PriceBar]) -> Vec<f64> {
    bars.iter().map(|b| b.close_f64()).collect()
}
