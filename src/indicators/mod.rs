pub mod ema;
pub mod rsi;
pub mod macd;
pub mod bollinger;
pub mod returns;

pub use ema::*;
pub use rsi::*;
pub use macd::*;
pub use bollinger::*;
pub use returns::*;

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation.
pub fn population_stddev(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    Some(variance.sqrt())
}

/// Sample standard deviation (n - 1 denominator).
pub fn sample_stddev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(variance.sqrt())
}

/// Runs a streaming update function over `prices`, keeping the output aligned
/// with the input (`None` until the indicator is warm).
pub fn aligned_series<F>(prices: &[f64], mut update: F) -> Vec<Option<f64>>
where
    F: FnMut(f64) -> Option<f64>,
{
    prices.iter().map(|p| update(*p)).collect()
}
