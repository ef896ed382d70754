use crate::indicators::{mean, sample_stddev};

/// Outcome of standardizing one raw indicator value against its baseline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ZScore {
    Value(f64),
    /// Baseline has zero (or non-finite) spread. Reported as 0.0.
    Degenerate,
    /// Not enough defined baseline observations, or the current value is undefined.
    Insufficient,
}

impl ZScore {
    pub fn value(&self) -> f64 {
        match self {
            ZScore::Value(z) => *z,
            ZScore::Degenerate | ZScore::Insufficient => 0.0,
        }
    }

    pub fn is_sufficient(&self) -> bool {
        !matches!(self, ZScore::Insufficient)
    }
}

/// Standardizes `series[index]` against the trailing `window` entries ending at
/// `index` (inclusive). Undefined entries in the window are skipped.
pub fn trailing_zscore(
    series: &[Option<f64>],
    index: usize,
    window: usize,
    min_periods: usize,
) -> ZScore {
    let Some(current) = series.get(index).copied().flatten().filter(|v| v.is_finite()) else {
        return ZScore::Insufficient;
    };

    let start = (index + 1).saturating_sub(window);
    let baseline: Vec<f64> = series[start..=index]
        .iter()
        .filter_map(|v| *v)
        .filter(|v| v.is_finite())
        .collect();

    if baseline.len() < min_periods.max(2) {
        return ZScore::Insufficient;
    }

    match (mean(&baseline), sample_stddev(&baseline)) {
        (Some(m), Some(sd)) if sd > 0.0 && sd.is_finite() => ZScore::Value((current - m) / sd),
        _ => ZScore::Degenerate,
    }
}
