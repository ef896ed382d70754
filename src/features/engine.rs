use serde::{Deserialize, Serialize};
use tracing::debug;

use super::zscore::{trailing_zscore, ZScore};
use crate::error::{RegimeError, Result};
use crate::indicators::{
    aligned_series, drawdown_from_peak, rate_of_change, simple_returns, BollingerBands,
    RealizedVolatility, MACD, RSI,
};
use crate::types::{check_series, closes, FeatureVector, PriceBar};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Trailing bars used for the z-score mean/stddev
    pub baseline_window: usize,
    /// Minimum defined raw values inside the baseline for a valid z-score
    pub min_baseline_periods: usize,
    pub return_period: usize,
    pub volatility_period: usize,
    pub drawdown_window: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub bollinger_period: usize,
    pub bollinger_std_dev: f64,
    pub rsi_period: usize,
    pub roc_period: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            baseline_window: 252,
            min_baseline_periods: 200,
            return_period: 10,
            volatility_period: 20,
            drawdown_window: 252,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            bollinger_period: 20,
            bollinger_std_dev: 2.0,
            rsi_period: 14,
            roc_period: 20,
        }
    }
}

impl FeatureConfig {
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.baseline_window < 2 {
            errors.push("features: baseline_window must be >= 2".to_string());
        }
        if self.min_baseline_periods < 2 || self.min_baseline_periods > self.baseline_window {
            errors.push("features: min_baseline_periods must be between 2 and baseline_window".to_string());
        }
        if self.macd_fast >= self.macd_slow {
            errors.push("features: macd_fast must be < macd_slow".to_string());
        }
        if self.bollinger_std_dev <= 0.0 || !self.bollinger_std_dev.is_finite() {
            errors.push("features: bollinger_std_dev must be > 0".to_string());
        }
        for (name, period) in [
            ("return_period", self.return_period),
            ("volatility_period", self.volatility_period),
            ("drawdown_window", self.drawdown_window),
            ("macd_signal", self.macd_signal),
            ("bollinger_period", self.bollinger_period),
            ("rsi_period", self.rsi_period),
            ("roc_period", self.roc_period),
        ] {
            if period == 0 {
                errors.push(format!("features: {} must be > 0", name));
            }
        }
        if self.volatility_period < 2 {
            errors.push("features: volatility_period must be >= 2".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Raw indicator series, each aligned with the input bars.
struct RawIndicators {
    returns: Vec<Option<f64>>,
    volatility: Vec<Option<f64>>,
    drawdown: Vec<Option<f64>>,
    macd_diff: Vec<Option<f64>>,
    bb_width: Vec<Option<f64>>,
    rsi: Vec<Option<f64>>,
    roc: Vec<Option<f64>>,
}

impl RawIndicators {
    fn as_array(&self) -> [&[Option<f64>]; 7] {
        [
            &self.returns,
            &self.volatility,
            &self.drawdown,
            &self.macd_diff,
            &self.bb_width,
            &self.rsi,
            &self.roc,
        ]
    }
}

/// Converts a price history into z-scored feature vectors.
///
/// Stateless between calls: every call recomputes from the supplied slice.
#[derive(Debug, Clone)]
pub struct FeatureEngine {
    config: FeatureConfig,
}

impl FeatureEngine {
    pub fn new(config: FeatureConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    /// One vector per bar at index >= `baseline_window`, in input order.
    /// Vectors whose baseline is too thin come back with `is_valid = false`.
    pub fn compute(&self, bars: &[PriceBar]) -> Result<Vec<FeatureVector>> {
        self.compute_from(bars, self.config.baseline_window)
    }

    /// Vectors for bars at index >= `start` (and >= `baseline_window`).
    pub fn compute_from(&self, bars: &[PriceBar], start: usize) -> Result<Vec<FeatureVector>> {
        validate(bars)?;

        let window = self.config.baseline_window;
        if bars.len() <= window {
            debug!(
                "{} bars below baseline window {}, no features",
                bars.len(),
                window
            );
            return Ok(Vec::new());
        }

        let raw = self.raw_indicators(bars);
        Ok((start.max(window)..bars.len())
            .map(|i| self.standardize(&raw, &bars[i], i))
            .collect())
    }

    /// The vector for a single bar.
    pub fn compute_at(&self, bars: &[PriceBar], index: usize) -> Result<FeatureVector> {
        let window = self.config.baseline_window;
        if index < window || index >= bars.len() {
            return Err(RegimeError::InsufficientHistory {
                symbol: bars.first().map(|b| b.symbol.clone()).unwrap_or_default(),
                index,
                required: window + 1,
            });
        }
        let history = &bars[..=index];
        validate(history)?;

        let raw = self.raw_indicators(history);
        Ok(self.standardize(&raw, &history[index], index))
    }

    fn raw_indicators(&self, bars: &[PriceBar]) -> RawIndicators {
        let cfg = &self.config;
        let closes = closes(bars);

        let mut volatility = RealizedVolatility::new(cfg.volatility_period);
        let mut macd = MACD::new(cfg.macd_fast, cfg.macd_slow, cfg.macd_signal);
        let mut bollinger = BollingerBands::new(cfg.bollinger_period, cfg.bollinger_std_dev);
        let mut rsi = RSI::new(cfg.rsi_period);

        RawIndicators {
            returns: simple_returns(&closes, cfg.return_period),
            volatility: aligned_series(&closes, |p| volatility.update(p)),
            drawdown: drawdown_from_peak(&closes, cfg.drawdown_window),
            macd_diff: aligned_series(&closes, |p| macd.update(p).map(|m| m.histogram)),
            bb_width: aligned_series(&closes, |p| {
                bollinger.update(p).map(|b| b.width).filter(|w| w.is_finite())
            }),
            rsi: aligned_series(&closes, |p| rsi.update(p)),
            roc: rate_of_change(&closes, cfg.roc_period),
        }
    }

    fn standardize(&self, raw: &RawIndicators, bar: &PriceBar, index: usize) -> FeatureVector {
        let cfg = &self.config;
        let scores = raw
            .as_array()
            .map(|series| trailing_zscore(series, index, cfg.baseline_window, cfg.min_baseline_periods));

        let sufficient = scores.iter().all(|z| z.is_sufficient());
        let all_degenerate = scores.iter().all(|z| matches!(z, ZScore::Degenerate));
        let is_valid = sufficient && !all_degenerate;

        if !is_valid {
            debug!(
                "{} {}: feature vector invalid (sufficient={}, degenerate={})",
                bar.symbol, bar.timestamp, sufficient, all_degenerate
            );
        }

        let [return_z, volatility_z, drawdown_z, macd_diff_z, bb_width_z, rsi_z, roc_z] =
            scores.map(|z| z.value());

        FeatureVector {
            symbol: bar.symbol.clone(),
            timestamp: bar.timestamp,
            return_z,
            volatility_z,
            drawdown_z,
            macd_diff_z,
            bb_width_z,
            rsi_z,
            roc_z,
            is_valid,
        }
    }
}

impl Default for FeatureEngine {
    fn default() -> Self {
        Self::new(FeatureConfig::default())
    }
}

fn validate(bars: &[PriceBar]) -> Result<()> {
    check_series(bars).map_err(|reason| RegimeError::InvalidSeries {
        symbol: bars.first().map(|b| b.symbol.clone()).unwrap_or_default(),
        reason,
    })
}
