use std::f64::consts::PI;

use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rust_decimal::Decimal;

use crate::types::PriceBar;

const START_PRICE: f64 = 100.0;

/// A run of bars with constant drift and volatility per bar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub bars: usize,
    pub drift: f64,
    pub volatility: f64,
}

impl Segment {
    pub fn new(bars: usize, drift: f64, volatility: f64) -> Self {
        Self { bars, drift, volatility }
    }
}

/// Seeded, gap-free daily bar generator. The same seed always yields the same bars.
#[derive(Debug, Clone)]
pub struct SyntheticSeries {
    symbol: String,
    seed: u64,
    start: DateTime<Utc>,
    segments: Vec<Segment>,
}

impl SyntheticSeries {
    pub fn new(symbol: &str, seed: u64) -> Self {
        Self {
            symbol: symbol.to_string(),
            seed,
            start: Utc.with_ymd_and_hms(2023, 1, 2, 0, 0, 0).unwrap(),
            segments: Vec::new(),
        }
    }

    /// 253 quiet bars followed by a 90-bar low-volatility rally.
    pub fn rally_scenario(symbol: &str, seed: u64) -> Self {
        Self::new(symbol, seed)
            .segment(Segment::new(253, 0.0003, 0.020))
            .segment(Segment::new(90, 0.025, 0.010))
    }

    pub fn segment(mut self, segment: Segment) -> Self {
        self.segments.push(segment);
        self
    }

    pub fn len(&self) -> usize {
        self.segments.iter().map(|s| s.bars).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn generate(&self) -> Vec<PriceBar> {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut bars = Vec::with_capacity(self.len());
        let mut close = START_PRICE;
        let mut index = 0i64;

        for segment in &self.segments {
            for _ in 0..segment.bars {
                let open = close;
                if index > 0 {
                    let shock = sample_normal(&mut rng);
                    close = (open * (1.0 + segment.drift + segment.volatility * shock)).max(0.01);
                }
                let wick = segment.volatility * rng.gen::<f64>() * 0.5;
                let high = open.max(close) * (1.0 + wick);
                let low = open.min(close) * (1.0 - wick);
                let volume = 1_000_000.0 * (0.5 + rng.gen::<f64>());

                bars.push(PriceBar {
                    symbol: self.symbol.clone(),
                    timestamp: self.start + Duration::days(index),
                    open: to_decimal(open),
                    high: to_decimal(high),
                    low: to_decimal(low),
                    close: to_decimal(close),
                    volume: to_decimal(volume.round()),
                });
                index += 1;
            }
        }

        bars
    }
}

fn to_decimal(value: f64) -> Decimal {
    Decimal::try_from(value).unwrap_or_default().round_dp(6)
}

/// Standard normal sample using the Box-Muller transform.
fn sample_normal(rng: &mut ChaCha8Rng) -> f64 {
    let u1: f64 = 1.0 - rng.gen::<f64>();
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}
