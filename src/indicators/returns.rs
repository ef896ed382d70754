use std::collections::VecDeque;

use super::sample_stddev;

/// `close[i] / close[i - period] - 1`, aligned with the input.
pub fn simple_returns(closes: &[f64], period: usize) -> Vec<Option<f64>> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            if period == 0 || i < period {
                return None;
            }
            let past = closes[i - period];
            if past > 0.0 && close.is_finite() {
                Some(close / past - 1.0)
            } else {
                None
            }
        })
        .collect()
}

/// Rate of change in percent.
pub fn rate_of_change(closes: &[f64], period: usize) -> Vec<Option<f64>> {
    simple_returns(closes, period)
        .into_iter()
        .map(|r| r.map(|r| r * 100.0))
        .collect()
}

/// `close[i] / max(trailing window) - 1`, always <= 0.
pub fn drawdown_from_peak(closes: &[f64], window: usize) -> Vec<Option<f64>> {
    let mut peaks: VecDeque<(usize, f64)> = VecDeque::new();

    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            // monotonic deque of candidate peaks
            while peaks.back().map_or(false, |&(_, p)| p <= close) {
                peaks.pop_back();
            }
            peaks.push_back((i, close));
            while peaks.front().map_or(false, |&(j, _)| i >= window && j <= i - window) {
                peaks.pop_front();
            }

            let peak = peaks.front().map(|&(_, p)| p)?;
            if peak > 0.0 && close.is_finite() {
                Some(close / peak - 1.0)
            } else {
                None
            }
        })
        .collect()
}

/// Sample standard deviation of one-bar simple returns.
#[derive(Debug, Clone)]
pub struct RealizedVolatility {
    period: usize,
    prev_price: Option<f64>,
    returns: VecDeque<f64>,
}

impl RealizedVolatility {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            prev_price: None,
            returns: VecDeque::with_capacity(period + 1),
        }
    }

    pub fn update(&mut self, price: f64) -> Option<f64> {
        if let Some(prev) = self.prev_price {
            if prev > 0.0 {
                self.returns.push_back(price / prev - 1.0);
                if self.returns.len() > self.period {
                    self.returns.pop_front();
                }
            }
        }
        self.prev_price = Some(price);

        if self.returns.len() < self.period {
            return None;
        }
        sample_stddev(self.returns.make_contiguous())
    }
}
