use std::collections::VecDeque;

use super::{mean, population_stddev};

#[derive(Debug, Clone)]
pub struct BollingerBands {
    period: usize,
    std_dev_multiplier: f64,
    prices: VecDeque<f64>,
}

impl BollingerBands {
    pub fn new(period: usize, std_dev_multiplier: f64) -> Self {
        Self {
            period,
            std_dev_multiplier,
            prices: VecDeque::with_capacity(period + 1),
        }
    }

    pub fn update(&mut self, price: f64) -> Option<BollingerOutput> {
        self.prices.push_back(price);
        if self.prices.len() > self.period {
            self.prices.pop_front();
        }
        if self.prices.len() < self.period {
            return None;
        }

        let window = self.prices.make_contiguous();
        let middle = mean(window)?;
        let deviation = population_stddev(window)? * self.std_dev_multiplier;
        let upper = middle + deviation;
        let lower = middle - deviation;

        // Width relative to the middle band
        let width = if middle != 0.0 { (upper - lower) / middle } else { f64::NAN };

        Some(BollingerOutput { upper, middle, lower, width })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BollingerOutput {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
    pub width: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bollinger_width() {
        let mut bb = BollingerBands::new(4, 2.0);
        assert!(bb.update(1.0).is_none());
        assert!(bb.update(2.0).is_none());
        assert!(bb.update(3.0).is_none());
        let out = bb.update(4.0).unwrap();
        assert_eq!(out.middle, 2.5);
        let sd = 1.25f64.sqrt();
        assert!((out.upper - (2.5 + 2.0 * sd)).abs() < 1e-12);
        assert!((out.width - 4.0 * sd / 2.5).abs() < 1e-12);
    }

    #[test]
    fn test_bollinger_flat_width_is_zero() {
        let mut bb = BollingerBands::new(20, 2.0);
        let mut last = None;
        for _ in 0..25 {
            last = bb.update(10.0);
        }
        assert_eq!(last.map(|b| b.width), Some(0.0));
    }
}
