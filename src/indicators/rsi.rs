/// Wilder-smoothed relative strength index on a 0..100 scale.
#[derive(Debug, Clone)]
pub struct RSI {
    period: usize,
    avg_gain: Option<f64>,
    avg_loss: Option<f64>,
    prev_price: Option<f64>,
    gains: Vec<f64>,
    losses: Vec<f64>,
    value: Option<f64>,
}

impl RSI {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            avg_gain: None,
            avg_loss: None,
            prev_price: None,
            gains: Vec::with_capacity(period),
            losses: Vec::with_capacity(period),
            value: None,
        }
    }

    pub fn update(&mut self, price: f64) -> Option<f64> {
        if let Some(prev) = self.prev_price {
            let change = price - prev;
            let gain = change.max(0.0);
            let loss = (-change).max(0.0);

            if self.gains.len() < self.period {
                self.gains.push(gain);
                self.losses.push(loss);

                if self.gains.len() == self.period {
                    let period = self.period as f64;
                    self.avg_gain = Some(self.gains.iter().sum::<f64>() / period);
                    self.avg_loss = Some(self.losses.iter().sum::<f64>() / period);
                    self.value = self.calculate_rsi();
                }
            } else if let (Some(avg_gain), Some(avg_loss)) = (self.avg_gain, self.avg_loss) {
                let period = self.period as f64;
                self.avg_gain = Some((avg_gain * (period - 1.0) + gain) / period);
                self.avg_loss = Some((avg_loss * (period - 1.0) + loss) / period);
                self.value = self.calculate_rsi();
            }
        }

        self.prev_price = Some(price);
        self.value
    }

    fn calculate_rsi(&self) -> Option<f64> {
        match (self.avg_gain, self.avg_loss) {
            (Some(avg_gain), Some(avg_loss)) => {
                if avg_loss == 0.0 {
                    Some(100.0)
                } else {
                    let rs = avg_gain / avg_loss;
                    Some(100.0 - 100.0 / (1.0 + rs))
                }
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rsi_monotonic_rise_is_100() {
        let mut rsi = RSI::new(14);
        let mut last = None;
        for i in 0..20 {
            last = rsi.update(100.0 + i as f64);
        }
        assert_eq!(last, Some(100.0));
    }

    #[test]
    fn test_rsi_warmup_and_range() {
        let mut rsi = RSI::new(14);
        for i in 0..14 {
            assert_eq!(rsi.update(100.0 + (i % 3) as f64), None);
        }
        let value = rsi.update(99.0).unwrap();
        assert!(value > 0.0 && value < 100.0);
    }
}
