use super::ema::EMA;

#[derive(Debug, Clone)]
pub struct MACD {
    fast_ema: EMA,
    slow_ema: EMA,
    signal_ema: EMA,
}

impl MACD {
    pub fn new(fast_period: usize, slow_period: usize, signal_period: usize) -> Self {
        Self {
            fast_ema: EMA::new(fast_period),
            slow_ema: EMA::new(slow_period),
            signal_ema: EMA::new(signal_period),
        }
    }

    pub fn update(&mut self, price: f64) -> Option<MACDOutput> {
        let fast = self.fast_ema.update(price);
        let slow = self.slow_ema.update(price);

        if let (Some(f), Some(s)) = (fast, slow) {
            let macd_line = f - s;
            if let Some(signal) = self.signal_ema.update(macd_line) {
                return Some(MACDOutput {
                    macd_line,
                    signal_line: signal,
                    histogram: macd_line - signal,
                });
            }
        }

        None
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MACDOutput {
    /// Fast EMA minus slow EMA.
    pub macd_line: f64,
    pub signal_line: f64,
    /// MACD line minus signal line.
    pub histogram: f64,
}
