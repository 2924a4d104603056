/// RSI (Relative Strength Index) over closed prices.
///
/// Uses Wilder's smoothed moving average (same as TradingView / standard RSI).
/// Formed once `period + 1` closes have been seen.
#[derive(Debug, Clone)]
pub struct Rsi {
    period: usize,
    prev_close: Option<f64>,
    changes: usize,
    avg_gain: f64,
    avg_loss: f64,
}

impl Rsi {
    pub fn new(period: usize) -> Self {
        Self {
            period: period.max(1),
            prev_close: None,
            changes: 0,
            avg_gain: 0.0,
            avg_loss: 0.0,
        }
    }

    pub fn next(&mut self, close: f64) -> f64 {
        let Some(prev) = self.prev_close.replace(close) else {
            return 50.0;
        };

        let change = close - prev;
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);
        self.changes += 1;

        let n = self.period as f64;
        if self.changes <= self.period {
            // Initial simple average over the first `period` changes.
            self.avg_gain += gain / n;
            self.avg_loss += loss / n;
        } else {
            self.avg_gain = (self.avg_gain * (n - 1.0) + gain) / n;
            self.avg_loss = (self.avg_loss * (n - 1.0) + loss) / n;
        }

        if self.avg_loss == 0.0 {
            return 100.0;
        }
        let rs = self.avg_gain / self.avg_loss;
        100.0 - 100.0 / (1.0 + rs)
    }

    pub fn is_formed(&self) -> bool {
        self.changes >= self.period
    }
}
