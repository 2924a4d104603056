use super::moving_average::Ema;

/// MACD (Moving Average Convergence/Divergence).
///
/// MACD line = EMA(fast) − EMA(slow), signal = EMA(macd_line, signal_period).
/// Formed once the signal EMA has seen `signal` MACD values computed from a
/// formed slow EMA.
#[derive(Debug, Clone)]
pub struct Macd {
    fast: Ema,
    slow: Ema,
    signal: Ema,
}

impl Macd {
    pub fn new(fast: usize, slow: usize, signal: usize) -> Self {
        Self {
            fast: Ema::new(fast),
            slow: Ema::new(slow),
            signal: Ema::new(signal),
        }
    }

    /// Returns `(macd, signal)`.
    pub fn next(&mut self, close: f64) -> (f64, f64) {
        let fast = self.fast.next(close);
        let slow = self.slow.next(close);
        let macd = fast - slow;
        if !self.slow.is_formed() {
            return (macd, macd);
        }
        (macd, self.signal.next(macd))
    }

    pub fn is_formed(&self) -> bool {
        self.slow.is_formed() && self.signal.is_formed()
    }
}
