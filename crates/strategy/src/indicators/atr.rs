use common::Candle;

/// Average True Range with Wilder smoothing, seeded by the mean of the first
/// `period` true ranges.
#[derive(Debug, Clone)]
pub struct Atr {
    period: usize,
    prev_close: Option<f64>,
    seen: usize,
    value: f64,
}

impl Atr {
    pub fn new(period: usize) -> Self {
        Self {
            period: period.max(1),
            prev_close: None,
            seen: 0,
            value: 0.0,
        }
    }

    pub fn next(&mut self, candle: &Candle) -> f64 {
        let range = candle.high - candle.low;
        let tr = match self.prev_close {
            Some(pc) => range.max((candle.high - pc).abs()).max((candle.low - pc).abs()),
            None => range,
        };
        self.prev_close = Some(candle.close);
        self.seen += 1;

        let n = self.period as f64;
        if self.seen <= self.period {
            self.value += (tr - self.value) / self.seen as f64;
        } else {
            self.value = (self.value * (n - 1.0) + tr) / n;
        }
        self.value
    }

    pub fn is_formed(&self) -> bool {
        self.seen >= self.period
    }
}
