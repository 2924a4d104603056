use crate::history::RingBuffer;

/// Simple moving average over the last `period` inputs.
#[derive(Debug, Clone)]
pub struct Sma {
    window: RingBuffer<f64>,
    sum: f64,
}

impl Sma {
    pub fn new(period: usize) -> Self {
        Self {
            window: RingBuffer::new(period),
            sum: 0.0,
        }
    }

    pub fn next(&mut self, value: f64) -> f64 {
        if self.window.is_full() {
            if let Some(&oldest) = self.window.iter().next() {
                self.sum -= oldest;
            }
        }
        self.window.push(value);
        self.sum += value;
        self.sum / self.window.len() as f64
    }

    pub fn is_formed(&self) -> bool {
        self.window.is_full()
    }
}

/// Exponential moving average seeded with the SMA of the first `period` inputs.
#[derive(Debug, Clone)]
pub struct Ema {
    period: usize,
    k: f64,
    seen: usize,
    seed_sum: f64,
    value: f64,
}

impl Ema {
    pub fn new(period: usize) -> Self {
        let period = period.max(1);
        Self {
            period,
            k: 2.0 / (period as f64 + 1.0),
            seen: 0,
            seed_sum: 0.0,
            value: 0.0,
        }
    }

    pub fn next(&mut self, value: f64) -> f64 {
        self.seen += 1;
        if self.seen <= self.period {
            self.seed_sum += value;
            self.value = self.seed_sum / self.seen as f64;
        } else {
            self.value = value * self.k + self.value * (1.0 - self.k);
        }
        self.value
    }

    pub fn is_formed(&self) -> bool {
        self.seen >= self.period
    }
}
