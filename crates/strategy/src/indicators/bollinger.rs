use crate::history::RingBuffer;

/// Bollinger bands: SMA ± width × population standard deviation.
#[derive(Debug, Clone)]
pub struct Bollinger {
    window: RingBuffer<f64>,
    width: f64,
}

impl Bollinger {
    pub fn new(period: usize, width: f64) -> Self {
        Self {
            window: RingBuffer::new(period),
            width,
        }
    }

    /// Returns `(upper, middle, lower)`.
    pub fn next(&mut self, close: f64) -> (f64, f64, f64) {
        self.window.push(close);
        let (mean, stddev) = mean_stddev(self.window.iter().copied());
        (mean + self.width * stddev, mean, mean - self.width * stddev)
    }

    pub fn is_formed(&self) -> bool {
        self.window.is_full()
    }
}

/// Population mean and standard deviation. `(0, 0)` for an empty input.
pub fn mean_stddev(values: impl ExactSizeIterator<Item = f64> + Clone) -> (f64, f64) {
    let n = values.len();
    if n == 0 {
        return (0.0, 0.0);
    }
    let mean = values.clone().sum::<f64>() / n as f64;
    let var = values.map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
    (mean, var.sqrt())
}
