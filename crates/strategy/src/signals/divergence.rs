use serde::{Deserialize, Serialize};

use common::{Candle, Error, IndicatorSamples, Result, Signal, SignalKind};

use crate::history::RingBuffer;
use crate::SignalSource;

fn default_window() -> usize {
    2
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DivergenceConfig {
    pub oscillator: String,
    /// Bars compared, current one included.
    #[serde(default = "default_window")]
    pub window: usize,
}

impl DivergenceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.window < 2 {
            return Err(Error::invalid(format!(
                "divergence window must be at least 2, got {}",
                self.window
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct Bar {
    low: f64,
    high: f64,
    oscillator: f64,
}

/// Price makes a new extreme the oscillator does not confirm.
///
/// Bullish: the current low undercuts every earlier low in the window while
/// the oscillator prints above its reading at the previous lowest low.
/// Bearish mirrors this with highs.
pub struct DivergenceDetector {
    oscillator: String,
    bars: RingBuffer<Bar>,
}

impl DivergenceDetector {
    pub fn new(config: DivergenceConfig) -> Self {
        Self {
            oscillator: config.oscillator,
            bars: RingBuffer::new(config.window),
        }
    }
}

impl SignalSource for DivergenceDetector {
    fn name(&self) -> &str {
        "divergence"
    }

    fn evaluate(&mut self, candle: &Candle, samples: &IndicatorSamples) -> Signal {
        let time = candle.close_time;
        let Some(oscillator) = samples.scalar(&self.oscillator) else {
            return Signal::none(time);
        };
        let current = Bar {
            low: candle.low,
            high: candle.high,
            oscillator,
        };
        self.bars.push(current);
        if !self.bars.is_full() {
            return Signal::none(time);
        }

        let earlier = || self.bars.iter().take(self.bars.len() - 1);
        let lowest = earlier().min_by(|a, b| a.low.total_cmp(&b.low));
        let highest = earlier().max_by(|a, b| a.high.total_cmp(&b.high));

        let bullish = lowest.is_some_and(|l| current.low < l.low && current.oscillator > l.oscillator);
        let bearish =
            highest.is_some_and(|h| current.high > h.high && current.oscillator < h.oscillator);

        match (bullish, bearish) {
            (true, false) => Signal::new(SignalKind::EnterLong, time),
            (false, true) => Signal::new(SignalKind::EnterShort, time),
            _ => Signal::none(time),
        }
    }
}
