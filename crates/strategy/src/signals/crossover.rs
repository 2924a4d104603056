use serde::{Deserialize, Serialize};
use tracing::trace;

use common::{Candle, IndicatorSamples, Side, Signal, SignalKind};

use crate::SignalSource;

/// Compares series A (`fast`) against series B (`slow`).
///
/// When `slow` is omitted, `fast` must name a two-series indicator
/// (`ma_cross` or `macd`) and its pair is used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossoverConfig {
    pub fast: String,
    #[serde(default)]
    pub slow: Option<String>,
}

/// Detects a strict sign change of `A − B`.
///
/// A zero difference is "not yet crossed": it neither fires nor replaces the
/// side the series were last seen on.
pub struct CrossoverDetector {
    config: CrossoverConfig,
    side: Option<Side>,
}

impl CrossoverDetector {
    pub fn new(config: CrossoverConfig) -> Self {
        Self { config, side: None }
    }

    fn series(&self, samples: &IndicatorSamples) -> Option<(f64, f64)> {
        match &self.config.slow {
            Some(slow) => Some((samples.scalar(&self.config.fast)?, samples.scalar(slow)?)),
            None => samples.formed(&self.config.fast)?.pair(),
        }
    }
}

impl SignalSource for CrossoverDetector {
    fn name(&self) -> &str {
        "crossover"
    }

    fn evaluate(&mut self, candle: &Candle, samples: &IndicatorSamples) -> Signal {
        let time = candle.close_time;
        let Some((a, b)) = self.series(samples) else {
            trace!(fast = %self.config.fast, "Crossover inputs not formed");
            return Signal::none(time);
        };

        let diff = a - b;
        let current = if diff > 0.0 {
            Side::Long
        } else if diff < 0.0 {
            Side::Short
        } else {
            return Signal::none(time);
        };

        match self.side.replace(current) {
            Some(previous) if previous != current => {
                let kind = match current {
                    Side::Long => SignalKind::EnterLong,
                    Side::Short => SignalKind::EnterShort,
                };
                Signal::new(kind, time).with_strength(diff.abs())
            }
            _ => Signal::none(time),
        }
    }
}
