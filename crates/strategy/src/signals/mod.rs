//! Signal predicates.
//!
//! Each detector owns the rolling history it needs and returns
//! `SignalKind::None` until that history is deep enough and every input it
//! reads is formed.

pub mod crossover;
pub mod divergence;
pub mod external;
pub mod pattern;
pub mod threshold;

pub use crossover::{CrossoverConfig, CrossoverDetector};
pub use divergence::{DivergenceConfig, DivergenceDetector};
pub use external::ExternalSignal;
pub use pattern::{CandlePattern, PatternConfig, PatternDetector};
pub use threshold::{Bounds, Polarity, ThresholdConfig, ThresholdDetector, ZoneTrigger};

use serde::{Deserialize, Serialize};
use tracing::debug;

use common::{Candle, IndicatorSamples, Result, Signal, SignalKind};

use crate::SignalSource;

/// `[strategy.signal]` table, selected by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalConfig {
    Threshold(ThresholdConfig),
    Crossover(CrossoverConfig),
    Divergence(DivergenceConfig),
    Pattern(PatternConfig),
}

impl SignalConfig {
    pub fn validate(&self) -> Result<()> {
        match self {
            SignalConfig::Threshold(c) => c.validate(),
            SignalConfig::Crossover(_) => Ok(()),
            SignalConfig::Divergence(c) => c.validate(),
            SignalConfig::Pattern(c) => c.validate(),
        }
    }

    /// Indicator names the detector reads.
    pub fn inputs(&self) -> Vec<&str> {
        match self {
            SignalConfig::Threshold(c) => vec![c.indicator.as_str()],
            SignalConfig::Crossover(c) => {
                std::iter::once(c.fast.as_str()).chain(c.slow.as_deref()).collect()
            }
            SignalConfig::Divergence(c) => vec![c.oscillator.as_str()],
            SignalConfig::Pattern(c) => c.trend.as_deref().into_iter().collect(),
        }
    }

    pub fn build(&self) -> Box<dyn SignalSource> {
        match self {
            SignalConfig::Threshold(c) => Box::new(ThresholdDetector::new(c.clone())),
            SignalConfig::Crossover(c) => Box::new(CrossoverDetector::new(c.clone())),
            SignalConfig::Divergence(c) => Box::new(DivergenceDetector::new(c.clone())),
            SignalConfig::Pattern(c) => Box::new(PatternDetector::new(c.clone())),
        }
    }
}

/// Lets entries through only in the direction of a trend average:
/// longs above it, shorts below it. Exits always pass.
pub struct TrendFilter<S> {
    inner: S,
    trend: String,
}

impl<S: SignalSource> TrendFilter<S> {
    pub fn new(inner: S, trend: impl Into<String>) -> Self {
        Self {
            inner,
            trend: trend.into(),
        }
    }
}

impl<S: SignalSource> SignalSource for TrendFilter<S> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn evaluate(&mut self, candle: &Candle, samples: &IndicatorSamples) -> Signal {
        let signal = self.inner.evaluate(candle, samples);
        let allowed = match signal.kind {
            SignalKind::EnterLong => samples.scalar(&self.trend).is_some_and(|t| candle.close > t),
            SignalKind::EnterShort => samples.scalar(&self.trend).is_some_and(|t| candle.close < t),
            _ => true,
        };
        if allowed {
            signal
        } else {
            debug!(signal = %signal.kind, trend = %self.trend, "Entry filtered by trend");
            Signal::none(signal.source_time)
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{candle_at, scalars};
    use super::*;

    #[test]
    fn signal_table_is_selected_by_type() {
        let cfg: SignalConfig = toml::from_str(
            r#"
            type = "crossover"
            fast = "ema_fast"
            slow = "ema_slow"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.inputs(), vec!["ema_fast", "ema_slow"]);
    }

    #[test]
    fn threshold_table_parses_bounds() {
        let cfg: SignalConfig = toml::from_str(
            r#"
            type = "threshold"
            indicator = "rsi"
            exit_level = 50.0
            bounds = { mode = "static", lower = 30.0, upper = 70.0 }
            "#,
        )
        .unwrap();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn trend_filter_blocks_counter_trend_entries() {
        let cfg = SignalConfig::Crossover(CrossoverConfig {
            fast: "fast".into(),
            slow: Some("slow".into()),
        });
        let mut source = TrendFilter::new(cfg.build(), "trend");

        let first = scalars(&[("fast", 1.0), ("slow", 2.0), ("trend", 150.0)]);
        assert!(source.evaluate(&candle_at(0, 100.0), &first).is_none());
        // Golden cross while price sits below the trend average.
        let second = scalars(&[("fast", 3.0), ("slow", 2.0), ("trend", 150.0)]);
        assert!(source.evaluate(&candle_at(1, 100.0), &second).is_none());
        // The detector still saw the cross: no repeat once price clears the trend.
        let third = scalars(&[("fast", 4.0), ("slow", 2.0), ("trend", 50.0)]);
        assert!(source.evaluate(&candle_at(2, 100.0), &third).is_none());
    }

    #[test]
    fn unformed_trend_suppresses_entries() {
        let cfg = SignalConfig::Crossover(CrossoverConfig {
            fast: "fast".into(),
            slow: Some("slow".into()),
        });
        let mut source = TrendFilter::new(cfg.build(), "trend");
        source.evaluate(&candle_at(0, 100.0), &scalars(&[("fast", 1.0), ("slow", 2.0)]));
        let s = source.evaluate(&candle_at(1, 100.0), &scalars(&[("fast", 3.0), ("slow", 2.0)]));
        assert!(s.is_none());
    }
}
