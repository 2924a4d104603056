use serde::{Deserialize, Serialize};

use common::{Candle, Error, IndicatorSamples, Result, Signal, SignalKind};

use crate::history::RingBuffer;
use crate::SignalSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandlePattern {
    Hammer,
    ShootingStar,
    BullishEngulfing,
    BearishEngulfing,
}

impl CandlePattern {
    fn is_bullish(self) -> bool {
        matches!(self, CandlePattern::Hammer | CandlePattern::BullishEngulfing)
    }
}

fn all_patterns() -> Vec<CandlePattern> {
    vec![
        CandlePattern::Hammer,
        CandlePattern::ShootingStar,
        CandlePattern::BullishEngulfing,
        CandlePattern::BearishEngulfing,
    ]
}

fn default_wick_ratio() -> f64 {
    2.0
}

fn default_max_body_ratio() -> f64 {
    0.3
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternConfig {
    #[serde(default = "all_patterns")]
    pub patterns: Vec<CandlePattern>,
    /// Minimum rejection wick as a multiple of the body (hammer, shooting star).
    #[serde(default = "default_wick_ratio")]
    pub wick_ratio: f64,
    /// Maximum body as a fraction of the bar range (hammer, shooting star).
    #[serde(default = "default_max_body_ratio")]
    pub max_body_ratio: f64,
    /// Trend average the pattern must reverse: bullish patterns only count on
    /// bars that open below it, bearish ones on bars that open above it.
    #[serde(default)]
    pub trend: Option<String>,
}

impl PatternConfig {
    pub fn validate(&self) -> Result<()> {
        if self.patterns.is_empty() {
            return Err(Error::invalid("pattern signal needs at least one pattern"));
        }
        if !self.wick_ratio.is_finite() || self.wick_ratio <= 0.0 {
            return Err(Error::invalid(format!(
                "wick_ratio must be positive, got {}",
                self.wick_ratio
            )));
        }
        if !(self.max_body_ratio > 0.0 && self.max_body_ratio <= 1.0) {
            return Err(Error::invalid(format!(
                "max_body_ratio must be in (0, 1], got {}",
                self.max_body_ratio
            )));
        }
        Ok(())
    }
}

/// Candlestick reversal patterns over the current and previous finished bar.
pub struct PatternDetector {
    config: PatternConfig,
    candles: RingBuffer<Candle>,
}

impl PatternDetector {
    pub fn new(config: PatternConfig) -> Self {
        Self {
            config,
            candles: RingBuffer::new(2),
        }
    }

    fn matches(&self, pattern: CandlePattern, cur: &Candle, prev: Option<&Candle>) -> bool {
        let range = cur.range();
        let body = cur.body();
        let small_body = range > 0.0 && body <= self.config.max_body_ratio * range;
        match pattern {
            CandlePattern::Hammer => {
                small_body
                    && cur.lower_wick() > 0.0
                    && cur.lower_wick() >= self.config.wick_ratio * body
                    && cur.upper_wick() <= body
            }
            CandlePattern::ShootingStar => {
                small_body
                    && cur.upper_wick() > 0.0
                    && cur.upper_wick() >= self.config.wick_ratio * body
                    && cur.lower_wick() <= body
            }
            CandlePattern::BullishEngulfing => prev.is_some_and(|p| {
                p.is_bearish() && cur.is_bullish() && cur.open <= p.close && cur.close >= p.open && body > p.body()
            }),
            CandlePattern::BearishEngulfing => prev.is_some_and(|p| {
                p.is_bullish() && cur.is_bearish() && cur.open >= p.close && cur.close <= p.open && body > p.body()
            }),
        }
    }
}

impl SignalSource for PatternDetector {
    fn name(&self) -> &str {
        "pattern"
    }

    fn evaluate(&mut self, candle: &Candle, samples: &IndicatorSamples) -> Signal {
        let time = candle.close_time;
        self.candles.push(candle.clone());

        let trend = match &self.config.trend {
            Some(name) => match samples.scalar(name) {
                Some(t) => Some(t),
                None => return Signal::none(time),
            },
            None => None,
        };

        let prev = self.candles.ago(1);
        let mut bullish = false;
        let mut bearish = false;
        for &pattern in &self.config.patterns {
            if !self.matches(pattern, candle, prev) {
                continue;
            }
            let against_trend = match trend {
                Some(t) if pattern.is_bullish() => candle.open < t,
                Some(t) => candle.open > t,
                None => true,
            };
            if !against_trend {
                continue;
            }
            if pattern.is_bullish() {
                bullish = true;
            } else {
                bearish = true;
            }
        }

        match (bullish, bearish) {
            (true, false) => Signal::new(SignalKind::EnterLong, time),
            (false, true) => Signal::new(SignalKind::EnterShort, time),
            _ => Signal::none(time),
        }
    }
}
