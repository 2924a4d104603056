use serde::{Deserialize, Serialize};
use tracing::trace;

use common::{Candle, Error, IndicatorSamples, Result, Signal, SignalKind};

use crate::history::RingBuffer;
use crate::indicators::bollinger::mean_stddev;
use crate::SignalSource;

/// Bounds a scalar is compared against.
///
/// ```toml
/// bounds = { mode = "static", lower = 30.0, upper = 70.0 }
/// bounds = { mode = "adaptive", window = 20, k = 2.0 }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Bounds {
    Static { lower: f64, upper: f64 },
    /// Mean ± k·stddev over the last `window` readings, current one included.
    Adaptive { window: usize, k: f64 },
}

/// Which zone transition fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ZoneTrigger {
    /// Inside (or the opposite zone) to beyond a bound.
    #[default]
    Enter,
    /// Beyond a bound back to anywhere else.
    Leave,
}

/// How a zone event maps to a direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    /// Below the lower bound is oversold: go long.
    #[default]
    Reversion,
    /// Below the lower bound is weakness: go short.
    Momentum,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdConfig {
    pub indicator: String,
    pub bounds: Bounds,
    #[serde(default)]
    pub trigger: ZoneTrigger,
    #[serde(default)]
    pub polarity: Polarity,
    /// Crossing this level closes the matching position (RSI back through 50).
    #[serde(default)]
    pub exit_level: Option<f64>,
}

impl ThresholdConfig {
    pub fn validate(&self) -> Result<()> {
        match self.bounds {
            Bounds::Static { lower, upper } => {
                if !(lower.is_finite() && upper.is_finite()) || lower >= upper {
                    return Err(Error::invalid(format!(
                        "threshold bounds must satisfy lower < upper, got {lower} / {upper}"
                    )));
                }
                if let Some(level) = self.exit_level {
                    if !(level > lower && level < upper) {
                        return Err(Error::invalid(format!(
                            "exit_level {level} must lie strictly between {lower} and {upper}"
                        )));
                    }
                }
            }
            Bounds::Adaptive { window, k } => {
                if window < 2 {
                    return Err(Error::invalid("adaptive bounds need a window of at least 2"));
                }
                if !k.is_finite() || k <= 0.0 {
                    return Err(Error::invalid(format!("adaptive bounds k must be positive, got {k}")));
                }
                if matches!(self.exit_level, Some(level) if !level.is_finite()) {
                    return Err(Error::invalid("exit_level must be finite"));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Zone {
    Below,
    Inside,
    Above,
}

/// Fires on transitions across a bound, never on steady containment.
pub struct ThresholdDetector {
    config: ThresholdConfig,
    window: RingBuffer<f64>,
    readings: RingBuffer<(f64, Zone)>,
}

impl ThresholdDetector {
    pub fn new(config: ThresholdConfig) -> Self {
        let window = match config.bounds {
            Bounds::Adaptive { window, .. } => window,
            Bounds::Static { .. } => 1,
        };
        Self {
            config,
            window: RingBuffer::new(window),
            readings: RingBuffer::new(2),
        }
    }

    fn bounds(&mut self, value: f64) -> Option<(f64, f64)> {
        match self.config.bounds {
            Bounds::Static { lower, upper } => Some((lower, upper)),
            Bounds::Adaptive { k, .. } => {
                self.window.push(value);
                if !self.window.is_full() {
                    return None;
                }
                let (mean, stddev) = mean_stddev(self.window.iter().copied());
                Some((mean - k * stddev, mean + k * stddev))
            }
        }
    }

    fn zone_event(&self, prev: Zone, cur: Zone) -> Option<SignalKind> {
        let edge = match self.config.trigger {
            ZoneTrigger::Enter => match cur {
                Zone::Below | Zone::Above if prev != cur => Some(cur),
                _ => None,
            },
            ZoneTrigger::Leave => match prev {
                Zone::Below | Zone::Above if prev != cur => Some(prev),
                _ => None,
            },
        }?;
        Some(match (edge, self.config.polarity) {
            (Zone::Below, Polarity::Reversion) | (Zone::Above, Polarity::Momentum) => {
                SignalKind::EnterLong
            }
            _ => SignalKind::EnterShort,
        })
    }

    fn exit_event(&self, prev: f64, cur: f64) -> Option<SignalKind> {
        let level = self.config.exit_level?;
        let up = prev <= level && cur > level;
        let down = prev >= level && cur < level;
        match self.config.polarity {
            Polarity::Reversion if up => Some(SignalKind::ExitLong),
            Polarity::Reversion if down => Some(SignalKind::ExitShort),
            Polarity::Momentum if down => Some(SignalKind::ExitLong),
            Polarity::Momentum if up => Some(SignalKind::ExitShort),
            _ => None,
        }
    }
}

impl SignalSource for ThresholdDetector {
    fn name(&self) -> &str {
        "threshold"
    }

    fn evaluate(&mut self, candle: &Candle, samples: &IndicatorSamples) -> Signal {
        let time = candle.close_time;
        let Some(value) = samples.scalar(&self.config.indicator) else {
            trace!(indicator = %self.config.indicator, "Threshold input not formed");
            return Signal::none(time);
        };
        let Some((lower, upper)) = self.bounds(value) else {
            return Signal::none(time);
        };

        let zone = if value < lower {
            Zone::Below
        } else if value > upper {
            Zone::Above
        } else {
            Zone::Inside
        };
        self.readings.push((value, zone));

        let Some(&(prev_value, prev_zone)) = self.readings.ago(1) else {
            return Signal::none(time);
        };

        if let Some(kind) = self.zone_event(prev_zone, zone) {
            let bound = if zone == Zone::Below || prev_zone == Zone::Below {
                lower
            } else {
                upper
            };
            return Signal::new(kind, time).with_strength((value - bound).abs());
        }
        match self.exit_event(prev_value, value) {
            Some(kind) => Signal::new(kind, time),
            None => Signal::none(time),
        }
    }
}
