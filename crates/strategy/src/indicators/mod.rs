//! Reference indicator pipeline.
//!
//! The engine treats indicators as an external collaborator: it only reads
//! the `IndicatorSamples` produced here. Every indicator reports whether it is
//! formed, and unformed readings are published with `formed = false`.

pub mod atr;
pub mod bollinger;
pub mod macd;
pub mod moving_average;
pub mod rsi;

pub use atr::Atr;
pub use bollinger::Bollinger;
pub use macd::Macd;
pub use moving_average::{Ema, Sma};
pub use rsi::Rsi;

use serde::{Deserialize, Serialize};

use common::{Candle, Error, IndicatorSample, IndicatorSamples, IndicatorValue, Result};

/// Averaging method for moving-average based indicators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Average {
    Sma,
    #[default]
    Ema,
}

/// Indicator declaration from the strategy file.
///
/// ```toml
/// [[strategy.indicators]]
/// name = "fast"
/// kind = "ema"
/// period = 9
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorConfig {
    pub name: String,
    #[serde(flatten)]
    pub kind: IndicatorKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IndicatorKind {
    Sma {
        period: usize,
    },
    Ema {
        period: usize,
    },
    Rsi {
        period: usize,
    },
    Macd {
        fast: usize,
        slow: usize,
        signal: usize,
    },
    Atr {
        period: usize,
    },
    Bollinger {
        period: usize,
        width: f64,
    },
    /// Two moving averages published as one `{fast, slow}` pair.
    MaCross {
        fast: usize,
        slow: usize,
        #[serde(default)]
        average: Average,
    },
}

impl IndicatorKind {
    pub fn validate(&self, name: &str) -> Result<()> {
        let positive = |what: &str, v: usize| {
            if v == 0 {
                Err(Error::invalid(format!("indicator '{name}': {what} must be positive")))
            } else {
                Ok(())
            }
        };
        match *self {
            IndicatorKind::Sma { period }
            | IndicatorKind::Ema { period }
            | IndicatorKind::Atr { period } => positive("period", period),
            IndicatorKind::Rsi { period } => {
                if period < 2 {
                    return Err(Error::invalid(format!("indicator '{name}': RSI period must be >= 2")));
                }
                Ok(())
            }
            IndicatorKind::Macd { fast, slow, signal } => {
                positive("fast", fast)?;
                positive("slow", slow)?;
                positive("signal", signal)?;
                if fast >= slow {
                    return Err(Error::invalid(format!(
                        "indicator '{name}': MACD fast period must be less than slow period"
                    )));
                }
                Ok(())
            }
            IndicatorKind::MaCross { fast, slow, .. } => {
                positive("fast", fast)?;
                positive("slow", slow)?;
                if fast >= slow {
                    return Err(Error::invalid(format!(
                        "indicator '{name}': fast period must be less than slow period"
                    )));
                }
                Ok(())
            }
            IndicatorKind::Bollinger { period, width } => {
                positive("period", period)?;
                if !width.is_finite() || width <= 0.0 {
                    return Err(Error::invalid(format!(
                        "indicator '{name}': band width must be positive"
                    )));
                }
                Ok(())
            }
        }
    }
}

/// A streaming indicator fed with finished candles only.
pub trait Indicator: Send {
    fn update(&mut self, candle: &Candle) -> IndicatorValue;
    fn is_formed(&self) -> bool;
}

enum Running {
    Sma(Sma),
    Ema(Ema),
    Rsi(Rsi),
    Macd(Macd),
    Atr(Atr),
    Bollinger(Bollinger),
    Cross(MovingAverage, MovingAverage),
}

enum MovingAverage {
    Sma(Sma),
    Ema(Ema),
}

impl MovingAverage {
    fn new(average: Average, period: usize) -> Self {
        match average {
            Average::Sma => MovingAverage::Sma(Sma::new(period)),
            Average::Ema => MovingAverage::Ema(Ema::new(period)),
        }
    }

    fn next(&mut self, v: f64) -> f64 {
        match self {
            MovingAverage::Sma(m) => m.next(v),
            MovingAverage::Ema(m) => m.next(v),
        }
    }

    fn is_formed(&self) -> bool {
        match self {
            MovingAverage::Sma(m) => m.is_formed(),
            MovingAverage::Ema(m) => m.is_formed(),
        }
    }
}

impl Indicator for Running {
    fn update(&mut self, candle: &Candle) -> IndicatorValue {
        let close = candle.close;
        match self {
            Running::Sma(i) => IndicatorValue::Scalar { value: i.next(close) },
            Running::Ema(i) => IndicatorValue::Scalar { value: i.next(close) },
            Running::Rsi(i) => IndicatorValue::Scalar { value: i.next(close) },
            Running::Atr(i) => IndicatorValue::Scalar { value: i.next(candle) },
            Running::Macd(i) => {
                let (macd, signal) = i.next(close);
                IndicatorValue::Macd { macd, signal }
            }
            Running::Bollinger(i) => {
                let (upper, middle, lower) = i.next(close);
                IndicatorValue::Band { upper, middle, lower }
            }
            Running::Cross(fast, slow) => IndicatorValue::Cross {
                fast: fast.next(close),
                slow: slow.next(close),
            },
        }
    }

    fn is_formed(&self) -> bool {
        match self {
            Running::Sma(i) => i.is_formed(),
            Running::Ema(i) => i.is_formed(),
            Running::Rsi(i) => i.is_formed(),
            Running::Atr(i) => i.is_formed(),
            Running::Macd(i) => i.is_formed(),
            Running::Bollinger(i) => i.is_formed(),
            Running::Cross(fast, slow) => fast.is_formed() && slow.is_formed(),
        }
    }
}

fn build(kind: &IndicatorKind) -> Box<dyn Indicator> {
    let running = match *kind {
        IndicatorKind::Sma { period } => Running::Sma(Sma::new(period)),
        IndicatorKind::Ema { period } => Running::Ema(Ema::new(period)),
        IndicatorKind::Rsi { period } => Running::Rsi(Rsi::new(period)),
        IndicatorKind::Macd { fast, slow, signal } => Running::Macd(Macd::new(fast, slow, signal)),
        IndicatorKind::Atr { period } => Running::Atr(Atr::new(period)),
        IndicatorKind::Bollinger { period, width } => Running::Bollinger(Bollinger::new(period, width)),
        IndicatorKind::MaCross { fast, slow, average } => {
            Running::Cross(MovingAverage::new(average, fast), MovingAverage::new(average, slow))
        }
    };
    Box::new(running)
}

/// The named indicators of one strategy, updated together per finished candle.
pub struct IndicatorPipeline {
    indicators: Vec<(String, Box<dyn Indicator>)>,
}

impl IndicatorPipeline {
    pub fn from_config(configs: &[IndicatorConfig]) -> Self {
        Self {
            indicators: configs
                .iter()
                .map(|c| (c.name.clone(), build(&c.kind)))
                .collect(),
        }
    }

    /// Add a custom indicator under `name`.
    pub fn with(mut self, name: impl Into<String>, indicator: Box<dyn Indicator>) -> Self {
        self.indicators.push((name.into(), indicator));
        self
    }

    /// Feed one candle. In-progress candles produce no samples and leave every
    /// indicator untouched.
    pub fn update(&mut self, candle: &Candle) -> IndicatorSamples {
        let mut samples = IndicatorSamples::new();
        if !candle.is_finished() {
            return samples;
        }
        for (name, indicator) in &mut self.indicators {
            let value = indicator.update(candle);
            samples.insert(IndicatorSample {
                name: name.clone(),
                value,
                formed: indicator.is_formed(),
                time: candle.close_time,
            });
        }
        samples
    }

    pub fn len(&self) -> usize {
        self.indicators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indicators.is_empty()
    }
}
