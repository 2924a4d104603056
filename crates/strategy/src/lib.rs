pub mod config;
pub mod history;
pub mod indicators;
pub mod registry;
pub mod signals;

pub use config::{StrategyConfig, StrategyFileConfig};
pub use history::RingBuffer;
pub use indicators::{Indicator, IndicatorConfig, IndicatorKind, IndicatorPipeline};
pub use registry::{BuiltStrategy, StrategyRegistry};
pub use signals::{ExternalSignal, SignalConfig, TrendFilter};

use common::{Candle, IndicatorSamples, Signal};

/// Turns one finished candle and its indicator samples into a signal.
///
/// Called on every finished bar, including bars where the engine will not act
/// on the result, so detectors keep their history continuous.
pub trait SignalSource: Send {
    fn name(&self) -> &str;

    fn evaluate(&mut self, candle: &Candle, samples: &IndicatorSamples) -> Signal;
}

impl<S: SignalSource + ?Sized> SignalSource for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn evaluate(&mut self, candle: &Candle, samples: &IndicatorSamples) -> Signal {
        (**self).evaluate(candle, samples)
    }
}
