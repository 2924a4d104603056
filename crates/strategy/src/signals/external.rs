use common::{Candle, IndicatorSamples, Signal, SignalKind};

use crate::SignalSource;

/// Signal decided by an outside collaborator, e.g. a model or a manual feed.
///
/// The closure sees only the finished candle; `None` means no opinion.
pub struct ExternalSignal<F> {
    label: String,
    predicate: F,
}

impl<F> ExternalSignal<F>
where
    F: FnMut(&Candle) -> Option<SignalKind> + Send,
{
    pub fn new(label: impl Into<String>, predicate: F) -> Self {
        Self {
            label: label.into(),
            predicate,
        }
    }
}

impl<F> SignalSource for ExternalSignal<F>
where
    F: FnMut(&Candle) -> Option<SignalKind> + Send,
{
    fn name(&self) -> &str {
        &self.label
    }

    fn evaluate(&mut self, candle: &Candle, _samples: &IndicatorSamples) -> Signal {
        let kind = (self.predicate)(candle).unwrap_or_default();
        Signal::new(kind, candle.close_time)
    }
}
