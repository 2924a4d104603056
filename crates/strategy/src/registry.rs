use tracing::info;

use common::Result;

use crate::config::{StrategyConfig, StrategyFileConfig};
use crate::indicators::IndicatorPipeline;
use crate::signals::TrendFilter;
use crate::SignalSource;

/// One configured strategy, ready to be wired to an engine.
pub struct BuiltStrategy {
    pub config: StrategyConfig,
    pub pipeline: IndicatorPipeline,
    pub source: Box<dyn SignalSource>,
}

impl BuiltStrategy {
    /// Build the indicator pipeline and signal detector for a validated config.
    pub fn build(config: StrategyConfig) -> Result<Self> {
        config.validate()?;
        let pipeline = IndicatorPipeline::from_config(&config.indicators);
        let detector = config.signal.build();
        let source: Box<dyn SignalSource> = match &config.trend_filter {
            Some(trend) => Box::new(TrendFilter::new(detector, trend.clone())),
            None => detector,
        };
        Ok(Self {
            config,
            pipeline,
            source,
        })
    }
}

/// Holds every strategy declared in the strategy file.
pub struct StrategyRegistry {
    strategies: Vec<BuiltStrategy>,
}

impl StrategyRegistry {
    /// Build the registry from config. Any invalid strategy fails the whole file.
    pub fn from_config(file_cfg: &StrategyFileConfig) -> Result<Self> {
        let mut strategies = Vec::with_capacity(file_cfg.strategies.len());
        for cfg in &file_cfg.strategies {
            let built = BuiltStrategy::build(cfg.clone())?;
            info!(
                name = %cfg.name,
                pair = %cfg.pair,
                signal = %built.source.name(),
                indicators = built.pipeline.len(),
                "Registered strategy"
            );
            strategies.push(built);
        }
        Ok(Self { strategies })
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Pairs the registered strategies watch, deduplicated in declaration order.
    pub fn pairs(&self) -> Vec<&str> {
        let mut pairs: Vec<&str> = Vec::new();
        for s in &self.strategies {
            if !pairs.contains(&s.config.pair.as_str()) {
                pairs.push(&s.config.pair);
            }
        }
        pairs
    }

    pub fn into_strategies(self) -> Vec<BuiltStrategy> {
        self.strategies
    }
}
