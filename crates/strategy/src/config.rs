use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use common::{Direction, Error, Result};
use risk::RiskConfig;

use crate::indicators::{IndicatorConfig, IndicatorKind};
use crate::signals::SignalConfig;

/// Top-level strategy config file (TOML).
///
/// Example `config/strategies.toml`:
/// ```toml
/// [[strategy]]
/// name = "BTC EMA cross"
/// pair = "BTCUSDT"
/// base_volume = 0.01
/// direction = "both"
/// allow_reversal = true
/// atr_indicator = "atr"
///
/// [[strategy.indicators]]
/// name = "cross"
/// kind = "ma_cross"
/// fast = 9
/// slow = 21
///
/// [[strategy.indicators]]
/// name = "atr"
/// kind = "atr"
/// period = 14
///
/// [strategy.signal]
/// type = "crossover"
/// fast = "cross"
///
/// [strategy.risk]
/// stop_loss = { unit = "atr", value = 2.0 }
/// take_profit = { unit = "percent", value = 4.0 }
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StrategyFileConfig {
    #[serde(rename = "strategy")]
    pub strategies: Vec<StrategyConfig>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StrategyConfig {
    /// Human-readable name shown in logs.
    pub name: String,
    /// Trading pair, e.g. "BTCUSDT".
    pub pair: String,
    /// Volume of one entry in base asset units.
    pub base_volume: f64,
    #[serde(default)]
    pub direction: Direction,
    /// An opposite entry flips the position in one order instead of only
    /// closing it.
    #[serde(default)]
    pub allow_reversal: bool,
    /// A same-side entry adds `base_volume` instead of being ignored.
    #[serde(default)]
    pub allow_scaling: bool,
    /// Minimum time between entry decisions.
    #[serde(default)]
    pub cooldown_secs: u64,
    /// Indicator whose formed value feeds ATR-based distances.
    #[serde(default)]
    pub atr_indicator: Option<String>,
    /// Trend average entries must agree with.
    #[serde(default)]
    pub trend_filter: Option<String>,
    #[serde(default)]
    pub indicators: Vec<IndicatorConfig>,
    pub signal: SignalConfig,
    #[serde(default)]
    pub risk: RiskConfig,
}

impl StrategyFileConfig {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read strategy config at '{path}': {e}")))?;
        Self::parse(&content)
    }

    /// Parse and validate every strategy.
    pub fn parse(content: &str) -> Result<Self> {
        let file: Self = toml::from_str(content)
            .map_err(|e| Error::Config(format!("failed to parse strategy config: {e}")))?;
        for strategy in &file.strategies {
            strategy.validate()?;
        }
        Ok(file)
    }
}

impl StrategyConfig {
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(Error::InvalidConfiguration(format!("{}: {msg}", self.name)));

        if self.name.trim().is_empty() {
            return Err(Error::invalid("strategy name must not be empty"));
        }
        if self.pair.trim().is_empty() {
            return fail("pair must not be empty".into());
        }
        if !self.base_volume.is_finite() || self.base_volume <= 0.0 {
            return fail(format!("base_volume must be positive, got {}", self.base_volume));
        }

        let mut names = HashSet::new();
        for indicator in &self.indicators {
            if !names.insert(indicator.name.as_str()) {
                return fail(format!("duplicate indicator name '{}'", indicator.name));
            }
            indicator
                .kind
                .validate(&indicator.name)
                .or_else(|e| fail(e.to_string()))?;
        }

        self.signal.validate().or_else(|e| fail(e.to_string()))?;
        for input in self.signal.inputs() {
            if !names.contains(input) {
                return fail(format!("signal reads unknown indicator '{input}'"));
            }
        }
        if let SignalConfig::Crossover(c) = &self.signal {
            if c.slow.is_none() {
                let paired = self.indicator(&c.fast).is_some_and(|k| {
                    matches!(k, IndicatorKind::MaCross { .. } | IndicatorKind::Macd { .. })
                });
                if !paired {
                    return fail(format!(
                        "crossover without `slow` needs a ma_cross or macd indicator, '{}' is neither",
                        c.fast
                    ));
                }
            }
        }

        if let Some(trend) = &self.trend_filter {
            if !names.contains(trend.as_str()) {
                return fail(format!("trend_filter reads unknown indicator '{trend}'"));
            }
        }

        self.risk.validate().or_else(|e| fail(e.to_string()))?;
        if self.risk.needs_atr() {
            let Some(atr) = &self.atr_indicator else {
                return fail("ATR-based risk distances need `atr_indicator`".into());
            };
            if !matches!(self.indicator(atr), Some(IndicatorKind::Atr { .. })) {
                return fail(format!("atr_indicator '{atr}' must name an atr indicator"));
            }
        }
        Ok(())
    }

    fn indicator(&self, name: &str) -> Option<&IndicatorKind> {
        self.indicators
            .iter()
            .find(|i| i.name == name)
            .map(|i| &i.kind)
    }
}
