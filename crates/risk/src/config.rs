use serde::{Deserialize, Serialize};

use common::{Error, Result, EPSILON};

/// A protective distance from a reference price.
///
/// TOML form: `stop_loss = { unit = "percent", value = 2.0 }`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "unit", content = "value", rename_all = "snake_case")]
pub enum Distance {
    /// Percent of the reference price (2.0 = 2%).
    Percent(f64),
    /// Fixed price distance.
    Absolute(f64),
    /// Multiple of the ATR reading supplied at resolution time.
    Atr(f64),
}

impl Distance {
    /// Resolve to a price distance. Returns `None` when the result is not a
    /// positive finite number, e.g. an ATR that is missing or reads zero
    /// during warm-up. Callers must treat `None` as "do not place this level".
    pub fn resolve(&self, reference: f64, atr: Option<f64>) -> Option<f64> {
        let distance = match *self {
            Distance::Percent(pct) => reference * pct / 100.0,
            Distance::Absolute(points) => points,
            Distance::Atr(multiple) => atr? * multiple,
        };
        (distance.is_finite() && distance > 0.0).then_some(distance)
    }

    pub fn needs_atr(&self) -> bool {
        matches!(self, Distance::Atr(_))
    }

    fn raw(&self) -> f64 {
        match *self {
            Distance::Percent(v) | Distance::Absolute(v) | Distance::Atr(v) => v,
        }
    }

    fn validate(&self, what: &str) -> Result<()> {
        let v = self.raw();
        if !v.is_finite() || v <= 0.0 {
            return Err(Error::invalid(format!("{what} distance must be positive, got {v}")));
        }
        Ok(())
    }
}

/// Where stop and target orders live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProtectionMode {
    /// Levels are checked against each finished candle and breaches are
    /// closed with market orders.
    #[default]
    Synthetic,
    /// Stop and target are placed at the executor as stop/limit orders and
    /// replaced whenever the stop ratchets or the position volume changes.
    Resting,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BreakevenConfig {
    /// Favourable excursion from entry that arms the breakeven stop.
    pub trigger: Distance,
    /// Price offset beyond entry for the breakeven stop.
    #[serde(default)]
    pub buffer: f64,
}

/// One rung of the partial-exit ladder.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PartialExitConfig {
    /// Favourable distance from entry at which this rung fires.
    pub trigger: Distance,
    /// Fraction of the volume held at entry (not of what remains).
    pub volume_fraction: f64,
}

/// Per-strategy protective settings. Immutable for the life of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RiskConfig {
    #[serde(default)]
    pub stop_loss: Option<Distance>,
    #[serde(default)]
    pub take_profit: Option<Distance>,
    #[serde(default)]
    pub trailing_stop: Option<Distance>,
    /// Refresh the trailing distance from the latest ATR every bar instead of
    /// freezing it at entry. Requires an ATR-based `trailing_stop`.
    #[serde(default)]
    pub trailing_atr: bool,
    #[serde(default)]
    pub breakeven: Option<BreakevenConfig>,
    /// Time stop: close the position this many seconds after entry.
    #[serde(default)]
    pub max_holding_secs: Option<i64>,
    #[serde(default)]
    pub partial_exits: Vec<PartialExitConfig>,
    #[serde(default)]
    pub protection: ProtectionMode,
}

impl RiskConfig {
    /// Reject settings that could never produce sane protective levels.
    pub fn validate(&self) -> Result<()> {
        if let Some(d) = &self.stop_loss {
            d.validate("stop_loss")?;
        }
        if let Some(d) = &self.take_profit {
            d.validate("take_profit")?;
        }
        if let Some(d) = &self.trailing_stop {
            d.validate("trailing_stop")?;
        }
        if self.trailing_atr && !matches!(self.trailing_stop, Some(Distance::Atr(_))) {
            return Err(Error::invalid(
                "trailing_atr requires an ATR-based trailing_stop",
            ));
        }
        if let Some(be) = &self.breakeven {
            be.trigger.validate("breakeven trigger")?;
            if !be.buffer.is_finite() || be.buffer < 0.0 {
                return Err(Error::invalid(format!(
                    "breakeven buffer must be >= 0, got {}",
                    be.buffer
                )));
            }
        }
        if let Some(secs) = self.max_holding_secs {
            if secs <= 0 {
                return Err(Error::invalid(format!(
                    "max_holding_secs must be positive, got {secs}"
                )));
            }
        }

        let mut total = 0.0;
        for (i, rung) in self.partial_exits.iter().enumerate() {
            rung.trigger.validate(&format!("partial_exits[{i}] trigger"))?;
            if !(rung.volume_fraction > 0.0 && rung.volume_fraction <= 1.0) {
                return Err(Error::invalid(format!(
                    "partial_exits[{i}] volume_fraction must be in (0, 1], got {}",
                    rung.volume_fraction
                )));
            }
            total += rung.volume_fraction;
        }
        if total > 1.0 + EPSILON {
            return Err(Error::invalid(format!(
                "partial exit fractions sum to {total}, more than the whole position"
            )));
        }
        Ok(())
    }

    /// Whether any level is expressed in ATR multiples.
    pub fn needs_atr(&self) -> bool {
        self.stop_loss.is_some_and(|d| d.needs_atr())
            || self.take_profit.is_some_and(|d| d.needs_atr())
            || self.trailing_stop.is_some_and(|d| d.needs_atr())
            || self.breakeven.is_some_and(|b| b.trigger.needs_atr())
            || self.partial_exits.iter().any(|p| p.trigger.needs_atr())
    }
}
