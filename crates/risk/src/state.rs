use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use common::Side;

use crate::config::RiskConfig;
use crate::error::RiskError;
use crate::ratchet::Ratchet;

/// One rung of the partial-exit ladder, resolved to a price at entry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PartialExitLevel {
    pub trigger_price: f64,
    /// Fraction of `RiskState::original_volume` released by this rung.
    pub fraction: f64,
    pub fired: bool,
}

/// Moving stop following the best price seen since entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrailingStop {
    /// Best price since entry (highest high for longs, lowest low for shorts).
    pub anchor: f64,
    pub distance: f64,
    pub(crate) ratchet: Ratchet,
}

impl TrailingStop {
    pub fn level(&self) -> Option<f64> {
        self.ratchet.level()
    }
}

/// Protective state attached to one open position.
///
/// Levels are resolved once from the entry price and then frozen. A level
/// whose distance cannot be resolved yet (ATR still warming up) stays `None`
/// and is retried every bar until it can be placed.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskState {
    pub side: Side,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    /// Volume held when protection was armed; partial exits are fractions of it.
    pub original_volume: f64,
    pub stop_price: Option<f64>,
    pub take_profit_price: Option<f64>,
    pub trailing: Option<TrailingStop>,
    pub breakeven_trigger: Option<f64>,
    pub breakeven_armed: bool,
    pub expiry_time: Option<DateTime<Utc>>,
    pub partial_exits: Vec<PartialExitLevel>,
    /// Set when an inverted level was detected. Price protection stays off
    /// for the rest of this position.
    pub protection_refused: bool,
}

impl RiskState {
    pub fn new(side: Side, entry_price: f64, entry_time: DateTime<Utc>, volume: f64) -> Self {
        Self {
            side,
            entry_price,
            entry_time,
            original_volume: volume,
            stop_price: None,
            take_profit_price: None,
            trailing: None,
            breakeven_trigger: None,
            breakeven_armed: false,
            expiry_time: None,
            partial_exits: Vec::new(),
            protection_refused: false,
        }
    }

    /// The tighter of the hard stop and the trailing stop.
    pub fn effective_stop(&self) -> Option<f64> {
        let trail = self.trailing.and_then(|t| t.level());
        match (self.stop_price, trail) {
            (Some(a), Some(b)) => Some(match self.side {
                Side::Long => a.max(b),
                Side::Short => a.min(b),
            }),
            (a, b) => a.or(b),
        }
    }

    /// True while some configured level still waits for a resolvable distance.
    pub fn awaiting_levels(&self, cfg: &RiskConfig) -> bool {
        if self.protection_refused {
            return self.partial_exits.len() < cfg.partial_exits.len();
        }
        (cfg.stop_loss.is_some() && self.stop_price.is_none() && !self.breakeven_armed)
            || (cfg.take_profit.is_some() && self.take_profit_price.is_none())
            || (cfg.trailing_stop.is_some() && self.trailing.is_none())
            || (cfg.breakeven.is_some() && self.breakeven_trigger.is_none())
            || self.partial_exits.len() < cfg.partial_exits.len()
    }

    /// Resolve every configured level that is not placed yet.
    ///
    /// Distances that resolve to nothing (non-positive ATR) are skipped and
    /// retried on the next call. If the resulting stop or target lands on the
    /// wrong side of entry, price protection is refused for this position and
    /// the inversion is returned; the position itself is left alone.
    pub fn arm(&mut self, cfg: &RiskConfig, atr: Option<f64>) -> Result<(), RiskError> {
        let entry = self.entry_price;
        let sign = self.side.sign();

        if self.expiry_time.is_none() {
            if let Some(secs) = cfg.max_holding_secs {
                self.expiry_time = Some(self.entry_time + Duration::seconds(secs));
            }
        }

        // The ladder is all-or-nothing so rung indices stay stable.
        if self.partial_exits.is_empty() && !cfg.partial_exits.is_empty() {
            let resolved: Option<Vec<PartialExitLevel>> = cfg
                .partial_exits
                .iter()
                .map(|rung| {
                    rung.trigger.resolve(entry, atr).map(|d| PartialExitLevel {
                        trigger_price: entry + sign * d,
                        fraction: rung.volume_fraction,
                        fired: false,
                    })
                })
                .collect();
            if let Some(levels) = resolved {
                self.partial_exits = levels;
            }
        }

        if self.protection_refused {
            return Ok(());
        }

        let mut stop = self.stop_price;
        let mut target = self.take_profit_price;
        if stop.is_none() && !self.breakeven_armed {
            stop = cfg
                .stop_loss
                .and_then(|d| d.resolve(entry, atr))
                .map(|d| entry - sign * d);
        }
        if target.is_none() {
            target = cfg
                .take_profit
                .and_then(|d| d.resolve(entry, atr))
                .map(|d| entry + sign * d);
        }
        let trailing = match self.trailing {
            Some(t) => Some(t),
            None => cfg.trailing_stop.and_then(|d| d.resolve(entry, atr)).map(|distance| {
                TrailingStop {
                    anchor: entry,
                    distance,
                    ratchet: Ratchet::with_level(self.side, entry - sign * distance),
                }
            }),
        };

        let checked = check_entry_levels(self.side, entry, stop, target).and_then(|_| {
            match trailing.and_then(|t| t.level()) {
                Some(level) => check_entry_levels(self.side, entry, Some(level), target),
                None => Ok(()),
            }
        });
        if let Err(e) = checked {
            self.refuse_protection();
            return Err(e);
        }

        self.stop_price = stop;
        self.take_profit_price = target;
        self.trailing = trailing;
        if self.breakeven_trigger.is_none() {
            self.breakeven_trigger = cfg.breakeven.and_then(|b| b.trigger.resolve(entry, atr));
        }
        Ok(())
    }

    /// Drop every price level; expiry and the partial ladder survive.
    pub fn refuse_protection(&mut self) {
        self.protection_refused = true;
        self.stop_price = None;
        self.take_profit_price = None;
        self.trailing = None;
        self.breakeven_trigger = None;
    }

    /// Record that a ladder order was rejected so the rung can fire again.
    pub fn unfire_partial(&mut self, index: usize) {
        if let Some(level) = self.partial_exits.get_mut(index) {
            level.fired = false;
        }
    }
}

/// Stop strictly on the losing side of entry, target strictly on the winning
/// side, and neither at or below zero.
pub fn check_entry_levels(
    side: Side,
    entry: f64,
    stop: Option<f64>,
    target: Option<f64>,
) -> Result<(), RiskError> {
    let sign = side.sign();
    if let Some(stop) = stop {
        if stop <= 0.0 || sign * (entry - stop) <= 0.0 {
            return Err(RiskError::InvertedLevel {
                level: "stop",
                side,
                price: stop,
                reference: entry,
            });
        }
    }
    if let Some(target) = target {
        if target <= 0.0 || sign * (target - entry) <= 0.0 {
            return Err(RiskError::InvertedLevel {
                level: "take-profit",
                side,
                price: target,
                reference: entry,
            });
        }
    }
    Ok(())
}
