use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use common::{Candle, ExitReason, Side, EPSILON};

use crate::config::RiskConfig;
use crate::error::RiskError;
use crate::state::RiskState;
use crate::RiskPolicy;

/// What the risk check wants done with the position this bar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RiskAction {
    /// Close the whole position.
    Exit { reason: ExitReason, level: f64 },
    /// Reduce-only exit for one ladder rung.
    Reduce {
        level_index: usize,
        trigger_price: f64,
        volume: f64,
    },
}

/// Side effects of one bar's check that are not exits.
#[derive(Debug, Clone, PartialEq)]
pub enum RiskNotice {
    BreakevenArmed { stop_price: f64 },
    Refused(RiskError),
}

/// Outcome of `RiskPolicy::check` for one finished candle.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RiskCheck {
    pub action: Option<RiskAction>,
    /// The effective stop moved (ratchet, breakeven or late arming).
    pub stop_changed: bool,
    pub notices: Vec<RiskNotice>,
}

/// Config-driven protective levels: stop, target, trailing stop, breakeven,
/// time stop and the partial-exit ladder.
#[derive(Debug, Clone)]
pub struct ProtectiveLevels {
    config: RiskConfig,
}

impl ProtectiveLevels {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    fn expired(state: &RiskState, now: DateTime<Utc>) -> bool {
        state.expiry_time.is_some_and(|expiry| now >= expiry)
    }

    /// Worst price of the bar crossed the level against the position.
    fn adverse_breach(side: Side, candle: &Candle, level: f64) -> bool {
        match side {
            Side::Long => candle.low <= level,
            Side::Short => candle.high >= level,
        }
    }

    /// Best price of the bar reached the level in favour of the position.
    fn favourable_reach(side: Side, candle: &Candle, level: f64) -> bool {
        match side {
            Side::Long => candle.high >= level,
            Side::Short => candle.low <= level,
        }
    }

    /// Step 4: move the anchor, refresh the distance if configured, ratchet.
    fn update_trailing(&self, state: &mut RiskState, candle: &Candle, atr: Option<f64>) {
        let side = state.side;
        let Some(trailing) = state.trailing.as_mut() else {
            return;
        };

        if self.config.trailing_atr {
            if let Some(distance) = self.config.trailing_stop.and_then(|d| d.resolve(candle.close, atr)) {
                trailing.distance = distance;
            }
        }

        trailing.anchor = match side {
            Side::Long => trailing.anchor.max(candle.high),
            Side::Short => trailing.anchor.min(candle.low),
        };
        let proposed = trailing.anchor - side.sign() * trailing.distance;
        trailing.ratchet.apply(proposed);
    }

    /// Step 5: move the stop to entry once, after enough favourable excursion.
    fn arm_breakeven(&self, state: &mut RiskState, candle: &Candle) -> Option<RiskNotice> {
        if state.breakeven_armed || state.protection_refused {
            return None;
        }
        let trigger = state.breakeven_trigger?;
        let side = state.side;
        let excursion = match side {
            Side::Long => candle.high - state.entry_price,
            Side::Short => state.entry_price - candle.low,
        };
        if excursion + EPSILON < trigger {
            return None;
        }

        state.breakeven_armed = true;
        let buffer = self.config.breakeven.map(|b| b.buffer).unwrap_or(0.0);
        let level = state.entry_price + side.sign() * buffer;

        if let Some(target) = state.take_profit_price {
            if side.sign() * (target - level) <= 0.0 {
                return Some(RiskNotice::Refused(RiskError::InvertedLevel {
                    level: "breakeven stop",
                    side,
                    price: level,
                    reference: target,
                }));
            }
        }

        let stop = match (state.stop_price, side) {
            (Some(current), Side::Long) => current.max(level),
            (Some(current), Side::Short) => current.min(level),
            (None, _) => level,
        };
        state.stop_price = Some(stop);
        Some(RiskNotice::BreakevenArmed { stop_price: stop })
    }
}

impl RiskPolicy for ProtectiveLevels {
    fn config(&self) -> &RiskConfig {
        &self.config
    }

    fn open(
        &self,
        side: Side,
        entry_price: f64,
        entry_time: DateTime<Utc>,
        volume: f64,
        atr: Option<f64>,
    ) -> (RiskState, Option<RiskError>) {
        let mut state = RiskState::new(side, entry_price, entry_time, volume);
        let refused = state.arm(&self.config, atr).err();
        match &refused {
            Some(e) => warn!(error = %e, "Protection refused for new position"),
            None => info!(
                side = %side,
                entry = entry_price,
                stop = ?state.stop_price,
                target = ?state.take_profit_price,
                trailing = ?state.trailing.and_then(|t| t.level()),
                "Protection armed"
            ),
        }
        (state, refused)
    }

    fn check(&self, state: &mut RiskState, candle: &Candle, atr: Option<f64>, volume: f64) -> RiskCheck {
        let mut out = RiskCheck::default();
        let side = state.side;
        let stop_before = state.effective_stop();

        if state.awaiting_levels(&self.config) {
            if let Err(e) = state.arm(&self.config, atr) {
                out.notices.push(RiskNotice::Refused(e));
            }
        }

        // 1. Time stop
        if Self::expired(state, candle.close_time) {
            out.action = Some(RiskAction::Exit {
                reason: ExitReason::Expiry,
                level: candle.close,
            });
            return out;
        }

        // 2. Hard stop
        if let Some(stop) = state.stop_price {
            if Self::adverse_breach(side, candle, stop) {
                out.action = Some(RiskAction::Exit {
                    reason: ExitReason::StopLoss,
                    level: stop,
                });
                return out;
            }
        }

        // 3. Take-profit
        if let Some(target) = state.take_profit_price {
            if Self::favourable_reach(side, candle, target) {
                out.action = Some(RiskAction::Exit {
                    reason: ExitReason::TakeProfit,
                    level: target,
                });
                return out;
            }
        }

        // 4. Trailing stop
        self.update_trailing(state, candle, atr);
        if let Some(level) = state.trailing.and_then(|t| t.level()) {
            if Self::adverse_breach(side, candle, level) {
                out.action = Some(RiskAction::Exit {
                    reason: ExitReason::TrailingStop,
                    level,
                });
                return out;
            }
        }

        // 5. Breakeven
        if let Some(notice) = self.arm_breakeven(state, candle) {
            out.notices.push(notice);
        }

        out.stop_changed = state.effective_stop() != stop_before;

        // 6. Partial-exit ladder, one rung per bar
        let original = state.original_volume;
        if let Some((index, level)) = state
            .partial_exits
            .iter_mut()
            .enumerate()
            .find(|(_, l)| !l.fired && Self::favourable_reach(side, candle, l.trigger_price))
        {
            level.fired = true;
            let reduce = (level.fraction * original).min(volume);
            if reduce > EPSILON {
                out.action = Some(RiskAction::Reduce {
                    level_index: index,
                    trigger_price: level.trigger_price,
                    volume: reduce,
                });
            } else {
                debug!(level = index, "Partial exit rung reached with nothing left to reduce");
            }
        }

        out
    }
}
