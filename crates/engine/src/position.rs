use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use common::{OrderId, OrderSide, PositionSide, Side, EPSILON};

/// The single logical position held for one instrument.
///
/// `side == Flat` exactly when `volume == 0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Position {
    pub side: PositionSide,
    pub volume: f64,
    pub entry_price: f64,
    pub entry_time: Option<DateTime<Utc>>,
}

impl Position {
    pub fn flat() -> Self {
        Self::default()
    }

    pub fn open(side: Side, volume: f64, entry_price: f64, entry_time: DateTime<Utc>) -> Self {
        if volume <= EPSILON {
            return Self::flat();
        }
        Self {
            side: side.into(),
            volume,
            entry_price,
            entry_time: Some(entry_time),
        }
    }

    pub fn is_flat(&self) -> bool {
        self.side == PositionSide::Flat
    }

    /// Signed net volume: positive long, negative short.
    pub fn net(&self) -> f64 {
        match self.side.as_side() {
            Some(side) => side.sign() * self.volume,
            None => 0.0,
        }
    }
}

/// Order needed to move a signed net position from `current` to `target`.
///
/// One formula covers entries, exits and flips: volume is the absolute
/// difference and the side its sign. `None` when already at target.
pub fn order_for_target(current: f64, target: f64) -> Option<(OrderSide, f64)> {
    let diff = target - current;
    if diff.abs() <= EPSILON {
        return None;
    }
    let side = if diff > 0.0 { OrderSide::Buy } else { OrderSide::Sell };
    Some((side, diff.abs()))
}

/// How a fill changed the confirmed position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FillOutcome {
    Opened,
    Added,
    Reduced,
    Closed,
    Flipped,
}

/// An order in flight towards a target net position.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingTarget {
    pub order_id: OrderId,
    pub target: f64,
    pub remaining: f64,
}

/// Confirmed position plus the target an unresolved order is moving it to.
///
/// Only fills mutate the confirmed side; while a target is pending the engine
/// takes no new decisions for the instrument.
#[derive(Debug, Clone, Default)]
pub struct PositionBook {
    confirmed: Position,
    pending: Option<PendingTarget>,
}

impl PositionBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn confirmed(&self) -> &Position {
        &self.confirmed
    }

    pub fn pending(&self) -> Option<&PendingTarget> {
        self.pending.as_ref()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn set_pending(&mut self, order_id: OrderId, target: f64, volume: f64) {
        self.pending = Some(PendingTarget {
            order_id,
            target,
            remaining: volume,
        });
    }

    /// Count `filled` against the pending order. Returns true once nothing
    /// remains and the gate is lifted.
    pub fn settle_pending(&mut self, order_id: &str, filled: f64) -> bool {
        let Some(pending) = self.pending.as_mut().filter(|p| p.order_id == order_id) else {
            return false;
        };
        pending.remaining -= filled;
        if pending.remaining <= EPSILON {
            self.pending = None;
            return true;
        }
        false
    }

    /// Drop the pending target after a rejection or cancel. The confirmed
    /// position is left as the fills made it.
    pub fn abandon_pending(&mut self, order_id: &str) -> bool {
        if self.pending.as_ref().is_some_and(|p| p.order_id == order_id) {
            self.pending = None;
            return true;
        }
        false
    }

    /// Apply an executed fill to the confirmed position.
    pub fn apply_fill(
        &mut self,
        side: OrderSide,
        price: f64,
        volume: f64,
        time: DateTime<Utc>,
    ) -> FillOutcome {
        let before = self.confirmed.net();
        let after = before + side.sign() * volume;
        let side_of = |net: f64| if net > 0.0 { Side::Long } else { Side::Short };

        if after.abs() <= EPSILON {
            self.confirmed = Position::flat();
            return FillOutcome::Closed;
        }
        if before.abs() <= EPSILON {
            self.confirmed = Position::open(side_of(after), after.abs(), price, time);
            return FillOutcome::Opened;
        }
        if before.signum() != after.signum() {
            self.confirmed = Position::open(side_of(after), after.abs(), price, time);
            return FillOutcome::Flipped;
        }
        if after.abs() > before.abs() {
            let held = before.abs();
            let total = after.abs();
            self.confirmed.entry_price = (held * self.confirmed.entry_price + volume * price) / total;
            self.confirmed.volume = total;
            FillOutcome::Added
        } else {
            self.confirmed.volume = after.abs();
            FillOutcome::Reduced
        }
    }

    /// Replace the confirmed position with the host's authoritative one.
    pub fn reconcile(&mut self, position: Position) {
        self.confirmed = if position.volume <= EPSILON || position.is_flat() {
            Position::flat()
        } else {
            position
        };
        self.pending = None;
    }
}
