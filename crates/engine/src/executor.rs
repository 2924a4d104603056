use std::collections::HashMap;

use tracing::{debug, info, warn};

use common::{ExitReason, OrderId, OrderSide, OrderSink, Result, EPSILON};

/// Why an order was sent. Decides how its fills are applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OrderPurpose {
    /// Opens, adds to or flips the position.
    Entry,
    /// Market close of the whole position.
    Exit(ExitReason),
    /// Market reduce for one partial-exit rung.
    Reduce { level_index: usize },
    /// Resting stop or target at the executor.
    Protective(ExitReason),
}

impl OrderPurpose {
    /// Fills of these orders may only shrink the position.
    pub fn is_reduce_only(self) -> bool {
        !matches!(self, OrderPurpose::Entry)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct InFlight {
    pub purpose: OrderPurpose,
    pub side: OrderSide,
    pub volume: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RestingOrder {
    pub id: OrderId,
    pub price: f64,
    pub volume: f64,
}

impl RestingOrder {
    fn matches(&self, price: f64, volume: f64) -> bool {
        (self.price - price).abs() <= EPSILON && (self.volume - volume).abs() <= EPSILON
    }
}

/// The only component that talks to the `OrderSink`.
///
/// Remembers what every in-flight order is for, and keeps at most one
/// resting stop and one resting target per position, replacing them
/// cancel-then-submit when their price or volume changes.
pub struct OrderRouter {
    pair: String,
    sink: Box<dyn OrderSink>,
    in_flight: HashMap<OrderId, InFlight>,
    stop: Option<RestingOrder>,
    target: Option<RestingOrder>,
}

impl OrderRouter {
    pub fn new(pair: impl Into<String>, sink: Box<dyn OrderSink>) -> Self {
        Self {
            pair: pair.into(),
            sink,
            in_flight: HashMap::new(),
            stop: None,
            target: None,
        }
    }

    pub fn submit_market(&mut self, side: OrderSide, volume: f64, purpose: OrderPurpose) -> Result<OrderId> {
        let id = self.sink.submit_market(&self.pair, side, volume)?;
        info!(pair = %self.pair, order_id = %id, side = %side, volume, ?purpose, "Order submitted");
        self.in_flight.insert(id.clone(), InFlight { purpose, side, volume });
        Ok(id)
    }

    pub fn lookup(&self, order_id: &str) -> Option<InFlight> {
        self.in_flight.get(order_id).copied()
    }

    /// Forget an order that reached a terminal state.
    pub fn settle(&mut self, order_id: &str) -> Option<InFlight> {
        if self.stop.as_ref().is_some_and(|o| o.id == order_id) {
            self.stop = None;
        }
        if self.target.as_ref().is_some_and(|o| o.id == order_id) {
            self.target = None;
        }
        self.in_flight.remove(order_id)
    }

    pub fn resting_stop(&self) -> Option<&RestingOrder> {
        self.stop.as_ref()
    }

    pub fn resting_target(&self) -> Option<&RestingOrder> {
        self.target.as_ref()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Bring the resting stop and target in line with the wanted levels.
    /// `exit_side` closes the position; `None` withdraws the order. The stop
    /// carries the reason its fill will be reported with.
    pub fn sync_protection(
        &mut self,
        exit_side: OrderSide,
        volume: f64,
        stop: Option<(f64, ExitReason)>,
        target: Option<f64>,
    ) {
        let current = self.stop.take();
        let (stop, reason) = match stop {
            Some((price, reason)) => (Some(price), reason),
            None => (None, ExitReason::StopLoss),
        };
        self.stop = self.replace(current, exit_side, volume, stop, reason);

        let current = self.target.take();
        self.target = self.replace(current, exit_side, volume, target, ExitReason::TakeProfit);
    }

    /// Cancel both resting orders, e.g. once the position is flat.
    pub fn cancel_protection(&mut self) {
        for order in [self.stop.take(), self.target.take()].into_iter().flatten() {
            self.cancel(&order.id);
        }
    }

    fn replace(
        &mut self,
        current: Option<RestingOrder>,
        side: OrderSide,
        volume: f64,
        price: Option<f64>,
        reason: ExitReason,
    ) -> Option<RestingOrder> {
        let wanted = price.filter(|_| volume > EPSILON);
        if let (Some(order), Some(price)) = (&current, wanted) {
            if order.matches(price, volume) {
                return current;
            }
        }
        if let Some(order) = current {
            self.cancel(&order.id);
        }
        let price = wanted?;

        let submitted = match reason {
            ExitReason::TakeProfit => self.sink.submit_limit(&self.pair, side, volume, price),
            _ => self.sink.submit_stop(&self.pair, side, volume, price),
        };
        match submitted {
            Ok(id) => {
                info!(pair = %self.pair, order_id = %id, %reason, price, volume, "Resting order placed");
                self.in_flight.insert(
                    id.clone(),
                    InFlight {
                        purpose: OrderPurpose::Protective(reason),
                        side,
                        volume,
                    },
                );
                Some(RestingOrder { id, price, volume })
            }
            Err(e) => {
                warn!(pair = %self.pair, %reason, error = %e, "Resting order refused, retrying next bar");
                None
            }
        }
    }

    /// Request a cancel. The order stays known until the executor confirms,
    /// so a fill that races the cancel is still applied.
    fn cancel(&mut self, order_id: &str) {
        match self.sink.cancel(order_id) {
            Ok(()) => debug!(pair = %self.pair, order_id, "Cancel requested"),
            Err(e) => warn!(pair = %self.pair, order_id, error = %e, "Cancel failed"),
        }
    }
}
