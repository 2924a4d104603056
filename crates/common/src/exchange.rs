use crate::{Order, OrderId, OrderSide, Result};

/// Abstraction over the order executor.
///
/// `PaperSink` implements this for simulation; tests use recording sinks.
/// Submission is fire-and-forget: fills, rejections and cancel
/// acknowledgements come back later as `ExecutionReport`s, which are the only
/// thing allowed to change a position.
///
/// An `Err` from `submit` means the order never left the process and is
/// treated as an immediate rejection.
pub trait OrderSink: Send {
    /// Hand an order to the executor and return its id.
    fn submit(&mut self, order: Order) -> Result<OrderId>;

    /// Request cancellation of a resting order.
    fn cancel(&mut self, order_id: &str) -> Result<()>;

    fn submit_market(&mut self, pair: &str, side: OrderSide, volume: f64) -> Result<OrderId> {
        self.submit(Order::market(pair, side, volume))
    }

    fn submit_stop(&mut self, pair: &str, side: OrderSide, volume: f64, price: f64) -> Result<OrderId> {
        self.submit(Order::stop(pair, side, volume, price))
    }

    fn submit_limit(&mut self, pair: &str, side: OrderSide, volume: f64, price: f64) -> Result<OrderId> {
        self.submit(Order::limit(pair, side, volume, price))
    }
}

impl<S: OrderSink + ?Sized> OrderSink for Box<S> {
    fn submit(&mut self, order: Order) -> Result<OrderId> {
        (**self).submit(order)
    }

    fn cancel(&mut self, order_id: &str) -> Result<()> {
        (**self).cancel(order_id)
    }
}
