pub mod executor;
pub mod feed;
pub mod lifecycle;
pub mod position;

pub use executor::{InFlight, OrderPurpose, OrderRouter, RestingOrder};
pub use feed::{parse_kline_event, ReplayFeed};
pub use lifecycle::Engine;
pub use position::{order_for_target, FillOutcome, PendingTarget, Position, PositionBook};
