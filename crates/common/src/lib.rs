pub mod config;
pub mod error;
pub mod exchange;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use exchange::OrderSink;
pub use types::*;

/// Volumes and prices closer than this are treated as equal.
pub const EPSILON: f64 = 1e-9;
