pub mod config;
pub mod error;
pub mod manager;
pub mod ratchet;
pub mod state;

pub use config::{BreakevenConfig, Distance, PartialExitConfig, ProtectionMode, RiskConfig};
pub use error::RiskError;
pub use manager::{ProtectiveLevels, RiskAction, RiskCheck, RiskNotice};
pub use ratchet::Ratchet;
pub use state::{PartialExitLevel, RiskState, TrailingStop};

use chrono::{DateTime, Utc};

use common::{Candle, Side};

/// Computes protective levels at entry and re-evaluates them every finished bar.
///
/// Implementations never touch orders; the engine turns a `RiskCheck` into
/// order flow.
pub trait RiskPolicy: Send {
    fn config(&self) -> &RiskConfig;

    /// Build the risk state for a freshly opened (or re-based) position.
    /// A refused arming is returned alongside the state, which then carries no
    /// price protection.
    fn open(
        &self,
        side: Side,
        entry_price: f64,
        entry_time: DateTime<Utc>,
        volume: f64,
        atr: Option<f64>,
    ) -> (RiskState, Option<RiskError>);

    /// Run the per-bar checks in order: expiry, stop, target, trailing stop,
    /// breakeven, partial exits. At most one exit action is returned.
    fn check(&self, state: &mut RiskState, candle: &Candle, atr: Option<f64>, volume: f64) -> RiskCheck;
}
