use thiserror::Error;

use common::Side;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RiskError {
    /// A computed level sits on the wrong side of the price it protects.
    #[error("inverted {level} for {side} position: {price} vs reference {reference}")]
    InvertedLevel {
        level: &'static str,
        side: Side,
        price: f64,
        reference: f64,
    },
}
