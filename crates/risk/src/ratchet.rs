use common::Side;

/// A stop level that may only tighten.
///
/// Long: the level can only rise. Short: the level can only fall.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ratchet {
    side: Side,
    level: Option<f64>,
}

impl Ratchet {
    pub fn with_level(side: Side, level: f64) -> Self {
        Self {
            side,
            level: Some(level),
        }
    }

    /// Offer a new level; returns the level in force afterwards.
    pub fn apply(&mut self, proposed: f64) -> f64 {
        let next = match self.level {
            None => proposed,
            Some(current) => match self.side {
                Side::Long => current.max(proposed),
                Side::Short => current.min(proposed),
            },
        };
        self.level = Some(next);
        next
    }

    pub fn level(&self) -> Option<f64> {
        self.level
    }
}
