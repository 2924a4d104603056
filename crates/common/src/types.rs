use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether a candle's time window has closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandleState {
    InProgress,
    Finished,
}

/// One OHLCV bar for a trading pair.
///
/// Finished candles are immutable; in-progress candles may be revised by the
/// feed and must never drive indicators or decisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub pair: String,
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub state: CandleState,
}

impl Candle {
    pub fn is_finished(&self) -> bool {
        self.state == CandleState::Finished
    }

    /// Absolute size of the candle body.
    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    pub fn upper_wick(&self) -> f64 {
        self.high - self.open.max(self.close)
    }

    pub fn lower_wick(&self) -> f64 {
        self.open.min(self.close) - self.low
    }

    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }
}

/// Side of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    /// +1 for buys, -1 for sells. Multiplies a volume into a signed net change.
    pub fn sign(self) -> f64 {
        match self {
            OrderSide::Buy => 1.0,
            OrderSide::Sell => -1.0,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Direction of an open exposure. Used where a position is known to be non-flat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// Order side that increases exposure in this direction.
    pub fn entry_order(self) -> OrderSide {
        match self {
            Side::Long => OrderSide::Buy,
            Side::Short => OrderSide::Sell,
        }
    }

    /// Order side that reduces exposure in this direction.
    pub fn exit_order(self) -> OrderSide {
        self.entry_order().opposite()
    }

    pub fn sign(self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Long => write!(f, "long"),
            Side::Short => write!(f, "short"),
        }
    }
}

/// Side of the single logical position held per instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    #[default]
    Flat,
    Long,
    Short,
}

impl PositionSide {
    pub fn as_side(self) -> Option<Side> {
        match self {
            PositionSide::Flat => None,
            PositionSide::Long => Some(Side::Long),
            PositionSide::Short => Some(Side::Short),
        }
    }
}

impl From<Side> for PositionSide {
    fn from(side: Side) -> Self {
        match side {
            Side::Long => PositionSide::Long,
            Side::Short => PositionSide::Short,
        }
    }
}

impl std::fmt::Display for PositionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PositionSide::Flat => write!(f, "flat"),
            PositionSide::Long => write!(f, "long"),
            PositionSide::Short => write!(f, "short"),
        }
    }
}

/// Which directions a strategy may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    LongOnly,
    ShortOnly,
    #[default]
    Both,
}

impl Direction {
    pub fn allows(self, side: Side) -> bool {
        matches!(
            (self, side),
            (Direction::Both, _) | (Direction::LongOnly, Side::Long) | (Direction::ShortOnly, Side::Short)
        )
    }
}

// ─── Indicator samples ────────────────────────────────────────────────────────

/// Value produced by an indicator for one finished candle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IndicatorValue {
    Scalar { value: f64 },
    Cross { fast: f64, slow: f64 },
    Macd { macd: f64, signal: f64 },
    Band { upper: f64, middle: f64, lower: f64 },
}

impl IndicatorValue {
    /// The primary scalar reading: the value itself, the MACD line, the fast
    /// series of a pair, or the middle band.
    pub fn primary(&self) -> f64 {
        match *self {
            IndicatorValue::Scalar { value } => value,
            IndicatorValue::Cross { fast, .. } => fast,
            IndicatorValue::Macd { macd, .. } => macd,
            IndicatorValue::Band { middle, .. } => middle,
        }
    }

    /// The two series a crossover detector compares, when the value has two.
    pub fn pair(&self) -> Option<(f64, f64)> {
        match *self {
            IndicatorValue::Cross { fast, slow } => Some((fast, slow)),
            IndicatorValue::Macd { macd, signal } => Some((macd, signal)),
            IndicatorValue::Scalar { .. } | IndicatorValue::Band { .. } => None,
        }
    }
}

/// A named indicator reading timestamped to a finished candle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSample {
    pub name: String,
    pub value: IndicatorValue,
    /// False while the indicator is still warming up. Unformed samples carry
    /// whatever the indicator computed so far and must not be acted on.
    pub formed: bool,
    pub time: DateTime<Utc>,
}

/// All indicator samples for one finished candle, keyed by indicator name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndicatorSamples {
    samples: HashMap<String, IndicatorSample>,
}

impl IndicatorSamples {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, sample: IndicatorSample) {
        self.samples.insert(sample.name.clone(), sample);
    }

    pub fn with(mut self, sample: IndicatorSample) -> Self {
        self.insert(sample);
        self
    }

    pub fn get(&self, name: &str) -> Option<&IndicatorSample> {
        self.samples.get(name)
    }

    /// The value of a formed sample; `None` if missing or still warming up.
    pub fn formed(&self, name: &str) -> Option<IndicatorValue> {
        self.samples
            .get(name)
            .filter(|s| s.formed)
            .map(|s| s.value)
    }

    /// Primary scalar of a formed sample.
    pub fn scalar(&self, name: &str) -> Option<f64> {
        self.formed(name).map(|v| v.primary())
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

// ─── Signals ─────────────────────────────────────────────────────────────────

/// Discrete directional decision produced by a signal source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    #[default]
    None,
    EnterLong,
    EnterShort,
    ExitLong,
    ExitShort,
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SignalKind::None => "none",
            SignalKind::EnterLong => "enter_long",
            SignalKind::EnterShort => "enter_short",
            SignalKind::ExitLong => "exit_long",
            SignalKind::ExitShort => "exit_short",
        };
        write!(f, "{s}")
    }
}

/// Signal emitted for one finished candle. Never persisted across bars.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub kind: SignalKind,
    pub strength: Option<f64>,
    pub source_time: DateTime<Utc>,
}

impl Signal {
    pub fn new(kind: SignalKind, source_time: DateTime<Utc>) -> Self {
        Self {
            kind,
            strength: None,
            source_time,
        }
    }

    pub fn none(source_time: DateTime<Utc>) -> Self {
        Self::new(SignalKind::None, source_time)
    }

    pub fn with_strength(mut self, strength: f64) -> Self {
        self.strength = Some(strength);
        self
    }

    pub fn is_none(&self) -> bool {
        self.kind == SignalKind::None
    }
}

// ─── Orders and fills ────────────────────────────────────────────────────────

pub type OrderId = String;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OrderKind {
    Market,
    /// Triggers once price trades through `trigger`.
    Stop { trigger: f64 },
    /// Rests until price trades at `price` or better.
    Limit { price: f64 },
}

/// An instruction for the order executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub pair: String,
    pub side: OrderSide,
    pub volume: f64,
    pub kind: OrderKind,
}

impl Order {
    pub fn market(pair: impl Into<String>, side: OrderSide, volume: f64) -> Self {
        Self::with_kind(pair, side, volume, OrderKind::Market)
    }

    pub fn stop(pair: impl Into<String>, side: OrderSide, volume: f64, trigger: f64) -> Self {
        Self::with_kind(pair, side, volume, OrderKind::Stop { trigger })
    }

    pub fn limit(pair: impl Into<String>, side: OrderSide, volume: f64, price: f64) -> Self {
        Self::with_kind(pair, side, volume, OrderKind::Limit { price })
    }

    fn with_kind(pair: impl Into<String>, side: OrderSide, volume: f64, kind: OrderKind) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            pair: pair.into(),
            side,
            volume,
            kind,
        }
    }
}

/// Confirmation of a (possibly partial) fill reported by the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: OrderId,
    pub pair: String,
    pub side: OrderSide,
    pub price: f64,
    pub volume: f64,
    pub timestamp: DateTime<Utc>,
}

/// Asynchronous outcome of a submitted order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExecutionReport {
    Filled(Fill),
    Rejected { order_id: OrderId, reason: String },
    Cancelled { order_id: OrderId },
}

impl ExecutionReport {
    pub fn order_id(&self) -> &str {
        match self {
            ExecutionReport::Filled(fill) => &fill.order_id,
            ExecutionReport::Rejected { order_id, .. } | ExecutionReport::Cancelled { order_id } => {
                order_id
            }
        }
    }
}

// ─── Engine events ───────────────────────────────────────────────────────────

/// Why a position was closed or reduced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    Expiry,
    StopLoss,
    TakeProfit,
    TrailingStop,
    Signal,
    Reversal,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExitReason::Expiry => "expiry",
            ExitReason::StopLoss => "stop-loss",
            ExitReason::TakeProfit => "take-profit",
            ExitReason::TrailingStop => "trailing stop",
            ExitReason::Signal => "signal",
            ExitReason::Reversal => "reversal",
        };
        write!(f, "{s}")
    }
}

/// Notable things the engine did, for operators and tests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EngineEvent {
    EntrySubmitted {
        pair: String,
        side: Side,
        volume: f64,
    },
    ProtectiveExit {
        pair: String,
        reason: ExitReason,
        level: f64,
        volume: f64,
    },
    PartialExit {
        pair: String,
        level_index: usize,
        trigger_price: f64,
        volume: f64,
    },
    BreakevenArmed {
        pair: String,
        stop_price: f64,
    },
    ProtectionRefused {
        pair: String,
        reason: String,
    },
    OrderRejected {
        pair: String,
        order_id: OrderId,
        reason: String,
    },
    PositionChanged {
        pair: String,
        side: PositionSide,
        volume: f64,
        entry_price: f64,
    },
}
