use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use common::{
    Candle, Error, ExecutionReport, Fill, Order, OrderId, OrderKind, OrderSide, OrderSink, Result,
};

/// Simulated order executor for replays.
///
/// Market orders fill at the latest finished close with slippage. Stop and
/// limit orders rest until a later finished candle trades through them; a
/// candle that gaps past the level fills at its open.
pub struct PaperExchange {
    /// Latest finished close and its time per pair.
    prices: HashMap<String, (f64, DateTime<Utc>)>,
    /// Resting stop and limit orders in submission order.
    resting: Vec<Order>,
    /// Slippage in basis points applied to market and stop fills.
    slippage_bps: f64,
    account: PaperAccount,
}

/// Cash and holdings after every simulated fill.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PaperAccount {
    pub cash: f64,
    pub holdings: HashMap<String, f64>,
    pub fills: usize,
}

impl PaperAccount {
    fn apply(&mut self, fill: &Fill) {
        let signed = fill.side.sign() * fill.volume;
        self.cash -= signed * fill.price;
        *self.holdings.entry(fill.pair.clone()).or_default() += signed;
        self.fills += 1;
    }
}

impl PaperExchange {
    pub fn new(initial_balance: f64, slippage_bps: f64) -> Self {
        info!(balance = initial_balance, slippage_bps, "Paper executor initialized");
        Self {
            prices: HashMap::new(),
            resting: Vec::new(),
            slippage_bps,
            account: PaperAccount {
                cash: initial_balance,
                ..PaperAccount::default()
            },
        }
    }

    pub fn account(&self) -> &PaperAccount {
        &self.account
    }

    pub fn resting(&self) -> &[Order] {
        &self.resting
    }

    pub fn last_price(&self, pair: &str) -> Option<f64> {
        self.prices.get(pair).map(|(price, _)| *price)
    }

    /// Cash plus holdings marked at the latest close.
    pub fn equity(&self) -> f64 {
        self.account.cash
            + self
                .account
                .holdings
                .iter()
                .map(|(pair, qty)| qty * self.last_price(pair).unwrap_or(0.0))
                .sum::<f64>()
    }

    /// Accept an order. Market orders fill immediately; an immediately
    /// marketable stop or limit fills at the latest close.
    pub fn submit(&mut self, order: Order) -> Vec<ExecutionReport> {
        if !order.volume.is_finite() || order.volume <= 0.0 {
            return vec![reject(&order.id, format!("volume must be positive, got {}", order.volume))];
        }
        let Some(&(last, time)) = self.prices.get(&order.pair) else {
            return vec![reject(&order.id, format!("no price for pair '{}'", order.pair))];
        };

        let price = match order.kind {
            OrderKind::Market => Some(self.slipped(order.side, last)),
            OrderKind::Stop { trigger } if stop_touched(order.side, trigger, last, last) => {
                Some(self.slipped(order.side, last))
            }
            OrderKind::Limit { price } if limit_touched(order.side, price, last, last) => Some(last),
            OrderKind::Stop { .. } | OrderKind::Limit { .. } => None,
        };

        match price {
            Some(price) => vec![self.fill(&order, price, time)],
            None => {
                debug!(order_id = %order.id, pair = %order.pair, kind = ?order.kind, "Paper order resting");
                self.resting.push(order);
                Vec::new()
            }
        }
    }

    /// Cancel a resting order. Unknown ids already filled, so nothing is reported.
    pub fn cancel(&mut self, order_id: &str) -> Vec<ExecutionReport> {
        match self.resting.iter().position(|o| o.id == order_id) {
            Some(idx) => {
                self.resting.remove(idx);
                vec![ExecutionReport::Cancelled {
                    order_id: order_id.to_string(),
                }]
            }
            None => {
                debug!(order_id, "Cancel for order that is no longer resting");
                Vec::new()
            }
        }
    }

    /// Trigger resting orders against a finished candle, then record its
    /// close as the latest price.
    pub fn on_candle(&mut self, candle: &Candle) -> Vec<ExecutionReport> {
        if !candle.is_finished() {
            return Vec::new();
        }

        let mut reports = Vec::new();
        let mut remaining = Vec::with_capacity(self.resting.len());
        for order in std::mem::take(&mut self.resting) {
            if order.pair != candle.pair {
                remaining.push(order);
                continue;
            }
            match self.trigger_price(&order, candle) {
                Some(price) => reports.push(self.fill(&order, price, candle.close_time)),
                None => remaining.push(order),
            }
        }
        self.resting = remaining;

        self.prices
            .insert(candle.pair.clone(), (candle.close, candle.close_time));
        reports
    }

    fn trigger_price(&self, order: &Order, candle: &Candle) -> Option<f64> {
        match (order.kind, order.side) {
            (OrderKind::Stop { trigger }, side) if stop_touched(side, trigger, candle.low, candle.high) => {
                // A gap through the trigger fills at the open.
                let base = match side {
                    OrderSide::Sell => trigger.min(candle.open),
                    OrderSide::Buy => trigger.max(candle.open),
                };
                Some(self.slipped(side, base))
            }
            (OrderKind::Limit { price }, side) if limit_touched(side, price, candle.low, candle.high) => {
                Some(match side {
                    OrderSide::Sell => price.max(candle.open),
                    OrderSide::Buy => price.min(candle.open),
                })
            }
            _ => None,
        }
    }

    /// Buys pay more, sells receive less.
    fn slipped(&self, side: OrderSide, price: f64) -> f64 {
        price * (1.0 + side.sign() * self.slippage_bps / 10_000.0)
    }

    fn fill(&mut self, order: &Order, price: f64, timestamp: DateTime<Utc>) -> ExecutionReport {
        let fill = Fill {
            order_id: order.id.clone(),
            pair: order.pair.clone(),
            side: order.side,
            price,
            volume: order.volume,
            timestamp,
        };
        self.account.apply(&fill);
        debug!(
            order_id = %fill.order_id,
            pair = %fill.pair,
            side = %fill.side,
            price,
            volume = fill.volume,
            "Paper fill simulated"
        );
        ExecutionReport::Filled(fill)
    }
}

fn stop_touched(side: OrderSide, trigger: f64, low: f64, high: f64) -> bool {
    match side {
        OrderSide::Sell => low <= trigger,
        OrderSide::Buy => high >= trigger,
    }
}

fn limit_touched(side: OrderSide, price: f64, low: f64, high: f64) -> bool {
    match side {
        OrderSide::Sell => high >= price,
        OrderSide::Buy => low <= price,
    }
}

fn reject(order_id: &str, reason: String) -> ExecutionReport {
    warn!(order_id, %reason, "Paper order rejected");
    ExecutionReport::Rejected {
        order_id: order_id.to_string(),
        reason,
    }
}

/// `OrderSink` over a shared `PaperExchange`.
///
/// Reports are never returned inline: they go out on the report channel and
/// reach the engine on a later turn of the event loop, like a real executor.
#[derive(Clone)]
pub struct PaperSink {
    exchange: Arc<Mutex<PaperExchange>>,
    report_tx: mpsc::UnboundedSender<ExecutionReport>,
}

impl PaperSink {
    pub fn new(exchange: Arc<Mutex<PaperExchange>>, report_tx: mpsc::UnboundedSender<ExecutionReport>) -> Self {
        Self { exchange, report_tx }
    }

    fn lock(&self) -> Result<MutexGuard<'_, PaperExchange>> {
        self.exchange
            .lock()
            .map_err(|_| Error::Exchange("paper executor state poisoned".into()))
    }

    fn publish(&self, reports: Vec<ExecutionReport>) -> Result<()> {
        for report in reports {
            self.report_tx
                .send(report)
                .map_err(|_| Error::ChannelClosed("execution reports".into()))?;
        }
        Ok(())
    }
}

impl OrderSink for PaperSink {
    fn submit(&mut self, order: Order) -> Result<OrderId> {
        let id = order.id.clone();
        let reports = self.lock()?.submit(order);
        self.publish(reports)?;
        Ok(id)
    }

    fn cancel(&mut self, order_id: &str) -> Result<()> {
        let reports = self.lock()?.cancel(order_id);
        self.publish(reports)
    }
}
