use chrono::{DateTime, Duration, Utc};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, trace, warn};

use common::{
    Candle, EngineEvent, Error, ExecutionReport, ExitReason, IndicatorSamples, OrderId, OrderSink, PositionSide,
    Result, Side, SignalKind, EPSILON,
};
use risk::{ProtectionMode, RiskAction, RiskNotice, RiskPolicy, RiskState};
use strategy::{SignalSource, StrategyConfig};

use crate::executor::{OrderPurpose, OrderRouter};
use crate::position::{order_for_target, FillOutcome, Position, PositionBook};

/// Per-instrument decision loop.
///
/// Owns the position, its risk state and the order router. Every finished
/// candle runs the risk checks first, then the signal; fills reported by the
/// executor are the only thing that changes the position.
pub struct Engine {
    config: StrategyConfig,
    source: Box<dyn SignalSource>,
    risk: Box<dyn RiskPolicy>,
    router: OrderRouter,
    book: PositionBook,
    risk_state: Option<RiskState>,
    last_candle: Option<DateTime<Utc>>,
    last_entry: Option<DateTime<Utc>>,
    latest_atr: Option<f64>,
    /// Resting stop or target the last bar breached, not yet filled.
    triggered: Option<OrderId>,
    events: Option<UnboundedSender<EngineEvent>>,
}

impl Engine {
    /// Fails on an invalid strategy config, or when `risk` was built from
    /// settings other than `config.risk`.
    pub fn new(
        config: StrategyConfig,
        source: Box<dyn SignalSource>,
        risk: Box<dyn RiskPolicy>,
        sink: Box<dyn OrderSink>,
    ) -> Result<Self> {
        config.validate()?;
        if risk.config() != &config.risk {
            return Err(Error::invalid(format!(
                "{}: risk policy settings differ from the strategy's risk config",
                config.name
            )));
        }
        let router = OrderRouter::new(config.pair.clone(), sink);
        Ok(Self {
            config,
            source,
            risk,
            router,
            book: PositionBook::new(),
            risk_state: None,
            last_candle: None,
            last_entry: None,
            latest_atr: None,
            triggered: None,
            events: None,
        })
    }

    /// Publish `EngineEvent`s on `tx` as they happen.
    pub fn with_events(mut self, tx: UnboundedSender<EngineEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    pub fn position(&self) -> &Position {
        self.book.confirmed()
    }

    pub fn risk_state(&self) -> Option<&RiskState> {
        self.risk_state.as_ref()
    }

    pub fn is_pending(&self) -> bool {
        self.book.is_pending()
    }

    pub fn router(&self) -> &OrderRouter {
        &self.router
    }

    fn resting(&self) -> bool {
        self.risk.config().protection == ProtectionMode::Resting
    }

    fn emit(&self, event: EngineEvent) {
        if let Some(tx) = &self.events {
            // No subscriber is not an error.
            let _ = tx.send(event);
        }
    }

    // ─── Candles ─────────────────────────────────────────────────────────────

    /// Process one candle. Only finished candles newer than the last one seen
    /// are acted on.
    pub fn on_finished_candle(&mut self, candle: &Candle, samples: &IndicatorSamples) {
        if !candle.is_finished() {
            trace!(pair = %candle.pair, "Ignoring in-progress candle");
            return;
        }
        if candle.pair != self.config.pair {
            return;
        }
        if self.last_candle.is_some_and(|last| candle.open_time <= last) {
            debug!(pair = %candle.pair, open_time = %candle.open_time, "Duplicate or stale candle ignored");
            return;
        }
        self.last_candle = Some(candle.open_time);

        if let Some(name) = &self.config.atr_indicator {
            self.latest_atr = samples.scalar(name);
        }

        // Evaluated every bar so detector history never skips a candle.
        let signal = self.source.evaluate(candle, samples);

        if let Some(pending) = self.book.pending() {
            debug!(
                pair = %self.config.pair,
                order_id = %pending.order_id,
                target = pending.target,
                "Order unresolved, no new decision"
            );
            return;
        }
        if let Some(order_id) = &self.triggered {
            debug!(pair = %self.config.pair, %order_id, "Resting order triggered, waiting for its fill");
            return;
        }

        if self.check_risk(candle) {
            return;
        }
        self.act_on(signal.kind, candle);
    }

    /// Run the per-bar risk checks. Returns true when the bar is spent on an
    /// exit, sent now or already resting.
    fn check_risk(&mut self, candle: &Candle) -> bool {
        let volume = self.book.confirmed().volume;
        let atr = self.latest_atr;
        let Some(state) = self.risk_state.as_mut() else {
            return false;
        };
        let check = self.risk.check(state, candle, atr, volume);

        for notice in check.notices {
            match notice {
                RiskNotice::BreakevenArmed { stop_price } => {
                    info!(pair = %self.config.pair, stop = stop_price, "Breakeven stop armed");
                    self.emit(EngineEvent::BreakevenArmed {
                        pair: self.config.pair.clone(),
                        stop_price,
                    });
                }
                RiskNotice::Refused(e) => {
                    warn!(pair = %self.config.pair, error = %e, "Protective level refused");
                    self.emit(EngineEvent::ProtectionRefused {
                        pair: self.config.pair.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let resting = self.resting();
        match check.action {
            Some(RiskAction::Exit { reason, level })
                if resting
                    && matches!(
                        reason,
                        ExitReason::StopLoss | ExitReason::TakeProfit | ExitReason::TrailingStop
                    ) =>
            {
                let resting_order = match reason {
                    ExitReason::TakeProfit => self.router.resting_target(),
                    _ => self.router.resting_stop(),
                };
                match resting_order.map(|o| o.id.clone()) {
                    Some(order_id) => {
                        debug!(pair = %self.config.pair, %reason, level, %order_id, "Level reached, resting order owns the exit");
                        self.triggered = Some(order_id);
                    }
                    // Placement was refused, nothing rests at the level.
                    None => self.submit_exit(reason, level, candle.close_time),
                }
                true
            }
            Some(RiskAction::Exit { reason, level }) => {
                self.submit_exit(reason, level, candle.close_time);
                true
            }
            Some(RiskAction::Reduce {
                level_index,
                trigger_price,
                volume,
            }) => {
                self.submit_reduce(level_index, trigger_price, volume);
                true
            }
            None => {
                if resting && (check.stop_changed || !self.protection_placed()) {
                    self.sync_protection();
                }
                false
            }
        }
    }

    // ─── Signals ─────────────────────────────────────────────────────────────

    /// Map an entry the direction gate forbids to a plain exit.
    fn gate(&self, kind: SignalKind) -> SignalKind {
        let direction = self.config.direction;
        match kind {
            SignalKind::EnterLong if !direction.allows(Side::Long) => SignalKind::ExitShort,
            SignalKind::EnterShort if !direction.allows(Side::Short) => SignalKind::ExitLong,
            kind => kind,
        }
    }

    fn act_on(&mut self, kind: SignalKind, candle: &Candle) {
        let kind = self.gate(kind);
        let position = *self.book.confirmed();
        let net = position.net();
        let base = self.config.base_volume;

        let (target, purpose) = match (kind, position.side) {
            (SignalKind::None, _) => return,
            (SignalKind::ExitLong, PositionSide::Long) | (SignalKind::ExitShort, PositionSide::Short) => {
                (0.0, OrderPurpose::Exit(ExitReason::Signal))
            }
            (SignalKind::ExitLong | SignalKind::ExitShort, _) => {
                trace!(pair = %self.config.pair, signal = %kind, "Nothing to exit");
                return;
            }
            (SignalKind::EnterLong, PositionSide::Flat) => (base, OrderPurpose::Entry),
            (SignalKind::EnterShort, PositionSide::Flat) => (-base, OrderPurpose::Entry),
            (SignalKind::EnterLong, PositionSide::Long) | (SignalKind::EnterShort, PositionSide::Short) => {
                if !self.config.allow_scaling {
                    debug!(pair = %self.config.pair, signal = %kind, "Already in target state");
                    return;
                }
                (net + net.signum() * base, OrderPurpose::Entry)
            }
            (SignalKind::EnterLong, PositionSide::Short) | (SignalKind::EnterShort, PositionSide::Long) => {
                if self.config.allow_reversal {
                    let side = if kind == SignalKind::EnterLong { 1.0 } else { -1.0 };
                    (side * base, OrderPurpose::Entry)
                } else {
                    (0.0, OrderPurpose::Exit(ExitReason::Reversal))
                }
            }
        };

        if purpose == OrderPurpose::Entry && self.cooling_down(candle.close_time) {
            debug!(pair = %self.config.pair, signal = %kind, "Entry suppressed by cooldown");
            return;
        }

        let Some((side, volume)) = order_for_target(net, target) else {
            return;
        };
        match self.router.submit_market(side, volume, purpose) {
            Ok(order_id) => {
                self.book.set_pending(order_id, target, volume);
                if purpose == OrderPurpose::Entry {
                    self.last_entry = Some(candle.close_time);
                    let entry_side = if target > net { Side::Long } else { Side::Short };
                    info!(pair = %self.config.pair, side = %entry_side, volume, "Entry submitted");
                    self.emit(EngineEvent::EntrySubmitted {
                        pair: self.config.pair.clone(),
                        side: entry_side,
                        volume,
                    });
                } else {
                    info!(pair = %self.config.pair, signal = %kind, volume, "Exit submitted");
                }
            }
            Err(e) => {
                warn!(pair = %self.config.pair, signal = %kind, error = %e, "Order rejected on submit");
                self.emit(EngineEvent::OrderRejected {
                    pair: self.config.pair.clone(),
                    order_id: String::new(),
                    reason: e.to_string(),
                });
            }
        }
    }

    fn cooling_down(&self, now: DateTime<Utc>) -> bool {
        if self.config.cooldown_secs == 0 {
            return false;
        }
        let cooldown = Duration::seconds(self.config.cooldown_secs as i64);
        self.last_entry.is_some_and(|last| now < last + cooldown)
    }

    // ─── Protective exits ────────────────────────────────────────────────────

    fn submit_exit(&mut self, reason: ExitReason, level: f64, time: DateTime<Utc>) {
        let position = *self.book.confirmed();
        let Some(side) = position.side.as_side() else {
            return;
        };
        let volume = position.volume;
        match self.router.submit_market(side.exit_order(), volume, OrderPurpose::Exit(reason)) {
            Ok(order_id) => {
                info!(pair = %self.config.pair, %reason, level, volume, time = %time, "Protective exit");
                self.book.set_pending(order_id, 0.0, volume);
                self.emit(EngineEvent::ProtectiveExit {
                    pair: self.config.pair.clone(),
                    reason,
                    level,
                    volume,
                });
            }
            Err(e) => {
                warn!(pair = %self.config.pair, %reason, error = %e, "Protective exit rejected on submit");
                self.emit(EngineEvent::OrderRejected {
                    pair: self.config.pair.clone(),
                    order_id: String::new(),
                    reason: e.to_string(),
                });
            }
        }
    }

    fn submit_reduce(&mut self, level_index: usize, trigger_price: f64, volume: f64) {
        let position = *self.book.confirmed();
        let Some(side) = position.side.as_side() else {
            return;
        };
        let volume = volume.min(position.volume);
        let target = position.net() - side.sign() * volume;
        match self
            .router
            .submit_market(side.exit_order(), volume, OrderPurpose::Reduce { level_index })
        {
            Ok(order_id) => {
                info!(pair = %self.config.pair, level = level_index, trigger_price, volume, "Partial exit");
                self.book.set_pending(order_id, target, volume);
                self.emit(EngineEvent::PartialExit {
                    pair: self.config.pair.clone(),
                    level_index,
                    trigger_price,
                    volume,
                });
            }
            Err(e) => {
                warn!(pair = %self.config.pair, level = level_index, error = %e, "Partial exit rejected on submit");
                if let Some(state) = self.risk_state.as_mut() {
                    state.unfire_partial(level_index);
                }
                self.emit(EngineEvent::OrderRejected {
                    pair: self.config.pair.clone(),
                    order_id: String::new(),
                    reason: e.to_string(),
                });
            }
        }
    }

    /// Whether the resting orders cover every level the risk state holds.
    fn protection_placed(&self) -> bool {
        let Some(state) = self.risk_state.as_ref() else {
            return true;
        };
        state.effective_stop().is_some() == self.router.resting_stop().is_some()
            && state.take_profit_price.is_some() == self.router.resting_target().is_some()
    }

    /// Place or move the resting stop and target to match the risk state.
    fn sync_protection(&mut self) {
        if !self.resting() {
            return;
        }
        let position = *self.book.confirmed();
        let (Some(side), Some(state)) = (position.side.as_side(), self.risk_state.as_ref()) else {
            self.router.cancel_protection();
            return;
        };
        let trailing = state.trailing.and_then(|t| t.level());
        let stop = state.effective_stop().map(|price| {
            let reason = if trailing == Some(price) && state.stop_price != Some(price) {
                ExitReason::TrailingStop
            } else {
                ExitReason::StopLoss
            };
            (price, reason)
        });
        let target = state.take_profit_price;
        self.router
            .sync_protection(side.exit_order(), position.volume, stop, target);
    }

    // ─── Execution reports ───────────────────────────────────────────────────

    pub fn on_report(&mut self, report: &ExecutionReport) {
        match report {
            ExecutionReport::Filled(fill) => {
                self.on_filled(&fill.order_id, fill.price, fill.volume, fill.timestamp)
            }
            ExecutionReport::Rejected { order_id, reason } => self.on_rejected(order_id, reason),
            ExecutionReport::Cancelled { order_id } => self.on_cancelled(order_id),
        }
    }

    /// Apply a fill. The only place the position changes.
    pub fn on_filled(&mut self, order_id: &str, price: f64, volume: f64, time: DateTime<Utc>) {
        let Some(order) = self.router.lookup(order_id) else {
            warn!(pair = %self.config.pair, order_id, "Fill for unknown order ignored");
            return;
        };

        if self.book.settle_pending(order_id, volume) || order.volume - volume <= EPSILON {
            self.router.settle(order_id);
            self.release(order_id);
        }

        let position = *self.book.confirmed();
        let mut applied = volume;
        if order.purpose.is_reduce_only() {
            let reduces = position
                .side
                .as_side()
                .is_some_and(|side| side.exit_order() == order.side);
            if !reduces {
                debug!(pair = %self.config.pair, order_id, "Late reduce-only fill on flat position ignored");
                return;
            }
            applied = volume.min(position.volume);
        }

        let outcome = self.book.apply_fill(order.side, price, applied, time);
        let now = *self.book.confirmed();
        info!(
            pair = %self.config.pair,
            order_id,
            side = %order.side,
            price,
            volume = applied,
            position = %now.side,
            held = now.volume,
            "Fill applied"
        );

        match outcome {
            FillOutcome::Opened | FillOutcome::Flipped => self.arm_risk(now, None),
            FillOutcome::Added => {
                let entry_time = self.risk_state.as_ref().map(|s| s.entry_time);
                self.arm_risk(now, entry_time);
            }
            FillOutcome::Reduced => self.sync_protection(),
            FillOutcome::Closed => {
                self.risk_state = None;
                self.triggered = None;
                self.router.cancel_protection();
            }
        }

        if let OrderPurpose::Protective(reason) = order.purpose {
            info!(pair = %self.config.pair, %reason, level = price, "Resting protective order filled");
            self.emit(EngineEvent::ProtectiveExit {
                pair: self.config.pair.clone(),
                reason,
                level: price,
                volume: applied,
            });
        }

        self.emit(EngineEvent::PositionChanged {
            pair: self.config.pair.clone(),
            side: now.side,
            volume: now.volume,
            entry_price: now.entry_price,
        });
    }

    /// Build a fresh risk state for the current position. `entry_time`
    /// overrides the position's own when scaling keeps the original clock.
    fn arm_risk(&mut self, position: Position, entry_time: Option<DateTime<Utc>>) {
        let Some(side) = position.side.as_side() else {
            self.risk_state = None;
            return;
        };
        let Some(entry_time) = entry_time.or(position.entry_time).or(self.last_candle) else {
            warn!(pair = %self.config.pair, "No entry time for position, protection not armed");
            return;
        };
        // Cancel whatever rested for the previous state before re-arming.
        if self.resting() && self.risk_state.is_some() {
            self.router.cancel_protection();
        }
        let (state, refused) =
            self.risk
                .open(side, position.entry_price, entry_time, position.volume, self.latest_atr);
        if let Some(e) = refused {
            warn!(pair = %self.config.pair, error = %e, "Position left without price protection");
            self.emit(EngineEvent::ProtectionRefused {
                pair: self.config.pair.clone(),
                reason: e.to_string(),
            });
        }
        self.risk_state = Some(state);
        self.sync_protection();
    }

    pub fn on_rejected(&mut self, order_id: &str, reason: &str) {
        let order = self.router.settle(order_id);
        self.book.abandon_pending(order_id);
        self.release(order_id);
        warn!(pair = %self.config.pair, order_id, reason, "Order rejected");

        if let Some(order) = order {
            if let OrderPurpose::Reduce { level_index } = order.purpose {
                if let Some(state) = self.risk_state.as_mut() {
                    state.unfire_partial(level_index);
                }
            }
        }
        self.emit(EngineEvent::OrderRejected {
            pair: self.config.pair.clone(),
            order_id: order_id.to_string(),
            reason: reason.to_string(),
        });
    }

    pub fn on_cancelled(&mut self, order_id: &str) {
        self.router.settle(order_id);
        self.release(order_id);
        if self.book.abandon_pending(order_id) {
            warn!(pair = %self.config.pair, order_id, "Pending order cancelled, target not reached");
        } else {
            debug!(pair = %self.config.pair, order_id, "Cancel confirmed");
        }
    }

    /// Reopen the gate once the triggered resting order is done.
    fn release(&mut self, order_id: &str) {
        if self.triggered.as_deref() == Some(order_id) {
            self.triggered = None;
        }
    }

    /// Adopt the host's authoritative position instead of the shadowed one.
    pub fn reconcile(&mut self, position: Position) {
        let before = *self.book.confirmed();
        self.book.reconcile(position);
        self.triggered = None;
        let now = *self.book.confirmed();
        info!(pair = %self.config.pair, from = %before.side, to = %now.side, volume = now.volume, "Position reconciled");

        if now.is_flat() {
            self.risk_state = None;
            self.router.cancel_protection();
        } else if before.side != now.side || self.risk_state.is_none() {
            self.arm_risk(now, None);
        } else if (before.volume - now.volume).abs() > EPSILON {
            self.sync_protection();
        }

        self.emit(EngineEvent::PositionChanged {
            pair: self.config.pair.clone(),
            side: now.side,
            volume: now.volume,
            entry_price: now.entry_price,
        });
    }
}
