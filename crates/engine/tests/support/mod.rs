#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::{self, UnboundedReceiver};

use common::{
    Candle, CandleState, EngineEvent, ExecutionReport, Fill, IndicatorSample, IndicatorSamples,
    IndicatorValue, Order, OrderId, OrderSink, Result, SignalKind,
};
use engine::Engine;
use risk::{ProtectiveLevels, RiskConfig};
use strategy::indicators::{IndicatorConfig, IndicatorKind};
use strategy::signals::{CrossoverConfig, SignalConfig};
use strategy::{ExternalSignal, SignalSource, StrategyConfig};

pub const PAIR: &str = "BTCUSDT";

/// Sink that records every request and optionally refuses submissions.
#[derive(Default, Clone)]
pub struct Recorder {
    orders: Arc<Mutex<Vec<Order>>>,
    cancelled: Arc<Mutex<Vec<OrderId>>>,
    refuse: Arc<Mutex<bool>>,
}

impl Recorder {
    pub fn orders(&self) -> Vec<Order> {
        self.orders.lock().unwrap().clone()
    }

    pub fn last(&self) -> Order {
        self.orders.lock().unwrap().last().cloned().expect("no order submitted")
    }

    pub fn count(&self) -> usize {
        self.orders.lock().unwrap().len()
    }

    pub fn cancelled(&self) -> Vec<OrderId> {
        self.cancelled.lock().unwrap().clone()
    }

    pub fn refuse(&self, on: bool) {
        *self.refuse.lock().unwrap() = on;
    }
}

impl OrderSink for Recorder {
    fn submit(&mut self, order: Order) -> Result<OrderId> {
        if *self.refuse.lock().unwrap() {
            return Err(common::Error::Exchange("executor offline".into()));
        }
        let id = order.id.clone();
        self.orders.lock().unwrap().push(order);
        Ok(id)
    }

    fn cancel(&mut self, order_id: &str) -> Result<()> {
        self.cancelled.lock().unwrap().push(order_id.to_string());
        Ok(())
    }
}

pub fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
}

pub fn bar(i: i64, open: f64, high: f64, low: f64, close: f64) -> Candle {
    Candle {
        pair: PAIR.into(),
        open_time: at(i * 60),
        close_time: at(i * 60 + 60),
        open,
        high,
        low,
        close,
        volume: 1.0,
        state: CandleState::Finished,
    }
}

pub fn flat_bar(i: i64, price: f64) -> Candle {
    bar(i, price, price, price, price)
}

fn indicator(name: &str, kind: IndicatorKind) -> IndicatorConfig {
    IndicatorConfig {
        name: name.into(),
        kind,
    }
}

pub fn strategy(base_volume: f64, risk: RiskConfig) -> StrategyConfig {
    StrategyConfig {
        name: "test".into(),
        pair: PAIR.into(),
        base_volume,
        direction: Default::default(),
        allow_reversal: false,
        allow_scaling: false,
        cooldown_secs: 0,
        atr_indicator: None,
        trend_filter: None,
        indicators: vec![
            indicator("fast", IndicatorKind::Sma { period: 2 }),
            indicator("slow", IndicatorKind::Sma { period: 5 }),
            indicator("atr", IndicatorKind::Atr { period: 14 }),
        ],
        signal: SignalConfig::Crossover(CrossoverConfig {
            fast: "fast".into(),
            slow: Some("slow".into()),
        }),
        risk,
    }
}

/// Signal source that emits `kind` on the bars listed by index.
pub fn scripted(script: &[(i64, SignalKind)]) -> Box<dyn SignalSource> {
    let script: HashMap<i64, SignalKind> = script.iter().copied().collect();
    Box::new(ExternalSignal::new("scripted", move |c: &Candle| {
        let index = (c.open_time - at(0)).num_minutes();
        script.get(&index).copied()
    }))
}

pub struct Harness {
    pub engine: Engine,
    pub sink: Recorder,
    pub events: UnboundedReceiver<EngineEvent>,
}

impl Harness {
    pub fn new(config: StrategyConfig, source: Box<dyn SignalSource>) -> Self {
        let sink = Recorder::default();
        let (tx, events) = mpsc::unbounded_channel();
        let risk = Box::new(ProtectiveLevels::new(config.risk.clone()));
        let engine = Engine::new(config, source, risk, Box::new(sink.clone()))
            .expect("valid strategy config")
            .with_events(tx);
        Self { engine, sink, events }
    }

    pub fn candle(&mut self, candle: &Candle) {
        self.engine.on_finished_candle(candle, &IndicatorSamples::new());
    }

    pub fn candle_with(&mut self, candle: &Candle, samples: &IndicatorSamples) {
        self.engine.on_finished_candle(candle, samples);
    }

    /// Fill the most recent order completely at `price`.
    pub fn fill_last(&mut self, price: f64, time: DateTime<Utc>) -> Order {
        let order = self.sink.last();
        self.fill(&order, price, order.volume, time);
        order
    }

    pub fn fill(&mut self, order: &Order, price: f64, volume: f64, time: DateTime<Utc>) {
        self.engine.on_report(&ExecutionReport::Filled(Fill {
            order_id: order.id.clone(),
            pair: order.pair.clone(),
            side: order.side,
            price,
            volume,
            timestamp: time,
        }));
    }

    pub fn drain_events(&mut self) -> Vec<EngineEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}

pub fn samples(time: DateTime<Utc>, values: &[(&str, f64)]) -> IndicatorSamples {
    let mut samples = IndicatorSamples::new();
    for (name, value) in values {
        samples.insert(IndicatorSample {
            name: name.to_string(),
            value: IndicatorValue::Scalar { value: *value },
            formed: true,
            time,
        });
    }
    samples
}
