use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use common::{Candle, Config, EngineEvent, ExecutionReport};
use engine::{Engine, ReplayFeed};
use paper::{PaperExchange, PaperSink};
use risk::ProtectiveLevels;
use strategy::{IndicatorPipeline, StrategyFileConfig, StrategyRegistry};

/// One strategy wired to its engine.
struct Runner {
    engine: Engine,
    pipeline: IndicatorPipeline,
    last_bar: Option<DateTime<Utc>>,
}

impl Runner {
    fn on_candle(&mut self, candle: &Candle) {
        if candle.pair != self.engine.config().pair || !candle.is_finished() {
            return;
        }
        // Indicators must see each finished bar exactly once.
        if self.last_bar.is_some_and(|last| candle.open_time <= last) {
            return;
        }
        self.last_bar = Some(candle.open_time);
        let samples = self.pipeline.update(candle);
        self.engine.on_finished_candle(candle, &samples);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // ── Config ───────────────────────────────────────────────────────────────
    let cfg = Config::from_env().context("loading environment config")?;
    info!(candles = %cfg.candles_path, strategies = %cfg.strategy_config_path, "barbot starting");

    let strategy_file = StrategyFileConfig::load(&cfg.strategy_config_path)?;
    let registry = StrategyRegistry::from_config(&strategy_file)?;
    if registry.is_empty() {
        anyhow::bail!("no strategies declared in {}", cfg.strategy_config_path);
    }

    // ── Paper executor ───────────────────────────────────────────────────────
    let exchange = Arc::new(Mutex::new(PaperExchange::new(
        cfg.paper_initial_balance,
        cfg.paper_slippage_bps,
    )));
    let (report_tx, mut report_rx) = mpsc::unbounded_channel::<ExecutionReport>();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<EngineEvent>();

    // ── Engines ──────────────────────────────────────────────────────────────
    let mut runners = registry
        .into_strategies()
        .into_iter()
        .map(|built| {
            let risk = Box::new(ProtectiveLevels::new(built.config.risk.clone()));
            let sink = Box::new(PaperSink::new(exchange.clone(), report_tx.clone()));
            let engine = Engine::new(built.config, built.source, risk, sink)?.with_events(event_tx.clone());
            Ok(Runner {
                engine,
                pipeline: built.pipeline,
                last_bar: None,
            })
        })
        .collect::<common::Result<Vec<Runner>>>()?;
    drop(event_tx);
    drop(report_tx);

    // ── Event forwarder ──────────────────────────────────────────────────────
    let forwarder = tokio::spawn(async move {
        let mut count = 0usize;
        while let Some(event) = event_rx.recv().await {
            log_event(&event);
            count += 1;
        }
        count
    });

    // ── Replay ───────────────────────────────────────────────────────────────
    let (candle_tx, mut candle_rx) = mpsc::channel::<Candle>(1024);
    let feed = tokio::spawn(ReplayFeed::new(cfg.candles_path.clone(), candle_tx).run());

    loop {
        tokio::select! {
            // Fills land before the next candle is decided on.
            biased;
            Some(report) = report_rx.recv() => route(&mut runners, &report),
            candle = candle_rx.recv() => match candle {
                Some(candle) => {
                    let reports = exchange
                        .lock()
                        .map_err(|_| anyhow!("paper executor state poisoned"))?
                        .on_candle(&candle);
                    for report in &reports {
                        route(&mut runners, report);
                    }
                    for runner in &mut runners {
                        runner.on_candle(&candle);
                    }
                }
                None => break,
            },
        }
    }

    while let Ok(report) = report_rx.try_recv() {
        route(&mut runners, &report);
    }
    let replayed = feed.await?.context("replaying candles")?;

    // ── Summary ──────────────────────────────────────────────────────────────
    for runner in &runners {
        let position = runner.engine.position();
        info!(
            strategy = %runner.engine.config().name,
            pair = %runner.engine.config().pair,
            side = %position.side,
            volume = position.volume,
            entry = position.entry_price,
            pending = runner.engine.is_pending(),
            "Final position"
        );
    }
    {
        let exchange = exchange
            .lock()
            .map_err(|_| anyhow!("paper executor state poisoned"))?;
        info!(
            candles = replayed,
            fills = exchange.account().fills,
            cash = exchange.account().cash,
            equity = exchange.equity(),
            "Replay complete"
        );
    }

    drop(runners);
    let events = forwarder.await?;
    info!(events, "Shutdown complete");
    Ok(())
}

/// Hand a report to the engine that sent the order.
fn route(runners: &mut [Runner], report: &ExecutionReport) {
    let order_id = report.order_id();
    match runners
        .iter_mut()
        .find(|r| r.engine.router().lookup(order_id).is_some())
    {
        Some(runner) => runner.engine.on_report(report),
        None => debug!(order_id, "Report for an order no engine tracks"),
    }
}

fn log_event(event: &EngineEvent) {
    match event {
        EngineEvent::EntrySubmitted { pair, side, volume } => {
            info!(%pair, %side, volume, "Entry")
        }
        EngineEvent::ProtectiveExit { pair, reason, level, volume } => {
            info!(%pair, %reason, level, volume, "Protective exit")
        }
        EngineEvent::PartialExit { pair, level_index, trigger_price, volume } => {
            info!(%pair, level = level_index, trigger_price, volume, "Partial exit")
        }
        EngineEvent::BreakevenArmed { pair, stop_price } => {
            info!(%pair, stop = stop_price, "Breakeven armed")
        }
        EngineEvent::ProtectionRefused { pair, reason } => {
            warn!(%pair, %reason, "Protection refused")
        }
        EngineEvent::OrderRejected { pair, order_id, reason } => {
            warn!(%pair, %order_id, %reason, "Order rejected")
        }
        EngineEvent::PositionChanged { pair, side, volume, entry_price } => {
            info!(%pair, %side, volume, entry = entry_price, "Position changed")
        }
    }
}
