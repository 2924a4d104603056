mod support;

use common::{
    CandleState, Direction, EngineEvent, ExecutionReport, ExitReason, OrderKind, OrderSide,
    PositionSide, Side, SignalKind,
};
use engine::{Engine, Position};
use risk::{BreakevenConfig, Distance, PartialExitConfig, ProtectionMode, ProtectiveLevels, RiskConfig};

use support::*;

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

fn stop_pct(pct: f64) -> RiskConfig {
    RiskConfig {
        stop_loss: Some(Distance::Percent(pct)),
        ..RiskConfig::default()
    }
}

#[test]
fn crossover_opens_a_long_for_base_volume() {
    let config = strategy(2.0, RiskConfig::default());
    let source = config.signal.build();
    let mut h = Harness::new(config, source);

    h.candle_with(&flat_bar(0, 100.0), &samples(at(60), &[("fast", 9.0), ("slow", 10.0)]));
    assert_eq!(h.sink.count(), 0);

    h.candle_with(&flat_bar(1, 101.0), &samples(at(120), &[("fast", 11.0), ("slow", 10.0)]));
    let order = h.sink.last();
    assert_eq!(order.side, OrderSide::Buy);
    assert_eq!(order.volume, 2.0);
    assert_eq!(order.kind, OrderKind::Market);
    assert!(h.engine.is_pending());

    h.fill_last(101.0, at(120));
    let p = h.engine.position();
    assert_eq!(p.side, PositionSide::Long);
    assert_eq!(p.volume, 2.0);
    assert!(!h.engine.is_pending());
}

#[test]
fn stop_loss_exits_before_the_signal_is_considered() {
    let mut h = Harness::new(
        strategy(10.0, stop_pct(2.0)),
        scripted(&[(0, SignalKind::EnterLong), (1, SignalKind::EnterLong)]),
    );
    h.candle(&flat_bar(0, 100.0));
    h.fill_last(100.0, at(60));
    let stop = h.engine.risk_state().unwrap().stop_price.unwrap();
    assert!(approx(stop, 98.0));

    h.candle(&bar(1, 100.0, 100.5, 97.0, 98.0));
    let exit = h.sink.last();
    assert_eq!(exit.side, OrderSide::Sell);
    assert_eq!(exit.volume, 10.0);
    assert!(h.drain_events().iter().any(|e| matches!(
        e,
        EngineEvent::ProtectiveExit { reason: ExitReason::StopLoss, volume, .. } if *volume == 10.0
    )));

    h.fill_last(98.0, at(120));
    assert!(h.engine.position().is_flat());
    assert_eq!(h.engine.position().volume, 0.0);
    assert!(h.engine.risk_state().is_none());
}

#[test]
fn reversal_flips_in_one_order() {
    let mut config = strategy(5.0, RiskConfig::default());
    config.allow_reversal = true;
    let mut h = Harness::new(config, scripted(&[(0, SignalKind::EnterShort)]));
    h.engine.reconcile(Position::open(Side::Long, 10.0, 100.0, at(0)));

    h.candle(&flat_bar(0, 101.0));
    assert_eq!(h.sink.count(), 1);
    let order = h.sink.last();
    assert_eq!(order.side, OrderSide::Sell);
    assert!(approx(order.volume, 15.0));

    h.fill_last(101.0, at(60));
    let p = h.engine.position();
    assert_eq!(p.side, PositionSide::Short);
    assert!(approx(p.volume, 5.0));
    assert_eq!(p.entry_price, 101.0);
    assert_eq!(h.engine.risk_state().unwrap().side, Side::Short);
}

#[test]
fn opposite_signal_without_reversal_only_closes() {
    let mut h = Harness::new(strategy(5.0, RiskConfig::default()), scripted(&[(0, SignalKind::EnterShort)]));
    h.engine.reconcile(Position::open(Side::Long, 10.0, 100.0, at(0)));

    h.candle(&flat_bar(0, 101.0));
    let order = h.sink.last();
    assert_eq!(order.side, OrderSide::Sell);
    assert_eq!(order.volume, 10.0);
    h.fill_last(101.0, at(60));
    assert!(h.engine.position().is_flat());
}

#[test]
fn zero_atr_leaves_the_stop_unplaced_until_it_resolves() {
    let mut config = strategy(
        1.0,
        RiskConfig {
            stop_loss: Some(Distance::Atr(2.0)),
            ..RiskConfig::default()
        },
    );
    config.atr_indicator = Some("atr".into());
    let mut h = Harness::new(config, scripted(&[(0, SignalKind::EnterLong)]));

    h.candle_with(&flat_bar(0, 100.0), &samples(at(60), &[("atr", 0.0)]));
    h.fill_last(100.0, at(60));
    assert_eq!(h.engine.position().side, PositionSide::Long);
    assert_eq!(h.engine.risk_state().unwrap().stop_price, None);

    h.candle_with(&flat_bar(1, 100.5), &samples(at(120), &[("atr", 1.5)]));
    let stop = h.engine.risk_state().unwrap().stop_price.unwrap();
    assert!(approx(stop, 97.0));
    assert_eq!(h.engine.position().side, PositionSide::Long);
    assert_eq!(h.sink.count(), 1);
}

#[test]
fn partial_exit_reduces_once_and_keeps_levels() {
    let risk = RiskConfig {
        stop_loss: Some(Distance::Percent(2.0)),
        take_profit: Some(Distance::Percent(5.0)),
        partial_exits: vec![PartialExitConfig {
            trigger: Distance::Percent(1.0),
            volume_fraction: 0.5,
        }],
        ..RiskConfig::default()
    };
    let mut h = Harness::new(strategy(10.0, risk), scripted(&[(0, SignalKind::EnterLong)]));
    h.candle(&flat_bar(0, 100.0));
    h.fill_last(100.0, at(60));
    let before = h.engine.risk_state().unwrap().clone();

    h.candle(&bar(1, 100.0, 101.5, 99.5, 101.0));
    let reduce = h.sink.last();
    assert_eq!(reduce.side, OrderSide::Sell);
    assert!(approx(reduce.volume, 5.0));
    h.fill_last(101.0, at(120));

    let p = h.engine.position();
    assert_eq!(p.side, PositionSide::Long);
    assert!(approx(p.volume, 5.0));
    let state = h.engine.risk_state().unwrap();
    assert_eq!(state.stop_price, before.stop_price);
    assert_eq!(state.take_profit_price, before.take_profit_price);
    assert!(state.partial_exits[0].fired);
    assert_eq!(state.original_volume, 10.0);

    h.candle(&bar(2, 101.0, 101.5, 100.5, 101.0));
    assert_eq!(h.sink.count(), 2);
}

#[test]
fn rejected_partial_exit_can_fire_again() {
    let risk = RiskConfig {
        partial_exits: vec![PartialExitConfig {
            trigger: Distance::Absolute(1.0),
            volume_fraction: 0.5,
        }],
        ..RiskConfig::default()
    };
    let mut h = Harness::new(strategy(4.0, risk), scripted(&[(0, SignalKind::EnterLong)]));
    h.candle(&flat_bar(0, 100.0));
    h.fill_last(100.0, at(60));

    h.candle(&bar(1, 100.0, 101.5, 100.0, 101.0));
    let reduce = h.sink.last();
    h.engine.on_report(&ExecutionReport::Rejected {
        order_id: reduce.id.clone(),
        reason: "insufficient liquidity".into(),
    });
    assert!(!h.engine.is_pending());
    assert!(!h.engine.risk_state().unwrap().partial_exits[0].fired);

    h.candle(&bar(2, 101.0, 101.5, 100.5, 101.0));
    assert_eq!(h.sink.count(), 3);
    assert!(approx(h.sink.last().volume, 2.0));
}

#[test]
fn duplicate_and_stale_candles_are_ignored() {
    let mut h = Harness::new(strategy(1.0, RiskConfig::default()), scripted(&[(0, SignalKind::EnterLong), (1, SignalKind::ExitLong)]));
    h.candle(&flat_bar(0, 100.0));
    h.fill_last(100.0, at(60));

    h.candle(&flat_bar(0, 100.0));
    assert_eq!(h.sink.count(), 1);

    h.candle(&flat_bar(1, 100.0));
    assert_eq!(h.sink.count(), 2);
    h.fill_last(100.0, at(120));

    // Going back in time changes nothing.
    h.candle(&flat_bar(0, 100.0));
    assert_eq!(h.sink.count(), 2);
    assert!(h.engine.position().is_flat());
}

#[test]
fn in_progress_candles_never_trade() {
    let mut h = Harness::new(strategy(1.0, RiskConfig::default()), scripted(&[(0, SignalKind::EnterLong)]));
    let mut candle = flat_bar(0, 100.0);
    candle.state = CandleState::InProgress;
    h.candle(&candle);
    assert_eq!(h.sink.count(), 0);

    candle.state = CandleState::Finished;
    h.candle(&candle);
    assert_eq!(h.sink.count(), 1);
}

#[test]
fn no_decisions_while_an_order_is_unresolved() {
    let mut h = Harness::new(
        strategy(1.0, RiskConfig::default()),
        scripted(&[(0, SignalKind::EnterLong), (1, SignalKind::EnterShort), (2, SignalKind::EnterShort)]),
    );
    h.candle(&flat_bar(0, 100.0));
    h.candle(&flat_bar(1, 100.0));
    assert_eq!(h.sink.count(), 1);
    assert!(h.engine.is_pending());

    h.fill_last(100.0, at(120));
    h.candle(&flat_bar(2, 100.0));
    assert_eq!(h.sink.count(), 2);
    assert_eq!(h.sink.last().side, OrderSide::Sell);
}

#[test]
fn rejection_clears_the_pending_target() {
    let mut h = Harness::new(
        strategy(1.0, RiskConfig::default()),
        scripted(&[(0, SignalKind::EnterLong), (1, SignalKind::EnterLong)]),
    );
    h.candle(&flat_bar(0, 100.0));
    let order = h.sink.last();
    h.engine.on_report(&ExecutionReport::Rejected {
        order_id: order.id,
        reason: "price band".into(),
    });
    assert!(!h.engine.is_pending());
    assert!(h.engine.position().is_flat());
    assert!(h
        .drain_events()
        .iter()
        .any(|e| matches!(e, EngineEvent::OrderRejected { .. })));

    h.candle(&flat_bar(1, 100.0));
    assert_eq!(h.sink.count(), 2);
}

#[test]
fn submit_failure_is_treated_as_rejection() {
    let mut h = Harness::new(strategy(1.0, RiskConfig::default()), scripted(&[(0, SignalKind::EnterLong)]));
    h.sink.refuse(true);
    h.candle(&flat_bar(0, 100.0));
    assert_eq!(h.sink.count(), 0);
    assert!(!h.engine.is_pending());
    assert!(h
        .drain_events()
        .iter()
        .any(|e| matches!(e, EngineEvent::OrderRejected { .. })));
}

#[test]
fn late_exit_fill_on_a_flat_position_is_a_no_op() {
    let mut h = Harness::new(
        strategy(1.0, RiskConfig::default()),
        scripted(&[(0, SignalKind::EnterLong), (1, SignalKind::ExitLong)]),
    );
    h.candle(&flat_bar(0, 100.0));
    h.fill_last(100.0, at(60));
    h.candle(&flat_bar(1, 100.0));
    let exit = h.sink.last();

    h.engine.reconcile(Position::flat());
    h.fill(&exit, 100.0, exit.volume, at(120));
    assert!(h.engine.position().is_flat());
    assert_eq!(h.engine.position().volume, 0.0);
}

#[test]
fn cooldown_suppresses_entries_but_not_exits() {
    let mut config = strategy(1.0, RiskConfig::default());
    config.cooldown_secs = 300;
    let mut h = Harness::new(
        config,
        scripted(&[
            (0, SignalKind::EnterLong),
            (1, SignalKind::ExitLong),
            (2, SignalKind::EnterLong),
            (5, SignalKind::EnterLong),
        ]),
    );
    h.candle(&flat_bar(0, 100.0));
    h.fill_last(100.0, at(60));
    h.candle(&flat_bar(1, 100.0));
    assert_eq!(h.sink.last().side, OrderSide::Sell);
    h.fill_last(100.0, at(120));

    h.candle(&flat_bar(2, 100.0));
    assert_eq!(h.sink.count(), 2);

    h.candle(&flat_bar(5, 100.0));
    assert_eq!(h.sink.count(), 3);
    assert_eq!(h.sink.last().side, OrderSide::Buy);
}

#[test]
fn long_only_turns_short_entries_into_exits() {
    let mut config = strategy(1.0, RiskConfig::default());
    config.direction = Direction::LongOnly;
    config.allow_reversal = true;
    let mut h = Harness::new(
        config,
        scripted(&[(0, SignalKind::EnterLong), (1, SignalKind::EnterShort), (2, SignalKind::EnterShort)]),
    );
    h.candle(&flat_bar(0, 100.0));
    h.fill_last(100.0, at(60));

    h.candle(&flat_bar(1, 100.0));
    let exit = h.sink.last();
    assert_eq!(exit.side, OrderSide::Sell);
    assert_eq!(exit.volume, 1.0);
    h.fill_last(100.0, at(120));
    assert!(h.engine.position().is_flat());

    h.candle(&flat_bar(2, 100.0));
    assert_eq!(h.sink.count(), 2);
}

#[test]
fn scaling_adds_base_volume_and_rearms_at_the_average() {
    let mut config = strategy(
        1.0,
        RiskConfig {
            stop_loss: Some(Distance::Absolute(2.0)),
            ..RiskConfig::default()
        },
    );
    config.allow_scaling = true;
    let mut h = Harness::new(
        config,
        scripted(&[(0, SignalKind::EnterLong), (1, SignalKind::EnterLong)]),
    );
    h.candle(&flat_bar(0, 100.0));
    h.fill_last(100.0, at(60));

    h.candle(&flat_bar(1, 110.0));
    let add = h.sink.last();
    assert_eq!(add.side, OrderSide::Buy);
    assert_eq!(add.volume, 1.0);
    h.fill_last(110.0, at(120));

    let p = h.engine.position();
    assert!(approx(p.volume, 2.0));
    assert!(approx(p.entry_price, 105.0));
    let state = h.engine.risk_state().unwrap();
    assert!(approx(state.entry_price, 105.0));
    assert!(approx(state.stop_price.unwrap(), 103.0));
    assert_eq!(state.original_volume, 2.0);
    assert_eq!(state.entry_time, at(60));
}

#[test]
fn same_side_entry_without_scaling_is_ignored() {
    let mut h = Harness::new(
        strategy(1.0, RiskConfig::default()),
        scripted(&[(0, SignalKind::EnterLong), (1, SignalKind::EnterLong)]),
    );
    h.candle(&flat_bar(0, 100.0));
    h.fill_last(100.0, at(60));
    h.candle(&flat_bar(1, 101.0));
    assert_eq!(h.sink.count(), 1);
}

#[test]
fn time_stop_closes_at_expiry() {
    let risk = RiskConfig {
        max_holding_secs: Some(120),
        ..RiskConfig::default()
    };
    let mut h = Harness::new(strategy(1.0, risk), scripted(&[(0, SignalKind::EnterLong)]));
    h.candle(&flat_bar(0, 100.0));
    h.fill_last(100.0, at(60));

    h.candle(&flat_bar(1, 100.0));
    assert_eq!(h.sink.count(), 1);
    h.candle(&flat_bar(2, 100.0));
    assert_eq!(h.sink.count(), 2);
    assert!(h.drain_events().iter().any(|e| matches!(
        e,
        EngineEvent::ProtectiveExit { reason: ExitReason::Expiry, .. }
    )));
}

#[test]
fn breakeven_arming_is_reported() {
    let risk = RiskConfig {
        stop_loss: Some(Distance::Absolute(5.0)),
        breakeven: Some(BreakevenConfig {
            trigger: Distance::Absolute(3.0),
            buffer: 0.0,
        }),
        ..RiskConfig::default()
    };
    let mut h = Harness::new(strategy(1.0, risk), scripted(&[(0, SignalKind::EnterLong)]));
    h.candle(&flat_bar(0, 100.0));
    h.fill_last(100.0, at(60));

    h.candle(&bar(1, 101.0, 103.5, 101.0, 103.0));
    assert_eq!(h.engine.risk_state().unwrap().stop_price, Some(100.0));
    assert!(h
        .drain_events()
        .iter()
        .any(|e| matches!(e, EngineEvent::BreakevenArmed { stop_price, .. } if *stop_price == 100.0)));
}

#[test]
fn resting_stop_owns_the_exit() {
    let risk = RiskConfig {
        stop_loss: Some(Distance::Absolute(2.0)),
        take_profit: Some(Distance::Absolute(4.0)),
        protection: ProtectionMode::Resting,
        ..RiskConfig::default()
    };
    let mut h = Harness::new(strategy(1.0, risk), scripted(&[(0, SignalKind::EnterLong)]));
    h.candle(&flat_bar(0, 100.0));
    h.fill_last(100.0, at(60));

    let orders = h.sink.orders();
    assert_eq!(orders.len(), 3);
    let stop = orders[1].clone();
    let target = orders[2].clone();
    assert_eq!(stop.kind, OrderKind::Stop { trigger: 98.0 });
    assert_eq!(target.kind, OrderKind::Limit { price: 104.0 });
    assert_eq!(stop.side, OrderSide::Sell);

    // The breach is left to the resting stop; no market exit goes out.
    h.candle(&bar(1, 100.0, 100.5, 97.0, 98.0));
    assert_eq!(h.sink.count(), 3);

    h.fill(&stop, 98.0, 1.0, at(120));
    assert!(h.engine.position().is_flat());
    assert!(h.sink.cancelled().contains(&target.id));
    assert!(h.drain_events().iter().any(|e| matches!(
        e,
        EngineEvent::ProtectiveExit { reason: ExitReason::StopLoss, level, .. } if *level == 98.0
    )));
}

#[test]
fn resting_trailing_stop_is_replaced_as_it_ratchets() {
    let risk = RiskConfig {
        trailing_stop: Some(Distance::Absolute(2.0)),
        protection: ProtectionMode::Resting,
        ..RiskConfig::default()
    };
    let mut h = Harness::new(strategy(1.0, risk), scripted(&[(0, SignalKind::EnterLong)]));
    h.candle(&flat_bar(0, 100.0));
    h.fill_last(100.0, at(60));
    let first = h.sink.last();
    assert_eq!(first.kind, OrderKind::Stop { trigger: 98.0 });

    h.candle(&bar(1, 104.0, 105.0, 104.0, 104.5));
    let moved = h.sink.last();
    assert_eq!(moved.kind, OrderKind::Stop { trigger: 103.0 });
    assert_eq!(h.sink.cancelled(), vec![first.id.clone()]);

    // The replaced stop may still fill before its cancel lands; it is applied.
    h.fill(&first, 98.0, 1.0, at(120));
    assert!(h.engine.position().is_flat());
    assert!(h.sink.cancelled().contains(&moved.id));
}

#[test]
fn breached_resting_stop_holds_the_bar_until_it_fills() {
    let risk = RiskConfig {
        stop_loss: Some(Distance::Absolute(2.0)),
        protection: ProtectionMode::Resting,
        ..RiskConfig::default()
    };
    let mut config = strategy(5.0, risk);
    config.allow_reversal = true;
    let mut h = Harness::new(
        config,
        scripted(&[
            (0, SignalKind::EnterLong),
            (1, SignalKind::EnterShort),
            (2, SignalKind::EnterShort),
            (3, SignalKind::EnterShort),
        ]),
    );
    h.candle(&flat_bar(0, 100.0));
    h.fill_last(100.0, at(60));
    let stop = h.sink.last();
    assert_eq!(stop.kind, OrderKind::Stop { trigger: 98.0 });

    // Breach and opposite signal on the same bar: no flip goes out.
    h.candle(&bar(1, 100.0, 100.5, 97.0, 98.0));
    assert_eq!(h.sink.count(), 2);
    h.candle(&flat_bar(2, 97.0));
    assert_eq!(h.sink.count(), 2);

    h.fill(&stop, 98.0, 5.0, at(120));
    assert!(h.engine.position().is_flat());

    h.candle(&flat_bar(3, 97.0));
    let entry = h.sink.last();
    assert_eq!(entry.side, OrderSide::Sell);
    assert_eq!(entry.kind, OrderKind::Market);
    assert!(approx(entry.volume, 5.0));
    h.fill_last(97.0, at(240));
    let p = h.engine.position();
    assert_eq!(p.side, PositionSide::Short);
    assert!(approx(p.volume, 5.0));
}

#[test]
fn cancelled_resting_stop_reopens_decisions() {
    let risk = RiskConfig {
        stop_loss: Some(Distance::Absolute(2.0)),
        protection: ProtectionMode::Resting,
        ..RiskConfig::default()
    };
    let mut h = Harness::new(
        strategy(1.0, risk),
        scripted(&[(0, SignalKind::EnterLong), (2, SignalKind::ExitLong)]),
    );
    h.candle(&flat_bar(0, 100.0));
    h.fill_last(100.0, at(60));
    let stop = h.sink.last();

    h.candle(&bar(1, 100.0, 100.5, 97.0, 98.0));
    h.engine.on_report(&ExecutionReport::Cancelled { order_id: stop.id.clone() });

    h.candle(&flat_bar(2, 99.0));
    let exit = h.sink.last();
    assert_eq!(exit.side, OrderSide::Sell);
    assert_eq!(exit.kind, OrderKind::Market);
}

#[test]
fn unchanged_levels_are_not_resubmitted() {
    let risk = RiskConfig {
        stop_loss: Some(Distance::Absolute(2.0)),
        take_profit: Some(Distance::Absolute(4.0)),
        protection: ProtectionMode::Resting,
        ..RiskConfig::default()
    };
    let mut h = Harness::new(strategy(1.0, risk), scripted(&[(0, SignalKind::EnterLong)]));
    h.candle(&flat_bar(0, 100.0));
    h.fill_last(100.0, at(60));
    for i in 1..5 {
        h.candle(&flat_bar(i, 100.0 + i as f64 * 0.1));
    }
    assert_eq!(h.sink.count(), 3);
    assert!(h.sink.cancelled().is_empty());
}

#[test]
fn invalid_config_is_refused_at_construction() {
    let config = strategy(-1.0, RiskConfig::default());
    let risk = Box::new(ProtectiveLevels::new(config.risk.clone()));
    let built = Engine::new(config, scripted(&[]), risk, Box::new(Recorder::default()));
    assert!(built.is_err());
}

#[test]
fn risk_policy_must_match_the_strategy_risk_config() {
    let config = strategy(1.0, stop_pct(2.0));
    let risk = Box::new(ProtectiveLevels::new(stop_pct(3.0)));
    let built = Engine::new(config, scripted(&[]), risk, Box::new(Recorder::default()));
    assert!(built.is_err());
}

#[test]
fn partial_exit_submit_failure_is_reported() {
    let risk = RiskConfig {
        partial_exits: vec![PartialExitConfig {
            trigger: Distance::Absolute(1.0),
            volume_fraction: 0.5,
        }],
        ..RiskConfig::default()
    };
    let mut h = Harness::new(strategy(4.0, risk), scripted(&[(0, SignalKind::EnterLong)]));
    h.candle(&flat_bar(0, 100.0));
    h.fill_last(100.0, at(60));
    h.drain_events();

    h.sink.refuse(true);
    h.candle(&bar(1, 100.0, 101.5, 100.0, 101.0));
    assert!(!h.engine.risk_state().unwrap().partial_exits[0].fired);
    assert!(h
        .drain_events()
        .iter()
        .any(|e| matches!(e, EngineEvent::OrderRejected { .. })));
}
