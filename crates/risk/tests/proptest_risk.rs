use chrono::{DateTime, Duration, Utc};
use proptest::prelude::*;

use common::{Candle, CandleState, Side};
use risk::{Distance, ProtectiveLevels, RiskConfig, RiskPolicy};

fn candle(i: i64, close: f64, spread: f64) -> Candle {
    let t0 = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
    Candle {
        pair: "TESTUSDT".into(),
        open_time: t0 + Duration::minutes(i),
        close_time: t0 + Duration::minutes(i + 1),
        open: close,
        high: close + spread,
        low: (close - spread).max(0.0001),
        close,
        volume: 1.0,
        state: CandleState::Finished,
    }
}

fn side_strategy() -> impl Strategy<Value = Side> {
    prop_oneof![Just(Side::Long), Just(Side::Short)]
}

proptest! {
    /// Armed stop and target always bracket the entry, whatever the distances.
    #[test]
    fn armed_levels_never_inverted(
        side in side_strategy(),
        entry in 0.01f64..100_000.0,
        stop_pct in 0.01f64..200.0,
        target_abs in 0.0001f64..200_000.0,
    ) {
        let policy = ProtectiveLevels::new(RiskConfig {
            stop_loss: Some(Distance::Percent(stop_pct)),
            take_profit: Some(Distance::Absolute(target_abs)),
            ..RiskConfig::default()
        });
        let (state, refused) = policy.open(side, entry, Utc::now(), 1.0, None);
        let sign = side.sign();
        if refused.is_none() {
            if let Some(stop) = state.stop_price {
                prop_assert!(stop > 0.0);
                prop_assert!(sign * (entry - stop) > 0.0);
            }
            if let Some(target) = state.take_profit_price {
                prop_assert!(target > 0.0);
                prop_assert!(sign * (target - entry) > 0.0);
            }
        } else {
            prop_assert!(state.stop_price.is_none());
            prop_assert!(state.take_profit_price.is_none());
        }
    }

    /// The trailing stop only ever tightens.
    #[test]
    fn trailing_stop_is_monotonic(
        side in side_strategy(),
        closes in prop::collection::vec(50.0f64..150.0, 1..60),
        distance in 0.1f64..10.0,
    ) {
        let policy = ProtectiveLevels::new(RiskConfig {
            trailing_stop: Some(Distance::Absolute(distance)),
            ..RiskConfig::default()
        });
        let (mut state, _) = policy.open(side, 100.0, Utc::now(), 1.0, None);
        let mut last = state.trailing.and_then(|t| t.level()).unwrap();
        for (i, close) in closes.iter().enumerate() {
            let c = candle(i as i64, *close, 0.5);
            let check = policy.check(&mut state, &c, None, 1.0);
            let level = state.trailing.and_then(|t| t.level()).unwrap();
            match side {
                Side::Long => prop_assert!(level >= last),
                Side::Short => prop_assert!(level <= last),
            }
            last = level;
            if check.action.is_some() {
                break;
            }
        }
    }

    /// Risk evaluation on arbitrary prices never panics.
    #[test]
    fn risk_checks_never_panic_on_extreme_prices(
        entry in 0.0001f64..1_000_000.0,
        price in 0.0001f64..1_000_000.0,
        atr in prop::option::of(-10.0f64..10.0),
    ) {
        let policy = ProtectiveLevels::new(RiskConfig {
            stop_loss: Some(Distance::Atr(2.0)),
            take_profit: Some(Distance::Percent(4.0)),
            trailing_stop: Some(Distance::Atr(3.0)),
            trailing_atr: true,
            ..RiskConfig::default()
        });
        let (mut state, _) = policy.open(Side::Long, entry, Utc::now(), 1.0, atr);
        let _ = policy.check(&mut state, &candle(0, price, price * 0.01), atr, 1.0);
    }
}
