#[path = "support.rs"]
mod support;

use chrono::TimeDelta;
use risk_state::{EngineConfig, MetricSample, RiskState, trace::UNIVERSE_SKIP_REASON};
use support::{
    Harness, baseline, cost_for_z, funding_for_z, now, oi_for_z, prices_for_returns,
};

#[test]
fn scenario_thin_volume_is_unsupported() {
    let mut harness = Harness::new(EngineConfig::default());
    harness.seed(support::PRICE);

    let record = harness.tick(MetricSample {
        day_notional_volume: Some(5_000_000.0),
        ..baseline(now())
    });

    assert_eq!(record.state, RiskState::Unsupported);
    let universe = record.trace.universe.as_ref().unwrap();
    assert!(!universe.eligible);
    assert_eq!(universe.day_notional_volume, Some(5_000_000.0));
    assert_eq!(universe.min_day_notional_volume, 25_000_000.0);
    assert!(record.message.starts_with("universe filter failed"));
}

#[test]
fn ineligible_instrument_is_unsupported_regardless_of_signals() {
    // Everything that would otherwise produce RED, with too little traded notional.
    let (price_now, anchor_15m) = prices_for_returns(-0.005, -0.012);
    let mut harness = Harness::new(EngineConfig::default());
    harness.seed(anchor_15m);

    let records = harness.crowded_ticks(move |time| MetricSample {
        mark_price: Some(price_now),
        open_interest: Some(oi_for_z(2.0)),
        funding_rate: Some(funding_for_z(1.8)),
        execution_cost: Some(cost_for_z(3.0)),
        day_notional_volume: Some(20_000_000.0),
        ..baseline(time)
    });

    for record in records {
        assert_eq!(record.state, RiskState::Unsupported);
        assert!(record.trace.decision.is_none());
        assert!(
            record
                .trace
                .indicators
                .iter()
                .all(|indicator| indicator.skipped.as_deref() == Some(UNIVERSE_SKIP_REASON)
                    && !indicator.confirmed)
        );
        assert_eq!(
            record.trace.structure.as_ref().unwrap().skipped.as_deref(),
            Some(UNIVERSE_SKIP_REASON)
        );
    }
}

#[test]
fn missing_universe_inputs_fail_the_gate() {
    let mut harness = Harness::new(EngineConfig::default());

    let record = harness.tick(MetricSample {
        open_interest: None,
        ..baseline(now())
    });
    assert_eq!(record.state, RiskState::Unsupported);

    let record = harness.tick(MetricSample {
        day_notional_volume: None,
        ..baseline(now() + TimeDelta::seconds(15))
    });
    assert_eq!(record.state, RiskState::Unsupported);
    assert_eq!(
        record.trace.universe.as_ref().unwrap().reason.as_deref(),
        Some("day notional volume unavailable")
    );
}

#[test]
fn leaving_the_universe_overrides_a_red_hold() {
    let (price_now, anchor_15m) = prices_for_returns(-0.005, -0.012);
    let mut harness = Harness::new(EngineConfig::default());
    harness.seed(anchor_15m);

    let [_, red] = harness.crowded_ticks(move |time| MetricSample {
        mark_price: Some(price_now),
        open_interest: Some(oi_for_z(2.0)),
        funding_rate: Some(funding_for_z(1.8)),
        execution_cost: Some(cost_for_z(3.0)),
        ..baseline(time)
    });
    assert_eq!(red.state, RiskState::Red);

    let record = harness.tick(MetricSample {
        day_notional_volume: Some(1_000_000.0),
        ..baseline(now() + TimeDelta::minutes(2))
    });
    assert_eq!(record.state, RiskState::Unsupported);
    assert!(record.trace.hysteresis.as_ref().unwrap().bypassed);
}
