#[path = "support.rs"]
mod support;

use chrono::{DateTime, TimeDelta, Utc};
use risk_state::{
    EngineConfig, MetricSample, RiskPerInstrument, RiskState, Structure, decision::DecisionRule,
};
use support::{
    Harness, baseline, cost_for_z, funding_for_z, now, oi_for_z, prices_for_returns,
};

/// Seed, then two crowded ticks with broken structure and an execution cost spike.
fn enter_red() -> (Harness, RiskPerInstrument) {
    let (price_now, anchor_15m) = prices_for_returns(-0.005, -0.012);
    let mut harness = Harness::new(EngineConfig::default());
    harness.seed(anchor_15m);

    let [first, second] = harness.crowded_ticks(move |time| MetricSample {
        mark_price: Some(price_now),
        open_interest: Some(oi_for_z(2.0)),
        funding_rate: Some(funding_for_z(1.8)),
        execution_cost: Some(cost_for_z(3.0)),
        ..baseline(time)
    });
    assert_eq!(first.state, RiskState::Green);
    (harness, second)
}

fn entered_at() -> DateTime<Utc> {
    now() + TimeDelta::seconds(15)
}

#[test]
fn scenario_broken_structure_with_fragile_liquidity_is_red() {
    let (_, red) = enter_red();

    let structure = red.trace.structure.as_ref().unwrap().reading.as_ref().unwrap();
    assert_eq!(structure.structure, Some(Structure::Broken));

    let liquidity = red.trace.indicator("liquidity_stress").unwrap();
    assert!(liquidity.confirmed);
    assert_eq!(liquidity.consecutive_hits, 2);
    let reading = liquidity.reading.as_ref().unwrap();
    assert_eq!(reading.source.as_deref(), Some("ExecutionCost"));
    assert!((reading.values["execution_cost_z"].unwrap() - 3.0).abs() < 1e-6);

    let decision = red.trace.decision.as_ref().unwrap();
    assert_eq!(decision.rule, DecisionRule::CrowdingBrokenFragile);
    assert!(!decision.clamped);
    assert_eq!(red.state, RiskState::Red);

    let hysteresis = red.trace.hysteresis.as_ref().unwrap();
    assert_eq!(hysteresis.previous, Some(RiskState::Green));
    assert_eq!(hysteresis.entered_at, entered_at());
}

#[test]
fn scenario_red_holds_until_thirty_minutes_after_entry() {
    let (mut harness, _) = enter_red();

    let revert = harness.tick(baseline(entered_at() + TimeDelta::minutes(16)));
    let hysteresis = revert.trace.hysteresis.as_ref().unwrap();
    assert_eq!(hysteresis.computed, RiskState::Green);
    assert!(hysteresis.state_change_blocked);
    assert_eq!(hysteresis.cooldown_remaining_secs, Some(14 * 60));
    assert_eq!(revert.state, RiskState::Red);
    assert!(revert.message.contains("downgrade to GREEN blocked, 840s cooldown remaining"));

    let revert = harness.tick(baseline(entered_at() + TimeDelta::minutes(29)));
    assert_eq!(revert.state, RiskState::Red);
    assert_eq!(
        revert.trace.hysteresis.as_ref().unwrap().cooldown_remaining_secs,
        Some(60)
    );

    let released = harness.tick(baseline(entered_at() + TimeDelta::minutes(31)));
    let hysteresis = released.trace.hysteresis.as_ref().unwrap();
    assert!(!hysteresis.state_change_blocked);
    assert_eq!(hysteresis.previous, Some(RiskState::Red));
    assert_eq!(released.state, RiskState::Green);
}

#[test]
fn red_is_never_downgraded_inside_the_hold() {
    let (mut harness, _) = enter_red();

    for minute in 1..30 {
        let record = harness.tick(baseline(entered_at() + TimeDelta::minutes(minute)));
        assert_eq!(record.state, RiskState::Red, "downgraded after {minute}m");
        assert_eq!(
            record.trace.hysteresis.as_ref().unwrap().entered_at,
            entered_at()
        );
    }

    let record = harness.tick(baseline(entered_at() + TimeDelta::minutes(30)));
    assert_eq!(record.state, RiskState::Green);
}

#[test]
fn broken_structure_without_liquidity_data_stays_green() {
    // Same crowding and structure, but no execution cost and no order book history: the
    // stress indicator cannot be evaluated.
    let (price_now, anchor_15m) = prices_for_returns(-0.005, -0.012);
    let mut harness = Harness::new(EngineConfig::default());
    harness.seed(anchor_15m);

    let [_, second] = harness.crowded_ticks(move |time| MetricSample {
        mark_price: Some(price_now),
        open_interest: Some(oi_for_z(2.0)),
        funding_rate: Some(funding_for_z(1.8)),
        execution_cost: None,
        ..baseline(time)
    });

    let liquidity = second.trace.indicator("liquidity_stress").unwrap();
    assert!(!liquidity.reading.as_ref().unwrap().raw);
    assert_eq!(
        liquidity.reading.as_ref().unwrap().source.as_deref(),
        Some("Unavailable")
    );

    let decision = second.trace.decision.as_ref().unwrap();
    assert!(decision.liquidity_insufficient);
    assert_eq!(decision.rule, DecisionRule::Fallback);
    assert_eq!(second.state, RiskState::Green);
}
