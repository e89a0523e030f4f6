use crate::{
    decision::{Decision, DecisionInputs, DecisionRule, UniverseCheck},
    error::FeedError,
    hysteresis::HysteresisOutcome,
    indicator::{IndicatorReading, IndicatorRole, StructureReading},
    types::{Direction, RiskState},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Reason recorded against every evaluator skipped by the universe gate.
pub const UNIVERSE_SKIP_REASON: &str = "universe filter failed";

/// Structured explanation of one published [`RiskPerInstrument`](crate::types::RiskPerInstrument).
///
/// Sections are `None` when the corresponding stage did not run.
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct DebugTrace {
    pub evaluated_at: DateTime<Utc>,
    pub universe: Option<UniverseCheck>,
    pub indicators: Vec<IndicatorTrace>,
    pub structure: Option<StructureTrace>,
    pub decision: Option<DecisionTrace>,
    pub hysteresis: Option<HysteresisTrace>,
    /// Set when the record was carried forward because this tick's fetch failed.
    pub fetch_error: Option<FeedError>,
    pub stale: Option<StaleTrace>,
}

impl DebugTrace {
    pub fn new(evaluated_at: DateTime<Utc>) -> Self {
        Self {
            evaluated_at,
            universe: None,
            indicators: Vec::new(),
            structure: None,
            decision: None,
            hysteresis: None,
            fetch_error: None,
            stale: None,
        }
    }

    pub fn indicator(&self, id: &str) -> Option<&IndicatorTrace> {
        self.indicators.iter().find(|trace| trace.id == id)
    }
}

#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct IndicatorTrace {
    pub id: SmolStr,
    pub role: IndicatorRole,
    /// Why the indicator was not run at all.
    pub skipped: Option<String>,
    pub reading: Option<IndicatorReading>,
    pub consecutive_hits: u32,
    pub confirmation_threshold: u32,
    pub confirmed: bool,
}

impl IndicatorTrace {
    pub fn skipped<S: Into<String>>(id: &str, role: IndicatorRole, threshold: u32, reason: S) -> Self {
        Self {
            id: SmolStr::new(id),
            role,
            skipped: Some(reason.into()),
            reading: None,
            consecutive_hits: 0,
            confirmation_threshold: threshold,
            confirmed: false,
        }
    }
}

#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct StructureTrace {
    pub skipped: Option<String>,
    pub reading: Option<StructureReading>,
}

impl StructureTrace {
    pub fn skipped<S: Into<String>>(reason: S) -> Self {
        Self {
            skipped: Some(reason.into()),
            reading: None,
        }
    }
}

#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct DecisionTrace {
    pub crowding_confirmed: bool,
    pub direction: Option<Direction>,
    pub liquidity_fragile: bool,
    pub liquidity_insufficient: bool,
    pub computed: RiskState,
    pub rule: DecisionRule,
    pub clamped: bool,
}

impl DecisionTrace {
    pub fn new(inputs: &DecisionInputs, direction: Option<Direction>, decision: &Decision) -> Self {
        Self {
            crowding_confirmed: inputs.crowding_confirmed,
            direction,
            liquidity_fragile: inputs.liquidity_fragile,
            liquidity_insufficient: inputs.liquidity_insufficient,
            computed: decision.state,
            rule: decision.rule,
            clamped: decision.clamped,
        }
    }
}

#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct HysteresisTrace {
    pub previous: Option<RiskState>,
    pub computed: RiskState,
    pub effective: RiskState,
    pub entered_at: DateTime<Utc>,
    pub state_change_blocked: bool,
    pub cooldown_remaining_secs: Option<i64>,
    pub bypassed: bool,
}

impl HysteresisTrace {
    pub fn new(computed: RiskState, outcome: &HysteresisOutcome, bypassed: bool) -> Self {
        Self {
            previous: outcome.previous,
            computed,
            effective: outcome.effective,
            entered_at: outcome.entered_at,
            state_change_blocked: outcome.blocked,
            cooldown_remaining_secs: outcome.cooldown_remaining.map(|delta| delta.num_seconds()),
            bypassed,
        }
    }
}

/// Staleness override applied by the watchdog.
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct StaleTrace {
    pub last_successful_tick: Option<DateTime<Utc>>,
    pub age_secs: i64,
    pub timeout_secs: u64,
    /// State that was published before the override.
    pub overridden: Option<RiskState>,
}
