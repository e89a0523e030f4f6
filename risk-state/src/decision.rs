use crate::{
    config::UniverseConfig,
    types::{RiskState, Structure},
};
use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Universe gate outcome with the inputs it was computed from.
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct UniverseCheck {
    pub eligible: bool,
    pub day_notional_volume: Option<f64>,
    pub open_interest: Option<f64>,
    pub min_day_notional_volume: f64,
    pub min_open_interest: f64,
    pub reason: Option<String>,
}

/// Eligible only when both traded notional and open interest strictly exceed their floors.
///
/// A missing value fails the gate.
pub fn evaluate_universe(
    config: &UniverseConfig,
    day_notional_volume: Option<f64>,
    open_interest: Option<f64>,
) -> UniverseCheck {
    let reason = match (day_notional_volume, open_interest) {
        (None, _) => Some("day notional volume unavailable".to_string()),
        (_, None) => Some("open interest unavailable".to_string()),
        (Some(volume), _) if volume <= config.min_day_notional_volume => Some(format!(
            "day notional volume {volume} at or below {}",
            config.min_day_notional_volume
        )),
        (_, Some(oi)) if oi <= config.min_open_interest => Some(format!(
            "open interest {oi} at or below {}",
            config.min_open_interest
        )),
        _ => None,
    };

    UniverseCheck {
        eligible: reason.is_none(),
        day_notional_volume,
        open_interest,
        min_day_notional_volume: config.min_day_notional_volume,
        min_open_interest: config.min_open_interest,
        reason,
    }
}

/// Confirmed indicator aggregates feeding the decision table.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Deserialize, Serialize)]
pub struct DecisionInputs {
    pub crowding_confirmed: bool,
    /// `None` when structure was not evaluated or had no anchor price.
    pub structure: Option<Structure>,
    pub liquidity_fragile: bool,
    /// No stress indicator could be evaluated this tick.
    pub liquidity_insufficient: bool,
}

/// Row of the decision table that produced a [`Decision`].
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Display, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionRule {
    #[display("universe filter failed")]
    UniverseFailed,
    #[display("no confirmed crowding")]
    NoCrowding,
    #[display("crowding with intact structure")]
    CrowdingIntact,
    #[display("crowding with weakening structure, liquidity stable")]
    CrowdingWeakening,
    #[display("crowding with broken structure and fragile liquidity")]
    CrowdingBrokenFragile,
    #[display("no rule matched")]
    Fallback,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Deserialize, Serialize)]
pub struct Decision {
    pub state: RiskState,
    pub rule: DecisionRule,
    /// RED was forced down to GREEN because supporting data was insufficient.
    pub clamped: bool,
}

/// Map confirmed indicators onto a computed [`RiskState`] for an eligible instrument.
pub fn decide(inputs: &DecisionInputs) -> Decision {
    let (state, rule) = match (
        inputs.crowding_confirmed,
        inputs.structure,
        inputs.liquidity_fragile,
    ) {
        (false, _, _) => (RiskState::Green, DecisionRule::NoCrowding),
        (true, Some(Structure::Intact), _) => (RiskState::Green, DecisionRule::CrowdingIntact),
        (true, Some(Structure::Weakening), false) => {
            (RiskState::Orange, DecisionRule::CrowdingWeakening)
        }
        (true, Some(Structure::Broken), true) => {
            (RiskState::Red, DecisionRule::CrowdingBrokenFragile)
        }
        _ => (RiskState::Green, DecisionRule::Fallback),
    };

    let insufficient = inputs.structure.is_none() || inputs.liquidity_insufficient;
    if state == RiskState::Red && insufficient {
        return Decision {
            state: RiskState::Green,
            rule,
            clamped: true,
        };
    }

    Decision {
        state,
        rule,
        clamped: false,
    }
}

/// Decision for an instrument failing the universe gate.
pub fn unsupported() -> Decision {
    Decision {
        state: RiskState::Unsupported,
        rule: DecisionRule::UniverseFailed,
        clamped: false,
    }
}
