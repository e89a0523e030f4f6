use crate::{
    config::{HoldConfig, to_delta},
    types::RiskState,
};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Effective (post-hysteresis) state of an instrument and when it was entered.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Deserialize, Serialize)]
pub struct RiskStateRecord {
    pub effective: RiskState,
    pub entered_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct HysteresisOutcome {
    pub previous: Option<RiskState>,
    pub effective: RiskState,
    pub entered_at: DateTime<Utc>,
    pub blocked: bool,
    pub cooldown_remaining: Option<TimeDelta>,
}

/// Blocks severity downgrades until the current state has been held for its minimum time.
#[derive(Debug, Clone, PartialEq)]
pub struct HysteresisController {
    hold: HoldConfig,
}

impl HysteresisController {
    pub fn new(hold: HoldConfig) -> Self {
        Self { hold }
    }

    pub fn min_hold(&self, state: RiskState) -> TimeDelta {
        match state {
            RiskState::Red => to_delta(self.hold.red),
            RiskState::Orange => to_delta(self.hold.orange),
            RiskState::Green | RiskState::Unsupported => TimeDelta::zero(),
        }
    }

    /// Resolve the effective state for `computed`, updating `record` only on effective change.
    ///
    /// With `bypass` the computed state applies unconditionally.
    pub fn apply(
        &self,
        record: &mut Option<RiskStateRecord>,
        computed: RiskState,
        now: DateTime<Utc>,
        bypass: bool,
    ) -> HysteresisOutcome {
        let previous = *record;

        let blocked_for = previous.and_then(|current| {
            if bypass || computed.rank() >= current.effective.rank() {
                return None;
            }
            let remaining = self.min_hold(current.effective) - (now - current.entered_at);
            (remaining > TimeDelta::zero()).then_some(remaining)
        });

        if let (Some(current), Some(remaining)) = (previous, blocked_for) {
            return HysteresisOutcome {
                previous: Some(current.effective),
                effective: current.effective,
                entered_at: current.entered_at,
                blocked: true,
                cooldown_remaining: Some(remaining),
            };
        }

        let next = match previous {
            Some(current) if current.effective == computed => current,
            _ => RiskStateRecord {
                effective: computed,
                entered_at: now,
            },
        };
        *record = Some(next);

        HysteresisOutcome {
            previous: previous.map(|current| current.effective),
            effective: next.effective,
            entered_at: next.entered_at,
            blocked: false,
            cooldown_remaining: None,
        }
    }
}
