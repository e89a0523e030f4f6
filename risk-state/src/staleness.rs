use crate::{
    config::to_delta,
    trace::{DebugTrace, StaleTrace},
    types::{Instrument, MetricSample, RiskMap, RiskPerInstrument, RiskState},
};
use chrono::{DateTime, TimeDelta, Utc};
use std::time::Duration;

/// Message published for every instrument while the feed is stale.
pub const STALE_MESSAGE: &str = "feed stale";

/// Detects a feed that has not produced a successful tick within `timeout`.
#[derive(Debug, Clone, PartialEq)]
pub struct StalenessWatchdog {
    timeout: Duration,
    started_at: DateTime<Utc>,
}

impl StalenessWatchdog {
    pub fn new(timeout: Duration, started_at: DateTime<Utc>) -> Self {
        Self {
            timeout,
            started_at,
        }
    }

    /// Age of the last successful tick if it exceeds the timeout.
    ///
    /// Before any tick has succeeded the age is measured from `started_at`.
    pub fn check(&self, last_success: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Option<TimeDelta> {
        let age = now - last_success.unwrap_or(self.started_at);
        (age > to_delta(self.timeout)).then_some(age)
    }

    /// Determine if every tracked instrument already carries the stale override.
    pub fn is_overridden(tracked: &[Instrument], map: &RiskMap) -> bool {
        tracked.iter().all(|instrument| {
            map.get(instrument)
                .is_some_and(|record| record.trace.stale.is_some())
        })
    }

    /// Published map with every tracked instrument forced to [`RiskState::Unsupported`].
    ///
    /// The last published metrics and trace are kept for context.
    pub fn stale_map(
        &self,
        tracked: &[Instrument],
        previous: &RiskMap,
        last_success: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        age: TimeDelta,
    ) -> RiskMap {
        tracked
            .iter()
            .map(|instrument| {
                let prior = previous.get(instrument);
                let mut trace = prior
                    .map(|record| record.trace.clone())
                    .unwrap_or_else(|| DebugTrace::new(now));
                trace.stale = Some(StaleTrace {
                    last_successful_tick: last_success,
                    age_secs: age.num_seconds(),
                    timeout_secs: self.timeout.as_secs(),
                    overridden: prior
                        .filter(|record| record.trace.stale.is_none())
                        .map(|record| record.state),
                });

                let record = RiskPerInstrument {
                    instrument: instrument.clone(),
                    state: RiskState::Unsupported,
                    message: STALE_MESSAGE.to_string(),
                    metrics: prior
                        .map(|record| record.metrics.clone())
                        .unwrap_or_else(|| MetricSample::empty(instrument.clone(), now)),
                    trace,
                };
                (instrument.clone(), record)
            })
            .collect()
    }
}
