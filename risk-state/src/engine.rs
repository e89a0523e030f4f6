use crate::{
    config::{EngineConfig, StatsConfig, window_start},
    confirm::Confirmation,
    decision::{self, DecisionInputs, evaluate_universe},
    error::{FeedError, StoreError, TickError},
    feed::FeedSnapshot,
    hysteresis::{HysteresisController, RiskStateRecord},
    indicator::{EvalContext, Indicator, IndicatorRole, build_indicators, classify_structure},
    stats::{Metric, PriceSeries, RollingStats},
    store::StateStore,
    trace::{
        DebugTrace, DecisionTrace, HysteresisTrace, IndicatorTrace, StructureTrace,
        UNIVERSE_SKIP_REASON,
    },
    types::{Direction, Instrument, MetricSample, RiskMap, RiskPerInstrument, RiskState},
};
use chrono::{DateTime, Utc};
use fnv::FnvHashMap;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use tracing::{debug, warn};

/// Persisted state of one instrument.
#[derive(Clone, PartialEq, Debug, Default, Deserialize, Serialize)]
pub struct InstrumentState {
    pub stats: RollingStats,
    pub prices: PriceSeries,
    /// Keyed by [`Indicator::id`].
    pub confirmations: FnvHashMap<SmolStr, Confirmation>,
    pub record: Option<RiskStateRecord>,
}

impl InstrumentState {
    /// Fold every present metric of `sample` into the statistics at `time`.
    fn ingest(&mut self, config: &StatsConfig, sample: &MetricSample, time: DateTime<Utc>) {
        let book = sample.book.as_ref();
        let observations = [
            (Metric::OpenInterest, sample.open_interest),
            (Metric::FundingRate, sample.funding_rate),
            (Metric::DayNotionalVolume, sample.day_notional_volume),
            (Metric::ExecutionCost, sample.execution_cost),
            (Metric::Spread, book.and_then(|book| book.spread_pct())),
            (Metric::Depth, book.and_then(|book| book.depth())),
        ];

        for (metric, value) in observations {
            if let Some(value) = value {
                self.stats.ingest(config, metric, time, value);
            }
        }

        if let Some(price) = sample.mark_price {
            self.prices.push(time, price);
        }
    }

    fn prune(&mut self, config: &StatsConfig, now: DateTime<Utc>) {
        self.stats.prune(config, now);
        self.prices.prune(window_start(now, config.price_retention));
    }
}

/// Synchronous risk pipeline owning all per-instrument state.
///
/// Instruments are created lazily on first observation and never removed.
#[derive(Debug)]
pub struct RiskEngine {
    config: EngineConfig,
    indicators: Vec<Box<dyn Indicator>>,
    hysteresis: HysteresisController,
    instruments: FnvHashMap<Instrument, InstrumentState>,
}

impl RiskEngine {
    /// Key prefix used for per-instrument entries in a [`StateStore`].
    pub const STORE_PREFIX: &'static str = "risk-state";

    pub fn new(config: EngineConfig) -> Self {
        Self {
            indicators: build_indicators(&config),
            hysteresis: HysteresisController::new(config.hold.clone()),
            instruments: FnvHashMap::default(),
            config,
        }
    }

    /// Replace the configured indicator set with custom plugins.
    pub fn with_indicators(mut self, indicators: Vec<Box<dyn Indicator>>) -> Self {
        self.indicators = indicators;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn indicators(&self) -> &[Box<dyn Indicator>] {
        &self.indicators
    }

    pub fn instrument_state(&self, instrument: &Instrument) -> Option<&InstrumentState> {
        self.instruments.get(instrument)
    }

    pub fn needs_funding_history(&self) -> bool {
        self.indicators
            .iter()
            .any(|indicator| indicator.needs_funding_history())
    }

    /// Start of the funding history window to request this tick, if any indicator needs it.
    pub fn funding_since(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.needs_funding_history()
            .then(|| window_start(now, self.config.funding_anomaly.lookback))
    }

    /// Run one tick over the fetched snapshots and build the complete map to publish.
    ///
    /// Fails without mutating any state when nothing could be fetched. Instruments whose fetch
    /// failed keep their `previous` record, annotated with the error.
    pub fn process_tick(
        &mut self,
        fetched: Vec<(Instrument, Result<FeedSnapshot, FeedError>)>,
        previous: &RiskMap,
        now: DateTime<Utc>,
    ) -> Result<RiskMap, TickError> {
        if fetched.is_empty() {
            return Err(TickError::NoInstruments);
        }

        if fetched.iter().all(|(_, result)| result.is_err()) {
            let failed = fetched.len();
            let first = fetched
                .into_iter()
                .find_map(|(_, result)| result.err())
                .ok_or(TickError::NoInstruments)?;
            return Err(TickError::AllFetchesFailed { failed, first });
        }

        let map = fetched
            .into_iter()
            .map(|(instrument, result)| {
                let record = match result {
                    Ok(snapshot) => self.evaluate_instrument(&snapshot, now),
                    Err(error) => {
                        warn!(%instrument, %error, "fetch failed, carrying previous record forward");
                        carry_forward(&instrument, previous.get(&instrument), error, now)
                    }
                };
                (instrument, record)
            })
            .collect::<RiskMap>();

        Ok(map)
    }

    /// Ingest one instrument's snapshot and run the full pipeline on it.
    pub fn evaluate_instrument(
        &mut self,
        snapshot: &FeedSnapshot,
        now: DateTime<Utc>,
    ) -> RiskPerInstrument {
        let Self {
            config,
            indicators,
            hysteresis,
            instruments,
        } = self;

        let sample = snapshot.sample.clone().sanitised();
        let instrument = sample.instrument.clone();
        let state = instruments.entry(instrument.clone()).or_default();

        state.ingest(&config.stats, &sample, now);
        state.prune(&config.stats, now);

        let threshold = config.confirmation_ticks;
        let mut trace = DebugTrace::new(now);

        let universe = evaluate_universe(
            &config.universe,
            sample.day_notional_volume,
            sample.open_interest,
        );
        let eligible = universe.eligible;
        let universe_reason = universe.reason.clone();
        trace.universe = Some(universe);

        if !eligible {
            // Skipped indicators count as not evaluated.
            for indicator in indicators.iter() {
                state
                    .confirmations
                    .entry(SmolStr::new(indicator.id()))
                    .or_default()
                    .observe(false, threshold);
                trace.indicators.push(IndicatorTrace::skipped(
                    indicator.id(),
                    indicator.role(),
                    threshold,
                    UNIVERSE_SKIP_REASON,
                ));
            }
            trace.structure = Some(StructureTrace::skipped(UNIVERSE_SKIP_REASON));

            let decision = decision::unsupported();
            let outcome = hysteresis.apply(&mut state.record, decision.state, now, true);
            trace.hysteresis = Some(HysteresisTrace::new(decision.state, &outcome, true));

            let message = [
                Some(decision.rule.to_string()),
                universe_reason,
            ]
            .into_iter()
            .flatten()
            .join(": ");

            debug!(%instrument, state = %outcome.effective, "universe filter failed");

            return RiskPerInstrument {
                instrument,
                state: outcome.effective,
                message,
                metrics: sample,
                trace,
            };
        }

        let ctx = EvalContext {
            now,
            sample: &sample,
            stats_config: &config.stats,
            stats: &state.stats,
            funding_history: &snapshot.funding_history,
        };

        let mut crowding_configured = false;
        let mut crowding_confirmed = true;
        let mut direction: Option<Direction> = None;
        let mut stress_configured = false;
        let mut stress_evaluated = false;
        let mut liquidity_fragile = false;

        for indicator in indicators.iter() {
            let reading = indicator.evaluate(&ctx);
            let confirmation = state
                .confirmations
                .entry(SmolStr::new(indicator.id()))
                .or_default();
            let confirmed = confirmation.observe(reading.raw, threshold);

            match indicator.role() {
                IndicatorRole::Crowding => {
                    crowding_configured = true;
                    crowding_confirmed &= confirmed;
                    if confirmed && direction.is_none() {
                        direction = reading.direction;
                    }
                }
                IndicatorRole::Stress => {
                    stress_configured = true;
                    stress_evaluated |= reading.is_evaluated();
                    liquidity_fragile |= confirmed;
                }
            }

            trace.indicators.push(IndicatorTrace {
                id: SmolStr::new(indicator.id()),
                role: indicator.role(),
                skipped: None,
                consecutive_hits: confirmation.consecutive_hits,
                confirmation_threshold: threshold,
                confirmed,
                reading: Some(reading),
            });
        }

        let crowding_confirmed = crowding_configured && crowding_confirmed;

        let structure = match (crowding_confirmed, direction) {
            (true, Some(direction)) => {
                let reading = classify_structure(&config.structure, direction, &state.prices, now);
                let structure = reading.structure;
                trace.structure = Some(StructureTrace {
                    skipped: None,
                    reading: Some(reading),
                });
                structure
            }
            (true, None) => {
                trace.structure = Some(StructureTrace::skipped("crowding direction unavailable"));
                None
            }
            (false, _) => {
                trace.structure = Some(StructureTrace::skipped("crowding not confirmed"));
                None
            }
        };

        let inputs = DecisionInputs {
            crowding_confirmed,
            structure,
            liquidity_fragile,
            liquidity_insufficient: stress_configured && !stress_evaluated,
        };
        let decision = decision::decide(&inputs);
        trace.decision = Some(DecisionTrace::new(&inputs, direction, &decision));

        let outcome = hysteresis.apply(&mut state.record, decision.state, now, false);
        trace.hysteresis = Some(HysteresisTrace::new(decision.state, &outcome, false));

        let message = [
            Some(decision.rule.to_string()),
            decision
                .clamped
                .then(|| "RED clamped to GREEN on insufficient data".to_string()),
            outcome.cooldown_remaining.map(|remaining| {
                format!(
                    "downgrade to {} blocked, {}s cooldown remaining",
                    decision.state,
                    remaining.num_seconds()
                )
            }),
        ]
        .into_iter()
        .flatten()
        .join("; ");

        debug!(
            %instrument,
            computed = %decision.state,
            effective = %outcome.effective,
            rule = %decision.rule,
            blocked = outcome.blocked,
            "evaluated instrument"
        );

        RiskPerInstrument {
            instrument,
            state: outcome.effective,
            message,
            metrics: sample,
            trace,
        }
    }

    /// Load persisted state for `instruments`, returning how many were restored.
    ///
    /// Missing entries are a cold start. Unreadable entries are discarded.
    pub async fn restore<Store>(
        &mut self,
        store: &Store,
        instruments: &[Instrument],
    ) -> Result<usize, StoreError>
    where
        Store: StateStore + ?Sized,
    {
        let mut restored = 0;
        for instrument in instruments {
            let Some(bytes) = store.load(&Self::store_key(instrument)).await? else {
                continue;
            };
            match serde_json::from_slice::<InstrumentState>(&bytes) {
                Ok(state) => {
                    self.instruments.insert(instrument.clone(), state);
                    restored += 1;
                }
                Err(error) => {
                    warn!(%instrument, %error, "discarding unreadable persisted state");
                }
            }
        }
        Ok(restored)
    }

    /// Save every instrument's state.
    pub async fn persist<Store>(&self, store: &Store) -> Result<(), StoreError>
    where
        Store: StateStore + ?Sized,
    {
        for (instrument, state) in &self.instruments {
            let bytes = serde_json::to_vec(state)?;
            store.save(&Self::store_key(instrument), bytes).await?;
        }
        Ok(())
    }

    pub fn store_key(instrument: &Instrument) -> String {
        format!("{}/{}", Self::STORE_PREFIX, instrument)
    }
}

fn carry_forward(
    instrument: &Instrument,
    previous: Option<&RiskPerInstrument>,
    error: FeedError,
    now: DateTime<Utc>,
) -> RiskPerInstrument {
    // A stale override no longer explains anything once a tick has succeeded.
    match previous.filter(|previous| previous.trace.stale.is_none()) {
        Some(previous) => {
            let mut record = previous.clone();
            record.trace.fetch_error = Some(error);
            record
        }
        None => {
            let mut trace = DebugTrace::new(now);
            let message = format!("feed unavailable: {error}");
            trace.fetch_error = Some(error);
            RiskPerInstrument {
                instrument: instrument.clone(),
                state: RiskState::Unsupported,
                message,
                metrics: MetricSample::empty(instrument.clone(), now),
                trace,
            }
        }
    }
}
