#![allow(dead_code)]

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use risk_state::{
    EngineConfig, FeedSnapshot, Instrument, MetricSample, RiskEngine, RiskMap, RiskPerInstrument,
};

pub const SYMBOL: &str = "BTCUSDT";

/// Number of fully populated 15 minute buckets before the evaluation bucket.
pub const PRIOR_BUCKETS: i64 = 20;

pub const OI_MEAN: f64 = 100_000_000.0;
pub const OI_STEP: f64 = 1_000_000.0;
pub const FUNDING_MEAN: f64 = 0.0001;
pub const FUNDING_STEP: f64 = 0.00001;
pub const COST_MEAN: f64 = 0.05;
pub const COST_STEP: f64 = 0.005;
pub const VOLUME: f64 = 500_000_000.0;
pub const PRICE: f64 = 100.0;

/// Route engine logs to the test writer, filtered by `RUST_LOG` (default `warn`).
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

pub fn instrument() -> Instrument {
    Instrument::new(SYMBOL)
}

/// First tick inside the evaluation bucket, one minute after it opens.
pub fn now() -> DateTime<Utc> {
    t0() + TimeDelta::minutes(15 * PRIOR_BUCKETS + 1)
}

/// Sample standard deviation of the alternating `mean ± step` prior buckets.
pub fn prior_std(step: f64) -> f64 {
    let n = PRIOR_BUCKETS as f64;
    step * (n / (n - 1.0)).sqrt()
}

pub fn oi_for_z(z: f64) -> f64 {
    OI_MEAN + z * prior_std(OI_STEP)
}

pub fn funding_for_z(z: f64) -> f64 {
    FUNDING_MEAN + z * prior_std(FUNDING_STEP)
}

pub fn cost_for_z(z: f64) -> f64 {
    COST_MEAN + z * prior_std(COST_STEP)
}

/// Liquid, unremarkable sample at `time`.
pub fn baseline(time: DateTime<Utc>) -> MetricSample {
    MetricSample {
        mark_price: Some(PRICE),
        funding_rate: Some(FUNDING_MEAN),
        open_interest: Some(OI_MEAN),
        day_notional_volume: Some(VOLUME),
        execution_cost: Some(COST_MEAN),
        ..MetricSample::empty(instrument(), time)
    }
}

/// Mark price now and at the 15 minute anchor for the given trailing returns, with the one hour
/// anchor at [`PRICE`].
pub fn prices_for_returns(return_15m: f64, return_1h: f64) -> (f64, f64) {
    let price_now = PRICE * (1.0 + return_1h);
    (price_now, price_now / (1.0 + return_15m))
}

/// Drives a [`RiskEngine`] one tick at a time, tracking the published map.
pub struct Harness {
    engine: RiskEngine,
    published: RiskMap,
}

impl Harness {
    pub fn new(config: EngineConfig) -> Self {
        init_tracing();
        Self {
            engine: RiskEngine::new(config),
            published: RiskMap::new(),
        }
    }

    pub fn engine(&self) -> &RiskEngine {
        &self.engine
    }

    /// Run one tick at the sample's timestamp and return the published record.
    pub fn tick(&mut self, sample: MetricSample) -> RiskPerInstrument {
        let now = sample.time;
        let fetched = vec![(sample.instrument.clone(), Ok(FeedSnapshot::new(sample)))];
        self.published = self
            .engine
            .process_tick(fetched, &self.published, now)
            .expect("tick with a successful fetch");
        self.published[&instrument()].clone()
    }

    /// Populate [`PRIOR_BUCKETS`] alternating buckets, one sample each. The mark price is
    /// [`PRICE`] except at the one hour and 15 minute anchors of [`now`].
    pub fn seed(&mut self, anchor_15m: f64) {
        for k in 0..PRIOR_BUCKETS {
            let sign = if k % 2 == 0 { -1.0 } else { 1.0 };
            let time = t0() + TimeDelta::minutes(15 * k + 1);
            let price = if k == PRIOR_BUCKETS - 1 { anchor_15m } else { PRICE };

            let record = self.tick(MetricSample {
                mark_price: Some(price),
                funding_rate: Some(FUNDING_MEAN + sign * FUNDING_STEP),
                open_interest: Some(OI_MEAN + sign * OI_STEP),
                execution_cost: Some(COST_MEAN + sign * COST_STEP),
                ..baseline(time)
            });
            assert_eq!(
                record.state,
                risk_state::RiskState::Green,
                "seed bucket {k} must be calm"
            );
        }
    }

    /// Two ticks 15s apart inside the evaluation bucket with crowded positioning.
    pub fn crowded_ticks(&mut self, sample: impl Fn(DateTime<Utc>) -> MetricSample) -> [RiskPerInstrument; 2] {
        let first = self.tick(sample(now()));
        let second = self.tick(sample(now() + TimeDelta::seconds(15)));
        [first, second]
    }
}
