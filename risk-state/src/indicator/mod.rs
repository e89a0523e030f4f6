use crate::{
    config::{EngineConfig, IndicatorKind, StatsConfig},
    feed::FundingPoint,
    stats::{Metric, RollingStats, ZScoreReading},
    types::{Direction, MetricSample},
};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::fmt::Debug;

/// Open interest and funding z-score crowding.
pub mod crowding;

/// Funding rate anomaly versus recent funding history.
pub mod funding;

/// Execution cost, or order book spread and depth, stress.
pub mod liquidity;

/// Trailing return price-structure classifier.
pub mod structure;

pub use crowding::PositioningCrowding;
pub use funding::FundingAnomaly;
pub use liquidity::{LiquiditySource, LiquidityStress};
pub use structure::{StructureReading, classify, classify_structure};

/// How the decision engine consumes a confirmed indicator.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorRole {
    /// All crowding indicators must be confirmed for crowding to be confirmed.
    Crowding,
    /// Any confirmed stress indicator makes liquidity fragile.
    Stress,
}

/// Whether an indicator could be evaluated this tick.
#[derive(Clone, Eq, PartialEq, Debug, Deserialize, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum ReadingStatus {
    Evaluated,
    Insufficient(String),
}

/// Raw output of one [`Indicator`] evaluation.
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct IndicatorReading {
    pub raw: bool,
    pub status: ReadingStatus,
    pub direction: Option<Direction>,
    /// Input selected by indicators with more than one data source.
    pub source: Option<SmolStr>,
    pub values: IndexMap<SmolStr, Option<f64>>,
    pub thresholds: IndexMap<SmolStr, f64>,
}

impl IndicatorReading {
    pub fn evaluated(raw: bool) -> Self {
        Self {
            raw,
            status: ReadingStatus::Evaluated,
            direction: None,
            source: None,
            values: IndexMap::new(),
            thresholds: IndexMap::new(),
        }
    }

    /// Reading that could not be evaluated. Raw is always false.
    pub fn insufficient<S: Into<String>>(reason: S) -> Self {
        Self {
            status: ReadingStatus::Insufficient(reason.into()),
            ..Self::evaluated(false)
        }
    }

    pub fn with_value(mut self, name: &str, value: Option<f64>) -> Self {
        self.values.insert(SmolStr::new(name), value);
        self
    }

    pub fn with_threshold(mut self, name: &str, threshold: f64) -> Self {
        self.thresholds.insert(SmolStr::new(name), threshold);
        self
    }

    pub fn with_direction(mut self, direction: Option<Direction>) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_source<S: AsRef<str>>(mut self, source: S) -> Self {
        self.source = Some(SmolStr::new(source));
        self
    }

    pub fn is_evaluated(&self) -> bool {
        matches!(self.status, ReadingStatus::Evaluated)
    }

    pub fn reason(&self) -> Option<&str> {
        match &self.status {
            ReadingStatus::Evaluated => None,
            ReadingStatus::Insufficient(reason) => Some(reason),
        }
    }
}

/// Everything an [`Indicator`] may read when evaluating one instrument.
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    pub now: DateTime<Utc>,
    pub sample: &'a MetricSample,
    pub stats_config: &'a StatsConfig,
    pub stats: &'a RollingStats,
    /// Funding history fetched this tick, empty unless an indicator asked for it.
    pub funding_history: &'a [FundingPoint],
}

impl EvalContext<'_> {
    pub fn zscore(&self, metric: Metric) -> ZScoreReading {
        self.stats.zscore_reading(self.stats_config, metric, self.now)
    }
}

/// Pure signal evaluator plugged into the [`RiskEngine`](crate::engine::RiskEngine).
pub trait Indicator: Debug + Send + Sync {
    /// Stable identifier used for confirmation state and the trace.
    fn id(&self) -> &'static str;

    fn role(&self) -> IndicatorRole;

    fn evaluate(&self, ctx: &EvalContext<'_>) -> IndicatorReading;

    /// Whether the engine must fetch funding history for this indicator.
    fn needs_funding_history(&self) -> bool {
        false
    }
}

/// Construct the configured indicator set, in configuration order.
pub fn build_indicators(config: &EngineConfig) -> Vec<Box<dyn Indicator>> {
    config
        .indicators
        .iter()
        .map(|kind| -> Box<dyn Indicator> {
            match kind {
                IndicatorKind::PositioningCrowding => {
                    Box::new(PositioningCrowding::new(config.crowding.clone()))
                }
                IndicatorKind::FundingAnomaly => {
                    Box::new(FundingAnomaly::new(config.funding_anomaly.clone()))
                }
                IndicatorKind::LiquidityStress => {
                    Box::new(LiquidityStress::new(config.liquidity.clone()))
                }
            }
        })
        .collect()
}
