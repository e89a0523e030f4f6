//! Rolling time-bucketed statistics.
//!
//! Each tracked metric of an instrument keeps a sparse, time-ordered sequence of fixed width
//! buckets holding an incremental mean. The z-score of the in-progress bucket is computed
//! against the *prior* buckets only, using the sample standard deviation.
//!
//! Mark prices are kept separately in a short [`PriceSeries`] used for trailing returns.

use crate::config::{StatsConfig, to_delta, window_start};
use chrono::{DateTime, TimeDelta, Utc};
use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Metric series tracked per instrument.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    OpenInterest,
    FundingRate,
    DayNotionalVolume,
    ExecutionCost,
    Spread,
    Depth,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::OpenInterest => "open_interest",
            Metric::FundingRate => "funding_rate",
            Metric::DayNotionalVolume => "day_notional_volume",
            Metric::ExecutionCost => "execution_cost",
            Metric::Spread => "spread",
            Metric::Depth => "depth",
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Fixed width aggregation window of one metric.
#[derive(Clone, Copy, PartialEq, Debug, Deserialize, Serialize)]
pub struct RollingBucket {
    pub start: DateTime<Utc>,
    pub average: f64,
    pub count: u64,
}

impl RollingBucket {
    fn new(start: DateTime<Utc>, value: f64) -> Self {
        Self {
            start,
            average: value,
            count: 1,
        }
    }

    fn push(&mut self, value: f64) {
        self.count += 1;
        self.average += (value - self.average) / self.count as f64;
    }
}

/// Z-score of the current bucket against its prior buckets, with the inputs used.
#[derive(Clone, Copy, PartialEq, Debug, Default, Deserialize, Serialize)]
pub struct ZScoreReading {
    /// `None` when the score cannot be evaluated.
    pub value: Option<f64>,
    pub current: Option<f64>,
    pub baseline_mean: Option<f64>,
    pub baseline_std: Option<f64>,
    pub prior_buckets: usize,
    pub full_coverage: bool,
}

/// Bucketed history of a single metric.
#[derive(Clone, PartialEq, Debug, Default, Deserialize, Serialize)]
pub struct MetricHistory {
    buckets: VecDeque<RollingBucket>,
}

impl MetricHistory {
    pub fn buckets(&self) -> impl Iterator<Item = &RollingBucket> {
        self.buckets.iter()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Fold a value into the bucket covering `time`, creating it if required.
    pub fn ingest(&mut self, time: DateTime<Utc>, value: f64, width: TimeDelta) {
        if !value.is_finite() {
            return;
        }
        let start = bucket_start(time, width);

        match self.buckets.back_mut() {
            Some(last) if last.start == start => last.push(value),
            Some(last) if last.start > start => {
                // Late sample: locate its bucket, keeping time order.
                match self
                    .buckets
                    .binary_search_by(|bucket| bucket.start.cmp(&start))
                {
                    Ok(index) => self.buckets[index].push(value),
                    Err(index) => self.buckets.insert(index, RollingBucket::new(start, value)),
                }
            }
            _ => self.buckets.push_back(RollingBucket::new(start, value)),
        }
    }

    /// Drop buckets starting before `cutoff`.
    pub fn prune(&mut self, cutoff: DateTime<Utc>) {
        while let Some(front) = self.buckets.front() {
            if front.start < cutoff {
                self.buckets.pop_front();
            } else {
                break;
            }
        }
    }

    /// Z-score of the bucket covering `now` against all earlier retained buckets.
    pub fn zscore(
        &self,
        now: DateTime<Utc>,
        width: TimeDelta,
        horizon: TimeDelta,
        require_full_coverage: bool,
    ) -> ZScoreReading {
        let current_start = bucket_start(now, width);
        let current = self
            .buckets
            .back()
            .filter(|bucket| bucket.start == current_start)
            .map(|bucket| bucket.average);

        let prior = self
            .buckets
            .iter()
            .filter(|bucket| bucket.start < current_start)
            .map(|bucket| bucket.average)
            .collect::<Vec<_>>();

        let full_coverage = self
            .buckets
            .front()
            .zip(now.checked_sub_signed(horizon))
            .is_some_and(|(oldest, start)| oldest.start <= start);

        let mut reading = ZScoreReading {
            current,
            prior_buckets: prior.len(),
            full_coverage,
            ..ZScoreReading::default()
        };

        if prior.len() < 2 {
            return reading;
        }

        let Some((mean, std)) = mean_and_sample_std(&prior) else {
            return reading;
        };
        reading.baseline_mean = Some(mean);
        reading.baseline_std = Some(std);

        if require_full_coverage && !full_coverage {
            return reading;
        }
        if !(std.is_finite() && std > 0.0) {
            return reading;
        }

        reading.value = current.map(|current| (current - mean) / std);
        reading
    }
}

/// All bucketed metric histories of one instrument.
#[derive(Clone, PartialEq, Debug, Default, Deserialize, Serialize)]
pub struct RollingStats {
    metrics: FnvHashMap<Metric, MetricHistory>,
}

impl RollingStats {
    pub fn history(&self, metric: Metric) -> Option<&MetricHistory> {
        self.metrics.get(&metric)
    }

    /// Fold a metric observation into its current bucket.
    pub fn ingest(
        &mut self,
        config: &StatsConfig,
        metric: Metric,
        time: DateTime<Utc>,
        value: f64,
    ) {
        self.metrics
            .entry(metric)
            .or_default()
            .ingest(time, value, to_delta(config.bucket_width));
    }

    /// Drop buckets older than `now - horizon - bucket_width`.
    pub fn prune(&mut self, config: &StatsConfig, now: DateTime<Utc>) {
        let cutoff = window_start(window_start(now, config.horizon), config.bucket_width);
        for history in self.metrics.values_mut() {
            history.prune(cutoff);
        }
    }

    /// Current-bucket z-score, `None` when it cannot be evaluated.
    pub fn zscore(&self, config: &StatsConfig, metric: Metric, now: DateTime<Utc>) -> Option<f64> {
        self.zscore_reading(config, metric, now).value
    }

    pub fn zscore_reading(
        &self,
        config: &StatsConfig,
        metric: Metric,
        now: DateTime<Utc>,
    ) -> ZScoreReading {
        self.metrics
            .get(&metric)
            .map(|history| {
                history.zscore(
                    now,
                    to_delta(config.bucket_width),
                    to_delta(config.horizon),
                    config.require_full_coverage,
                )
            })
            .unwrap_or_default()
    }
}

/// Timestamped mark price.
#[derive(Clone, Copy, PartialEq, Debug, Deserialize, Serialize)]
pub struct PricePoint {
    pub time: DateTime<Utc>,
    pub price: f64,
}

/// Short, time-ordered mark price series.
#[derive(Clone, PartialEq, Debug, Default, Deserialize, Serialize)]
pub struct PriceSeries {
    points: VecDeque<PricePoint>,
}

impl PriceSeries {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn push(&mut self, time: DateTime<Utc>, price: f64) {
        if !(price.is_finite() && price > 0.0) {
            return;
        }
        let point = PricePoint { time, price };
        match self.points.back() {
            Some(last) if last.time > time => {
                let index = self.points.partition_point(|p| p.time <= time);
                self.points.insert(index, point);
            }
            _ => self.points.push_back(point),
        }
    }

    /// Drop points older than `cutoff`.
    pub fn prune(&mut self, cutoff: DateTime<Utc>) {
        while let Some(front) = self.points.front() {
            if front.time < cutoff {
                self.points.pop_front();
            } else {
                break;
            }
        }
    }

    /// Most recent point at or before `time`; never a later sample.
    pub fn at_or_before(&self, time: DateTime<Utc>) -> Option<PricePoint> {
        let index = self.points.partition_point(|p| p.time <= time);
        index.checked_sub(1).map(|index| self.points[index])
    }
}

/// Mean and sample (n - 1) standard deviation, `None` below two values.
pub fn mean_and_sample_std(values: &[f64]) -> Option<(f64, f64)> {
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    Some((mean, variance.sqrt()))
}

/// Start of the bucket of `width` containing `time`.
pub fn bucket_start(time: DateTime<Utc>, width: TimeDelta) -> DateTime<Utc> {
    let width_ms = width.num_milliseconds().max(1);
    let ts = time.timestamp_millis();
    let aligned = ts - ts.rem_euclid(width_ms);
    DateTime::from_timestamp_millis(aligned).unwrap_or(time)
}
