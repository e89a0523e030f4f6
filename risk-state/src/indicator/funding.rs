use super::{EvalContext, Indicator, IndicatorReading, IndicatorRole};
use crate::{
    config::{FundingAnomalyConfig, window_start},
    stats::mean_and_sample_std,
    types::Direction,
};

/// Current funding rate versus the mean of recent funding settlements, gated on open interest.
///
/// Unlike [`PositioningCrowding`](super::PositioningCrowding) the baseline is the raw funding
/// history returned by the feed rather than the bucketed statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct FundingAnomaly {
    config: FundingAnomalyConfig,
}

impl FundingAnomaly {
    pub fn new(config: FundingAnomalyConfig) -> Self {
        Self { config }
    }
}

impl Indicator for FundingAnomaly {
    fn id(&self) -> &'static str {
        "funding_anomaly"
    }

    fn role(&self) -> IndicatorRole {
        IndicatorRole::Crowding
    }

    fn needs_funding_history(&self) -> bool {
        true
    }

    fn evaluate(&self, ctx: &EvalContext<'_>) -> IndicatorReading {
        let since = window_start(ctx.now, self.config.lookback);
        let history = ctx
            .funding_history
            .iter()
            .filter(|point| point.time >= since && point.time <= ctx.now)
            .map(|point| point.rate)
            .filter(|rate| rate.is_finite())
            .collect::<Vec<_>>();

        let funding = ctx.sample.funding_rate;
        let open_interest = ctx.sample.open_interest;
        let baseline = (history.len() >= self.config.min_points)
            .then(|| mean_and_sample_std(&history))
            .flatten();

        let funding_z = match (funding, baseline) {
            (Some(funding), Some((mean, std))) if std > 0.0 => Some((funding - mean) / std),
            _ => None,
        };

        let reading = match (funding_z, open_interest) {
            (Some(z), Some(open_interest)) => IndicatorReading::evaluated(
                z.abs() >= self.config.funding_z && open_interest >= self.config.min_open_interest,
            )
            .with_direction(Some(if z > 0.0 {
                Direction::Long
            } else {
                Direction::Short
            })),
            (_, None) => IndicatorReading::insufficient("open interest unavailable"),
            (None, _) if funding.is_none() => IndicatorReading::insufficient("funding rate unavailable"),
            (None, _) => IndicatorReading::insufficient("insufficient funding history"),
        };

        reading
            .with_value("funding_rate", funding)
            .with_value("funding_mean", baseline.map(|(mean, _)| mean))
            .with_value("funding_std", baseline.map(|(_, std)| std))
            .with_value("funding_z", funding_z)
            .with_value("history_points", Some(history.len() as f64))
            .with_value("open_interest", open_interest)
            .with_threshold("funding_z", self.config.funding_z)
            .with_threshold("min_open_interest", self.config.min_open_interest)
    }
}
