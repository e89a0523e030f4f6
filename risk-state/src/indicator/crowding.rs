use super::{EvalContext, Indicator, IndicatorReading, IndicatorRole};
use crate::{config::CrowdingConfig, stats::Metric, types::Direction};

/// Crowded positioning: open interest and funding both far from their own history.
///
/// Direction is `LONG` when the funding z-score is positive, `SHORT` otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct PositioningCrowding {
    config: CrowdingConfig,
}

impl PositioningCrowding {
    pub fn new(config: CrowdingConfig) -> Self {
        Self { config }
    }
}

impl Indicator for PositioningCrowding {
    fn id(&self) -> &'static str {
        "positioning_crowding"
    }

    fn role(&self) -> IndicatorRole {
        IndicatorRole::Crowding
    }

    fn evaluate(&self, ctx: &EvalContext<'_>) -> IndicatorReading {
        let oi_z = ctx.zscore(Metric::OpenInterest).value;
        let funding_z = ctx.zscore(Metric::FundingRate).value;

        let reading = match (oi_z, funding_z) {
            (Some(oi_z), Some(funding_z)) => IndicatorReading::evaluated(
                oi_z.abs() >= self.config.open_interest_z
                    && funding_z.abs() >= self.config.funding_z,
            )
            .with_direction(Some(if funding_z > 0.0 {
                Direction::Long
            } else {
                Direction::Short
            })),
            _ => IndicatorReading::insufficient("insufficient history"),
        };

        reading
            .with_value("oi_z", oi_z)
            .with_value("funding_z", funding_z)
            .with_threshold("oi_z", self.config.open_interest_z)
            .with_threshold("funding_z", self.config.funding_z)
    }
}
