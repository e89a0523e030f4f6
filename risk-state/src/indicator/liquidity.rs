use super::{EvalContext, Indicator, IndicatorReading, IndicatorRole};
use crate::{config::LiquidityConfig, stats::Metric};
use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Data source selected by [`LiquidityStress`].
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Display, Deserialize, Serialize)]
pub enum LiquiditySource {
    #[display("ExecutionCost")]
    ExecutionCost,
    #[display("OrderBook")]
    OrderBook,
    #[display("Unavailable")]
    Unavailable,
}

/// Thin or expensive liquidity compared with the instrument's own history.
///
/// Prefers the execution cost z-score. Falls back to the order book when no cost z-score can be
/// computed: wide spread *or* thin depth.
#[derive(Debug, Clone, PartialEq)]
pub struct LiquidityStress {
    config: LiquidityConfig,
}

impl LiquidityStress {
    pub fn new(config: LiquidityConfig) -> Self {
        Self { config }
    }
}

impl Indicator for LiquidityStress {
    fn id(&self) -> &'static str {
        "liquidity_stress"
    }

    fn role(&self) -> IndicatorRole {
        IndicatorRole::Stress
    }

    fn evaluate(&self, ctx: &EvalContext<'_>) -> IndicatorReading {
        let cost_z = ctx
            .sample
            .execution_cost
            .and_then(|_| ctx.zscore(Metric::ExecutionCost).value);

        if let Some(cost_z) = cost_z {
            return IndicatorReading::evaluated(cost_z >= self.config.execution_cost_z)
                .with_source(LiquiditySource::ExecutionCost.to_string())
                .with_value("execution_cost", ctx.sample.execution_cost)
                .with_value("execution_cost_z", Some(cost_z))
                .with_threshold("execution_cost_z", self.config.execution_cost_z);
        }

        let spread_z = ctx.zscore(Metric::Spread).value;
        let depth_z = ctx.zscore(Metric::Depth).value;

        let reading = if spread_z.is_none() && depth_z.is_none() {
            IndicatorReading::insufficient("no execution cost or order book history")
                .with_source(LiquiditySource::Unavailable.to_string())
        } else {
            let wide = spread_z.is_some_and(|z| z >= self.config.spread_z);
            let thin = depth_z.is_some_and(|z| z <= self.config.depth_z);
            IndicatorReading::evaluated(wide || thin)
                .with_source(LiquiditySource::OrderBook.to_string())
        };

        reading
            .with_value("execution_cost", ctx.sample.execution_cost)
            .with_value("execution_cost_z", None)
            .with_value("spread_z", spread_z)
            .with_value("depth_z", depth_z)
            .with_threshold("spread_z", self.config.spread_z)
            .with_threshold("depth_z", self.config.depth_z)
    }
}
