use crate::{
    config::{StructureConfig, window_start},
    stats::PriceSeries,
    types::{Direction, Structure},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result of the price-structure classifier, including its inputs.
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct StructureReading {
    pub direction: Direction,
    /// `None` when an anchor price is unavailable.
    pub structure: Option<Structure>,
    pub price_now: Option<f64>,
    pub return_short: Option<f64>,
    pub return_long: Option<f64>,
    pub reason: Option<String>,
}

/// Classify trailing returns of `prices` relative to the crowding `direction`.
///
/// Anchor prices are the nearest points at or before `now - horizon`, never later samples.
pub fn classify_structure(
    config: &StructureConfig,
    direction: Direction,
    prices: &PriceSeries,
    now: DateTime<Utc>,
) -> StructureReading {
    let price_now = prices.at_or_before(now).map(|point| point.price);
    let anchor_short = prices.at_or_before(window_start(now, config.short_horizon));
    let anchor_long = prices.at_or_before(window_start(now, config.long_horizon));

    let return_short = price_now
        .zip(anchor_short)
        .map(|(price, anchor)| (price - anchor.price) / anchor.price);
    let return_long = price_now
        .zip(anchor_long)
        .map(|(price, anchor)| (price - anchor.price) / anchor.price);

    let (structure, reason) = match (return_short, return_long) {
        (Some(short), Some(long)) => (
            Some(classify(direction, short, long, config.flat_return)),
            None,
        ),
        _ => (None, Some("anchor price unavailable".to_string())),
    };

    StructureReading {
        direction,
        structure,
        price_now,
        return_short,
        return_long,
        reason,
    }
}

/// Directional rule table.
///
/// A flat long-horizon return is always [`Structure::Weakening`].
pub fn classify(direction: Direction, short: f64, long: f64, flat_return: f64) -> Structure {
    if long.abs() < flat_return {
        return Structure::Weakening;
    }

    let (with, against) = match direction {
        Direction::Long => (short > 0.0 && long > 0.0, short < 0.0 && long < 0.0),
        Direction::Short => (short < 0.0 && long < 0.0, short > 0.0 && long > 0.0),
    };

    match (with, against) {
        (true, _) => Structure::Intact,
        (_, true) => Structure::Broken,
        _ => Structure::Weakening,
    }
}
