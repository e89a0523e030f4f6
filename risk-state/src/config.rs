use crate::error::ConfigError;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::{str::FromStr, time::Duration};

/// Built-in indicator plugins selectable by configuration.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorKind {
    /// Open interest and funding z-scores both anomalous.
    PositioningCrowding,
    /// Current funding deviates from its recent funding history, open interest above a floor.
    FundingAnomaly,
    /// Execution cost, or spread/depth fallback, anomalous versus its own history.
    LiquidityStress,
}

impl FromStr for IndicatorKind {
    type Err = ConfigError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().replace('-', "_").as_str() {
            "positioning_crowding" | "crowding" => Ok(Self::PositioningCrowding),
            "funding_anomaly" => Ok(Self::FundingAnomaly),
            "liquidity_stress" | "liquidity" => Ok(Self::LiquidityStress),
            other => Err(ConfigError::UnknownIndicator(other.to_string())),
        }
    }
}

/// Rolling statistics store configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StatsConfig {
    /// Width of one aggregation bucket.
    pub bucket_width: Duration,
    /// Trailing horizon of retained buckets.
    pub horizon: Duration,
    /// Require the oldest retained bucket to reach back the full horizon before a z-score is
    /// considered valid. When `false`, two prior buckets are enough.
    pub require_full_coverage: bool,
    /// Retention of the mark price series used for structure returns.
    pub price_retention: Duration,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            bucket_width: Duration::from_secs(15 * 60),
            horizon: Duration::from_secs(7 * 24 * 60 * 60),
            require_full_coverage: false,
            price_retention: Duration::from_secs(2 * 60 * 60),
        }
    }
}

/// Eligibility gate on minimum traded notional and open interest.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct UniverseConfig {
    pub min_day_notional_volume: f64,
    pub min_open_interest: f64,
}

impl Default for UniverseConfig {
    fn default() -> Self {
        Self {
            min_day_notional_volume: 25_000_000.0,
            min_open_interest: 10_000_000.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CrowdingConfig {
    pub open_interest_z: f64,
    pub funding_z: f64,
}

impl Default for CrowdingConfig {
    fn default() -> Self {
        Self {
            open_interest_z: 1.5,
            funding_z: 1.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct FundingAnomalyConfig {
    /// Funding history look-back requested from the feed.
    pub lookback: Duration,
    pub min_points: usize,
    pub funding_z: f64,
    /// Open interest cap: below this notional the anomaly is not considered crowding.
    pub min_open_interest: f64,
}

impl Default for FundingAnomalyConfig {
    fn default() -> Self {
        Self {
            lookback: Duration::from_secs(3 * 24 * 60 * 60),
            min_points: 3,
            funding_z: 2.0,
            min_open_interest: 10_000_000.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StructureConfig {
    pub short_horizon: Duration,
    pub long_horizon: Duration,
    /// A long-horizon return smaller than this (as a fraction) counts as flat.
    pub flat_return: f64,
}

impl Default for StructureConfig {
    fn default() -> Self {
        Self {
            short_horizon: Duration::from_secs(15 * 60),
            long_horizon: Duration::from_secs(60 * 60),
            flat_return: 0.001,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LiquidityConfig {
    pub execution_cost_z: f64,
    pub spread_z: f64,
    /// Depth z-score at or below which the book counts as thin (negative).
    pub depth_z: f64,
}

impl Default for LiquidityConfig {
    fn default() -> Self {
        Self {
            execution_cost_z: 1.5,
            spread_z: 1.5,
            depth_z: -1.5,
        }
    }
}

/// Minimum dwell time in a state before it may downgrade.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct HoldConfig {
    pub red: Duration,
    pub orange: Duration,
}

impl Default for HoldConfig {
    fn default() -> Self {
        Self {
            red: Duration::from_secs(30 * 60),
            orange: Duration::from_secs(15 * 60),
        }
    }
}

/// Complete [`RiskEngine`](crate::engine::RiskEngine) and
/// [`RiskService`](crate::service::RiskService) configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Main tick interval.
    pub tick_interval: Duration,
    /// Budget for fetching every instrument within one tick.
    pub tick_timeout: Duration,
    /// Staleness watchdog timer interval.
    pub watchdog_interval: Duration,
    /// Maximum age of the last successful tick before every instrument is forced unsupported.
    pub stale_after: Duration,
    /// Consecutive raw hits required before an indicator is confirmed.
    pub confirmation_ticks: u32,
    pub indicators: Vec<IndicatorKind>,
    pub stats: StatsConfig,
    pub universe: UniverseConfig,
    pub crowding: CrowdingConfig,
    pub funding_anomaly: FundingAnomalyConfig,
    pub structure: StructureConfig,
    pub liquidity: LiquidityConfig,
    pub hold: HoldConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(15),
            tick_timeout: Duration::from_secs(10),
            watchdog_interval: Duration::from_secs(10),
            stale_after: Duration::from_secs(60),
            confirmation_ticks: 2,
            indicators: vec![
                IndicatorKind::PositioningCrowding,
                IndicatorKind::LiquidityStress,
            ],
            stats: StatsConfig::default(),
            universe: UniverseConfig::default(),
            crowding: CrowdingConfig::default(),
            funding_anomaly: FundingAnomalyConfig::default(),
            structure: StructureConfig::default(),
            liquidity: LiquidityConfig::default(),
            hold: HoldConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Set the main tick interval
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Set the per-tick fetch budget
    pub fn with_tick_timeout(mut self, timeout: Duration) -> Self {
        self.tick_timeout = timeout;
        self
    }

    /// Set the staleness watchdog interval
    pub fn with_watchdog_interval(mut self, interval: Duration) -> Self {
        self.watchdog_interval = interval;
        self
    }

    /// Set the staleness timeout
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Set the confirmation threshold
    pub fn with_confirmation_ticks(mut self, ticks: u32) -> Self {
        self.confirmation_ticks = ticks;
        self
    }

    /// Replace the configured indicator set
    pub fn with_indicators(mut self, indicators: Vec<IndicatorKind>) -> Self {
        self.indicators = indicators;
        self
    }

    /// Toggle the full 7 day coverage requirement for z-scores
    pub fn with_full_coverage(mut self, require: bool) -> Self {
        self.stats.require_full_coverage = require;
        self
    }

    /// Set the universe thresholds
    pub fn with_universe(mut self, universe: UniverseConfig) -> Self {
        self.universe = universe;
        self
    }

    /// Set the hold times
    pub fn with_hold(mut self, hold: HoldConfig) -> Self {
        self.hold = hold;
        self
    }

    /// Build a configuration from defaults overridden by `RISK_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from defaults overridden by values returned by `lookup`.
    ///
    /// Durations are whole seconds. `RISK_INDICATORS` is a comma separated list of
    /// [`IndicatorKind`] names.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(secs) = parse::<u64, _>(&lookup, "RISK_TICK_INTERVAL_SECS")? {
            config.tick_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parse::<u64, _>(&lookup, "RISK_TICK_TIMEOUT_SECS")? {
            config.tick_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse::<u64, _>(&lookup, "RISK_WATCHDOG_INTERVAL_SECS")? {
            config.watchdog_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parse::<u64, _>(&lookup, "RISK_STALE_AFTER_SECS")? {
            config.stale_after = Duration::from_secs(secs);
        }
        if let Some(ticks) = parse(&lookup, "RISK_CONFIRMATION_TICKS")? {
            config.confirmation_ticks = ticks;
        }
        if let Some(require) = parse(&lookup, "RISK_REQUIRE_FULL_COVERAGE")? {
            config.stats.require_full_coverage = require;
        }
        if let Some(volume) = parse(&lookup, "RISK_MIN_DAY_NOTIONAL")? {
            config.universe.min_day_notional_volume = volume;
        }
        if let Some(open_interest) = parse(&lookup, "RISK_MIN_OPEN_INTEREST")? {
            config.universe.min_open_interest = open_interest;
        }
        if let Some(z) = parse(&lookup, "RISK_CROWDING_Z")? {
            config.crowding.open_interest_z = z;
            config.crowding.funding_z = z;
        }
        if let Some(z) = parse(&lookup, "RISK_LIQUIDITY_Z")? {
            config.liquidity.execution_cost_z = z;
            config.liquidity.spread_z = z;
            config.liquidity.depth_z = -z;
        }
        if let Some(secs) = parse::<u64, _>(&lookup, "RISK_RED_HOLD_SECS")? {
            config.hold.red = Duration::from_secs(secs);
        }
        if let Some(secs) = parse::<u64, _>(&lookup, "RISK_ORANGE_HOLD_SECS")? {
            config.hold.orange = Duration::from_secs(secs);
        }
        if let Some(list) = lookup("RISK_INDICATORS") {
            config.indicators = list
                .split(',')
                .filter(|name| !name.trim().is_empty())
                .map(IndicatorKind::from_str)
                .collect::<Result<Vec<_>, _>>()?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval.is_zero() || self.watchdog_interval.is_zero() {
            return Err(ConfigError::Inconsistent(
                "tick and watchdog intervals must be non-zero".to_string(),
            ));
        }
        if self.stats.bucket_width.is_zero() {
            return Err(ConfigError::Inconsistent(
                "bucket width must be non-zero".to_string(),
            ));
        }
        if self.confirmation_ticks == 0 {
            return Err(ConfigError::Inconsistent(
                "confirmation threshold must be at least 1".to_string(),
            ));
        }
        if self.watchdog_interval >= self.stale_after {
            return Err(ConfigError::Inconsistent(format!(
                "watchdog interval {:?} must be shorter than the stale timeout {:?}",
                self.watchdog_interval, self.stale_after
            )));
        }
        if self.stats.price_retention < self.structure.long_horizon {
            return Err(ConfigError::Inconsistent(format!(
                "price retention {:?} must cover the long structure horizon {:?}",
                self.stats.price_retention, self.structure.long_horizon
            )));
        }

        // Windows are subtracted from wall-clock timestamps.
        let windows = [
            ("stats.horizon", self.stats.horizon),
            ("stats.bucket_width", self.stats.bucket_width),
            ("stats.price_retention", self.stats.price_retention),
            ("funding_anomaly.lookback", self.funding_anomaly.lookback),
            ("structure.long_horizon", self.structure.long_horizon),
            ("hold.red", self.hold.red),
            ("hold.orange", self.hold.orange),
            ("stale_after", self.stale_after),
        ];
        if let Some((name, window)) = windows.iter().find(|(_, window)| *window > MAX_WINDOW) {
            return Err(ConfigError::Inconsistent(format!(
                "{name} {window:?} exceeds the maximum window {MAX_WINDOW:?}"
            )));
        }
        Ok(())
    }
}

/// Longest configurable time window.
pub const MAX_WINDOW: Duration = Duration::from_secs(366 * 24 * 60 * 60);

/// Convert a configuration [`Duration`] into a chrono [`TimeDelta`], saturating on overflow.
pub fn to_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

/// Start of the window of length `duration` ending at `now`, clamped to the earliest
/// representable timestamp.
pub fn window_start(now: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    now.checked_sub_signed(to_delta(duration))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn parse<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.tick_interval, Duration::from_secs(15));
        assert_eq!(config.watchdog_interval, Duration::from_secs(10));
        assert_eq!(config.stale_after, Duration::from_secs(60));
        assert_eq!(config.confirmation_ticks, 2);
        assert_eq!(config.hold.red, Duration::from_secs(1800));
        assert_eq!(config.hold.orange, Duration::from_secs(900));
        assert!(!config.stats.require_full_coverage);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = EngineConfig::default()
            .with_tick_interval(Duration::from_secs(5))
            .with_stale_after(Duration::from_secs(30))
            .with_watchdog_interval(Duration::from_secs(3))
            .with_confirmation_ticks(3)
            .with_full_coverage(true)
            .with_indicators(vec![IndicatorKind::FundingAnomaly]);

        assert_eq!(config.tick_interval, Duration::from_secs(5));
        assert_eq!(config.stale_after, Duration::from_secs(30));
        assert_eq!(config.watchdog_interval, Duration::from_secs(3));
        assert_eq!(config.confirmation_ticks, 3);
        assert!(config.stats.require_full_coverage);
        assert_eq!(config.indicators, vec![IndicatorKind::FundingAnomaly]);
    }

    #[test]
    fn test_validate() {
        struct TestCase {
            input: EngineConfig,
            expected: bool,
        }

        let tests = vec![
            TestCase {
                // TC0: defaults are valid
                input: EngineConfig::default(),
                expected: true,
            },
            TestCase {
                // TC1: zero tick interval
                input: EngineConfig::default().with_tick_interval(Duration::ZERO),
                expected: false,
            },
            TestCase {
                // TC2: price series shorter than the 1h structure return
                input: EngineConfig {
                    stats: StatsConfig {
                        price_retention: Duration::from_secs(30 * 60),
                        ..StatsConfig::default()
                    },
                    ..EngineConfig::default()
                },
                expected: false,
            },
            TestCase {
                // TC3: retention exactly equal to the long horizon
                input: EngineConfig {
                    stats: StatsConfig {
                        price_retention: Duration::from_secs(60 * 60),
                        ..StatsConfig::default()
                    },
                    ..EngineConfig::default()
                },
                expected: true,
            },
            TestCase {
                // TC4: horizon beyond any representable timestamp offset
                input: EngineConfig {
                    stats: StatsConfig {
                        horizon: Duration::from_secs(u64::MAX),
                        ..StatsConfig::default()
                    },
                    ..EngineConfig::default()
                },
                expected: false,
            },
            TestCase {
                // TC5: funding look-back just over the maximum window
                input: EngineConfig {
                    funding_anomaly: FundingAnomalyConfig {
                        lookback: MAX_WINDOW + Duration::from_secs(1),
                        ..FundingAnomalyConfig::default()
                    },
                    ..EngineConfig::default()
                },
                expected: false,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = test.input.validate().is_ok();
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_window_start_clamps() {
        let now = DateTime::from_timestamp(1_704_067_200, 0).unwrap();
        assert_eq!(
            window_start(now, Duration::from_secs(3600)),
            DateTime::from_timestamp(1_704_063_600, 0).unwrap()
        );
        assert_eq!(
            window_start(now, Duration::from_secs(u64::MAX)),
            DateTime::<Utc>::MIN_UTC
        );
    }

    #[test]
    fn test_from_lookup() {
        struct TestCase {
            input: Vec<(&'static str, &'static str)>,
            expected: Result<EngineConfig, ConfigError>,
        }

        let tests = vec![
            TestCase {
                // TC0: no overrides yields defaults
                input: vec![],
                expected: Ok(EngineConfig::default()),
            },
            TestCase {
                // TC1: numeric and list overrides
                input: vec![
                    ("RISK_TICK_INTERVAL_SECS", "30"),
                    ("RISK_MIN_DAY_NOTIONAL", "50000000"),
                    ("RISK_REQUIRE_FULL_COVERAGE", "true"),
                    ("RISK_INDICATORS", "crowding, funding-anomaly,liquidity"),
                ],
                expected: Ok(EngineConfig {
                    tick_interval: Duration::from_secs(30),
                    universe: UniverseConfig {
                        min_day_notional_volume: 50_000_000.0,
                        ..UniverseConfig::default()
                    },
                    stats: StatsConfig {
                        require_full_coverage: true,
                        ..StatsConfig::default()
                    },
                    indicators: vec![
                        IndicatorKind::PositioningCrowding,
                        IndicatorKind::FundingAnomaly,
                        IndicatorKind::LiquidityStress,
                    ],
                    ..EngineConfig::default()
                }),
            },
            TestCase {
                // TC2: unparsable value
                input: vec![("RISK_STALE_AFTER_SECS", "soon")],
                expected: Err(ConfigError::Invalid {
                    key: "RISK_STALE_AFTER_SECS",
                    value: "soon".to_string(),
                }),
            },
            TestCase {
                // TC3: unknown indicator name
                input: vec![("RISK_INDICATORS", "crowding,vibes")],
                expected: Err(ConfigError::UnknownIndicator("vibes".to_string())),
            },
            TestCase {
                // TC4: watchdog must tick faster than the stale timeout
                input: vec![("RISK_WATCHDOG_INTERVAL_SECS", "90")],
                expected: Err(ConfigError::Inconsistent(
                    "watchdog interval 90s must be shorter than the stale timeout 60s"
                        .to_string(),
                )),
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = EngineConfig::from_lookup(lookup_from(&test.input));
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }
}
