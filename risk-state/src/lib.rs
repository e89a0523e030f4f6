#![forbid(unsafe_code)]

//! # risk-state
//! Streaming market risk-state inference for perpetual futures instruments.
//!
//! Every tick the engine samples open interest, funding, traded notional, execution cost,
//! order book spread/depth and mark price per instrument, and reduces them to a single
//! [`RiskState`] (`GREEN`, `ORANGE`, `RED` or `UNSUPPORTED`) together with a serialisable
//! [`DebugTrace`] explaining exactly why.
//!
//! Pipeline per instrument:
//! - [`stats`]: 15 minute buckets over a 7 day horizon, online z-scores.
//! - [`indicator`]: crowding, funding anomaly and liquidity stress readings, plus the
//!   price-structure classification.
//! - [`confirm`]: N consecutive hits debounce.
//! - [`decision`]: universe gate, decision table and safety clamp.
//! - [`hysteresis`]: minimum dwell time before a downgrade.
//! - [`staleness`]: forces `UNSUPPORTED` when the feed goes quiet.
//! - [`service`]: tick scheduler, watchdog timer and subscriber fan-out.

/// All errors generated in `risk-state`.
pub mod error;

/// Engine configuration with defaults, builder methods and environment overrides.
pub mod config;

/// Core data types: instruments, metric samples, risk states and published records.
pub mod types;

/// Rolling 15 minute bucket statistics and price series.
pub mod stats;

/// Indicator plugins and the price-structure classifier.
pub mod indicator;

/// Consecutive-hit confirmation (debounce).
pub mod confirm;

/// Universe gate and the risk decision table.
pub mod decision;

/// Minimum dwell time before a risk state may downgrade.
pub mod hysteresis;

/// Feed staleness detection and override.
pub mod staleness;

/// Structured justification trace attached to every published record.
pub mod trace;

/// Synchronous per-tick engine owning all per-instrument state.
pub mod engine;

/// Feed collaborator interface.
pub mod feed;

/// Key-value persistence for per-instrument engine state.
pub mod store;

/// Tick scheduler, staleness watchdog task and subscription handle.
pub mod service;

pub use config::EngineConfig;
pub use engine::RiskEngine;
pub use error::{ConfigError, FeedError, StoreError, TickError};
pub use feed::{FeedSnapshot, FundingPoint, MetricsFeed};
pub use service::{RiskService, RiskServiceHandle, Subscription};
pub use store::{JsonFileStore, MemoryStore, StateStore};
pub use trace::DebugTrace;
pub use types::{
    Direction, Instrument, MetricSample, OrderBookSnapshot, RiskMap, RiskPerInstrument, RiskState,
    Structure,
};
