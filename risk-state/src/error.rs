use crate::types::Instrument;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors produced by a [`MetricsFeed`](crate::feed::MetricsFeed) collaborator.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Deserialize, Serialize, Error)]
pub enum FeedError {
    #[error("feed request for {instrument} failed: {message}")]
    Request {
        instrument: Instrument,
        message: String,
    },

    #[error("feed responded with HTTP {status} for {instrument}")]
    Status { instrument: Instrument, status: u16 },

    #[error("failed to decode feed payload for {instrument}: {message}")]
    Decode {
        instrument: Instrument,
        message: String,
    },

    #[error("feed has no market for instrument: {0}")]
    UnsupportedInstrument(Instrument),

    #[error("feed call timed out after {0:?}")]
    Timeout(Duration),
}

impl FeedError {
    /// Determine if retrying on the next tick may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            FeedError::Request { .. } | FeedError::Timeout(_) => true,
            FeedError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Errors produced by a [`StateStore`](crate::store::StateStore).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state store io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("state store serialisation error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Reasons a whole tick is abandoned and the previously published map kept.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum TickError {
    #[error("no instruments are tracked")]
    NoInstruments,

    #[error("every feed fetch failed ({failed} instruments), first error: {first}")]
    AllFetchesFailed { failed: usize, first: FeedError },

    #[error("tick exceeded its {0:?} budget")]
    Timeout(Duration),
}

/// Invalid configuration value.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },

    #[error("unknown indicator: {0:?}")]
    UnknownIndicator(String),

    #[error("invalid configuration: {0}")]
    Inconsistent(String),
}
