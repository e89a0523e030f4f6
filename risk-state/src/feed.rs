use crate::{
    error::FeedError,
    types::{Instrument, MetricSample},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// One funding rate settlement.
#[derive(Clone, Copy, PartialEq, Debug, Deserialize, Serialize)]
pub struct FundingPoint {
    pub time: DateTime<Utc>,
    pub rate: f64,
}

/// Everything fetched for one instrument within a tick.
#[derive(Clone, PartialEq, Debug)]
pub struct FeedSnapshot {
    pub sample: MetricSample,
    /// Empty unless an indicator requires funding history.
    pub funding_history: Vec<FundingPoint>,
}

impl FeedSnapshot {
    pub fn new(sample: MetricSample) -> Self {
        Self {
            sample,
            funding_history: Vec::new(),
        }
    }

    pub fn with_funding_history(mut self, history: Vec<FundingPoint>) -> Self {
        self.funding_history = history;
        self
    }
}

/// Source of per-instrument market metrics polled every tick.
#[async_trait]
pub trait MetricsFeed: Send + Sync {
    async fn fetch_metrics(&self, instrument: &Instrument) -> Result<MetricSample, FeedError>;

    /// Funding settlements since `since`. Feeds without funding history return none.
    async fn fetch_funding_history(
        &self,
        _instrument: &Instrument,
        _since: DateTime<Utc>,
    ) -> Result<Vec<FundingPoint>, FeedError> {
        Ok(Vec::new())
    }
}

#[async_trait]
impl<Feed> MetricsFeed for Arc<Feed>
where
    Feed: MetricsFeed + ?Sized,
{
    async fn fetch_metrics(&self, instrument: &Instrument) -> Result<MetricSample, FeedError> {
        (**self).fetch_metrics(instrument).await
    }

    async fn fetch_funding_history(
        &self,
        instrument: &Instrument,
        since: DateTime<Utc>,
    ) -> Result<Vec<FundingPoint>, FeedError> {
        (**self).fetch_funding_history(instrument, since).await
    }
}

/// Fetch one instrument. Funding history is only requested when `funding_since` is set, and a
/// failed history request degrades to an empty history.
pub async fn fetch_snapshot<Feed>(
    feed: &Feed,
    instrument: &Instrument,
    funding_since: Option<DateTime<Utc>>,
) -> Result<FeedSnapshot, FeedError>
where
    Feed: MetricsFeed + ?Sized,
{
    let sample = feed.fetch_metrics(instrument).await?;

    let funding_history = match funding_since {
        None => Vec::new(),
        Some(since) => feed
            .fetch_funding_history(instrument, since)
            .await
            .unwrap_or_else(|error| {
                warn!(%instrument, %error, "funding history unavailable");
                Vec::new()
            }),
    };

    Ok(FeedSnapshot::new(sample).with_funding_history(funding_history))
}

/// Fetch every instrument concurrently, preserving input order.
pub async fn fetch_all<Feed>(
    feed: &Feed,
    instruments: &[Instrument],
    funding_since: Option<DateTime<Utc>>,
) -> Vec<(Instrument, Result<FeedSnapshot, FeedError>)>
where
    Feed: MetricsFeed + ?Sized,
{
    join_all(instruments.iter().map(|instrument| async move {
        let result = fetch_snapshot(feed, instrument, funding_since).await;
        (instrument.clone(), result)
    }))
    .await
}
