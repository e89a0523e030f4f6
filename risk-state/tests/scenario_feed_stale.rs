#[path = "support.rs"]
mod support;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use risk_state::{
    EngineConfig, FeedError, Instrument, MemoryStore, MetricSample, MetricsFeed, RiskService,
    RiskState, service::Clock, staleness::STALE_MESSAGE,
};
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

/// Wall clock that follows Tokio's paused test time.
#[derive(Debug)]
struct TestClock {
    origin: DateTime<Utc>,
    start: tokio::time::Instant,
}

impl Clock for TestClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = tokio::time::Instant::now() - self.start;
        self.origin + TimeDelta::from_std(elapsed).unwrap_or_default()
    }
}

#[derive(Debug, Default)]
struct SwitchableFeed {
    down: AtomicBool,
}

#[async_trait]
impl MetricsFeed for SwitchableFeed {
    async fn fetch_metrics(&self, instrument: &Instrument) -> Result<MetricSample, FeedError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(FeedError::Status {
                instrument: instrument.clone(),
                status: 503,
            });
        }
        Ok(MetricSample {
            instrument: instrument.clone(),
            ..support::baseline(support::now())
        })
    }
}

#[tokio::test(start_paused = true)]
async fn no_successful_tick_for_61_seconds_is_stale() {
    support::init_tracing();
    let instruments = vec![Instrument::new("BTCUSDT"), Instrument::new("ETHUSDT")];
    let feed = Arc::new(SwitchableFeed::default());
    let config = EngineConfig::default().with_watchdog_interval(Duration::from_secs(1));

    let handle = RiskService::new(config, instruments, Arc::clone(&feed), MemoryStore::new())
        .with_clock(Arc::new(TestClock {
            origin: support::now(),
            start: tokio::time::Instant::now(),
        }))
        .start()
        .await
        .unwrap();

    // Initial tick succeeds, then the feed goes down.
    tokio::time::sleep(Duration::from_millis(500)).await;
    let last_success = handle.last_successful_tick().unwrap();
    assert!(
        handle
            .snapshot()
            .values()
            .all(|record| record.state == RiskState::Green)
    );
    feed.down.store(true, Ordering::SeqCst);

    // Failed ticks keep the previous map.
    tokio::time::sleep(Duration::from_secs(59)).await;
    assert!(
        handle
            .snapshot()
            .values()
            .all(|record| record.state == RiskState::Green)
    );

    tokio::time::sleep(Duration::from_millis(2_000)).await;
    let snapshot = handle.snapshot();
    assert_eq!(snapshot.len(), 2);
    for record in snapshot.values() {
        assert_eq!(record.state, RiskState::Unsupported);
        assert_eq!(record.message, STALE_MESSAGE);
        let stale = record.trace.stale.as_ref().unwrap();
        assert_eq!(stale.last_successful_tick, Some(last_success));
        assert_eq!(stale.overridden, Some(RiskState::Green));
        assert!(stale.age_secs > 60);
    }
    assert_eq!(handle.last_successful_tick(), Some(last_success));

    handle.stop().await;
}
