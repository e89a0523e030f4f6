use crate::{
    config::EngineConfig,
    engine::RiskEngine,
    error::{ConfigError, TickError},
    feed::{MetricsFeed, fetch_all},
    staleness::StalenessWatchdog,
    store::StateStore,
    types::{Instrument, RiskMap, RiskPerInstrument},
};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::{fmt::Debug, sync::Arc};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, error, info, warn};

/// Wall clock used to timestamp ticks and staleness checks.
pub trait Clock: Debug + Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug)]
struct PublishedState {
    map: Arc<RiskMap>,
    last_success: Option<DateTime<Utc>>,
}

/// Published map shared between the tick task, the watchdog task and handles.
#[derive(Debug)]
struct Shared {
    published: RwLock<PublishedState>,
    updates: watch::Sender<Arc<RiskMap>>,
}

impl Shared {
    fn new() -> Self {
        let map = Arc::new(RiskMap::new());
        let (updates, _) = watch::channel(Arc::clone(&map));
        Self {
            published: RwLock::new(PublishedState {
                map,
                last_success: None,
            }),
            updates,
        }
    }

    fn map(&self) -> Arc<RiskMap> {
        Arc::clone(&self.published.read().map)
    }

    fn last_success(&self) -> Option<DateTime<Utc>> {
        self.published.read().last_success
    }

    fn publish_tick(&self, map: RiskMap, now: DateTime<Utc>) {
        let map = Arc::new(map);
        let mut published = self.published.write();
        published.map = Arc::clone(&map);
        published.last_success = Some(now);
        self.updates.send_replace(map);
    }

    /// Replace the published map with the stale override if the feed is stale.
    ///
    /// The check and the override happen under one write lock, so a tick publishing
    /// concurrently is never overwritten by an outdated stale verdict.
    fn check_stale(&self, watchdog: &StalenessWatchdog, tracked: &[Instrument], now: DateTime<Utc>) {
        let mut published = self.published.write();

        let Some(age) = watchdog.check(published.last_success, now) else {
            return;
        };
        if StalenessWatchdog::is_overridden(tracked, &published.map) {
            return;
        }

        warn!(
            age_secs = age.num_seconds(),
            last_success = ?published.last_success,
            "feed stale, forcing every instrument UNSUPPORTED"
        );

        let map = Arc::new(watchdog.stale_map(
            tracked,
            &published.map,
            published.last_success,
            now,
            age,
        ));
        published.map = Arc::clone(&map);
        self.updates.send_replace(map);
    }
}

/// Builder for a running risk-state service over a fixed instrument set.
#[derive(Debug)]
pub struct RiskService<Feed, Store> {
    config: EngineConfig,
    instruments: Vec<Instrument>,
    feed: Feed,
    store: Store,
    clock: Arc<dyn Clock>,
    engine: Option<RiskEngine>,
}

impl<Feed, Store> RiskService<Feed, Store>
where
    Feed: MetricsFeed + 'static,
    Store: StateStore + 'static,
{
    pub fn new(config: EngineConfig, instruments: Vec<Instrument>, feed: Feed, store: Store) -> Self {
        Self {
            config,
            instruments,
            feed,
            store,
            clock: Arc::new(SystemClock),
            engine: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Use a pre-built engine, eg/ one with custom indicator plugins.
    pub fn with_engine(mut self, engine: RiskEngine) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Validate the configuration, restore persisted state and spawn the tick and watchdog
    /// tasks.
    ///
    /// Must be called within a Tokio runtime.
    pub async fn start(self) -> Result<RiskServiceHandle, ConfigError> {
        let Self {
            config,
            instruments,
            feed,
            store,
            clock,
            engine,
        } = self;
        config.validate()?;

        let mut engine = engine.unwrap_or_else(|| RiskEngine::new(config.clone()));
        match engine.restore(&store, &instruments).await {
            Ok(restored) => info!(restored, tracked = instruments.len(), "restored engine state"),
            Err(error) => warn!(%error, "failed to restore engine state, starting cold"),
        }

        let shared = Arc::new(Shared::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let watchdog = StalenessWatchdog::new(config.stale_after, clock.now());

        let ticks = tokio::spawn(run_ticks(
            TickLoop {
                engine,
                feed,
                store,
                instruments: instruments.clone(),
                clock: Arc::clone(&clock),
                shared: Arc::clone(&shared),
                tick_interval: config.tick_interval,
                tick_timeout: config.tick_timeout,
            },
            shutdown_rx.clone(),
        ));

        let watchdog = tokio::spawn(run_watchdog(
            watchdog,
            config.watchdog_interval,
            instruments,
            clock,
            Arc::clone(&shared),
            shutdown_rx,
        ));

        info!(
            tick_interval = ?config.tick_interval,
            watchdog_interval = ?config.watchdog_interval,
            stale_after = ?config.stale_after,
            "risk-state service started"
        );

        Ok(RiskServiceHandle {
            shared,
            shutdown: shutdown_tx,
            tasks: vec![ticks, watchdog],
        })
    }
}

struct TickLoop<Feed, Store> {
    engine: RiskEngine,
    feed: Feed,
    store: Store,
    instruments: Vec<Instrument>,
    clock: Arc<dyn Clock>,
    shared: Arc<Shared>,
    tick_interval: std::time::Duration,
    tick_timeout: std::time::Duration,
}

async fn run_ticks<Feed, Store>(mut tick: TickLoop<Feed, Store>, mut shutdown: watch::Receiver<bool>)
where
    Feed: MetricsFeed,
    Store: StateStore,
{
    let mut timer = interval(tick.tick_interval);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = timer.tick() => {}
        }

        let now = tick.clock.now();
        let funding_since = tick.engine.funding_since(now);
        let fetch = tokio::time::timeout(
            tick.tick_timeout,
            fetch_all(&tick.feed, &tick.instruments, funding_since),
        );

        // Shutdown drops any in-flight fetch before the engine is touched.
        let fetched = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            fetched = fetch => fetched,
        };

        let Ok(fetched) = fetched else {
            warn!(error = %TickError::Timeout(tick.tick_timeout), "abandoning tick");
            continue;
        };

        let previous = tick.shared.map();
        match tick.engine.process_tick(fetched, &previous, now) {
            Ok(map) => {
                debug!(instruments = map.len(), %now, "publishing tick");
                tick.shared.publish_tick(map, now);
                if let Err(error) = tick.engine.persist(&tick.store).await {
                    warn!(%error, "failed to persist engine state");
                }
            }
            Err(error) => warn!(%error, "abandoning tick"),
        }
    }

    debug!("tick loop stopped");
}

async fn run_watchdog(
    watchdog: StalenessWatchdog,
    period: std::time::Duration,
    instruments: Vec<Instrument>,
    clock: Arc<dyn Clock>,
    shared: Arc<Shared>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut timer = interval(period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = timer.tick() => shared.check_stale(&watchdog, &instruments, clock.now()),
        }
    }

    debug!("staleness watchdog stopped");
}

/// Handle to a running [`RiskService`]. Dropping it stops the service.
#[derive(Debug)]
pub struct RiskServiceHandle {
    shared: Arc<Shared>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl RiskServiceHandle {
    /// Last published record of `instrument`.
    pub fn risk_state(&self, instrument: &Instrument) -> Option<RiskPerInstrument> {
        self.shared.map().get(instrument).cloned()
    }

    /// Last published map.
    pub fn snapshot(&self) -> Arc<RiskMap> {
        self.shared.map()
    }

    pub fn last_successful_tick(&self) -> Option<DateTime<Utc>> {
        self.shared.last_success()
    }

    /// Receiver observing every published map.
    pub fn subscribe(&self) -> watch::Receiver<Arc<RiskMap>> {
        self.shared.updates.subscribe()
    }

    /// Stream of maps published after this call.
    pub fn updates(&self) -> WatchStream<Arc<RiskMap>> {
        WatchStream::from_changes(self.subscribe())
    }

    /// Invoke `callback` with every map published after this call, until the returned
    /// [`Subscription`] is dropped.
    pub fn on_update<F>(&self, callback: F) -> Subscription
    where
        F: Fn(Arc<RiskMap>) + Send + 'static,
    {
        let mut updates = self.subscribe();
        updates.mark_unchanged();

        let task = tokio::spawn(async move {
            while updates.changed().await.is_ok() {
                let map = Arc::clone(&updates.borrow_and_update());
                callback(map);
            }
        });

        Subscription { task }
    }

    /// Stop both timers and wait for the tasks to finish.
    pub async fn stop(mut self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks.drain(..) {
            if let Err(error) = task.await {
                error!(%error, "risk-state task failed");
            }
        }
        info!("risk-state service stopped");
    }
}

impl Drop for RiskServiceHandle {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Active [`RiskServiceHandle::on_update`] callback. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}
