use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::aggregate::plan::plan_fetch_range;
use crate::aggregate::snapshot::{build_snapshot, MetricsSnapshot, StreamConfig};
use crate::clock::Clock;
use crate::config::AppConfig;
use crate::metrics::AppMetrics;
use crate::records::{dedupe_records, BucketRecord};
use crate::store::RecordStore;

/// Consumer-visible state of one metrics stream.
#[derive(Debug, Clone)]
pub enum StreamState {
    /// First fetch still in flight; no usable snapshot yet.
    Loading,
    /// Last-known-good snapshot. `refreshing` marks a background fetch in
    /// flight; it never re-enters a loading state once data exists.
    Ready {
        snapshot: Arc<MetricsSnapshot>,
        refreshing: bool,
    },
    /// The first fetch failed before any snapshot was produced.
    Failed { error: String },
}

struct StreamEntry {
    config: StreamConfig,
    state: StreamState,
    consumers: usize,
    in_flight: bool,
    next_seq: u64,
    applied_seq: u64,
    last_success_at: Option<DateTime<Utc>>,
    consecutive_failures: u32,
}

impl StreamEntry {
    fn new(config: StreamConfig) -> Self {
        Self {
            config,
            state: StreamState::Loading,
            consumers: 0,
            in_flight: false,
            next_seq: 0,
            applied_seq: 0,
            last_success_at: None,
            consecutive_failures: 0,
        }
    }
}

struct CacheInner {
    entries: RwLock<HashMap<String, StreamEntry>>,
    timers: RwLock<HashMap<String, JoinHandle<()>>>,
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
    metrics: AppMetrics,
    refresh_interval: Duration,
    rolling_window: chrono::Duration,
    max_lookback: chrono::Duration,
}

/// Snapshot cache and refresh coordinator, keyed by stream fingerprint.
///
/// Explicitly constructed and torn down; there is no process-global state.
/// All mutation of a fingerprint's entry funnels through this handle, and
/// each fetch completion carries a sequence number so a slow stale fetch
/// can never overwrite a newer result.
#[derive(Clone)]
pub struct MetricsCache {
    inner: Arc<CacheInner>,
}

impl MetricsCache {
    pub fn new(
        store: Arc<dyn RecordStore>,
        clock: Arc<dyn Clock>,
        metrics: AppMetrics,
        config: &AppConfig,
    ) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                entries: RwLock::new(HashMap::new()),
                timers: RwLock::new(HashMap::new()),
                store,
                clock,
                metrics,
                refresh_interval: config.refresh.interval,
                rolling_window: config.windows.rolling_chrono(),
                max_lookback: config.limits.max_lookback(),
            }),
        }
    }

    /// Register a consumer for a stream and return its current state.
    ///
    /// A cached snapshot is served synchronously, with no loading indicator
    /// on remount. The first consumer of a fingerprint starts its refresh
    /// timer; further consumers share it.
    pub async fn attach(&self, config: &StreamConfig) -> StreamState {
        let fingerprint = config.fingerprint();

        let state = {
            let mut entries = self.inner.entries.write().await;
            let entry = entries
                .entry(fingerprint.clone())
                .or_insert_with(|| StreamEntry::new(config.clone()));
            entry.consumers += 1;
            entry.state.clone()
        };

        {
            let mut timers = self.inner.timers.write().await;
            timers
                .entry(fingerprint.clone())
                .or_insert_with(|| spawn_refresh_timer(self.inner.clone(), fingerprint));
        }

        self.publish_sizes().await;
        state
    }

    /// Deregister a consumer. When the last one detaches the refresh timer
    /// stops; the cache entry is retained so a future remount gets instant
    /// data.
    pub async fn detach(&self, fingerprint: &str) {
        let idle = {
            let mut entries = self.inner.entries.write().await;
            match entries.get_mut(fingerprint) {
                Some(entry) => {
                    entry.consumers = entry.consumers.saturating_sub(1);
                    entry.consumers == 0
                }
                None => false,
            }
        };

        if idle {
            let mut timers = self.inner.timers.write().await;
            if let Some(handle) = timers.remove(fingerprint) {
                handle.abort();
                info!(stream = %fingerprint, "stopped refresh timer; no consumers left");
            }
        }

        self.publish_sizes().await;
    }

    /// Current state of a stream, if it has ever been attached or restored.
    pub async fn get(&self, fingerprint: &str) -> Option<StreamState> {
        self.inner
            .entries
            .read()
            .await
            .get(fingerprint)
            .map(|entry| entry.state.clone())
    }

    /// Explicit cache-bypassing refresh, outside the timer cadence.
    pub async fn refetch(&self, config: &StreamConfig) {
        let fingerprint = config.fingerprint();
        {
            let mut entries = self.inner.entries.write().await;
            entries
                .entry(fingerprint.clone())
                .or_insert_with(|| StreamEntry::new(config.clone()));
        }
        let inner = self.inner.clone();
        tokio::spawn(async move {
            fetch_cycle(&inner, &fingerprint).await;
        });
    }

    /// Out-of-band change notification from the counter store. The only
    /// contractual response is a re-fetch of the streams the change could
    /// affect; when nothing ever notifies, the cache is a pure poller.
    pub async fn notify_change(&self, scope_id: &str, record_type: &str) {
        let matching: Vec<String> = {
            let entries = self.inner.entries.read().await;
            entries
                .iter()
                .filter(|(_, entry)| {
                    entry.config.scope_id == scope_id
                        && entry
                            .config
                            .record_types
                            .iter()
                            .any(|known| known == record_type)
                })
                .map(|(fingerprint, _)| fingerprint.clone())
                .collect()
        };

        for fingerprint in matching {
            debug!(stream = %fingerprint, "change notice; scheduling re-fetch");
            let inner = self.inner.clone();
            tokio::spawn(async move {
                fetch_cycle(&inner, &fingerprint).await;
            });
        }
    }

    /// Evict a stream entirely (configuration change).
    pub async fn invalidate(&self, fingerprint: &str) {
        self.inner.entries.write().await.remove(fingerprint);
        if let Some(handle) = self.inner.timers.write().await.remove(fingerprint) {
            handle.abort();
        }
        self.publish_sizes().await;
    }

    /// Seed an entry from persisted state. Live entries are never
    /// overwritten; restored data is by definition older.
    pub async fn restore(&self, config: StreamConfig, snapshot: MetricsSnapshot) {
        let fingerprint = config.fingerprint();
        let mut entries = self.inner.entries.write().await;
        entries.entry(fingerprint).or_insert_with(|| {
            let mut entry = StreamEntry::new(config);
            entry.state = StreamState::Ready {
                snapshot: Arc::new(snapshot),
                refreshing: false,
            };
            entry
        });
    }

    /// All streams currently holding a usable snapshot.
    pub async fn ready_snapshots(&self) -> Vec<(StreamConfig, Arc<MetricsSnapshot>)> {
        self.inner
            .entries
            .read()
            .await
            .values()
            .filter_map(|entry| match &entry.state {
                StreamState::Ready { snapshot, .. } => {
                    Some((entry.config.clone(), snapshot.clone()))
                }
                _ => None,
            })
            .collect()
    }

    /// Readiness: every stream with live consumers refreshed successfully
    /// within `max_staleness`. An idle cache is ready.
    pub async fn is_ready(&self, max_staleness: Duration) -> bool {
        let staleness = chrono::Duration::from_std(max_staleness)
            .unwrap_or_else(|_| chrono::Duration::seconds(300));
        let now = self.inner.clock.now();

        let entries = self.inner.entries.read().await;
        entries
            .values()
            .filter(|entry| entry.consumers > 0)
            .all(|entry| {
                if entry.consecutive_failures > 0 {
                    return false;
                }
                match entry.last_success_at {
                    Some(last) => now.signed_duration_since(last) <= staleness,
                    None => false,
                }
            })
    }

    pub async fn entry_count(&self) -> usize {
        self.inner.entries.read().await.len()
    }

    pub async fn timer_count(&self) -> usize {
        self.inner.timers.read().await.len()
    }

    /// Abort every refresh timer. Entries are dropped with the cache.
    pub async fn shutdown(&self) {
        let mut timers = self.inner.timers.write().await;
        for (fingerprint, handle) in timers.drain() {
            debug!(stream = %fingerprint, "aborting refresh timer");
            handle.abort();
        }
        info!("metrics cache shut down");
    }

    async fn publish_sizes(&self) {
        let entries = self.inner.entries.read().await.len();
        let timers = self.inner.timers.read().await.len();
        self.inner.metrics.set_cache_sizes(entries, timers);
    }
}

fn spawn_refresh_timer(inner: Arc<CacheInner>, fingerprint: String) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            stream = %fingerprint,
            interval = ?inner.refresh_interval,
            "starting refresh timer"
        );

        // tokio::time::interval() completes the first tick immediately, so
        // a freshly attached stream gets its initial fetch without waiting
        // a full refresh period.
        let mut ticker = time::interval(inner.refresh_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            fetch_cycle(&inner, &fingerprint).await;
        }
    })
}

/// Run one fetch-and-aggregate cycle for a stream and publish the result.
///
/// At most one cycle runs per stream at a time; a cycle arriving while
/// another is in flight coalesces into it. Completions are applied in
/// sequence order, so a stale cycle that somehow finishes late is
/// discarded instead of overwriting fresher data.
#[instrument(skip_all, fields(stream = %fingerprint))]
async fn fetch_cycle(inner: &Arc<CacheInner>, fingerprint: &str) {
    let (config, seq) = {
        let mut entries = inner.entries.write().await;
        let Some(entry) = entries.get_mut(fingerprint) else {
            return;
        };
        if entry.in_flight {
            debug!("fetch already in flight; coalescing");
            return;
        }
        entry.in_flight = true;
        let seq = entry.next_seq;
        entry.next_seq += 1;

        entry.state = match entry.state.clone() {
            StreamState::Ready { snapshot, .. } => StreamState::Ready {
                snapshot,
                refreshing: true,
            },
            // A failed entry retries as a fresh load; only a fetch with no
            // prior snapshot may surface an error state, and this is one.
            StreamState::Loading | StreamState::Failed { .. } => StreamState::Loading,
        };

        (entry.config.clone(), seq)
    };

    let started = Instant::now();
    let result = run_fetch(inner, &config, fingerprint).await;
    let elapsed = started.elapsed();

    let mut entries = inner.entries.write().await;
    let Some(entry) = entries.get_mut(fingerprint) else {
        return;
    };
    entry.in_flight = false;

    if seq < entry.applied_seq {
        debug!(
            seq,
            applied = entry.applied_seq,
            "discarding out-of-order fetch completion"
        );
        return;
    }
    entry.applied_seq = seq;

    match result {
        Ok(snapshot) => {
            inner.metrics.observe_fetch_duration(fingerprint, elapsed);
            inner.metrics.record_fetch_success(fingerprint, true);
            entry.last_success_at = Some(snapshot.generated_at);
            entry.consecutive_failures = 0;
            entry.state = StreamState::Ready {
                snapshot: Arc::new(snapshot),
                refreshing: false,
            };
        }
        Err(err) => {
            inner.metrics.record_fetch_success(fingerprint, false);
            inner.metrics.inc_fetch_error(fingerprint);
            entry.consecutive_failures = entry.consecutive_failures.saturating_add(1);

            match entry.state.clone() {
                StreamState::Ready { snapshot, .. } => {
                    warn!(error = ?err, "background refresh failed; serving prior snapshot");
                    inner.metrics.inc_stale_served(fingerprint);
                    entry.state = StreamState::Ready {
                        snapshot,
                        refreshing: false,
                    };
                }
                StreamState::Loading | StreamState::Failed { .. } => {
                    entry.state = StreamState::Failed {
                        error: err.to_string(),
                    };
                }
            }
        }
    }
}

async fn run_fetch(
    inner: &Arc<CacheInner>,
    config: &StreamConfig,
    fingerprint: &str,
) -> Result<MetricsSnapshot> {
    let anchor_end = inner.clock.now();
    let display_start = anchor_end - config.period.span();
    let plan = plan_fetch_range(display_start, anchor_end, anchor_end, inner.max_lookback);
    if plan.truncated {
        warn!(query_start = %plan.query_start, "fetch range truncated to lookback cap");
        inner.metrics.inc_range_truncated(fingerprint);
    }

    let mut records_by_type: HashMap<String, Vec<BucketRecord>> = HashMap::new();
    for record_type in &config.record_types {
        let fetched = inner
            .store
            .fetch_bucket_records(
                &config.scope_id,
                record_type,
                plan.query_start,
                plan.query_end,
            )
            .await?;
        let (supported, unknown): (Vec<_>, Vec<_>) = fetched
            .into_iter()
            .partition(BucketRecord::has_supported_granularity);
        if !unknown.is_empty() {
            warn!(
                record_type = %record_type,
                dropped = unknown.len(),
                "dropping records with unsupported granularity"
            );
        }
        records_by_type.insert(record_type.clone(), dedupe_records(supported));
    }

    Ok(build_snapshot(
        config,
        &records_by_type,
        anchor_end,
        inner.rolling_window,
    ))
}
