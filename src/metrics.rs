use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
    TextEncoder,
};

/// Metrics registry for the agent scraped by Prometheus.
#[derive(Clone)]
pub struct AppMetrics {
    registry: Arc<Registry>,
    fetch: FetchMetrics,
    cache: CacheMetrics,
}

impl AppMetrics {
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new_custom(Some("evalmon".into()), None)?);

        let fetch = FetchMetrics::register(&registry)?;
        let cache = CacheMetrics::register(&registry)?;

        Ok(Self {
            registry,
            fetch,
            cache,
        })
    }

    /// Observe the duration of one fetch cycle for a stream.
    pub fn observe_fetch_duration(&self, fingerprint: &str, duration: Duration) {
        self.fetch
            .cycle_duration
            .with_label_values(&[fingerprint])
            .observe(duration.as_secs_f64());
    }

    /// Record a success flag for a fetch cycle (1=success, 0=failed).
    pub fn record_fetch_success(&self, fingerprint: &str, success: bool) {
        self.fetch
            .last_success
            .with_label_values(&[fingerprint])
            .set(if success { 1 } else { 0 });
    }

    /// Increment the error counter for a stream's fetches.
    pub fn inc_fetch_error(&self, fingerprint: &str) {
        self.fetch
            .errors_total
            .with_label_values(&[fingerprint])
            .inc();
    }

    /// Count a background refresh failure whose prior snapshot kept serving.
    pub fn inc_stale_served(&self, fingerprint: &str) {
        self.cache
            .stale_served_total
            .with_label_values(&[fingerprint])
            .inc();
    }

    /// Count a fetch range clipped to the lookback cap.
    pub fn inc_range_truncated(&self, fingerprint: &str) {
        self.fetch
            .range_truncated_total
            .with_label_values(&[fingerprint])
            .inc();
    }

    /// Track how many cache entries and refresh timers are live.
    pub fn set_cache_sizes(&self, entries: usize, timers: usize) {
        self.cache.entries.set(entries as i64);
        self.cache.refresh_timers.set(timers as i64);
    }

    /// Render the registry in the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

#[derive(Clone)]
struct FetchMetrics {
    cycle_duration: HistogramVec,
    last_success: IntGaugeVec,
    errors_total: IntCounterVec,
    range_truncated_total: IntCounterVec,
}

impl FetchMetrics {
    fn register(registry: &Registry) -> Result<Self> {
        let cycle_duration = HistogramVec::new(
            HistogramOpts::new(
                "fetch_cycle_duration_seconds",
                "Duration of one counter store fetch-and-aggregate cycle",
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
            &["stream"],
        )?;
        registry.register(Box::new(cycle_duration.clone()))?;

        let last_success = IntGaugeVec::new(
            Opts::new(
                "fetch_last_success",
                "Whether the last fetch cycle for a stream succeeded",
            ),
            &["stream"],
        )?;
        registry.register(Box::new(last_success.clone()))?;

        let errors_total = IntCounterVec::new(
            Opts::new("fetch_errors_total", "Failed fetch cycles per stream"),
            &["stream"],
        )?;
        registry.register(Box::new(errors_total.clone()))?;

        let range_truncated_total = IntCounterVec::new(
            Opts::new(
                "fetch_range_truncated_total",
                "Fetch ranges clipped to the lookback cap",
            ),
            &["stream"],
        )?;
        registry.register(Box::new(range_truncated_total.clone()))?;

        Ok(Self {
            cycle_duration,
            last_success,
            errors_total,
            range_truncated_total,
        })
    }
}

#[derive(Clone)]
struct CacheMetrics {
    entries: IntGauge,
    refresh_timers: IntGauge,
    stale_served_total: IntCounterVec,
}

impl CacheMetrics {
    fn register(registry: &Registry) -> Result<Self> {
        let entries = IntGauge::new("cache_entries", "Cached stream snapshots")?;
        registry.register(Box::new(entries.clone()))?;

        let refresh_timers = IntGauge::new("cache_refresh_timers", "Live background refresh timers")?;
        registry.register(Box::new(refresh_timers.clone()))?;

        let stale_served_total = IntCounterVec::new(
            Opts::new(
                "cache_stale_served_total",
                "Background refresh failures absorbed by the prior snapshot",
            ),
            &["stream"],
        )?;
        registry.register(Box::new(stale_served_total.clone()))?;

        Ok(Self {
            entries,
            refresh_timers,
            stale_served_total,
        })
    }
}
