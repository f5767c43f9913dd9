use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::aggregate::snapshot::{MetricsSnapshot, StreamConfig};
use crate::cache::MetricsCache;

#[derive(Debug, Serialize, Deserialize)]
struct PersistedState {
    streams: Vec<PersistedStream>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedStream {
    config: StreamConfig,
    snapshot: MetricsSnapshot,
}

pub struct PersistenceConfig {
    pub data_dir: PathBuf,
    pub flush_interval: Duration,
}

impl PersistenceConfig {
    pub fn from_env() -> Option<Self> {
        let dir = std::env::var("EVALMON_DATA_DIR").ok()?;
        let interval = std::env::var("EVALMON_FLUSH_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(60);
        Some(Self {
            data_dir: PathBuf::from(dir),
            flush_interval: Duration::from_secs(interval),
        })
    }
}

/// Load persisted last-known-good snapshots, so a dashboard reattaching
/// right after a restart is served instantly instead of seeing a loading
/// state.
pub async fn load_if_exists(cfg: &PersistenceConfig, cache: &MetricsCache) {
    let path = state_file_path(&cfg.data_dir);
    match tokio::fs::read(&path).await {
        Ok(bytes) => match serde_json::from_slice::<PersistedState>(&bytes) {
            Ok(persisted) => {
                let count = persisted.streams.len();
                for stream in persisted.streams {
                    cache.restore(stream.config, stream.snapshot).await;
                }
                info!(file=?path, streams=count, "loaded persisted snapshots");
            }
            Err(err) => {
                warn!(error=?err, file=?path, "failed to parse persisted snapshot JSON");
            }
        },
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            info!(file=?path, "no persisted snapshots found (first run?)");
        }
        Err(err) => {
            warn!(error=?err, file=?path, "failed reading persisted snapshots");
        }
    }
}

pub fn spawn_flush_loop(cfg: PersistenceConfig, cache: MetricsCache) -> tokio::task::JoinHandle<()> {
    info!(dir=?cfg.data_dir, interval=?cfg.flush_interval, "starting snapshot flush loop");
    tokio::spawn(async move {
        loop {
            if let Err(err) = flush_once(&cfg, &cache).await {
                error!(error=?err, "snapshot flush failed");
            }
            sleep(cfg.flush_interval).await;
        }
    })
}

pub async fn flush_once(cfg: &PersistenceConfig, cache: &MetricsCache) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(&cfg.data_dir).await?;
    let path = state_file_path(&cfg.data_dir);

    let streams = cache
        .ready_snapshots()
        .await
        .into_iter()
        .map(|(config, snapshot)| PersistedStream {
            config,
            snapshot: (*snapshot).clone(),
        })
        .collect();
    let persisted = PersistedState { streams };

    let json = serde_json::to_vec_pretty(&persisted)?;
    // Atomic write: write to tmp then rename.
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, &json).await?;
    tokio::fs::rename(&tmp, &path).await?;
    info!(file=?path, size=json.len(), "flushed persisted snapshots");
    Ok(())
}

fn state_file_path(dir: &Path) -> PathBuf {
    dir.join("snapshots.json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::chart::ChartPeriod;
    use crate::aggregate::snapshot::build_snapshot;
    use crate::clock::FixedClock;
    use crate::config::AppConfig;
    use crate::metrics::AppMetrics;
    use crate::store::RecordStore;
    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::runtime::Runtime;

    struct EmptyStore;

    #[async_trait]
    impl RecordStore for EmptyStore {
        async fn fetch_bucket_records(
            &self,
            _scope_id: &str,
            _record_type: &str,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> Result<Vec<crate::records::BucketRecord>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn flush_and_load_round_trip() {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let now = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
            let config = AppConfig::default();
            let cache = MetricsCache::new(
                Arc::new(EmptyStore),
                Arc::new(FixedClock(now)),
                AppMetrics::new().unwrap(),
                &config,
            );

            let stream = StreamConfig {
                scope_id: "acct-1".into(),
                record_types: vec!["items".into()],
                period: ChartPeriod::Day,
            };
            let snapshot =
                build_snapshot(&stream, &HashMap::new(), now, chrono::Duration::minutes(60));
            cache.restore(stream.clone(), snapshot).await;

            let dir = tempfile::tempdir().expect("tempdir");
            let cfg = PersistenceConfig {
                data_dir: dir.path().to_path_buf(),
                flush_interval: Duration::from_secs(1),
            };
            flush_once(&cfg, &cache).await.expect("flush ok");

            // A fresh cache instance loads the flushed snapshot back.
            let new_cache = MetricsCache::new(
                Arc::new(EmptyStore),
                Arc::new(FixedClock(now)),
                AppMetrics::new().unwrap(),
                &config,
            );
            load_if_exists(&cfg, &new_cache).await;

            let restored = new_cache.ready_snapshots().await;
            assert_eq!(restored.len(), 1);
            assert_eq!(restored[0].0.fingerprint(), stream.fingerprint());
            assert_eq!(restored[0].1.generated_at, now);
        });
    }
}
