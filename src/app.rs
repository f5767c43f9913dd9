use std::sync::Arc;

use crate::cache::MetricsCache;
use crate::config::AppConfig;
use crate::metrics::AppMetrics;

/// Shared application context passed to HTTP handlers.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub metrics: AppMetrics,
    pub cache: MetricsCache,
}

impl AppContext {
    pub fn new(config: AppConfig, metrics: AppMetrics, cache: MetricsCache) -> Self {
        Self {
            config: Arc::new(config),
            metrics,
            cache,
        }
    }
}
