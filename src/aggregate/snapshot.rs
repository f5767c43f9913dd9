use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::aggregate::chart::{build_chart_series, ChartPeriod, ChartPoint};
use crate::aggregate::window::compute_gauge_windows;
use crate::records::BucketRecord;

/// Describes one metrics stream a dashboard consumer watches: whose
/// counters, which families, and at which chart period.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamConfig {
    pub scope_id: String,
    pub record_types: Vec<String>,
    pub period: ChartPeriod,
}

impl StreamConfig {
    /// Cache key identifying this stream. Two consumers asking for the same
    /// scope, families, and period share one cache entry and one refresh
    /// timer.
    pub fn fingerprint(&self) -> String {
        format!(
            "{}|{}|{}",
            self.scope_id,
            self.record_types.join(","),
            self.period.as_str()
        )
    }
}

/// Aggregated figures for one counter family.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FamilySnapshot {
    pub record_type: String,
    pub rolling_count: u64,
    pub rolling_error_count: u64,
    pub daily_count: u64,
    pub daily_error_count: u64,
    pub average_per_hour: u64,
    pub peak_hourly: u64,
    pub peak_hourly_errors: u64,
    pub chart: Vec<ChartPoint>,
}

/// One fetch cycle's complete output, handed to presentation layers.
///
/// Immutable once built; the coordinator replaces the previous snapshot
/// atomically so consumers never observe a half-updated one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub scope_id: String,
    pub period: ChartPeriod,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub generated_at: DateTime<Utc>,
    pub families: Vec<FamilySnapshot>,
}

/// Assemble a snapshot from the records fetched in one cycle.
///
/// Every window (rolling, daily, and each chart bucket) anchors to
/// `anchor_end`, so gauge figures stay consistent with each other and with
/// the chart regardless of the selected period.
pub fn build_snapshot(
    config: &StreamConfig,
    records_by_type: &HashMap<String, Vec<BucketRecord>>,
    anchor_end: DateTime<Utc>,
    rolling_window: Duration,
) -> MetricsSnapshot {
    static EMPTY: Vec<BucketRecord> = Vec::new();

    let families = config
        .record_types
        .iter()
        .map(|record_type| {
            let records = records_by_type.get(record_type).unwrap_or(&EMPTY);
            let windows = compute_gauge_windows(records, anchor_end, rolling_window);
            FamilySnapshot {
                record_type: record_type.clone(),
                rolling_count: windows.rolling.count,
                rolling_error_count: windows.rolling.error_count,
                daily_count: windows.daily.count,
                daily_error_count: windows.daily.error_count,
                average_per_hour: windows.average_per_hour,
                peak_hourly: windows.peak_hourly,
                peak_hourly_errors: windows.peak_hourly_errors,
                chart: build_chart_series(records, anchor_end, config.period),
            }
        })
        .collect();

    MetricsSnapshot {
        scope_id: config.scope_id.clone(),
        period: config.period,
        generated_at: anchor_end,
        families,
    }
}
