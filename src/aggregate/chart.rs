use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::aggregate::select::sum_window;
use crate::records::BucketRecord;

/// Chart period presets. Each fixes the sub-bucket duration and count, and
/// thereby the display span.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartPeriod {
    /// Twelve 5-minute buckets.
    Hour,
    /// Twenty-four 1-hour buckets.
    #[default]
    Day,
    /// Twenty-eight 6-hour buckets.
    Week,
}

impl ChartPeriod {
    pub const fn bucket_minutes(self) -> i64 {
        match self {
            ChartPeriod::Hour => 5,
            ChartPeriod::Day => 60,
            ChartPeriod::Week => 360,
        }
    }

    pub const fn bucket_count(self) -> usize {
        match self {
            ChartPeriod::Hour => 12,
            ChartPeriod::Day => 24,
            ChartPeriod::Week => 28,
        }
    }

    /// Total duration covered by the period's chart.
    pub fn span(self) -> Duration {
        Duration::minutes(self.bucket_minutes() * self.bucket_count() as i64)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            ChartPeriod::Hour => "hour",
            ChartPeriod::Day => "day",
            ChartPeriod::Week => "week",
        }
    }

    fn label_format(self) -> &'static str {
        match self {
            ChartPeriod::Hour | ChartPeriod::Day => "%H:%M",
            ChartPeriod::Week => "%a %H:%M",
        }
    }
}

/// One plotted bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartPoint {
    pub label: String,
    pub value: u64,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub bucket_start: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub bucket_end: DateTime<Utc>,
}

/// Partition `[display_end - span, display_end)` into the period's equal,
/// contiguous sub-windows and sum each independently.
///
/// The last bucket ends exactly at `display_end`. The series carries no
/// state between refreshes; it is rebuilt from scratch every cycle.
pub fn build_chart_series(
    records: &[BucketRecord],
    display_end: DateTime<Utc>,
    period: ChartPeriod,
) -> Vec<ChartPoint> {
    let bucket = Duration::minutes(period.bucket_minutes());
    let count = period.bucket_count();

    let mut points = Vec::with_capacity(count);
    for index in 0..count {
        let bucket_end = display_end - bucket * ((count - 1 - index) as i32);
        let bucket_start = bucket_end - bucket;
        let totals = sum_window(records, bucket_start, bucket_end);
        points.push(ChartPoint {
            label: bucket_start.format(period.label_format()).to_string(),
            value: totals.count,
            bucket_start,
            bucket_end,
        });
    }

    points
}
