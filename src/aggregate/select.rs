use chrono::{DateTime, Utc};

use crate::records::BucketRecord;

/// Summed counter totals for one query window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowTotals {
    pub count: u64,
    pub error_count: u64,
}

/// Sum counter buckets over `[window_start, window_end)` without double
/// counting overlapping granularities.
///
/// Candidates are considered coarse-first (granularity descending, start
/// ascending as the tie-break) and a bucket is accepted only if its
/// interval, clamped to the window, does not touch any interval already
/// accepted. When a 60-minute rollup and its four 15-minute constituents
/// are all present for the same hour, only the hourly rollup contributes.
///
/// A bucket that only partially overlaps the window contributes its full
/// stored count; sub-bucket distribution is unknown, so callers needing
/// exact figures should query windows aligned to available granularities.
///
/// Empty or entirely non-overlapping input degrades to `(0, 0)`.
pub fn sum_window(
    records: &[BucketRecord],
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> WindowTotals {
    if window_end <= window_start {
        return WindowTotals::default();
    }

    let mut candidates: Vec<&BucketRecord> = records
        .iter()
        .filter(|record| record.overlaps(window_start, window_end))
        .collect();
    candidates.sort_by(|a, b| {
        b.granularity_minutes
            .cmp(&a.granularity_minutes)
            .then_with(|| a.range_start.cmp(&b.range_start))
    });

    let mut covered: Vec<(DateTime<Utc>, DateTime<Utc>)> = Vec::new();
    let mut totals = WindowTotals::default();

    for record in candidates {
        let clamped_start = record.range_start.max(window_start);
        let clamped_end = record.range_end.min(window_end);
        if clamped_end <= clamped_start {
            continue;
        }

        let redundant = covered
            .iter()
            .any(|(start, end)| clamped_start < *end && clamped_end > *start);
        if redundant {
            continue;
        }

        covered.push((clamped_start, clamped_end));
        totals.count += record.count;
        totals.error_count += record.error_count;
    }

    totals
}
