use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bucket granularities the counter store materializes, coarsest first.
/// Every coarser granularity is an integer multiple of every finer one, so
/// coarse buckets align with finer ones at shared boundaries.
pub const GRANULARITIES_MINUTES: &[u32] = &[60, 15, 5, 1];

/// One pre-aggregated counter bucket fetched from the remote store.
///
/// The interval is half-open: `[range_start, range_end)`. An incomplete
/// record is still accumulating; its `count` is a lower bound and is only
/// valid up to the instant it was fetched.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketRecord {
    pub scope_id: String,
    pub record_type: String,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub range_start: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub range_end: DateTime<Utc>,
    pub granularity_minutes: u32,
    pub count: u64,
    pub error_count: u64,
    pub complete: bool,
}

impl BucketRecord {
    /// True when the record's interval intersects the half-open window.
    pub fn overlaps(&self, window_start: DateTime<Utc>, window_end: DateTime<Utc>) -> bool {
        self.range_start < window_end && self.range_end > window_start
    }

    /// The coarse-beats-fine selection rule only holds for the known
    /// granularity set; anything else is dropped at the fetch boundary.
    pub fn has_supported_granularity(&self) -> bool {
        GRANULARITIES_MINUTES.contains(&self.granularity_minutes)
    }
}

/// Collapse duplicate records observed for the same
/// `(scope, record type, granularity, range start)` key.
///
/// A complete record beats an incomplete one; between records of equal
/// completeness the larger count wins, since a re-fetched open bucket only
/// ever grows.
pub fn dedupe_records(records: Vec<BucketRecord>) -> Vec<BucketRecord> {
    let mut by_key: HashMap<(String, String, u32, i64), BucketRecord> = HashMap::new();

    for record in records {
        let key = (
            record.scope_id.clone(),
            record.record_type.clone(),
            record.granularity_minutes,
            record.range_start.timestamp(),
        );
        let keep_existing = by_key
            .get(&key)
            .is_some_and(|existing| prefer_existing(existing, &record));
        if !keep_existing {
            by_key.insert(key, record);
        }
    }

    by_key.into_values().collect()
}

fn prefer_existing(existing: &BucketRecord, candidate: &BucketRecord) -> bool {
    if existing.complete != candidate.complete {
        return existing.complete;
    }
    existing.count >= candidate.count
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn record(count: u64, complete: bool) -> BucketRecord {
        let start = Utc.with_ymd_and_hms(2025, 3, 1, 13, 0, 0).unwrap();
        BucketRecord {
            scope_id: "acct-1".into(),
            record_type: "items".into(),
            range_start: start,
            range_end: start + Duration::minutes(60),
            granularity_minutes: 60,
            count,
            error_count: 0,
            complete,
        }
    }

    #[test]
    fn dedupe_prefers_complete_record() {
        let deduped = dedupe_records(vec![record(80, false), record(100, true)]);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].count, 100);
        assert!(deduped[0].complete);
    }

    #[test]
    fn dedupe_prefers_larger_count_among_incomplete() {
        let deduped = dedupe_records(vec![record(40, false), record(55, false)]);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].count, 55, "re-fetched open bucket only grows");
    }

    #[test]
    fn dedupe_keeps_distinct_range_starts() {
        let mut shifted = record(30, true);
        shifted.range_start += Duration::minutes(60);
        shifted.range_end += Duration::minutes(60);
        let deduped = dedupe_records(vec![record(100, true), shifted]);
        assert_eq!(deduped.len(), 2);
    }
}
