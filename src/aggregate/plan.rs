use chrono::{DateTime, Duration, Utc};

use crate::aggregate::window::DAILY_WINDOW_HOURS;

/// The raw-record range to request from the counter store for one fetch
/// cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchPlan {
    pub query_start: DateTime<Utc>,
    pub query_end: DateTime<Utc>,
    /// Set when the lookback cap clipped the natural range; the fetch then
    /// yields a partial but recent result rather than failing.
    pub truncated: bool,
}

/// Choose the single range covering both the display range and the 24-hour
/// anchor window ending at `anchor_end`.
///
/// `max_lookback` bounds the range so that the densest supported
/// granularity times the lookback stays under the store's per-query result
/// cap. When the natural combined range is wider, the oldest part is
/// dropped: rolling-window and gauge figures need the most recent data
/// most, so recency wins over completeness.
pub fn plan_fetch_range(
    display_start: DateTime<Utc>,
    display_end: DateTime<Utc>,
    anchor_end: DateTime<Utc>,
    max_lookback: Duration,
) -> FetchPlan {
    let anchor_start = anchor_end - Duration::hours(DAILY_WINDOW_HOURS);
    let natural_start = display_start.min(anchor_start);
    let floor = display_end - max_lookback;

    let truncated = natural_start < floor;
    FetchPlan {
        query_start: if truncated { floor } else { natural_start },
        query_end: display_end,
        truncated,
    }
}
