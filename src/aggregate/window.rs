use chrono::{DateTime, Duration, Utc};

use crate::aggregate::select::{sum_window, WindowTotals};
use crate::records::BucketRecord;

/// The long anchor window backing daily totals and gauge baselines.
pub const DAILY_WINDOW_HOURS: i64 = 24;

/// Gauge figures derived from one fetched record set.
///
/// Both windows anchor to the same caller-supplied instant, so these
/// figures do not shift when the user changes the displayed chart period.
#[derive(Debug, Clone, Copy, Default)]
pub struct GaugeWindows {
    /// Totals for the short rolling window ending at the anchor.
    pub rolling: WindowTotals,
    /// Totals for the 24 hours ending at the anchor.
    pub daily: WindowTotals,
    /// Daily count spread per hour, rounded to the nearest integer.
    pub average_per_hour: u64,
    /// Largest single-hour count inside the 24-hour window.
    pub peak_hourly: u64,
    /// Largest single-hour error count inside the 24-hour window.
    pub peak_hourly_errors: u64,
}

/// Compute rolling/daily totals and gauge baselines from one record set.
///
/// The peaks are always taken over the 24-hour window partitioned into
/// hourly sub-windows, independent of any chart period, which keeps gauge
/// scales stable while the user flips between chart views.
pub fn compute_gauge_windows(
    records: &[BucketRecord],
    anchor_end: DateTime<Utc>,
    rolling_window: Duration,
) -> GaugeWindows {
    let daily_start = anchor_end - Duration::hours(DAILY_WINDOW_HOURS);

    let rolling = sum_window(records, anchor_end - rolling_window, anchor_end);
    let daily = sum_window(records, daily_start, anchor_end);

    let average_per_hour = (daily.count as f64 / DAILY_WINDOW_HOURS as f64).round() as u64;

    let mut peak_hourly = 0u64;
    let mut peak_hourly_errors = 0u64;
    for hour in 0..DAILY_WINDOW_HOURS {
        let start = daily_start + Duration::hours(hour);
        let totals = sum_window(records, start, start + Duration::hours(1));
        peak_hourly = peak_hourly.max(totals.count);
        peak_hourly_errors = peak_hourly_errors.max(totals.error_count);
    }

    GaugeWindows {
        rolling,
        daily,
        average_per_hour,
        peak_hourly,
        peak_hourly_errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn hourly_record(hours_before_anchor: i64, count: u64, error_count: u64) -> BucketRecord {
        let anchor = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let start = anchor - Duration::hours(hours_before_anchor);
        BucketRecord {
            scope_id: "acct-1".into(),
            record_type: "items".into(),
            range_start: start,
            range_end: start + Duration::hours(1),
            granularity_minutes: 60,
            count,
            error_count,
            complete: true,
        }
    }

    #[test]
    fn windows_share_one_anchor() {
        let anchor = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let records = vec![
            hourly_record(1, 120, 3),
            hourly_record(2, 80, 1),
            hourly_record(20, 40, 0),
        ];

        let windows = compute_gauge_windows(&records, anchor, Duration::minutes(60));

        assert_eq!(windows.rolling.count, 120, "only the last hour rolls");
        assert_eq!(windows.rolling.error_count, 3);
        assert_eq!(windows.daily.count, 240, "all three hours fall in 24h");
        assert_eq!(windows.daily.error_count, 4);
        assert_eq!(windows.peak_hourly, 120);
        assert_eq!(windows.peak_hourly_errors, 3);
        assert_eq!(windows.average_per_hour, 10, "240 / 24 hours");
    }

    #[test]
    fn average_rounds_to_nearest() {
        let anchor = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let records = vec![hourly_record(1, 100, 0)];

        let windows = compute_gauge_windows(&records, anchor, Duration::minutes(60));

        // 100 / 24 = 4.1666... rounds down to 4
        assert_eq!(windows.average_per_hour, 4);
    }

    #[test]
    fn empty_records_yield_zero_baselines() {
        let anchor = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let windows = compute_gauge_windows(&[], anchor, Duration::minutes(60));
        assert_eq!(windows.daily, WindowTotals::default());
        assert_eq!(windows.peak_hourly, 0);
        assert_eq!(windows.average_per_hour, 0);
    }
}
