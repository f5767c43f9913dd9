use chrono::{DateTime, Duration, TimeZone, Utc};
use evalmon::records::BucketRecord;
use evalmon::{WindowTotals, sum_window};

fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, hour, minute, 0).unwrap()
}

fn record(start: DateTime<Utc>, granularity_minutes: u32, count: u64) -> BucketRecord {
    record_with_errors(start, granularity_minutes, count, 0)
}

fn record_with_errors(
    start: DateTime<Utc>,
    granularity_minutes: u32,
    count: u64,
    error_count: u64,
) -> BucketRecord {
    BucketRecord {
        scope_id: "acct-1".into(),
        record_type: "items".into(),
        range_start: start,
        range_end: start + Duration::minutes(granularity_minutes as i64),
        granularity_minutes,
        count,
        error_count,
        complete: true,
    }
}

#[test]
fn coarse_rollup_wins_over_finer_constituents() {
    // One hourly rollup covering 13:00-14:00 plus its four 15-minute
    // constituents. Summing both would double the true count.
    let records = vec![
        record(at(13, 0), 60, 100),
        record(at(13, 0), 15, 25),
        record(at(13, 15), 15, 25),
        record(at(13, 30), 15, 25),
        record(at(13, 45), 15, 25),
    ];

    let totals = sum_window(&records, at(13, 0), at(14, 0));

    assert_eq!(totals.count, 100, "only the hourly rollup may contribute");
}

#[test]
fn finer_records_sum_when_no_rollup_exists() {
    // 15-minute records with a gap at 13:15-13:30: the present records sum
    // and the gap contributes nothing, without erroring.
    let records = vec![
        record(at(13, 0), 15, 20),
        record(at(13, 30), 15, 15),
        record(at(13, 45), 15, 25),
    ];

    let totals = sum_window(&records, at(13, 0), at(14, 0));

    assert_eq!(totals.count, 60, "gaps are not invented, only summed around");
}

#[test]
fn non_aligned_window_sums_overlapping_finer_records() {
    // The query window starts at 13:15, off the hourly grid; only the
    // overlapping finer records count.
    let records = vec![
        record(at(13, 0), 15, 50),
        record(at(13, 15), 15, 30),
        record(at(13, 30), 15, 35),
        record(at(13, 45), 15, 40),
    ];

    let totals = sum_window(&records, at(13, 15), at(14, 0));

    assert_eq!(totals.count, 105);
}

#[test]
fn rolling_window_covers_partial_hour_from_finer_records() {
    // A complete hourly bucket plus a partially elapsed next hour covered
    // only by two 15-minute records, the second still accumulating.
    let mut open_bucket = record(at(14, 15), 15, 35);
    open_bucket.complete = false;

    let records = vec![
        record(at(13, 0), 60, 100),
        record(at(14, 0), 15, 30),
        open_bucket,
    ];

    let totals = sum_window(&records, at(13, 0), at(14, 30));

    assert_eq!(
        totals.count, 165,
        "hourly bucket plus the two available finer buckets, nothing invented"
    );
}

#[test]
fn partially_overlapping_coarse_bucket_contributes_once() {
    // The hourly bucket only half-overlaps the window; it still counts
    // once, and finer records outside its clamped interval add on top.
    let records = vec![record(at(13, 0), 60, 100), record(at(14, 0), 15, 30)];

    let totals = sum_window(&records, at(13, 30), at(14, 30));

    assert_eq!(totals.count, 130);
}

#[test]
fn select_is_idempotent() {
    let records = vec![
        record(at(13, 0), 60, 100),
        record(at(13, 0), 15, 25),
        record(at(14, 0), 15, 30),
    ];

    let first = sum_window(&records, at(13, 0), at(15, 0));
    let second = sum_window(&records, at(13, 0), at(15, 0));

    assert_eq!(first, second, "pure function, no hidden state");
}

#[test]
fn empty_input_yields_zero() {
    let totals = sum_window(&[], at(13, 0), at(14, 0));
    assert_eq!(totals, WindowTotals::default());
}

#[test]
fn non_overlapping_input_yields_zero() {
    let records = vec![record(at(10, 0), 60, 100)];
    let totals = sum_window(&records, at(13, 0), at(14, 0));
    assert_eq!(totals, WindowTotals::default());
}

#[test]
fn inverted_window_yields_zero() {
    let records = vec![record(at(13, 0), 60, 100)];
    let totals = sum_window(&records, at(14, 0), at(13, 0));
    assert_eq!(totals, WindowTotals::default());
}

#[test]
fn error_counts_accumulate_under_the_same_selection_rule() {
    let records = vec![
        record_with_errors(at(12, 0), 60, 200, 5),
        record_with_errors(at(13, 0), 60, 150, 3),
        // Finer duplicate of the 13:00 hour; must not add its errors.
        record_with_errors(at(13, 0), 15, 40, 2),
    ];

    let totals = sum_window(&records, at(12, 0), at(14, 0));

    assert_eq!(totals.count, 350);
    assert_eq!(totals.error_count, 8, "5 + 3, finer duplicate skipped");
}
