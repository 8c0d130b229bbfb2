//! Calendar-aligned time buckets.
//!
//! Five-minute and hourly buckets have a fixed duration: they are aligned to
//! the local clock of the configured zone but always span exactly 5 or 60
//! minutes of real time. Daily buckets start at local midnight, so they last
//! 23 or 25 hours across daylight-saving transitions.

use chrono::{DateTime, Duration, LocalResult, NaiveDateTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Bucket granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    FiveMinutes,
    Hourly,
    Daily,
}

/// Aligns instants to bucket starts in a fixed timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketCalendar {
    tz: Tz,
}

impl Default for BucketCalendar {
    fn default() -> Self {
        Self::utc()
    }
}

impl BucketCalendar {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    pub fn utc() -> Self {
        Self { tz: Tz::UTC }
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// Start of the bucket containing `instant`.
    pub fn align(&self, instant: DateTime<Utc>, granularity: Granularity) -> DateTime<Utc> {
        let local = instant.with_timezone(&self.tz).naive_local();
        match granularity {
            Granularity::FiveMinutes => {
                let truncated = local
                    .with_minute(local.minute() - local.minute() % 5)
                    .and_then(|t| t.with_second(0))
                    .and_then(|t| t.with_nanosecond(0))
                    .unwrap_or(local);
                instant - (local - truncated)
            }
            Granularity::Hourly => {
                let truncated = local
                    .with_minute(0)
                    .and_then(|t| t.with_second(0))
                    .and_then(|t| t.with_nanosecond(0))
                    .unwrap_or(local);
                instant - (local - truncated)
            }
            Granularity::Daily => {
                let midnight = local.date().and_hms_opt(0, 0, 0).unwrap_or(local);
                self.resolve_local(midnight)
            }
        }
    }

    /// Start of the bucket following the one that starts at `bucket_start`.
    pub fn advance(&self, bucket_start: DateTime<Utc>, granularity: Granularity) -> DateTime<Utc> {
        match granularity {
            Granularity::FiveMinutes => bucket_start + Duration::minutes(5),
            Granularity::Hourly => bucket_start + Duration::hours(1),
            Granularity::Daily => {
                let local = bucket_start.with_timezone(&self.tz).naive_local();
                let next = local
                    .date()
                    .succ_opt()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
                    .unwrap_or(local + Duration::days(1));
                self.resolve_local(next)
            }
        }
    }

    /// Every bucket start from the bucket containing `from` up to and
    /// including the bucket containing `to`.
    pub fn bucket_starts(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        granularity: Granularity,
    ) -> Vec<DateTime<Utc>> {
        let mut starts = Vec::new();
        if to < from {
            return starts;
        }
        let mut cursor = self.align(from, granularity);
        while cursor <= to {
            starts.push(cursor);
            let next = self.advance(cursor, granularity);
            if next <= cursor {
                break;
            }
            cursor = next;
        }
        starts
    }

    /// Map a local wall-clock time to an instant. Ambiguous times take the
    /// earlier instant; times inside a DST gap move forward to the first valid
    /// local time.
    fn resolve_local(&self, naive: NaiveDateTime) -> DateTime<Utc> {
        let mut candidate = naive;
        for _ in 0..4 {
            match self.tz.from_local_datetime(&candidate) {
                LocalResult::Single(dt) => return dt.with_timezone(&Utc),
                LocalResult::Ambiguous(earliest, _) => return earliest.with_timezone(&Utc),
                LocalResult::None => candidate += Duration::minutes(30),
            }
        }
        Utc.from_utc_datetime(&naive)
    }
}

/// Split `[start, end]` across the buckets it touches.
///
/// Returns `(bucket_start, fraction)` pairs whose fractions sum to exactly 1.
/// The fraction is the share of wall-clock time spent inside each bucket. An
/// empty or reversed interval is attributed entirely to the bucket of `end`.
pub fn apportion(
    calendar: &BucketCalendar,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    granularity: Granularity,
) -> Vec<(DateTime<Utc>, f64)> {
    let total_ms = (end - start).num_milliseconds();
    if total_ms <= 0 {
        return vec![(calendar.align(end, granularity), 1.0)];
    }

    let total = total_ms as f64;
    let mut parts = Vec::new();
    let mut assigned = 0.0;
    let mut seg_start = start;
    let mut bucket = calendar.align(start, granularity);

    while seg_start < end {
        let next = calendar.advance(bucket, granularity);
        if next <= bucket {
            break;
        }
        let seg_end = next.min(end);
        if seg_end >= end {
            parts.push((bucket, 1.0 - assigned));
            return parts;
        }
        let fraction = (seg_end - seg_start).num_milliseconds() as f64 / total;
        assigned += fraction;
        parts.push((bucket, fraction));
        seg_start = seg_end;
        bucket = next;
    }

    if parts.is_empty() {
        parts.push((calendar.align(end, granularity), 1.0));
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_align_five_minutes() {
        let cal = BucketCalendar::utc();
        assert_eq!(
            cal.align(utc("2024-03-01T10:07:31Z"), Granularity::FiveMinutes),
            utc("2024-03-01T10:05:00Z")
        );
        assert_eq!(
            cal.align(utc("2024-03-01T10:05:00Z"), Granularity::FiveMinutes),
            utc("2024-03-01T10:05:00Z")
        );
    }

    #[test]
    fn test_align_hour_and_day() {
        let cal = BucketCalendar::utc();
        let t = utc("2024-03-01T10:59:59.900Z");
        assert_eq!(cal.align(t, Granularity::Hourly), utc("2024-03-01T10:00:00Z"));
        assert_eq!(cal.align(t, Granularity::Daily), utc("2024-03-01T00:00:00Z"));
    }

    #[test]
    fn test_align_daily_in_zone() {
        let cal = BucketCalendar::new(chrono_tz::America::New_York);
        // 03:00Z is 22:00 the previous day in New York (EST, UTC-5).
        let start = cal.align(utc("2024-01-10T03:00:00Z"), Granularity::Daily);
        assert_eq!(start, utc("2024-01-09T05:00:00Z"));
    }

    #[test]
    fn test_half_hour_offset_hourly_alignment() {
        let cal = BucketCalendar::new(chrono_tz::Asia::Kolkata);
        // 10:15Z is 15:45 in India (UTC+5:30); the local hour began at 09:30Z.
        let start = cal.align(utc("2024-01-10T10:15:00Z"), Granularity::Hourly);
        assert_eq!(start, utc("2024-01-10T09:30:00Z"));
    }

    #[test]
    fn test_daily_bucket_spans_dst_change() {
        let cal = BucketCalendar::new(chrono_tz::America::New_York);
        // Spring forward on 2024-03-10: that local day is 23 hours long.
        let day = cal.align(utc("2024-03-10T12:00:00Z"), Granularity::Daily);
        let next = cal.advance(day, Granularity::Daily);
        assert_eq!(next - day, Duration::hours(23));
    }

    #[test]
    fn test_advance_is_aligned() {
        let cal = BucketCalendar::new(chrono_tz::Europe::Berlin);
        let mut cursor = cal.align(utc("2024-10-26T20:00:00Z"), Granularity::Hourly);
        for _ in 0..10 {
            let next = cal.advance(cursor, Granularity::Hourly);
            assert_eq!(cal.align(next, Granularity::Hourly), next);
            cursor = next;
        }
    }

    #[test]
    fn test_bucket_starts_inclusive() {
        let cal = BucketCalendar::utc();
        let starts = cal.bucket_starts(
            utc("2024-03-01T10:03:00Z"),
            utc("2024-03-01T10:21:00Z"),
            Granularity::FiveMinutes,
        );
        assert_eq!(starts.len(), 5);
        assert_eq!(starts[0], utc("2024-03-01T10:00:00Z"));
        assert_eq!(starts[4], utc("2024-03-01T10:20:00Z"));
    }

    #[test]
    fn test_apportion_within_single_bucket() {
        let cal = BucketCalendar::utc();
        let parts = apportion(
            &cal,
            utc("2024-03-01T10:01:00Z"),
            utc("2024-03-01T10:02:00Z"),
            Granularity::FiveMinutes,
        );
        assert_eq!(parts, vec![(utc("2024-03-01T10:00:00Z"), 1.0)]);
    }

    #[test]
    fn test_apportion_across_boundary() {
        let cal = BucketCalendar::utc();
        let parts = apportion(
            &cal,
            utc("2024-03-01T10:04:00Z"),
            utc("2024-03-01T10:07:00Z"),
            Granularity::FiveMinutes,
        );
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].0, utc("2024-03-01T10:00:00Z"));
        assert!((parts[0].1 - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(parts[1].0, utc("2024-03-01T10:05:00Z"));
        let sum: f64 = parts.iter().map(|(_, f)| f).sum();
        assert!((sum - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_apportion_many_buckets_sums_exactly() {
        let cal = BucketCalendar::utc();
        let parts = apportion(
            &cal,
            utc("2024-03-01T10:04:13Z"),
            utc("2024-03-01T10:31:07Z"),
            Granularity::FiveMinutes,
        );
        assert_eq!(parts.len(), 7);
        let sum: f64 = parts.iter().map(|(_, f)| f).sum();
        assert!((sum - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_apportion_reversed_interval() {
        let cal = BucketCalendar::utc();
        let parts = apportion(
            &cal,
            utc("2024-03-01T10:09:00Z"),
            utc("2024-03-01T10:02:00Z"),
            Granularity::FiveMinutes,
        );
        assert_eq!(parts, vec![(utc("2024-03-01T10:00:00Z"), 1.0)]);
    }
}
