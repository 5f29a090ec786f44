use chrono::{DateTime, Datelike, Days, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use ulid::Ulid;

use crate::model::*;

use super::pricing::round_cents;

/// Which day begins a week for the "this week" earnings window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WeekStart {
    #[default]
    Sunday,
    Monday,
}

impl WeekStart {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sunday" | "sun" => Some(WeekStart::Sunday),
            "monday" | "mon" => Some(WeekStart::Monday),
            _ => None,
        }
    }
}

/// Parse an IANA zone name, falling back to UTC.
pub fn resolve_tz(name: Option<&str>) -> Tz {
    match name {
        None => Tz::UTC,
        Some(n) => n.parse::<Tz>().unwrap_or_else(|_| {
            tracing::warn!("unknown timezone {n:?}, using UTC");
            Tz::UTC
        }),
    }
}

/// Local midnight of `date` in `tz`, as Unix ms. A midnight skipped by a DST
/// gap resolves to the first valid instant an hour later.
fn local_midnight_ms(date: NaiveDate, tz: Tz) -> Ms {
    let naive = date.and_time(NaiveTime::MIN);
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(naive + chrono::Duration::hours(1))).earliest())
        .map(|dt| dt.timestamp_millis())
        .unwrap_or_else(|| naive.and_utc().timestamp_millis())
}

/// Start of the current week and month around `now`, in provider-local time.
pub fn window_starts(now: Ms, tz: Tz, week_start: WeekStart) -> (Ms, Ms) {
    let utc = DateTime::<Utc>::from_timestamp_millis(now).unwrap_or_default();
    let today = utc.with_timezone(&tz).date_naive();

    let back = match week_start {
        WeekStart::Sunday => today.weekday().num_days_from_sunday(),
        WeekStart::Monday => today.weekday().num_days_from_monday(),
    };
    let week_day = today.checked_sub_days(Days::new(back as u64)).unwrap_or(today);
    let month_day = today.with_day(1).unwrap_or(today);

    (local_midnight_ms(week_day, tz), local_midnight_ms(month_day, tz))
}

/// Sum completed bookings into week / month / all-time buckets by end time.
pub fn summarize<'a>(
    provider_id: Ulid,
    bookings: impl IntoIterator<Item = &'a Booking>,
    now: Ms,
    tz: Tz,
    week_start: WeekStart,
) -> EarningsSummary {
    let (week_from, month_from) = window_starts(now, tz, week_start);
    let (mut week, mut month, mut total, mut completed_count) = (0.0, 0.0, 0.0, 0usize);

    for b in bookings {
        if b.status != BookingStatus::Completed || b.provider_id != provider_id {
            continue;
        }
        completed_count += 1;
        total += b.total_price;
        let ended = b.span.end;
        if ended >= week_from && ended <= now {
            week += b.total_price;
        }
        if ended >= month_from && ended <= now {
            month += b.total_price;
        }
    }

    EarningsSummary {
        provider_id,
        week: round_cents(week),
        month: round_cents(month),
        total: round_cents(total),
        completed_count,
        week_start: week_from,
        month_start: month_from,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::booking;

    fn ms(rfc3339: &str) -> Ms {
        DateTime::parse_from_rfc3339(rfc3339).unwrap().timestamp_millis()
    }

    fn completed(pid: Ulid, end: Ms, price: f64) -> Booking {
        let mut b = booking(pid, end - MS_PER_HOUR, end, BookingStatus::Completed);
        b.total_price = price;
        b
    }

    #[test]
    fn sunday_week_in_utc() {
        // Wednesday 2026-10-14 12:00Z
        let now = ms("2026-10-14T12:00:00Z");
        let (week, month) = window_starts(now, Tz::UTC, WeekStart::Sunday);
        assert_eq!(week, ms("2026-10-11T00:00:00Z"));
        assert_eq!(month, ms("2026-10-01T00:00:00Z"));
    }

    #[test]
    fn monday_week_in_utc() {
        let now = ms("2026-10-14T12:00:00Z");
        let (week, _) = window_starts(now, Tz::UTC, WeekStart::Monday);
        assert_eq!(week, ms("2026-10-12T00:00:00Z"));
    }

    #[test]
    fn week_start_on_the_day_itself() {
        let now = ms("2026-10-11T08:00:00Z"); // a Sunday
        let (week, _) = window_starts(now, Tz::UTC, WeekStart::Sunday);
        assert_eq!(week, ms("2026-10-11T00:00:00Z"));
    }

    #[test]
    fn provider_local_boundaries() {
        // 2026-10-11 23:30 in New York is already Monday 03:30Z.
        let now = ms("2026-10-12T03:30:00Z");
        let tz: Tz = "America/New_York".parse().unwrap();
        let (week, _) = window_starts(now, tz, WeekStart::Sunday);
        // Sunday 2026-10-11 00:00 EDT (UTC-4)
        assert_eq!(week, ms("2026-10-11T04:00:00Z"));
        let (utc_week, _) = window_starts(now, Tz::UTC, WeekStart::Sunday);
        assert_eq!(utc_week, ms("2026-10-11T00:00:00Z"));
    }

    #[test]
    fn unknown_timezone_falls_back_to_utc() {
        assert_eq!(resolve_tz(Some("Mars/Olympus")), Tz::UTC);
        assert_eq!(resolve_tz(None), Tz::UTC);
        assert_eq!(resolve_tz(Some("Asia/Tokyo")).name(), "Asia/Tokyo");
    }

    #[test]
    fn buckets() {
        let pid = Ulid::new();
        let now = ms("2026-10-14T12:00:00Z");
        let this_week = completed(pid, ms("2026-10-13T10:00:00Z"), 100.0);
        let this_month = completed(pid, ms("2026-10-05T10:00:00Z"), 50.25);
        let last_month = completed(pid, ms("2026-09-20T10:00:00Z"), 10.0);
        let mut pending = completed(pid, ms("2026-10-13T15:00:00Z"), 999.0);
        pending.status = BookingStatus::Accepted;

        let all = [this_week, this_month, last_month, pending];
        let s = summarize(pid, &all, now, Tz::UTC, WeekStart::Sunday);
        assert_eq!(s.week, 100.0);
        assert_eq!(s.month, 150.25);
        assert_eq!(s.total, 160.25);
        assert_eq!(s.completed_count, 3);
    }
}
