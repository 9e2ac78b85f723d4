use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use ulid::Ulid;

use crate::model::{Booking, SalesmanCalendar, TimeRange, Unavailability};

use super::EngineError;

/// Current wall-clock instant in the business timezone.
pub(crate) fn local_now(tz: Tz) -> NaiveDateTime {
    Utc::now().with_timezone(&tz).naive_local()
}

/// Candidate window for conflict checks: the appointment plus the
/// post-appointment buffer.
pub(crate) fn candidate_window(
    date: NaiveDate,
    time: NaiveTime,
    duration_minutes: u32,
    buffer_minutes: u32,
) -> TimeRange {
    let start = date.and_time(time);
    let total = (duration_minutes + buffer_minutes) as i64;
    TimeRange::new(start, start + Duration::minutes(total))
}

/// Scan the candidate date's bookings for one whose buffered window
/// overlaps the candidate's. Both sides carry the buffer, so the gap is
/// enforced no matter which appointment comes first. Only confirmed and
/// completed bookings block; pending ones hold their slot but do not
/// exclude other times. Bookings on other dates are never considered.
pub(crate) fn find_conflict<'a>(
    cal: &'a SalesmanCalendar,
    date: NaiveDate,
    time: NaiveTime,
    duration_minutes: u32,
    buffer_minutes: u32,
    exclude: Option<Ulid>,
) -> Option<&'a Booking> {
    let candidate = candidate_window(date, time, duration_minutes, buffer_minutes);
    cal.bookings_on(date).iter().find(|b| {
        if exclude == Some(b.id) {
            return false;
        }
        b.status.blocks_conflicts() && b.buffered_window(buffer_minutes).overlaps(&candidate)
    })
}

/// Point-in-time unavailability check: the appointment START must not
/// fall inside a block covering `date`. A window that merely runs into a
/// block does not count — that is the historical behavior clients and
/// staff rely on when squeezing appointments in ahead of a vacation.
pub(crate) fn find_unavailability_hit<'a>(
    cal: &'a SalesmanCalendar,
    date: NaiveDate,
    time: NaiveTime,
) -> Option<&'a Unavailability> {
    cal.blocks_covering(date).find(|b| b.covers_time(time))
}

/// Advance-window rules for new bookings, evaluated in business local
/// time.
pub(crate) fn validate_advance(
    min_advance_hours: i64,
    max_advance_days: i64,
    now: NaiveDateTime,
    date: NaiveDate,
    time: NaiveTime,
) -> Result<(), EngineError> {
    let starts = date.and_time(time);
    if starts < now + Duration::hours(min_advance_hours) {
        return Err(EngineError::TooSoon(min_advance_hours));
    }
    if date > now.date() + Duration::days(max_advance_days) {
        return Err(EngineError::TooFarAhead(max_advance_days));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AppointmentKind, BookingStatus};
    use rust_decimal::Decimal;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2030, 1, day).unwrap()
    }

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn cal_with(bookings: Vec<Booking>) -> SalesmanCalendar {
        let mut cal = SalesmanCalendar::new(Ulid::new(), "EMP00001".into(), None);
        for b in bookings {
            cal.insert_booking(b);
        }
        cal
    }

    fn booking(date: NaiveDate, time: NaiveTime, status: BookingStatus) -> Booking {
        Booking {
            id: Ulid::new(),
            client: Ulid::new(),
            salesman: Ulid::new(),
            date,
            start_time: time,
            duration_minutes: 15,
            kind: AppointmentKind::Zoom,
            status,
            slot: None,
            commission: Decimal::ZERO,
            locked: false,
            created_at: Utc::now(),
            created_by: Ulid::new(),
            approved_at: None,
            approved_by: None,
            declined_at: None,
            declined_by: None,
            decline_reason: None,
            canceled_at: None,
            canceled_by: None,
            cancellation_reason: None,
            cancellation_notes: None,
        }
    }

    #[test]
    fn buffer_applies_in_both_directions() {
        // 15 min appointment at 10:00 plus 30 min buffer blocks [10:00, 10:45).
        let cal = cal_with(vec![booking(d(7), t(10, 0), BookingStatus::Confirmed)]);

        // Candidate starting inside the existing buffer.
        assert!(find_conflict(&cal, d(7), t(10, 30), 15, 30, None).is_some());
        // Candidate whose own buffered window reaches into the existing one.
        assert!(find_conflict(&cal, d(7), t(9, 30), 15, 30, None).is_some());
        // Adjacent to the buffered end — half-open, no conflict.
        assert!(find_conflict(&cal, d(7), t(10, 45), 15, 30, None).is_none());
    }

    #[test]
    fn only_blocking_statuses_conflict() {
        for status in [
            BookingStatus::Pending,
            BookingStatus::Canceled,
            BookingStatus::Declined,
            BookingStatus::NoShow,
        ] {
            let cal = cal_with(vec![booking(d(7), t(10, 0), status)]);
            assert!(
                find_conflict(&cal, d(7), t(10, 0), 15, 30, None).is_none(),
                "{status} should not block"
            );
        }
        let cal = cal_with(vec![booking(d(7), t(10, 0), BookingStatus::Completed)]);
        assert!(find_conflict(&cal, d(7), t(10, 0), 15, 30, None).is_some());
    }

    #[test]
    fn other_dates_never_scanned() {
        let cal = cal_with(vec![booking(d(7), t(10, 0), BookingStatus::Confirmed)]);
        assert!(find_conflict(&cal, d(8), t(10, 0), 15, 30, None).is_none());
    }

    #[test]
    fn exclude_skips_own_booking() {
        let b = booking(d(7), t(10, 0), BookingStatus::Confirmed);
        let id = b.id;
        let cal = cal_with(vec![b]);
        assert!(find_conflict(&cal, d(7), t(10, 0), 15, 30, Some(id)).is_none());
        assert!(find_conflict(&cal, d(7), t(10, 0), 15, 30, None).is_some());
    }

    #[test]
    fn unavailability_checks_start_instant_only() {
        let mut cal = cal_with(vec![]);
        cal.insert_block(Unavailability {
            id: Ulid::new(),
            salesman: cal.id,
            start_date: d(7),
            end_date: d(9),
            start_time: t(12, 0),
            end_time: t(14, 0),
        });

        assert!(find_unavailability_hit(&cal, d(7), t(12, 0)).is_some());
        assert!(find_unavailability_hit(&cal, d(9), t(13, 59)).is_some());
        // Start before the block, window crossing into it: allowed.
        assert!(find_unavailability_hit(&cal, d(7), t(11, 30)).is_none());
        // End time exclusive, outside date range.
        assert!(find_unavailability_hit(&cal, d(7), t(14, 0)).is_none());
        assert!(find_unavailability_hit(&cal, d(10), t(12, 30)).is_none());
    }

    #[test]
    fn advance_window_bounds() {
        let now = d(7).and_time(t(8, 0));

        assert!(matches!(
            validate_advance(2, 90, now, d(7), t(9, 30)),
            Err(EngineError::TooSoon(2))
        ));
        // Exactly min_advance ahead is allowed.
        assert!(validate_advance(2, 90, now, d(7), t(10, 0)).is_ok());

        let far = d(7) + Duration::days(91);
        assert!(matches!(
            validate_advance(2, 90, now, far, t(10, 0)),
            Err(EngineError::TooFarAhead(90))
        ));
        let edge = d(7) + Duration::days(90);
        assert!(validate_advance(2, 90, now, edge, t(10, 0)).is_ok());
    }
}
