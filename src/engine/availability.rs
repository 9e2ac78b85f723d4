use chrono::{Datelike, NaiveDate, NaiveTime, Timelike, Weekday};

use crate::model::{AppointmentKind, SalesmanCalendar};

// ── Cycle slot planning ──────────────────────────────────────────

/// Weekdays (Mon–Fri) in `[start, end]`, in order. An inverted range
/// yields nothing.
pub fn business_days(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let mut days = Vec::new();
    let mut day = start;
    while day <= end {
        if !matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
            days.push(day);
        }
        match day.succ_opt() {
            Some(next) => day = next,
            None => break,
        }
    }
    days
}

/// Slot start times from `day_start` up to (not including) `day_end`,
/// stepped by `interval_minutes`. Only the start has to fall inside the
/// business day; the appointment itself may run past `day_end`.
pub fn slot_starts(day_start: NaiveTime, day_end: NaiveTime, interval_minutes: u32) -> Vec<NaiveTime> {
    if interval_minutes == 0 {
        return Vec::new();
    }
    let mut starts = Vec::new();
    let mut m = day_start.num_seconds_from_midnight() / 60;
    let end_m = day_end.num_seconds_from_midnight() / 60;
    while m < end_m {
        if let Some(t) = NaiveTime::from_hms_opt(m / 60, m % 60, 0) {
            starts.push(t);
        }
        m += interval_minutes;
    }
    starts
}

/// Plan the slots a generation run would create for one calendar: every
/// (weekday, start time, kind) combination in the cycle the calendar
/// does not already have a slot for. Existing slots are skipped whatever
/// their state, which is what makes generation idempotent.
pub fn plan_slots(
    cal: &SalesmanCalendar,
    start: NaiveDate,
    end: NaiveDate,
    day_start: NaiveTime,
    day_end: NaiveTime,
    interval_minutes: u32,
) -> Vec<(NaiveDate, NaiveTime, AppointmentKind)> {
    let times = slot_starts(day_start, day_end, interval_minutes);
    let mut plan = Vec::new();
    for date in business_days(start, end) {
        for &time in &times {
            for kind in AppointmentKind::ALL {
                if cal.slot(date, time, kind).is_none() {
                    plan.push((date, time, kind));
                }
            }
        }
    }
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SlotState, TimeSlot};
    use chrono::Utc;
    use ulid::Ulid;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2030, 1, day).unwrap()
    }

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    // ── business_days ────────────────────────────────────

    #[test]
    fn business_days_skips_weekends() {
        // 2030-01-07 is a Monday; the 12th/13th and 19th/20th are weekends.
        let days = business_days(d(7), d(20));
        assert_eq!(days.len(), 10);
        assert_eq!(days[0], d(7));
        assert_eq!(days[4], d(11));
        assert_eq!(days[5], d(14));
        assert_eq!(days[9], d(18));
    }

    #[test]
    fn business_days_inverted_range_empty() {
        assert!(business_days(d(20), d(7)).is_empty());
    }

    #[test]
    fn business_days_weekend_only_empty() {
        assert!(business_days(d(12), d(13)).is_empty());
    }

    // ── slot_starts ──────────────────────────────────────

    #[test]
    fn slot_starts_standard_day() {
        let starts = slot_starts(t(9, 0), t(19, 0), 30);
        assert_eq!(starts.len(), 20);
        assert_eq!(starts[0], t(9, 0));
        assert_eq!(starts[1], t(9, 30));
        assert_eq!(starts[19], t(18, 30));
    }

    #[test]
    fn slot_starts_end_exclusive() {
        // A start exactly at day_end is not a slot.
        let starts = slot_starts(t(9, 0), t(10, 0), 30);
        assert_eq!(starts, vec![t(9, 0), t(9, 30)]);
        // But a start strictly before day_end is, even by one minute.
        let starts = slot_starts(t(9, 0), t(10, 1), 30);
        assert_eq!(starts, vec![t(9, 0), t(9, 30), t(10, 0)]);
    }

    #[test]
    fn slot_starts_degenerate_windows() {
        assert!(slot_starts(t(19, 0), t(9, 0), 30).is_empty());
        assert!(slot_starts(t(9, 0), t(9, 0), 30).is_empty());
        assert!(slot_starts(t(9, 0), t(19, 0), 0).is_empty());
    }

    // ── plan_slots ───────────────────────────────────────

    #[test]
    fn plan_covers_days_times_and_kinds() {
        let cal = SalesmanCalendar::new(Ulid::new(), "EMP00001".into(), None);
        // Mon + Tue, 20 start times, 2 kinds.
        let plan = plan_slots(&cal, d(7), d(8), t(9, 0), t(19, 0), 30);
        assert_eq!(plan.len(), 80);
    }

    #[test]
    fn plan_skips_existing_slots() {
        let mut cal = SalesmanCalendar::new(Ulid::new(), "EMP00001".into(), None);
        cal.insert_slot(TimeSlot {
            id: Ulid::new(),
            salesman: cal.id,
            date: d(7),
            start_time: t(9, 0),
            kind: AppointmentKind::Zoom,
            state: SlotState::Reserved,
            booked_by: Some(Ulid::new()),
            cycle: None,
            created_at: Utc::now(),
        });
        let plan = plan_slots(&cal, d(7), d(7), t(9, 0), t(19, 0), 30);
        assert_eq!(plan.len(), 39);
        assert!(!plan.contains(&(d(7), t(9, 0), AppointmentKind::Zoom)));
        assert!(plan.contains(&(d(7), t(9, 0), AppointmentKind::InPerson)));
    }

    #[test]
    fn plan_inverted_cycle_is_empty() {
        let cal = SalesmanCalendar::new(Ulid::new(), "EMP00001".into(), None);
        assert!(plan_slots(&cal, d(8), d(7), t(9, 0), t(19, 0), 30).is_empty());
    }
}
