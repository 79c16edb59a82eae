use std::collections::HashSet;

use chrono::NaiveDate;

use crate::model::*;

// ── Availability Algorithm ────────────────────────────────────────

/// Compute the day schedule for one user: every candidate hour on `date`
/// plus the subset that is still open given `booked` instants and `now`.
///
/// Total over all inputs: past dates, missing rules, and inverted rules all
/// produce an empty result, never an error.
pub fn resolve_day(
    intervals: &[WeeklyInterval],
    date: NaiveDate,
    booked: &[Ms],
    now: Ms,
) -> SlotResult {
    let day_start = day_start_ms(date);
    let end_of_day = day_start + DAY_MS - 1;
    if end_of_day < now {
        return SlotResult::default();
    }

    let weekday = weekday_index(date);
    let Some(interval) = intervals.iter().find(|iv| iv.weekday == weekday) else {
        return SlotResult::default();
    };

    let possible_times: Vec<u8> = interval.hours().collect();

    let booked_hours: HashSet<u8> = booked
        .iter()
        .filter(|&&at| at >= day_start && at < day_start + DAY_MS)
        .map(|&at| hour_of(at))
        .collect();

    let available_times: Vec<u8> = possible_times
        .iter()
        .copied()
        .filter(|&hour| !booked_hours.contains(&hour))
        .filter(|&hour| slot_instant(date, hour) >= now)
        .collect();

    SlotResult {
        possible_times,
        available_times,
    }
}

/// Weekdays with no configured rule, over the fixed domain {0..6}.
pub fn blocked_weekdays(intervals: &[WeeklyInterval]) -> Vec<u8> {
    (0u8..7)
        .filter(|weekday| !intervals.iter().any(|iv| iv.weekday == *weekday))
        .collect()
}

/// Days of `(year, month)` whose weekday has a rule with at least one
/// candidate slot, and every candidate slot is already booked.
///
/// `now` plays no part here: a fully booked day in the past is still
/// reported as blocked.
pub fn blocked_dates(
    intervals: &[WeeklyInterval],
    year: i32,
    month: u32,
    bookings: &[Booking],
) -> Vec<u8> {
    let mut blocked = Vec::new();
    for day in 1u8..=31 {
        let Some(date) = NaiveDate::from_ymd_opt(year, month, u32::from(day)) else {
            break;
        };
        let weekday = weekday_index(date);
        let Some(interval) = intervals.iter().find(|iv| iv.weekday == weekday) else {
            continue;
        };
        let possible: Vec<u8> = interval.hours().collect();
        if possible.is_empty() {
            continue;
        }

        let day_start = day_start_ms(date);
        let booked_hours: HashSet<u8> = bookings
            .iter()
            .filter(|b| b.starts_at >= day_start && b.starts_at < day_start + DAY_MS)
            .map(|b| hour_of(b.starts_at))
            .collect();

        if possible.iter().all(|hour| booked_hours.contains(hour)) {
            blocked.push(day);
        }
    }
    blocked
}
