use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only instant type. Civil dates are UTC.
pub type Ms = i64;

pub const HOUR_MS: Ms = 3_600_000;
pub const DAY_MS: Ms = 86_400_000;
pub const MINUTES_PER_DAY: u16 = 1440;

/// Recurring availability window for one weekday (0 = Sunday).
///
/// Minutes since midnight. Windows not aligned to whole hours are truncated
/// to the hour grid by integer division; `start_minutes >= end_minutes`
/// yields no slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklyInterval {
    pub weekday: u8,
    pub start_minutes: u16,
    pub end_minutes: u16,
}

impl WeeklyInterval {
    pub fn new(weekday: u8, start_minutes: u16, end_minutes: u16) -> Self {
        Self {
            weekday,
            start_minutes,
            end_minutes,
        }
    }

    /// Hour-aligned candidate slots, ascending, exclusive of the end hour.
    pub fn hours(&self) -> std::ops::Range<u8> {
        let start = (self.start_minutes / 60) as u8;
        let end = (self.end_minutes / 60) as u8;
        start..end
    }
}

/// A confirmed visitor booking. Never mutated, never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    /// Hour-aligned instant of the slot.
    pub starts_at: Ms,
    pub contact_name: String,
    pub contact_email: String,
    pub notes: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UserState {
    pub id: Ulid,
    pub username: String,
    pub name: String,
    pub bio: Option<String>,
    /// At most one interval per weekday, sorted by weekday.
    pub intervals: Vec<WeeklyInterval>,
    /// All bookings, sorted by `starts_at`.
    pub bookings: Vec<Booking>,
}

impl UserState {
    pub fn new(id: Ulid, username: String, name: String, bio: Option<String>) -> Self {
        Self {
            id,
            username,
            name,
            bio,
            intervals: Vec::new(),
            bookings: Vec::new(),
        }
    }

    pub fn interval_for(&self, weekday: u8) -> Option<&WeeklyInterval> {
        self.intervals.iter().find(|iv| iv.weekday == weekday)
    }

    /// Replace the whole weekly rule set (intervals are never edited in place).
    pub fn set_intervals(&mut self, mut intervals: Vec<WeeklyInterval>) {
        intervals.sort_by_key(|iv| iv.weekday);
        self.intervals = intervals;
    }

    /// Insert booking maintaining sort order by starts_at.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.starts_at, |b| b.starts_at)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    /// Bookings with `starts_at` in `[from, to)`.
    /// Uses binary search to skip everything outside the window.
    pub fn bookings_between(&self, from: Ms, to: Ms) -> &[Booking] {
        let lo = self.bookings.partition_point(|b| b.starts_at < from);
        let hi = self.bookings.partition_point(|b| b.starts_at < to);
        &self.bookings[lo..hi]
    }

    pub fn booking_at(&self, instant: Ms) -> Option<&Booking> {
        self.bookings
            .binary_search_by_key(&instant, |b| b.starts_at)
            .ok()
            .map(|i| &self.bookings[i])
    }
}

// ── Civil date ↔ instant ─────────────────────────────────────────

/// Weekday index of a UTC date, 0 = Sunday.
pub fn weekday_index(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_sunday() as u8
}

/// Midnight UTC of `date` in unix ms.
pub fn day_start_ms(date: NaiveDate) -> Ms {
    date.and_hms_opt(0, 0, 0)
        .expect("midnight is always a valid time")
        .and_utc()
        .timestamp_millis()
}

/// Instant of the hour slot `hour` on `date`.
pub fn slot_instant(date: NaiveDate, hour: u8) -> Ms {
    day_start_ms(date) + Ms::from(hour) * HOUR_MS
}

/// Hour-of-day of an instant, relative to its UTC date.
pub fn hour_of(instant: Ms) -> u8 {
    (instant.rem_euclid(DAY_MS) / HOUR_MS) as u8
}

/// Truncate an instant down to the whole hour.
pub fn truncate_to_hour(instant: Ms) -> Ms {
    instant - instant.rem_euclid(HOUR_MS)
}

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    UserRegistered {
        id: Ulid,
        username: String,
        name: String,
        bio: Option<String>,
    },
    ProfileUpdated {
        id: Ulid,
        name: String,
        bio: Option<String>,
    },
    IntervalsReplaced {
        user_id: Ulid,
        intervals: Vec<WeeklyInterval>,
    },
    BookingCreated {
        id: Ulid,
        user_id: Ulid,
        starts_at: Ms,
        contact_name: String,
        contact_email: String,
        notes: Option<String>,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    pub id: Ulid,
    pub username: String,
    pub name: String,
    pub bio: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntervalInfo {
    pub user_id: Ulid,
    pub weekday: u8,
    pub start_minutes: u16,
    pub end_minutes: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingInfo {
    pub id: Ulid,
    pub user_id: Ulid,
    pub starts_at: Ms,
    pub contact_name: String,
    pub contact_email: String,
    pub notes: Option<String>,
}

// ── Read models ──────────────────────────────────────────────────

/// Day schedule for one user: every candidate hour plus the still-open subset.
/// `available_times` is always a subset of `possible_times`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotResult {
    pub possible_times: Vec<u8>,
    pub available_times: Vec<u8>,
}

/// Month schedule for one user: weekdays with no rule at all, plus days of
/// the month whose every candidate slot is already booked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthSchedule {
    pub blocked_week_days: Vec<u8>,
    pub blocked_dates: Vec<u8>,
}
