use chrono::NaiveDate;

use crate::limits::*;
use crate::model::*;

use super::availability::{blocked_dates, blocked_weekdays, resolve_day};
use super::conflict::now_ms;
use super::{Engine, EngineError, SharedUserState};

impl Engine {
    /// Day read model: candidate slots on `date` plus the still-open subset.
    ///
    /// Unknown usernames are a client error; everything else is total —
    /// past dates and unconfigured weekdays come back empty.
    pub async fn day_schedule(
        &self,
        username: &str,
        date: NaiveDate,
    ) -> Result<SlotResult, EngineError> {
        let guard = self.resolve_username_read(username).await?;

        let day_start = day_start_ms(date);
        let booked: Vec<Ms> = guard
            .bookings_between(day_start, day_start + DAY_MS)
            .iter()
            .map(|b| b.starts_at)
            .collect();

        Ok(resolve_day(&guard.intervals, date, &booked, now_ms()))
    }

    /// Month read model: weekdays with no rule, plus fully booked days.
    pub async fn month_schedule(
        &self,
        username: &str,
        year: i32,
        month: u32,
    ) -> Result<MonthSchedule, EngineError> {
        let guard = self.resolve_username_read(username).await?;

        let blocked_week_days = blocked_weekdays(&guard.intervals);

        let month_start = NaiveDate::from_ymd_opt(year, month, 1)
            .ok_or(EngineError::LimitExceeded("month out of range"))?;
        let from = day_start_ms(month_start);
        // 31 days always covers the month; blocked_dates stops at month end
        let month_bookings = guard.bookings_between(from, from + 31 * DAY_MS);
        let blocked = blocked_dates(&guard.intervals, year, month, month_bookings);

        Ok(MonthSchedule {
            blocked_week_days,
            blocked_dates: blocked,
        })
    }

    pub async fn list_users(&self) -> Vec<UserInfo> {
        // Clone the Arcs out first — never await while holding a DashMap shard.
        let states: Vec<SharedUserState> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut users = Vec::with_capacity(states.len());
        for us in states {
            let guard = us.read().await;
            users.push(UserInfo {
                id: guard.id,
                username: guard.username.clone(),
                name: guard.name.clone(),
                bio: guard.bio.clone(),
            });
        }
        users.sort_by(|a, b| a.username.cmp(&b.username));
        users
    }

    pub async fn get_intervals(&self, username: &str) -> Result<Vec<IntervalInfo>, EngineError> {
        let guard = self.resolve_username_read(username).await?;
        Ok(guard
            .intervals
            .iter()
            .map(|iv| IntervalInfo {
                user_id: guard.id,
                weekday: iv.weekday,
                start_minutes: iv.start_minutes,
                end_minutes: iv.end_minutes,
            })
            .collect())
    }

    /// Bookings for a user, optionally restricted to `starts_at` in
    /// `[from, to]` (both bounds inclusive, matching the SQL filters).
    pub async fn get_bookings(
        &self,
        username: &str,
        from: Option<Ms>,
        to: Option<Ms>,
    ) -> Result<Vec<BookingInfo>, EngineError> {
        if let (Some(from), Some(to)) = (from, to)
            && to.saturating_sub(from) > MAX_BOOKING_RANGE_MS
        {
            return Err(EngineError::LimitExceeded("booking range too wide"));
        }
        let guard = self.resolve_username_read(username).await?;
        let slice = guard.bookings_between(
            from.unwrap_or(Ms::MIN),
            to.unwrap_or(Ms::MAX - 1).saturating_add(1),
        );
        Ok(slice
            .iter()
            .map(|b| BookingInfo {
                id: b.id,
                user_id: guard.id,
                starts_at: b.starts_at,
                contact_name: b.contact_name.clone(),
                contact_email: b.contact_email.clone(),
                notes: b.notes.clone(),
            })
            .collect())
    }
}
