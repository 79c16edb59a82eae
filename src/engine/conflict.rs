use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

pub(crate) fn validate_timestamp(at: Ms) -> Result<(), EngineError> {
    if !(MIN_VALID_TIMESTAMP_MS..=MAX_VALID_TIMESTAMP_MS).contains(&at) {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    Ok(())
}

/// Username rule from the registration form: lowercase letters and hyphens.
pub(crate) fn validate_username(username: &str) -> Result<(), EngineError> {
    if username.len() < MIN_USERNAME_LEN {
        return Err(EngineError::InvalidUsername("shorter than 3 characters"));
    }
    if username.len() > MAX_USERNAME_LEN {
        return Err(EngineError::InvalidUsername("too long"));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_lowercase() || c == '-')
    {
        return Err(EngineError::InvalidUsername(
            "only lowercase letters and hyphens",
        ));
    }
    Ok(())
}

pub(crate) fn validate_profile(name: &str, bio: Option<&str>) -> Result<(), EngineError> {
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    if bio.is_some_and(|b| b.len() > MAX_BIO_LEN) {
        return Err(EngineError::LimitExceeded("bio too long"));
    }
    Ok(())
}

/// The weekly rule set must fit the data model: one rule per weekday, sane
/// weekday and minute values. An inverted window (start >= end) is allowed —
/// the resolver treats it as producing no slots.
pub(crate) fn validate_intervals(intervals: &[WeeklyInterval]) -> Result<(), EngineError> {
    if intervals.len() > 7 {
        return Err(EngineError::InvalidInterval("more than 7 rules"));
    }
    let mut seen = [false; 7];
    for iv in intervals {
        if iv.weekday > 6 {
            return Err(EngineError::InvalidInterval("weekday out of range"));
        }
        if iv.start_minutes > MINUTES_PER_DAY || iv.end_minutes > MINUTES_PER_DAY {
            return Err(EngineError::InvalidInterval("minutes out of range"));
        }
        if seen[usize::from(iv.weekday)] {
            return Err(EngineError::InvalidInterval("duplicate weekday"));
        }
        seen[usize::from(iv.weekday)] = true;
    }
    Ok(())
}

pub(crate) fn validate_contact(
    contact_name: &str,
    contact_email: &str,
    notes: Option<&str>,
) -> Result<(), EngineError> {
    if contact_name.is_empty() {
        return Err(EngineError::InvalidContact("empty name"));
    }
    if contact_name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("contact name too long"));
    }
    if contact_email.len() > MAX_EMAIL_LEN {
        return Err(EngineError::LimitExceeded("contact email too long"));
    }
    if !contact_email.contains('@') {
        return Err(EngineError::InvalidContact("email missing '@'"));
    }
    if notes.is_some_and(|n| n.len() > MAX_NOTES_LEN) {
        return Err(EngineError::LimitExceeded("notes too long"));
    }
    Ok(())
}

/// Check that the hour-aligned instant `starts_at` can be booked on `us`:
/// not in the past, inside the weekday's configured window, and not already
/// taken.
pub(crate) fn check_bookable(us: &UserState, starts_at: Ms, now: Ms) -> Result<(), EngineError> {
    if starts_at < now {
        return Err(EngineError::SlotInPast(starts_at));
    }

    let date = chrono::DateTime::from_timestamp_millis(starts_at)
        .map(|dt| dt.date_naive())
        .ok_or(EngineError::LimitExceeded("timestamp out of range"))?;
    let weekday = weekday_index(date);
    let hour = hour_of(starts_at);
    let inside = us
        .interval_for(weekday)
        .is_some_and(|iv| iv.hours().contains(&hour));
    if !inside {
        return Err(EngineError::OutsideAvailability(starts_at));
    }

    if let Some(existing) = us.booking_at(starts_at) {
        return Err(EngineError::SlotTaken(existing.id));
    }
    Ok(())
}
