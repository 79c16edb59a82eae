use std::sync::Arc;

use tokio::sync::{oneshot, RwLock};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{
    check_bookable, now_ms, validate_contact, validate_intervals, validate_profile,
    validate_timestamp, validate_username,
};
use super::{Engine, EngineError, WalCommand};

impl Engine {
    pub async fn register_user(
        &self,
        id: Ulid,
        username: String,
        name: String,
        bio: Option<String>,
    ) -> Result<(), EngineError> {
        if self.state.len() >= MAX_USERS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many users"));
        }
        validate_username(&username)?;
        validate_profile(&name, bio.as_deref())?;
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if self.usernames.contains_key(&username) {
            return Err(EngineError::UsernameTaken(username));
        }

        let event = Event::UserRegistered {
            id,
            username: username.clone(),
            name: name.clone(),
            bio: bio.clone(),
        };
        self.wal_append(&event).await?;
        let us = UserState::new(id, username.clone(), name, bio);
        self.state.insert(id, Arc::new(RwLock::new(us)));
        self.usernames.insert(username, id);
        self.notify.send(id, &event);
        Ok(())
    }

    pub async fn update_profile(
        &self,
        id: Ulid,
        name: String,
        bio: Option<String>,
    ) -> Result<(), EngineError> {
        validate_profile(&name, bio.as_deref())?;
        let us = self.get_user(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = us.write().await;

        let event = Event::ProfileUpdated { id, name, bio };
        self.persist_and_apply(id, &mut guard, &event).await
    }

    /// Replace the user's entire weekly rule set. Intervals are never edited
    /// in place: the submitted set is the new truth, and an empty set clears
    /// all availability.
    pub async fn replace_intervals(
        &self,
        user_id: Ulid,
        intervals: Vec<WeeklyInterval>,
    ) -> Result<(), EngineError> {
        validate_intervals(&intervals)?;
        let us = self
            .get_user(&user_id)
            .ok_or(EngineError::NotFound(user_id))?;
        let mut guard = us.write().await;

        let event = Event::IntervalsReplaced { user_id, intervals };
        self.persist_and_apply(user_id, &mut guard, &event).await
    }

    /// Confirm a visitor booking. `starts_at` is truncated to the whole hour
    /// before validation, so "9:40" books the 9:00 slot.
    pub async fn create_booking(
        &self,
        id: Ulid,
        user_id: Ulid,
        starts_at: Ms,
        contact_name: String,
        contact_email: String,
        notes: Option<String>,
    ) -> Result<(), EngineError> {
        validate_timestamp(starts_at)?;
        validate_contact(&contact_name, &contact_email, notes.as_deref())?;
        let starts_at = truncate_to_hour(starts_at);

        let us = self
            .get_user(&user_id)
            .ok_or(EngineError::NotFound(user_id))?;
        let mut guard = us.write().await;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_USER {
            return Err(EngineError::LimitExceeded("too many bookings for user"));
        }

        check_bookable(&guard, starts_at, now_ms())?;

        let event = Event::BookingCreated {
            id,
            user_id,
            starts_at,
            contact_name,
            contact_email,
            notes,
        };
        self.persist_and_apply(user_id, &mut guard, &event).await
    }

    /// Compact the WAL by rewriting it with only the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        let user_ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();
        for id in user_ids {
            let entry = match self.state.get(&id) {
                Some(e) => e,
                None => continue,
            };
            let us = entry.value().clone();
            drop(entry);
            let guard = us.read().await;

            events.push(Event::UserRegistered {
                id: guard.id,
                username: guard.username.clone(),
                name: guard.name.clone(),
                bio: guard.bio.clone(),
            });
            if !guard.intervals.is_empty() {
                events.push(Event::IntervalsReplaced {
                    user_id: guard.id,
                    intervals: guard.intervals.clone(),
                });
            }
            for booking in &guard.bookings {
                events.push(Event::BookingCreated {
                    id: booking.id,
                    user_id: guard.id,
                    starts_at: booking.starts_at,
                    contact_name: booking.contact_name.clone(),
                    contact_email: booking.contact_email.clone(),
                    notes: booking.notes.clone(),
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
