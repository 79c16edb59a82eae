mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;
#[cfg(test)]
mod tests;

pub use availability::{blocked_dates, blocked_weekdays, resolve_day};
pub use error::EngineError;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedUserState = Arc<RwLock<UserState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                                .record(batch.len() as f64);
                            let flush_start = std::time::Instant::now();
                            let result = flush_batch(&mut wal, &mut batch);
                            metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                                .record(flush_start.elapsed().as_secs_f64());
                            respond_batch(&mut batch, &result);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                        .record(batch.len() as f64);
                    let flush_start = std::time::Instant::now();
                    let result = flush_batch(&mut wal, &mut batch);
                    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                        .record(flush_start.elapsed().as_secs_f64());
                    respond_batch(&mut batch, &result);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &mut [(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

pub struct Engine {
    pub state: DashMap<Ulid, SharedUserState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: username → user id
    pub(super) usernames: DashMap<String, Ulid>,
}

/// Apply an event directly to a UserState (no locking — caller holds the lock).
fn apply_to_user(us: &mut UserState, event: &Event) {
    match event {
        Event::ProfileUpdated { name, bio, .. } => {
            us.name = name.clone();
            us.bio = bio.clone();
        }
        Event::IntervalsReplaced { intervals, .. } => {
            us.set_intervals(intervals.clone());
        }
        Event::BookingCreated {
            id,
            starts_at,
            contact_name,
            contact_email,
            notes,
            ..
        } => {
            us.insert_booking(Booking {
                id: *id,
                starts_at: *starts_at,
                contact_name: contact_name.clone(),
                contact_email: contact_email.clone(),
                notes: notes.clone(),
            });
        }
        // UserRegistered is handled at the DashMap level, not here
        Event::UserRegistered { .. } => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> std::io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            notify,
            usernames: DashMap::new(),
        };

        // Replay events — we're the sole owner of these Arcs, so try_write
        // always succeeds instantly (no contention). Never use blocking_write
        // here because this may run inside an async context (e.g. lazy tenant creation).
        for event in &events {
            match event {
                Event::UserRegistered { id, username, name, bio } => {
                    let us = UserState::new(*id, username.clone(), name.clone(), bio.clone());
                    engine.state.insert(*id, Arc::new(RwLock::new(us)));
                    engine.usernames.insert(username.clone(), *id);
                }
                other => {
                    let user_id = event_user_id(other);
                    if let Some(entry) = engine.state.get(&user_id) {
                        let us_arc = entry.clone();
                        let mut guard = us_arc.try_write().expect("replay: uncontended write");
                        apply_to_user(&mut guard, other);
                    }
                }
            }
        }

        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_user(&self, id: &Ulid) -> Option<SharedUserState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn user_id_for(&self, username: &str) -> Option<Ulid> {
        self.usernames.get(username).map(|e| *e.value())
    }

    /// Lookup username → user, get state, acquire read lock.
    pub(super) async fn resolve_username_read(
        &self,
        username: &str,
    ) -> Result<tokio::sync::OwnedRwLockReadGuard<UserState>, EngineError> {
        let user_id = self
            .user_id_for(username)
            .ok_or_else(|| EngineError::UnknownUser(username.to_string()))?;
        let us = self
            .get_user(&user_id)
            .ok_or(EngineError::NotFound(user_id))?;
        Ok(us.read_owned().await)
    }

    /// WAL-append + apply + notify in one call. Eliminates the repeated 3-line pattern.
    pub(super) async fn persist_and_apply(
        &self,
        user_id: Ulid,
        us: &mut UserState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_user(us, event);
        self.notify.send(user_id, event);
        Ok(())
    }
}

/// Extract the user_id from an event (for non-registration events).
fn event_user_id(event: &Event) -> Ulid {
    match event {
        Event::UserRegistered { id, .. } | Event::ProfileUpdated { id, .. } => *id,
        Event::IntervalsReplaced { user_id, .. } | Event::BookingCreated { user_id, .. } => {
            *user_id
        }
    }
}
