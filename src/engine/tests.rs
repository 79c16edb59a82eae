use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Datelike, NaiveDate};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::notify::NotifyHub;

use super::{Engine, EngineError};

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("slotd_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn new_engine(wal_name: &str) -> Engine {
    let notify = Arc::new(NotifyHub::new());
    Engine::new(test_wal_path(wal_name), notify).unwrap()
}

/// First date with the given weekday in 2099 — far enough ahead that
/// "now" never catches up with these tests.
fn future_date(weekday: u8) -> NaiveDate {
    let mut date = NaiveDate::from_ymd_opt(2099, 1, 1).unwrap();
    while weekday_index(date) != weekday {
        date = date.succ_opt().unwrap();
    }
    date
}

async fn register(engine: &Engine, username: &str) -> Ulid {
    let id = Ulid::new();
    engine
        .register_user(id, username.into(), "Test User".into(), None)
        .await
        .unwrap();
    id
}

async fn book(engine: &Engine, user_id: Ulid, starts_at: Ms) -> Result<Ulid, EngineError> {
    let id = Ulid::new();
    engine
        .create_booking(
            id,
            user_id,
            starts_at,
            "Grace".into(),
            "grace@example.com".into(),
            None,
        )
        .await
        .map(|()| id)
}

// ── Registration ─────────────────────────────────────────

#[tokio::test]
async fn register_and_list() {
    let engine = new_engine("register_list.wal");
    register(&engine, "bob").await;
    register(&engine, "ada").await;

    let users = engine.list_users().await;
    assert_eq!(users.len(), 2);
    // sorted by username
    assert_eq!(users[0].username, "ada");
    assert_eq!(users[1].username, "bob");
}

#[tokio::test]
async fn register_duplicate_id_rejected() {
    let engine = new_engine("dup_id.wal");
    let id = Ulid::new();
    engine
        .register_user(id, "ada".into(), "Ada".into(), None)
        .await
        .unwrap();
    let result = engine
        .register_user(id, "eva".into(), "Eva".into(), None)
        .await;
    assert!(matches!(result, Err(EngineError::AlreadyExists(_))));
}

#[tokio::test]
async fn register_duplicate_username_rejected() {
    let engine = new_engine("dup_username.wal");
    register(&engine, "ada").await;
    let result = engine
        .register_user(Ulid::new(), "ada".into(), "Another Ada".into(), None)
        .await;
    assert!(matches!(result, Err(EngineError::UsernameTaken(_))));
}

#[tokio::test]
async fn register_invalid_username_rejected() {
    let engine = new_engine("bad_username.wal");
    for bad in ["ab", "Ada", "ada_l", "ada9"] {
        let result = engine
            .register_user(Ulid::new(), bad.into(), "Ada".into(), None)
            .await;
        assert!(
            matches!(result, Err(EngineError::InvalidUsername(_))),
            "username {bad:?} should be rejected"
        );
    }
}

#[tokio::test]
async fn username_index_resolves() {
    let engine = new_engine("username_index.wal");
    let id = register(&engine, "ada").await;
    assert_eq!(engine.user_id_for("ada"), Some(id));
    assert_eq!(engine.user_id_for("eva"), None);
}

#[tokio::test]
async fn update_profile_replaces_name_and_bio() {
    let engine = new_engine("update_profile.wal");
    let id = register(&engine, "ada").await;

    engine
        .update_profile(id, "Ada King".into(), Some("countess".into()))
        .await
        .unwrap();

    let users = engine.list_users().await;
    assert_eq!(users[0].name, "Ada King");
    assert_eq!(users[0].bio.as_deref(), Some("countess"));

    // bio can be cleared again
    engine.update_profile(id, "Ada King".into(), None).await.unwrap();
    let users = engine.list_users().await;
    assert_eq!(users[0].bio, None);
}

#[tokio::test]
async fn update_profile_unknown_user_rejected() {
    let engine = new_engine("update_unknown.wal");
    let result = engine.update_profile(Ulid::new(), "X".into(), None).await;
    assert!(matches!(result, Err(EngineError::NotFound(_))));
}

// ── Weekly intervals ─────────────────────────────────────

#[tokio::test]
async fn replace_intervals_is_wholesale() {
    let engine = new_engine("intervals_wholesale.wal");
    let id = register(&engine, "ada").await;

    engine
        .replace_intervals(id, vec![WeeklyInterval::new(1, 480, 720)])
        .await
        .unwrap();
    engine
        .replace_intervals(
            id,
            vec![
                WeeklyInterval::new(2, 540, 1020),
                WeeklyInterval::new(4, 540, 1020),
            ],
        )
        .await
        .unwrap();

    let intervals = engine.get_intervals("ada").await.unwrap();
    assert_eq!(intervals.len(), 2);
    assert_eq!(intervals[0].weekday, 2);
    assert_eq!(intervals[1].weekday, 4);
}

#[tokio::test]
async fn replace_intervals_empty_clears() {
    let engine = new_engine("intervals_clear.wal");
    let id = register(&engine, "ada").await;

    engine
        .replace_intervals(id, vec![WeeklyInterval::new(1, 480, 720)])
        .await
        .unwrap();
    engine.replace_intervals(id, vec![]).await.unwrap();

    assert!(engine.get_intervals("ada").await.unwrap().is_empty());
    let schedule = engine.month_schedule("ada", 2099, 1).await.unwrap();
    assert_eq!(schedule.blocked_week_days, vec![0, 1, 2, 3, 4, 5, 6]);
}

#[tokio::test]
async fn replace_intervals_rejects_bad_sets() {
    let engine = new_engine("intervals_invalid.wal");
    let id = register(&engine, "ada").await;

    let dup = vec![
        WeeklyInterval::new(1, 480, 720),
        WeeklyInterval::new(1, 540, 600),
    ];
    assert!(matches!(
        engine.replace_intervals(id, dup).await,
        Err(EngineError::InvalidInterval(_))
    ));

    let bad_weekday = vec![WeeklyInterval::new(7, 480, 720)];
    assert!(matches!(
        engine.replace_intervals(id, bad_weekday).await,
        Err(EngineError::InvalidInterval(_))
    ));

    let bad_minutes = vec![WeeklyInterval::new(1, 480, 1441)];
    assert!(matches!(
        engine.replace_intervals(id, bad_minutes).await,
        Err(EngineError::InvalidInterval(_))
    ));
}

#[tokio::test]
async fn replace_intervals_accepts_inverted_window() {
    // start >= end is stored as-is; it just never yields slots
    let engine = new_engine("intervals_inverted.wal");
    let id = register(&engine, "ada").await;
    engine
        .replace_intervals(id, vec![WeeklyInterval::new(1, 720, 480)])
        .await
        .unwrap();

    let result = engine.day_schedule("ada", future_date(1)).await.unwrap();
    assert!(result.possible_times.is_empty());
    assert!(result.available_times.is_empty());
}

// ── Day schedule ─────────────────────────────────────────

#[tokio::test]
async fn day_schedule_lists_open_slots() {
    let engine = new_engine("day_open.wal");
    let id = register(&engine, "ada").await;
    engine
        .replace_intervals(id, vec![WeeklyInterval::new(1, 480, 720)])
        .await
        .unwrap();

    let result = engine.day_schedule("ada", future_date(1)).await.unwrap();
    assert_eq!(result.possible_times, vec![8, 9, 10, 11]);
    assert_eq!(result.available_times, vec![8, 9, 10, 11]);
}

#[tokio::test]
async fn day_schedule_excludes_booked_hours() {
    let engine = new_engine("day_booked.wal");
    let id = register(&engine, "ada").await;
    engine
        .replace_intervals(id, vec![WeeklyInterval::new(1, 480, 720)])
        .await
        .unwrap();

    let monday = future_date(1);
    book(&engine, id, slot_instant(monday, 9)).await.unwrap();

    let result = engine.day_schedule("ada", monday).await.unwrap();
    assert_eq!(result.possible_times, vec![8, 9, 10, 11]);
    assert_eq!(result.available_times, vec![8, 10, 11]);
}

#[tokio::test]
async fn day_schedule_past_date_is_empty() {
    let engine = new_engine("day_past.wal");
    let id = register(&engine, "ada").await;
    engine
        .replace_intervals(id, vec![WeeklyInterval::new(1, 480, 720)])
        .await
        .unwrap();

    // 2000-01-03 was a Monday, long gone
    let past_monday = NaiveDate::from_ymd_opt(2000, 1, 3).unwrap();
    let result = engine.day_schedule("ada", past_monday).await.unwrap();
    assert!(result.possible_times.is_empty());
    assert!(result.available_times.is_empty());
}

#[tokio::test]
async fn day_schedule_unconfigured_weekday_is_empty() {
    let engine = new_engine("day_unconfigured.wal");
    let id = register(&engine, "ada").await;
    engine
        .replace_intervals(id, vec![WeeklyInterval::new(1, 480, 720)])
        .await
        .unwrap();

    let result = engine.day_schedule("ada", future_date(3)).await.unwrap();
    assert!(result.possible_times.is_empty());
}

#[tokio::test]
async fn day_schedule_unknown_user_is_client_error() {
    let engine = new_engine("day_unknown.wal");
    let result = engine.day_schedule("ghost", future_date(1)).await;
    assert!(matches!(result, Err(EngineError::UnknownUser(_))));
}

// ── Bookings ─────────────────────────────────────────────

#[tokio::test]
async fn booking_conflict_rejected() {
    let engine = new_engine("booking_conflict.wal");
    let id = register(&engine, "ada").await;
    engine
        .replace_intervals(id, vec![WeeklyInterval::new(1, 480, 720)])
        .await
        .unwrap();

    let slot = slot_instant(future_date(1), 9);
    let first = book(&engine, id, slot).await.unwrap();
    let result = book(&engine, id, slot).await;
    assert!(matches!(result, Err(EngineError::SlotTaken(taken)) if taken == first));
}

#[tokio::test]
async fn booking_outside_availability_rejected() {
    let engine = new_engine("booking_outside.wal");
    let id = register(&engine, "ada").await;
    engine
        .replace_intervals(id, vec![WeeklyInterval::new(1, 480, 720)])
        .await
        .unwrap();

    // 13:00 is past the 12:00 window end
    let result = book(&engine, id, slot_instant(future_date(1), 13)).await;
    assert!(matches!(result, Err(EngineError::OutsideAvailability(_))));

    // Wednesday has no rule at all
    let result = book(&engine, id, slot_instant(future_date(3), 9)).await;
    assert!(matches!(result, Err(EngineError::OutsideAvailability(_))));
}

#[tokio::test]
async fn booking_in_past_rejected() {
    let engine = new_engine("booking_past.wal");
    let id = register(&engine, "ada").await;
    engine
        .replace_intervals(id, vec![WeeklyInterval::new(1, 480, 720)])
        .await
        .unwrap();

    let past_monday = NaiveDate::from_ymd_opt(2000, 1, 3).unwrap();
    let result = book(&engine, id, slot_instant(past_monday, 9)).await;
    assert!(matches!(result, Err(EngineError::SlotInPast(_))));
}

#[tokio::test]
async fn booking_truncated_to_hour() {
    let engine = new_engine("booking_truncate.wal");
    let id = register(&engine, "ada").await;
    engine
        .replace_intervals(id, vec![WeeklyInterval::new(1, 480, 720)])
        .await
        .unwrap();

    let monday = future_date(1);
    // 9:40 books the 9:00 slot
    book(&engine, id, slot_instant(monday, 9) + 40 * 60_000)
        .await
        .unwrap();

    let bookings = engine.get_bookings("ada", None, None).await.unwrap();
    assert_eq!(bookings.len(), 1);
    assert_eq!(bookings[0].starts_at, slot_instant(monday, 9));

    // 9:10 now collides with the same slot
    let result = book(&engine, id, slot_instant(monday, 9) + 10 * 60_000).await;
    assert!(matches!(result, Err(EngineError::SlotTaken(_))));
}

#[tokio::test]
async fn booking_unknown_user_rejected() {
    let engine = new_engine("booking_unknown.wal");
    let result = book(&engine, Ulid::new(), slot_instant(future_date(1), 9)).await;
    assert!(matches!(result, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn booking_contact_validated() {
    let engine = new_engine("booking_contact.wal");
    let id = register(&engine, "ada").await;
    engine
        .replace_intervals(id, vec![WeeklyInterval::new(1, 480, 720)])
        .await
        .unwrap();
    let slot = slot_instant(future_date(1), 9);

    let result = engine
        .create_booking(Ulid::new(), id, slot, "".into(), "g@e.com".into(), None)
        .await;
    assert!(matches!(result, Err(EngineError::InvalidContact(_))));

    let result = engine
        .create_booking(Ulid::new(), id, slot, "Grace".into(), "no-at-sign".into(), None)
        .await;
    assert!(matches!(result, Err(EngineError::InvalidContact(_))));
}

#[tokio::test]
async fn booking_timestamp_range_checked() {
    let engine = new_engine("booking_ts_range.wal");
    let id = register(&engine, "ada").await;
    let result = book(&engine, id, -5).await;
    assert!(matches!(result, Err(EngineError::LimitExceeded(_))));
    let result = book(&engine, id, MAX_VALID_TIMESTAMP_MS + 1).await;
    assert!(matches!(result, Err(EngineError::LimitExceeded(_))));
}

#[tokio::test]
async fn get_bookings_range_is_inclusive() {
    let engine = new_engine("bookings_range.wal");
    let id = register(&engine, "ada").await;
    engine
        .replace_intervals(id, vec![WeeklyInterval::new(1, 480, 720)])
        .await
        .unwrap();

    let monday = future_date(1);
    book(&engine, id, slot_instant(monday, 8)).await.unwrap();
    book(&engine, id, slot_instant(monday, 9)).await.unwrap();
    book(&engine, id, slot_instant(monday, 11)).await.unwrap();

    let hits = engine
        .get_bookings(
            "ada",
            Some(slot_instant(monday, 9)),
            Some(slot_instant(monday, 11)),
        )
        .await
        .unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].starts_at, slot_instant(monday, 9));
    assert_eq!(hits[1].starts_at, slot_instant(monday, 11));
}

#[tokio::test]
async fn get_bookings_range_too_wide_rejected() {
    let engine = new_engine("bookings_wide.wal");
    register(&engine, "ada").await;
    let result = engine
        .get_bookings("ada", Some(0), Some(MAX_BOOKING_RANGE_MS + 1))
        .await;
    assert!(matches!(result, Err(EngineError::LimitExceeded(_))));
}

// ── Month schedule ───────────────────────────────────────

#[tokio::test]
async fn month_schedule_complements_weekdays() {
    let engine = new_engine("month_weekdays.wal");
    let id = register(&engine, "ada").await;
    engine
        .replace_intervals(id, vec![WeeklyInterval::new(1, 480, 720)])
        .await
        .unwrap();

    let schedule = engine.month_schedule("ada", 2099, 1).await.unwrap();
    assert_eq!(schedule.blocked_week_days, vec![0, 2, 3, 4, 5, 6]);
    assert_eq!(schedule.blocked_week_days.len(), 6);
}

#[tokio::test]
async fn month_schedule_reports_fully_booked_days() {
    let engine = new_engine("month_booked.wal");
    let id = register(&engine, "ada").await;
    // Two slots per Monday: 8 and 9
    engine
        .replace_intervals(id, vec![WeeklyInterval::new(1, 480, 600)])
        .await
        .unwrap();

    let monday = future_date(1);
    book(&engine, id, slot_instant(monday, 8)).await.unwrap();
    book(&engine, id, slot_instant(monday, 9)).await.unwrap();

    // A partially booked later Monday
    let next_monday = monday
        .checked_add_days(chrono::Days::new(7))
        .unwrap();
    book(&engine, id, slot_instant(next_monday, 8)).await.unwrap();

    let schedule = engine
        .month_schedule("ada", monday.year(), monday.month())
        .await
        .unwrap();
    assert!(schedule.blocked_dates.contains(&(monday.day() as u8)));
    assert!(!schedule.blocked_dates.contains(&(next_monday.day() as u8)));
}

#[tokio::test]
async fn month_schedule_unknown_user_is_client_error() {
    let engine = new_engine("month_unknown.wal");
    let result = engine.month_schedule("ghost", 2099, 1).await;
    assert!(matches!(result, Err(EngineError::UnknownUser(_))));
}

#[tokio::test]
async fn month_schedule_bad_month_rejected() {
    let engine = new_engine("month_bad.wal");
    register(&engine, "ada").await;
    let result = engine.month_schedule("ada", 2099, 13).await;
    assert!(matches!(result, Err(EngineError::LimitExceeded(_))));
}

// ── Persistence ──────────────────────────────────────────

#[tokio::test]
async fn wal_replay_restores_state() {
    let path = test_wal_path("replay_restore.wal");
    let monday = future_date(1);
    let id;
    {
        let engine = Engine::new(path.clone(), Arc::new(NotifyHub::new())).unwrap();
        id = Ulid::new();
        engine
            .register_user(id, "ada".into(), "Ada".into(), Some("bio".into()))
            .await
            .unwrap();
        engine
            .replace_intervals(id, vec![WeeklyInterval::new(1, 480, 720)])
            .await
            .unwrap();
        engine
            .create_booking(
                Ulid::new(),
                id,
                slot_instant(monday, 9),
                "Grace".into(),
                "grace@example.com".into(),
                Some("notes".into()),
            )
            .await
            .unwrap();
    }

    let engine = Engine::new(path, Arc::new(NotifyHub::new())).unwrap();
    assert_eq!(engine.user_id_for("ada"), Some(id));

    let users = engine.list_users().await;
    assert_eq!(users[0].bio.as_deref(), Some("bio"));

    let result = engine.day_schedule("ada", monday).await.unwrap();
    assert_eq!(result.possible_times, vec![8, 9, 10, 11]);
    assert_eq!(result.available_times, vec![8, 10, 11]);

    let bookings = engine.get_bookings("ada", None, None).await.unwrap();
    assert_eq!(bookings.len(), 1);
    assert_eq!(bookings[0].notes.as_deref(), Some("notes"));
}

#[tokio::test]
async fn wal_replay_applies_wholesale_replacement() {
    let path = test_wal_path("replay_wholesale.wal");
    {
        let engine = Engine::new(path.clone(), Arc::new(NotifyHub::new())).unwrap();
        let id = Ulid::new();
        engine
            .register_user(id, "ada".into(), "Ada".into(), None)
            .await
            .unwrap();
        engine
            .replace_intervals(id, vec![WeeklyInterval::new(1, 480, 720)])
            .await
            .unwrap();
        engine
            .replace_intervals(id, vec![WeeklyInterval::new(5, 600, 660)])
            .await
            .unwrap();
    }

    let engine = Engine::new(path, Arc::new(NotifyHub::new())).unwrap();
    let intervals = engine.get_intervals("ada").await.unwrap();
    assert_eq!(intervals.len(), 1);
    assert_eq!(intervals[0].weekday, 5);
}

#[tokio::test]
async fn compaction_preserves_state() {
    let path = test_wal_path("compact_state.wal");
    let monday = future_date(1);
    {
        let engine = Engine::new(path.clone(), Arc::new(NotifyHub::new())).unwrap();
        let id = Ulid::new();
        engine
            .register_user(id, "ada".into(), "Ada".into(), None)
            .await
            .unwrap();
        // Churn the interval set to give compaction something to fold away
        for _ in 0..20 {
            engine
                .replace_intervals(id, vec![WeeklyInterval::new(2, 540, 1020)])
                .await
                .unwrap();
        }
        engine
            .replace_intervals(id, vec![WeeklyInterval::new(1, 480, 720)])
            .await
            .unwrap();
        engine
            .create_booking(
                Ulid::new(),
                id,
                slot_instant(monday, 9),
                "Grace".into(),
                "grace@example.com".into(),
                None,
            )
            .await
            .unwrap();

        let before = std::fs::metadata(&path).unwrap().len();
        engine.compact_wal().await.unwrap();
        let after = std::fs::metadata(&path).unwrap().len();
        assert!(after < before, "compacted WAL should shrink: {after} < {before}");
        assert_eq!(engine.wal_appends_since_compact().await, 0);
    }

    let engine = Engine::new(path, Arc::new(NotifyHub::new())).unwrap();
    let result = engine.day_schedule("ada", monday).await.unwrap();
    assert_eq!(result.possible_times, vec![8, 9, 10, 11]);
    assert_eq!(result.available_times, vec![8, 10, 11]);
}

// ── Notifications ────────────────────────────────────────

#[tokio::test]
async fn subscribers_see_committed_bookings() {
    let engine = new_engine("notify_booking.wal");
    let id = register(&engine, "ada").await;
    engine
        .replace_intervals(id, vec![WeeklyInterval::new(1, 480, 720)])
        .await
        .unwrap();

    let mut rx = engine.notify.subscribe(id);
    // Drain nothing — subscription starts after the interval replace
    let slot = slot_instant(future_date(1), 9);
    let booking_id = book(&engine, id, slot).await.unwrap();

    let event = rx.recv().await.unwrap();
    match event {
        Event::BookingCreated { id: bid, user_id, starts_at, .. } => {
            assert_eq!(bid, booking_id);
            assert_eq!(user_id, id);
            assert_eq!(starts_at, slot);
        }
        other => panic!("expected BookingCreated, got {other:?}"),
    }
}

// ── Limits ───────────────────────────────────────────────

#[tokio::test]
async fn profile_field_limits_enforced() {
    let engine = new_engine("profile_limits.wal");
    let result = engine
        .register_user(Ulid::new(), "ada".into(), "x".repeat(MAX_NAME_LEN + 1), None)
        .await;
    assert!(matches!(result, Err(EngineError::LimitExceeded(_))));

    let result = engine
        .register_user(
            Ulid::new(),
            "ada".into(),
            "Ada".into(),
            Some("x".repeat(MAX_BIO_LEN + 1)),
        )
        .await;
    assert!(matches!(result, Err(EngineError::LimitExceeded(_))));
}
