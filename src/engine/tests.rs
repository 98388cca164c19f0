use super::*;
use crate::limits::*;
use chrono::{NaiveDate, TimeDelta};

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("roombook_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn at(h: u32, m: u32) -> LocalTime {
    NaiveDate::from_ymd_opt(2026, 10, 19)
        .unwrap()
        .and_hms_opt(h, m, 0)
        .unwrap()
}

fn room(name: &str) -> Room {
    Room::new(Ulid::new(), name, Some("studierum"))
}

fn booking(room_id: Ulid, start: LocalTime, end: LocalTime) -> Booking {
    Booking {
        id: Ulid::new(),
        room_id,
        user_id: Some(Ulid::new()),
        span: Span::new(start, end),
        title: None,
        parent_repeating_id: None,
        kind: BookingKind::Normal,
    }
}

fn series(room_id: Ulid) -> RecurringSeries {
    RecurringSeries {
        id: Ulid::new(),
        room_id,
        title: "Algebra".into(),
        start_time: at(10, 0).time(),
        end_time: at(12, 0).time(),
        recurrence_type: RecurrenceType::Weekly,
        start_date: at(0, 0).date(),
        recurrence_end_date: at(0, 0).date() + TimeDelta::days(28),
        is_active: true,
        created_by: Ulid::new(),
        created_at: at(7, 0),
    }
}

// ── Rooms ────────────────────────────────────────────────

#[tokio::test]
async fn create_and_get_room() {
    let engine = Engine::new(test_wal_path("create_room.wal")).unwrap();
    let r = room("S1");
    engine.create_room(r.clone()).await.unwrap();
    assert_eq!(engine.get_room(&r.id).await, Some(r.clone()));
    assert!(matches!(
        engine.create_room(r.clone()).await,
        Err(EngineError::AlreadyExists(id)) if id == r.id
    ));
}

#[tokio::test]
async fn save_room_upserts() {
    let engine = Engine::new(test_wal_path("save_room.wal")).unwrap();
    let mut r = room("S1");
    assert!(engine.save_room(r.clone()).await.unwrap());
    engine
        .insert_booking(booking(r.id, at(10, 0), at(11, 0)))
        .await
        .unwrap();

    r.capacity = 12;
    r.is_closed = true;
    assert!(!engine.save_room(r.clone()).await.unwrap());
    assert_eq!(engine.get_room(&r.id).await, Some(r.clone()));
    // Bookings survive an update.
    assert_eq!(engine.room_bookings(&r.id).await.len(), 1);
}

#[tokio::test]
async fn update_unknown_room_is_not_found() {
    let engine = Engine::new(test_wal_path("update_unknown.wal")).unwrap();
    let r = room("ghost");
    assert!(matches!(
        engine.update_room(r).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn room_name_too_long() {
    let engine = Engine::new(test_wal_path("room_name_long.wal")).unwrap();
    let r = room(&"x".repeat(MAX_NAME_LEN + 1));
    assert!(matches!(
        engine.create_room(r).await,
        Err(EngineError::LimitExceeded(_))
    ));
}

#[tokio::test]
async fn delete_room_cascades() {
    let engine = Engine::new(test_wal_path("delete_room.wal")).unwrap();
    let r = room("S1");
    engine.create_room(r.clone()).await.unwrap();
    let b = booking(r.id, at(10, 0), at(11, 0));
    engine.insert_booking(b.clone()).await.unwrap();
    let s = series(r.id);
    engine.create_series(s.clone()).await.unwrap();

    let removed = engine.delete_room(r.id).await.unwrap();
    assert_eq!(removed.id, r.id);
    assert!(engine.get_room(&r.id).await.is_none());
    assert!(engine.get_booking(&b.id).await.is_none());
    assert!(engine.room_for_booking(&b.id).is_none());
    assert!(engine.get_series(&s.id).is_none());
    assert!(matches!(
        engine.delete_room(r.id).await,
        Err(EngineError::NotFound(_))
    ));
}

// ── Users ────────────────────────────────────────────────

#[tokio::test]
async fn users_are_upserted_and_unique_by_name() {
    let engine = Engine::new(test_wal_path("users.wal")).unwrap();
    let alice = UserAccount {
        id: Ulid::new(),
        name: "alice".into(),
        role: Role::Student,
    };
    assert!(engine.save_user(alice.clone()).await.unwrap());
    let promoted = UserAccount {
        role: Role::Teacher,
        ..alice.clone()
    };
    assert!(!engine.save_user(promoted.clone()).await.unwrap());
    assert_eq!(engine.find_user_by_name("alice"), Some(promoted));

    let impostor = UserAccount {
        id: Ulid::new(),
        name: "alice".into(),
        role: Role::Admin,
    };
    assert!(matches!(
        engine.save_user(impostor).await,
        Err(EngineError::AlreadyExists(id)) if id == alice.id
    ));
}

#[tokio::test]
async fn user_with_bookings_cannot_be_deleted() {
    let engine = Engine::new(test_wal_path("user_in_use.wal")).unwrap();
    let r = room("S1");
    engine.create_room(r.clone()).await.unwrap();
    let user = UserAccount {
        id: Ulid::new(),
        name: "bob".into(),
        role: Role::Student,
    };
    engine.save_user(user.clone()).await.unwrap();
    let b = Booking {
        user_id: Some(user.id),
        ..booking(r.id, at(10, 0), at(11, 0))
    };
    engine.insert_booking(b.clone()).await.unwrap();

    assert!(matches!(
        engine.delete_user(user.id).await,
        Err(EngineError::InUse(_))
    ));
    engine.cancel_booking(b.id).await.unwrap();
    engine.delete_user(user.id).await.unwrap();
    assert!(engine.get_user(&user.id).is_none());
}

// ── Bookings ─────────────────────────────────────────────

#[tokio::test]
async fn overlapping_insert_is_refused() {
    let engine = Engine::new(test_wal_path("overlap.wal")).unwrap();
    let r = room("S1");
    engine.create_room(r.clone()).await.unwrap();
    let first = booking(r.id, at(10, 0), at(11, 0));
    engine.insert_booking(first.clone()).await.unwrap();

    let result = engine
        .insert_booking(booking(r.id, at(10, 30), at(11, 30)))
        .await;
    match result {
        Err(EngineError::Conflict { booking_id, span }) => {
            assert_eq!(booking_id, first.id);
            assert_eq!(span, first.span);
        }
        other => panic!("expected conflict, got {other:?}"),
    }

    // Touching intervals are fine.
    engine
        .insert_booking(booking(r.id, at(11, 0), at(12, 0)))
        .await
        .unwrap();
    engine
        .insert_booking(booking(r.id, at(9, 0), at(10, 0)))
        .await
        .unwrap();
    let starts: Vec<_> = engine
        .room_bookings(&r.id)
        .await
        .iter()
        .map(|b| b.span.start)
        .collect();
    assert_eq!(starts, vec![at(9, 0), at(10, 0), at(11, 0)]);
}

#[tokio::test]
async fn same_slot_in_other_room_is_fine() {
    let engine = Engine::new(test_wal_path("other_room.wal")).unwrap();
    let a = room("S1");
    let b = room("S2");
    engine.create_room(a.clone()).await.unwrap();
    engine.create_room(b.clone()).await.unwrap();
    engine
        .insert_booking(booking(a.id, at(10, 0), at(11, 0)))
        .await
        .unwrap();
    engine
        .insert_booking(booking(b.id, at(10, 0), at(11, 0)))
        .await
        .unwrap();
}

#[tokio::test]
async fn insert_into_unknown_room() {
    let engine = Engine::new(test_wal_path("unknown_room.wal")).unwrap();
    let result = engine
        .insert_booking(booking(Ulid::new(), at(10, 0), at(11, 0)))
        .await;
    assert!(matches!(result, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn duplicate_booking_id_is_refused() {
    let engine = Engine::new(test_wal_path("dup_booking.wal")).unwrap();
    let r = room("S1");
    engine.create_room(r.clone()).await.unwrap();
    let b = booking(r.id, at(10, 0), at(11, 0));
    engine.insert_booking(b.clone()).await.unwrap();
    let moved = Booking {
        span: Span::new(at(13, 0), at(14, 0)),
        ..b.clone()
    };
    assert!(matches!(
        engine.insert_booking(moved).await,
        Err(EngineError::AlreadyExists(_))
    ));
}

#[tokio::test]
async fn title_too_long() {
    let engine = Engine::new(test_wal_path("title_long.wal")).unwrap();
    let r = room("S1");
    engine.create_room(r.clone()).await.unwrap();
    let b = Booking {
        title: Some("t".repeat(MAX_TITLE_LEN + 1)),
        ..booking(r.id, at(10, 0), at(11, 0))
    };
    assert!(matches!(
        engine.insert_booking(b).await,
        Err(EngineError::LimitExceeded(_))
    ));
}

#[tokio::test]
async fn batch_insert_is_all_or_nothing() {
    let engine = Engine::new(test_wal_path("batch.wal")).unwrap();
    let a = room("S1");
    let b = room("S2");
    engine.create_room(a.clone()).await.unwrap();
    engine.create_room(b.clone()).await.unwrap();
    engine
        .insert_booking(booking(b.id, at(12, 0), at(13, 0)))
        .await
        .unwrap();

    // Second entry clashes with a committed booking in room b.
    let batch = vec![
        booking(a.id, at(10, 0), at(11, 0)),
        booking(b.id, at(12, 30), at(13, 30)),
    ];
    assert!(matches!(
        engine.insert_bookings(batch).await,
        Err(EngineError::Conflict { .. })
    ));
    assert!(engine.room_bookings(&a.id).await.is_empty());

    // Entries clash with each other.
    let first = booking(a.id, at(10, 0), at(11, 0));
    let batch = vec![first.clone(), booking(a.id, at(10, 45), at(11, 15))];
    match engine.insert_bookings(batch).await {
        Err(EngineError::Conflict { booking_id, .. }) => assert_eq!(booking_id, first.id),
        other => panic!("expected intra-batch conflict, got {other:?}"),
    }
    assert!(engine.room_bookings(&a.id).await.is_empty());

    let batch = vec![
        booking(a.id, at(10, 0), at(11, 0)),
        booking(a.id, at(11, 0), at(12, 0)),
        booking(b.id, at(8, 0), at(9, 0)),
    ];
    engine.insert_bookings(batch).await.unwrap();
    assert_eq!(engine.room_bookings(&a.id).await.len(), 2);
    assert_eq!(engine.room_bookings(&b.id).await.len(), 2);
}

#[tokio::test]
async fn batch_too_large() {
    let engine = Engine::new(test_wal_path("batch_large.wal")).unwrap();
    let r = room("S1");
    engine.create_room(r.clone()).await.unwrap();
    let batch: Vec<_> = (0..=MAX_BATCH_SIZE)
        .map(|_| booking(r.id, at(10, 0), at(11, 0)))
        .collect();
    assert!(matches!(
        engine.insert_bookings(batch).await,
        Err(EngineError::LimitExceeded(_))
    ));
}

#[tokio::test]
async fn cancel_booking_frees_slot() {
    let engine = Engine::new(test_wal_path("cancel.wal")).unwrap();
    let r = room("S1");
    engine.create_room(r.clone()).await.unwrap();
    let b = booking(r.id, at(10, 0), at(11, 0));
    engine.insert_booking(b.clone()).await.unwrap();

    assert_eq!(engine.cancel_booking(b.id).await.unwrap(), b);
    assert!(matches!(
        engine.cancel_booking(b.id).await,
        Err(EngineError::NotFound(_))
    ));
    engine
        .insert_booking(booking(r.id, at(10, 0), at(11, 0)))
        .await
        .unwrap();
}

#[tokio::test]
async fn user_bookings_filters_by_end() {
    let engine = Engine::new(test_wal_path("user_bookings.wal")).unwrap();
    let r = room("S1");
    engine.create_room(r.clone()).await.unwrap();
    let owner = Ulid::new();
    for (s, e) in [(8, 9), (10, 11), (12, 13)] {
        let b = Booking {
            user_id: Some(owner),
            ..booking(r.id, at(s, 0), at(e, 0))
        };
        engine.insert_booking(b).await.unwrap();
    }
    engine
        .insert_booking(booking(r.id, at(14, 0), at(15, 0)))
        .await
        .unwrap();

    assert_eq!(engine.user_bookings(&owner, None).await.len(), 3);
    // A booking in progress still counts.
    assert_eq!(engine.user_bookings(&owner, Some(at(10, 30))).await.len(), 2);
    assert!(engine.user_bookings(&owner, Some(at(13, 0))).await.is_empty());
}

#[tokio::test]
async fn concurrent_inserts_for_one_slot_have_one_winner() {
    let engine = Arc::new(Engine::new(test_wal_path("race.wal")).unwrap());
    let r = room("S1");
    engine.create_room(r.clone()).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..16 {
        let engine = engine.clone();
        let room_id = r.id;
        handles.push(tokio::spawn(async move {
            engine
                .insert_booking(booking(room_id, at(10, 0), at(11, 0)))
                .await
        }));
    }
    let mut wins = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(()) => wins += 1,
            Err(EngineError::Conflict { .. }) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(wins, 1);
    assert_eq!(engine.room_bookings(&r.id).await.len(), 1);
}

// ── Series ───────────────────────────────────────────────

#[tokio::test]
async fn series_delete_cascades_to_generated_bookings() {
    let engine = Engine::new(test_wal_path("series_cascade.wal")).unwrap();
    let r = room("K1");
    engine.create_room(r.clone()).await.unwrap();
    let s = series(r.id);
    engine.create_series(s.clone()).await.unwrap();
    assert!(matches!(
        engine.create_series(s.clone()).await,
        Err(EngineError::AlreadyExists(_))
    ));

    let generated: Vec<Booking> = (0..3)
        .map(|w| Booking {
            parent_repeating_id: Some(s.id),
            ..booking(
                r.id,
                at(10, 0) + TimeDelta::weeks(w),
                at(12, 0) + TimeDelta::weeks(w),
            )
        })
        .collect();
    engine.insert_bookings(generated).await.unwrap();
    let single = booking(r.id, at(13, 0), at(14, 0));
    engine.insert_booking(single.clone()).await.unwrap();

    let listed = engine.list_series(Some(r.id)).await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].booking_count, 3);

    assert_eq!(engine.delete_series(s.id).await.unwrap().id, s.id);
    assert_eq!(engine.room_bookings(&r.id).await, vec![single]);
    assert!(engine.list_series(None).await.is_empty());
}

#[tokio::test]
async fn cancel_series_bookings_keeps_series() {
    let engine = Engine::new(test_wal_path("series_cancel.wal")).unwrap();
    let r = room("K1");
    engine.create_room(r.clone()).await.unwrap();
    let s = series(r.id);
    engine.create_series(s.clone()).await.unwrap();
    let b = Booking {
        parent_repeating_id: Some(s.id),
        ..booking(r.id, at(10, 0), at(12, 0))
    };
    engine.insert_booking(b.clone()).await.unwrap();

    assert_eq!(engine.cancel_series_bookings(s.id).await.unwrap(), vec![b.id]);
    assert!(engine.room_bookings(&r.id).await.is_empty());
    assert_eq!(engine.list_series(None).await[0].booking_count, 0);
}

#[tokio::test]
async fn series_bookings_skip_taken_slots() {
    let engine = Engine::new(test_wal_path("series_skip.wal")).unwrap();
    let r = room("K1");
    engine.create_room(r.clone()).await.unwrap();
    let s = series(r.id);
    engine.create_series(s.clone()).await.unwrap();
    let taken = booking(r.id, at(11, 0) + TimeDelta::weeks(1), at(13, 0) + TimeDelta::weeks(1));
    engine.insert_booking(taken.clone()).await.unwrap();

    let generated: Vec<Booking> = (0..3)
        .map(|w| Booking {
            parent_repeating_id: Some(s.id),
            ..booking(
                r.id,
                at(10, 0) + TimeDelta::weeks(w),
                at(12, 0) + TimeDelta::weeks(w),
            )
        })
        .collect();
    let left_out = engine
        .insert_series_bookings(s.id, generated.clone())
        .await
        .unwrap();
    assert_eq!(left_out, vec![(generated[1].clone(), taken.clone())]);
    assert_eq!(engine.list_series(None).await[0].booking_count, 2);

    let stray = booking(Ulid::new(), at(14, 0), at(15, 0));
    assert!(matches!(
        engine.insert_series_bookings(s.id, vec![stray]).await,
        Err(EngineError::NotFound(_))
    ));
    assert!(matches!(
        engine.insert_series_bookings(Ulid::new(), Vec::new()).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn series_for_unknown_room() {
    let engine = Engine::new(test_wal_path("series_unknown_room.wal")).unwrap();
    assert!(matches!(
        engine.create_series(series(Ulid::new())).await,
        Err(EngineError::NotFound(_))
    ));
}

// ── Availability ─────────────────────────────────────────

#[tokio::test]
async fn availability_subtracts_bookings() {
    let engine = Engine::new(test_wal_path("availability.wal")).unwrap();
    let r = room("S1");
    engine.create_room(r.clone()).await.unwrap();
    engine
        .insert_booking(booking(r.id, at(9, 0), at(10, 0)))
        .await
        .unwrap();
    engine
        .insert_booking(booking(r.id, at(10, 0), at(10, 30)))
        .await
        .unwrap();
    engine
        .insert_booking(booking(r.id, at(14, 0), at(15, 0)))
        .await
        .unwrap();

    let window = Span::new(at(8, 0), at(16, 0));
    let free = engine.availability(r.id, window, None).await.unwrap();
    assert_eq!(
        free,
        vec![
            Span::new(at(8, 0), at(9, 0)),
            Span::new(at(10, 30), at(14, 0)),
            Span::new(at(15, 0), at(16, 0)),
        ]
    );

    let long = engine
        .availability(r.id, window, Some(TimeDelta::hours(2)))
        .await
        .unwrap();
    assert_eq!(long, vec![Span::new(at(10, 30), at(14, 0))]);

    assert!(matches!(
        engine.availability(Ulid::new(), window, None).await,
        Err(EngineError::NotFound(_))
    ));
}

// ── WAL replay & compaction ──────────────────────────────

#[tokio::test]
async fn state_survives_restart() {
    let path = test_wal_path("replay.wal");
    let r = room("S1");
    let kept = booking(r.id, at(10, 0), at(11, 0));
    let user = UserAccount {
        id: Ulid::new(),
        name: "carol".into(),
        role: Role::Admin,
    };
    let s = series(r.id);
    {
        let engine = Engine::new(path.clone()).unwrap();
        engine.save_user(user.clone()).await.unwrap();
        engine.create_room(r.clone()).await.unwrap();
        engine.insert_booking(kept.clone()).await.unwrap();
        let gone = booking(r.id, at(12, 0), at(13, 0));
        engine.insert_booking(gone.clone()).await.unwrap();
        engine.cancel_booking(gone.id).await.unwrap();
        engine.create_series(s.clone()).await.unwrap();
    }

    let engine = Engine::new(path).unwrap();
    assert_eq!(engine.list_users(), vec![user]);
    assert_eq!(engine.get_room(&r.id).await, Some(r.clone()));
    assert_eq!(engine.room_bookings(&r.id).await, vec![kept.clone()]);
    assert_eq!(engine.room_for_booking(&kept.id), Some(r.id));
    assert_eq!(engine.get_series(&s.id), Some(s));
}

#[tokio::test]
async fn room_delete_replays_as_cascade() {
    let path = test_wal_path("replay_room_delete.wal");
    let r = room("S1");
    let b = booking(r.id, at(10, 0), at(11, 0));
    {
        let engine = Engine::new(path.clone()).unwrap();
        engine.create_room(r.clone()).await.unwrap();
        engine.insert_booking(b.clone()).await.unwrap();
        engine.create_series(series(r.id)).await.unwrap();
        engine.delete_room(r.id).await.unwrap();
    }
    let engine = Engine::new(path).unwrap();
    assert!(engine.list_rooms().await.is_empty());
    assert!(engine.room_for_booking(&b.id).is_none());
    assert!(engine.list_series(None).await.is_empty());
}

#[tokio::test]
async fn compact_wal_preserves_state() {
    let path = test_wal_path("compact_state.wal");
    let r = room("S1");
    let kept = booking(r.id, at(10, 0), at(11, 0));
    let s = series(r.id);
    let generated = Booking {
        parent_repeating_id: Some(s.id),
        ..booking(r.id, at(12, 0), at(13, 0))
    };

    {
        let engine = Engine::new(path.clone()).unwrap();
        engine.create_room(r.clone()).await.unwrap();
        engine.insert_booking(kept.clone()).await.unwrap();
        engine.create_series(s.clone()).await.unwrap();
        engine.insert_booking(generated.clone()).await.unwrap();

        // Churn
        for _ in 0..20 {
            let tmp = booking(r.id, at(14, 0), at(15, 0));
            engine.insert_booking(tmp.clone()).await.unwrap();
            engine.cancel_booking(tmp.id).await.unwrap();
        }
        assert!(engine.wal_appends_since_compact().await >= 44);

        let size_before = std::fs::metadata(&path).unwrap().len();
        engine.compact_wal().await.unwrap();
        let size_after = std::fs::metadata(&path).unwrap().len();
        assert!(
            size_after < size_before,
            "compacted WAL ({size_after}) should be smaller than before ({size_before})"
        );
        assert_eq!(engine.wal_appends_since_compact().await, 0);

        // Append after compaction
        engine
            .insert_booking(booking(r.id, at(15, 0), at(16, 0)))
            .await
            .unwrap();
    }

    let engine = Engine::new(path).unwrap();
    let bookings = engine.room_bookings(&r.id).await;
    assert_eq!(bookings.len(), 3);
    assert_eq!(bookings[0], kept);
    assert_eq!(bookings[1], generated);
    let listed = engine.list_series(None).await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].booking_count, 1);
}

// ── Group-commit WAL ─────────────────────────────────────

#[tokio::test]
async fn group_commit_concurrent_rooms() {
    let path = test_wal_path("group_commit.wal");
    let engine = Arc::new(Engine::new(path.clone()).unwrap());

    let mut handles = Vec::new();
    for i in 0..20 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let r = room(&format!("R{i}"));
            engine.create_room(r.clone()).await.unwrap();
            engine
                .insert_booking(booking(r.id, at(10, 0), at(11, 0)))
                .await
                .unwrap();
        }));
    }
    for h in handles {
        h.await.unwrap();
    }
    assert_eq!(engine.list_bookings().await.len(), 20);

    let replayed = crate::wal::Wal::replay(&path).unwrap();
    assert_eq!(replayed.len(), 40);
}
