use std::collections::BTreeSet;

use chrono::NaiveDate;

use super::*;
use crate::identity::user_id_for_email;
use crate::limits::*;

// ── Helpers ──────────────────────────────────────────────

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("deskbook_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    let _ = std::fs::remove_file(path.with_extension("wal.tmp"));
    path
}

const ROOT: &str = "root@example.com";

fn root() -> Uuid {
    user_id_for_email(ROOT)
}

fn engine_at(path: &PathBuf) -> Engine {
    Engine::new(path.clone(), HashSet::from([root()])).unwrap()
}

fn user(name: &str) -> Identity {
    let email = format!("{}@example.com", name.to_lowercase());
    Identity {
        user_id: user_id_for_email(&email),
        email,
        full_name: name.to_string(),
        avatar_url: None,
    }
}

fn city(slug: &str, capacity: u32, max_capacity: u32) -> City {
    City {
        slug: slug.to_string(),
        label: slug.to_uppercase(),
        capacity,
        max_capacity,
    }
}

fn date(d: u32) -> NaiveDate {
    // 2025-03-03 is a Monday
    NaiveDate::from_ymd_opt(2025, 3, d).unwrap()
}

/// Keeps successive bookings on distinct `created_at` stamps.
async fn tick() {
    tokio::time::sleep(std::time::Duration::from_millis(2)).await;
}

async fn engine_with_city(name: &str, capacity: u32, max_capacity: u32) -> Engine {
    let engine = engine_at(&test_wal_path(name));
    engine
        .create_city(root(), city("paris", capacity, max_capacity))
        .await
        .unwrap();
    engine
}

// ── Allocation order ─────────────────────────────────────

#[tokio::test]
async fn half_day_bookings_share_an_index() {
    let engine = engine_with_city("half_day.wal", 2, 4).await;
    let (a, b, c, d) = (user("Alice"), user("Bob"), user("Carol"), user("Dave"));

    engine.invite(&a, "paris", date(3), Period::Day, Guests::none()).await.unwrap();
    tick().await;
    engine.invite(&b, "paris", date(3), Period::Morning, Guests::none()).await.unwrap();
    tick().await;
    engine.invite(&c, "paris", date(3), Period::Afternoon, Guests::none()).await.unwrap();

    let view = engine.day_view(a.user_id, "paris", date(3)).await.unwrap();
    assert_eq!(view.occupancy, 2);
    assert!(!view.overflowing);
    assert!(!view.is_full);

    tick().await;
    engine.invite(&d, "paris", date(3), Period::Day, Guests::none()).await.unwrap();

    let view = engine.day_view(d.user_id, "paris", date(3)).await.unwrap();
    assert_eq!(view.occupancy, 3);
    assert!(view.overflowing);
    assert!(!view.is_full);

    let index_of = |id: Uuid| {
        view.bookings
            .day
            .iter()
            .chain(&view.bookings.morning)
            .chain(&view.bookings.afternoon)
            .find(|e| e.booking.booking.user_id == id)
            .map(|e| (e.booking.index, e.overflow))
            .unwrap()
    };
    assert_eq!(index_of(a.user_id), (1, false));
    assert_eq!(index_of(b.user_id), (2, false));
    assert_eq!(index_of(c.user_id), (2, false));
    assert_eq!(index_of(d.user_id), (3, true));

    assert_eq!(view.self_booking.map(|ib| ib.index), Some(3));
    assert_eq!(view.bookings.day.len(), 2);
    assert_eq!(view.bookings.morning.len(), 1);
    assert_eq!(view.bookings.afternoon.len(), 1);
}

#[tokio::test]
async fn day_view_resolves_profiles() {
    let engine = engine_with_city("view_profiles.wal", 5, 5).await;
    let mut alice = user("Alice");
    alice.avatar_url = Some("https://img.example.com/a.png".into());
    engine.invite(&alice, "paris", date(4), Period::Day, Guests::none()).await.unwrap();

    let view = engine.day_view(alice.user_id, "paris", date(4)).await.unwrap();
    let entry = &view.bookings.day[0];
    assert_eq!(entry.full_name.as_deref(), Some("Alice"));
    assert_eq!(entry.email.as_deref(), Some("alice@example.com"));
    assert_eq!(entry.avatar_url, alice.avatar_url);
    assert!(!view.viewer_is_admin);

    let root_view = engine.day_view(root(), "paris", date(4)).await.unwrap();
    assert!(root_view.viewer_is_admin);
    assert!(root_view.self_booking.is_none());
}

// ── Capacity gate ────────────────────────────────────────

#[tokio::test]
async fn hard_ceiling_rejects_booking() {
    let engine = engine_with_city("hard_ceiling.wal", 1, 2).await;
    engine.invite(&user("Alice"), "paris", date(5), Period::Day, Guests::none()).await.unwrap();
    engine.invite(&user("Bob"), "paris", date(5), Period::Day, Guests::none()).await.unwrap();

    let err = engine
        .invite(&user("Carol"), "paris", date(5), Period::Morning, Guests::none())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::CapacityExceeded {
            occupancy: 3,
            max_capacity: 2
        }
    ));
    assert_eq!(engine.get_bookings("paris", date(5)).await.unwrap().len(), 2);
    // the rejected caller still got a profile
    assert!(engine.get_profile_by_id(user("Carol").user_id).is_some());
}

#[tokio::test]
async fn guests_count_against_capacity() {
    let engine = engine_with_city("guests_capacity.wal", 2, 3).await;
    let guests = Guests {
        morning: 2,
        ..Guests::none()
    };
    engine.invite(&user("Alice"), "paris", date(5), Period::Day, guests).await.unwrap();

    // the afternoon still has room
    engine.invite(&user("Bob"), "paris", date(5), Period::Afternoon, Guests::none()).await.unwrap();
    let err = engine
        .invite(&user("Carol"), "paris", date(5), Period::Morning, Guests::none())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::CapacityExceeded { .. }));
}

#[tokio::test]
async fn too_many_guests_rejected() {
    let engine = engine_with_city("too_many_guests.wal", 50, 50).await;
    let guests = Guests {
        day: MAX_GUESTS_PER_PERIOD + 1,
        ..Guests::none()
    };
    let err = engine
        .invite(&user("Alice"), "paris", date(5), Period::Day, guests)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::LimitExceeded(_)));
}

#[tokio::test]
async fn rebooking_does_not_count_twice() {
    let engine = engine_with_city("rebook_capacity.wal", 1, 1).await;
    let alice = user("Alice");
    engine.invite(&alice, "paris", date(6), Period::Morning, Guests::none()).await.unwrap();
    // Alice's own row is replaced, so a full room still accepts her change.
    engine.invite(&alice, "paris", date(6), Period::Day, Guests::none()).await.unwrap();

    let rows = engine.get_bookings("paris", date(6)).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].period, Period::Day);
}

#[tokio::test]
async fn temp_capacity_caps_the_day() {
    let engine = engine_with_city("temp_capacity.wal", 2, 4).await;
    engine
        .create_notice(root(), "paris", date(7), "Half the floor is closed".into(), Some(1))
        .await
        .unwrap();

    engine.invite(&user("Alice"), "paris", date(7), Period::Day, Guests::none()).await.unwrap();
    let err = engine
        .invite(&user("Bob"), "paris", date(7), Period::Afternoon, Guests::none())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::CapacityExceeded {
            occupancy: 2,
            max_capacity: 1
        }
    ));

    // the next day is unaffected
    engine.invite(&user("Bob"), "paris", date(10), Period::Day, Guests::none()).await.unwrap();
    engine.invite(&user("Carol"), "paris", date(10), Period::Day, Guests::none()).await.unwrap();

    let view = engine.day_view(root(), "paris", date(7)).await.unwrap();
    assert_eq!(view.capacity, EffectiveCapacity { soft: 1, hard: 1 });
    assert_eq!(view.notice.as_deref(), Some("Half the floor is closed"));
    assert!(view.is_full);
}

#[tokio::test]
async fn temp_capacity_can_raise_the_ceiling() {
    let engine = engine_with_city("temp_raise.wal", 1, 1).await;
    engine
        .create_notice(root(), "paris", date(7), "Event day".into(), Some(3))
        .await
        .unwrap();
    for name in ["Alice", "Bob", "Carol"] {
        engine.invite(&user(name), "paris", date(7), Period::Day, Guests::none()).await.unwrap();
    }
    assert_eq!(engine.effective_capacity("paris", date(7)).await.unwrap().hard, 3);
}

#[tokio::test]
async fn notice_without_temp_capacity_keeps_limits() {
    let engine = engine_with_city("plain_notice.wal", 2, 4).await;
    engine
        .create_notice(root(), "paris", date(7), "Fire drill at 11".into(), None)
        .await
        .unwrap();
    assert_eq!(
        engine.effective_capacity("paris", date(7)).await.unwrap(),
        EffectiveCapacity { soft: 2, hard: 4 }
    );
}

#[tokio::test]
async fn nominal_capacity_never_blocks() {
    let engine = engine_with_city("soft_capacity.wal", 1, 3).await;
    for name in ["Alice", "Bob", "Carol"] {
        engine.invite(&user(name), "paris", date(3), Period::Day, Guests::none()).await.unwrap();
    }
    let view = engine.day_view(root(), "paris", date(3)).await.unwrap();
    assert_eq!(view.occupancy, 3);
    assert!(view.overflowing);
    assert!(view.is_full);
    let overflowing: Vec<bool> = view.bookings.day.iter().map(|e| e.overflow).collect();
    assert_eq!(overflowing, vec![false, true, true]);
}

// ── Upsert semantics ─────────────────────────────────────

#[tokio::test]
async fn rebooking_replaces_and_keeps_queue_position() {
    let engine = engine_with_city("rebook.wal", 2, 4).await;
    let (alice, bob) = (user("Alice"), user("Bob"));

    let first = engine.invite(&alice, "paris", date(3), Period::Morning, Guests::none()).await.unwrap();
    tick().await;
    engine.invite(&bob, "paris", date(3), Period::Day, Guests::none()).await.unwrap();
    tick().await;
    let guests = Guests {
        afternoon: 1,
        ..Guests::none()
    };
    let second = engine.invite(&alice, "paris", date(3), Period::Day, guests).await.unwrap();
    assert_eq!(second.created_at, first.created_at);

    let rows = engine.get_bookings("paris", date(3)).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].user_id, alice.user_id);
    assert_eq!(rows[0].period, Period::Day);
    assert_eq!(rows[0].guests, guests);
    assert_eq!(rows[1].user_id, bob.user_id);
}

#[tokio::test]
async fn book_for_moves_to_back_of_queue() {
    let engine = engine_with_city("book_for.wal", 2, 4).await;
    let (alice, bob) = (user("Alice"), user("Bob"));
    let guests = Guests {
        day: 1,
        ..Guests::none()
    };
    engine.invite(&alice, "paris", date(3), Period::Day, guests).await.unwrap();
    tick().await;
    engine.invite(&bob, "paris", date(3), Period::Day, Guests::none()).await.unwrap();
    tick().await;

    let target = BookingTarget {
        user_id: Some(alice.user_id),
        email: alice.email.clone(),
        full_name: alice.full_name.clone(),
    };
    let saved = engine
        .book_for(&bob, "paris", date(3), Period::Afternoon, target)
        .await
        .unwrap();
    assert_eq!(saved.booked_by, Some(bob.user_id));
    assert!(saved.guests.is_empty());

    let rows = engine.get_bookings("paris", date(3)).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].user_id, bob.user_id);
    assert_eq!(rows[1].user_id, alice.user_id);
    assert_eq!(rows[1].period, Period::Afternoon);
}

#[tokio::test]
async fn book_for_creates_placeholder_profile() {
    let engine = engine_with_city("book_for_profile.wal", 2, 4).await;
    let target = BookingTarget {
        user_id: None,
        email: "visitor@example.com".into(),
        full_name: "Visiting Vera".into(),
    };
    let saved = engine
        .book_for(&user("Alice"), "paris", date(3), Period::Day, target)
        .await
        .unwrap();
    assert_eq!(saved.user_id, user_id_for_email("visitor@example.com"));

    let profile = engine.get_profile_by_id(saved.user_id).unwrap();
    assert_eq!(profile.full_name, "Visiting Vera");
    assert_eq!(engine.find_profile("visitor@example.com"), Some(profile));
}

#[tokio::test]
async fn upsert_without_capacity_gate() {
    let engine = engine_with_city("upsert.wal", 1, 1).await;
    let alice = user("Alice");
    engine.invite(&alice, "paris", date(3), Period::Day, Guests::none()).await.unwrap();
    let bob = user("Bob");
    let saved = engine
        .upsert_booking(Booking {
            user_id: bob.user_id,
            city: "paris".into(),
            date: date(3),
            period: Period::Morning,
            guests: Guests::none(),
            booked_by: None,
            created_at: 0,
        })
        .await
        .unwrap();
    assert!(saved.created_at > 0);
    assert_eq!(engine.get_bookings("paris", date(3)).await.unwrap().len(), 2);
}

// ── Removal ──────────────────────────────────────────────

#[tokio::test]
async fn delete_missing_booking_is_ok() {
    let engine = engine_with_city("delete_missing.wal", 2, 4).await;
    let removed = engine
        .delete_booking("paris", date(3), user("Ghost").user_id)
        .await
        .unwrap();
    assert!(!removed);
}

#[tokio::test]
async fn remove_own_booking() {
    let engine = engine_with_city("remove_own.wal", 2, 4).await;
    let alice = user("Alice");
    engine.invite(&alice, "paris", date(3), Period::Day, Guests::none()).await.unwrap();
    assert!(engine.remove_booking(&alice, "paris", date(3), alice.user_id).await.unwrap());
    assert!(engine.get_bookings("paris", date(3)).await.unwrap().is_empty());
    assert!(!engine.remove_booking(&alice, "paris", date(3), alice.user_id).await.unwrap());
}

#[tokio::test]
async fn remove_other_booking_needs_city_admin() {
    let engine = engine_with_city("remove_other.wal", 2, 4).await;
    engine.create_city(root(), city("lyon", 2, 4)).await.unwrap();
    let (alice, bob, carol) = (user("Alice"), user("Bob"), user("Carol"));
    engine.invite(&alice, "paris", date(3), Period::Day, Guests::none()).await.unwrap();

    let err = engine
        .remove_booking(&bob, "paris", date(3), alice.user_id)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Forbidden(_)));

    // admin of another city only
    let lyon_only = AdminRole::Local {
        cities: BTreeSet::from(["lyon".to_string()]),
    };
    engine.create_admin(root(), carol.user_id, lyon_only).await.unwrap();
    assert!(engine.remove_booking(&carol, "paris", date(3), alice.user_id).await.is_err());

    let paris = AdminRole::Local {
        cities: BTreeSet::from(["paris".to_string()]),
    };
    engine.create_admin(root(), bob.user_id, paris).await.unwrap();
    assert!(engine.remove_booking(&bob, "paris", date(3), alice.user_id).await.unwrap());
}

// ── Cities & notices ─────────────────────────────────────

#[tokio::test]
async fn city_crud_permissions() {
    let engine = engine_at(&test_wal_path("city_perms.wal"));
    let alice = user("Alice");

    let err = engine.create_city(alice.user_id, city("paris", 2, 4)).await.unwrap_err();
    assert!(matches!(err, EngineError::Forbidden(_)));

    engine.create_city(root(), city("paris", 2, 4)).await.unwrap();
    let err = engine.create_city(root(), city("paris", 2, 4)).await.unwrap_err();
    assert!(matches!(err, EngineError::AlreadyExists(_)));

    let err = engine.update_city(alice.user_id, city("paris", 3, 5)).await.unwrap_err();
    assert!(matches!(err, EngineError::Forbidden(_)));

    let local = AdminRole::Local {
        cities: BTreeSet::from(["paris".to_string()]),
    };
    engine.create_admin(root(), alice.user_id, local).await.unwrap();
    engine.update_city(alice.user_id, city("paris", 3, 5)).await.unwrap();
    assert_eq!(engine.get_city("paris").await.unwrap().max_capacity, 5);

    // local admins can't delete
    let err = engine.delete_city(alice.user_id, "paris").await.unwrap_err();
    assert!(matches!(err, EngineError::Forbidden(_)));
}

#[tokio::test]
async fn city_validation() {
    let engine = engine_at(&test_wal_path("city_validation.wal"));
    let err = engine.create_city(root(), city("paris", 5, 4)).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
    let err = engine.create_city(root(), city("Paris Nord", 1, 4)).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
    let err = engine
        .create_city(root(), city("big", 1, MAX_CAPACITY + 1))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::LimitExceeded(_)));
    assert_eq!(engine.city_count(), 0);
}

#[tokio::test]
async fn cities_sorted_by_label() {
    let engine = engine_at(&test_wal_path("city_sort.wal"));
    for slug in ["nantes", "bordeaux", "lille"] {
        engine.create_city(root(), city(slug, 1, 1)).await.unwrap();
    }
    let slugs: Vec<String> = engine.get_cities().await.into_iter().map(|c| c.slug).collect();
    assert_eq!(slugs, vec!["bordeaux", "lille", "nantes"]);
}

#[tokio::test]
async fn delete_city_cascades() {
    let engine = engine_with_city("city_cascade.wal", 2, 4).await;
    engine.create_city(root(), city("lyon", 2, 4)).await.unwrap();
    let (alice, bob) = (user("Alice"), user("Bob"));

    engine.invite(&alice, "paris", date(3), Period::Day, Guests::none()).await.unwrap();
    engine.create_notice(root(), "paris", date(3), "Closed".into(), None).await.unwrap();
    engine
        .update_profile(
            alice.user_id,
            ProfileUpdate {
                favorite_city: Some(Some("paris".into())),
                ..ProfileUpdate::default()
            },
        )
        .await
        .unwrap();
    let both = AdminRole::Local {
        cities: BTreeSet::from(["paris".to_string(), "lyon".to_string()]),
    };
    engine.create_admin(root(), bob.user_id, both).await.unwrap();

    engine.delete_city(root(), "paris").await.unwrap();

    assert!(engine.get_city("paris").await.is_none());
    assert!(matches!(
        engine.get_bookings("paris", date(3)).await,
        Err(EngineError::NotFound(_))
    ));
    assert!(engine.get_my_bookings(alice.user_id, date(3)).await.is_empty());
    assert_eq!(engine.get_profile_by_id(alice.user_id).unwrap().favorite_city, None);
    assert!(!engine.is_user_admin(bob.user_id, "paris"));
    assert!(engine.is_user_admin(bob.user_id, "lyon"));

    // recreating the slug starts empty
    engine.create_city(root(), city("paris", 2, 4)).await.unwrap();
    assert!(engine.get_bookings("paris", date(3)).await.unwrap().is_empty());
    assert!(engine.get_notice("paris", date(3)).await.unwrap().is_none());
}

#[tokio::test]
async fn booking_unknown_city() {
    let engine = engine_at(&test_wal_path("unknown_city.wal"));
    let err = engine
        .invite(&user("Alice"), "atlantis", date(3), Period::Day, Guests::none())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

#[tokio::test]
async fn notices_crud() {
    let engine = engine_with_city("notices.wal", 2, 4).await;
    let alice = user("Alice");

    let err = engine
        .create_notice(alice.user_id, "paris", date(3), "hi".into(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Forbidden(_)));

    for d in [3, 5, 12] {
        engine
            .create_notice(root(), "paris", date(d), format!("notice {d}"), None)
            .await
            .unwrap();
    }
    // posting again replaces
    engine
        .create_notice(root(), "paris", date(5), "updated".into(), Some(1))
        .await
        .unwrap();

    let all = engine.get_notices("paris", date(3), None).await.unwrap();
    assert_eq!(all.len(), 3);
    let window = engine.get_notices("paris", date(4), Some(date(10))).await.unwrap();
    assert_eq!(window.len(), 1);
    assert_eq!(window[0].message, "updated");
    assert_eq!(window[0].temp_capacity, Some(1));

    assert!(engine.delete_notice(root(), "paris", date(5)).await.unwrap());
    assert!(!engine.delete_notice(root(), "paris", date(5)).await.unwrap());
    assert!(engine.get_notice("paris", date(5)).await.unwrap().is_none());
}

// ── Read models ──────────────────────────────────────────

#[tokio::test]
async fn calendar_covers_weekdays() {
    let engine = engine_with_city("calendar.wal", 2, 4).await;
    engine.invite(&user("Alice"), "paris", date(4), Period::Day, Guests::none()).await.unwrap();
    engine.invite(&user("Bob"), "paris", date(4), Period::Morning, Guests::none()).await.unwrap();
    engine
        .create_notice(root(), "paris", date(6), "Team lunch".into(), Some(10))
        .await
        .unwrap();

    // from a Wednesday: the window starts on that week's Monday
    let days = engine.calendar("paris", Some(date(5)), 2).await.unwrap();
    assert_eq!(days.len(), 10);
    assert_eq!(days[0].date, date(3));
    assert_eq!(days[9].date, date(14));

    assert_eq!(days[1].occupancy, 2);
    assert_eq!(days[1].bookings.len(), 2);
    assert_eq!(days[3].notice.as_deref(), Some("Team lunch"));
    assert_eq!(days[3].capacity.hard, 10);
    assert_eq!(days[0].occupancy, 0);

    // from a Saturday: next week
    let days = engine.calendar("paris", Some(date(8)), 1).await.unwrap();
    assert_eq!(days[0].date, date(10));

    let err = engine.calendar("paris", None, MAX_WEEKS + 1).await.unwrap_err();
    assert!(matches!(err, EngineError::LimitExceeded(_)));
}

#[tokio::test]
async fn my_bookings_span_cities_within_month() {
    let engine = engine_with_city("my_bookings.wal", 2, 4).await;
    engine.create_city(root(), city("lyon", 2, 4)).await.unwrap();
    let alice = user("Alice");

    engine.invite(&alice, "lyon", date(12), Period::Day, Guests::none()).await.unwrap();
    engine.invite(&alice, "paris", date(3), Period::Day, Guests::none()).await.unwrap();
    let april = NaiveDate::from_ymd_opt(2025, 4, 1).unwrap();
    engine.invite(&alice, "paris", april, Period::Day, Guests::none()).await.unwrap();
    engine.invite(&user("Bob"), "paris", date(3), Period::Day, Guests::none()).await.unwrap();

    let mine = engine.get_my_bookings(alice.user_id, date(20)).await;
    let seen: Vec<(&str, NaiveDate)> = mine.iter().map(|b| (b.city.as_str(), b.date)).collect();
    assert_eq!(seen, vec![("paris", date(3)), ("lyon", date(12))]);
}

#[tokio::test]
async fn bookings_range() {
    let engine = engine_with_city("range.wal", 2, 4).await;
    for d in [3, 4, 12] {
        engine.invite(&user("Alice"), "paris", date(d), Period::Day, Guests::none()).await.unwrap();
    }
    let rows = engine.get_bookings_range("paris", date(3), date(10)).await.unwrap();
    assert_eq!(rows.len(), 2);

    let err = engine.get_bookings_range("paris", date(10), date(3)).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

// ── Profiles ─────────────────────────────────────────────

#[tokio::test]
async fn profile_lifecycle() {
    let engine = engine_with_city("profiles.wal", 2, 4).await;
    let alice = user("Alice");
    engine.invite(&alice, "paris", date(3), Period::Day, Guests::none()).await.unwrap();

    let updated = engine
        .update_profile(
            alice.user_id,
            ProfileUpdate {
                full_name: Some("  Alice Martin ".into()),
                avatar_url: Some(Some("https://img.example.com/a.png".into())),
                favorite_city: Some(Some("paris".into())),
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.full_name, "Alice Martin");
    assert_eq!(updated.favorite_city.as_deref(), Some("paris"));

    let err = engine
        .update_profile(
            alice.user_id,
            ProfileUpdate {
                favorite_city: Some(Some("atlantis".into())),
                ..ProfileUpdate::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));

    let err = engine
        .update_profile(
            alice.user_id,
            ProfileUpdate {
                full_name: Some("A".into()),
                ..ProfileUpdate::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    let bob = user("Bob");
    let err = engine.delete_profile(bob.user_id, alice.user_id).await.unwrap_err();
    assert!(matches!(err, EngineError::Forbidden(_)));
    engine.delete_profile(alice.user_id, alice.user_id).await.unwrap();
    assert!(engine.get_profile_by_id(alice.user_id).is_none());
}

#[tokio::test]
async fn sign_in_creates_profile_once() {
    let engine = engine_at(&test_wal_path("sign_in.wal"));
    let alice = user("Alice");

    let profile = engine.sign_in(&alice).await.unwrap();
    assert_eq!(profile.full_name, "Alice");
    assert!(profile.created_at > 0);

    // editing works before any booking
    engine
        .update_profile(
            alice.user_id,
            ProfileUpdate {
                full_name: Some("Alice B".into()),
                ..ProfileUpdate::default()
            },
        )
        .await
        .unwrap();

    let again = engine.sign_in(&alice).await.unwrap();
    assert_eq!(again.full_name, "Alice B");
    assert_eq!(again.created_at, profile.created_at);
    assert_eq!(engine.profile_count(), 1);
}

#[tokio::test]
async fn sign_in_adopts_placeholder_profile() {
    let engine = engine_with_city("sign_in_placeholder.wal", 2, 4).await;
    let target = BookingTarget {
        user_id: None,
        email: "vera@example.com".into(),
        full_name: "Visiting Vera".into(),
    };
    let booked = engine
        .book_for(&user("Alice"), "paris", date(3), Period::Day, target)
        .await
        .unwrap();

    let vera = user("Vera");
    assert_eq!(vera.user_id, booked.user_id);
    let profile = engine.sign_in(&vera).await.unwrap();
    assert_eq!(profile.full_name, "Visiting Vera");
    assert_eq!(engine.get_my_bookings(vera.user_id, date(3)).await.len(), 1);
}

#[tokio::test]
async fn profile_search_sees_new_profiles() {
    let engine = engine_with_city("search.wal", 10, 10).await;
    engine.invite(&user("Alice"), "paris", date(3), Period::Day, Guests::none()).await.unwrap();

    let hits = engine.search_profiles("alice");
    assert_eq!(hits.len(), 1);
    assert!(engine.search_profiles("bob").is_empty());

    // the cached index is rebuilt after a write
    engine.invite(&user("Bob"), "paris", date(3), Period::Day, Guests::none()).await.unwrap();
    let hits = engine.search_profiles("bob");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].profile.email, "bob@example.com");

    engine.clear_profile_cache();
    assert_eq!(engine.search_profiles("alice").len(), 1);
}

#[tokio::test]
async fn get_profiles_skips_unknown() {
    let engine = engine_with_city("get_profiles.wal", 10, 10).await;
    let alice = user("Alice");
    engine.invite(&alice, "paris", date(3), Period::Day, Guests::none()).await.unwrap();
    let found = engine.get_profiles(&[alice.user_id, user("Nobody").user_id]);
    assert_eq!(found.len(), 1);
    assert!(matches!(
        engine.require_profile(user("Nobody").user_id),
        Err(EngineError::NotFound(_))
    ));
}

// ── Admins ───────────────────────────────────────────────

#[tokio::test]
async fn admin_roles() {
    let engine = engine_with_city("admins.wal", 2, 4).await;
    engine.create_city(root(), city("lyon", 2, 4)).await.unwrap();
    let (alice, bob) = (user("Alice"), user("Bob"));

    let err = engine
        .create_admin(alice.user_id, bob.user_id, AdminRole::Global)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Forbidden(_)));

    engine.create_admin(root(), alice.user_id, AdminRole::Global).await.unwrap();
    assert!(engine.is_user_super_admin(alice.user_id));

    // a new global admin can grant too
    let info = engine
        .create_admin(
            alice.user_id,
            bob.user_id,
            AdminRole::Local {
                cities: BTreeSet::from(["lyon".to_string()]),
            },
        )
        .await
        .unwrap();
    match info {
        AdminInfo::Local { cities, .. } => assert_eq!(cities, vec![city("lyon", 2, 4)]),
        other => panic!("expected local admin, got {other:?}"),
    }

    let err = engine
        .create_admin(root(), bob.user_id, AdminRole::Global)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::AlreadyExists(_)));

    let err = engine
        .update_admin(
            root(),
            bob.user_id,
            AdminRole::Local {
                cities: BTreeSet::from(["atlantis".to_string()]),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));

    let all = engine.get_all_admins().await;
    assert_eq!(all.len(), 3);
    assert!(all[0].is_global());
    assert!(all[1].is_global());
    assert_eq!(all[2].user_id(), bob.user_id);

    engine.delete_admin(root(), bob.user_id).await.unwrap();
    assert!(engine.get_admin_info(bob.user_id).await.is_none());
    assert!(matches!(
        engine.delete_admin(root(), bob.user_id).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn local_admin_without_cities_has_no_info() {
    let engine = engine_with_city("admin_empty.wal", 2, 4).await;
    let bob = user("Bob");
    let paris = AdminRole::Local {
        cities: BTreeSet::from(["paris".to_string()]),
    };
    engine.create_admin(root(), bob.user_id, paris).await.unwrap();
    engine.delete_city(root(), "paris").await.unwrap();
    assert!(engine.get_admin_info(bob.user_id).await.is_none());
    assert!(engine.get_all_admins().await.iter().all(|a| a.user_id() != bob.user_id));

    let err = engine
        .create_admin(root(), user("Carol").user_id, AdminRole::Local { cities: BTreeSet::new() })
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

#[tokio::test]
async fn root_admin_info_is_global() {
    let engine = engine_at(&test_wal_path("root_info.wal"));
    assert_eq!(
        engine.get_admin_info(root()).await,
        Some(AdminInfo::Global { user_id: root() })
    );
    assert!(engine.is_user_admin(root(), "anywhere"));
}

// ── Durability ───────────────────────────────────────────

#[tokio::test]
async fn state_survives_replay() {
    let path = test_wal_path("replay.wal");
    let alice = user("Alice");
    let bob = user("Bob");
    {
        let engine = engine_at(&path);
        engine.create_city(root(), city("paris", 2, 4)).await.unwrap();
        engine.invite(&alice, "paris", date(3), Period::Day, Guests::none()).await.unwrap();
        tick().await;
        engine.invite(&bob, "paris", date(3), Period::Morning, Guests::none()).await.unwrap();
        engine.delete_booking("paris", date(3), bob.user_id).await.unwrap();
        engine
            .create_notice(root(), "paris", date(4), "Closed".into(), Some(0))
            .await
            .unwrap();
        engine
            .create_admin(root(), bob.user_id, AdminRole::Global)
            .await
            .unwrap();
    }

    let engine = engine_at(&path);
    let rows = engine.get_bookings("paris", date(3)).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].user_id, alice.user_id);
    assert_eq!(engine.get_notice("paris", date(4)).await.unwrap().unwrap().temp_capacity, Some(0));
    assert!(engine.is_user_super_admin(bob.user_id));
    assert_eq!(engine.profile_count(), 2);
}

#[tokio::test]
async fn compaction_preserves_state() {
    let path = test_wal_path("compact.wal");
    let alice = user("Alice");
    let (before_rows, before_notice) = {
        let engine = engine_at(&path);
        engine.create_city(root(), city("paris", 2, 4)).await.unwrap();
        for d in 3..=7 {
            engine.invite(&alice, "paris", date(d), Period::Morning, Guests::none()).await.unwrap();
            engine.invite(&alice, "paris", date(d), Period::Day, Guests::none()).await.unwrap();
        }
        engine.delete_booking("paris", date(5), alice.user_id).await.unwrap();
        engine
            .create_notice(root(), "paris", date(6), "Half day".into(), Some(1))
            .await
            .unwrap();

        assert!(engine.wal_appends_since_compact().await > 0);
        engine.compact_wal().await.unwrap();
        assert_eq!(engine.wal_appends_since_compact().await, 0);

        // writes after compaction land in the new file
        engine.invite(&user("Bob"), "paris", date(3), Period::Day, Guests::none()).await.unwrap();
        (
            engine.get_bookings_range("paris", date(3), date(7)).await.unwrap(),
            engine.get_notice("paris", date(6)).await.unwrap(),
        )
    };

    let engine = engine_at(&path);
    assert_eq!(
        engine.get_bookings_range("paris", date(3), date(7)).await.unwrap(),
        before_rows
    );
    assert_eq!(engine.get_notice("paris", date(6)).await.unwrap(), before_notice);
    assert_eq!(engine.profile_count(), 2);
}

#[tokio::test]
async fn concurrent_invites_respect_ceiling() {
    let engine = Arc::new(engine_with_city("concurrent.wal", 5, 8).await);
    let mut handles = Vec::new();
    for i in 0..32 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let who = user(&format!("User{i}"));
            engine.invite(&who, "paris", date(3), Period::Day, Guests::none()).await
        }));
    }
    let mut accepted = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            accepted += 1;
        }
    }
    assert_eq!(accepted, 8);
    let view = engine.day_view(root(), "paris", date(3)).await.unwrap();
    assert_eq!(view.occupancy, 8);
}
