use std::path::PathBuf;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use ulid::Ulid;

use super::*;
use crate::notify::RevalidateHub;

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("bookd_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn slot(d: &str, t: &str) -> SlotKey {
    SlotKey::new(
        d.parse::<NaiveDate>().unwrap(),
        NaiveTime::parse_from_str(t, "%H:%M").unwrap(),
    )
}

/// Absolute ms for a studio-local date + time, for block bounds.
fn at(d: &str, t: &str) -> Ms {
    slot(d, t).start_ms()
}

/// Engine with one studio (given capacity) and one 60-minute service.
async fn engine_with_studio(wal: &str, capacity: u32) -> (Engine, Ulid, Ulid, Ulid) {
    let engine = Engine::new(test_wal_path(wal), Arc::new(RevalidateHub::new())).unwrap();
    let studio_id = Ulid::new();
    let owner_id = Ulid::new();
    engine
        .create_studio(studio_id, owner_id, "Aperture Studio".into(), capacity)
        .await
        .unwrap();
    let service_id = Ulid::new();
    engine
        .add_service(service_id, studio_id, "Portrait".into(), 60, 9000)
        .await
        .unwrap();
    (engine, studio_id, owner_id, service_id)
}

fn request(studio_id: Ulid, service_id: Ulid, phone: &str, s: SlotKey) -> BookingRequest {
    BookingRequest {
        id: Ulid::new(),
        studio_id,
        customer_name: format!("Caller {phone}"),
        customer_phone: phone.into(),
        service_id,
        slot: s,
        notes: None,
        origin: BookingOrigin::Owner,
        override_capacity: false,
    }
}

fn admitted_id(decision: AdmissionDecision) -> Ulid {
    match decision {
        AdmissionDecision::Admitted { booking_id } => booking_id,
        AdmissionDecision::CapacityFull(w) => panic!("expected admission, got warning {w:?}"),
    }
}

// ── Booking admission ────────────────────────────────────

#[tokio::test]
async fn fill_to_capacity_then_warn() {
    let (engine, sid, _, svc) = engine_with_studio("fill_warn.wal", 2).await;
    let target = slot("2025-01-10", "10:00");

    let a = admitted_id(
        engine
            .create_booking(request(sid, svc, "+491701", target))
            .await
            .unwrap(),
    );
    let b = admitted_id(
        engine
            .create_booking(request(sid, svc, "+491702", target))
            .await
            .unwrap(),
    );
    assert_eq!(
        engine.slot_usage(sid, target, BookingStatus::Confirmed).await,
        2
    );

    let decision = engine
        .create_booking(request(sid, svc, "+491703", target))
        .await
        .unwrap();
    let warning = match decision {
        AdmissionDecision::CapacityFull(w) => w,
        other => panic!("expected capacity warning, got {other:?}"),
    };
    assert_eq!(warning.current, 2);
    assert_eq!(warning.max, 2);
    let conflict_ids: Vec<Ulid> = warning.bookings.iter().map(|c| c.booking_id).collect();
    assert!(conflict_ids.contains(&a) && conflict_ids.contains(&b));
    assert!(warning.bookings.iter().all(|c| !c.customer_name.is_empty()));
    assert!(warning.bookings.iter().all(|c| c.service_name == "Portrait"));

    // Nothing was written
    assert_eq!(
        engine.slot_usage(sid, target, BookingStatus::Confirmed).await,
        2
    );
}

#[tokio::test]
async fn override_admits_past_capacity() {
    let (engine, sid, _, svc) = engine_with_studio("override.wal", 2).await;
    let target = slot("2025-01-10", "10:00");

    for phone in ["+491701", "+491702"] {
        engine
            .create_booking(request(sid, svc, phone, target))
            .await
            .unwrap();
    }

    let mut forced = request(sid, svc, "+491703", target);
    forced.override_capacity = true;
    admitted_id(engine.create_booking(forced).await.unwrap());
    assert_eq!(
        engine.slot_usage(sid, target, BookingStatus::Confirmed).await,
        3
    );

    // No upper bound on the override path
    let mut again = request(sid, svc, "+491704", target);
    again.override_capacity = true;
    admitted_id(engine.create_booking(again).await.unwrap());
    assert_eq!(
        engine.slot_usage(sid, target, BookingStatus::Confirmed).await,
        4
    );
}

#[tokio::test]
async fn capacity_warning_writes_nothing() {
    let (engine, sid, _, svc) = engine_with_studio("warn_no_write.wal", 1).await;
    let target = slot("2025-01-10", "10:00");

    engine
        .create_booking(request(sid, svc, "+491701", target))
        .await
        .unwrap();
    let decision = engine
        .create_booking(request(sid, svc, "+49_new_customer", target))
        .await
        .unwrap();
    assert!(matches!(decision, AdmissionDecision::CapacityFull(_)));

    // The rejected caller's customer record must not exist either
    let st = engine.get_studio(&sid).unwrap();
    let guard = st.read().await;
    assert!(guard.customer_by_phone("+49_new_customer").is_none());
    assert_eq!(guard.bookings.len(), 1);
}

#[tokio::test]
async fn racing_admissions_admit_exactly_one() {
    let (engine, sid, _, svc) = engine_with_studio("race.wal", 1).await;
    let engine = Arc::new(engine);
    let target = slot("2025-01-10", "10:00");

    let mut handles = Vec::new();
    for i in 0..10 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .create_booking(request(sid, svc, &format!("+4917{i:02}"), target))
                .await
                .unwrap()
        }));
    }

    let mut admitted = 0;
    let mut warned = 0;
    for h in handles {
        match h.await.unwrap() {
            AdmissionDecision::Admitted { .. } => admitted += 1,
            AdmissionDecision::CapacityFull(w) => {
                assert_eq!(w.current, 1);
                assert_eq!(w.max, 1);
                warned += 1;
            }
        }
    }
    assert_eq!(admitted, 1);
    assert_eq!(warned, 9);
    assert_eq!(
        engine.slot_usage(sid, target, BookingStatus::Confirmed).await,
        1
    );
}

#[tokio::test]
async fn validation_names_the_field() {
    let (engine, sid, _, svc) = engine_with_studio("validation.wal", 1).await;
    let good = slot("2025-01-10", "10:00");

    let mut no_name = request(sid, svc, "+491701", good);
    no_name.customer_name = "  ".into();
    let err = engine.create_booking(no_name).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Validation { field: "customer_name", .. }
    ));

    let mut no_phone = request(sid, svc, "+491701", good);
    no_phone.customer_phone = String::new();
    let err = engine.create_booking(no_phone).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Validation { field: "customer_phone", .. }
    ));

    let mut long_notes = request(sid, svc, "+491701", good);
    long_notes.notes = Some("x".repeat(crate::limits::MAX_NOTES_LEN + 1));
    let err = engine.create_booking(long_notes).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Validation { field: "notes", .. }
    ));

    let off_grid = request(sid, svc, "+491701", slot("2025-01-10", "10:07"));
    let err = engine.create_booking(off_grid).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation { field: "time", .. }));

    let after_hours = request(sid, svc, "+491701", slot("2025-01-10", "21:00"));
    let err = engine.create_booking(after_hours).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation { field: "time", .. }));

    // No partial writes from any failed attempt
    let st = engine.get_studio(&sid).unwrap();
    assert!(st.read().await.bookings.is_empty());
}

#[tokio::test]
async fn unknown_service_and_studio() {
    let (engine, sid, _, _) = engine_with_studio("unknown.wal", 1).await;
    let target = slot("2025-01-10", "10:00");

    let err = engine
        .create_booking(request(sid, Ulid::new(), "+491701", target))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));

    let err = engine
        .create_booking(request(Ulid::new(), Ulid::new(), "+491701", target))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

#[tokio::test]
async fn customer_resolved_by_phone() {
    let (engine, sid, _, svc) = engine_with_studio("customer_upsert.wal", 5).await;

    let mut first = request(sid, svc, "+491701", slot("2025-01-10", "10:00"));
    first.customer_name = "Maria".into();
    engine.create_booking(first).await.unwrap();

    let mut second = request(sid, svc, "+491701", slot("2025-01-10", "14:00"));
    second.customer_name = "Maria Weber".into();
    engine.create_booking(second).await.unwrap();

    let st = engine.get_studio(&sid).unwrap();
    let guard = st.read().await;
    assert_eq!(guard.customers.len(), 1);
    // Latest supplied name wins
    assert_eq!(guard.customers[0].name, "Maria Weber");
    assert_eq!(guard.bookings.len(), 2);
    assert_eq!(guard.bookings[0].customer_id, guard.bookings[1].customer_id);
}

#[tokio::test]
async fn customer_path_enters_pending() {
    let (engine, sid, _, svc) = engine_with_studio("pending.wal", 1).await;
    let target = slot("2025-01-10", "10:00");

    let mut self_service = request(sid, svc, "+491701", target);
    self_service.origin = BookingOrigin::Customer;
    admitted_id(engine.create_booking(self_service).await.unwrap());

    assert_eq!(engine.slot_usage(sid, target, BookingStatus::Pending).await, 1);
    // Pending does not count toward capacity
    assert_eq!(
        engine.slot_usage(sid, target, BookingStatus::Confirmed).await,
        0
    );
    admitted_id(
        engine
            .create_booking(request(sid, svc, "+491702", target))
            .await
            .unwrap(),
    );
}

#[tokio::test]
async fn booking_status_transitions() {
    let (engine, sid, _, svc) = engine_with_studio("transitions.wal", 1).await;

    let mut req = request(sid, svc, "+491701", slot("2025-01-10", "10:00"));
    req.origin = BookingOrigin::Customer;
    let id = admitted_id(engine.create_booking(req).await.unwrap());

    engine
        .set_booking_status(id, BookingStatus::Confirmed)
        .await
        .unwrap();
    let err = engine
        .set_booking_status(id, BookingStatus::Pending)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation { field: "status", .. }));

    engine
        .set_booking_status(id, BookingStatus::Cancelled)
        .await
        .unwrap();
    let err = engine
        .set_booking_status(id, BookingStatus::Confirmed)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation { field: "status", .. }));

    let err = engine
        .set_booking_status(Ulid::new(), BookingStatus::Confirmed)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

#[tokio::test]
async fn capacity_change_applies_to_future_checks_only() {
    let (engine, sid, _, svc) = engine_with_studio("capacity_change.wal", 1).await;
    let target = slot("2025-01-10", "10:00");

    engine
        .create_booking(request(sid, svc, "+491701", target))
        .await
        .unwrap();
    let decision = engine
        .create_booking(request(sid, svc, "+491702", target))
        .await
        .unwrap();
    assert!(matches!(decision, AdmissionDecision::CapacityFull(_)));

    // Owner raises capacity — the same slot opens up immediately
    engine
        .update_studio(sid, "Aperture Studio".into(), 2)
        .await
        .unwrap();
    admitted_id(
        engine
            .create_booking(request(sid, svc, "+491702", target))
            .await
            .unwrap(),
    );

    // Lowering it back does not touch existing bookings
    engine
        .update_studio(sid, "Aperture Studio".into(), 1)
        .await
        .unwrap();
    assert_eq!(
        engine.slot_usage(sid, target, BookingStatus::Confirmed).await,
        2
    );
    let decision = engine
        .create_booking(request(sid, svc, "+491703", target))
        .await
        .unwrap();
    match decision {
        AdmissionDecision::CapacityFull(w) => {
            assert_eq!(w.current, 2);
            assert_eq!(w.max, 1);
        }
        other => panic!("expected warning, got {other:?}"),
    }
}

#[tokio::test]
async fn off_grid_service_duration_is_bookable() {
    let (engine, sid, _, _) = engine_with_studio("off_grid.wal", 1).await;
    let svc = Ulid::new();
    engine
        .add_service(svc, sid, "Quick touch-up".into(), 50, 3000)
        .await
        .unwrap();

    admitted_id(
        engine
            .create_booking(request(sid, svc, "+491701", slot("2025-01-10", "10:15")))
            .await
            .unwrap(),
    );
}

#[tokio::test]
async fn service_duration_edit_widens_occupied_intervals() {
    let (engine, sid, _, svc) = engine_with_studio("service_edit.wal", 1).await;
    engine
        .create_booking(request(sid, svc, "+491701", slot("2025-01-10", "10:00")))
        .await
        .unwrap();

    // 60-minute booking ends at 11:00, so a block from 11:00 is clear
    let probe = Span::new(at("2025-01-10", "11:00"), at("2025-01-10", "12:00"));
    assert!(
        engine
            .confirmed_bookings_in_range(sid, probe)
            .await
            .unwrap()
            .is_empty()
    );

    // Stretching the service to 90 minutes pushes the existing booking's
    // occupied interval to 11:30
    engine
        .update_service(sid, svc, "Portrait".into(), 90, 9000)
        .await
        .unwrap();
    let hits = engine.confirmed_bookings_in_range(sid, probe).await.unwrap();
    assert_eq!(hits.len(), 1);
    let err = engine
        .create_block(Ulid::new(), sid, probe, None, false)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict { .. }));
}

#[tokio::test]
async fn invalid_studio_capacity_rejected() {
    let engine = Engine::new(
        test_wal_path("bad_capacity.wal"),
        Arc::new(RevalidateHub::new()),
    )
    .unwrap();
    let err = engine
        .create_studio(Ulid::new(), Ulid::new(), "Studio".into(), 0)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation { field: "capacity", .. }));
    let err = engine
        .create_studio(Ulid::new(), Ulid::new(), "Studio".into(), 11)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation { field: "capacity", .. }));
}

// ── Block admission ──────────────────────────────────────

#[tokio::test]
async fn block_over_empty_interval_succeeds() {
    let (engine, sid, _, _) = engine_with_studio("block_empty.wal", 1).await;
    engine
        .create_block(
            Ulid::new(),
            sid,
            Span::new(at("2025-01-10", "09:00"), at("2025-01-10", "11:00")),
            Some("deep clean".into()),
            false,
        )
        .await
        .unwrap();

    let blocks = engine
        .blocked_times(sid, at("2025-01-10", "00:00"), at("2025-01-11", "00:00"))
        .await
        .unwrap();
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].reason.as_deref(), Some("deep clean"));
}

#[tokio::test]
async fn block_over_confirmed_booking_rejected() {
    let (engine, sid, _, svc) = engine_with_studio("block_conflict.wal", 1).await;
    // Confirmed 60-minute booking at 10:00
    engine
        .create_booking(request(sid, svc, "+491701", slot("2025-01-10", "10:00")))
        .await
        .unwrap();

    let err = engine
        .create_block(
            Ulid::new(),
            sid,
            Span::new(at("2025-01-10", "09:00"), at("2025-01-10", "11:00")),
            None,
            false,
        )
        .await
        .unwrap_err();
    match err {
        EngineError::Conflict { count, bookings } => {
            assert_eq!(count, 1);
            assert_eq!(bookings.len(), 1);
            assert_eq!(bookings[0].service_name, "Portrait");
        }
        other => panic!("expected conflict, got {other}"),
    }

    // Zero rows written
    let blocks = engine
        .blocked_times(sid, at("2025-01-10", "00:00"), at("2025-01-11", "00:00"))
        .await
        .unwrap();
    assert!(blocks.is_empty());
}

#[tokio::test]
async fn block_over_cancelled_booking_succeeds() {
    let (engine, sid, _, svc) = engine_with_studio("block_cancelled.wal", 1).await;
    let id = admitted_id(
        engine
            .create_booking(request(sid, svc, "+491701", slot("2025-01-10", "10:00")))
            .await
            .unwrap(),
    );
    engine
        .set_booking_status(id, BookingStatus::Cancelled)
        .await
        .unwrap();

    engine
        .create_block(
            Ulid::new(),
            sid,
            Span::new(at("2025-01-10", "09:00"), at("2025-01-10", "11:00")),
            None,
            false,
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn block_adjacent_to_booking_succeeds() {
    let (engine, sid, _, svc) = engine_with_studio("block_adjacent.wal", 1).await;
    // Booking occupies 10:00–11:00; blocks ending at 10:00 or starting at
    // 11:00 touch but do not overlap.
    engine
        .create_booking(request(sid, svc, "+491701", slot("2025-01-10", "10:00")))
        .await
        .unwrap();

    engine
        .create_block(
            Ulid::new(),
            sid,
            Span::new(at("2025-01-10", "08:00"), at("2025-01-10", "10:00")),
            None,
            false,
        )
        .await
        .unwrap();
    engine
        .create_block(
            Ulid::new(),
            sid,
            Span::new(at("2025-01-10", "11:00"), at("2025-01-10", "12:00")),
            None,
            false,
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn block_invalid_interval_rejected() {
    let (engine, sid, _, _) = engine_with_studio("block_invalid.wal", 1).await;
    let start = at("2025-01-10", "11:00");

    let err = engine
        .create_block(Ulid::new(), sid, Span { start, end: start }, None, false)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation { field: "end_time", .. }));

    let err = engine
        .create_block(
            Ulid::new(),
            sid,
            Span {
                start,
                end: start - 3_600_000,
            },
            None,
            false,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation { field: "end_time", .. }));
}

#[tokio::test]
async fn delete_block_requires_owner_and_is_not_repeatable() {
    let (engine, sid, owner, _) = engine_with_studio("block_delete.wal", 1).await;
    let block_id = Ulid::new();
    engine
        .create_block(
            block_id,
            sid,
            Span::new(at("2025-01-10", "09:00"), at("2025-01-10", "11:00")),
            None,
            false,
        )
        .await
        .unwrap();

    // A stranger cannot revoke it
    let err = engine.delete_block(block_id, Ulid::new()).await.unwrap_err();
    assert!(matches!(err, EngineError::NotOwner(_)));

    engine.delete_block(block_id, owner).await.unwrap();
    let blocks = engine
        .blocked_times(sid, at("2025-01-10", "00:00"), at("2025-01-11", "00:00"))
        .await
        .unwrap();
    assert!(blocks.is_empty());

    // Second delete: the first delete's effect persists, the call reports NotFound
    let err = engine.delete_block(block_id, owner).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

#[tokio::test]
async fn all_day_block_carries_flag() {
    let (engine, sid, _, _) = engine_with_studio("block_all_day.wal", 1).await;
    engine
        .create_block(
            Ulid::new(),
            sid,
            Span::new(at("2025-01-10", "00:00"), at("2025-01-11", "00:00")),
            Some("public holiday".into()),
            true,
        )
        .await
        .unwrap();
    let blocks = engine
        .blocked_times(sid, at("2025-01-09", "00:00"), at("2025-01-12", "00:00"))
        .await
        .unwrap();
    assert!(blocks[0].is_all_day);
}

// ── Queries ──────────────────────────────────────────────

#[tokio::test]
async fn slot_usage_unknown_studio_is_zero() {
    let engine = Engine::new(
        test_wal_path("usage_unknown.wal"),
        Arc::new(RevalidateHub::new()),
    )
    .unwrap();
    assert_eq!(
        engine
            .slot_usage(Ulid::new(), slot("2025-01-10", "10:00"), BookingStatus::Confirmed)
            .await,
        0
    );
}

#[tokio::test]
async fn list_studios_waits_for_in_flight_writers() {
    let (engine, sid, _, _) = engine_with_studio("list_contended.wal", 3).await;
    let engine = Arc::new(engine);

    // A mutation in progress holds the studio's write lock across its WAL
    // commit; a listing arriving in that window must block, not die.
    let st = engine.get_studio(&sid).unwrap();
    let guard = st.write_owned().await;

    let lister = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.list_studios().await })
    };
    tokio::task::yield_now().await;
    assert!(!lister.is_finished());

    drop(guard);
    let studios = lister.await.unwrap();
    assert_eq!(studios.len(), 1);
    assert_eq!(studios[0].id, sid);
    assert_eq!(studios[0].capacity, 3);
}

#[tokio::test]
async fn bookings_on_lists_names_in_time_order() {
    let (engine, sid, _, svc) = engine_with_studio("bookings_on.wal", 5).await;
    engine
        .create_booking(request(sid, svc, "+491702", slot("2025-01-10", "14:00")))
        .await
        .unwrap();
    engine
        .create_booking(request(sid, svc, "+491701", slot("2025-01-10", "09:00")))
        .await
        .unwrap();
    engine
        .create_booking(request(sid, svc, "+491703", slot("2025-01-11", "09:00")))
        .await
        .unwrap();

    let day = engine
        .bookings_on(sid, "2025-01-10".parse().unwrap())
        .await
        .unwrap();
    assert_eq!(day.len(), 2);
    assert_eq!(day[0].slot.time, NaiveTime::parse_from_str("09:00", "%H:%M").unwrap());
    assert_eq!(day[0].service_name, "Portrait");
    assert!(day.iter().all(|b| b.status == BookingStatus::Confirmed));
}

#[tokio::test]
async fn confirmed_in_range_skips_cancelled_and_pending() {
    let (engine, sid, _, svc) = engine_with_studio("confirmed_range.wal", 5).await;

    engine
        .create_booking(request(sid, svc, "+491701", slot("2025-01-10", "10:00")))
        .await
        .unwrap();
    let cancelled = admitted_id(
        engine
            .create_booking(request(sid, svc, "+491702", slot("2025-01-10", "11:00")))
            .await
            .unwrap(),
    );
    engine
        .set_booking_status(cancelled, BookingStatus::Cancelled)
        .await
        .unwrap();
    let mut pending = request(sid, svc, "+491703", slot("2025-01-10", "12:00"));
    pending.origin = BookingOrigin::Customer;
    engine.create_booking(pending).await.unwrap();

    let hits = engine
        .confirmed_bookings_in_range(
            sid,
            Span::new(at("2025-01-10", "08:00"), at("2025-01-10", "20:00")),
        )
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].service_name, "Portrait");
}

#[tokio::test]
async fn blocked_times_window_validation() {
    let (engine, sid, _, _) = engine_with_studio("blocked_window.wal", 1).await;
    let t = at("2025-01-10", "10:00");
    let err = engine.blocked_times(sid, t, t).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation { field: "end", .. }));
}

// ── Durability ───────────────────────────────────────────

#[tokio::test]
async fn replay_restores_admission_state() {
    let path = test_wal_path("replay_state.wal");
    let sid = Ulid::new();
    let owner = Ulid::new();
    let svc = Ulid::new();
    let target = slot("2025-01-10", "10:00");

    {
        let engine = Engine::new(path.clone(), Arc::new(RevalidateHub::new())).unwrap();
        engine
            .create_studio(sid, owner, "Aperture Studio".into(), 1)
            .await
            .unwrap();
        engine
            .add_service(svc, sid, "Portrait".into(), 60, 9000)
            .await
            .unwrap();
        engine
            .create_booking(request(sid, svc, "+491701", target))
            .await
            .unwrap();
        engine
            .create_block(
                Ulid::new(),
                sid,
                Span::new(at("2025-01-11", "09:00"), at("2025-01-11", "12:00")),
                None,
                false,
            )
            .await
            .unwrap();
    }

    let engine = Engine::new(path, Arc::new(RevalidateHub::new())).unwrap();
    assert_eq!(
        engine.slot_usage(sid, target, BookingStatus::Confirmed).await,
        1
    );
    // The restored booking still defends its slot
    let decision = engine
        .create_booking(request(sid, svc, "+491702", target))
        .await
        .unwrap();
    assert!(matches!(decision, AdmissionDecision::CapacityFull(_)));
    let blocks = engine
        .blocked_times(sid, at("2025-01-11", "00:00"), at("2025-01-12", "00:00"))
        .await
        .unwrap();
    assert_eq!(blocks.len(), 1);
}

#[tokio::test]
async fn compaction_preserves_state() {
    let path = test_wal_path("compact_state.wal");
    let sid = Ulid::new();
    let owner = Ulid::new();
    let svc = Ulid::new();

    {
        let engine = Engine::new(path.clone(), Arc::new(RevalidateHub::new())).unwrap();
        engine
            .create_studio(sid, owner, "Aperture Studio".into(), 2)
            .await
            .unwrap();
        engine
            .add_service(svc, sid, "Portrait".into(), 60, 9000)
            .await
            .unwrap();
        engine
            .create_booking(request(sid, svc, "+491701", slot("2025-01-10", "10:00")))
            .await
            .unwrap();
        // Churn that compaction should drop
        for _ in 0..20 {
            let block_id = Ulid::new();
            engine
                .create_block(
                    block_id,
                    sid,
                    Span::new(at("2025-02-01", "09:00"), at("2025-02-01", "10:00")),
                    None,
                    false,
                )
                .await
                .unwrap();
            engine.delete_block(block_id, owner).await.unwrap();
        }

        let before = std::fs::metadata(&path).unwrap().len();
        engine.compact_wal().await.unwrap();
        let after = std::fs::metadata(&path).unwrap().len();
        assert!(after < before, "compaction should shrink the WAL");
        assert_eq!(engine.wal_appends_since_compact().await, 0);
    }

    let engine = Engine::new(path, Arc::new(RevalidateHub::new())).unwrap();
    assert_eq!(
        engine
            .slot_usage(sid, slot("2025-01-10", "10:00"), BookingStatus::Confirmed)
            .await,
        1
    );
    let st = engine.get_studio(&sid).unwrap();
    let guard = st.read().await;
    assert_eq!(guard.customers.len(), 1);
    assert!(guard.blocks.is_empty());
}
