//! End-to-end booking flow through the public API, including restart
//! and compaction.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use rust_decimal_macros::dec;
use ulid::Ulid;

use slotwise::config::{ConfigHandle, EngineConfig};
use slotwise::drip::LogDrip;
use slotwise::engine::{Engine, EngineError};
use slotwise::model::{
    Actor, ActorGrade, AppointmentKind, BookingStatus, CancellationReason, GenerateTarget,
    SlotState,
};
use slotwise::notify::NotifyHub;

fn wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("slotwise_test_flow");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

// 2030-01-07 is a Monday.
fn d(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2030, 1, day).unwrap()
}

fn t(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

fn open_engine(path: PathBuf) -> Engine {
    // Lift the advance ceiling so the 2030 fixture dates stay bookable.
    let cfg = EngineConfig {
        max_advance_days: 100_000,
        min_advance_hours: 0,
        ..EngineConfig::default()
    };
    Engine::new(path, Arc::new(NotifyHub::new()), Arc::new(LogDrip), ConfigHandle::new(cfg))
        .unwrap()
}

fn actor(grade: ActorGrade) -> Actor {
    Actor { id: Ulid::new(), grade }
}

async fn slot_state(engine: &Engine, sid: Ulid, time: NaiveTime) -> SlotState {
    let slots = engine.slots_on(sid, d(7)).await.unwrap();
    slots
        .iter()
        .find(|s| s.start_time == time && s.kind == AppointmentKind::Zoom)
        .map(|s| s.state)
        .unwrap()
}

#[tokio::test]
async fn booking_lifecycle_survives_restart_and_compaction() {
    let path = wal_path("lifecycle.wal");
    let agent = actor(ActorGrade::Agent);
    let staff = actor(ActorGrade::Staff);
    let admin = actor(ActorGrade::Admin);

    let salesman = Ulid::new();
    let approved_id;
    let walk_in_id;
    {
        let engine = open_engine(path.clone());
        let code = engine.enroll_salesman(salesman, Some("Alvarez".into())).await.unwrap();
        assert_eq!(code, "EMP00001");

        let cycle = engine.current_cycle(d(7)).await.unwrap();
        let created = engine
            .generate_slots(cycle.id, GenerateTarget::AllActive)
            .await
            .unwrap();
        // Jan 7–20 holds ten weekdays; 20 starts x 2 kinds each.
        assert_eq!(created, 400);

        // An agent claims Monday 10:00; the booking awaits approval.
        let requested = engine
            .request_booking(agent, Ulid::new(), salesman, d(7), t(10, 0), AppointmentKind::Zoom)
            .await
            .unwrap();
        assert_eq!(requested.status, BookingStatus::Pending);
        assert_eq!(requested.commission, dec!(30.00));
        assert_eq!(slot_state(&engine, salesman, t(10, 0)).await, SlotState::Reserved);

        // A second request for the same slot loses.
        let clash = engine
            .request_booking(staff, Ulid::new(), salesman, d(7), t(10, 0), AppointmentKind::Zoom)
            .await;
        assert!(matches!(clash, Err(EngineError::SlotUnavailable { .. })));

        engine.approve_booking(admin, requested.id).await.unwrap();
        approved_id = requested.id;

        // Staff walk-in at 14:00 confirms immediately, then gets canceled
        // and the slot is free again for a rebooking.
        let walk_in = engine
            .request_booking(staff, Ulid::new(), salesman, d(7), t(14, 0), AppointmentKind::Zoom)
            .await
            .unwrap();
        assert_eq!(walk_in.status, BookingStatus::Confirmed);
        engine
            .cancel_booking(staff, walk_in.id, CancellationReason::ClientRequest, None)
            .await
            .unwrap();
        assert_eq!(slot_state(&engine, salesman, t(14, 0)).await, SlotState::Open);

        let rebooked = engine
            .request_booking(staff, Ulid::new(), salesman, d(7), t(14, 0), AppointmentKind::Zoom)
            .await
            .unwrap();
        walk_in_id = rebooked.id;
    }

    // Cold restart: replay rebuilds every calendar from the journal.
    {
        let engine = open_engine(path.clone());
        assert_eq!(engine.list_salesmen().await.len(), 1);
        assert_eq!(engine.list_cycles().await.len(), 1);

        let approved = engine.get_booking(approved_id).await.unwrap();
        assert_eq!(approved.status, BookingStatus::Confirmed);
        assert_eq!(approved.commission, dec!(30.00));
        assert_eq!(slot_state(&engine, salesman, t(10, 0)).await, SlotState::Reserved);
        assert_eq!(slot_state(&engine, salesman, t(14, 0)).await, SlotState::Reserved);

        // Attendance still works on replayed state.
        engine.mark_attended(staff, walk_in_id, d(7)).await.unwrap();

        engine.compact_wal().await.unwrap();
        assert_eq!(engine.wal_appends_since_compact().await, 0);
    }

    // The compacted journal replays to the same observable state.
    let engine = open_engine(path);
    assert_eq!(
        engine.get_booking(walk_in_id).await.unwrap().status,
        BookingStatus::Completed
    );
    assert_eq!(slot_state(&engine, salesman, t(10, 0)).await, SlotState::Reserved);

    // Two counting bookings; only the agent's carries commission.
    let summary = engine.commission_summary(salesman, d(1), d(31)).await.unwrap();
    assert_eq!(summary.total, dec!(30.00));
    assert_eq!(summary.bookings, 2);
}

#[tokio::test]
async fn future_dated_calendar_is_untouched_by_a_sweep() {
    let path = wal_path("sweep_noop.wal");
    let engine = open_engine(path);
    let salesman = Ulid::new();
    engine.enroll_salesman(salesman, None).await.unwrap();
    let cycle = engine.open_cycle(Ulid::new(), d(7), d(8)).await.unwrap();
    engine.generate_slots(cycle.id, GenerateTarget::AllActive).await.unwrap();

    slotwise::sweep::sweep_once(&engine).await;

    let slots = engine.slots_on(salesman, d(7)).await.unwrap();
    assert!(slots.iter().all(|s| s.state == SlotState::Open));
}
