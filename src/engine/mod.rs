mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;

pub use availability::{business_days, plan_slots, slot_starts};
pub use error::EngineError;

pub(crate) use conflict::local_now;

use std::collections::BTreeSet;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::config::ConfigHandle;
use crate::drip::DripScheduler;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedCalendar = Arc<RwLock<SalesmanCalendar>>;

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
    /// Per-salesman calendars. Each entry is its own lock domain, so two
    /// salesmen never contend with each other.
    pub state: DashMap<Ulid, SharedCalendar>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(super) drip: Arc<dyn DripScheduler>,
    pub(super) config: ConfigHandle,
    /// Reverse lookup: entity (slot/booking/block) id → salesman id.
    pub(super) entities: DashMap<Ulid, Ulid>,
    /// Open availability cycles. Few, rarely written.
    pub(super) cycles: RwLock<Vec<AvailabilityCycle>>,
    /// Employee codes already handed out, so allocation can probe for
    /// the next free one.
    pub(super) codes: Mutex<BTreeSet<String>>,
}

/// Re-derive a slot's state from its booking's status. Called after every
/// booking event: pending/confirmed/completed keep the slot reserved,
/// terminal statuses hand it back to inventory. A slot the sweeper has
/// already expired stays expired.
fn reconcile_slot(cal: &mut SalesmanCalendar, booking_id: Ulid) {
    let Some(booking) = cal.booking(booking_id) else {
        return;
    };
    let Some(slot_id) = booking.slot else {
        return;
    };
    let holds = booking.status.holds_slot();
    if let Some(slot) = cal.slot_by_id_mut(slot_id) {
        if holds {
            slot.state = SlotState::Reserved;
            slot.booked_by = Some(booking_id);
        } else if slot.booked_by == Some(booking_id) {
            if slot.state != SlotState::Expired {
                slot.state = SlotState::Open;
            }
            slot.booked_by = None;
        }
    }
}

/// Apply an event directly to a calendar (no locking — caller holds the lock).
fn apply_to_calendar(cal: &mut SalesmanCalendar, event: &Event, entity_map: &DashMap<Ulid, Ulid>) {
    match event {
        Event::SalesmanDeactivated { .. } => {
            cal.active = false;
        }
        Event::SlotsGenerated { salesman, cycle, slots } => {
            for seed in slots {
                let slot = TimeSlot {
                    id: seed.id,
                    salesman: *salesman,
                    date: seed.date,
                    start_time: seed.start_time,
                    kind: seed.kind,
                    state: SlotState::Open,
                    booked_by: None,
                    cycle: *cycle,
                    created_at: seed.created_at,
                };
                if cal.insert_slot(slot) {
                    entity_map.insert(seed.id, *salesman);
                }
            }
        }
        Event::SlotsExpired { slots, .. } => {
            for id in slots {
                if let Some(slot) = cal.slot_by_id_mut(*id)
                    && slot.state == SlotState::Open
                {
                    slot.state = SlotState::Expired;
                }
            }
        }
        Event::SlotsRemoved { slots, .. } => {
            for id in slots {
                cal.remove_slot(*id);
                entity_map.remove(id);
            }
        }
        Event::BlockAdded {
            id,
            salesman,
            start_date,
            end_date,
            start_time,
            end_time,
        } => {
            cal.insert_block(Unavailability {
                id: *id,
                salesman: *salesman,
                start_date: *start_date,
                end_date: *end_date,
                start_time: *start_time,
                end_time: *end_time,
            });
            entity_map.insert(*id, *salesman);
        }
        Event::BlockRemoved { id, .. } => {
            cal.remove_block(*id);
            entity_map.remove(id);
        }
        Event::BookingCreated { booking } => {
            entity_map.insert(booking.id, booking.salesman);
            cal.insert_booking(booking.clone());
            reconcile_slot(cal, booking.id);
        }
        Event::BookingApproved { id, at, by, .. } => {
            if let Some(b) = cal.booking_mut(*id) {
                b.status = BookingStatus::Confirmed;
                b.approved_at = Some(*at);
                b.approved_by = Some(*by);
            }
            reconcile_slot(cal, *id);
        }
        Event::BookingDeclined { id, at, by, reason, .. } => {
            if let Some(b) = cal.booking_mut(*id) {
                b.status = BookingStatus::Declined;
                b.declined_at = Some(*at);
                b.declined_by = Some(*by);
                b.decline_reason = Some(reason.clone());
            }
            reconcile_slot(cal, *id);
        }
        Event::BookingCanceled { id, at, by, reason, notes, .. } => {
            if let Some(b) = cal.booking_mut(*id) {
                b.status = BookingStatus::Canceled;
                b.canceled_at = Some(*at);
                b.canceled_by = Some(*by);
                b.cancellation_reason = Some(*reason);
                b.cancellation_notes = notes.clone();
            }
            reconcile_slot(cal, *id);
        }
        Event::BookingCompleted { id, .. } => {
            if let Some(b) = cal.booking_mut(*id) {
                b.status = BookingStatus::Completed;
            }
            reconcile_slot(cal, *id);
        }
        Event::BookingNoShow { id, .. } => {
            if let Some(b) = cal.booking_mut(*id) {
                b.status = BookingStatus::NoShow;
            }
            reconcile_slot(cal, *id);
        }
        Event::BookingReverted { id, .. } => {
            if let Some(b) = cal.booking_mut(*id) {
                b.status = BookingStatus::Pending;
                b.approved_at = None;
                b.approved_by = None;
            }
            reconcile_slot(cal, *id);
        }
        Event::BookingLocked { id, .. } => {
            if let Some(b) = cal.booking_mut(*id) {
                b.locked = true;
            }
        }
        Event::BookingUnlocked { id, .. } => {
            if let Some(b) = cal.booking_mut(*id) {
                b.locked = false;
            }
        }
        // Enrollment and cycle events are handled at the engine level, not here
        Event::SalesmanEnrolled { .. } | Event::CycleOpened { .. } | Event::CycleRemoved { .. } => {}
    }
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        drip: Arc<dyn DripScheduler>,
        config: ConfigHandle,
    ) -> std::io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            notify,
            drip,
            config,
            entities: DashMap::new(),
            cycles: RwLock::new(Vec::new()),
            codes: Mutex::new(BTreeSet::new()),
        };

        // Replay events — we're the sole owner of these Arcs, so try_lock and
        // try_write always succeed instantly (no contention). Never use
        // blocking_write here because this may run inside an async context.
        for event in &events {
            match event {
                Event::SalesmanEnrolled { id, employee_code, display_name } => {
                    let cal = SalesmanCalendar::new(*id, employee_code.clone(), display_name.clone());
                    engine.state.insert(*id, Arc::new(RwLock::new(cal)));
                    engine
                        .codes
                        .try_lock()
                        .expect("replay: uncontended lock")
                        .insert(employee_code.clone());
                }
                Event::CycleOpened { id, start_date, end_date } => {
                    engine.cycles.try_write().expect("replay: uncontended write").push(
                        AvailabilityCycle {
                            id: *id,
                            start_date: *start_date,
                            end_date: *end_date,
                        },
                    );
                }
                Event::CycleRemoved { id } => {
                    engine
                        .cycles
                        .try_write()
                        .expect("replay: uncontended write")
                        .retain(|c| c.id != *id);
                }
                other => {
                    if let Some(salesman_id) = event_salesman_id(other)
                        && let Some(entry) = engine.state.get(&salesman_id)
                    {
                        let cal_arc = entry.clone();
                        let mut guard = cal_arc.try_write().expect("replay: uncontended write");
                        apply_to_calendar(&mut guard, other, &engine.entities);
                    }
                }
            }
        }

        Ok(engine)
    }

    pub fn config(&self) -> &ConfigHandle {
        &self.config
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

    pub fn get_calendar(&self, id: &Ulid) -> Option<SharedCalendar> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn get_salesman_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entities.get(entity_id).map(|e| *e.value())
    }

    /// WAL-append + apply + notify in one call. The event hits disk before
    /// any in-memory state changes, so replay can never see state the log
    /// doesn't explain.
    pub(super) async fn persist_and_apply(
        &self,
        salesman_id: Ulid,
        cal: &mut SalesmanCalendar,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_calendar(cal, event, &self.entities);
        self.notify.send(salesman_id, event);
        Ok(())
    }

    /// Lookup entity → salesman, get the calendar, acquire its write lock.
    pub(super) async fn resolve_entity_write(
        &self,
        entity_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<SalesmanCalendar>), EngineError> {
        let salesman_id = self
            .get_salesman_for_entity(entity_id)
            .ok_or(EngineError::NotFound(*entity_id))?;
        let cal = self
            .get_calendar(&salesman_id)
            .ok_or(EngineError::NotFound(salesman_id))?;
        let guard = cal.write_owned().await;
        Ok((salesman_id, guard))
    }
}

/// Extract the salesman id from an event (for calendar-routed events).
fn event_salesman_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::SalesmanDeactivated { id } => Some(*id),
        Event::SlotsGenerated { salesman, .. }
        | Event::SlotsExpired { salesman, .. }
        | Event::SlotsRemoved { salesman, .. }
        | Event::BlockAdded { salesman, .. }
        | Event::BlockRemoved { salesman, .. }
        | Event::BookingApproved { salesman, .. }
        | Event::BookingDeclined { salesman, .. }
        | Event::BookingCanceled { salesman, .. }
        | Event::BookingCompleted { salesman, .. }
        | Event::BookingNoShow { salesman, .. }
        | Event::BookingReverted { salesman, .. }
        | Event::BookingLocked { salesman, .. }
        | Event::BookingUnlocked { salesman, .. } => Some(*salesman),
        Event::BookingCreated { booking } => Some(booking.salesman),
        Event::SalesmanEnrolled { .. } | Event::CycleOpened { .. } | Event::CycleRemoved { .. } => {
            None
        }
    }
}
