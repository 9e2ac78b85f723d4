use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::{RwLock, oneshot};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::plan_slots;
use super::conflict::{find_conflict, find_unavailability_hit, local_now, validate_advance};
use super::{Engine, EngineError, SharedCalendar, WalCommand};

/// Next free employee code: one past the highest allocated number, probing
/// forward within the retry budget.
fn allocate_code(codes: &BTreeSet<String>) -> Result<String, EngineError> {
    let highest = codes
        .iter()
        .filter_map(|c| c.strip_prefix(EMPLOYEE_CODE_PREFIX))
        .filter_map(|n| n.parse::<u64>().ok())
        .max()
        .unwrap_or(0);
    let mut n = highest + 1;
    for _ in 0..EMPLOYEE_CODE_ATTEMPTS {
        let candidate = format!("{EMPLOYEE_CODE_PREFIX}{n:0width$}", width = EMPLOYEE_CODE_DIGITS);
        if !codes.contains(&candidate) {
            return Ok(candidate);
        }
        n += 1;
    }
    Err(EngineError::CodeAllocationFailed(EMPLOYEE_CODE_ATTEMPTS))
}

impl Engine {
    // ── Roster ───────────────────────────────────────────

    /// Enroll a salesman, allocating their employee code. Returns the code.
    pub async fn enroll_salesman(
        &self,
        id: Ulid,
        display_name: Option<String>,
    ) -> Result<String, EngineError> {
        if self.state.len() >= MAX_SALESMEN {
            return Err(EngineError::LimitExceeded("too many salesmen"));
        }
        if let Some(ref n) = display_name
            && n.len() > MAX_NAME_LEN
        {
            return Err(EngineError::LimitExceeded("display name too long"));
        }
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        // The codes lock serializes allocation and is held across the WAL
        // append so two enrollments can never commit the same code.
        let mut codes = self.codes.lock().await;
        let code = allocate_code(&codes)?;

        let event = Event::SalesmanEnrolled {
            id,
            employee_code: code.clone(),
            display_name: display_name.clone(),
        };
        self.wal_append(&event).await?;
        codes.insert(code.clone());
        drop(codes);

        let cal = SalesmanCalendar::new(id, code.clone(), display_name);
        self.state.insert(id, Arc::new(RwLock::new(cal)));
        metrics::gauge!(crate::observability::SALESMEN_ACTIVE).increment(1.0);
        self.notify.send(id, &event);
        Ok(code)
    }

    /// Drop a salesman from the "all active" generation target set. Their
    /// calendar, slots and booking history stay. Idempotent.
    pub async fn deactivate_salesman(&self, id: Ulid) -> Result<(), EngineError> {
        let cal = self.get_calendar(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = cal.write().await;
        if !guard.active {
            return Ok(());
        }
        let event = Event::SalesmanDeactivated { id };
        self.persist_and_apply(id, &mut guard, &event).await?;
        metrics::gauge!(crate::observability::SALESMEN_ACTIVE).decrement(1.0);
        Ok(())
    }

    // ── Availability cycles ──────────────────────────────

    /// Open a cycle over an explicit date range. Cycles may not overlap:
    /// at most one is current for any instant.
    pub async fn open_cycle(
        &self,
        id: Ulid,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<CycleInfo, EngineError> {
        if start_date > end_date {
            return Err(EngineError::InvalidRange("cycle start after end"));
        }
        if (end_date - start_date).num_days() + 1 > MAX_CYCLE_DAYS {
            return Err(EngineError::LimitExceeded("cycle too long"));
        }
        let mut cycles = self.cycles.write().await;
        if let Some(existing) = cycles
            .iter()
            .find(|c| c.start_date <= end_date && start_date <= c.end_date)
        {
            return Err(EngineError::CycleOverlap(existing.id));
        }
        let event = Event::CycleOpened { id, start_date, end_date };
        self.wal_append(&event).await?;
        cycles.push(AvailabilityCycle { id, start_date, end_date });
        Ok(CycleInfo { id, start_date, end_date })
    }

    /// The cycle covering `today`, opening a fresh `cycle_days`-long one
    /// starting today if none exists. Serialized on the cycles lock so
    /// concurrent callers converge on one cycle.
    pub async fn current_cycle(&self, today: NaiveDate) -> Result<CycleInfo, EngineError> {
        let mut cycles = self.cycles.write().await;
        if let Some(c) = cycles.iter().find(|c| c.contains(today)) {
            return Ok(CycleInfo {
                id: c.id,
                start_date: c.start_date,
                end_date: c.end_date,
            });
        }
        let cfg = self.config.snapshot();
        let id = Ulid::new();
        let end_date = today + Duration::days(cfg.cycle_days as i64 - 1);
        if let Some(existing) = cycles
            .iter()
            .find(|c| c.start_date <= end_date && today <= c.end_date)
        {
            // A future cycle starts inside the would-be window.
            return Err(EngineError::CycleOverlap(existing.id));
        }
        let event = Event::CycleOpened { id, start_date: today, end_date };
        self.wal_append(&event).await?;
        cycles.push(AvailabilityCycle { id, start_date: today, end_date });
        Ok(CycleInfo { id, start_date: today, end_date })
    }

    /// Delete a cycle record. Slots keep their dangling cycle link and
    /// booking history is untouched.
    pub async fn remove_cycle(&self, actor: Actor, id: Ulid) -> Result<(), EngineError> {
        if !actor.grade.is_admin() {
            return Err(EngineError::AdminRequired("remove_cycle"));
        }
        let mut cycles = self.cycles.write().await;
        if !cycles.iter().any(|c| c.id == id) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::CycleRemoved { id };
        self.wal_append(&event).await?;
        cycles.retain(|c| c.id != id);
        Ok(())
    }

    // ── Slot generation ──────────────────────────────────

    /// Generate open slots for every weekday in the cycle, for every
    /// targeted salesman, for every appointment kind, on the configured
    /// grid. Existing (date, time, kind) combinations are silently
    /// skipped; re-running is a no-op. Returns the number of slots
    /// actually created.
    pub async fn generate_slots(
        &self,
        cycle_id: Ulid,
        target: GenerateTarget,
    ) -> Result<usize, EngineError> {
        let cfg = self.config.snapshot();
        let cycle = {
            let cycles = self.cycles.read().await;
            cycles
                .iter()
                .find(|c| c.id == cycle_id)
                .copied()
                .ok_or(EngineError::NotFound(cycle_id))?
        };

        let targets: Vec<Ulid> = match target {
            GenerateTarget::AllActive => self.state.iter().map(|e| *e.key()).collect(),
            GenerateTarget::Salesmen(ids) => {
                if ids.len() > MAX_GENERATE_TARGETS {
                    return Err(EngineError::LimitExceeded("too many generation targets"));
                }
                for id in &ids {
                    if !self.state.contains_key(id) {
                        return Err(EngineError::NotFound(*id));
                    }
                }
                ids
            }
        };

        let mut created = 0usize;
        for sid in targets {
            let Some(cal) = self.get_calendar(&sid) else {
                continue;
            };
            let mut guard = cal.write().await;
            // Deactivated salesmen are excluded; their existing slots stay.
            if !guard.active {
                continue;
            }
            let plan = plan_slots(
                &guard,
                cycle.start_date,
                cycle.end_date,
                cfg.day_start,
                cfg.day_end,
                cfg.slot_interval_minutes,
            );
            if plan.is_empty() {
                continue;
            }
            if guard.slot_count() + plan.len() > MAX_SLOTS_PER_SALESMAN {
                return Err(EngineError::LimitExceeded("too many slots on calendar"));
            }
            let created_at = Utc::now();
            let seeds: Vec<SlotSeed> = plan
                .into_iter()
                .map(|(date, start_time, kind)| SlotSeed {
                    id: Ulid::new(),
                    date,
                    start_time,
                    kind,
                    created_at,
                })
                .collect();
            let count = seeds.len();
            let event = Event::SlotsGenerated {
                salesman: sid,
                cycle: Some(cycle.id),
                slots: seeds,
            };
            self.persist_and_apply(sid, &mut guard, &event).await?;
            metrics::counter!(crate::observability::SLOTS_GENERATED_TOTAL).increment(count as u64);
            created += count;
        }
        Ok(created)
    }

    // ── Booking creation ─────────────────────────────────

    /// Claim an open slot and create a booking for it. Lookup, conflict
    /// re-check, slot reservation and booking insert all happen under one
    /// calendar write lock and commit as one event, so at most one request
    /// ever wins a given slot.
    pub async fn request_booking(
        &self,
        actor: Actor,
        client: Ulid,
        salesman: Ulid,
        date: NaiveDate,
        time: NaiveTime,
        kind: AppointmentKind,
    ) -> Result<Booking, EngineError> {
        let cfg = self.config.snapshot();
        let now = local_now(cfg.timezone);

        let cal = self.get_calendar(&salesman).ok_or(EngineError::NotFound(salesman))?;
        let mut guard = cal.write().await;
        if !guard.active {
            return Err(EngineError::SalesmanInactive(salesman));
        }
        if guard.bookings.len() >= MAX_BOOKINGS_PER_SALESMAN {
            return Err(EngineError::LimitExceeded("too many bookings on calendar"));
        }

        if date.and_time(time) <= now {
            reject("past");
            return Err(EngineError::SlotInPast { date, time });
        }
        validate_advance(cfg.min_advance_hours, cfg.max_advance_days, now, date, time)
            .inspect_err(|_| reject("advance_window"))?;

        let slot_id = match guard.slot(date, time, kind) {
            Some(slot) if slot.state == SlotState::Open => slot.id,
            _ => {
                reject("slot_unavailable");
                return Err(EngineError::SlotUnavailable { date, time, kind });
            }
        };

        if let Some(hit) = find_conflict(
            &guard,
            date,
            time,
            cfg.appointment_minutes,
            cfg.buffer_minutes,
            None,
        ) {
            reject("booking_conflict");
            return Err(EngineError::BookingConflict(hit.id));
        }
        if let Some(block) = find_unavailability_hit(&guard, date, time) {
            reject("unavailability");
            return Err(EngineError::UnavailabilityConflict(block.id));
        }

        let status = if actor.grade.requires_approval() {
            BookingStatus::Pending
        } else {
            BookingStatus::Confirmed
        };
        let commission = if actor.grade == ActorGrade::Agent {
            cfg.commission_rate(kind)
        } else {
            Decimal::ZERO
        };

        let booking = Booking {
            id: Ulid::new(),
            client,
            salesman,
            date,
            start_time: time,
            duration_minutes: cfg.appointment_minutes,
            kind,
            status,
            slot: Some(slot_id),
            commission,
            locked: false,
            created_at: Utc::now(),
            created_by: actor.id,
            approved_at: None,
            approved_by: None,
            declined_at: None,
            declined_by: None,
            decline_reason: None,
            canceled_at: None,
            canceled_by: None,
            cancellation_reason: None,
            cancellation_notes: None,
        };
        let event = Event::BookingCreated { booking: booking.clone() };
        self.persist_and_apply(salesman, &mut guard, &event).await?;
        metrics::counter!(
            crate::observability::BOOKINGS_CREATED_TOTAL,
            "kind" => kind.as_str()
        )
        .increment(1);
        Ok(booking)
    }

    // ── Booking transitions ──────────────────────────────

    /// pending → confirmed. Admin only; the appointment must still be in
    /// the future. Approving an already-confirmed booking is the race
    /// loser's outcome, not an error.
    pub async fn approve_booking(&self, actor: Actor, id: Ulid) -> Result<Transition, EngineError> {
        if !actor.grade.is_admin() {
            return Err(EngineError::AdminRequired("approve"));
        }
        let (salesman, mut guard) = self.resolve_entity_write(&id).await?;
        let booking = guard.booking(id).ok_or(EngineError::NotFound(id))?;
        match booking.status {
            BookingStatus::Confirmed => return Ok(Transition::AlreadyProcessed),
            BookingStatus::Pending => {}
            status => return Err(EngineError::InvalidTransition { action: "approve", status }),
        }
        let cfg = self.config.snapshot();
        if booking.starts_at() <= local_now(cfg.timezone) {
            return Err(EngineError::AppointmentPassed);
        }
        let event = Event::BookingApproved {
            id,
            salesman,
            at: Utc::now(),
            by: actor.id,
        };
        self.persist_and_apply(salesman, &mut guard, &event).await?;
        transition_applied("approve");
        Ok(Transition::Applied)
    }

    /// pending → declined. Admin only; a non-empty reason is required.
    /// Reopens the slot.
    pub async fn decline_booking(
        &self,
        actor: Actor,
        id: Ulid,
        reason: &str,
    ) -> Result<Transition, EngineError> {
        if !actor.grade.is_admin() {
            return Err(EngineError::AdminRequired("decline"));
        }
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(EngineError::ReasonRequired);
        }
        if reason.len() > MAX_REASON_LEN {
            return Err(EngineError::LimitExceeded("decline reason too long"));
        }
        let (salesman, mut guard) = self.resolve_entity_write(&id).await?;
        let booking = guard.booking(id).ok_or(EngineError::NotFound(id))?;
        match booking.status {
            BookingStatus::Declined => return Ok(Transition::AlreadyProcessed),
            BookingStatus::Pending => {}
            status => return Err(EngineError::InvalidTransition { action: "decline", status }),
        }
        let event = Event::BookingDeclined {
            id,
            salesman,
            at: Utc::now(),
            by: actor.id,
            reason: reason.to_string(),
        };
        self.persist_and_apply(salesman, &mut guard, &event).await?;
        transition_applied("decline");
        Ok(Transition::Applied)
    }

    /// confirmed/completed → canceled. Staff or admin; forbidden while
    /// locked for payroll. Reopens the slot.
    pub async fn cancel_booking(
        &self,
        actor: Actor,
        id: Ulid,
        reason: CancellationReason,
        notes: Option<String>,
    ) -> Result<Transition, EngineError> {
        if !actor.grade.can_moderate() {
            return Err(EngineError::ModeratorRequired("cancel"));
        }
        if let Some(ref n) = notes
            && n.len() > MAX_NOTES_LEN
        {
            return Err(EngineError::LimitExceeded("cancellation notes too long"));
        }
        let (salesman, mut guard) = self.resolve_entity_write(&id).await?;
        let booking = guard.booking(id).ok_or(EngineError::NotFound(id))?;
        match booking.status {
            BookingStatus::Canceled => return Ok(Transition::AlreadyProcessed),
            BookingStatus::Confirmed | BookingStatus::Completed => {}
            status => return Err(EngineError::InvalidTransition { action: "cancel", status }),
        }
        if booking.locked {
            return Err(EngineError::Locked(id));
        }
        let event = Event::BookingCanceled {
            id,
            salesman,
            at: Utc::now(),
            by: actor.id,
            reason,
            notes,
        };
        self.persist_and_apply(salesman, &mut guard, &event).await?;
        transition_applied("cancel");
        Ok(Transition::Applied)
    }

    /// confirmed → completed, only once the appointment day has arrived.
    /// Starts the "attended" drip campaign after the transition commits.
    pub async fn mark_attended(
        &self,
        actor: Actor,
        id: Ulid,
        today: NaiveDate,
    ) -> Result<Transition, EngineError> {
        if !actor.grade.can_moderate() {
            return Err(EngineError::ModeratorRequired("mark_attended"));
        }
        let (salesman, mut guard) = self.resolve_entity_write(&id).await?;
        let booking = guard.booking(id).ok_or(EngineError::NotFound(id))?;
        match booking.status {
            BookingStatus::Completed => return Ok(Transition::AlreadyProcessed),
            BookingStatus::Confirmed => {}
            status => {
                return Err(EngineError::InvalidTransition { action: "mark_attended", status });
            }
        }
        if booking.date > today {
            return Err(EngineError::NotHeldYet(booking.date));
        }
        let event = Event::BookingCompleted { id, salesman };
        self.persist_and_apply(salesman, &mut guard, &event).await?;
        transition_applied("mark_attended");

        let booking = guard.booking(id).cloned();
        drop(guard);
        if let Some(booking) = booking {
            self.start_drip(crate::drip::CampaignKind::Attended, &booking).await;
        }
        Ok(Transition::Applied)
    }

    /// confirmed → no_show. The fixed status mapping reopens the slot;
    /// the sweeper then expires it since its time has passed. Starts the
    /// "did-not-attend" drip campaign.
    pub async fn mark_no_show(
        &self,
        actor: Actor,
        id: Ulid,
        today: NaiveDate,
    ) -> Result<Transition, EngineError> {
        if !actor.grade.can_moderate() {
            return Err(EngineError::ModeratorRequired("mark_no_show"));
        }
        let (salesman, mut guard) = self.resolve_entity_write(&id).await?;
        let booking = guard.booking(id).ok_or(EngineError::NotFound(id))?;
        match booking.status {
            BookingStatus::NoShow => return Ok(Transition::AlreadyProcessed),
            BookingStatus::Confirmed => {}
            status => {
                return Err(EngineError::InvalidTransition { action: "mark_no_show", status });
            }
        }
        if booking.date > today {
            return Err(EngineError::NotHeldYet(booking.date));
        }
        let event = Event::BookingNoShow { id, salesman };
        self.persist_and_apply(salesman, &mut guard, &event).await?;
        transition_applied("mark_no_show");

        let booking = guard.booking(id).cloned();
        drop(guard);
        if let Some(booking) = booking {
            self.start_drip(crate::drip::CampaignKind::DidNotAttend, &booking).await;
        }
        Ok(Transition::Applied)
    }

    /// confirmed → pending: administrative revert. Clears approval
    /// metadata; forbidden while locked or once the appointment has
    /// passed.
    pub async fn revert_booking(&self, actor: Actor, id: Ulid) -> Result<Transition, EngineError> {
        if !actor.grade.is_admin() {
            return Err(EngineError::AdminRequired("revert"));
        }
        let (salesman, mut guard) = self.resolve_entity_write(&id).await?;
        let booking = guard.booking(id).ok_or(EngineError::NotFound(id))?;
        match booking.status {
            BookingStatus::Pending => return Ok(Transition::AlreadyProcessed),
            BookingStatus::Confirmed => {}
            status => return Err(EngineError::InvalidTransition { action: "revert", status }),
        }
        if booking.locked {
            return Err(EngineError::Locked(id));
        }
        let cfg = self.config.snapshot();
        if booking.starts_at() <= local_now(cfg.timezone) {
            return Err(EngineError::AppointmentPassed);
        }
        let event = Event::BookingReverted { id, salesman };
        self.persist_and_apply(salesman, &mut guard, &event).await?;
        transition_applied("revert");
        Ok(Transition::Applied)
    }

    /// Drip failures are logged and never propagated; the transition that
    /// triggered them has already committed.
    async fn start_drip(&self, kind: crate::drip::CampaignKind, booking: &Booking) {
        if let Err(e) = self.drip.start_campaign(kind, booking).await {
            tracing::warn!(
                booking = %booking.id,
                campaign = kind.as_str(),
                "drip trigger failed: {e}"
            );
        }
    }

    // ── Payroll locks ────────────────────────────────────

    /// Lock every booking dated within `[from, to]` for payroll. Returns
    /// the number of bookings newly locked.
    pub async fn lock_bookings(
        &self,
        actor: Actor,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<usize, EngineError> {
        if !actor.grade.is_admin() {
            return Err(EngineError::AdminRequired("lock_bookings"));
        }
        if from > to {
            return Err(EngineError::InvalidRange("lock range start after end"));
        }
        let calendars: Vec<(Ulid, SharedCalendar)> =
            self.state.iter().map(|e| (*e.key(), e.value().clone())).collect();
        let mut locked = 0usize;
        for (sid, cal) in calendars {
            let mut guard = cal.write().await;
            let ids: Vec<Ulid> = guard
                .bookings
                .iter()
                .filter(|b| !b.locked && from <= b.date && b.date <= to)
                .map(|b| b.id)
                .collect();
            for id in ids {
                let event = Event::BookingLocked { id, salesman: sid };
                self.persist_and_apply(sid, &mut guard, &event).await?;
                locked += 1;
            }
        }
        Ok(locked)
    }

    /// Administrative override: clear one booking's payroll lock.
    pub async fn unlock_booking(&self, actor: Actor, id: Ulid) -> Result<Transition, EngineError> {
        if !actor.grade.is_admin() {
            return Err(EngineError::AdminRequired("unlock"));
        }
        let (salesman, mut guard) = self.resolve_entity_write(&id).await?;
        let booking = guard.booking(id).ok_or(EngineError::NotFound(id))?;
        if !booking.locked {
            return Ok(Transition::AlreadyProcessed);
        }
        let event = Event::BookingUnlocked { id, salesman };
        self.persist_and_apply(salesman, &mut guard, &event).await?;
        Ok(Transition::Applied)
    }

    // ── Unavailability blocks ────────────────────────────

    pub async fn add_block(
        &self,
        id: Ulid,
        salesman: Ulid,
        start_date: NaiveDate,
        end_date: NaiveDate,
        start_time: NaiveTime,
        end_time: NaiveTime,
    ) -> Result<(), EngineError> {
        if start_date > end_date {
            return Err(EngineError::InvalidRange("block start date after end date"));
        }
        if start_time >= end_time {
            return Err(EngineError::InvalidRange("block start time not before end time"));
        }
        if self.entities.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let cal = self.get_calendar(&salesman).ok_or(EngineError::NotFound(salesman))?;
        let mut guard = cal.write().await;
        if guard.blocks.len() >= MAX_BLOCKS_PER_SALESMAN {
            return Err(EngineError::LimitExceeded("too many blocks on calendar"));
        }
        let event = Event::BlockAdded {
            id,
            salesman,
            start_date,
            end_date,
            start_time,
            end_time,
        };
        self.persist_and_apply(salesman, &mut guard, &event).await
    }

    pub async fn remove_block(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let (salesman, mut guard) = self.resolve_entity_write(&id).await?;
        if !guard.blocks.iter().any(|b| b.id == id) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::BlockRemoved { id, salesman };
        self.persist_and_apply(salesman, &mut guard, &event).await?;
        Ok(salesman)
    }

    // ── Sweeper operations ───────────────────────────────

    /// Expire open slots dated before today. Reserved slots are never
    /// touched; a second consecutive run is a fixed point.
    pub async fn mark_past_slots_inactive(&self, today: NaiveDate) -> Result<usize, EngineError> {
        self.expire_slots_where(|slot| slot.date < today).await
    }

    /// Expire today's open slots whose start time has already passed.
    pub async fn mark_elapsed_today_slots_inactive(
        &self,
        today: NaiveDate,
        now: NaiveTime,
    ) -> Result<usize, EngineError> {
        self.expire_slots_where(|slot| slot.date == today && slot.start_time < now).await
    }

    /// Expire open slots older than `weeks`. History is preserved: slots
    /// are expired, never deleted.
    pub async fn cleanup_old_slots(
        &self,
        weeks: u32,
        today: NaiveDate,
    ) -> Result<usize, EngineError> {
        let cutoff = today - Duration::weeks(weeks as i64);
        self.expire_slots_where(|slot| slot.date < cutoff).await
    }

    async fn expire_slots_where(
        &self,
        condition: impl Fn(&TimeSlot) -> bool,
    ) -> Result<usize, EngineError> {
        let calendars: Vec<(Ulid, SharedCalendar)> =
            self.state.iter().map(|e| (*e.key(), e.value().clone())).collect();
        let mut expired = 0usize;
        for (sid, cal) in calendars {
            let mut guard = cal.write().await;
            let ids: Vec<Ulid> = guard
                .slots
                .values()
                .flat_map(|day| day.values())
                .filter(|s| s.state == SlotState::Open && condition(s))
                .map(|s| s.id)
                .collect();
            if ids.is_empty() {
                continue;
            }
            let count = ids.len();
            let event = Event::SlotsExpired { salesman: sid, slots: ids };
            self.persist_and_apply(sid, &mut guard, &event).await?;
            metrics::counter!(crate::observability::SLOTS_EXPIRED_TOTAL).increment(count as u64);
            expired += count;
        }
        Ok(expired)
    }

    /// Bulk-complete confirmed bookings whose appointment ended at least
    /// `auto_complete_hours` ago. An administrative batch update: no drip
    /// campaign, no notification beyond the committed events.
    pub async fn auto_complete_elapsed(&self, now: NaiveDateTime) -> Result<usize, EngineError> {
        let cfg = self.config.snapshot();
        let cutoff = now - Duration::hours(cfg.auto_complete_hours);
        let calendars: Vec<(Ulid, SharedCalendar)> =
            self.state.iter().map(|e| (*e.key(), e.value().clone())).collect();
        let mut completed = 0usize;
        for (sid, cal) in calendars {
            let mut guard = cal.write().await;
            let ids: Vec<Ulid> = guard
                .bookings
                .iter()
                .filter(|b| b.status == BookingStatus::Confirmed && b.window().end <= cutoff)
                .map(|b| b.id)
                .collect();
            for id in ids {
                let event = Event::BookingCompleted { id, salesman: sid };
                self.persist_and_apply(sid, &mut guard, &event).await?;
                completed += 1;
            }
        }
        Ok(completed)
    }

    /// The only deletion path for slots: bulk-remove a cycle's unbooked
    /// slots. Reserved slots survive, so booking history keeps its links.
    pub async fn remove_cycle_slots(
        &self,
        actor: Actor,
        cycle_id: Ulid,
    ) -> Result<usize, EngineError> {
        if !actor.grade.is_admin() {
            return Err(EngineError::AdminRequired("remove_cycle_slots"));
        }
        let calendars: Vec<(Ulid, SharedCalendar)> =
            self.state.iter().map(|e| (*e.key(), e.value().clone())).collect();
        let mut removed = 0usize;
        for (sid, cal) in calendars {
            let mut guard = cal.write().await;
            let ids: Vec<Ulid> = guard
                .slots
                .values()
                .flat_map(|day| day.values())
                .filter(|s| s.cycle == Some(cycle_id) && s.state != SlotState::Reserved)
                .map(|s| s.id)
                .collect();
            if ids.is_empty() {
                continue;
            }
            removed += ids.len();
            let event = Event::SlotsRemoved { salesman: sid, slots: ids };
            self.persist_and_apply(sid, &mut guard, &event).await?;
        }
        Ok(removed)
    }

    // ── WAL maintenance ──────────────────────────────────

    /// Rewrite the WAL with the minimal event set that recreates current
    /// state: cycles, enrollments, slot seeds grouped by cycle, blocks,
    /// bookings (each carrying its full current record), and one expiry
    /// event per calendar.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        for c in self.cycles.read().await.iter() {
            events.push(Event::CycleOpened {
                id: c.id,
                start_date: c.start_date,
                end_date: c.end_date,
            });
        }

        let calendars: Vec<(Ulid, SharedCalendar)> =
            self.state.iter().map(|e| (*e.key(), e.value().clone())).collect();
        for (sid, cal) in calendars {
            let guard = cal.read().await;
            events.push(Event::SalesmanEnrolled {
                id: sid,
                employee_code: guard.employee_code.clone(),
                display_name: guard.display_name.clone(),
            });
            if !guard.active {
                events.push(Event::SalesmanDeactivated { id: sid });
            }

            let mut by_cycle: HashMap<Option<Ulid>, Vec<SlotSeed>> = HashMap::new();
            let mut expired: Vec<Ulid> = Vec::new();
            for slot in guard.slots.values().flat_map(|day| day.values()) {
                by_cycle.entry(slot.cycle).or_default().push(SlotSeed {
                    id: slot.id,
                    date: slot.date,
                    start_time: slot.start_time,
                    kind: slot.kind,
                    created_at: slot.created_at,
                });
                if slot.state == SlotState::Expired {
                    expired.push(slot.id);
                }
            }
            for (cycle, slots) in by_cycle {
                events.push(Event::SlotsGenerated { salesman: sid, cycle, slots });
            }

            for b in &guard.blocks {
                events.push(Event::BlockAdded {
                    id: b.id,
                    salesman: sid,
                    start_date: b.start_date,
                    end_date: b.end_date,
                    start_time: b.start_time,
                    end_time: b.end_time,
                });
            }
            // Replaying a created event restores the full record; the
            // slot's reserved state is re-derived from the status.
            for b in &guard.bookings {
                events.push(Event::BookingCreated { booking: b.clone() });
            }
            if !expired.is_empty() {
                events.push(Event::SlotsExpired { salesman: sid, slots: expired });
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

fn reject(reason: &'static str) {
    metrics::counter!(
        crate::observability::BOOKING_REJECTIONS_TOTAL,
        "reason" => reason
    )
    .increment(1);
}

fn transition_applied(action: &'static str) {
    metrics::counter!(
        crate::observability::BOOKING_TRANSITIONS_TOTAL,
        "action" => action
    )
    .increment(1);
}
