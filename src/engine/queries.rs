use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError, SharedCalendar};

fn slot_info(slot: &TimeSlot) -> SlotInfo {
    SlotInfo {
        id: slot.id,
        salesman: slot.salesman,
        date: slot.date,
        start_time: slot.start_time,
        kind: slot.kind,
        state: slot.state,
        booked_by: slot.booked_by,
    }
}

impl Engine {
    pub async fn list_salesmen(&self) -> Vec<SalesmanInfo> {
        let calendars: Vec<SharedCalendar> =
            self.state.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(calendars.len());
        for cal in calendars {
            let guard = cal.read().await;
            out.push(SalesmanInfo {
                id: guard.id,
                employee_code: guard.employee_code.clone(),
                display_name: guard.display_name.clone(),
                active: guard.active,
            });
        }
        out.sort_by(|a, b| a.employee_code.cmp(&b.employee_code));
        out
    }

    pub async fn get_salesman(&self, id: Ulid) -> Option<SalesmanInfo> {
        let cal = self.get_calendar(&id)?;
        let guard = cal.read().await;
        Some(SalesmanInfo {
            id: guard.id,
            employee_code: guard.employee_code.clone(),
            display_name: guard.display_name.clone(),
            active: guard.active,
        })
    }

    /// Slots a client could book right now: open, on the given date,
    /// starting strictly after `now`. Pass a kind to narrow further.
    pub async fn available_slots(
        &self,
        salesman: Ulid,
        date: NaiveDate,
        kind: Option<AppointmentKind>,
        now: NaiveDateTime,
    ) -> Result<Vec<SlotInfo>, EngineError> {
        let cal = self.get_calendar(&salesman).ok_or(EngineError::NotFound(salesman))?;
        let guard = cal.read().await;
        let Some(day) = guard.slots.get(&date) else {
            return Ok(Vec::new());
        };
        Ok(day
            .values()
            .filter(|s| s.state == SlotState::Open && s.starts_at() > now)
            .filter(|s| kind.is_none_or(|k| s.kind == k))
            .map(slot_info)
            .collect())
    }

    /// Every slot on one date regardless of state, for admin views.
    pub async fn slots_on(
        &self,
        salesman: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<SlotInfo>, EngineError> {
        let cal = self.get_calendar(&salesman).ok_or(EngineError::NotFound(salesman))?;
        let guard = cal.read().await;
        Ok(guard
            .slots
            .get(&date)
            .map(|day| day.values().map(slot_info).collect())
            .unwrap_or_default())
    }

    pub async fn get_slot(&self, id: Ulid) -> Result<SlotInfo, EngineError> {
        let salesman = self.get_salesman_for_entity(&id).ok_or(EngineError::NotFound(id))?;
        let cal = self.get_calendar(&salesman).ok_or(EngineError::NotFound(salesman))?;
        let guard = cal.read().await;
        guard.slot_by_id(id).map(slot_info).ok_or(EngineError::NotFound(id))
    }

    pub async fn get_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let salesman = self.get_salesman_for_entity(&id).ok_or(EngineError::NotFound(id))?;
        let cal = self.get_calendar(&salesman).ok_or(EngineError::NotFound(salesman))?;
        let guard = cal.read().await;
        guard.booking(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Bookings dated within `[from, to]`, in (date, time) order.
    pub async fn bookings_between(
        &self,
        salesman: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Booking>, EngineError> {
        let cal = self.get_calendar(&salesman).ok_or(EngineError::NotFound(salesman))?;
        let guard = cal.read().await;
        let lo = guard.bookings.partition_point(|b| b.date < from);
        let hi = guard.bookings.partition_point(|b| b.date <= to);
        Ok(guard.bookings[lo..hi].to_vec())
    }

    /// Commission owed to one salesman's bookings over a date range. Only
    /// confirmed and completed bookings count.
    pub async fn commission_summary(
        &self,
        salesman: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<CommissionSummary, EngineError> {
        let cal = self.get_calendar(&salesman).ok_or(EngineError::NotFound(salesman))?;
        let guard = cal.read().await;
        let mut total = Decimal::ZERO;
        let mut bookings = 0usize;
        for b in &guard.bookings {
            if b.status.counts_for_commission() && from <= b.date && b.date <= to {
                total += b.commission;
                bookings += 1;
            }
        }
        Ok(CommissionSummary { salesman, total, bookings })
    }

    /// Per-salesman commission totals across the whole roster, payroll's
    /// view of a period. Salesmen with no counting bookings are included
    /// with a zero total.
    pub async fn commission_report(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Vec<CommissionSummary> {
        let ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Ok(summary) = self.commission_summary(id, from, to).await {
                out.push(summary);
            }
        }
        out.sort_by_key(|s| s.salesman);
        out
    }

    pub async fn list_cycles(&self) -> Vec<CycleInfo> {
        let cycles = self.cycles.read().await;
        let mut out: Vec<CycleInfo> = cycles
            .iter()
            .map(|c| CycleInfo {
                id: c.id,
                start_date: c.start_date,
                end_date: c.end_date,
            })
            .collect();
        out.sort_by_key(|c| c.start_date);
        out
    }

    pub async fn list_blocks(&self, salesman: Ulid) -> Result<Vec<Unavailability>, EngineError> {
        let cal = self.get_calendar(&salesman).ok_or(EngineError::NotFound(salesman))?;
        let guard = cal.read().await;
        Ok(guard.blocks.clone())
    }
}
