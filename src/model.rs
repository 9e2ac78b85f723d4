use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Half-open range `[start, end)` in the business-local timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl TimeRange {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        debug_assert!(start < end, "TimeRange start must be before end");
        Self { start, end }
    }

    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: NaiveDateTime) -> bool {
        self.start <= t && t < self.end
    }
}

/// How the appointment is held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AppointmentKind {
    Zoom,
    InPerson,
}

impl AppointmentKind {
    /// Every kind a salesman offers slots for, in generation order.
    pub const ALL: [AppointmentKind; 2] = [AppointmentKind::Zoom, AppointmentKind::InPerson];

    pub fn as_str(self) -> &'static str {
        match self {
            AppointmentKind::Zoom => "zoom",
            AppointmentKind::InPerson => "in_person",
        }
    }
}

impl std::fmt::Display for AppointmentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Completed,
    Canceled,
    NoShow,
    Declined,
}

impl BookingStatus {
    /// Whether a booking in this status keeps its slot reserved.
    /// The mapping is fixed: pending, confirmed and completed hold the
    /// slot; canceled, declined and no-show release it.
    pub fn holds_slot(self) -> bool {
        matches!(
            self,
            BookingStatus::Pending | BookingStatus::Confirmed | BookingStatus::Completed
        )
    }

    /// Whether a booking in this status blocks other bookings from
    /// overlapping its window.
    pub fn blocks_conflicts(self) -> bool {
        matches!(self, BookingStatus::Confirmed | BookingStatus::Completed)
    }

    /// Whether a booking in this status earns its creator commission.
    pub fn counts_for_commission(self) -> bool {
        matches!(self, BookingStatus::Confirmed | BookingStatus::Completed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Completed => "completed",
            BookingStatus::Canceled => "canceled",
            BookingStatus::NoShow => "no_show",
            BookingStatus::Declined => "declined",
        }
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured reason recorded when a confirmed booking is canceled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancellationReason {
    ClientRequest,
    NoShow,
    SalesmanUnavailable,
    Duplicate,
    Other,
}

impl CancellationReason {
    pub fn as_str(self) -> &'static str {
        match self {
            CancellationReason::ClientRequest => "client_request",
            CancellationReason::NoShow => "no_show",
            CancellationReason::SalesmanUnavailable => "salesman_unavailable",
            CancellationReason::Duplicate => "duplicate",
            CancellationReason::Other => "other",
        }
    }
}

/// Lifecycle of a generated slot. `Reserved` and `Expired` are both
/// inactive from a client's point of view; only `Open` slots can be booked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotState {
    Open,
    Reserved,
    Expired,
}

impl SlotState {
    pub fn is_active(self) -> bool {
        matches!(self, SlotState::Open)
    }
}

/// Grade of the person performing an operation. Determines whether a new
/// booking needs approval and which transitions the caller may trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActorGrade {
    /// Remote agent: bookings start pending and earn commission.
    Agent,
    /// Office staff: bookings are confirmed immediately, no commission.
    Staff,
    Admin,
}

impl ActorGrade {
    pub fn requires_approval(self) -> bool {
        matches!(self, ActorGrade::Agent)
    }

    pub fn can_moderate(self) -> bool {
        matches!(self, ActorGrade::Staff | ActorGrade::Admin)
    }

    pub fn is_admin(self) -> bool {
        matches!(self, ActorGrade::Admin)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: Ulid,
    pub grade: ActorGrade,
}

/// A bookable appointment opening on one salesman's calendar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeSlot {
    pub id: Ulid,
    pub salesman: Ulid,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub kind: AppointmentKind,
    pub state: SlotState,
    /// Booking currently holding this slot, if reserved.
    pub booked_by: Option<Ulid>,
    /// Cycle whose generation run created this slot, if any.
    pub cycle: Option<Ulid>,
    pub created_at: DateTime<Utc>,
}

impl TimeSlot {
    pub fn starts_at(&self) -> NaiveDateTime {
        self.date.and_time(self.start_time)
    }

    pub fn is_booked(&self) -> bool {
        self.state == SlotState::Reserved
    }
}

/// Compact slot payload carried by `Event::SlotsGenerated`. Slots are
/// always born `Open`, so state is implicit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotSeed {
    pub id: Ulid,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub kind: AppointmentKind,
    pub created_at: DateTime<Utc>,
}

/// A client appointment. Carries its full audit trail so that replaying
/// a `BookingCreated` event reconstructs the record exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub client: Ulid,
    pub salesman: Ulid,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub duration_minutes: u32,
    pub kind: AppointmentKind,
    pub status: BookingStatus,
    /// Slot this booking reserved, if it still exists.
    pub slot: Option<Ulid>,
    /// Commission owed to the creator, fixed at creation time.
    pub commission: Decimal,
    /// Set while the booking's period is closed for payroll.
    pub locked: bool,
    pub created_at: DateTime<Utc>,
    pub created_by: Ulid,
    pub approved_at: Option<DateTime<Utc>>,
    pub approved_by: Option<Ulid>,
    pub declined_at: Option<DateTime<Utc>>,
    pub declined_by: Option<Ulid>,
    pub decline_reason: Option<String>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub canceled_by: Option<Ulid>,
    pub cancellation_reason: Option<CancellationReason>,
    pub cancellation_notes: Option<String>,
}

impl Booking {
    pub fn starts_at(&self) -> NaiveDateTime {
        self.date.and_time(self.start_time)
    }

    /// The appointment window itself, `[start, start + duration)`.
    pub fn window(&self) -> TimeRange {
        let start = self.starts_at();
        TimeRange::new(start, start + Duration::minutes(self.duration_minutes as i64))
    }

    /// The window extended by the post-appointment buffer, used for
    /// conflict detection.
    pub fn buffered_window(&self, buffer_minutes: u32) -> TimeRange {
        let start = self.starts_at();
        let total = (self.duration_minutes + buffer_minutes) as i64;
        TimeRange::new(start, start + Duration::minutes(total))
    }
}

/// A recurring block of time a salesman is never bookable, e.g. vacation.
/// The time window applies to every date in `[start_date, end_date]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unavailability {
    pub id: Ulid,
    pub salesman: Ulid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

impl Unavailability {
    pub fn covers_date(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }

    /// Point-in-time check: does `time` fall inside the blocked window?
    pub fn covers_time(&self, time: NaiveTime) -> bool {
        self.start_time <= time && time < self.end_time
    }
}

/// A payroll-period window that slot generation runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvailabilityCycle {
    pub id: Ulid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl AvailabilityCycle {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }
}

/// Outcome of a booking transition. Retrying a transition the booking has
/// already gone through reports `AlreadyProcessed` instead of failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied,
    AlreadyProcessed,
}

/// Which salesmen a generation run covers.
#[derive(Debug, Clone)]
pub enum GenerateTarget {
    AllActive,
    Salesmen(Vec<Ulid>),
}

// ── Per-salesman calendar state ──────────────────────────────────

/// Everything the engine tracks for one salesman. One calendar is one
/// lock domain: a write guard covers slots, bookings and blocks together.
#[derive(Debug, Clone)]
pub struct SalesmanCalendar {
    pub id: Ulid,
    pub employee_code: String,
    pub display_name: Option<String>,
    pub active: bool,
    /// Slots keyed by date, then by (start time, kind). Iterating a day
    /// map yields slots in chronological order.
    pub slots: BTreeMap<NaiveDate, BTreeMap<(NaiveTime, AppointmentKind), TimeSlot>>,
    /// Slot id → its key in `slots`.
    pub slot_index: HashMap<Ulid, (NaiveDate, NaiveTime, AppointmentKind)>,
    /// Bookings sorted by (date, start_time).
    pub bookings: Vec<Booking>,
    /// Unavailability blocks sorted by start_date.
    pub blocks: Vec<Unavailability>,
}

impl SalesmanCalendar {
    pub fn new(id: Ulid, employee_code: String, display_name: Option<String>) -> Self {
        Self {
            id,
            employee_code,
            display_name,
            active: true,
            slots: BTreeMap::new(),
            slot_index: HashMap::new(),
            bookings: Vec::new(),
            blocks: Vec::new(),
        }
    }

    pub fn slot_count(&self) -> usize {
        self.slots.values().map(|day| day.len()).sum()
    }

    /// Insert a slot unless one already exists at the same
    /// (date, time, kind). Returns false on a duplicate, which is how
    /// generation stays idempotent.
    pub fn insert_slot(&mut self, slot: TimeSlot) -> bool {
        let day = self.slots.entry(slot.date).or_default();
        let key = (slot.start_time, slot.kind);
        if day.contains_key(&key) {
            return false;
        }
        self.slot_index.insert(slot.id, (slot.date, slot.start_time, slot.kind));
        day.insert(key, slot);
        true
    }

    pub fn slot(&self, date: NaiveDate, time: NaiveTime, kind: AppointmentKind) -> Option<&TimeSlot> {
        self.slots.get(&date).and_then(|day| day.get(&(time, kind)))
    }

    pub fn slot_by_id(&self, id: Ulid) -> Option<&TimeSlot> {
        let (date, time, kind) = self.slot_index.get(&id)?;
        self.slots.get(date).and_then(|day| day.get(&(*time, *kind)))
    }

    pub fn slot_by_id_mut(&mut self, id: Ulid) -> Option<&mut TimeSlot> {
        let (date, time, kind) = self.slot_index.get(&id)?;
        self.slots.get_mut(date).and_then(|day| day.get_mut(&(*time, *kind)))
    }

    pub fn remove_slot(&mut self, id: Ulid) -> Option<TimeSlot> {
        let (date, time, kind) = self.slot_index.remove(&id)?;
        let day = self.slots.get_mut(&date)?;
        let slot = day.remove(&(time, kind));
        if day.is_empty() {
            self.slots.remove(&date);
        }
        slot
    }

    /// Insert a booking maintaining sort order by (date, start_time).
    pub fn insert_booking(&mut self, booking: Booking) {
        let key = (booking.date, booking.start_time);
        let pos = self
            .bookings
            .binary_search_by_key(&key, |b| (b.date, b.start_time))
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn booking_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    /// All bookings on `date` as a contiguous slice of the sorted vec.
    pub fn bookings_on(&self, date: NaiveDate) -> &[Booking] {
        let lo = self.bookings.partition_point(|b| b.date < date);
        let hi = self.bookings.partition_point(|b| b.date <= date);
        &self.bookings[lo..hi]
    }

    /// Insert a block maintaining sort order by start_date.
    pub fn insert_block(&mut self, block: Unavailability) {
        let pos = self
            .blocks
            .binary_search_by_key(&block.start_date, |b| b.start_date)
            .unwrap_or_else(|e| e);
        self.blocks.insert(pos, block);
    }

    pub fn remove_block(&mut self, id: Ulid) -> Option<Unavailability> {
        let pos = self.blocks.iter().position(|b| b.id == id)?;
        Some(self.blocks.remove(pos))
    }

    pub fn blocks_covering(&self, date: NaiveDate) -> impl Iterator<Item = &Unavailability> {
        self.blocks.iter().filter(move |b| b.covers_date(date))
    }
}

// ── WAL events ───────────────────────────────────────────────────

/// The event types — flat, no nesting. This is the WAL record format.
/// Every mutation commits as exactly one event, so a booking and its
/// slot reservation can never diverge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    SalesmanEnrolled {
        id: Ulid,
        employee_code: String,
        display_name: Option<String>,
    },
    SalesmanDeactivated {
        id: Ulid,
    },
    CycleOpened {
        id: Ulid,
        start_date: NaiveDate,
        end_date: NaiveDate,
    },
    CycleRemoved {
        id: Ulid,
    },
    SlotsGenerated {
        salesman: Ulid,
        cycle: Option<Ulid>,
        slots: Vec<SlotSeed>,
    },
    SlotsExpired {
        salesman: Ulid,
        slots: Vec<Ulid>,
    },
    SlotsRemoved {
        salesman: Ulid,
        slots: Vec<Ulid>,
    },
    BlockAdded {
        id: Ulid,
        salesman: Ulid,
        start_date: NaiveDate,
        end_date: NaiveDate,
        start_time: NaiveTime,
        end_time: NaiveTime,
    },
    BlockRemoved {
        id: Ulid,
        salesman: Ulid,
    },
    BookingCreated {
        booking: Booking,
    },
    BookingApproved {
        id: Ulid,
        salesman: Ulid,
        at: DateTime<Utc>,
        by: Ulid,
    },
    BookingDeclined {
        id: Ulid,
        salesman: Ulid,
        at: DateTime<Utc>,
        by: Ulid,
        reason: String,
    },
    BookingCanceled {
        id: Ulid,
        salesman: Ulid,
        at: DateTime<Utc>,
        by: Ulid,
        reason: CancellationReason,
        notes: Option<String>,
    },
    BookingCompleted {
        id: Ulid,
        salesman: Ulid,
    },
    BookingNoShow {
        id: Ulid,
        salesman: Ulid,
    },
    BookingReverted {
        id: Ulid,
        salesman: Ulid,
    },
    BookingLocked {
        id: Ulid,
        salesman: Ulid,
    },
    BookingUnlocked {
        id: Ulid,
        salesman: Ulid,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SalesmanInfo {
    pub id: Ulid,
    pub employee_code: String,
    pub display_name: Option<String>,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotInfo {
    pub id: Ulid,
    pub salesman: Ulid,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub kind: AppointmentKind,
    pub state: SlotState,
    pub booked_by: Option<Ulid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleInfo {
    pub id: Ulid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommissionSummary {
    pub salesman: Ulid,
    pub total: Decimal,
    pub bookings: usize,
}
