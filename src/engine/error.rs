use chrono::{NaiveDate, NaiveTime};
use thiserror::Error;
use ulid::Ulid;

use crate::model::{AppointmentKind, BookingStatus};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(Ulid),

    #[error("already exists: {0}")]
    AlreadyExists(Ulid),

    #[error("salesman {0} is deactivated")]
    SalesmanInactive(Ulid),

    #[error("no open {kind} slot at {date} {time}")]
    SlotUnavailable {
        date: NaiveDate,
        time: NaiveTime,
        kind: AppointmentKind,
    },

    #[error("{date} {time} is not in the future")]
    SlotInPast { date: NaiveDate, time: NaiveTime },

    #[error("bookings need at least {0} hours notice")]
    TooSoon(i64),

    #[error("bookings can be made at most {0} days ahead")]
    TooFarAhead(i64),

    #[error("window conflicts with booking {0}")]
    BookingConflict(Ulid),

    #[error("start falls inside unavailability block {0}")]
    UnavailabilityConflict(Ulid),

    #[error("cannot {action} a {status} booking")]
    InvalidTransition {
        action: &'static str,
        status: BookingStatus,
    },

    #[error("booking {0} is locked for payroll")]
    Locked(Ulid),

    #[error("appointment on {0} has not been held yet")]
    NotHeldYet(NaiveDate),

    #[error("appointment is already in the past")]
    AppointmentPassed,

    #[error("a non-empty reason is required")]
    ReasonRequired,

    #[error("cycle overlaps existing cycle {0}")]
    CycleOverlap(Ulid),

    #[error("{0} requires a moderator grade")]
    ModeratorRequired(&'static str),

    #[error("{0} requires an admin grade")]
    AdminRequired(&'static str),

    #[error("no free employee code after {0} attempts")]
    CodeAllocationFailed(u32),

    #[error("invalid range: {0}")]
    InvalidRange(&'static str),

    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),

    #[error("WAL error: {0}")]
    WalError(String),
}
