// ── Hard caps (reject, never truncate) ──────────────────────────

pub const MAX_SALESMEN: usize = 10_000;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_REASON_LEN: usize = 1_024;
pub const MAX_NOTES_LEN: usize = 2_048;

pub const MAX_SLOTS_PER_SALESMAN: usize = 100_000;
pub const MAX_BOOKINGS_PER_SALESMAN: usize = 100_000;
pub const MAX_BLOCKS_PER_SALESMAN: usize = 4_096;

/// Longest span an availability cycle may cover, inclusive of both ends.
pub const MAX_CYCLE_DAYS: i64 = 366;

/// Upper bound on an explicit salesman list passed to slot generation.
pub const MAX_GENERATE_TARGETS: usize = 1_024;

// ── Employee code allocation ────────────────────────────────────

pub const EMPLOYEE_CODE_PREFIX: &str = "EMP";

/// Zero-padded width of the numeric part of an employee code.
pub const EMPLOYEE_CODE_DIGITS: usize = 5;

/// How many sequential candidates to try before giving up.
pub const EMPLOYEE_CODE_ATTEMPTS: u32 = 100;
