use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::NaiveTime;
use chrono_tz::Tz;
use rust_decimal::Decimal;

use crate::model::AppointmentKind;

/// Tunable business parameters. Everything here can be overridden from
/// the environment at startup and replaced at runtime through a
/// `ConfigHandle`.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Business-local timezone. All "now" checks convert to this zone.
    pub timezone: Tz,
    /// Gap enforced after each appointment when checking conflicts.
    pub buffer_minutes: u32,
    pub day_start: NaiveTime,
    pub day_end: NaiveTime,
    /// Spacing of generated slot start times within the business day.
    pub slot_interval_minutes: u32,
    pub appointment_minutes: u32,
    /// Length of an auto-opened availability cycle, inclusive of its
    /// first day.
    pub cycle_days: u32,
    pub min_advance_hours: i64,
    pub max_advance_days: i64,
    pub zoom_commission: Decimal,
    pub in_person_commission: Decimal,
    /// How long expired slots are kept before the sweeper drops them.
    pub slot_retention_weeks: u32,
    /// Confirmed bookings this many hours past their start are
    /// auto-completed by the sweeper.
    pub auto_complete_hours: i64,
}

fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).expect("valid wall-clock time")
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timezone: chrono_tz::America::New_York,
            buffer_minutes: 30,
            day_start: hm(9, 0),
            day_end: hm(19, 0),
            slot_interval_minutes: 30,
            appointment_minutes: 15,
            cycle_days: 14,
            min_advance_hours: 2,
            max_advance_days: 90,
            zoom_commission: Decimal::new(3000, 2),
            in_person_commission: Decimal::new(5000, 2),
            slot_retention_weeks: 2,
            auto_complete_hours: 24,
        }
    }
}

impl EngineConfig {
    /// Load configuration from `SLOTWISE_*` environment variables,
    /// falling back to the defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            timezone: env_parse("SLOTWISE_TIMEZONE", d.timezone),
            buffer_minutes: env_parse("SLOTWISE_BUFFER_MINUTES", d.buffer_minutes),
            day_start: env_time("SLOTWISE_DAY_START", d.day_start),
            day_end: env_time("SLOTWISE_DAY_END", d.day_end),
            slot_interval_minutes: env_parse("SLOTWISE_SLOT_INTERVAL_MINUTES", d.slot_interval_minutes),
            appointment_minutes: env_parse("SLOTWISE_APPOINTMENT_MINUTES", d.appointment_minutes),
            cycle_days: env_parse("SLOTWISE_CYCLE_DAYS", d.cycle_days),
            min_advance_hours: env_parse("SLOTWISE_MIN_ADVANCE_HOURS", d.min_advance_hours),
            max_advance_days: env_parse("SLOTWISE_MAX_ADVANCE_DAYS", d.max_advance_days),
            zoom_commission: env_parse("SLOTWISE_ZOOM_COMMISSION", d.zoom_commission),
            in_person_commission: env_parse("SLOTWISE_IN_PERSON_COMMISSION", d.in_person_commission),
            slot_retention_weeks: env_parse("SLOTWISE_SLOT_RETENTION_WEEKS", d.slot_retention_weeks),
            auto_complete_hours: env_parse("SLOTWISE_AUTO_COMPLETE_HOURS", d.auto_complete_hours),
        }
    }

    pub fn commission_rate(&self, kind: AppointmentKind) -> Decimal {
        match kind {
            AppointmentKind::Zoom => self.zoom_commission,
            AppointmentKind::InPerson => self.in_person_commission,
        }
    }
}

fn env_parse<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

fn env_time(name: &str, default: NaiveTime) -> NaiveTime {
    std::env::var(name)
        .ok()
        .and_then(|s| NaiveTime::parse_from_str(&s, "%H:%M").ok())
        .unwrap_or(default)
}

/// Shared, refreshable view of the engine configuration. Mutations take
/// one snapshot up front so a mid-flight refresh can't split a single
/// operation across two configurations.
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<EngineConfig>>,
}

impl ConfigHandle {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    pub fn snapshot(&self) -> EngineConfig {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Swap in a new configuration. In-flight operations keep the
    /// snapshot they started with.
    pub fn replace(&self, config: EngineConfig) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = config;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn defaults_match_business_rules() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.buffer_minutes, 30);
        assert_eq!(cfg.appointment_minutes, 15);
        assert_eq!(cfg.slot_interval_minutes, 30);
        assert_eq!(cfg.day_start, hm(9, 0));
        assert_eq!(cfg.day_end, hm(19, 0));
        assert_eq!(cfg.cycle_days, 14);
    }

    #[test]
    fn commission_rates_by_kind() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.commission_rate(AppointmentKind::Zoom), dec!(30.00));
        assert_eq!(cfg.commission_rate(AppointmentKind::InPerson), dec!(50.00));
    }

    #[test]
    fn replace_changes_later_snapshots() {
        let handle = ConfigHandle::new(EngineConfig::default());
        let before = handle.snapshot();
        let mut next = before.clone();
        next.buffer_minutes = 45;
        handle.replace(next);
        assert_eq!(before.buffer_minutes, 30);
        assert_eq!(handle.snapshot().buffer_minutes, 45);
    }
}
