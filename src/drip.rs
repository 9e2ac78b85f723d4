use async_trait::async_trait;
use tracing::info;

use crate::model::Booking;

/// Follow-up campaign started when an appointment resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CampaignKind {
    Attended,
    DidNotAttend,
}

impl CampaignKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CampaignKind::Attended => "attended",
            CampaignKind::DidNotAttend => "did_not_attend",
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("drip scheduler: {0}")]
pub struct DripError(pub String);

/// Boundary to the follow-up mail system. The engine calls this after a
/// completed or no-show transition has committed; a failure here is
/// logged and never rolls the transition back.
#[async_trait]
pub trait DripScheduler: Send + Sync {
    async fn start_campaign(&self, kind: CampaignKind, booking: &Booking) -> Result<(), DripError>;
}

/// Default scheduler that records campaign triggers in the log. Real
/// delivery belongs to an external mailer.
pub struct LogDrip;

#[async_trait]
impl DripScheduler for LogDrip {
    async fn start_campaign(&self, kind: CampaignKind, booking: &Booking) -> Result<(), DripError> {
        info!(
            booking = %booking.id,
            client = %booking.client,
            campaign = kind.as_str(),
            "drip campaign started"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AppointmentKind, BookingStatus};
    use chrono::{NaiveDate, NaiveTime, Utc};
    use rust_decimal::Decimal;
    use ulid::Ulid;

    fn booking() -> Booking {
        Booking {
            id: Ulid::new(),
            client: Ulid::new(),
            salesman: Ulid::new(),
            date: NaiveDate::from_ymd_opt(2030, 1, 7).unwrap(),
            start_time: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            duration_minutes: 15,
            kind: AppointmentKind::Zoom,
            status: BookingStatus::Completed,
            slot: None,
            commission: Decimal::ZERO,
            locked: false,
            created_at: Utc::now(),
            created_by: Ulid::new(),
            approved_at: None,
            approved_by: None,
            declined_at: None,
            declined_by: None,
            decline_reason: None,
            canceled_at: None,
            canceled_by: None,
            cancellation_reason: None,
            cancellation_notes: None,
        }
    }

    #[tokio::test]
    async fn log_drip_always_succeeds() {
        let drip = LogDrip;
        let b = booking();
        assert!(drip.start_campaign(CampaignKind::Attended, &b).await.is_ok());
        assert!(drip.start_campaign(CampaignKind::DidNotAttend, &b).await.is_ok());
    }
}
