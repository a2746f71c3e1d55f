//! Customer and provider notices. Delivery is best effort: a failed notice is
//! logged and never undoes the state change that triggered it.

use std::sync::Mutex;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::engine::CancelledReservation;
use crate::model::{Building, Reservation};
use crate::timefmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug)]
pub struct NotifyError(pub String);

impl std::fmt::Display for NotifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "notice delivery failed: {}", self.0)
    }
}

impl std::error::Error for NotifyError {}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, notice: &Notice) -> Result<(), NotifyError>;
}

/// Writes notices to the log. Stands in for a mail transport.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn deliver(&self, notice: &Notice) -> Result<(), NotifyError> {
        info!(to = %notice.to, subject = %notice.subject, "notice");
        Ok(())
    }
}

/// Keeps every notice in memory.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    sent: Mutex<Vec<Notice>>,
}

impl MemoryNotifier {
    pub fn sent(&self) -> Vec<Notice> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn deliver(&self, notice: &Notice) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .map_err(|_| NotifyError("notice store poisoned".into()))?
            .push(notice.clone());
        Ok(())
    }
}

/// Deliver each notice, logging failures. Returns how many went out.
pub async fn deliver_all(notifier: &dyn Notifier, notices: &[Notice]) -> usize {
    let mut delivered = 0;
    for notice in notices {
        match notifier.deliver(notice).await {
            Ok(()) => delivered += 1,
            Err(e) => warn!("notice to {} dropped: {e}", notice.to),
        }
    }
    metrics::counter!(crate::observability::NOTICES_DROPPED_TOTAL)
        .increment((notices.len() - delivered) as u64);
    delivered
}

fn window(r: &Reservation) -> String {
    format!(
        "{} to {}",
        timefmt::human(r.span.start),
        timefmt::human(r.span.end)
    )
}

fn greeting(r: &Reservation) -> &str {
    r.reserved_by_name.as_deref().unwrap_or("customer")
}

pub fn reservation_confirmed(building: &Building, floor: u32, slot: u32, r: &Reservation) -> Vec<Notice> {
    let Some(to) = r.reserved_by_email.clone() else {
        return Vec::new();
    };
    vec![Notice {
        to,
        subject: format!("Reservation confirmed at {}", building.name),
        body: format!(
            "Dear {},\n\nYour reservation for your {} at {}, floor {floor}, slot {slot} is confirmed for {}.",
            greeting(r),
            r.vehicle_type,
            building.name,
            window(r)
        ),
    }]
}

pub fn reservation_cancelled(
    building: &Building,
    cancelled: &CancelledReservation,
    reason: Option<&str>,
) -> Vec<Notice> {
    let r = &cancelled.reservation;
    let mut notices = Vec::new();
    let reason_line = reason
        .map(|s| format!("\n\nReason: {s}"))
        .unwrap_or_default();
    if let Some(to) = r.reserved_by_email.clone() {
        notices.push(Notice {
            to,
            subject: format!("Reservation cancelled at {}", building.name),
            body: format!(
                "Dear {},\n\nYour reservation for floor {}, slot {} ({}) has been cancelled.{reason_line}",
                greeting(r),
                cancelled.floor,
                cancelled.slot,
                window(r)
            ),
        });
    }
    if let Some(provider) = building.owner.as_ref().and_then(|o| o.provider_email.clone()) {
        notices.push(Notice {
            to: provider,
            subject: format!("Reservation cancellation notice for {}", building.name),
            body: format!(
                "The reservation for floor {}, slot {} ({}) in {} was cancelled.{reason_line}",
                cancelled.floor,
                cancelled.slot,
                window(r),
                building.name
            ),
        });
    }
    notices
}

/// One notice per removed reservation, plus a confirmation for the provider.
pub fn building_left(
    building: &Building,
    cancelled: &[CancelledReservation],
    reason: Option<&str>,
    provider_email: Option<&str>,
) -> Vec<Notice> {
    let mut notices: Vec<Notice> = cancelled
        .iter()
        .filter_map(|c| {
            let to = c.reservation.reserved_by_email.clone()?;
            Some(Notice {
                to,
                subject: format!("Reservation cancelled - {}", building.name),
                body: format!(
                    "Dear {},\n\nYour reservation for slot {} on floor {} in {} ({}) has been cancelled as the provider has left the building.",
                    greeting(&c.reservation),
                    c.slot,
                    c.floor,
                    building.name,
                    window(&c.reservation)
                ),
            })
        })
        .collect();
    if let Some(to) = provider_email {
        notices.push(Notice {
            to: to.to_string(),
            subject: format!("You have left {}", building.name),
            body: format!(
                "You have left the building {}. Reason: {}.",
                building.name,
                reason.unwrap_or("none given")
            ),
        });
    }
    notices
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FloorLayout, Ownership, Span};
    use ulid::Ulid;

    struct FailingNotifier;

    #[async_trait]
    impl Notifier for FailingNotifier {
        async fn deliver(&self, _notice: &Notice) -> Result<(), NotifyError> {
            Err(NotifyError("smtp down".into()))
        }
    }

    fn building() -> Building {
        let mut b = Building::new(
            Ulid::new(),
            "North Garage".into(),
            "1 Main St".into(),
            None,
            400,
            &[FloorLayout { number: 1, slots: vec![1, 2] }],
        );
        b.owner = Some(Ownership {
            user_id: "prov-1".into(),
            user_name: None,
            provider_name: Some("Acme Parking".into()),
            provider_email: Some("ops@acme.test".into()),
            phone_number: None,
        });
        b
    }

    fn reservation(email: Option<&str>) -> Reservation {
        Reservation {
            id: Ulid::new(),
            reserved_by: "cust".into(),
            reserved_by_name: Some("Dana".into()),
            reserved_by_email: email.map(str::to_string),
            span: Span::new(1_792_231_200_000, 1_792_234_800_000),
            vehicle_type: "car".into(),
            price: None,
        }
    }

    #[test]
    fn leave_produces_one_notice_per_reservation() {
        let b = building();
        let cancelled = vec![
            CancelledReservation { floor: 1, slot: 1, reservation: reservation(Some("a@x.test")) },
            CancelledReservation { floor: 1, slot: 1, reservation: reservation(Some("a@x.test")) },
            CancelledReservation { floor: 1, slot: 2, reservation: reservation(None) },
        ];
        let notices = building_left(&b, &cancelled, Some("lease ended"), Some("ops@acme.test"));
        // two customers with email + provider confirmation
        assert_eq!(notices.len(), 3);
        assert!(notices[2].body.contains("lease ended"));
    }

    #[test]
    fn cancellation_notifies_customer_and_provider() {
        let b = building();
        let c = CancelledReservation { floor: 1, slot: 2, reservation: reservation(Some("a@x.test")) };
        let notices = reservation_cancelled(&b, &c, Some("maintenance"));
        assert_eq!(notices.len(), 2);
        assert_eq!(notices[0].to, "a@x.test");
        assert_eq!(notices[1].to, "ops@acme.test");
        assert!(notices[0].body.contains("2026-10-17 10:00 AM to 2026-10-17 11:00 AM"));
    }

    #[test]
    fn confirmation_skips_customers_without_email() {
        let b = building();
        assert!(reservation_confirmed(&b, 1, 1, &reservation(None)).is_empty());
        assert_eq!(reservation_confirmed(&b, 1, 1, &reservation(Some("a@x.test"))).len(), 1);
    }

    #[tokio::test]
    async fn failed_delivery_is_swallowed() {
        let notices = vec![Notice { to: "a@x.test".into(), subject: "s".into(), body: "b".into() }];
        assert_eq!(deliver_all(&FailingNotifier, &notices).await, 0);

        let memory = MemoryNotifier::default();
        assert_eq!(deliver_all(&memory, &notices).await, 1);
        assert_eq!(memory.sent(), notices);
    }
}
