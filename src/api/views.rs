//! JSON shapes on the wire. Times are RFC 3339 strings; slot flags and
//! building status are derived on the way out and never stored.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::CancelledReservation;
use crate::model::*;
use crate::timefmt;

// ── Responses ────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationView {
    pub id: Ulid,
    pub reserved_by: String,
    pub reserved_by_name: Option<String>,
    pub reserved_by_email: Option<String>,
    pub reservation_start_time: String,
    pub reservation_end_time: String,
    pub vehicle_type: String,
    pub price: Option<u64>,
}

impl From<&Reservation> for ReservationView {
    fn from(r: &Reservation) -> Self {
        Self {
            id: r.id,
            reserved_by: r.reserved_by.clone(),
            reserved_by_name: r.reserved_by_name.clone(),
            reserved_by_email: r.reserved_by_email.clone(),
            reservation_start_time: timefmt::to_rfc3339(r.span.start),
            reservation_end_time: timefmt::to_rfc3339(r.span.end),
            vehicle_type: r.vehicle_type.clone(),
            price: r.price,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotView {
    pub slot_number: u32,
    pub is_available: bool,
    pub is_reserved: bool,
    pub reservations: Vec<ReservationView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FloorView {
    pub floor_number: u32,
    pub is_bought: bool,
    pub slots: Vec<SlotView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildingView {
    pub id: Ulid,
    pub name: String,
    pub address: String,
    pub description: Option<String>,
    pub price: u64,
    pub status: BuildingStatus,
    pub is_bought: bool,
    pub bought_by_user_id: Option<String>,
    pub bought_by_name: Option<String>,
    pub provider_name: Option<String>,
    pub provider_email: Option<String>,
    pub phone_number: Option<String>,
    pub floors: Vec<FloorView>,
}

impl From<&Building> for BuildingView {
    fn from(b: &Building) -> Self {
        let owner = b.owner.as_ref();
        Self {
            id: b.id,
            name: b.name.clone(),
            address: b.address.clone(),
            description: b.description.clone(),
            price: b.price,
            status: b.status(),
            is_bought: b.is_bought(),
            bought_by_user_id: owner.map(|o| o.user_id.clone()),
            bought_by_name: owner.and_then(|o| o.user_name.clone()),
            provider_name: owner.and_then(|o| o.provider_name.clone()),
            provider_email: owner.and_then(|o| o.provider_email.clone()),
            phone_number: owner.and_then(|o| o.phone_number.clone()),
            floors: b
                .floors
                .iter()
                .map(|f| FloorView {
                    floor_number: f.number,
                    is_bought: f.is_bought,
                    slots: f
                        .slots
                        .iter()
                        .map(|s| SlotView {
                            slot_number: s.number,
                            is_available: s.is_available(),
                            is_reserved: s.is_reserved(),
                            reservations: s.reservations.iter().map(Into::into).collect(),
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReserveResponse {
    pub building: BuildingView,
    pub reservation: ReservationView,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelledView {
    pub floor_number: u32,
    pub slot_number: u32,
    pub reservation: ReservationView,
}

impl From<&CancelledReservation> for CancelledView {
    fn from(c: &CancelledReservation) -> Self {
        Self {
            floor_number: c.floor,
            slot_number: c.slot,
            reservation: (&c.reservation).into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    pub building: BuildingView,
    pub cancelled: CancelledView,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveResponse {
    pub building: BuildingView,
    pub cancelled: Vec<CancelledView>,
}

/// A deleted floor or slot: the building left behind and whose bookings went with it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemovalResponse {
    pub building: BuildingView,
    pub cancelled: Vec<CancelledView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfitView {
    pub building_id: Ulid,
    pub profit: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotSummaryView {
    pub building_id: Ulid,
    pub building_name: String,
    pub floor_number: u32,
    pub slot_number: u32,
    pub is_available: bool,
    pub is_reserved: bool,
    pub reservation_count: usize,
    pub reservations: Vec<ReservationView>,
}

impl From<&SlotInfo> for SlotSummaryView {
    fn from(s: &SlotInfo) -> Self {
        Self {
            building_id: s.building_id,
            building_name: s.building_name.clone(),
            floor_number: s.floor,
            slot_number: s.slot,
            is_available: s.is_available,
            is_reserved: s.is_reserved,
            reservation_count: s.reservations.len(),
            reservations: s.reservations.iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserReservationView {
    pub building_id: Ulid,
    pub building_name: String,
    pub floor_number: u32,
    pub slot_number: u32,
    #[serde(flatten)]
    pub reservation: ReservationView,
}

impl From<&LocatedReservation> for UserReservationView {
    fn from(l: &LocatedReservation) -> Self {
        Self {
            building_id: l.building_id,
            building_name: l.building_name.clone(),
            floor_number: l.floor,
            slot_number: l.slot,
            reservation: (&l.reservation).into(),
        }
    }
}

/// One entry of a building's live event feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedEntry {
    pub event: String,
    pub building_id: Ulid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub floor_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slot_number: Option<u32>,
}

impl From<&Event> for FeedEntry {
    fn from(e: &Event) -> Self {
        let (floor, slot) = match e {
            Event::SlotReserved { floor, slot, .. }
            | Event::ReservationCancelled { floor, slot, .. }
            | Event::ReservationsExpired { floor, slot, .. } => (Some(*floor), Some(*slot)),
            Event::SlotDeleted { floor, slot, .. } => (Some(*floor), Some(*slot)),
            Event::FloorBought { floor, .. } | Event::FloorDeleted { floor, .. } => {
                (Some(*floor), None)
            }
            _ => (None, None),
        };
        Self {
            event: e.label().to_string(),
            building_id: e.building_id(),
            floor_number: floor,
            slot_number: slot,
        }
    }
}

// ── Requests ─────────────────────────────────────────────

/// Every field optional so an absent one becomes `MissingFields`, not a parse error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReserveBody {
    pub floor_number: Option<u32>,
    pub slot_number: Option<u32>,
    pub reservation_start_time: Option<String>,
    pub reservation_end_time: Option<String>,
    pub vehicle_type: Option<String>,
    pub price: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelBody {
    pub floor_number: Option<u32>,
    pub slot_number: Option<u32>,
    /// Position in the slot's start-ordered reservation list.
    pub reservation_index: Option<i64>,
    pub reservation_id: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderCancelBody {
    pub cancel_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveBody {
    pub leave_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuyBody {
    pub provider_name: Option<String>,
    pub provider_email: Option<String>,
    pub phone_number: Option<String>,
    pub price: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FloorBody {
    pub floor_number: u32,
    pub slots: Vec<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBuildingBody {
    /// Optional client-chosen id; one is minted when absent.
    pub id: Option<Ulid>,
    pub name: Option<String>,
    pub address: Option<String>,
    pub description: Option<String>,
    pub price: Option<u64>,
    #[serde(default)]
    pub floors: Vec<FloorBody>,
}

/// `?bought=true` narrows the listing to buildings a provider holds.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BuildingFilter {
    pub bought: Option<bool>,
}

/// Listing fields only; absent ones keep their current value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBuildingBody {
    pub name: Option<String>,
    pub address: Option<String>,
    pub description: Option<String>,
    pub price: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn building_view_derives_flags_and_status() {
        let mut b = Building::new(
            Ulid::new(),
            "Garage".into(),
            "Street".into(),
            None,
            400,
            &[FloorLayout { number: 1, slots: vec![1, 2] }],
        );
        b.slot_mut(1, 2).unwrap().insert_reservation(Reservation {
            id: Ulid::new(),
            reserved_by: "alice".into(),
            reserved_by_name: None,
            reserved_by_email: None,
            span: Span::new(1_792_231_200_000, 1_792_234_800_000),
            vehicle_type: "car".into(),
            price: Some(12),
        });

        let json = serde_json::to_value(BuildingView::from(&b)).unwrap();
        assert_eq!(json["status"], "available");
        assert_eq!(json["isBought"], false);
        let slots = &json["floors"][0]["slots"];
        assert_eq!(slots[0]["isAvailable"], true);
        assert_eq!(slots[1]["isReserved"], true);
        assert_eq!(
            slots[1]["reservations"][0]["reservationStartTime"],
            "2026-10-17T10:00:00Z"
        );
    }

    #[test]
    fn slot_summary_lists_reservation_ids() {
        let id = Ulid::new();
        let info = SlotInfo {
            building_id: Ulid::new(),
            building_name: "Garage".into(),
            floor: 2,
            slot: 5,
            is_available: false,
            is_reserved: true,
            reservations: vec![Reservation {
                id,
                reserved_by: "alice".into(),
                reserved_by_name: Some("Alice".into()),
                reserved_by_email: None,
                span: Span::new(1_792_231_200_000, 1_792_234_800_000),
                vehicle_type: "van".into(),
                price: None,
            }],
        };
        let json = serde_json::to_value(SlotSummaryView::from(&info)).unwrap();
        assert_eq!(json["reservationCount"], 1);
        assert_eq!(json["reservations"][0]["id"], id.to_string());
        assert_eq!(json["reservations"][0]["vehicleType"], "van");
    }

    #[test]
    fn feed_entry_omits_absent_location() {
        let id = Ulid::new();
        let json = serde_json::to_value(FeedEntry::from(&Event::BuildingDeleted { id })).unwrap();
        assert_eq!(json["event"], "building_deleted");
        assert!(json.get("floorNumber").is_none());
    }
}
