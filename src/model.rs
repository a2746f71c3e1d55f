use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, the only time type inside the engine.
pub type Ms = i64;

/// Reservation interval. Two spans conflict when they intersect or share
/// any endpoint, so `[10:00, 11:00]` and `[11:00, 12:00]` cannot coexist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Closed-range intersection: touching at a boundary counts.
    pub fn conflicts_with(&self, other: &Span) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// Strictly ended before `now`. A reservation ending exactly at `now` is kept.
    pub fn ended_before(&self, now: Ms) -> bool {
        self.end < now
    }
}

/// Who is making a request. Identity is established upstream by the auth layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requester {
    pub user_id: String,
    pub name: Option<String>,
    pub email: Option<String>,
}

impl Requester {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            name: None,
            email: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub reserved_by: String,
    pub reserved_by_name: Option<String>,
    pub reserved_by_email: Option<String>,
    pub span: Span,
    pub vehicle_type: String,
    pub price: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub number: u32,
    /// Sorted by `span.start`. Starts are unique because conflicting spans never coexist.
    pub reservations: Vec<Reservation>,
}

impl Slot {
    pub fn new(number: u32) -> Self {
        Self {
            number,
            reservations: Vec::new(),
        }
    }

    pub fn is_reserved(&self) -> bool {
        !self.reservations.is_empty()
    }

    pub fn is_available(&self) -> bool {
        self.reservations.is_empty()
    }

    /// Insert reservation maintaining sort order by span.start.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .binary_search_by_key(&reservation.span.start, |r| r.span.start)
            .unwrap_or_else(|e| e);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove_reservation(&mut self, id: Ulid) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    pub fn find_reservation(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    /// First existing reservation that conflicts with `span`, if any.
    pub fn find_conflict(&self, span: &Span) -> Option<&Reservation> {
        // Everything starting after span.end cannot touch it.
        let right_bound = self
            .reservations
            .partition_point(|r| r.span.start <= span.end);
        self.reservations[..right_bound]
            .iter()
            .find(|r| r.span.conflicts_with(span))
    }

    pub fn expired_ids(&self, now: Ms) -> Vec<Ulid> {
        self.reservations
            .iter()
            .filter(|r| r.span.ended_before(now))
            .map(|r| r.id)
            .collect()
    }

    /// Drop the given reservations, returning the ones that were present.
    pub fn remove_ids(&mut self, ids: &[Ulid]) -> Vec<Reservation> {
        let (removed, kept): (Vec<_>, Vec<_>) = self
            .reservations
            .drain(..)
            .partition(|r| ids.contains(&r.id));
        self.reservations = kept;
        removed
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Floor {
    pub number: u32,
    pub is_bought: bool,
    /// Sorted by `number`.
    pub slots: Vec<Slot>,
}

impl Floor {
    pub fn slot(&self, number: u32) -> Option<&Slot> {
        self.slots
            .binary_search_by_key(&number, |s| s.number)
            .ok()
            .map(|i| &self.slots[i])
    }

    pub fn slot_mut(&mut self, number: u32) -> Option<&mut Slot> {
        self.slots
            .binary_search_by_key(&number, |s| s.number)
            .ok()
            .map(|i| &mut self.slots[i])
    }

    pub fn remove_slot(&mut self, number: u32) -> Option<Slot> {
        let i = self.slots.binary_search_by_key(&number, |s| s.number).ok()?;
        Some(self.slots.remove(i))
    }
}

/// Floor shape used when creating a building.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FloorLayout {
    pub number: u32,
    pub slots: Vec<u32>,
}

/// Input for creating a building.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBuilding {
    pub name: String,
    pub address: String,
    pub description: Option<String>,
    /// Defaults to the standard building price when absent.
    pub price: Option<u64>,
    pub floors: Vec<FloorLayout>,
}

/// Listing fields an admin may change after creation. `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildingUpdate {
    pub name: Option<String>,
    pub address: Option<String>,
    pub description: Option<String>,
    pub price: Option<u64>,
}

impl BuildingUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.address.is_none()
            && self.description.is_none()
            && self.price.is_none()
    }
}

/// The provider currently holding a building.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ownership {
    pub user_id: String,
    pub user_name: Option<String>,
    pub provider_name: Option<String>,
    pub provider_email: Option<String>,
    pub phone_number: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildingStatus {
    Available,
    Reserved,
}

/// The aggregate. Floors and slots are embedded and addressed by number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Building {
    pub id: Ulid,
    pub name: String,
    pub address: String,
    pub description: Option<String>,
    pub price: u64,
    pub owner: Option<Ownership>,
    /// Sorted by `number`.
    pub floors: Vec<Floor>,
}

impl Building {
    pub fn new(
        id: Ulid,
        name: String,
        address: String,
        description: Option<String>,
        price: u64,
        layout: &[FloorLayout],
    ) -> Self {
        let mut floors: Vec<Floor> = layout
            .iter()
            .map(|f| {
                let mut slots: Vec<Slot> = f.slots.iter().map(|&n| Slot::new(n)).collect();
                slots.sort_by_key(|s| s.number);
                Floor {
                    number: f.number,
                    is_bought: false,
                    slots,
                }
            })
            .collect();
        floors.sort_by_key(|f| f.number);
        Self {
            id,
            name,
            address,
            description,
            price,
            owner: None,
            floors,
        }
    }

    pub fn is_bought(&self) -> bool {
        self.owner.is_some()
    }

    pub fn status(&self) -> BuildingStatus {
        if self.is_bought() {
            BuildingStatus::Reserved
        } else {
            BuildingStatus::Available
        }
    }

    pub fn floor(&self, number: u32) -> Option<&Floor> {
        self.floors
            .binary_search_by_key(&number, |f| f.number)
            .ok()
            .map(|i| &self.floors[i])
    }

    pub fn floor_mut(&mut self, number: u32) -> Option<&mut Floor> {
        self.floors
            .binary_search_by_key(&number, |f| f.number)
            .ok()
            .map(|i| &mut self.floors[i])
    }

    pub fn slot_mut(&mut self, floor: u32, slot: u32) -> Option<&mut Slot> {
        self.floor_mut(floor)?.slot_mut(slot)
    }

    pub fn remove_floor(&mut self, number: u32) -> Option<Floor> {
        let i = self.floors.binary_search_by_key(&number, |f| f.number).ok()?;
        Some(self.floors.remove(i))
    }

    /// Floor and slot holding the reservation `id`, if it is anywhere in this building.
    pub fn find_reservation(&self, id: Ulid) -> Option<(u32, u32, &Reservation)> {
        self.slots()
            .find_map(|(floor, s)| s.find_reservation(id).map(|r| (floor, s.number, r)))
    }

    /// Iterate `(floor_number, slot)` over the whole building.
    pub fn slots(&self) -> impl Iterator<Item = (u32, &Slot)> {
        self.floors
            .iter()
            .flat_map(|f| f.slots.iter().map(move |s| (f.number, s)))
    }

    pub fn reservation_count(&self) -> usize {
        self.slots().map(|(_, s)| s.reservations.len()).sum()
    }

    /// Sum of reservation prices across every slot.
    pub fn profit(&self) -> u64 {
        self.slots()
            .flat_map(|(_, s)| s.reservations.iter())
            .filter_map(|r| r.price)
            .sum()
    }

    pub fn layout(&self) -> Vec<FloorLayout> {
        self.floors
            .iter()
            .map(|f| FloorLayout {
                number: f.number,
                slots: f.slots.iter().map(|s| s.number).collect(),
            })
            .collect()
    }
}

/// Flat event log entries. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    BuildingCreated {
        id: Ulid,
        name: String,
        address: String,
        description: Option<String>,
        price: u64,
        floors: Vec<FloorLayout>,
    },
    BuildingDeleted {
        id: Ulid,
    },
    /// Carries the full listing after the change.
    BuildingUpdated {
        id: Ulid,
        name: String,
        address: String,
        description: Option<String>,
        price: u64,
    },
    FloorDeleted {
        building_id: Ulid,
        floor: u32,
    },
    SlotDeleted {
        building_id: Ulid,
        floor: u32,
        slot: u32,
    },
    BuildingBought {
        id: Ulid,
        owner: Ownership,
        price: u64,
    },
    FloorBought {
        building_id: Ulid,
        floor: u32,
    },
    BuildingLeft {
        id: Ulid,
        reason: Option<String>,
    },
    SlotReserved {
        building_id: Ulid,
        floor: u32,
        slot: u32,
        reservation: Reservation,
    },
    ReservationCancelled {
        id: Ulid,
        building_id: Ulid,
        floor: u32,
        slot: u32,
    },
    ReservationsExpired {
        building_id: Ulid,
        floor: u32,
        slot: u32,
        ids: Vec<Ulid>,
    },
}

impl Event {
    pub fn building_id(&self) -> Ulid {
        match self {
            Event::BuildingCreated { id, .. }
            | Event::BuildingDeleted { id }
            | Event::BuildingUpdated { id, .. }
            | Event::BuildingBought { id, .. }
            | Event::BuildingLeft { id, .. } => *id,
            Event::FloorBought { building_id, .. }
            | Event::FloorDeleted { building_id, .. }
            | Event::SlotDeleted { building_id, .. }
            | Event::SlotReserved { building_id, .. }
            | Event::ReservationCancelled { building_id, .. }
            | Event::ReservationsExpired { building_id, .. } => *building_id,
        }
    }

    /// Short label for logs, metrics and the event feed.
    pub fn label(&self) -> &'static str {
        match self {
            Event::BuildingCreated { .. } => "building_created",
            Event::BuildingDeleted { .. } => "building_deleted",
            Event::BuildingUpdated { .. } => "building_updated",
            Event::FloorDeleted { .. } => "floor_deleted",
            Event::SlotDeleted { .. } => "slot_deleted",
            Event::BuildingBought { .. } => "building_bought",
            Event::FloorBought { .. } => "floor_bought",
            Event::BuildingLeft { .. } => "building_left",
            Event::SlotReserved { .. } => "slot_reserved",
            Event::ReservationCancelled { .. } => "reservation_cancelled",
            Event::ReservationsExpired { .. } => "reservations_expired",
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotInfo {
    pub building_id: Ulid,
    pub building_name: String,
    pub floor: u32,
    pub slot: u32,
    pub is_available: bool,
    pub is_reserved: bool,
    /// Start-ordered, as stored on the slot.
    pub reservations: Vec<Reservation>,
}

/// A reservation together with where it lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedReservation {
    pub building_id: Ulid,
    pub building_name: String,
    pub floor: u32,
    pub slot: u32,
    pub reservation: Reservation,
}
