use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError, SharedBuilding};

impl Engine {
    pub async fn get_building(&self, id: Ulid) -> Result<Building, EngineError> {
        let shared = self
            .get_shared(&id)
            .ok_or(EngineError::BuildingNotFound(id))?;
        let guard = shared.read().await;
        Ok(guard.clone())
    }

    /// All buildings, ordered by id (ULIDs sort by creation time).
    pub async fn list_buildings(&self) -> Vec<Building> {
        let mut out = Vec::with_capacity(self.state.len());
        for shared in self.snapshot_handles() {
            out.push(shared.read().await.clone());
        }
        out.sort_by_key(|b| b.id);
        out
    }

    /// Buildings currently held by a provider, ordered by id.
    pub async fn bought_buildings(&self) -> Vec<Building> {
        let mut out = self.list_buildings().await;
        out.retain(Building::is_bought);
        out
    }

    /// Every slot of every building with its reservations, for the admin console.
    pub async fn slots_overview(&self) -> Vec<SlotInfo> {
        let mut out = Vec::new();
        for b in self.list_buildings().await {
            for (floor, slot) in b.slots() {
                out.push(SlotInfo {
                    building_id: b.id,
                    building_name: b.name.clone(),
                    floor,
                    slot: slot.number,
                    is_available: slot.is_available(),
                    is_reserved: slot.is_reserved(),
                    reservations: slot.reservations.clone(),
                });
            }
        }
        out
    }

    pub async fn building_profit(&self, id: Ulid) -> Result<u64, EngineError> {
        let shared = self
            .get_shared(&id)
            .ok_or(EngineError::BuildingNotFound(id))?;
        let guard = shared.read().await;
        Ok(guard.profit())
    }

    /// Every reservation held by `user_id`, ordered by start time.
    pub async fn reservations_for_user(&self, user_id: &str) -> Vec<LocatedReservation> {
        let mut out = Vec::new();
        for shared in self.snapshot_handles() {
            let b = shared.read().await;
            for (floor, slot) in b.slots() {
                for r in slot.reservations.iter().filter(|r| r.reserved_by == user_id) {
                    out.push(LocatedReservation {
                        building_id: b.id,
                        building_name: b.name.clone(),
                        floor,
                        slot: slot.number,
                        reservation: r.clone(),
                    });
                }
            }
        }
        out.sort_by_key(|l| (l.reservation.span.start, l.building_id));
        out
    }

    pub fn building_count(&self) -> usize {
        self.state.len()
    }

    /// Clone the handles out so no map shard stays locked across an await.
    fn snapshot_handles(&self) -> Vec<SharedBuilding> {
        self.state.iter().map(|e| e.value().clone()).collect()
    }
}
