use std::sync::Arc;

use tokio::sync::{oneshot, RwLock};
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{check_no_overlap, validate_layout, validate_request, ReserveRequest};
use super::{
    CancelOutcome, CancelTarget, CancelledReservation, Engine, EngineError, LeaveOutcome,
    RemovalOutcome, ReservationLocation, ReserveOutcome, WalCommand,
};

fn locate_slot(b: &Building, floor: u32, slot: u32) -> Result<&Slot, EngineError> {
    b.floor(floor)
        .ok_or(EngineError::FloorNotFound(floor))?
        .slot(slot)
        .ok_or(EngineError::SlotNotFound(slot))
}

fn held_by<'a>(floor: u32, slots: impl Iterator<Item = &'a Slot>) -> Vec<CancelledReservation> {
    slots
        .flat_map(|s| {
            s.reservations.iter().map(move |r| CancelledReservation {
                floor,
                slot: s.number,
                reservation: r.clone(),
            })
        })
        .collect()
}

impl Engine {
    pub async fn create_building(&self, id: Ulid, new: NewBuilding) -> Result<Building, EngineError> {
        if self.state.len() >= MAX_BUILDINGS {
            return Err(EngineError::LimitExceeded("too many buildings"));
        }
        if new.name.len() > MAX_NAME_LEN || new.address.len() > MAX_TEXT_LEN {
            return Err(EngineError::LimitExceeded("building name or address too long"));
        }
        if new.description.as_ref().is_some_and(|d| d.len() > MAX_TEXT_LEN) {
            return Err(EngineError::LimitExceeded("description too long"));
        }
        validate_layout(&new.floors)?;

        let _gate = self.commit_gate.read().await;
        let _claim = self.claim_new_id(id)?;
        let event = Event::BuildingCreated {
            id,
            name: new.name.clone(),
            address: new.address.clone(),
            description: new.description.clone(),
            price: new.price.unwrap_or(DEFAULT_BUILDING_PRICE),
            floors: new.floors.clone(),
        };
        self.wal_append(&event).await?;
        let building = Building::new(
            id,
            new.name,
            new.address,
            new.description,
            new.price.unwrap_or(DEFAULT_BUILDING_PRICE),
            &new.floors,
        );
        self.state
            .insert(id, Arc::new(RwLock::new(building.clone())));
        self.notify.send(&event);
        metrics::gauge!(crate::observability::BUILDINGS_ACTIVE).set(self.state.len() as f64);
        info!("created building {id} with {} slots", building.slots().count());
        Ok(building)
    }

    pub async fn delete_building(&self, id: Ulid) -> Result<(), EngineError> {
        let mut w = self.write_building(id).await?;
        let event = Event::BuildingDeleted { id };
        self.persist_and_apply(&mut w, &event).await?;
        for (_, slot) in w.slots() {
            for r in &slot.reservations {
                self.reservation_index.remove(&r.id);
            }
        }
        self.state.remove(&id);
        self.notify.remove(&id);
        metrics::gauge!(crate::observability::BUILDINGS_ACTIVE).set(self.state.len() as f64);
        info!("deleted building {id}");
        Ok(())
    }

    /// Change listing fields. The layout is edited through floor and slot deletes.
    pub async fn update_building(
        &self,
        id: Ulid,
        update: BuildingUpdate,
    ) -> Result<Building, EngineError> {
        if update.is_empty() {
            return Err(EngineError::MissingFields(vec![
                "name",
                "address",
                "description",
                "price",
            ]));
        }
        if update.name.as_ref().is_some_and(|n| n.len() > MAX_NAME_LEN)
            || update.address.as_ref().is_some_and(|a| a.len() > MAX_TEXT_LEN)
            || update.description.as_ref().is_some_and(|d| d.len() > MAX_TEXT_LEN)
        {
            return Err(EngineError::LimitExceeded("building name, address or description too long"));
        }
        let mut w = self.write_building(id).await?;
        let event = Event::BuildingUpdated {
            id,
            name: update.name.unwrap_or_else(|| w.name.clone()),
            address: update.address.unwrap_or_else(|| w.address.clone()),
            description: update.description.or_else(|| w.description.clone()),
            price: update.price.unwrap_or(w.price),
        };
        self.persist_and_apply(&mut w, &event).await?;
        info!("updated building {id}");
        Ok(w.clone())
    }

    /// Remove a floor with all its slots. Reservations on it are cancelled.
    pub async fn delete_floor(&self, id: Ulid, floor: u32) -> Result<RemovalOutcome, EngineError> {
        let mut w = self.write_building(id).await?;
        let f = w.floor(floor).ok_or(EngineError::FloorNotFound(floor))?;
        let cancelled = held_by(floor, f.slots.iter());

        let event = Event::FloorDeleted {
            building_id: id,
            floor,
        };
        self.persist_and_apply(&mut w, &event).await?;
        metrics::counter!(crate::observability::RESERVATIONS_CANCELLED_TOTAL, "cause" => "floor_deleted")
            .increment(cancelled.len() as u64);
        info!("deleted floor {floor} of {id}; cancelled {} reservations", cancelled.len());
        Ok(RemovalOutcome {
            building: w.clone(),
            cancelled,
        })
    }

    pub async fn delete_slot(
        &self,
        id: Ulid,
        floor: u32,
        slot: u32,
    ) -> Result<RemovalOutcome, EngineError> {
        let mut w = self.write_building(id).await?;
        let s = locate_slot(&w, floor, slot)?;
        let cancelled = held_by(floor, std::iter::once(s));

        let event = Event::SlotDeleted {
            building_id: id,
            floor,
            slot,
        };
        self.persist_and_apply(&mut w, &event).await?;
        metrics::counter!(crate::observability::RESERVATIONS_CANCELLED_TOTAL, "cause" => "slot_deleted")
            .increment(cancelled.len() as u64);
        info!("deleted slot {slot} on floor {floor} of {id}");
        Ok(RemovalOutcome {
            building: w.clone(),
            cancelled,
        })
    }

    /// A provider takes over a building. `price` overrides the listed price.
    pub async fn buy_building(
        &self,
        id: Ulid,
        owner: Ownership,
        price: Option<u64>,
    ) -> Result<Building, EngineError> {
        let mut w = self.write_building(id).await?;
        if w.is_bought() {
            return Err(EngineError::AlreadyBought(id));
        }
        let buyer = owner.user_id.clone();
        let event = Event::BuildingBought {
            id,
            owner,
            price: price.unwrap_or(w.price),
        };
        self.persist_and_apply(&mut w, &event).await?;
        info!("building {id} bought by {buyer}");
        Ok(w.clone())
    }

    pub async fn buy_floor(&self, id: Ulid, floor: u32) -> Result<Building, EngineError> {
        let mut w = self.write_building(id).await?;
        let f = w.floor(floor).ok_or(EngineError::FloorNotFound(floor))?;
        if f.is_bought {
            return Err(EngineError::FloorAlreadyBought(floor));
        }
        let event = Event::FloorBought {
            building_id: id,
            floor,
        };
        self.persist_and_apply(&mut w, &event).await?;
        Ok(w.clone())
    }

    /// The provider vacates the building: every reservation inside is
    /// cancelled and the building goes back on the market.
    pub async fn leave_building(
        &self,
        id: Ulid,
        reason: Option<String>,
        requester: &Requester,
    ) -> Result<LeaveOutcome, EngineError> {
        if reason.as_ref().is_some_and(|r| r.len() > MAX_TEXT_LEN) {
            return Err(EngineError::LimitExceeded("leave reason too long"));
        }
        let mut w = self.write_building(id).await?;
        let previous_owner = w.owner.clone().ok_or(EngineError::NotBought(id))?;
        let cancelled: Vec<CancelledReservation> = w
            .floors
            .iter()
            .flat_map(|f| held_by(f.number, f.slots.iter()))
            .collect();

        let event = Event::BuildingLeft { id, reason };
        self.persist_and_apply(&mut w, &event).await?;
        metrics::counter!(crate::observability::RESERVATIONS_CANCELLED_TOTAL, "cause" => "leave")
            .increment(cancelled.len() as u64);
        info!(
            "provider {} left building {id}; cancelled {} reservations",
            requester.user_id,
            cancelled.len()
        );
        Ok(LeaveOutcome {
            building: w.clone(),
            previous_owner,
            cancelled,
        })
    }

    pub async fn reserve_slot(
        &self,
        building_id: Ulid,
        req: ReserveRequest,
        requester: &Requester,
    ) -> Result<ReserveOutcome, EngineError> {
        let result = self.try_reserve(building_id, req, requester).await;
        let status = match &result {
            Ok(_) => "ok",
            Err(e) => e.kind(),
        };
        metrics::counter!(crate::observability::RESERVATIONS_TOTAL, "status" => status).increment(1);
        result
    }

    async fn try_reserve(
        &self,
        building_id: Ulid,
        req: ReserveRequest,
        requester: &Requester,
    ) -> Result<ReserveOutcome, EngineError> {
        let now = self.now_ms();
        let valid = validate_request(req, now)?;

        // The write lock covers sweep, overlap check and append, so two
        // overlapping requests for one slot cannot both pass the check.
        let mut w = self.write_building(building_id).await?;

        let expired = locate_slot(&w, valid.floor, valid.slot)?.expired_ids(now);
        if !expired.is_empty() {
            debug!(
                "sweeping {} expired reservations from {building_id} floor {} slot {}",
                expired.len(),
                valid.floor,
                valid.slot
            );
            let count = expired.len() as u64;
            let event = Event::ReservationsExpired {
                building_id,
                floor: valid.floor,
                slot: valid.slot,
                ids: expired,
            };
            self.persist_and_apply(&mut w, &event).await?;
            metrics::counter!(crate::observability::RESERVATIONS_EXPIRED_TOTAL).increment(count);
        }

        let slot = locate_slot(&w, valid.floor, valid.slot)?;
        check_no_overlap(slot, &valid.span)?;
        if slot.reservations.len() >= MAX_RESERVATIONS_PER_SLOT {
            return Err(EngineError::LimitExceeded("too many reservations on slot"));
        }

        let reservation = Reservation {
            id: Ulid::new(),
            reserved_by: requester.user_id.clone(),
            reserved_by_name: requester.name.clone(),
            reserved_by_email: requester.email.clone(),
            span: valid.span,
            vehicle_type: valid.vehicle_type,
            price: valid.price,
        };
        let event = Event::SlotReserved {
            building_id,
            floor: valid.floor,
            slot: valid.slot,
            reservation: reservation.clone(),
        };
        self.persist_and_apply(&mut w, &event).await?;
        info!(
            "reservation {} on {building_id} floor {} slot {} by {}",
            reservation.id, valid.floor, valid.slot, requester.user_id
        );
        Ok(ReserveOutcome {
            building: w.clone(),
            reservation,
        })
    }

    pub async fn cancel_reservation(
        &self,
        building_id: Ulid,
        floor: u32,
        slot: u32,
        target: CancelTarget,
        requester: &Requester,
    ) -> Result<CancelOutcome, EngineError> {
        let mut w = self.write_building(building_id).await?;
        let s = locate_slot(&w, floor, slot)?;
        let (floor, slot, reservation) = match target {
            CancelTarget::Index(index) => {
                let len = s.reservations.len();
                if index < 0 || index as usize >= len {
                    return Err(EngineError::InvalidIndex { index, len });
                }
                (floor, slot, s.reservations[index as usize].clone())
            }
            // Ids are unique across the building, so the named slot is only a hint.
            CancelTarget::Id(id) => w
                .find_reservation(id)
                .map(|(f, s, r)| (f, s, r.clone()))
                .ok_or(EngineError::ReservationNotFound(id))?,
        };

        let event = Event::ReservationCancelled {
            id: reservation.id,
            building_id,
            floor,
            slot,
        };
        self.persist_and_apply(&mut w, &event).await?;
        metrics::counter!(crate::observability::RESERVATIONS_CANCELLED_TOTAL, "cause" => "cancel")
            .increment(1);
        info!(
            "reservation {} on {building_id} floor {floor} slot {slot} cancelled by {}",
            reservation.id, requester.user_id
        );
        Ok(CancelOutcome {
            building: w.clone(),
            cancelled: CancelledReservation {
                floor,
                slot,
                reservation,
            },
        })
    }

    /// Cancel by reservation id alone; the owning slot is found through the index.
    pub async fn cancel_reservation_by_id(
        &self,
        id: Ulid,
        requester: &Requester,
    ) -> Result<CancelOutcome, EngineError> {
        let ReservationLocation {
            building_id,
            floor,
            slot,
        } = self
            .locate_reservation(&id)
            .ok_or(EngineError::ReservationNotFound(id))?;
        self.cancel_reservation(building_id, floor, slot, CancelTarget::Id(id), requester)
            .await
            .map_err(|e| match e {
                // The slot moved or vanished between lookup and lock.
                EngineError::BuildingNotFound(_)
                | EngineError::FloorNotFound(_)
                | EngineError::SlotNotFound(_) => EngineError::ReservationNotFound(id),
                other => other,
            })
    }

    /// Sweep one slot. Returns the reservations removed; empty when the
    /// slot holds nothing that ended before now.
    pub async fn expire_slot(
        &self,
        building_id: Ulid,
        floor: u32,
        slot: u32,
    ) -> Result<Vec<Reservation>, EngineError> {
        let now = self.now_ms();
        let mut w = self.write_building(building_id).await?;
        let s = locate_slot(&w, floor, slot)?;
        let expired: Vec<Reservation> = s
            .reservations
            .iter()
            .filter(|r| r.span.ended_before(now))
            .cloned()
            .collect();
        if expired.is_empty() {
            return Ok(expired);
        }
        let event = Event::ReservationsExpired {
            building_id,
            floor,
            slot,
            ids: expired.iter().map(|r| r.id).collect(),
        };
        self.persist_and_apply(&mut w, &event).await?;
        metrics::counter!(crate::observability::RESERVATIONS_EXPIRED_TOTAL)
            .increment(expired.len() as u64);
        Ok(expired)
    }

    /// Slots holding at least one reservation that ended before `now`.
    /// Buildings locked by a writer are skipped; the next pass picks them up.
    pub fn collect_expired(&self, now: Ms) -> Vec<ReservationLocation> {
        let mut found = Vec::new();
        for entry in self.state.iter() {
            let Ok(guard) = entry.value().try_read() else {
                continue;
            };
            for (floor, slot) in guard.slots() {
                if slot.reservations.iter().any(|r| r.span.ended_before(now)) {
                    found.push(ReservationLocation {
                        building_id: guard.id,
                        floor,
                        slot: slot.number,
                    });
                }
            }
        }
        found
    }

    /// Rewrite the WAL with only the events needed to recreate current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.commit_gate.write().await;
        let shared: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();

        let mut events = Vec::new();
        for b in shared {
            let b = b.read().await;
            events.push(Event::BuildingCreated {
                id: b.id,
                name: b.name.clone(),
                address: b.address.clone(),
                description: b.description.clone(),
                price: b.price,
                floors: b.layout(),
            });
            if let Some(owner) = &b.owner {
                events.push(Event::BuildingBought {
                    id: b.id,
                    owner: owner.clone(),
                    price: b.price,
                });
            }
            for floor in b.floors.iter().filter(|f| f.is_bought) {
                events.push(Event::FloorBought {
                    building_id: b.id,
                    floor: floor.number,
                });
            }
            for (floor, slot) in b.slots() {
                for r in &slot.reservations {
                    events.push(Event::SlotReserved {
                        building_id: b.id,
                        floor,
                        slot: slot.number,
                        reservation: r.clone(),
                    });
                }
            }
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::PersistenceFailure("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::PersistenceFailure("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::PersistenceFailure(e.to_string()))?;
        info!("compacted WAL to {count} events");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
