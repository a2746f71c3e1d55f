mod conflict;
mod error;
mod mutations;
mod queries;

pub use conflict::ReserveRequest;
pub use error::EngineError;

use std::io;
use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, OwnedRwLockWriteGuard, RwLock, RwLockReadGuard};
use tracing::{error, info};
use ulid::Ulid;

use crate::clock::{Clock, SystemClock};
use crate::limits::DEFAULT_BUILDING_PRICE;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedBuilding = Arc<RwLock<Building>>;

/// Where a reservation lives inside its building.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservationLocation {
    pub building_id: Ulid,
    pub floor: u32,
    pub slot: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReserveOutcome {
    pub building: Building,
    pub reservation: Reservation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelledReservation {
    pub floor: u32,
    pub slot: u32,
    pub reservation: Reservation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelOutcome {
    pub building: Building,
    pub cancelled: CancelledReservation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaveOutcome {
    pub building: Building,
    pub previous_owner: Ownership,
    /// One entry per removed reservation, so each customer can be told.
    pub cancelled: Vec<CancelledReservation>,
}

/// A floor or slot taken out of a building, with the reservations it held.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovalOutcome {
    pub building: Building,
    pub cancelled: Vec<CancelledReservation>,
}

/// How a cancellation names its target. An index is a position in the named
/// slot; an id may live anywhere in the building.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelTarget {
    Index(i64),
    Id(Ulid),
}

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit:
/// block for the first append, drain whatever else is already queued,
/// fsync once, then answer every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_non_append(&mut wal, cmd);
            continue;
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        for (_, tx) in batch {
            let r = match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            };
            let _ = tx.send(r);
        }

        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

/// All or nothing: when any entry fails, every sender gets the error and
/// the whole batch is rolled back so no unacknowledged event replays later.
fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event))
        .and_then(|()| wal.flush_sync());
    if result.is_err()
        && let Err(e) = wal.rollback()
    {
        error!("WAL rollback after failed batch of {} failed: {e}", batch.len());
    }
    result
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let _ = response.send(wal.compact(&events));
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { response, .. } => {
            let _ = response.send(Err(io::Error::other("append routed outside a batch")));
        }
    }
}

/// Apply an event to a building. The caller holds its write lock.
fn apply_to_building(
    b: &mut Building,
    event: &Event,
    index: &DashMap<Ulid, ReservationLocation>,
) {
    match event {
        Event::BuildingBought { owner, price, .. } => {
            b.owner = Some(owner.clone());
            b.price = *price;
        }
        Event::BuildingUpdated {
            name,
            address,
            description,
            price,
            ..
        } => {
            b.name = name.clone();
            b.address = address.clone();
            b.description = description.clone();
            b.price = *price;
        }
        Event::FloorBought { floor, .. } => {
            if let Some(f) = b.floor_mut(*floor) {
                f.is_bought = true;
            }
        }
        Event::FloorDeleted { floor, .. } => {
            if let Some(f) = b.remove_floor(*floor) {
                for r in f.slots.iter().flat_map(|s| &s.reservations) {
                    index.remove(&r.id);
                }
            }
        }
        Event::SlotDeleted { floor, slot, .. } => {
            if let Some(s) = b.floor_mut(*floor).and_then(|f| f.remove_slot(*slot)) {
                for r in &s.reservations {
                    index.remove(&r.id);
                }
            }
        }
        Event::BuildingLeft { .. } => {
            for floor in &mut b.floors {
                floor.is_bought = false;
                for slot in &mut floor.slots {
                    for r in slot.reservations.drain(..) {
                        index.remove(&r.id);
                    }
                }
            }
            b.owner = None;
            b.price = DEFAULT_BUILDING_PRICE;
        }
        Event::SlotReserved {
            building_id,
            floor,
            slot,
            reservation,
        } => {
            if let Some(s) = b.slot_mut(*floor, *slot) {
                s.insert_reservation(reservation.clone());
                index.insert(
                    reservation.id,
                    ReservationLocation {
                        building_id: *building_id,
                        floor: *floor,
                        slot: *slot,
                    },
                );
            }
        }
        Event::ReservationCancelled { id, floor, slot, .. } => {
            if let Some(s) = b.slot_mut(*floor, *slot) {
                s.remove_reservation(*id);
            }
            index.remove(id);
        }
        Event::ReservationsExpired {
            floor, slot, ids, ..
        } => {
            if let Some(s) = b.slot_mut(*floor, *slot) {
                s.remove_ids(ids);
            }
            for id in ids {
                index.remove(id);
            }
        }
        // Created/Deleted are handled at the map level, not here
        Event::BuildingCreated { .. } | Event::BuildingDeleted { .. } => {}
    }
}

/// Write access to one building, taken under the shared commit gate so a
/// WAL compaction never runs between a mutation's append and its apply.
pub(crate) struct BuildingWrite<'a> {
    _gate: RwLockReadGuard<'a, ()>,
    guard: OwnedRwLockWriteGuard<Building>,
}

impl Deref for BuildingWrite<'_> {
    type Target = Building;
    fn deref(&self) -> &Building {
        &self.guard
    }
}

impl DerefMut for BuildingWrite<'_> {
    fn deref_mut(&mut self) -> &mut Building {
        &mut self.guard
    }
}

/// Exclusive claim on a building id while its creation is being persisted.
/// Released on drop, whatever the outcome.
struct CreateClaim<'a> {
    claims: &'a DashMap<Ulid, ()>,
    id: Ulid,
}

impl Drop for CreateClaim<'_> {
    fn drop(&mut self) {
        self.claims.remove(&self.id);
    }
}

pub struct Engine {
    state: DashMap<Ulid, SharedBuilding>,
    /// Ids with a create in flight, so two creates of one id cannot both commit.
    creating: DashMap<Ulid, ()>,
    wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: reservation id → building/floor/slot.
    reservation_index: DashMap<Ulid, ReservationLocation>,
    /// Held shared by every commit, exclusively by compaction.
    commit_gate: RwLock<()>,
    clock: Arc<dyn Clock>,
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        Self::with_clock(wal_path, notify, Arc::new(SystemClock))
    }

    /// Rebuild state from the WAL and start the background writer.
    /// Must be called inside a tokio runtime.
    pub fn with_clock(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        clock: Arc<dyn Clock>,
    ) -> io::Result<Self> {
        let events = Wal::recover(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            creating: DashMap::new(),
            wal_tx,
            notify,
            reservation_index: DashMap::new(),
            commit_gate: RwLock::new(()),
            clock,
        };

        // Replay owns every building exclusively, so the synchronous
        // try_write always succeeds. Never block here: this runs inside the runtime.
        let mut replay_buildings: std::collections::HashMap<Ulid, Building> =
            std::collections::HashMap::new();
        for event in &events {
            match event {
                Event::BuildingCreated {
                    id,
                    name,
                    address,
                    description,
                    price,
                    floors,
                } => {
                    replay_buildings.insert(
                        *id,
                        Building::new(
                            *id,
                            name.clone(),
                            address.clone(),
                            description.clone(),
                            *price,
                            floors,
                        ),
                    );
                }
                Event::BuildingDeleted { id } => {
                    if let Some(b) = replay_buildings.remove(id) {
                        for (_, slot) in b.slots() {
                            for r in &slot.reservations {
                                engine.reservation_index.remove(&r.id);
                            }
                        }
                    }
                }
                other => {
                    if let Some(b) = replay_buildings.get_mut(&other.building_id()) {
                        apply_to_building(b, other, &engine.reservation_index);
                    }
                }
            }
        }
        for (id, b) in replay_buildings {
            engine.state.insert(id, Arc::new(RwLock::new(b)));
        }
        metrics::gauge!(crate::observability::BUILDINGS_ACTIVE).set(engine.state.len() as f64);
        info!(
            "replayed {} events into {} buildings from {}",
            events.len(),
            engine.state.len(),
            wal_path.display()
        );

        Ok(engine)
    }

    pub fn now_ms(&self) -> Ms {
        self.clock.now_ms()
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::PersistenceFailure("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::PersistenceFailure("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::PersistenceFailure(e.to_string()))
    }

    pub fn get_shared(&self, id: &Ulid) -> Option<SharedBuilding> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn locate_reservation(&self, id: &Ulid) -> Option<ReservationLocation> {
        self.reservation_index.get(id).map(|e| *e.value())
    }

    pub(crate) async fn write_building(&self, id: Ulid) -> Result<BuildingWrite<'_>, EngineError> {
        let gate = self.commit_gate.read().await;
        let shared = self
            .get_shared(&id)
            .ok_or(EngineError::BuildingNotFound(id))?;
        let guard = shared.clone().write_owned().await;
        // Deleted (and maybe re-created under the same id) while we waited.
        let current = self
            .state
            .get(&id)
            .is_some_and(|e| Arc::ptr_eq(e.value(), &shared));
        if !current {
            return Err(EngineError::BuildingNotFound(id));
        }
        Ok(BuildingWrite { _gate: gate, guard })
    }

    fn claim_new_id(&self, id: Ulid) -> Result<CreateClaim<'_>, EngineError> {
        let claimed = match self.creating.entry(id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(v) => {
                v.insert(());
                true
            }
        };
        if !claimed {
            return Err(EngineError::AlreadyExists(id));
        }
        let claim = CreateClaim {
            claims: &self.creating,
            id,
        };
        // A finished create puts the id in `state` before dropping its claim.
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        Ok(claim)
    }

    /// WAL-append + apply + notify. Memory is only touched once the append is durable.
    pub(crate) async fn persist_and_apply(
        &self,
        building: &mut Building,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_building(building, event, &self.reservation_index);
        self.notify.send(event);
        metrics::counter!(crate::observability::EVENTS_COMMITTED_TOTAL, "event" => event.label())
            .increment(1);
        Ok(())
    }
}
