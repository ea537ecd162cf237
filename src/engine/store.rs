use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{
    mpsc, oneshot, Mutex, OwnedMutexGuard, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock,
};
use tracing::{info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::LOCK_TIMEOUTS_TOTAL;
use crate::wal::Wal;

use super::commit::{run_wal_writer, WalCommand, CHANNEL_CAPACITY};
use super::conflict::first_conflict;
use super::EngineError;

pub type SharedRoomState = Arc<RwLock<RoomState>>;

/// Bounds on how long a store operation may wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    /// Waiting for a room lock (or the catalog lock).
    pub lock_timeout: Duration,
    /// One WAL append round trip, fsync included.
    pub wal_timeout: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(2),
            wal_timeout: Duration::from_secs(5),
        }
    }
}

/// Durable hotel/room/booking store.
///
/// Every room's bookings sit behind their own `RwLock`, so rooms never contend with
/// each other. Mutations are made durable in the WAL before they touch memory.
/// Hand it around as `Arc<Store>`: mutating methods take `self: &Arc<Self>`.
pub struct Store {
    hotels: DashMap<HotelId, Hotel>,
    rooms: DashMap<RoomId, Room>,
    room_states: DashMap<RoomId, SharedRoomState>,
    hotel_rooms: DashMap<HotelId, Vec<RoomId>>,
    /// Reverse lookup: booking id → room id
    booking_to_room: DashMap<BookingId, RoomId>,
    /// Serializes hotel/room creation, deletion and compaction. Booking traffic never takes it.
    catalog: Arc<Mutex<()>>,
    wal_tx: mpsc::Sender<WalCommand>,
    options: StoreOptions,
}

/// Exclusive hold on one room. Existence check, conflict scan and insert done
/// through the same `RoomTxn` form one atomic unit.
pub struct RoomTxn {
    guard: OwnedRwLockWriteGuard<RoomState>,
}

impl RoomTxn {
    pub fn room_id(&self) -> RoomId {
        self.guard.id
    }

    pub fn find_conflict(&self, span: &Span) -> Option<Booking> {
        first_conflict(&self.guard, span).copied()
    }

    /// The room's booking with this id, if any.
    pub fn booking(&self, booking_id: BookingId) -> Option<Booking> {
        self.guard.bookings.iter().find(|b| b.id == booking_id).copied()
    }
}

/// Locks a mutation holds from before its WAL append until it is applied.
struct Held {
    _catalog: Option<OwnedMutexGuard<()>>,
    rooms: Vec<OwnedRwLockWriteGuard<RoomState>>,
}

/// Apply a booking event to a room (caller holds the lock).
fn apply_to_room(rs: &mut RoomState, event: &Event, index: &DashMap<BookingId, RoomId>) {
    match event {
        Event::BookingCreated { id, room_id, span } => {
            rs.insert_booking(Booking {
                id: *id,
                room_id: *room_id,
                span: *span,
            });
            index.insert(*id, *room_id);
        }
        Event::BookingCancelled { id, .. } => {
            rs.remove_booking(*id);
            index.remove(id);
        }
        // Catalog events are handled at the map level.
        Event::HotelCreated { .. }
        | Event::HotelDeleted { .. }
        | Event::RoomCreated { .. }
        | Event::RoomDeleted { .. } => {}
    }
}

fn unavailable(reason: impl Into<String>) -> EngineError {
    EngineError::StorageUnavailable(reason.into())
}

fn check_name(name: &str) -> Result<(), EngineError> {
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    Ok(())
}

impl Store {
    /// Open the store at `wal_path`, replaying its log. Must run inside a tokio
    /// runtime: the WAL writer is spawned as a background task.
    pub fn open(wal_path: &Path, options: StoreOptions) -> io::Result<Self> {
        let (wal, replay) = Wal::open(wal_path)?;
        if replay.discarded_bytes > 0 {
            warn!(
                "discarded {} bytes of torn WAL tail in {}",
                replay.discarded_bytes,
                wal_path.display()
            );
        }

        let (wal_tx, wal_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let store = Self {
            hotels: DashMap::new(),
            rooms: DashMap::new(),
            room_states: DashMap::new(),
            hotel_rooms: DashMap::new(),
            booking_to_room: DashMap::new(),
            catalog: Arc::new(Mutex::new(())),
            wal_tx,
            options,
        };

        // Room states are built unshared and wrapped once replay is done.
        let mut states = HashMap::new();
        for event in &replay.events {
            store.replay_event(&mut states, event);
        }
        for (id, rs) in states {
            store.room_states.insert(id, Arc::new(RwLock::new(rs)));
        }

        tokio::spawn(run_wal_writer(wal, wal_rx));

        info!(
            "opened {}: {} events, {} hotels, {} rooms, {} bookings",
            wal_path.display(),
            replay.events.len(),
            store.hotels.len(),
            store.rooms.len(),
            store.booking_to_room.len()
        );
        Ok(store)
    }

    fn replay_event(&self, states: &mut HashMap<RoomId, RoomState>, event: &Event) {
        match event {
            Event::HotelCreated { id, name } => {
                self.hotels.insert(*id, Hotel { id: *id, name: name.clone() });
                self.hotel_rooms.entry(*id).or_default();
            }
            Event::HotelDeleted { id } => {
                self.hotels.remove(id);
                if let Some((_, room_ids)) = self.hotel_rooms.remove(id) {
                    for room_id in room_ids {
                        self.forget_replayed_room(states, &room_id);
                    }
                }
            }
            Event::RoomCreated { id, hotel_id, name } => {
                if !self.hotels.contains_key(hotel_id) {
                    warn!("replay: room {id} references missing hotel {hotel_id}, skipped");
                    return;
                }
                self.rooms.insert(
                    *id,
                    Room {
                        id: *id,
                        hotel_id: *hotel_id,
                        name: name.clone(),
                    },
                );
                self.hotel_rooms.entry(*hotel_id).or_default().push(*id);
                states.insert(*id, RoomState::new(*id));
            }
            Event::RoomDeleted { id } => {
                if let Some(hotel_id) = self.rooms.get(id).map(|r| r.hotel_id)
                    && let Some(mut ids) = self.hotel_rooms.get_mut(&hotel_id)
                {
                    ids.retain(|r| r != id);
                }
                self.forget_replayed_room(states, id);
            }
            Event::BookingCreated { room_id, .. } | Event::BookingCancelled { room_id, .. } => {
                if let Some(rs) = states.get_mut(room_id) {
                    apply_to_room(rs, event, &self.booking_to_room);
                }
            }
        }
    }

    fn forget_replayed_room(&self, states: &mut HashMap<RoomId, RoomState>, room_id: &RoomId) {
        self.rooms.remove(room_id);
        if let Some(rs) = states.remove(room_id) {
            for b in &rs.bookings {
                self.booking_to_room.remove(&b.id);
            }
        }
    }

    // ── Locking ──────────────────────────────────────────────

    fn room_state(&self, room_id: &RoomId) -> Option<SharedRoomState> {
        self.room_states.get(room_id).map(|e| e.value().clone())
    }

    async fn write_room(
        &self,
        state: &SharedRoomState,
        room_id: RoomId,
    ) -> Result<OwnedRwLockWriteGuard<RoomState>, EngineError> {
        tokio::time::timeout(self.options.lock_timeout, state.clone().write_owned())
            .await
            .map_err(|_| {
                metrics::counter!(LOCK_TIMEOUTS_TOTAL).increment(1);
                unavailable(format!("timed out waiting for room {room_id}"))
            })
    }

    async fn read_room(
        &self,
        state: &SharedRoomState,
        room_id: RoomId,
    ) -> Result<OwnedRwLockReadGuard<RoomState>, EngineError> {
        tokio::time::timeout(self.options.lock_timeout, state.clone().read_owned())
            .await
            .map_err(|_| {
                metrics::counter!(LOCK_TIMEOUTS_TOTAL).increment(1);
                unavailable(format!("timed out reading room {room_id}"))
            })
    }

    async fn lock_catalog(&self) -> Result<OwnedMutexGuard<()>, EngineError> {
        tokio::time::timeout(self.options.lock_timeout, self.catalog.clone().lock_owned())
            .await
            .map_err(|_| {
                metrics::counter!(LOCK_TIMEOUTS_TOTAL).increment(1);
                unavailable("timed out waiting for catalog lock")
            })
    }

    /// Take the room's write lock. `Ok(None)` if the room does not exist, including
    /// when it was deleted while we were queued on the lock.
    pub async fn lock_room(&self, room_id: RoomId) -> Result<Option<RoomTxn>, EngineError> {
        let Some(state) = self.room_state(&room_id) else {
            return Ok(None);
        };
        let guard = self.write_room(&state, room_id).await?;
        if guard.removed {
            return Ok(None);
        }
        Ok(Some(RoomTxn { guard }))
    }

    // ── Booking contract ─────────────────────────────────────

    pub fn room_exists(&self, room_id: &RoomId) -> bool {
        self.room_states.contains_key(room_id)
    }

    pub fn booking_exists(&self, booking_id: &BookingId) -> bool {
        self.booking_to_room.contains_key(booking_id)
    }

    /// Any one live booking of `room_id` overlapping `span`. Reads a snapshot and
    /// holds nothing once it returns.
    pub async fn find_conflict(
        &self,
        room_id: RoomId,
        span: &Span,
    ) -> Result<Option<Booking>, EngineError> {
        let Some(state) = self.room_state(&room_id) else {
            return Ok(None);
        };
        let guard = self.read_room(&state, room_id).await?;
        if guard.removed {
            return Ok(None);
        }
        Ok(first_conflict(&guard, span).copied())
    }

    /// Record booking `booking_id` in the locked room, consuming the transaction.
    /// Conflicts and id reuse are the caller's business.
    pub async fn insert(
        self: &Arc<Self>,
        txn: RoomTxn,
        booking_id: BookingId,
        span: Span,
    ) -> Result<Booking, EngineError> {
        if txn.guard.bookings.len() >= MAX_BOOKINGS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many bookings on room"));
        }
        let booking = Booking {
            id: booking_id,
            room_id: txn.room_id(),
            span,
        };
        let event = Event::BookingCreated {
            id: booking.id,
            room_id: booking.room_id,
            span,
        };
        let held = Held {
            _catalog: None,
            rooms: vec![txn.guard],
        };
        self.commit(event, held).await?;
        Ok(booking)
    }

    /// Remove a booking. `Ok(false)` if no such booking is live.
    pub async fn delete(self: &Arc<Self>, booking_id: BookingId) -> Result<bool, EngineError> {
        let Some(room_id) = self.booking_to_room.get(&booking_id).map(|e| *e.value()) else {
            return Ok(false);
        };
        let Some(state) = self.room_state(&room_id) else {
            return Ok(false);
        };
        let guard = self.write_room(&state, room_id).await?;
        // A concurrent cancel or room delete may have won the lock first.
        if guard.removed || !guard.bookings.iter().any(|b| b.id == booking_id) {
            return Ok(false);
        }
        let event = Event::BookingCancelled {
            id: booking_id,
            room_id,
        };
        let held = Held {
            _catalog: None,
            rooms: vec![guard],
        };
        self.commit(event, held).await?;
        Ok(true)
    }

    /// Bookings of a room in ascending start order. Unknown rooms have none.
    pub async fn list_by_room(&self, room_id: RoomId) -> Result<Vec<Booking>, EngineError> {
        let Some(state) = self.room_state(&room_id) else {
            return Ok(Vec::new());
        };
        let guard = self.read_room(&state, room_id).await?;
        if guard.removed {
            return Ok(Vec::new());
        }
        Ok(guard.bookings.clone())
    }

    // ── Catalog ──────────────────────────────────────────────

    pub fn hotels(&self) -> Vec<Hotel> {
        let mut hotels: Vec<Hotel> = self.hotels.iter().map(|e| e.value().clone()).collect();
        hotels.sort_by_key(|h| h.id);
        hotels
    }

    pub fn rooms_by_hotel(&self, hotel_id: &HotelId) -> Vec<Room> {
        let room_ids = self
            .hotel_rooms
            .get(hotel_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        let mut rooms: Vec<Room> = room_ids
            .iter()
            .filter_map(|id| self.rooms.get(id).map(|r| r.value().clone()))
            .collect();
        rooms.sort_by_key(|r| r.id);
        rooms
    }

    pub async fn create_hotel(self: &Arc<Self>, name: String) -> Result<Hotel, EngineError> {
        check_name(&name)?;
        let catalog = self.lock_catalog().await?;
        if self.hotels.len() >= MAX_HOTELS {
            return Err(EngineError::LimitExceeded("too many hotels"));
        }
        let hotel = Hotel { id: Ulid::new(), name };
        let event = Event::HotelCreated {
            id: hotel.id,
            name: hotel.name.clone(),
        };
        let held = Held {
            _catalog: Some(catalog),
            rooms: Vec::new(),
        };
        self.commit(event, held).await?;
        Ok(hotel)
    }

    pub async fn create_room(
        self: &Arc<Self>,
        hotel_id: HotelId,
        name: String,
    ) -> Result<Room, EngineError> {
        check_name(&name)?;
        let catalog = self.lock_catalog().await?;
        if !self.hotels.contains_key(&hotel_id) {
            return Err(EngineError::HotelNotFound(hotel_id));
        }
        let room_count = self.hotel_rooms.get(&hotel_id).map_or(0, |ids| ids.len());
        if room_count >= MAX_ROOMS_PER_HOTEL {
            return Err(EngineError::LimitExceeded("too many rooms in hotel"));
        }
        let room = Room {
            id: Ulid::new(),
            hotel_id,
            name,
        };
        let event = Event::RoomCreated {
            id: room.id,
            hotel_id,
            name: room.name.clone(),
        };
        let held = Held {
            _catalog: Some(catalog),
            rooms: Vec::new(),
        };
        self.commit(event, held).await?;
        Ok(room)
    }

    /// Delete a room and, with it, all its bookings. `Ok(false)` if unknown.
    pub async fn delete_room(self: &Arc<Self>, room_id: RoomId) -> Result<bool, EngineError> {
        let catalog = self.lock_catalog().await?;
        let Some(state) = self.room_state(&room_id) else {
            return Ok(false);
        };
        let guard = self.write_room(&state, room_id).await?;
        let held = Held {
            _catalog: Some(catalog),
            rooms: vec![guard],
        };
        self.commit(Event::RoomDeleted { id: room_id }, held).await?;
        Ok(true)
    }

    /// Delete a hotel with all its rooms and their bookings. `Ok(false)` if unknown.
    pub async fn delete_hotel(self: &Arc<Self>, hotel_id: HotelId) -> Result<bool, EngineError> {
        let catalog = self.lock_catalog().await?;
        if !self.hotels.contains_key(&hotel_id) {
            return Ok(false);
        }
        let mut room_ids = self
            .hotel_rooms
            .get(&hotel_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        room_ids.sort();

        // Lock every room first so no booking lands in a room that is going away.
        let mut held = Held {
            _catalog: Some(catalog),
            rooms: Vec::with_capacity(room_ids.len()),
        };
        for room_id in room_ids {
            if let Some(state) = self.room_state(&room_id) {
                held.rooms.push(self.write_room(&state, room_id).await?);
            }
        }
        self.commit(Event::HotelDeleted { id: hotel_id }, held).await?;
        Ok(true)
    }

    // ── Commit path ──────────────────────────────────────────

    /// Log `event`, then apply it to memory while `held` is still locked.
    ///
    /// If the WAL does not answer within `wal_timeout` the caller gets
    /// `StorageUnavailable`, and the locks move into a task that applies the event
    /// once the late acknowledgement arrives. Memory therefore never disagrees with
    /// the log, and the touched rooms stay locked until the outcome is known.
    async fn commit(self: &Arc<Self>, event: Event, mut held: Held) -> Result<(), EngineError> {
        let mut ack = self
            .enqueue(|response| WalCommand::Append {
                event: event.clone(),
                response,
            })
            .await?;

        let waited = tokio::time::timeout(self.options.wal_timeout, &mut ack).await;
        match waited {
            Ok(acked) => {
                flatten_ack(acked, "WAL append")?;
                self.apply_live(&event, &mut held);
                Ok(())
            }
            Err(_) => {
                let store = Arc::clone(self);
                tokio::spawn(async move {
                    match ack.await {
                        Ok(Ok(())) => {
                            warn!("late WAL acknowledgement applied: {event:?}");
                            store.apply_live(&event, &mut held);
                        }
                        _ => warn!("WAL append abandoned after timeout: {event:?}"),
                    }
                });
                Err(unavailable("WAL append timed out"))
            }
        }
    }

    /// Send a command to the writer, wiring in a fresh ack channel. Bounded by
    /// `wal_timeout`: a send that times out was never queued.
    async fn enqueue(
        &self,
        build: impl FnOnce(oneshot::Sender<io::Result<()>>) -> WalCommand,
    ) -> Result<oneshot::Receiver<io::Result<()>>, EngineError> {
        let (tx, rx) = oneshot::channel();
        let cmd = build(tx);
        match tokio::time::timeout(self.options.wal_timeout, self.wal_tx.send(cmd)).await {
            Ok(Ok(())) => Ok(rx),
            Ok(Err(_)) => Err(unavailable("WAL writer shut down")),
            Err(_) => Err(unavailable("WAL queue full")),
        }
    }

    /// Mirror a committed event into memory. Room events expect the affected rooms'
    /// write guards in `held`.
    fn apply_live(&self, event: &Event, held: &mut Held) {
        match event {
            Event::HotelCreated { id, name } => {
                self.hotels.insert(*id, Hotel { id: *id, name: name.clone() });
                self.hotel_rooms.insert(*id, Vec::new());
            }
            Event::HotelDeleted { id } => {
                for guard in held.rooms.iter_mut() {
                    self.detach_room(guard);
                }
                self.hotels.remove(id);
                self.hotel_rooms.remove(id);
            }
            Event::RoomCreated { id, hotel_id, name } => {
                self.rooms.insert(
                    *id,
                    Room {
                        id: *id,
                        hotel_id: *hotel_id,
                        name: name.clone(),
                    },
                );
                self.room_states
                    .insert(*id, Arc::new(RwLock::new(RoomState::new(*id))));
                self.hotel_rooms.entry(*hotel_id).or_default().push(*id);
            }
            Event::RoomDeleted { .. } => {
                for guard in held.rooms.iter_mut() {
                    self.detach_room(guard);
                }
            }
            Event::BookingCreated { .. } | Event::BookingCancelled { .. } => {
                for guard in held.rooms.iter_mut() {
                    apply_to_room(guard, event, &self.booking_to_room);
                }
            }
        }
    }

    /// Drop a room from every index. Caller holds its write lock.
    fn detach_room(&self, rs: &mut RoomState) {
        rs.removed = true;
        for b in rs.bookings.drain(..) {
            self.booking_to_room.remove(&b.id);
        }
        self.room_states.remove(&rs.id);
        if let Some((_, room)) = self.rooms.remove(&rs.id)
            && let Some(mut ids) = self.hotel_rooms.get_mut(&room.hotel_id)
        {
            ids.retain(|id| *id != rs.id);
        }
    }

    // ── Compaction ───────────────────────────────────────────

    /// Rewrite the WAL as the minimal event list that recreates live state.
    ///
    /// Holds the catalog lock and a read lock on every room until the rewrite is
    /// done, so no append can slip in between the snapshot and the swap.
    pub async fn compact_wal(self: &Arc<Self>) -> Result<(), EngineError> {
        let catalog = self.lock_catalog().await?;

        let mut room_ids: Vec<RoomId> = self.room_states.iter().map(|e| *e.key()).collect();
        room_ids.sort();
        let mut guards = HashMap::with_capacity(room_ids.len());
        for room_id in room_ids {
            if let Some(state) = self.room_state(&room_id) {
                guards.insert(room_id, self.read_room(&state, room_id).await?);
            }
        }

        let mut events = Vec::new();
        for hotel in self.hotels() {
            let rooms = self.rooms_by_hotel(&hotel.id);
            events.push(Event::HotelCreated {
                id: hotel.id,
                name: hotel.name,
            });
            for room in rooms {
                events.push(Event::RoomCreated {
                    id: room.id,
                    hotel_id: room.hotel_id,
                    name: room.name,
                });
                if let Some(guard) = guards.get(&room.id) {
                    events.extend(guard.bookings.iter().map(|b| Event::BookingCreated {
                        id: b.id,
                        room_id: b.room_id,
                        span: b.span,
                    }));
                }
            }
        }

        let mut ack = self
            .enqueue(|response| WalCommand::Rewrite { events, response })
            .await?;

        let waited = tokio::time::timeout(self.options.wal_timeout, &mut ack).await;
        match waited {
            Ok(acked) => flatten_ack(acked, "WAL compaction")?,
            Err(_) => {
                // Keep everything frozen until the rewrite settles.
                tokio::spawn(async move {
                    let _ = ack.await;
                    drop(guards);
                    drop(catalog);
                });
                return Err(unavailable("WAL compaction timed out"));
            }
        }
        info!("WAL compacted: {} hotels, {} rooms", self.hotels.len(), self.rooms.len());
        Ok(())
    }

    /// Durable appends since open or the last compaction.
    pub async fn wal_appends_since_compact(&self) -> Result<u64, EngineError> {
        let (tx, rx) = oneshot::channel();
        let wal_tx = &self.wal_tx;
        let round_trip = async move {
            let cmd = WalCommand::AppendsSinceCompact { response: tx };
            if wal_tx.send(cmd).await.is_err() {
                return Err(unavailable("WAL writer shut down"));
            }
            rx.await.map_err(|_| unavailable("WAL writer dropped response"))
        };
        tokio::time::timeout(self.options.wal_timeout, round_trip)
            .await
            .map_err(|_| unavailable("WAL writer did not answer"))?
    }

    /// Stall the WAL writer until the returned sender fires or is dropped.
    #[cfg(test)]
    pub(crate) async fn pause_wal(&self) -> oneshot::Sender<()> {
        let (tx, resume) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Pause { resume })
            .await
            .unwrap_or_else(|_| panic!("WAL writer gone"));
        tx
    }
}

fn flatten_ack(
    acked: Result<io::Result<()>, oneshot::error::RecvError>,
    what: &str,
) -> Result<(), EngineError> {
    acked
        .map_err(|_| unavailable("WAL writer dropped response"))?
        .map_err(|e| unavailable(format!("{what} failed: {e}")))
}
