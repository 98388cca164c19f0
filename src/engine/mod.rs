mod error;
mod mutations;
mod queries;
mod repository;
#[cfg(test)]
mod tests;

pub use error::EngineError;
pub use queries::SeriesInfo;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedRoomState = Arc<RwLock<RoomState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
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

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break, // channel empty, flush batch
                    }
                }

                commit_batch(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush, even on append error, so partially buffered bytes
    // don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

/// Booking store for one tenant: rooms with their bookings behind per-room
/// locks, plus users and recurring series.
pub struct Engine {
    pub(super) rooms: DashMap<Ulid, SharedRoomState>,
    pub(super) users: DashMap<Ulid, UserAccount>,
    pub(super) series: DashMap<Ulid, RecurringSeries>,
    /// Reverse lookup: booking id → room id
    pub(super) booking_to_room: DashMap<Ulid, Ulid>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Mutations hold this shared for their whole duration; compaction takes
    /// it exclusively so the snapshot it writes matches the log.
    pub(super) write_gate: RwLock<()>,
}

/// Apply a booking event to a room. No locking; caller holds the lock.
pub(super) fn apply_to_room(rs: &mut RoomState, event: &Event, index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::BookingCreated { booking } => {
            index.insert(booking.id, booking.room_id);
            rs.insert_booking(booking.clone());
        }
        Event::BookingCancelled { id, .. } => {
            rs.remove_booking(*id);
            index.remove(id);
        }
        Event::SeriesDeleted { id, .. } => {
            rs.bookings.retain(|b| {
                let generated = b.parent_repeating_id == Some(*id);
                if generated {
                    index.remove(&b.id);
                }
                !generated
            });
        }
        Event::RoomUpdated { room } => {
            rs.room = room.clone();
        }
        // Handled at the map level.
        Event::UserSaved { .. }
        | Event::UserDeleted { .. }
        | Event::RoomCreated { .. }
        | Event::RoomDeleted { .. }
        | Event::SeriesCreated { .. } => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            rooms: DashMap::new(),
            users: DashMap::new(),
            series: DashMap::new(),
            booking_to_room: DashMap::new(),
            wal_tx,
            write_gate: RwLock::new(()),
        };

        // We're the sole owner of these Arcs, so try_write always succeeds.
        // Never use blocking_write here: this may run inside an async context
        // (lazy tenant creation).
        for event in &events {
            match event {
                Event::RoomDeleted { id } => {
                    if let Some(rs) = engine.get_room_state(id) {
                        let mut guard = rs.try_write().expect("replay: uncontended write");
                        engine.drop_room(id, &mut guard);
                    }
                }
                other => {
                    engine.apply_global(other);
                    if let Some(room_id) = event_room_id(other)
                        && let Some(rs) = engine.get_room_state(&room_id)
                    {
                        let mut guard = rs.try_write().expect("replay: uncontended write");
                        apply_to_room(&mut guard, other, &engine.booking_to_room);
                    }
                }
            }
        }

        Ok(engine)
    }

    /// Apply the map-level part of an event (users, series, room creation).
    fn apply_global(&self, event: &Event) {
        match event {
            Event::UserSaved { user } => {
                self.users.insert(user.id, user.clone());
            }
            Event::UserDeleted { id } => {
                self.users.remove(id);
            }
            Event::RoomCreated { room } => {
                self.rooms
                    .insert(room.id, Arc::new(RwLock::new(RoomState::new(room.clone()))));
            }
            Event::SeriesCreated { series } => {
                self.series.insert(series.id, series.clone());
            }
            Event::SeriesDeleted { id, .. } => {
                self.series.remove(id);
            }
            Event::RoomDeleted { .. }
            | Event::RoomUpdated { .. }
            | Event::BookingCreated { .. }
            | Event::BookingCancelled { .. } => {}
        }
    }

    /// Remove a room with its bookings and series. Caller holds the room's
    /// write lock.
    pub(super) fn drop_room(&self, id: &Ulid, rs: &mut RoomState) {
        for b in rs.bookings.drain(..) {
            self.booking_to_room.remove(&b.id);
        }
        self.rooms.remove(id);
        self.series.retain(|_, s| &s.room_id != id);
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_room_state(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    pub fn room_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_to_room.get(booking_id).map(|e| *e.value())
    }

    /// WAL-append + apply in one call. Caller holds the room's write lock.
    pub(super) async fn persist_and_apply(&self, rs: &mut RoomState, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.apply_global(event);
        apply_to_room(rs, event, &self.booking_to_room);
        Ok(())
    }

    /// WAL-append + map-level apply for events that touch no room state.
    pub(super) async fn persist_global(&self, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.apply_global(event);
        Ok(())
    }

    /// Lookup booking → room, acquire that room's write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<RoomState>), EngineError> {
        let room_id = self
            .room_for_booking(booking_id)
            .ok_or(EngineError::NotFound(*booking_id))?;
        let rs = self
            .get_room_state(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.write_owned().await;
        Ok((room_id, guard))
    }
}

/// The room a room-scoped event applies to.
fn event_room_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::BookingCreated { booking } => Some(booking.room_id),
        Event::BookingCancelled { room_id, .. } | Event::SeriesDeleted { room_id, .. } => Some(*room_id),
        Event::RoomUpdated { room } => Some(room.id),
        Event::UserSaved { .. }
        | Event::UserDeleted { .. }
        | Event::RoomCreated { .. }
        | Event::RoomDeleted { .. }
        | Event::SeriesCreated { .. } => None,
    }
}
