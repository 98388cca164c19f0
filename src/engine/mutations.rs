use std::collections::HashMap;

use tokio::sync::oneshot;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::schedule::find_conflict;

use super::{apply_to_room, Engine, EngineError, WalCommand};

fn validate_room(room: &Room) -> Result<(), EngineError> {
    if room.name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("room name too long"));
    }
    if room.room_type.as_ref().is_some_and(|t| t.len() > MAX_ROOM_TYPE_LEN) {
        return Err(EngineError::LimitExceeded("room type too long"));
    }
    Ok(())
}

fn validate_booking(booking: &Booking) -> Result<(), EngineError> {
    if booking.title.as_ref().is_some_and(|t| t.len() > MAX_TITLE_LEN) {
        return Err(EngineError::LimitExceeded("title too long"));
    }
    Ok(())
}

/// Conflict in the committed bookings of `rs`, as an engine error.
fn check_no_conflict(rs: &RoomState, booking: &Booking) -> Result<(), EngineError> {
    match find_conflict(booking.room_id, &booking.span, rs.overlapping(&booking.span)) {
        Some(existing) => Err(EngineError::Conflict {
            booking_id: existing.id,
            span: existing.span,
        }),
        None => Ok(()),
    }
}

impl Engine {
    // ── Users ────────────────────────────────────────────

    /// Insert or replace a user. Returns `true` when the user is new.
    pub async fn save_user(&self, user: UserAccount) -> Result<bool, EngineError> {
        if user.name.is_empty() || user.name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("user name must be 1..=256 bytes"));
        }
        let _gate = self.write_gate.read().await;
        let created = !self.users.contains_key(&user.id);
        if created && self.users.len() >= MAX_USERS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many users"));
        }
        if let Some(other) = self
            .users
            .iter()
            .find(|e| e.name == user.name && e.id != user.id)
        {
            return Err(EngineError::AlreadyExists(other.id));
        }
        self.persist_global(&Event::UserSaved { user }).await?;
        Ok(created)
    }

    pub async fn delete_user(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.write_gate.read().await;
        if !self.users.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        if !self.user_bookings(&id, None).await.is_empty() {
            return Err(EngineError::InUse(id));
        }
        self.persist_global(&Event::UserDeleted { id }).await
    }

    // ── Rooms ────────────────────────────────────────────

    pub async fn create_room(&self, room: Room) -> Result<(), EngineError> {
        validate_room(&room)?;
        let _gate = self.write_gate.read().await;
        if self.rooms.len() >= MAX_ROOMS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }
        if self.rooms.contains_key(&room.id) {
            return Err(EngineError::AlreadyExists(room.id));
        }
        self.persist_global(&Event::RoomCreated { room }).await
    }

    pub async fn update_room(&self, room: Room) -> Result<(), EngineError> {
        validate_room(&room)?;
        let _gate = self.write_gate.read().await;
        let rs = self
            .get_room_state(&room.id)
            .ok_or(EngineError::NotFound(room.id))?;
        let mut guard = rs.write().await;
        self.persist_and_apply(&mut guard, &Event::RoomUpdated { room }).await
    }

    /// Create the room, or update it in place if the id is taken.
    /// Returns `true` when the room is new.
    pub async fn save_room(&self, room: Room) -> Result<bool, EngineError> {
        if self.rooms.contains_key(&room.id) {
            self.update_room(room).await?;
            Ok(false)
        } else {
            self.create_room(room).await?;
            Ok(true)
        }
    }

    /// Delete a room together with its bookings and series.
    pub async fn delete_room(&self, id: Ulid) -> Result<Room, EngineError> {
        let _gate = self.write_gate.read().await;
        let rs = self.get_room_state(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = rs.write().await;
        // Lost a race with another delete.
        if !self.rooms.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        self.wal_append(&Event::RoomDeleted { id }).await?;
        let room = guard.room.clone();
        self.drop_room(&id, &mut guard);
        Ok(room)
    }

    // ── Bookings ─────────────────────────────────────────

    /// Commit one booking. The overlap check runs under the room's write
    /// lock, so two racing inserts for the same slot cannot both succeed.
    pub async fn insert_booking(&self, booking: Booking) -> Result<(), EngineError> {
        validate_booking(&booking)?;
        let _gate = self.write_gate.read().await;
        let rs = self
            .get_room_state(&booking.room_id)
            .ok_or(EngineError::NotFound(booking.room_id))?;
        let mut guard = rs.write().await;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many bookings in room"));
        }
        if self.booking_to_room.contains_key(&booking.id) {
            return Err(EngineError::AlreadyExists(booking.id));
        }
        check_no_conflict(&guard, &booking)?;

        self.persist_and_apply(&mut guard, &Event::BookingCreated { booking })
            .await
    }

    /// Atomically commit multiple bookings. All-or-nothing: if any booking
    /// conflicts with a committed one or with another in the batch, none are
    /// committed. Bookings may span different rooms.
    pub async fn insert_bookings(&self, bookings: Vec<Booking>) -> Result<(), EngineError> {
        if bookings.is_empty() {
            return Ok(());
        }
        if bookings.len() > MAX_BATCH_SIZE {
            return Err(EngineError::LimitExceeded("batch too large"));
        }
        for b in &bookings {
            validate_booking(b)?;
        }
        let _gate = self.write_gate.read().await;

        // Acquire write locks in sorted order to prevent deadlocks.
        let mut room_ids: Vec<Ulid> = bookings.iter().map(|b| b.room_id).collect();
        room_ids.sort();
        room_ids.dedup();

        let mut guards = Vec::with_capacity(room_ids.len());
        let mut rs_map = HashMap::new();
        for rid in &room_ids {
            let rs = self.get_room_state(rid).ok_or(EngineError::NotFound(*rid))?;
            let guard = rs.write_owned().await;
            rs_map.insert(*rid, guards.len());
            guards.push(guard);
        }

        // Phase 1: validate against committed state and the rest of the batch.
        let mut per_room: HashMap<Ulid, usize> = HashMap::new();
        for (i, booking) in bookings.iter().enumerate() {
            let guard = &guards[rs_map[&booking.room_id]];
            let count = per_room.entry(booking.room_id).or_insert(guard.bookings.len());
            *count += 1;
            if *count > MAX_BOOKINGS_PER_ROOM {
                return Err(EngineError::LimitExceeded("too many bookings in room"));
            }
            if self.booking_to_room.contains_key(&booking.id) {
                return Err(EngineError::AlreadyExists(booking.id));
            }
            check_no_conflict(guard, booking)?;
            if let Some(earlier) = find_conflict(booking.room_id, &booking.span, &bookings[..i]) {
                return Err(EngineError::Conflict {
                    booking_id: earlier.id,
                    span: earlier.span,
                });
            }
        }

        // Phase 2: all validated, commit.
        for booking in bookings {
            let idx = rs_map[&booking.room_id];
            let event = Event::BookingCreated { booking };
            self.wal_append(&event).await?;
            apply_to_room(&mut guards[idx], &event, &self.booking_to_room);
        }

        Ok(())
    }

    pub async fn cancel_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let _gate = self.write_gate.read().await;
        let (room_id, mut guard) = self.resolve_booking_write(&id).await?;
        let booking = guard
            .bookings
            .iter()
            .find(|b| b.id == id)
            .cloned()
            .ok_or(EngineError::NotFound(id))?;
        self.persist_and_apply(&mut guard, &Event::BookingCancelled { id, room_id })
            .await?;
        Ok(booking)
    }

    /// Cancel every booking generated by a series, keeping the series itself.
    /// Returns the cancelled booking ids.
    pub async fn cancel_series_bookings(&self, series_id: Ulid) -> Result<Vec<Ulid>, EngineError> {
        let _gate = self.write_gate.read().await;
        let room_id = self
            .series
            .get(&series_id)
            .map(|s| s.room_id)
            .ok_or(EngineError::NotFound(series_id))?;
        let rs = self
            .get_room_state(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let mut guard = rs.write().await;

        let ids: Vec<Ulid> = guard
            .bookings
            .iter()
            .filter(|b| b.parent_repeating_id == Some(series_id))
            .map(|b| b.id)
            .collect();
        for id in &ids {
            self.persist_and_apply(&mut guard, &Event::BookingCancelled { id: *id, room_id })
                .await?;
        }
        Ok(ids)
    }

    // ── Series ───────────────────────────────────────────

    pub async fn create_series(&self, series: RecurringSeries) -> Result<(), EngineError> {
        if series.title.len() > MAX_TITLE_LEN {
            return Err(EngineError::LimitExceeded("title too long"));
        }
        let _gate = self.write_gate.read().await;
        if !self.rooms.contains_key(&series.room_id) {
            return Err(EngineError::NotFound(series.room_id));
        }
        if self.series.contains_key(&series.id) {
            return Err(EngineError::AlreadyExists(series.id));
        }
        self.persist_global(&Event::SeriesCreated { series }).await
    }

    /// Commit the generated bookings of a series under its room lock.
    /// Occurrences that overlap a committed booking are left out and
    /// returned paired with the booking they hit; everything else commits.
    pub async fn insert_series_bookings(
        &self,
        series_id: Ulid,
        bookings: Vec<Booking>,
    ) -> Result<Vec<(Booking, Booking)>, EngineError> {
        if bookings.len() > MAX_BATCH_SIZE {
            return Err(EngineError::LimitExceeded("batch too large"));
        }
        for b in &bookings {
            validate_booking(b)?;
        }
        let _gate = self.write_gate.read().await;
        let room_id = self
            .series
            .get(&series_id)
            .map(|s| s.room_id)
            .ok_or(EngineError::NotFound(series_id))?;
        if let Some(stray) = bookings.iter().find(|b| b.room_id != room_id) {
            return Err(EngineError::NotFound(stray.room_id));
        }
        let rs = self
            .get_room_state(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let mut guard = rs.write().await;
        if guard.bookings.len() + bookings.len() > MAX_BOOKINGS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many bookings in room"));
        }

        let mut left_out = Vec::new();
        for booking in bookings {
            if self.booking_to_room.contains_key(&booking.id) {
                return Err(EngineError::AlreadyExists(booking.id));
            }
            let hit = find_conflict(room_id, &booking.span, guard.overlapping(&booking.span)).cloned();
            match hit {
                Some(existing) => left_out.push((booking, existing)),
                None => {
                    self.persist_and_apply(&mut guard, &Event::BookingCreated { booking })
                        .await?
                }
            }
        }
        Ok(left_out)
    }

    /// Delete a series and every booking it generated.
    pub async fn delete_series(&self, id: Ulid) -> Result<RecurringSeries, EngineError> {
        let _gate = self.write_gate.read().await;
        let series = self
            .series
            .get(&id)
            .map(|s| s.value().clone())
            .ok_or(EngineError::NotFound(id))?;
        let room_id = series.room_id;
        let rs = self
            .get_room_state(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let mut guard = rs.write().await;
        self.persist_and_apply(&mut guard, &Event::SeriesDeleted { id, room_id })
            .await?;
        Ok(series)
    }

    // ── Compaction ───────────────────────────────────────

    /// Compact the WAL by rewriting it with only the events needed to
    /// recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.write_gate.write().await;

        let mut events: Vec<Event> = self
            .users
            .iter()
            .map(|e| Event::UserSaved { user: e.value().clone() })
            .collect();

        let rooms: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();
        let mut booking_events = Vec::new();
        for rs in rooms {
            let guard = rs.read().await;
            events.push(Event::RoomCreated { room: guard.room.clone() });
            booking_events.extend(
                guard
                    .bookings
                    .iter()
                    .map(|b| Event::BookingCreated { booking: b.clone() }),
            );
        }
        events.extend(
            self.series
                .iter()
                .map(|e| Event::SeriesCreated { series: e.value().clone() }),
        );
        events.extend(booking_events);

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
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
