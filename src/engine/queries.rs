use chrono::TimeDelta;
use ulid::Ulid;

use crate::model::*;
use crate::schedule::free_windows;

use super::{Engine, EngineError};

/// A series together with how many of its bookings still exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesInfo {
    pub series: RecurringSeries,
    pub booking_count: usize,
}

impl Engine {
    pub fn list_users(&self) -> Vec<UserAccount> {
        let mut users: Vec<UserAccount> = self.users.iter().map(|e| e.value().clone()).collect();
        users.sort_by(|a, b| a.name.cmp(&b.name));
        users
    }

    pub fn get_user(&self, id: &Ulid) -> Option<UserAccount> {
        self.users.get(id).map(|e| e.value().clone())
    }

    pub fn find_user_by_name(&self, name: &str) -> Option<UserAccount> {
        self.users
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.value().clone())
    }

    pub async fn get_room(&self, id: &Ulid) -> Option<Room> {
        let rs = self.get_room_state(id)?;
        let guard = rs.read().await;
        Some(guard.room.clone())
    }

    /// All rooms, unordered. Use `RoomCatalog` for display order.
    pub async fn list_rooms(&self) -> Vec<Room> {
        let states: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();
        let mut rooms = Vec::with_capacity(states.len());
        for rs in states {
            rooms.push(rs.read().await.room.clone());
        }
        rooms
    }

    /// Bookings of one room, ordered by start. Empty for unknown rooms.
    pub async fn room_bookings(&self, room_id: &Ulid) -> Vec<Booking> {
        match self.get_room_state(room_id) {
            Some(rs) => rs.read().await.bookings.clone(),
            None => Vec::new(),
        }
    }

    /// Bookings of one room that overlap `window`.
    pub async fn room_bookings_in(&self, room_id: &Ulid, window: &Span) -> Vec<Booking> {
        match self.get_room_state(room_id) {
            Some(rs) => rs.read().await.overlapping(window).cloned().collect(),
            None => Vec::new(),
        }
    }

    /// Every booking across all rooms, ordered by start.
    pub async fn list_bookings(&self) -> Vec<Booking> {
        let states: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();
        let mut all = Vec::new();
        for rs in states {
            all.extend(rs.read().await.bookings.iter().cloned());
        }
        all.sort_by_key(|b| (b.span.start, b.id));
        all
    }

    /// Bookings owned by `user_id`. With `after`, only those ending later.
    pub async fn user_bookings(&self, user_id: &Ulid, after: Option<LocalTime>) -> Vec<Booking> {
        let mut mine: Vec<Booking> = self
            .list_bookings()
            .await
            .into_iter()
            .filter(|b| b.user_id.as_ref() == Some(user_id))
            .collect();
        if let Some(now) = after {
            mine.retain(|b| b.span.end > now);
        }
        mine
    }

    pub async fn get_booking(&self, id: &Ulid) -> Option<Booking> {
        let room_id = self.room_for_booking(id)?;
        let rs = self.get_room_state(&room_id)?;
        let guard = rs.read().await;
        guard.bookings.iter().find(|b| &b.id == id).cloned()
    }

    pub fn get_series(&self, id: &Ulid) -> Option<RecurringSeries> {
        self.series.get(id).map(|e| e.value().clone())
    }

    /// Series with live booking counts, optionally for one room, newest first.
    pub async fn list_series(&self, room_id: Option<Ulid>) -> Vec<SeriesInfo> {
        let mut series: Vec<RecurringSeries> = self
            .series
            .iter()
            .filter(|e| room_id.is_none_or(|r| e.room_id == r))
            .map(|e| e.value().clone())
            .collect();
        series.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));

        let mut out = Vec::with_capacity(series.len());
        for s in series {
            let booking_count = match self.get_room_state(&s.room_id) {
                Some(rs) => rs
                    .read()
                    .await
                    .bookings
                    .iter()
                    .filter(|b| b.parent_repeating_id == Some(s.id))
                    .count(),
                None => 0,
            };
            out.push(SeriesInfo { series: s, booking_count });
        }
        out
    }

    /// Free windows of a room inside `window`, at least `min_duration` long.
    pub async fn availability(
        &self,
        room_id: Ulid,
        window: Span,
        min_duration: Option<TimeDelta>,
    ) -> Result<Vec<Span>, EngineError> {
        let rs = self
            .get_room_state(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        let busy: Vec<Booking> = guard.overlapping(&window).cloned().collect();
        Ok(free_windows(&window, &busy, min_duration))
    }
}
