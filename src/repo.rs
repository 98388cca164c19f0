//! Store and clock interfaces the booking desk is written against.
//!
//! `Engine` implements every repository; tests pin time with `FixedClock`.

use async_trait::async_trait;
use chrono::Local;
use ulid::Ulid;

use crate::engine::EngineError;
use crate::model::{Booking, LocalTime, RecurringSeries, Room};

#[async_trait]
pub trait RoomRepository: Send + Sync {
    async fn list_rooms(&self) -> Vec<Room>;
    async fn find_room(&self, id: Ulid) -> Option<Room>;
}

#[async_trait]
pub trait BookingRepository: Send + Sync {
    async fn find(&self, id: Ulid) -> Option<Booking>;
    /// Ordered by start.
    async fn list_for_room(&self, room_id: Ulid) -> Vec<Booking>;
    /// The user's bookings that end after `now`.
    async fn list_future_for_user(&self, user_id: Ulid, now: LocalTime) -> Vec<Booking>;
    /// Rejects with `EngineError::Conflict` if the slot was taken meanwhile.
    async fn insert(&self, booking: Booking) -> Result<Booking, EngineError>;
    /// All-or-nothing.
    async fn insert_many(&self, bookings: Vec<Booking>) -> Result<Vec<Booking>, EngineError>;
    async fn delete(&self, id: Ulid) -> Result<Booking, EngineError>;
    async fn delete_by_parent_series(&self, series_id: Ulid) -> Result<usize, EngineError>;
}

#[async_trait]
pub trait SeriesRepository: Send + Sync {
    async fn find_series(&self, id: Ulid) -> Option<RecurringSeries>;
    async fn insert_series(&self, series: RecurringSeries) -> Result<RecurringSeries, EngineError>;
    /// Commits every occurrence that is still free under the room lock.
    /// Returns the ones left out, each with the committed booking it overlaps.
    async fn insert_occurrences(
        &self,
        series_id: Ulid,
        bookings: Vec<Booking>,
    ) -> Result<Vec<(Booking, Booking)>, EngineError>;
    /// Also removes the bookings the series generated.
    async fn delete_series(&self, id: Ulid) -> Result<RecurringSeries, EngineError>;
}

/// Everything the desk needs from a store.
pub trait BookingStore: RoomRepository + BookingRepository + SeriesRepository {}

impl<T: RoomRepository + BookingRepository + SeriesRepository> BookingStore for T {}

pub trait Clock: Send + Sync {
    fn now(&self) -> LocalTime;
}

/// Local wall-clock time of the host.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> LocalTime {
        Local::now().naive_local()
    }
}

/// A clock that always reads the same instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub LocalTime);

impl Clock for FixedClock {
    fn now(&self) -> LocalTime {
        self.0
    }
}
