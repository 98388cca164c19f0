use async_trait::async_trait;
use ulid::Ulid;

use crate::model::{Booking, LocalTime, RecurringSeries, Room};
use crate::repo::{BookingRepository, RoomRepository, SeriesRepository};

use super::{Engine, EngineError};

#[async_trait]
impl RoomRepository for Engine {
    async fn list_rooms(&self) -> Vec<Room> {
        Engine::list_rooms(self).await
    }

    async fn find_room(&self, id: Ulid) -> Option<Room> {
        self.get_room(&id).await
    }
}

#[async_trait]
impl BookingRepository for Engine {
    async fn find(&self, id: Ulid) -> Option<Booking> {
        self.get_booking(&id).await
    }

    async fn list_for_room(&self, room_id: Ulid) -> Vec<Booking> {
        self.room_bookings(&room_id).await
    }

    async fn list_future_for_user(&self, user_id: Ulid, now: LocalTime) -> Vec<Booking> {
        self.user_bookings(&user_id, Some(now)).await
    }

    async fn insert(&self, booking: Booking) -> Result<Booking, EngineError> {
        self.insert_booking(booking.clone()).await?;
        Ok(booking)
    }

    async fn insert_many(&self, bookings: Vec<Booking>) -> Result<Vec<Booking>, EngineError> {
        self.insert_bookings(bookings.clone()).await?;
        Ok(bookings)
    }

    async fn delete(&self, id: Ulid) -> Result<Booking, EngineError> {
        self.cancel_booking(id).await
    }

    async fn delete_by_parent_series(&self, series_id: Ulid) -> Result<usize, EngineError> {
        Ok(self.cancel_series_bookings(series_id).await?.len())
    }
}

#[async_trait]
impl SeriesRepository for Engine {
    async fn find_series(&self, id: Ulid) -> Option<RecurringSeries> {
        self.get_series(&id)
    }

    async fn insert_series(&self, series: RecurringSeries) -> Result<RecurringSeries, EngineError> {
        self.create_series(series.clone()).await?;
        Ok(series)
    }

    async fn insert_occurrences(
        &self,
        series_id: Ulid,
        bookings: Vec<Booking>,
    ) -> Result<Vec<(Booking, Booking)>, EngineError> {
        self.insert_series_bookings(series_id, bookings).await
    }

    async fn delete_series(&self, id: Ulid) -> Result<RecurringSeries, EngineError> {
        Engine::delete_series(self, id).await
    }
}
