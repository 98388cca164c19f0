//! The booking submission flow.
//!
//! `BookingDesk` loads snapshots through the repositories, asks the validator
//! or scheduler for a verdict, and writes through the repositories. The
//! store's own overlap check under the room lock is the final word; the
//! validator's check is the fast path that produces a readable rejection.

use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime, TimeDelta};
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::engine::EngineError;
use crate::limits::MAX_SERIES_SPAN_DAYS;
use crate::model::*;
use crate::observability::{BOOKINGS_CREATED_TOTAL, BOOKINGS_REJECTED_TOTAL, SERIES_OCCURRENCES_TOTAL};
use crate::repo::{BookingStore, Clock};
use crate::schedule::{
    find_conflict, free_windows, BookingScheduler, Candidate, Rejection, RejectionKind, RoomCatalog,
    SeriesSchedule, SeriesTemplate, SkipReason, SkippedOccurrence,
};

#[derive(Debug)]
pub enum DeskError {
    /// The request was judged and refused.
    Rejected(Rejection),
    NotFound(Ulid),
    /// The actor's role does not permit the operation.
    Forbidden(&'static str),
    Store(EngineError),
}

impl std::fmt::Display for DeskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeskError::Rejected(r) => write!(f, "{r}"),
            DeskError::NotFound(id) => write!(f, "not found: {id}"),
            DeskError::Forbidden(msg) => write!(f, "permission denied: {msg}"),
            DeskError::Store(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for DeskError {}

impl From<Rejection> for DeskError {
    fn from(r: Rejection) -> Self {
        DeskError::Rejected(r)
    }
}

impl From<EngineError> for DeskError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::NotFound(id) => DeskError::NotFound(id),
            other => DeskError::Store(other),
        }
    }
}

/// A single booking as submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub id: Ulid,
    pub room_id: Ulid,
    pub start: LocalTime,
    pub end: LocalTime,
    pub title: Option<String>,
    pub kind: BookingKind,
}

impl BookingRequest {
    fn candidate(&self) -> Candidate {
        Candidate {
            start: self.start,
            end: self.end,
            kind: self.kind,
        }
    }

    fn into_booking(self, owner: Ulid) -> Booking {
        Booking {
            id: self.id,
            room_id: self.room_id,
            user_id: Some(owner),
            span: Span::new(self.start, self.end),
            title: self.title,
            parent_repeating_id: None,
            kind: self.kind,
        }
    }
}

/// A recurring series as submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesRequest {
    pub id: Ulid,
    pub room_id: Ulid,
    pub title: String,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub recurrence: RecurrenceType,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

/// A snapped slot and the booking already holding any part of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotPick {
    pub span: Span,
    pub taken_by: Option<Ulid>,
}

#[derive(Debug, Clone)]
pub struct SeriesOutcome {
    pub series: RecurringSeries,
    pub schedule: SeriesSchedule,
}

pub struct BookingDesk<S: ?Sized> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    scheduler: BookingScheduler,
}

impl<S: BookingStore + ?Sized> BookingDesk<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, scheduler: BookingScheduler) -> Self {
        Self {
            store,
            clock,
            scheduler,
        }
    }

    async fn load_room(&self, room_id: Ulid) -> Result<Room, DeskError> {
        self.store
            .find_room(room_id)
            .await
            .ok_or(DeskError::NotFound(room_id))
    }

    /// Every room, in display order.
    pub async fn rooms(&self) -> Vec<Room> {
        RoomCatalog::new(self.store.list_rooms().await).into_rooms()
    }

    /// Rooms the role may book, in display order.
    pub async fn bookable_rooms(&self, role: Role) -> Vec<Room> {
        let catalog = RoomCatalog::new(self.store.list_rooms().await);
        catalog
            .bookable_for(role, &self.scheduler.validator.access)
            .cloned()
            .collect()
    }

    /// Judge a candidate without writing anything.
    pub async fn check(&self, actor: Actor, req: &BookingRequest) -> Result<(), DeskError> {
        let room = self.load_room(req.room_id).await?;
        let now = self.clock.now();
        let mine = self.store.list_future_for_user(actor.user_id, now).await;
        let taken = self.store.list_for_room(room.id).await;
        self.scheduler
            .validator
            .validate(actor.role, &room, &req.candidate(), &mine, &taken, now)
            .map_err(DeskError::Rejected)
    }

    /// Validate and commit a single booking owned by the actor.
    pub async fn book(&self, actor: Actor, req: BookingRequest) -> Result<Booking, DeskError> {
        if let Err(e) = self.check(actor, &req).await {
            record_rejection(&e);
            return Err(e);
        }
        let booking = req.into_booking(actor.user_id);
        match self.store.insert(booking).await {
            Ok(booking) => {
                metrics::counter!(BOOKINGS_CREATED_TOTAL).increment(1);
                Ok(booking)
            }
            Err(e) => Err(self.backstop_error(e)),
        }
    }

    /// Validate and commit several bookings at once. Each request is judged
    /// against the committed state plus the requests before it; nothing is
    /// written unless all of them pass.
    pub async fn book_many(&self, actor: Actor, reqs: Vec<BookingRequest>) -> Result<Vec<Booking>, DeskError> {
        let now = self.clock.now();
        let mut mine = self.store.list_future_for_user(actor.user_id, now).await;
        let mut batch: Vec<Booking> = Vec::with_capacity(reqs.len());

        for req in reqs {
            let room = self.load_room(req.room_id).await?;
            let mut taken = self.store.list_for_room(room.id).await;
            taken.extend(batch.iter().filter(|b| b.room_id == room.id).cloned());
            if let Err(r) = self
                .scheduler
                .validator
                .validate(actor.role, &room, &req.candidate(), &mine, &taken, now)
            {
                let e = DeskError::Rejected(r);
                record_rejection(&e);
                return Err(e);
            }
            let booking = req.into_booking(actor.user_id);
            mine.push(booking.clone());
            batch.push(booking);
        }

        let count = batch.len() as u64;
        match self.store.insert_many(batch).await {
            Ok(bookings) => {
                metrics::counter!(BOOKINGS_CREATED_TOTAL).increment(count);
                Ok(bookings)
            }
            Err(e) => Err(self.backstop_error(e)),
        }
    }

    /// A store conflict after a passing validation means another writer won
    /// the slot in between. Report it as the rejection the validator would
    /// have produced.
    fn backstop_error(&self, e: EngineError) -> DeskError {
        match e {
            EngineError::Conflict { booking_id, span } => {
                warn!("slot taken concurrently by booking {booking_id} ({span})");
                let e = DeskError::Rejected(Rejection::new(
                    RejectionKind::SlotConflict { booking_id, span },
                    format!("the room is already booked {span}"),
                ));
                record_rejection(&e);
                e
            }
            other => other.into(),
        }
    }

    /// Create a recurring series and book every date that is free.
    ///
    /// Only the template can be refused as a whole. Dates that are taken or
    /// already past are reported in the outcome instead.
    pub async fn create_series(&self, actor: Actor, req: SeriesRequest) -> Result<SeriesOutcome, DeskError> {
        if !actor.is_admin() {
            return Err(DeskError::Forbidden("only administrators may create repeating bookings"));
        }
        if (req.end_date - req.start_date).num_days() > MAX_SERIES_SPAN_DAYS {
            return Err(Rejection::new(
                RejectionKind::InvalidRange,
                format!("a series may span at most {MAX_SERIES_SPAN_DAYS} days"),
            )
            .into());
        }
        let room = self.load_room(req.room_id).await?;
        self.scheduler
            .validator
            .check_room_access(actor.role, &room, BookingKind::Normal)?;

        let now = self.clock.now();
        let template = SeriesTemplate {
            series_id: req.id,
            room_id: room.id,
            created_by: actor.user_id,
            title: req.title.clone(),
            start_time: req.start_time,
            end_time: req.end_time,
            recurrence: req.recurrence,
            start_date: req.start_date,
            end_date: req.end_date,
        };
        let existing = self.store.list_for_room(room.id).await;
        let mut schedule = self.scheduler.schedule(&template, &existing, now)?;

        let series = self
            .store
            .insert_series(RecurringSeries {
                id: req.id,
                room_id: room.id,
                title: req.title,
                start_time: req.start_time,
                end_time: req.end_time,
                recurrence_type: req.recurrence,
                start_date: req.start_date,
                recurrence_end_date: req.end_date,
                is_active: true,
                created_by: actor.user_id,
                created_at: now,
            })
            .await?;

        let left_out = match self
            .store
            .insert_occurrences(series.id, schedule.accepted.clone())
            .await
        {
            Ok(left_out) => left_out,
            Err(e) => {
                if let Err(cleanup) = self.store.delete_series(series.id).await {
                    warn!("series {}: rollback failed: {cleanup}", series.id);
                }
                return Err(e.into());
            }
        };
        if !left_out.is_empty() {
            warn!(
                "series {}: {} occurrences were taken while scheduling",
                series.id,
                left_out.len()
            );
            schedule.accepted.retain(|b| !left_out.iter().any(|(o, _)| o.id == b.id));
            schedule
                .skipped
                .extend(left_out.into_iter().map(|(occurrence, holder)| SkippedOccurrence {
                    date: occurrence.span.start.date(),
                    reason: SkipReason::Conflict {
                        booking_id: holder.id,
                        span: holder.span,
                    },
                }));
            schedule.skipped.sort_by_key(|s| s.date);
        }

        record_series(&schedule);
        info!(
            "series {} in room {}: {} booked, {} skipped, {} weekend dates",
            series.id,
            room.name,
            schedule.accepted.len(),
            schedule.skipped.len(),
            schedule.weekend_dates.len()
        );
        Ok(SeriesOutcome { series, schedule })
    }

    /// Delete a booking. Owners may delete their own; admins any.
    pub async fn cancel(&self, actor: Actor, booking_id: Ulid) -> Result<Booking, DeskError> {
        let booking = self
            .store
            .find(booking_id)
            .await
            .ok_or(DeskError::NotFound(booking_id))?;
        if !actor.is_admin() && booking.user_id != Some(actor.user_id) {
            return Err(DeskError::Forbidden("bookings can only be deleted by their owner"));
        }
        Ok(self.store.delete(booking_id).await?)
    }

    /// Delete a series and its generated bookings. Admin only.
    /// Returns the series and how many bookings went with it.
    pub async fn delete_series(&self, actor: Actor, series_id: Ulid) -> Result<(RecurringSeries, usize), DeskError> {
        if !actor.is_admin() {
            return Err(DeskError::Forbidden("only administrators may delete repeating bookings"));
        }
        if self.store.find_series(series_id).await.is_none() {
            return Err(DeskError::NotFound(series_id));
        }
        let removed = self.store.delete_by_parent_series(series_id).await?;
        let series = self.store.delete_series(series_id).await?;
        debug!("series {series_id} deleted with {removed} bookings");
        Ok((series, removed))
    }

    /// Free windows of a room within the opening hours of `date`.
    pub async fn availability(
        &self,
        room_id: Ulid,
        date: NaiveDate,
        min_duration: Option<TimeDelta>,
    ) -> Result<Vec<Span>, DeskError> {
        let room = self.load_room(room_id).await?;
        let window = self.scheduler.validator.window.day_window(date);
        let taken = self.store.list_for_room(room.id).await;
        Ok(free_windows(&window, &taken, min_duration))
    }

    /// Turn a pointer position into a quarter-hour aligned slot on `date`.
    /// Advisory like `availability`; `None` when the duration cannot fit.
    pub async fn pick_slot(
        &self,
        room_id: Ulid,
        date: NaiveDate,
        offset_minutes: u32,
        duration: TimeDelta,
    ) -> Result<Option<SlotPick>, DeskError> {
        let room = self.load_room(room_id).await?;
        let Some(span) = self
            .scheduler
            .validator
            .window
            .pick_slot(date, offset_minutes, duration)
        else {
            return Ok(None);
        };
        let taken = self.store.list_for_room(room.id).await;
        let taken_by = find_conflict(room.id, &span, &taken).map(|b| b.id);
        Ok(Some(SlotPick { span, taken_by }))
    }
}

fn record_rejection(e: &DeskError) {
    if let DeskError::Rejected(r) = e {
        debug!("booking rejected: {}", r.message);
        metrics::counter!(BOOKINGS_REJECTED_TOTAL, "reason" => r.kind.label()).increment(1);
    }
}

fn record_series(schedule: &SeriesSchedule) {
    let (mut conflict, mut past) = (0u64, 0u64);
    for s in &schedule.skipped {
        match s.reason {
            SkipReason::Conflict { .. } => conflict += 1,
            SkipReason::Past => past += 1,
        }
    }
    let booked = schedule.accepted.len() as u64;
    metrics::counter!(BOOKINGS_CREATED_TOTAL).increment(booked);
    metrics::counter!(SERIES_OCCURRENCES_TOTAL, "outcome" => "booked").increment(booked);
    metrics::counter!(SERIES_OCCURRENCES_TOTAL, "outcome" => "conflict").increment(conflict);
    metrics::counter!(SERIES_OCCURRENCES_TOTAL, "outcome" => "past").increment(past);
    metrics::counter!(SERIES_OCCURRENCES_TOTAL, "outcome" => "weekend")
        .increment(schedule.weekend_dates.len() as u64);
}
