use chrono::{NaiveDate, NaiveTime};
use ulid::Ulid;

use crate::model::*;

use super::overlap::find_conflict;
use super::recurrence::expand_recurrence;
use super::validator::{BookingValidator, Rejection};
use super::window::TimeWindowPolicy;

/// A recurring series before it is materialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesTemplate {
    pub series_id: Ulid,
    pub room_id: Ulid,
    pub created_by: Ulid,
    pub title: String,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub recurrence: RecurrenceType,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Starts before "now".
    Past,
    /// Overlaps an existing booking or an earlier occurrence of the same series.
    Conflict { booking_id: Ulid, span: Span },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkippedOccurrence {
    pub date: NaiveDate,
    pub reason: SkipReason,
}

/// Outcome of materializing a series: always a partition, never an error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeriesSchedule {
    pub accepted: Vec<Booking>,
    pub skipped: Vec<SkippedOccurrence>,
    /// Saturday/Sunday dates dropped before any checks.
    pub weekend_dates: Vec<NaiveDate>,
}

impl SeriesSchedule {
    pub fn skipped_dates(&self) -> Vec<NaiveDate> {
        self.skipped.iter().map(|s| s.date).collect()
    }
}

/// Materializes recurring series into concrete bookings.
#[derive(Debug, Clone, Default)]
pub struct BookingScheduler {
    pub validator: BookingValidator,
}

impl BookingScheduler {
    pub fn new(validator: BookingValidator) -> Self {
        Self { validator }
    }

    /// Validate the template times once, expand the dates, and partition them.
    ///
    /// Only the template itself can be rejected. Per-date conflicts are
    /// skipped, checked against `existing_room_bookings` and the occurrences
    /// accepted earlier in the same run.
    pub fn schedule(
        &self,
        template: &SeriesTemplate,
        existing_room_bookings: &[Booking],
        now: LocalTime,
    ) -> Result<SeriesSchedule, Rejection> {
        let first = template.start_date;
        self.validator
            .check_time_range(first.and_time(template.start_time), first.and_time(template.end_time))?;

        let mut schedule = SeriesSchedule::default();
        for date in expand_recurrence(template.start_date, template.end_date, template.recurrence) {
            if !TimeWindowPolicy::is_weekday(date) {
                schedule.weekend_dates.push(date);
                continue;
            }
            let Some(span) = Span::on_date(date, template.start_time, template.end_time) else {
                continue;
            };
            if span.start < now {
                schedule.skipped.push(SkippedOccurrence {
                    date,
                    reason: SkipReason::Past,
                });
                continue;
            }
            let conflict = find_conflict(template.room_id, &span, existing_room_bookings)
                .or_else(|| find_conflict(template.room_id, &span, &schedule.accepted));
            if let Some(existing) = conflict {
                let reason = SkipReason::Conflict {
                    booking_id: existing.id,
                    span: existing.span,
                };
                schedule.skipped.push(SkippedOccurrence { date, reason });
                continue;
            }
            schedule.accepted.push(Booking {
                id: Ulid::new(),
                room_id: template.room_id,
                user_id: Some(template.created_by),
                span,
                title: Some(template.title.clone()),
                parent_repeating_id: Some(template.series_id),
                kind: BookingKind::Normal,
            });
        }
        Ok(schedule)
    }
}

/// [`BookingScheduler::schedule`] with the default policies.
pub fn schedule_recurring_series(
    template: &SeriesTemplate,
    existing_room_bookings: &[Booking],
    now: LocalTime,
) -> Result<SeriesSchedule, Rejection> {
    BookingScheduler::default().schedule(template, existing_room_bookings, now)
}
