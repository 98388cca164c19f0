use chrono::TimeDelta;
use ulid::Ulid;

use crate::model::*;

use super::access::RoleAccessPolicy;
use super::catalog::normalize_type;
use super::overlap::find_conflict;
use super::window::TimeWindowPolicy;

// ── Rejections ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaReason {
    TooManyBookings { limit: usize },
    TooLong { max: TimeDelta },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectionKind {
    InvalidRange,
    PastBooking,
    WeekendBooking,
    OutsideOpeningHours,
    AccessDenied,
    QuotaExceeded(QuotaReason),
    SlotConflict { booking_id: Ulid, span: Span },
}

impl RejectionKind {
    /// Short label for metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            RejectionKind::InvalidRange => "invalid_range",
            RejectionKind::PastBooking => "past_booking",
            RejectionKind::WeekendBooking => "weekend_booking",
            RejectionKind::OutsideOpeningHours => "outside_opening_hours",
            RejectionKind::AccessDenied => "access_denied",
            RejectionKind::QuotaExceeded(QuotaReason::TooManyBookings { .. }) => "quota_bookings",
            RejectionKind::QuotaExceeded(QuotaReason::TooLong { .. }) => "quota_duration",
            RejectionKind::SlotConflict { .. } => "slot_conflict",
        }
    }
}

/// Why a candidate booking may not exist. An expected outcome, not a fault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub kind: RejectionKind,
    pub message: String,
}

impl Rejection {
    pub fn new(kind: RejectionKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub(crate) fn invalid_range() -> Self {
        Self::new(RejectionKind::InvalidRange, "end time must be after start time")
    }

    pub(crate) fn outside_opening_hours(window: &TimeWindowPolicy) -> Self {
        Self::new(
            RejectionKind::OutsideOpeningHours,
            format!(
                "bookings must lie between {:02}:00 and {:02}:00 on a single day",
                window.day_start_hour, window.day_end_hour
            ),
        )
    }

    pub(crate) fn access_denied(message: impl Into<String>) -> Self {
        Self::new(RejectionKind::AccessDenied, message)
    }

    pub(crate) fn conflict(existing: &Booking) -> Self {
        Self::new(
            RejectionKind::SlotConflict {
                booking_id: existing.id,
                span: existing.span,
            },
            format!("the room is already booked {}", existing.span),
        )
    }
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Rejection {}

// ── Validator ─────────────────────────────────────────────────────

/// A proposed booking, before it has an id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub start: LocalTime,
    pub end: LocalTime,
    pub kind: BookingKind,
}

impl Candidate {
    pub fn new(start: LocalTime, end: LocalTime) -> Self {
        Self {
            start,
            end,
            kind: BookingKind::Normal,
        }
    }

    pub fn exam(start: LocalTime, end: LocalTime) -> Self {
        Self {
            start,
            end,
            kind: BookingKind::Exam,
        }
    }
}

/// The single authority for "may this booking exist?".
///
/// Checks run in order and the first failure wins:
/// range, opening hours, room access, quota, overlap, then the submission
/// gate of past start and weekend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingValidator {
    pub window: TimeWindowPolicy,
    pub access: RoleAccessPolicy,
}

impl BookingValidator {
    pub fn new(window: TimeWindowPolicy, access: RoleAccessPolicy) -> Self {
        Self { window, access }
    }

    /// Steps shared with series templates: a non-empty range inside the
    /// opening hours of one day.
    pub fn check_time_range(&self, start: LocalTime, end: LocalTime) -> Result<Span, Rejection> {
        let span = Span::try_new(start, end).ok_or_else(Rejection::invalid_range)?;
        if span.start.date() != span.end.date()
            || !self.window.is_within_opening_hours(span.start, span.end)
        {
            return Err(Rejection::outside_opening_hours(&self.window));
        }
        Ok(span)
    }

    /// Room-level access: open room, permitted type. Exams are admin-only and
    /// skip the type check.
    pub fn check_room_access(&self, role: Role, room: &Room, kind: BookingKind) -> Result<(), Rejection> {
        if room.is_closed {
            return Err(Rejection::access_denied(format!("room {} is closed", room.name)));
        }
        match kind {
            BookingKind::Exam if role != Role::Admin => Err(Rejection::access_denied(
                "only administrators may create exam bookings",
            )),
            BookingKind::Exam => Ok(()),
            BookingKind::Normal => {
                if self.access.can_access_room_type(role, room.room_type.as_deref()) {
                    Ok(())
                } else {
                    Err(Rejection::access_denied(format!(
                        "a {} may not book rooms of type {}",
                        role.as_str(),
                        normalize_type(room.room_type.as_deref()).unwrap_or("(none)")
                    )))
                }
            }
        }
    }

    fn check_quota(
        &self,
        role: Role,
        span: &Span,
        user_future_bookings: &[Booking],
        now: LocalTime,
    ) -> Result<(), Rejection> {
        let quota = self.access.quota_for(role);
        if let Some(limit) = quota.max_active_bookings {
            let active = user_future_bookings.iter().filter(|b| b.span.end > now).count();
            if active >= limit {
                return Err(Rejection::new(
                    RejectionKind::QuotaExceeded(QuotaReason::TooManyBookings { limit }),
                    format!("you already have {active} upcoming bookings (limit {limit})"),
                ));
            }
        }
        if let Some(max) = quota.max_duration
            && span.duration() > max
        {
            return Err(Rejection::new(
                RejectionKind::QuotaExceeded(QuotaReason::TooLong { max }),
                format!(
                    "a booking may last at most {} minutes (requested {})",
                    max.num_minutes(),
                    span.duration().num_minutes()
                ),
            ));
        }
        Ok(())
    }

    /// Judge one candidate. Pure: the caller performs any write.
    pub fn validate(
        &self,
        role: Role,
        room: &Room,
        candidate: &Candidate,
        user_future_bookings: &[Booking],
        room_bookings: &[Booking],
        now: LocalTime,
    ) -> Result<(), Rejection> {
        let span = self.check_time_range(candidate.start, candidate.end)?;
        self.check_room_access(role, room, candidate.kind)?;
        if candidate.kind == BookingKind::Normal {
            self.check_quota(role, &span, user_future_bookings, now)?;
        }
        if let Some(existing) = find_conflict(room.id, &span, room_bookings) {
            return Err(Rejection::conflict(existing));
        }
        if span.start < now {
            return Err(Rejection::new(
                RejectionKind::PastBooking,
                "bookings cannot start in the past",
            ));
        }
        if !TimeWindowPolicy::is_weekday(span.start.date()) {
            return Err(Rejection::new(
                RejectionKind::WeekendBooking,
                "bookings are not possible on Saturdays and Sundays",
            ));
        }
        Ok(())
    }
}

/// [`BookingValidator::validate`] with the default policies.
pub fn validate_single_booking(
    role: Role,
    room: &Room,
    candidate: &Candidate,
    user_future_bookings: &[Booking],
    room_bookings: &[Booking],
    now: LocalTime,
) -> Result<(), Rejection> {
    BookingValidator::default().validate(role, room, candidate, user_future_bookings, room_bookings, now)
}
