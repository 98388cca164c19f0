//! Booking rules: room types, roles, opening hours, overlap, recurrence.
//!
//! Everything here is pure. Callers pass the snapshot of existing bookings
//! and the current time; nothing is read from shared state.

mod access;
mod catalog;
mod overlap;
mod recurrence;
mod scheduler;
mod validator;
mod window;

pub use access::{AllowedTypes, Quota, RoleAccessPolicy, RoleRules};
pub use catalog::{normalize_type, RoomCatalog, AUDITORIUM, CLASSROOM, LEGACY_MEETING_ROOM, STUDY_ROOM};
pub use overlap::{find_conflict, free_windows, merge_overlapping, subtract_intervals};
pub use recurrence::expand_recurrence;
pub use scheduler::{
    schedule_recurring_series, BookingScheduler, SeriesSchedule, SeriesTemplate, SkipReason,
    SkippedOccurrence,
};
pub use validator::{
    validate_single_booking, BookingValidator, Candidate, QuotaReason, Rejection, RejectionKind,
};
pub use window::{round_to_quarter_hour, TimeWindowPolicy};
