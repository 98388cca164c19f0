use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Local wall-clock instant, the only time type. No timezone is attached.
pub type LocalTime = NaiveDateTime;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: LocalTime,
    pub end: LocalTime,
}

impl Span {
    pub fn new(start: LocalTime, end: LocalTime) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// `None` unless `end` is strictly after `start`.
    pub fn try_new(start: LocalTime, end: LocalTime) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    /// Combine a calendar date with two times of day.
    pub fn on_date(date: NaiveDate, start: NaiveTime, end: NaiveTime) -> Option<Self> {
        Self::try_new(date.and_time(start), date.and_time(end))
    }

    pub fn duration(&self) -> TimeDelta {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.start.date() == self.end.date() {
            write!(
                f,
                "{} {}–{}",
                self.start.date(),
                self.start.format("%H:%M"),
                self.end.format("%H:%M")
            )
        } else {
            write!(
                f,
                "{}–{}",
                self.start.format("%Y-%m-%d %H:%M"),
                self.end.format("%Y-%m-%d %H:%M")
            )
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Student,
    Teacher,
    Admin,
}

impl Role {
    /// Unknown or empty role names fall back to `Student`, the most restricted role.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "admin" => Role::Admin,
            "teacher" => Role::Teacher,
            _ => Role::Student,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Teacher => "teacher",
            Role::Admin => "admin",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    pub id: Ulid,
    pub name: String,
    pub role: Role,
}

/// The acting user of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: Ulid,
    pub role: Role,
}

impl Actor {
    pub fn new(user_id: Ulid, role: Role) -> Self {
        Self { user_id, role }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: Ulid,
    pub name: String,
    /// Raw type label as entered by an administrator. Use
    /// [`crate::schedule::normalize_type`] before comparing.
    pub room_type: Option<String>,
    pub capacity: u32,
    pub floor: i32,
    pub has_whiteboard: bool,
    pub has_screen: bool,
    pub has_board: bool,
    /// Closed rooms are never offered for booking.
    pub is_closed: bool,
}

impl Room {
    pub fn new(id: Ulid, name: impl Into<String>, room_type: Option<&str>) -> Self {
        Self {
            id,
            name: name.into(),
            room_type: room_type.map(str::to_string),
            capacity: 0,
            floor: 0,
            has_whiteboard: false,
            has_screen: false,
            has_board: false,
            is_closed: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingKind {
    Normal,
    /// Admin-created exam reservations; exempt from role/quota rules.
    Exam,
}

impl BookingKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "" | "normal" => Some(BookingKind::Normal),
            "exam" => Some(BookingKind::Exam),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingKind::Normal => "normal",
            BookingKind::Exam => "exam",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub room_id: Ulid,
    /// Owner. Only `None` for rows whose owner was deleted.
    pub user_id: Option<Ulid>,
    pub span: Span,
    pub title: Option<String>,
    pub parent_repeating_id: Option<Ulid>,
    pub kind: BookingKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecurrenceType {
    Daily,
    Weekly,
    Biweekly,
    Monthly,
}

impl RecurrenceType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "daily" => Some(RecurrenceType::Daily),
            "weekly" => Some(RecurrenceType::Weekly),
            "biweekly" => Some(RecurrenceType::Biweekly),
            "monthly" => Some(RecurrenceType::Monthly),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecurrenceType::Daily => "daily",
            RecurrenceType::Weekly => "weekly",
            RecurrenceType::Biweekly => "biweekly",
            RecurrenceType::Monthly => "monthly",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurringSeries {
    pub id: Ulid,
    pub room_id: Ulid,
    pub title: String,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub recurrence_type: RecurrenceType,
    pub start_date: NaiveDate,
    pub recurrence_end_date: NaiveDate,
    pub is_active: bool,
    pub created_by: Ulid,
    pub created_at: LocalTime,
}

/// In-memory state of one room: its record plus its bookings.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub room: Room,
    /// Sorted by `span.start`.
    pub bookings: Vec<Booking>,
}

impl RoomState {
    pub fn new(room: Room) -> Self {
        Self {
            room,
            bookings: Vec::new(),
        }
    }

    /// Insert booking maintaining sort order by span.start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.span.start, |b| b.span.start)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn remove_booking(&mut self, id: Ulid) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    /// Return only bookings whose span overlaps the query window.
    /// Uses binary search to skip bookings starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        let right_bound = self
            .bookings
            .partition_point(|b| b.span.start < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.span.end > query.start)
    }
}

/// The event types: flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    UserSaved { user: UserAccount },
    UserDeleted { id: Ulid },
    RoomCreated { room: Room },
    RoomUpdated { room: Room },
    /// Cascades to the room's bookings and series.
    RoomDeleted { id: Ulid },
    BookingCreated { booking: Booking },
    BookingCancelled { id: Ulid, room_id: Ulid },
    SeriesCreated { series: RecurringSeries },
    SeriesDeleted { id: Ulid, room_id: Ulid },
}
