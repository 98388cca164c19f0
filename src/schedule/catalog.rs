use crate::model::{Role, Room};

use super::access::RoleAccessPolicy;

/// Canonical type for meeting/study rooms.
pub const STUDY_ROOM: &str = "studierum";
/// Legacy label folded into [`STUDY_ROOM`].
pub const LEGACY_MEETING_ROOM: &str = "møderum";
pub const CLASSROOM: &str = "klasseværelse";
pub const AUDITORIUM: &str = "auditorium";

/// Normalize a raw room type label.
///
/// `"møderum"` is folded into `"studierum"`; empty or missing labels become
/// `None`; everything else passes through unchanged.
pub fn normalize_type(raw: Option<&str>) -> Option<&str> {
    match raw {
        None => None,
        Some(t) if t.trim().is_empty() => None,
        Some(t) if t == LEGACY_MEETING_ROOM => Some(STUDY_ROOM),
        Some(t) => Some(t),
    }
}

/// Read-only view over rooms.
pub struct RoomCatalog {
    rooms: Vec<Room>,
}

impl RoomCatalog {
    pub fn new(mut rooms: Vec<Room>) -> Self {
        rooms.sort_by(|a, b| a.floor.cmp(&b.floor).then_with(|| a.name.cmp(&b.name)));
        Self { rooms }
    }

    pub fn into_rooms(self) -> Vec<Room> {
        self.rooms
    }

    /// Rooms a role may book: open and of a permitted type.
    pub fn bookable_for<'a>(
        &'a self,
        role: Role,
        policy: &'a RoleAccessPolicy,
    ) -> impl Iterator<Item = &'a Room> + 'a {
        self.rooms.iter().filter(move |room| {
            !room.is_closed && policy.can_access_room_type(role, room.room_type.as_deref())
        })
    }
}
