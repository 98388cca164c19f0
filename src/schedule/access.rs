use chrono::TimeDelta;

use crate::model::Role;

use super::catalog::{normalize_type, AUDITORIUM, CLASSROOM, STUDY_ROOM};

/// Which normalized room types a role may book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowedTypes {
    All,
    Only(Vec<String>),
}

impl AllowedTypes {
    pub fn contains(&self, room_type: &str) -> bool {
        match self {
            AllowedTypes::All => true,
            AllowedTypes::Only(types) => types.iter().any(|t| t == room_type),
        }
    }
}

/// Per-role ceilings. `None` means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    pub max_active_bookings: Option<usize>,
    pub max_duration: Option<TimeDelta>,
}

impl Quota {
    pub const UNLIMITED: Quota = Quota {
        max_active_bookings: None,
        max_duration: None,
    };

    pub fn is_unlimited(&self) -> bool {
        self.max_active_bookings.is_none() && self.max_duration.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleRules {
    pub allowed: AllowedTypes,
    pub quota: Quota,
}

/// Static role → (room types, quota) table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleAccessPolicy {
    pub student: RoleRules,
    pub teacher: RoleRules,
    pub admin: RoleRules,
}

impl Default for RoleAccessPolicy {
    fn default() -> Self {
        Self::with_student_quota(4, TimeDelta::hours(4))
    }
}

impl RoleAccessPolicy {
    pub fn with_student_quota(max_active_bookings: usize, max_duration: TimeDelta) -> Self {
        Self {
            student: RoleRules {
                allowed: AllowedTypes::Only(vec![STUDY_ROOM.to_string()]),
                quota: Quota {
                    max_active_bookings: Some(max_active_bookings),
                    max_duration: Some(max_duration),
                },
            },
            teacher: RoleRules {
                allowed: AllowedTypes::Only(vec![CLASSROOM.to_string(), AUDITORIUM.to_string()]),
                quota: Quota::UNLIMITED,
            },
            admin: RoleRules {
                allowed: AllowedTypes::All,
                quota: Quota::UNLIMITED,
            },
        }
    }

    fn rules(&self, role: Role) -> &RoleRules {
        match role {
            Role::Student => &self.student,
            Role::Teacher => &self.teacher,
            Role::Admin => &self.admin,
        }
    }

    /// Unknown role names are parsed as `Student` before they reach here,
    /// so unrecognized roles get the student set.
    pub fn allowed_types(&self, role: Role) -> &AllowedTypes {
        &self.rules(role).allowed
    }

    pub fn quota_for(&self, role: Role) -> Quota {
        self.rules(role).quota
    }

    /// Normalizes `room_type` first. A missing type is always rejected.
    pub fn can_access_room_type(&self, role: Role, room_type: Option<&str>) -> bool {
        match normalize_type(room_type) {
            Some(t) => self.allowed_types(role).contains(t),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_matrix_is_exhaustive() {
        let policy = RoleAccessPolicy::default();
        let types = [
            Some("studierum"),
            Some("møderum"),
            Some("klasseværelse"),
            Some("auditorium"),
            None,
        ];
        let expected = [
            (Role::Student, [true, true, false, false, false]),
            (Role::Teacher, [false, false, true, true, false]),
            (Role::Admin, [true, true, true, true, false]),
        ];
        for (role, row) in expected {
            for (room_type, want) in types.iter().zip(row) {
                assert_eq!(
                    policy.can_access_room_type(role, *room_type),
                    want,
                    "{role:?} × {room_type:?}"
                );
            }
        }
    }

    #[test]
    fn unknown_role_gets_student_set() {
        let policy = RoleAccessPolicy::default();
        let role = Role::parse("visitor");
        assert_eq!(policy.allowed_types(role), policy.allowed_types(Role::Student));
        assert!(policy.can_access_room_type(role, Some("studierum")));
        assert!(!policy.can_access_room_type(role, Some("auditorium")));
    }

    #[test]
    fn quotas() {
        let policy = RoleAccessPolicy::default();
        let student = policy.quota_for(Role::Student);
        assert_eq!(student.max_active_bookings, Some(4));
        assert_eq!(student.max_duration, Some(TimeDelta::hours(4)));
        assert!(policy.quota_for(Role::Teacher).is_unlimited());
        assert!(policy.quota_for(Role::Admin).is_unlimited());
    }

    #[test]
    fn admin_accepts_unlisted_types() {
        let policy = RoleAccessPolicy::default();
        assert!(policy.can_access_room_type(Role::Admin, Some("lab")));
        assert!(!policy.can_access_room_type(Role::Admin, Some("")));
    }
}
