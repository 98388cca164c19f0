//! Hard input limits. Requests exceeding these are rejected with `LimitExceeded`.

pub const MAX_ROOMS_PER_TENANT: usize = 10_000;
pub const MAX_USERS_PER_TENANT: usize = 100_000;
pub const MAX_BOOKINGS_PER_ROOM: usize = 100_000;
pub const MAX_BATCH_SIZE: usize = 1_000;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_TITLE_LEN: usize = 512;
pub const MAX_ROOM_TYPE_LEN: usize = 64;

/// Longest date range a single recurring series may cover.
pub const MAX_SERIES_SPAN_DAYS: i64 = 400;

pub const MAX_TENANTS: usize = 1_000;
pub const MAX_TENANT_NAME_LEN: usize = 256;
