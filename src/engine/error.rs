use ulid::Ulid;

use crate::model::Span;

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// The new booking overlaps `booking_id` in the same room.
    Conflict { booking_id: Ulid, span: Span },
    /// Still referenced by live records (a user who owns bookings).
    InUse(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::Conflict { booking_id, span } => {
                write!(f, "conflict with booking {booking_id} ({span})")
            }
            EngineError::InUse(id) => write!(f, "still in use: {id}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
