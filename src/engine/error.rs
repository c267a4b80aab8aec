use ulid::Ulid;

use crate::model::SlotConflict;

#[derive(Debug)]
pub enum EngineError {
    /// Malformed input, caught before any write. Names the offending field.
    Validation {
        field: &'static str,
        reason: &'static str,
    },
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// Block revocation attempted by someone who does not own the studio.
    NotOwner(Ulid),
    /// Block admission over confirmed bookings. The operator must cancel
    /// those bookings first; they are never cancelled automatically.
    Conflict {
        count: usize,
        bookings: Vec<SlotConflict>,
    },
    LimitExceeded(&'static str),
    /// Store-layer failure. Surfaced as-is; the engine never retries.
    Wal(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation { field, reason } => {
                write!(f, "invalid {field}: {reason}")
            }
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::NotOwner(id) => write!(f, "not owned by requester: {id}"),
            EngineError::Conflict { count, .. } => {
                write!(f, "{count} confirmed booking(s) in the requested interval")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Wal(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl EngineError {
    pub fn validation(field: &'static str, reason: &'static str) -> Self {
        EngineError::Validation { field, reason }
    }
}
