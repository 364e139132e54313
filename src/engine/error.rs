use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::DateRange;
use crate::store::StoreError;

#[derive(Debug)]
pub enum EngineError {
    InvalidDateRange {
        start: NaiveDate,
        end: NaiveDate,
    },
    ResourceNotFound(Ulid),
    /// The id doesn't resolve, or resolves to a user who isn't a guest.
    GuestNotFound(Ulid),
    /// Carries only the caller's own request, never the other reservation's id or guest.
    DateConflict {
        resource_id: Ulid,
        requested: DateRange,
    },
    ReservationNotFound(Ulid),
    HostNotFound(Ulid),
    InvalidResource(&'static str),
    InvalidUser(&'static str),
    Duplicate(String),
    LimitExceeded(&'static str),
    /// Anything the caller can't fix: journal failures, broken invariants, crashed tasks.
    Storage(String),
}

impl EngineError {
    /// True for the booking rejections a caller can correct by changing the request.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, EngineError::Storage(_))
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidDateRange { start, end } => {
                write!(f, "invalid date range: start {start} is after end {end}")
            }
            EngineError::ResourceNotFound(id) => write!(f, "caravan not found: {id}"),
            EngineError::GuestNotFound(id) => write!(f, "guest not found: {id}"),
            EngineError::DateConflict { resource_id, requested } => write!(
                f,
                "caravan {resource_id} already has an active reservation overlapping {requested}"
            ),
            EngineError::ReservationNotFound(id) => write!(f, "reservation not found: {id}"),
            EngineError::HostNotFound(id) => write!(f, "host not found: {id}"),
            EngineError::InvalidResource(msg) => write!(f, "invalid caravan: {msg}"),
            EngineError::InvalidUser(msg) => write!(f, "invalid user: {msg}"),
            EngineError::Duplicate(key) => write!(f, "already exists: {key}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Storage(e) => write!(f, "storage error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Duplicate(key) => EngineError::Duplicate(key),
            other => EngineError::Storage(other.to_string()),
        }
    }
}
