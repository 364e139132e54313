mod durable;
mod memory;

pub use durable::DurableStore;
pub use memory::InMemoryStore;

use async_trait::async_trait;
use ulid::Ulid;

use crate::model::*;

#[derive(Debug)]
pub enum StoreError {
    NotFound(Ulid),
    /// A record with this key already exists (id, or a unique field such as a contact).
    Duplicate(String),
    Io(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound(id) => write!(f, "record not found: {id}"),
            StoreError::Duplicate(key) => write!(f, "duplicate key: {key}"),
            StoreError::Io(e) => write!(f, "storage error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}

/// Caravan catalog.
#[async_trait]
pub trait ResourceDirectory: Send + Sync {
    async fn get(&self, id: &Ulid) -> Result<Option<Resource>, StoreError>;
    async fn list_all(&self) -> Result<Vec<Resource>, StoreError>;
    async fn insert(&self, resource: Resource) -> Result<(), StoreError>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get(&self, id: &Ulid) -> Result<Option<User>, StoreError>;
    async fn find_by_contact(&self, contact: &str) -> Result<Option<User>, StoreError>;
    async fn list_all(&self) -> Result<Vec<User>, StoreError>;
    async fn insert(&self, user: User) -> Result<(), StoreError>;
}

#[async_trait]
pub trait ReservationStore: Send + Sync {
    async fn insert(&self, reservation: Reservation) -> Result<(), StoreError>;
    async fn get(&self, id: &Ulid) -> Result<Option<Reservation>, StoreError>;
    /// All reservations for a caravan, any status, ordered by start date.
    async fn list_by_resource(&self, resource_id: &Ulid) -> Result<Vec<Reservation>, StoreError>;
    async fn set_status(&self, id: &Ulid, status: ReservationStatus) -> Result<Reservation, StoreError>;
}
