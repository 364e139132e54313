mod booking;
mod conflict;
mod error;
mod lifecycle;
mod queries;
#[cfg(test)]
mod tests;

pub use booking::total_price;
pub use conflict::{first_overlap, ConflictChecker};
pub use error::EngineError;
pub use lifecycle::{Action, Transition};

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use ulid::Ulid;

use crate::store::{InMemoryStore, ReservationStore, ResourceDirectory, UserDirectory};

/// Admits and cancels reservations.
///
/// Every read-check-write sequence on a caravan runs under that caravan's
/// lock, so two requests for the same caravan are serialized while requests
/// for different caravans proceed independently.
pub struct BookingEngine {
    resources: Arc<dyn ResourceDirectory>,
    users: Arc<dyn UserDirectory>,
    reservations: Arc<dyn ReservationStore>,
    checker: ConflictChecker,
    /// Caravan id → admission lock. Entries are never removed; caravans aren't deleted.
    locks: DashMap<Ulid, Arc<Mutex<()>>>,
}

impl BookingEngine {
    pub fn new(
        resources: Arc<dyn ResourceDirectory>,
        users: Arc<dyn UserDirectory>,
        reservations: Arc<dyn ReservationStore>,
    ) -> Self {
        Self {
            resources,
            users,
            checker: ConflictChecker::new(reservations.clone()),
            reservations,
            locks: DashMap::new(),
        }
    }

    /// Wire all three repositories to one store.
    pub fn with_store<S>(store: Arc<S>) -> Self
    where
        S: ResourceDirectory + UserDirectory + ReservationStore + 'static,
    {
        Self::new(store.clone(), store.clone(), store)
    }

    pub fn in_memory() -> (Self, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        (Self::with_store(store.clone()), store)
    }

    /// Wait for the caravan's lock. Dropping the future while waiting has no effect.
    pub(super) async fn lock_resource(&self, resource_id: Ulid) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(resource_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();
        lock.lock_owned().await
    }
}
