use std::sync::Arc;

use ulid::Ulid;

use crate::model::*;
use crate::store::{ReservationStore, StoreError};

/// First active reservation in `reservations` whose dates overlap `range`.
/// Cancelled reservations never conflict.
pub fn first_overlap<'a>(reservations: &'a [Reservation], range: &DateRange) -> Option<&'a Reservation> {
    reservations
        .iter()
        .filter(|r| r.is_active())
        .find(|r| r.range.overlaps(range))
}

/// Read-only overlap test against a caravan's stored reservations.
///
/// Existence of the caravan is the caller's business: an unknown id has no
/// reservations and therefore never overlaps.
#[derive(Clone)]
pub struct ConflictChecker {
    store: Arc<dyn ReservationStore>,
}

impl ConflictChecker {
    pub fn new(store: Arc<dyn ReservationStore>) -> Self {
        Self { store }
    }

    pub async fn has_overlap(&self, resource_id: &Ulid, range: &DateRange) -> Result<bool, StoreError> {
        let existing = self.store.list_by_resource(resource_id).await?;
        Ok(first_overlap(&existing, range).is_some())
    }
}
