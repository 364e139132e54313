use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;
use crate::store::ReservationStore;

use super::lifecycle::{Action, Transition};
use super::{BookingEngine, ConflictChecker, EngineError};

/// `daily_rate × nights`, nights counting both endpoints.
pub fn total_price(daily_rate: Decimal, range: &DateRange) -> Result<Decimal, EngineError> {
    daily_rate
        .checked_mul(Decimal::from(range.nights()))
        .ok_or(EngineError::LimitExceeded("total price out of range"))
}

impl BookingEngine {
    /// Validate, conflict-check and persist a new reservation.
    ///
    /// Checks run in a fixed order and the first failure wins: date range,
    /// caravan, guest, then overlap with the caravan's active reservations.
    pub async fn create_reservation(
        &self,
        guest_id: Ulid,
        resource_id: Ulid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Reservation, EngineError> {
        let result = self.try_create(guest_id, resource_id, start, end).await;
        metrics::counter!(
            observability::RESERVATIONS_TOTAL,
            "outcome" => observability::outcome_label(&result)
        )
        .increment(1);
        match &result {
            Ok(r) => info!(
                "reservation {} admitted on caravan {resource_id} for {} ({} nights, total {})",
                r.id,
                r.range,
                r.nights(),
                r.total_price
            ),
            Err(e) if e.is_rejection() => debug!("reservation on caravan {resource_id} rejected: {e}"),
            Err(e) => tracing::error!("reservation on caravan {resource_id} failed: {e}"),
        }
        result
    }

    async fn try_create(
        &self,
        guest_id: Ulid,
        resource_id: Ulid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Reservation, EngineError> {
        let range = DateRange::try_new(start, end).ok_or(EngineError::InvalidDateRange { start, end })?;
        if range.nights() > MAX_STAY_NIGHTS {
            return Err(EngineError::LimitExceeded("stay too long"));
        }

        let resource = self
            .resources
            .get(&resource_id)
            .await?
            .ok_or(EngineError::ResourceNotFound(resource_id))?;

        match self.users.get(&guest_id).await? {
            Some(user) if user.role == Role::Guest => {}
            _ => return Err(EngineError::GuestNotFound(guest_id)),
        }

        let candidate = Reservation {
            id: Ulid::new(),
            guest_id,
            resource_id,
            range,
            status: ReservationStatus::Active,
            total_price: total_price(resource.daily_rate, &range)?,
            created_at: now_ms(),
        };

        let guard = self.lock_resource(resource_id).await;
        // Once the lock is held the admission runs to completion even if the caller stops waiting.
        tokio::spawn(admit(self.checker.clone(), self.reservations.clone(), candidate, guard))
            .await
            .map_err(|e| EngineError::Storage(format!("admission task failed: {e}")))?
    }

    /// Move a reservation to Cancelled. Already-cancelled reservations come back unchanged.
    pub async fn cancel_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let current = self
            .reservations
            .get(&id)
            .await?
            .ok_or(EngineError::ReservationNotFound(id))?;
        if current.status.apply(Action::Cancel) == Transition::Unchanged {
            debug!("reservation {id} already cancelled");
            return Ok(current);
        }

        let guard = self.lock_resource(current.resource_id).await;
        let cancelled = tokio::spawn(apply_cancel(self.reservations.clone(), id, guard))
            .await
            .map_err(|e| EngineError::Storage(format!("cancellation task failed: {e}")))??;
        metrics::counter!(observability::CANCELLATIONS_TOTAL).increment(1);
        info!("reservation {id} on caravan {} cancelled", cancelled.resource_id);
        Ok(cancelled)
    }

    // ── Catalog ──────────────────────────────────────────────

    /// Add a caravan to the catalog. The host must exist and hold the host role.
    pub async fn register_resource(&self, resource: Resource) -> Result<Resource, EngineError> {
        if resource.name.trim().is_empty() {
            return Err(EngineError::InvalidResource("name is required"));
        }
        if resource.name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("caravan name too long"));
        }
        if resource.location.len() > MAX_LOCATION_LEN {
            return Err(EngineError::LimitExceeded("location too long"));
        }
        if resource.amenities.len() > MAX_AMENITIES {
            return Err(EngineError::LimitExceeded("too many amenities"));
        }
        if resource.capacity == 0 {
            return Err(EngineError::InvalidResource("capacity must be positive"));
        }
        if resource.daily_rate <= Decimal::ZERO {
            return Err(EngineError::InvalidResource("daily rate must be positive"));
        }
        match self.users.get(&resource.host_id).await? {
            Some(user) if user.role == Role::Host => {}
            _ => return Err(EngineError::HostNotFound(resource.host_id)),
        }

        let resources = self.resources.clone();
        let record = resource.clone();
        // Runs detached so a dropped caller can't leave a journaled record out of memory.
        tokio::spawn(async move { resources.insert(record).await })
            .await
            .map_err(|e| EngineError::Storage(format!("catalog write task failed: {e}")))??;
        info!("caravan {} ({}) registered by host {}", resource.id, resource.name, resource.host_id);
        Ok(resource)
    }

    /// Add a user. Contacts are unique, compared case-insensitively.
    pub async fn register_user(&self, user: User) -> Result<User, EngineError> {
        if user.name.trim().is_empty() {
            return Err(EngineError::InvalidUser("name is required"));
        }
        if user.contact.trim().is_empty() {
            return Err(EngineError::InvalidUser("contact is required"));
        }
        if user.name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("user name too long"));
        }
        if user.contact.len() > MAX_CONTACT_LEN {
            return Err(EngineError::LimitExceeded("contact too long"));
        }

        let users = self.users.clone();
        let record = user.clone();
        tokio::spawn(async move { users.insert(record).await })
            .await
            .map_err(|e| EngineError::Storage(format!("catalog write task failed: {e}")))??;
        info!("user {} registered as {}", user.id, user.role.as_str());
        Ok(user)
    }
}

async fn admit(
    checker: ConflictChecker,
    store: Arc<dyn ReservationStore>,
    candidate: Reservation,
    _guard: OwnedMutexGuard<()>,
) -> Result<Reservation, EngineError> {
    let started = Instant::now();
    if checker.has_overlap(&candidate.resource_id, &candidate.range).await? {
        return Err(EngineError::DateConflict {
            resource_id: candidate.resource_id,
            requested: candidate.range,
        });
    }
    store.insert(candidate.clone()).await?;
    metrics::histogram!(observability::ADMISSION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
    Ok(candidate)
}

async fn apply_cancel(
    store: Arc<dyn ReservationStore>,
    id: Ulid,
    _guard: OwnedMutexGuard<()>,
) -> Result<Reservation, EngineError> {
    let current = store.get(&id).await?.ok_or(EngineError::ReservationNotFound(id))?;
    match current.status.apply(Action::Cancel) {
        Transition::Unchanged => Ok(current),
        Transition::To(next) => Ok(store.set_status(&id, next).await?),
    }
}
