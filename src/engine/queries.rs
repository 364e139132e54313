use ulid::Ulid;

use crate::model::*;

use super::{BookingEngine, EngineError};

impl BookingEngine {
    pub async fn get_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        self.reservations
            .get(&id)
            .await?
            .ok_or(EngineError::ReservationNotFound(id))
    }

    /// Every reservation on a caravan, cancelled ones included, ordered by start date.
    pub async fn list_reservations(&self, resource_id: Ulid) -> Result<Vec<Reservation>, EngineError> {
        if self.resources.get(&resource_id).await?.is_none() {
            return Err(EngineError::ResourceNotFound(resource_id));
        }
        Ok(self.reservations.list_by_resource(&resource_id).await?)
    }

    pub async fn get_resource(&self, id: Ulid) -> Result<Resource, EngineError> {
        self.resources
            .get(&id)
            .await?
            .ok_or(EngineError::ResourceNotFound(id))
    }

    pub async fn list_resources(&self) -> Result<Vec<Resource>, EngineError> {
        Ok(self.resources.list_all().await?)
    }

    pub async fn get_user(&self, id: Ulid) -> Result<Option<User>, EngineError> {
        Ok(self.users.get(&id).await?)
    }

    pub async fn list_users(&self) -> Result<Vec<User>, EngineError> {
        Ok(self.users.list_all().await?)
    }

    pub async fn find_user_by_contact(&self, contact: &str) -> Result<Option<User>, EngineError> {
        Ok(self.users.find_by_contact(contact).await?)
    }
}
