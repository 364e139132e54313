use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use ulid::Ulid;

use crate::model::*;

use super::{ReservationStore, ResourceDirectory, StoreError, UserDirectory};

pub struct InMemoryStore {
    resources: DashMap<Ulid, Resource>,
    users: DashMap<Ulid, User>,
    /// Normalized contact → user id.
    contacts: DashMap<String, Ulid>,
    reservations: DashMap<Ulid, Reservation>,
    /// Caravan id → reservation ids, in insertion order.
    by_resource: DashMap<Ulid, Vec<Ulid>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn contact_key(contact: &str) -> String {
    contact.trim().to_lowercase()
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            resources: DashMap::new(),
            users: DashMap::new(),
            contacts: DashMap::new(),
            reservations: DashMap::new(),
            by_resource: DashMap::new(),
        }
    }

    // ── Resources ────────────────────────────────────────────

    pub fn get_resource(&self, id: &Ulid) -> Option<Resource> {
        self.resources.get(id).map(|e| e.value().clone())
    }

    pub fn resources(&self) -> Vec<Resource> {
        let mut all: Vec<Resource> = self.resources.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|r| r.id);
        all
    }

    pub fn check_resource_insert(&self, resource: &Resource) -> Result<(), StoreError> {
        if self.resources.contains_key(&resource.id) {
            return Err(StoreError::Duplicate(resource.id.to_string()));
        }
        Ok(())
    }

    pub fn insert_resource(&self, resource: Resource) -> Result<(), StoreError> {
        match self.resources.entry(resource.id) {
            Entry::Occupied(_) => Err(StoreError::Duplicate(resource.id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(resource);
                Ok(())
            }
        }
    }

    // ── Users ────────────────────────────────────────────────

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn get_user(&self, id: &Ulid) -> Option<User> {
        self.users.get(id).map(|e| e.value().clone())
    }

    pub fn find_user_by_contact(&self, contact: &str) -> Option<User> {
        let id = *self.contacts.get(&contact_key(contact))?.value();
        self.get_user(&id)
    }

    pub fn users(&self) -> Vec<User> {
        let mut all: Vec<User> = self.users.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|u| u.id);
        all
    }

    pub fn check_user_insert(&self, user: &User) -> Result<(), StoreError> {
        if self.users.contains_key(&user.id) {
            return Err(StoreError::Duplicate(user.id.to_string()));
        }
        if self.contacts.contains_key(&contact_key(&user.contact)) {
            return Err(StoreError::Duplicate(user.contact.clone()));
        }
        Ok(())
    }

    /// The id slot stays locked until the contact is claimed, so a rejected
    /// insert never leaves a stray contact behind.
    pub fn insert_user(&self, user: User) -> Result<(), StoreError> {
        let slot = match self.users.entry(user.id) {
            Entry::Occupied(_) => return Err(StoreError::Duplicate(user.id.to_string())),
            Entry::Vacant(slot) => slot,
        };
        match self.contacts.entry(contact_key(&user.contact)) {
            Entry::Occupied(_) => Err(StoreError::Duplicate(user.contact.clone())),
            Entry::Vacant(contact) => {
                contact.insert(user.id);
                slot.insert(user);
                Ok(())
            }
        }
    }

    // ── Reservations ─────────────────────────────────────────

    pub fn get_reservation(&self, id: &Ulid) -> Option<Reservation> {
        self.reservations.get(id).map(|e| e.value().clone())
    }

    pub fn reservation_count(&self, resource_id: &Ulid) -> usize {
        self.by_resource
            .get(resource_id)
            .map(|ids| ids.len())
            .unwrap_or(0)
    }

    pub fn reservations_for(&self, resource_id: &Ulid) -> Vec<Reservation> {
        let ids = self
            .by_resource
            .get(resource_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        let mut found: Vec<Reservation> = ids
            .iter()
            .filter_map(|id| self.get_reservation(id))
            .collect();
        found.sort_by_key(|r| (r.range.start, r.id));
        found
    }

    /// Every reservation in the store. Used to rebuild a compact journal.
    pub fn all_reservations(&self) -> Vec<Reservation> {
        let mut all: Vec<Reservation> = self.reservations.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|r| r.id);
        all
    }

    pub fn check_reservation_insert(&self, reservation: &Reservation) -> Result<(), StoreError> {
        if self.reservations.contains_key(&reservation.id) {
            return Err(StoreError::Duplicate(reservation.id.to_string()));
        }
        Ok(())
    }

    pub fn insert_reservation(&self, reservation: Reservation) -> Result<(), StoreError> {
        let (id, resource_id) = (reservation.id, reservation.resource_id);
        match self.reservations.entry(id) {
            Entry::Occupied(_) => return Err(StoreError::Duplicate(id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(reservation);
            }
        }
        self.by_resource.entry(resource_id).or_default().push(id);
        Ok(())
    }

    pub fn update_status(&self, id: &Ulid, status: ReservationStatus) -> Result<Reservation, StoreError> {
        let mut entry = self.reservations.get_mut(id).ok_or(StoreError::NotFound(*id))?;
        entry.status = status;
        Ok(entry.value().clone())
    }

    // ── Event application ────────────────────────────────────

    pub fn apply_event(&self, event: &Event) -> Result<(), StoreError> {
        match event {
            Event::ResourceCreated { resource } => self.insert_resource(resource.clone()),
            Event::UserRegistered { user } => self.insert_user(user.clone()),
            Event::ReservationCreated { reservation } => self.insert_reservation(reservation.clone()),
            Event::ReservationStatusChanged { id, status, .. } => {
                self.update_status(id, *status).map(|_| ())
            }
        }
    }
}

#[async_trait]
impl ResourceDirectory for InMemoryStore {
    async fn get(&self, id: &Ulid) -> Result<Option<Resource>, StoreError> {
        Ok(self.get_resource(id))
    }

    async fn list_all(&self) -> Result<Vec<Resource>, StoreError> {
        Ok(self.resources())
    }

    async fn insert(&self, resource: Resource) -> Result<(), StoreError> {
        self.insert_resource(resource)
    }
}

#[async_trait]
impl UserDirectory for InMemoryStore {
    async fn get(&self, id: &Ulid) -> Result<Option<User>, StoreError> {
        Ok(self.get_user(id))
    }

    async fn find_by_contact(&self, contact: &str) -> Result<Option<User>, StoreError> {
        Ok(self.find_user_by_contact(contact))
    }

    async fn list_all(&self) -> Result<Vec<User>, StoreError> {
        Ok(self.users())
    }

    async fn insert(&self, user: User) -> Result<(), StoreError> {
        self.insert_user(user)
    }
}

#[async_trait]
impl ReservationStore for InMemoryStore {
    async fn insert(&self, reservation: Reservation) -> Result<(), StoreError> {
        self.insert_reservation(reservation)
    }

    async fn get(&self, id: &Ulid) -> Result<Option<Reservation>, StoreError> {
        Ok(self.get_reservation(id))
    }

    async fn list_by_resource(&self, resource_id: &Ulid) -> Result<Vec<Reservation>, StoreError> {
        Ok(self.reservations_for(resource_id))
    }

    async fn set_status(&self, id: &Ulid, status: ReservationStatus) -> Result<Reservation, StoreError> {
        self.update_status(id, status)
    }
}
