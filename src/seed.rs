use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;
use ulid::Ulid;

use crate::engine::{BookingEngine, EngineError};
use crate::model::*;

/// Starting catalog for an empty store. Caravans name their host by contact,
/// so a hand-written file needs no ids.
///
/// ```json
/// {
///   "users": [{ "name": "Host Alice", "contact": "host@example.com", "role": "host" }],
///   "caravans": [{ "host": "host@example.com", "name": "Modern Explorer",
///                  "location": "Seoul", "capacity": 2, "daily_rate": "120000" }]
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedCatalog {
    #[serde(default)]
    pub users: Vec<SeedUser>,
    #[serde(default)]
    pub caravans: Vec<SeedCaravan>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedUser {
    pub name: String,
    pub contact: String,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedCaravan {
    /// Contact of the hosting user.
    pub host: String,
    pub name: String,
    pub location: String,
    pub capacity: u32,
    pub daily_rate: Decimal,
    #[serde(default)]
    pub amenities: Vec<String>,
}

impl Default for SeedCatalog {
    fn default() -> Self {
        let caravan = |name: &str, location: &str, capacity: u32, rate: i64| SeedCaravan {
            host: "host@example.com".into(),
            name: name.into(),
            location: location.into(),
            capacity,
            daily_rate: Decimal::from(rate),
            amenities: Vec::new(),
        };
        Self {
            users: vec![
                SeedUser {
                    name: "Host Alice".into(),
                    contact: "host@example.com".into(),
                    role: Role::Host,
                },
                SeedUser {
                    name: "Guest Bob".into(),
                    contact: "guest@example.com".into(),
                    role: Role::Guest,
                },
            ],
            caravans: vec![
                caravan("Modern Explorer", "Seoul", 2, 120_000),
                caravan("Family Voyager", "Busan", 6, 180_000),
                caravan("Retro Adventurer", "Incheon", 3, 95_000),
                caravan("Offroad Beast", "Jeju", 4, 250_000),
            ],
        }
    }
}

pub fn load_catalog(path: &Path) -> io::Result<SeedCatalog> {
    let reader = BufReader::new(File::open(path)?);
    serde_json::from_reader(reader).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Register the catalog if the store holds no users and no caravans.
/// Returns how many records were written.
pub async fn seed_if_empty(engine: &BookingEngine, catalog: &SeedCatalog) -> Result<usize, EngineError> {
    if !engine.list_users().await?.is_empty() || !engine.list_resources().await?.is_empty() {
        tracing::debug!("store already populated, skipping seed");
        return Ok(0);
    }

    let mut hosts: HashMap<String, Ulid> = HashMap::new();
    for seed in &catalog.users {
        let user = engine
            .register_user(User {
                id: Ulid::new(),
                name: seed.name.clone(),
                contact: seed.contact.clone(),
                role: seed.role,
            })
            .await?;
        hosts.insert(user.contact.trim().to_lowercase(), user.id);
    }

    for seed in &catalog.caravans {
        let host_id = *hosts
            .get(&seed.host.trim().to_lowercase())
            .ok_or(EngineError::InvalidResource("seed caravan names an unknown host"))?;
        engine
            .register_resource(Resource {
                id: Ulid::new(),
                host_id,
                name: seed.name.clone(),
                location: seed.location.clone(),
                capacity: seed.capacity,
                daily_rate: seed.daily_rate,
                amenities: seed.amenities.clone(),
            })
            .await?;
    }

    let written = catalog.users.len() + catalog.caravans.len();
    info!(
        "seeded {} users and {} caravans",
        catalog.users.len(),
        catalog.caravans.len()
    );
    Ok(written)
}
