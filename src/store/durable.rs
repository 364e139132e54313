use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::{debug, warn};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

use super::{InMemoryStore, ReservationStore, ResourceDirectory, StoreError, UserDirectory};

// ── Group-commit journal channel ─────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the journal and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Drain every Append already queued behind it.
/// 3. One flush + fsync for the whole batch, then answer every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(crate::observability::JOURNAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::JOURNAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        respond_batch(batch, &result);

        // A compaction queued behind the batch must see the batch on disk first.
        if let Some(other) = deferred {
            handle_non_append(&mut wal, other);
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after a failed append so half-buffered bytes don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn respond_batch(batch: Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// Journal-backed store. Every mutation is appended and fsynced before it is
/// applied to the in-memory indexes, so a failed write leaves memory untouched.
pub struct DurableStore {
    memory: InMemoryStore,
    wal_tx: mpsc::Sender<WalCommand>,
    /// Serializes catalog writes so uniqueness checks and the append can't interleave.
    catalog_write: Mutex<()>,
    /// Mutations hold it shared; compaction holds it exclusive while it snapshots.
    commit_gate: RwLock<()>,
}

impl DurableStore {
    /// Replay the journal at `path` and start its writer task. Must run inside a tokio runtime.
    pub fn open(path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&path)?;
        let wal = Wal::open(&path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let memory = InMemoryStore::new();
        for event in &events {
            if let Err(e) = memory.apply_event(event) {
                warn!("journal replay skipped an event: {e}");
            }
        }
        debug!("replayed {} journal events from {}", events.len(), path.display());

        Ok(Self {
            memory,
            wal_tx,
            catalog_write: Mutex::new(()),
            commit_gate: RwLock::new(()),
        })
    }

    pub fn memory(&self) -> &InMemoryStore {
        &self.memory
    }

    async fn wal_append(&self, event: &Event) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| StoreError::Io("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Io("journal writer dropped response".into()))?
            .map_err(StoreError::from)
    }

    /// Append `event`, then apply it to memory.
    async fn commit(&self, event: Event) -> Result<(), StoreError> {
        let _gate = self.commit_gate.read().await;
        self.wal_append(&event).await?;
        self.memory.apply_event(&event)
    }

    /// Rewrite the journal as the smallest event list that rebuilds the current state.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let _gate = self.commit_gate.write().await;

        let mut events = Vec::new();
        events.extend(
            self.memory
                .users()
                .into_iter()
                .map(|user| Event::UserRegistered { user }),
        );
        events.extend(
            self.memory
                .resources()
                .into_iter()
                .map(|resource| Event::ResourceCreated { resource }),
        );
        events.extend(
            self.memory
                .all_reservations()
                .into_iter()
                .map(|reservation| Event::ReservationCreated { reservation }),
        );

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| StoreError::Io("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Io("journal writer dropped response".into()))?
            .map_err(StoreError::from)
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

#[async_trait]
impl ResourceDirectory for DurableStore {
    async fn get(&self, id: &Ulid) -> Result<Option<Resource>, StoreError> {
        Ok(self.memory.get_resource(id))
    }

    async fn list_all(&self) -> Result<Vec<Resource>, StoreError> {
        Ok(self.memory.resources())
    }

    async fn insert(&self, resource: Resource) -> Result<(), StoreError> {
        let _w = self.catalog_write.lock().await;
        self.memory.check_resource_insert(&resource)?;
        self.commit(Event::ResourceCreated { resource }).await
    }
}

#[async_trait]
impl UserDirectory for DurableStore {
    async fn get(&self, id: &Ulid) -> Result<Option<User>, StoreError> {
        Ok(self.memory.get_user(id))
    }

    async fn find_by_contact(&self, contact: &str) -> Result<Option<User>, StoreError> {
        Ok(self.memory.find_user_by_contact(contact))
    }

    async fn list_all(&self) -> Result<Vec<User>, StoreError> {
        Ok(self.memory.users())
    }

    async fn insert(&self, user: User) -> Result<(), StoreError> {
        let _w = self.catalog_write.lock().await;
        self.memory.check_user_insert(&user)?;
        self.commit(Event::UserRegistered { user }).await
    }
}

#[async_trait]
impl ReservationStore for DurableStore {
    async fn insert(&self, reservation: Reservation) -> Result<(), StoreError> {
        self.memory.check_reservation_insert(&reservation)?;
        self.commit(Event::ReservationCreated { reservation }).await
    }

    async fn get(&self, id: &Ulid) -> Result<Option<Reservation>, StoreError> {
        Ok(self.memory.get_reservation(id))
    }

    async fn list_by_resource(&self, resource_id: &Ulid) -> Result<Vec<Reservation>, StoreError> {
        Ok(self.memory.reservations_for(resource_id))
    }

    async fn set_status(&self, id: &Ulid, status: ReservationStatus) -> Result<Reservation, StoreError> {
        let current = self.memory.get_reservation(id).ok_or(StoreError::NotFound(*id))?;
        self.commit(Event::ReservationStatusChanged {
            id: *id,
            resource_id: current.resource_id,
            status,
        })
        .await?;
        self.memory.get_reservation(id).ok_or(StoreError::NotFound(*id))
    }
}
