mod actions;
mod admins;
mod bookings;
mod capacity;
mod cities;
mod error;
mod profiles;
mod store;
#[cfg(test)]
mod tests;

pub use actions::BookingTarget;
pub use error::EngineError;
pub use profiles::ProfileUpdate;

use std::collections::HashSet;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, OwnedRwLockWriteGuard, RwLock, RwLockReadGuard};
use tracing::debug;
use uuid::Uuid;

use crate::model::*;
use crate::search::SearchCache;
use crate::wal::Wal;

pub type SharedCityState = Arc<RwLock<CityState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
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

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Drain every Append already queued behind it.
/// 3. One flush_sync for the whole batch, then answer every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_non_append(&mut wal, cmd);
            continue;
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

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        if let Err(e) = &result {
            tracing::error!("WAL flush failed for {} events: {e}", batch.len());
        }
        respond_batch(batch, &result);

        // Anything that arrived after the batch waits until the batch is durable.
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let appended = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so stale bytes never leak into the next batch.
    let flushed = wal.flush_sync();
    appended.and(flushed)
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

/// One tenant's booking state: cities (with their days and notices),
/// profiles and admin grants, all rebuilt from the WAL on startup.
pub struct Engine {
    pub(super) cities: DashMap<String, SharedCityState>,
    pub(super) profiles: DashMap<Uuid, Profile>,
    pub(super) admins: DashMap<Uuid, AdminRole>,
    /// Global admins configured for every tenant; never stored in the WAL.
    pub(super) root_admins: HashSet<Uuid>,
    pub(super) search: SearchCache,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Mutations hold it shared; compaction holds it exclusively while snapshotting.
    pub(super) write_gate: RwLock<()>,
}

impl Engine {
    pub fn new(wal_path: PathBuf, root_admins: HashSet<Uuid>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            cities: DashMap::new(),
            profiles: DashMap::new(),
            admins: DashMap::new(),
            root_admins,
            search: SearchCache::new(),
            wal_tx,
            write_gate: RwLock::new(()),
        };

        // Sole owner of every Arc here, so try_write never contends. Never use
        // blocking_write: this may run inside an async context (lazy tenant creation).
        for event in &events {
            match event.city() {
                Some(slug) if !matches!(event, Event::CityCreated { .. } | Event::CityDeleted { .. }) => {
                    if let Some(cs) = engine.get_city_state(slug) {
                        let mut guard = cs.try_write().expect("replay: uncontended write");
                        store::apply_to_city(&mut guard, event);
                    }
                }
                _ => engine.apply_global(event),
            }
        }
        debug!("replayed {} events", events.len());

        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// Entered first by every mutation, before any city lock.
    pub(super) async fn begin_write(&self) -> RwLockReadGuard<'_, ()> {
        self.write_gate.read().await
    }

    /// WAL-append then apply. `cs` is the already locked city the event targets.
    pub(super) async fn persist_and_apply(&self, cs: &mut CityState, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        store::apply_to_city(cs, event);
        Ok(())
    }

    /// WAL-append then apply an event that touches engine-level maps.
    pub(super) async fn persist_and_apply_global(&self, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.apply_global(event);
        Ok(())
    }

    pub fn get_city_state(&self, slug: &str) -> Option<SharedCityState> {
        self.cities.get(slug).map(|e| e.value().clone())
    }

    pub(super) fn city_state(&self, slug: &str) -> Result<SharedCityState, EngineError> {
        self.get_city_state(slug).ok_or_else(|| EngineError::city(slug))
    }

    /// Lock a city for writing. Fails if the city was deleted while we waited.
    pub(super) async fn city_write(&self, slug: &str) -> Result<OwnedRwLockWriteGuard<CityState>, EngineError> {
        let cs = self.city_state(slug)?;
        let guard = cs.clone().write_owned().await;
        match self.cities.get(slug) {
            Some(current) if Arc::ptr_eq(current.value(), &cs) => Ok(guard),
            _ => Err(EngineError::city(slug)),
        }
    }

    pub fn city_count(&self) -> usize {
        self.cities.len()
    }

    pub fn profile_count(&self) -> usize {
        self.profiles.len()
    }

    /// Compact the WAL by rewriting it with only the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _exclusive = self.write_gate.write().await;
        let events = self.snapshot_events().await;
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        debug!("compacted WAL to {count} events");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
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
