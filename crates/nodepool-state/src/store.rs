//! redb-backed checkpoints and scale history.
//!
//! Supports both on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use nodepool_core::{PoolState, Timestamp};

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Events kept per pool unless overridden.
pub const DEFAULT_EVENT_RETENTION: usize = 256;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe checkpoint store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
    /// Tie-breaker for events recorded within the same second.
    event_seq: Arc<AtomicU64>,
    event_retention: usize,
}

impl StateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self::from_database(db);
        store.ensure_tables()?;
        store.seed_event_seq()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self::from_database(db);
        store.ensure_tables()?;
        store.seed_event_seq()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Keep at most `retention` events per pool.
    pub fn with_event_retention(mut self, retention: usize) -> Self {
        self.event_retention = retention.max(1);
        self
    }

    fn from_database(db: Database) -> Self {
        Self {
            db: Arc::new(db),
            event_seq: Arc::new(AtomicU64::new(0)),
            event_retention: DEFAULT_EVENT_RETENTION,
        }
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(POOL_STATES).map_err(map_err!(Table))?;
        txn.open_table(SCALE_EVENTS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Continue the event sequence after the highest one already stored,
    /// so events written after a restart never reuse a key.
    fn seed_event_seq(&self) -> StateResult<()> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SCALE_EVENTS).map_err(map_err!(Table))?;
        let mut next = 0;
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, _) = entry.map_err(map_err!(Read))?;
            if let Some(seq) = ScaleEvent::seq_from_key(key.value()) {
                next = next.max(seq + 1);
            }
        }
        self.event_seq.store(next, Ordering::Relaxed);
        Ok(())
    }

    // ── Checkpoints ────────────────────────────────────────────────

    /// Insert or replace the checkpoint for a pool.
    pub fn put_pool_state(
        &self,
        pool_id: &str,
        state: &PoolState,
        saved_at: Timestamp,
    ) -> StateResult<()> {
        let checkpoint = PoolCheckpoint {
            pool_id: pool_id.to_string(),
            state: state.clone(),
            saved_at,
        };
        let value = serde_json::to_vec(&checkpoint).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(POOL_STATES).map_err(map_err!(Table))?;
            table
                .insert(pool_id, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(pool = %pool_id, "pool state checkpointed");
        Ok(())
    }

    /// Get the checkpoint for a pool.
    pub fn get_pool_state(&self, pool_id: &str) -> StateResult<Option<PoolCheckpoint>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(POOL_STATES).map_err(map_err!(Table))?;
        match table.get(pool_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let checkpoint: PoolCheckpoint =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(checkpoint))
            }
            None => Ok(None),
        }
    }

    /// List every stored checkpoint.
    pub fn list_pool_states(&self) -> StateResult<Vec<PoolCheckpoint>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(POOL_STATES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let checkpoint: PoolCheckpoint =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(checkpoint);
        }
        Ok(results)
    }

    /// Delete a pool's checkpoint. Returns true if it existed.
    pub fn delete_pool_state(&self, pool_id: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(POOL_STATES).map_err(map_err!(Table))?;
            existed = table.remove(pool_id).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(pool = %pool_id, existed, "pool state deleted");
        Ok(existed)
    }

    // ── Scale events ───────────────────────────────────────────────

    /// Append a scale event, dropping the oldest events of that pool
    /// beyond the retention limit.
    pub fn append_event(&self, event: &ScaleEvent) -> StateResult<()> {
        let seq = self.event_seq.fetch_add(1, Ordering::Relaxed);
        let key = event.table_key(seq);
        let prefix = ScaleEvent::key_prefix(&event.pool_id);
        let value = serde_json::to_vec(event).map_err(map_err!(Serialize))?;

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let pruned;
        {
            let mut table = txn.open_table(SCALE_EVENTS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;

            let mut keys = Vec::new();
            for entry in table.iter().map_err(map_err!(Read))? {
                let (k, _) = entry.map_err(map_err!(Read))?;
                let k = k.value();
                if k.starts_with(&prefix) {
                    keys.push(k.to_string());
                }
            }
            // Keys sort chronologically, so the excess sits at the front.
            let excess = keys.len().saturating_sub(self.event_retention);
            for k in &keys[..excess] {
                table.remove(k.as_str()).map_err(map_err!(Write))?;
            }
            pruned = excess;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(pool = %event.pool_id, %key, pruned, "scale event recorded");
        Ok(())
    }

    /// The most recent `limit` events of a pool, oldest first.
    pub fn list_events(&self, pool_id: &str, limit: usize) -> StateResult<Vec<ScaleEvent>> {
        let prefix = ScaleEvent::key_prefix(pool_id);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SCALE_EVENTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let event: ScaleEvent =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(event);
            }
        }
        let skip = results.len().saturating_sub(limit);
        Ok(results.split_off(skip))
    }
}
