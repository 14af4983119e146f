//! Persisted records.

use serde::{Deserialize, Serialize};

use nodepool_core::{Outcome, PoolId, PoolState, ScaleIntent, Timestamp};

/// Last known reconciler state of a pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolCheckpoint {
    pub pool_id: PoolId,
    pub state: PoolState,
    pub saved_at: Timestamp,
}

/// One executor attempt and what came of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleEvent {
    pub pool_id: PoolId,
    /// When the intent was issued.
    pub at: Timestamp,
    pub intent: ScaleIntent,
    pub from_size: u32,
    pub target_size: u32,
    pub outcome: Outcome,
}

impl ScaleEvent {
    pub(crate) fn key_prefix(pool_id: &str) -> String {
        format!("{pool_id}:")
    }

    pub(crate) fn table_key(&self, seq: u64) -> String {
        format!("{}:{:020}:{:020}", self.pool_id, self.at, seq)
    }

    pub(crate) fn seq_from_key(key: &str) -> Option<u64> {
        key.rsplit(':').next()?.parse().ok()
    }
}
