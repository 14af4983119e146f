//! redb table definitions for the checkpoint store.

use redb::TableDefinition;

/// Latest `PoolCheckpoint` keyed by `{pool_id}`.
pub const POOL_STATES: TableDefinition<&str, &[u8]> = TableDefinition::new("pool_states");

/// `ScaleEvent` history keyed by `{pool_id}:{at:020}:{seq:020}`.
pub const SCALE_EVENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("scale_events");
