//! nodepool-state — checkpoint store for the capacity reconciler.
//!
//! Backed by [redb](https://docs.rs/redb). Keeps the last `PoolState` of
//! every pool so cooldown stamps, the failure counter and the circuit
//! window survive a restart, plus a bounded history of scale events.
//!
//! Values are JSON-serialized into redb's `&[u8]` columns. Event keys are
//! `{pool_id}:{at:020}:{seq:020}` so a prefix scan yields one pool's events
//! in chronological order.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and is shared between the pool drivers and the API.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
