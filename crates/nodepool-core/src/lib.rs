//! nodepool-core — shared vocabulary for the capacity reconciler.
//!
//! Holds the domain types exchanged between the reconciler, the checkpoint
//! store, the metrics registry and the daemon, plus `nodepool.toml` parsing
//! and startup validation.

pub mod config;
pub mod duration;
pub mod error;
pub mod types;

pub use config::{ExecutorSettings, NodepoolConfig, ReconcilerTuning, Settings};
pub use duration::parse_duration;
pub use error::ConfigError;
pub use types::*;
