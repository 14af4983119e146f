//! nodepool-metrics — load intake and observability for the reconciler.
//!
//! # Architecture
//!
//! ```text
//! SampleRegistry (implements SampleSource)
//!   ├── push()          ← called by the REST API per reported sample
//!   └── latest_sample() → read by each pool driver once per tick
//!
//! ReconcilerMetrics
//!   ├── record_*()      ← called by the pool drivers
//!   └── snapshot()      → PoolMetricsSnapshot per pool
//!
//! Prometheus exposition
//!   └── render_prometheus() → text/plain for /metrics endpoint
//! ```

pub mod counters;
pub mod prometheus;
pub mod source;

pub use counters::{PoolMetricsSnapshot, ReconcilerMetrics};
pub use prometheus::render_prometheus;
pub use source::{BoxFuture, PushRejected, SampleRegistry, SampleSource};
