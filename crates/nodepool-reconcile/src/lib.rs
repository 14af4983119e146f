//! nodepool-reconcile — the capacity reconciler.
//!
//! Keeps a worker pool's size converged on the load it is carrying,
//! within `[min_size, max_size]`.
//!
//! # Decision Algorithm
//!
//! ```text
//! if pending_delta != 0:            hold (one in-flight operation per pool)
//! if sample stale or malformed:     hold + signal
//!
//! target = ceil(current * utilization / target_utilization)
//!        + ceil(pending_work_units / assumed_node_capacity)
//! target = clamp(target, min_size, max_size)
//!
//! if target > current:              // checked first: availability wins
//!     circuit open?   hold
//!     up cooldown?    hold
//!     Up(target - current)
//!
//! if target < current:
//!     down cooldown?  hold
//!     utilization below target * (1 - margin) for a whole
//!     scale-down cooldown?  else hold
//!     Down(current - target)
//! ```
//!
//! `evaluate` and `record_scale_result` are pure functions over an explicit
//! `PoolState` value. `PoolReconciler` wraps them in a per-pool tick loop
//! that pulls samples, drives the executor under a timeout and checkpoints
//! state.

pub mod clock;
pub mod decision;
pub mod driver;
pub mod outcome;

pub use clock::{Clock, ManualClock, SystemClock};
pub use decision::{Evaluation, evaluate};
pub use driver::{PoolReconciler, ScaleExecutor, ScaleRequest, TickReport};
pub use outcome::{Recorded, backoff_secs, record_scale_result};
