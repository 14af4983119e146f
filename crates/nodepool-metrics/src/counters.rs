//! Per-pool reconciler counters and gauges.
//!
//! Counters are atomics so pool drivers never contend with each other;
//! the pool map itself sits behind an async `RwLock` and is only written
//! when a pool registers.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::debug;

use nodepool_core::{Direction, PoolId, PoolState, ScaleIntent, ScaleReason, Signal, Timestamp};

/// Per-pool metrics bucket.
#[derive(Default)]
struct PoolCounters {
    ticks: AtomicU64,
    scale_up_intents: AtomicU64,
    scale_down_intents: AtomicU64,
    holds: AtomicU64,
    cooldown_holds: AtomicU64,
    hysteresis_holds: AtomicU64,
    circuit_holds: AtomicU64,
    stale_samples: AtomicU64,
    invalid_samples: AtomicU64,
    missing_samples: AtomicU64,
    circuit_opens: AtomicU64,
    executor_failures: AtomicU64,
    checkpoint_failures: AtomicU64,
    current_size: AtomicU64,
    pending_delta: AtomicI64,
    consecutive_failures: AtomicU64,
    circuit_open: AtomicU64,
}

/// Point-in-time copy of one pool's metrics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolMetricsSnapshot {
    pub pool_id: PoolId,
    pub ticks: u64,
    pub scale_up_intents: u64,
    pub scale_down_intents: u64,
    pub holds: u64,
    pub cooldown_holds: u64,
    pub hysteresis_holds: u64,
    pub circuit_holds: u64,
    pub stale_samples: u64,
    pub invalid_samples: u64,
    pub missing_samples: u64,
    pub circuit_opens: u64,
    pub executor_failures: u64,
    pub checkpoint_failures: u64,
    pub current_size: u64,
    pub pending_delta: i64,
    pub consecutive_failures: u64,
    pub circuit_open: bool,
}

/// Collects reconciler activity across all pools.
#[derive(Clone, Default)]
pub struct ReconcilerMetrics {
    pools: Arc<RwLock<HashMap<PoolId, Arc<PoolCounters>>>>,
}

impl ReconcilerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pool for metrics collection.
    pub async fn register(&self, pool_id: &str) {
        let mut pools = self.pools.write().await;
        pools
            .entry(pool_id.to_string())
            .or_insert_with(|| Arc::new(PoolCounters::default()));
        debug!(pool = %pool_id, "registered for reconciler metrics");
    }

    async fn counters(&self, pool_id: &str) -> Option<Arc<PoolCounters>> {
        self.pools.read().await.get(pool_id).cloned()
    }

    pub async fn record_tick(&self, pool_id: &str) {
        if let Some(c) = self.counters(pool_id).await {
            c.ticks.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Count the decision of one evaluation.
    pub async fn record_intent(&self, pool_id: &str, intent: &ScaleIntent) {
        let Some(c) = self.counters(pool_id).await else {
            return;
        };
        match intent.direction {
            Direction::Up => {
                c.scale_up_intents.fetch_add(1, Ordering::Relaxed);
            }
            Direction::Down => {
                c.scale_down_intents.fetch_add(1, Ordering::Relaxed);
            }
            Direction::None => {
                c.holds.fetch_add(1, Ordering::Relaxed);
                let bucket = match intent.reason {
                    ScaleReason::CooldownActive => Some(&c.cooldown_holds),
                    ScaleReason::HysteresisHold => Some(&c.hysteresis_holds),
                    ScaleReason::CircuitOpen => Some(&c.circuit_holds),
                    _ => None,
                };
                if let Some(bucket) = bucket {
                    bucket.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    pub async fn record_signal(&self, pool_id: &str, signal: &Signal) {
        let Some(c) = self.counters(pool_id).await else {
            return;
        };
        let counter = match signal {
            Signal::StaleSample { .. } => &c.stale_samples,
            Signal::InvalidSample { .. } => &c.invalid_samples,
            Signal::MissingSample => &c.missing_samples,
            Signal::CircuitOpen { .. } => &c.circuit_opens,
            Signal::ExecutorFailure { .. } => &c.executor_failures,
            Signal::CircuitClosed => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub async fn record_checkpoint_failure(&self, pool_id: &str) {
        if let Some(c) = self.counters(pool_id).await {
            c.checkpoint_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Refresh the state gauges of a pool.
    pub async fn observe_state(&self, pool_id: &str, state: &PoolState, now: Timestamp) {
        let Some(c) = self.counters(pool_id).await else {
            return;
        };
        c.current_size
            .store(state.current_size as u64, Ordering::Relaxed);
        c.pending_delta
            .store(state.pending_delta as i64, Ordering::Relaxed);
        c.consecutive_failures
            .store(state.consecutive_failures as u64, Ordering::Relaxed);
        c.circuit_open
            .store(state.is_circuit_open(now) as u64, Ordering::Relaxed);
    }

    /// Snapshot every registered pool, sorted by pool id.
    pub async fn snapshot(&self) -> Vec<PoolMetricsSnapshot> {
        let pools = self.pools.read().await;
        let mut snapshots: Vec<_> = pools
            .iter()
            .map(|(pool_id, c)| PoolMetricsSnapshot {
                pool_id: pool_id.clone(),
                ticks: c.ticks.load(Ordering::Relaxed),
                scale_up_intents: c.scale_up_intents.load(Ordering::Relaxed),
                scale_down_intents: c.scale_down_intents.load(Ordering::Relaxed),
                holds: c.holds.load(Ordering::Relaxed),
                cooldown_holds: c.cooldown_holds.load(Ordering::Relaxed),
                hysteresis_holds: c.hysteresis_holds.load(Ordering::Relaxed),
                circuit_holds: c.circuit_holds.load(Ordering::Relaxed),
                stale_samples: c.stale_samples.load(Ordering::Relaxed),
                invalid_samples: c.invalid_samples.load(Ordering::Relaxed),
                missing_samples: c.missing_samples.load(Ordering::Relaxed),
                circuit_opens: c.circuit_opens.load(Ordering::Relaxed),
                executor_failures: c.executor_failures.load(Ordering::Relaxed),
                checkpoint_failures: c.checkpoint_failures.load(Ordering::Relaxed),
                current_size: c.current_size.load(Ordering::Relaxed),
                pending_delta: c.pending_delta.load(Ordering::Relaxed),
                consecutive_failures: c.consecutive_failures.load(Ordering::Relaxed),
                circuit_open: c.circuit_open.load(Ordering::Relaxed) != 0,
            })
            .collect();
        snapshots.sort_by(|a, b| a.pool_id.cmp(&b.pool_id));
        snapshots
    }
}
