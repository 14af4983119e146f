//! Per-pool driver: pulls samples, runs `evaluate` and drives the executor.
//!
//! Each pool gets its own `PoolReconciler`, run as an independent task. The
//! driver owns the pool's `PoolState`; nothing else mutates it. Checkpoints
//! are written after every step so a restart can resume cooldowns and the
//! circuit window.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use nodepool_core::{
    ExecutorError, Outcome, PoolId, PoolSpec, PoolState, ReconcilerTuning, ScaleIntent,
    ScaleReason, Signal, Timestamp,
};
use nodepool_metrics::{BoxFuture, ReconcilerMetrics, SampleSource};
use nodepool_state::{ScaleEvent, StateStore};

use crate::clock::Clock;
use crate::decision::evaluate;
use crate::outcome::record_scale_result;

/// A resize handed to the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaleRequest {
    pub pool_id: PoolId,
    /// Size the decision was made against.
    pub from: u32,
    /// Size the pool should end up at.
    pub target: u32,
    pub intent: ScaleIntent,
}

/// The platform side: reports pool sizes and carries out resizes.
///
/// `apply` never fails outright; platform errors come back as
/// `Outcome::Failed`.
pub trait ScaleExecutor: Send + Sync {
    /// Number of ready nodes the platform reports for the pool.
    fn observe_size<'a>(&'a self, spec: &'a PoolSpec) -> BoxFuture<'a, anyhow::Result<u32>>;

    fn apply<'a>(&'a self, request: &'a ScaleRequest) -> BoxFuture<'a, Outcome>;
}

/// What happened during one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub intent: ScaleIntent,
    /// Present when the intent was handed to the executor.
    pub outcome: Option<Outcome>,
    pub signals: Vec<Signal>,
}

/// Reconciliation loop for a single pool.
pub struct PoolReconciler {
    spec: PoolSpec,
    tuning: ReconcilerTuning,
    state: PoolState,
    clock: Arc<dyn Clock>,
    samples: Arc<dyn SampleSource>,
    executor: Arc<dyn ScaleExecutor>,
    store: Option<StateStore>,
    metrics: Option<ReconcilerMetrics>,
}

impl PoolReconciler {
    /// Create a driver starting from `desired_size`. Call `restore` to pick
    /// up the observed size and any checkpoint instead.
    pub fn new(
        spec: PoolSpec,
        tuning: ReconcilerTuning,
        clock: Arc<dyn Clock>,
        samples: Arc<dyn SampleSource>,
        executor: Arc<dyn ScaleExecutor>,
    ) -> Self {
        let state = PoolState::new(spec.desired_size);
        Self {
            spec,
            tuning,
            state,
            clock,
            samples,
            executor,
            store: None,
            metrics: None,
        }
    }

    /// Checkpoint state and record scale events in `store`.
    pub fn with_store(mut self, store: StateStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_metrics(mut self, metrics: ReconcilerMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn spec(&self) -> &PoolSpec {
        &self.spec
    }

    pub fn state(&self) -> &PoolState {
        &self.state
    }

    /// Initialise state from the platform and the last checkpoint.
    ///
    /// When the platform cannot report a size, the checkpointed size is
    /// used, then `desired_size`.
    pub async fn restore(&mut self) {
        let checkpoint = match &self.store {
            Some(store) => match store.get_pool_state(&self.spec.id) {
                Ok(checkpoint) => checkpoint,
                Err(e) => {
                    warn!(pool = %self.spec.id, error = %e, "failed to read checkpoint");
                    None
                }
            },
            None => None,
        };

        let timeout = self.tuning.executor_timeout;
        let observed = match tokio::time::timeout(timeout, self.executor.observe_size(&self.spec))
            .await
            .unwrap_or_else(|_| Err(anyhow::anyhow!("timed out after {timeout:?}")))
        {
            Ok(size) => size,
            Err(e) => {
                let fallback = checkpoint
                    .as_ref()
                    .map_or(self.spec.desired_size, |c| c.state.current_size);
                warn!(
                    pool = %self.spec.id,
                    error = %e,
                    fallback,
                    "could not observe pool size"
                );
                fallback
            }
        };

        self.state = match checkpoint {
            Some(checkpoint) => {
                if !checkpoint.state.is_idle() {
                    warn!(
                        pool = %self.spec.id,
                        pending_delta = checkpoint.state.pending_delta,
                        "discarding scale operation interrupted by restart"
                    );
                }
                info!(
                    pool = %self.spec.id,
                    observed,
                    saved_at = checkpoint.saved_at,
                    failures = checkpoint.state.consecutive_failures,
                    "resumed from checkpoint"
                );
                PoolState::resume(checkpoint.state, observed)
            }
            None => {
                info!(pool = %self.spec.id, observed, "starting without checkpoint");
                PoolState::new(observed)
            }
        };

        let now = self.clock.now();
        self.checkpoint(now).await;
        if let Some(metrics) = &self.metrics {
            metrics.observe_state(&self.spec.id, &self.state, now).await;
        }
    }

    /// Run one reconciliation step.
    pub async fn tick(&mut self) -> TickReport {
        let pool_id = self.spec.id.clone();
        let now = self.clock.now();
        if let Some(metrics) = &self.metrics {
            metrics.record_tick(&pool_id).await;
        }

        let (intent, mut signals, target) = match self.samples.latest_sample(&pool_id).await {
            Some(sample) => {
                let eval = evaluate(&self.spec, &self.tuning, &self.state, &sample, now);
                self.state = eval.state;
                (eval.intent, eval.signals, eval.target)
            }
            None => {
                self.state.low_utilization_since = None;
                (
                    ScaleIntent::none(ScaleReason::StaleSample),
                    vec![Signal::MissingSample],
                    None,
                )
            }
        };

        self.report_signals(&signals).await;
        if let Some(metrics) = &self.metrics {
            metrics.record_intent(&pool_id, &intent).await;
        }
        // Persist before executing so a crash mid-operation keeps the stamps.
        self.checkpoint(now).await;

        if !intent.is_actionable() {
            debug!(
                pool = %pool_id,
                reason = intent.reason.as_str(),
                target = ?target,
                current = self.state.current_size,
                "holding"
            );
            self.observe_metrics(now).await;
            return TickReport {
                intent,
                outcome: None,
                signals,
            };
        }

        let from = self.state.current_size;
        let request = ScaleRequest {
            pool_id: pool_id.clone(),
            from,
            target: intent.target_from(from),
            intent,
        };
        info!(
            pool = %pool_id,
            direction = intent.direction.as_str(),
            from,
            target = request.target,
            reason = intent.reason.as_str(),
            "applying scale intent"
        );
        let outcome = self.execute(&request).await;

        let finished_at = self.clock.now();
        let recorded = record_scale_result(
            &self.spec,
            &self.tuning,
            &self.state,
            &intent,
            &outcome,
            finished_at,
        );
        self.state = recorded.state;
        self.report_signals(&recorded.signals).await;
        signals.extend(recorded.signals);

        if let Outcome::Succeeded { new_size } | Outcome::PartialSucceeded { new_size } = &outcome {
            info!(
                pool = %pool_id,
                from,
                to = new_size,
                status = outcome.label(),
                "scale operation completed"
            );
        }

        if let Some(store) = &self.store {
            let event = ScaleEvent {
                pool_id: pool_id.clone(),
                at: now,
                intent,
                from_size: from,
                target_size: request.target,
                outcome: outcome.clone(),
            };
            if let Err(e) = store.append_event(&event) {
                warn!(pool = %pool_id, error = %e, "failed to record scale event");
            }
        }
        self.checkpoint(finished_at).await;
        self.observe_metrics(finished_at).await;

        TickReport {
            intent,
            outcome: Some(outcome),
            signals,
        }
    }

    /// Tick every `tick_interval` until `shutdown` flips.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let interval = self.tuning.tick_interval;
        info!(
            pool = %self.spec.id,
            interval_secs = interval.as_secs(),
            "pool reconciler started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    self.tick().await;
                }
                _ = shutdown.changed() => {
                    info!(pool = %self.spec.id, "pool reconciler shutting down");
                    break;
                }
            }
        }
    }

    async fn execute(&self, request: &ScaleRequest) -> Outcome {
        let timeout = self.tuning.executor_timeout;
        match tokio::time::timeout(timeout, self.executor.apply(request)).await {
            Ok(outcome) => outcome,
            Err(_) => Outcome::Failed {
                error: ExecutorError::Timeout {
                    after_secs: timeout.as_secs(),
                },
            },
        }
    }

    async fn report_signals(&self, signals: &[Signal]) {
        for signal in signals {
            match signal {
                Signal::CircuitClosed => {
                    info!(pool = %self.spec.id, signal = signal.label(), "reconciler signal");
                }
                _ => {
                    warn!(pool = %self.spec.id, signal = signal.label(), detail = ?signal, "reconciler signal");
                }
            }
            if let Some(metrics) = &self.metrics {
                metrics.record_signal(&self.spec.id, signal).await;
            }
        }
    }

    async fn checkpoint(&self, now: Timestamp) {
        let Some(store) = &self.store else {
            return;
        };
        if let Err(e) = store.put_pool_state(&self.spec.id, &self.state, now) {
            error!(pool = %self.spec.id, error = %e, "failed to checkpoint pool state");
            if let Some(metrics) = &self.metrics {
                metrics.record_checkpoint_failure(&self.spec.id).await;
            }
        }
    }

    async fn observe_metrics(&self, now: Timestamp) {
        if let Some(metrics) = &self.metrics {
            metrics.observe_state(&self.spec.id, &self.state, now).await;
        }
    }
}
