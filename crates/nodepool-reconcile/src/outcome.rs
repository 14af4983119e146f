//! Folding executor outcomes back into pool state.
//!
//! Every outcome clears the in-flight marker. Successes (full or partial)
//! adopt the size the platform reported, reset the failure counter and
//! close the circuit. Failures count up; from `failure_threshold` on, each
//! failure (re)opens the scale-up circuit for an exponentially growing
//! window:
//!
//! ```text
//! backoff = min(base * 2^(failures - threshold), base * cap_multiplier)
//! base    = scale_up_cooldown (at least 1s)
//! ```

use tracing::{debug, warn};

use nodepool_core::{
    Outcome, PoolSpec, PoolState, ReconcilerTuning, ScaleIntent, Signal, Timestamp,
};

/// Result of recording one executor outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct Recorded {
    pub state: PoolState,
    pub signals: Vec<Signal>,
}

/// Apply an executor outcome for `intent` to `state`.
pub fn record_scale_result(
    spec: &PoolSpec,
    tuning: &ReconcilerTuning,
    state: &PoolState,
    intent: &ScaleIntent,
    outcome: &Outcome,
    now: Timestamp,
) -> Recorded {
    let mut next = state.clone();
    let mut signals = Vec::new();
    next.pending_delta = 0;

    match outcome {
        Outcome::Succeeded { new_size } | Outcome::PartialSucceeded { new_size } => {
            if matches!(outcome, Outcome::PartialSucceeded { .. }) {
                warn!(
                    pool = %spec.id,
                    direction = intent.direction.as_str(),
                    requested = intent.target_from(state.current_size),
                    reached = new_size,
                    "scale operation partially applied"
                );
            }
            next.current_size = *new_size;
            next.consecutive_failures = 0;
            if next.circuit_open_until.take().is_some() {
                debug!(pool = %spec.id, "scale-up circuit closed");
                signals.push(Signal::CircuitClosed);
            }
        }
        Outcome::Failed { error } => {
            next.consecutive_failures = state.consecutive_failures.saturating_add(1);
            warn!(
                pool = %spec.id,
                direction = intent.direction.as_str(),
                magnitude = intent.magnitude,
                failures = next.consecutive_failures,
                %error,
                "scale operation failed"
            );
            signals.push(Signal::ExecutorFailure {
                error: error.clone(),
            });

            if next.consecutive_failures >= tuning.failure_threshold {
                let until = now.saturating_add(backoff_secs(spec, tuning, next.consecutive_failures));
                next.circuit_open_until = Some(until);
                warn!(
                    pool = %spec.id,
                    failures = next.consecutive_failures,
                    threshold = tuning.failure_threshold,
                    until,
                    "scale-up circuit opened"
                );
                signals.push(Signal::CircuitOpen {
                    until,
                    consecutive_failures: next.consecutive_failures,
                });
            }
        }
    }

    Recorded {
        state: next,
        signals,
    }
}

/// Length of the scale-up suppression window after `failures` consecutive
/// failures. Zero below the threshold.
pub fn backoff_secs(spec: &PoolSpec, tuning: &ReconcilerTuning, failures: u32) -> u64 {
    if failures < tuning.failure_threshold {
        return 0;
    }
    let base = spec.scale_up_cooldown_secs.max(1);
    let cap = base.saturating_mul(tuning.backoff_cap_multiplier.max(1) as u64);
    let exponent = failures - tuning.failure_threshold;
    let factor = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
    base.saturating_mul(factor).min(cap)
}
