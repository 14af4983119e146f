//! Per-tick scaling decision.
//!
//! `evaluate` is a pure function of its inputs: the same spec, tuning,
//! state, sample and time always produce the same `Evaluation`. It never
//! fails; unusable samples degrade to a hold plus a `Signal`.

use tracing::debug;

use nodepool_core::{
    LoadSample, PoolSpec, PoolState, ReconcilerTuning, ScaleIntent, ScaleReason, Signal, Timestamp,
};

/// Result of one evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub intent: ScaleIntent,
    /// State to carry into the next step.
    pub state: PoolState,
    pub signals: Vec<Signal>,
    /// Clamped target size, when the sample was usable.
    pub target: Option<u32>,
}

impl Evaluation {
    fn hold(state: PoolState, reason: ScaleReason, target: Option<u32>) -> Self {
        Self {
            intent: ScaleIntent::none(reason),
            state,
            signals: Vec::new(),
            target,
        }
    }

    fn with_signal(mut self, signal: Signal) -> Self {
        self.signals.push(signal);
        self
    }
}

/// Decide whether the pool should grow, shrink or stay put.
pub fn evaluate(
    spec: &PoolSpec,
    tuning: &ReconcilerTuning,
    state: &PoolState,
    sample: &LoadSample,
    now: Timestamp,
) -> Evaluation {
    let mut next = state.clone();
    // Only a usable sample extends the low-utilization streak.
    next.low_utilization_since = None;

    if !state.is_idle() {
        return Evaluation::hold(next, ScaleReason::PendingOperation, None);
    }

    if sample.is_from_future(now) {
        return Evaluation::hold(next, ScaleReason::InvalidSample, None).with_signal(
            Signal::InvalidSample {
                detail: format!("timestamp {} is ahead of now {now}", sample.timestamp),
            },
        );
    }

    let age_secs = now.saturating_sub(sample.timestamp);
    let threshold_secs = tuning.staleness_threshold.as_secs();
    if age_secs > threshold_secs {
        return Evaluation::hold(next, ScaleReason::StaleSample, None).with_signal(
            Signal::StaleSample {
                age_secs,
                threshold_secs,
            },
        );
    }

    if !sample.utilization.is_finite() || !(0.0..=1.0).contains(&sample.utilization) {
        return Evaluation::hold(next, ScaleReason::InvalidSample, None).with_signal(
            Signal::InvalidSample {
                detail: format!("utilization {} is outside [0, 1]", sample.utilization),
            },
        );
    }

    // Track how long utilization has stayed under the scale-down threshold.
    let low_water = spec.target_utilization * (1.0 - tuning.hysteresis_margin);
    next.low_utilization_since = if sample.utilization < low_water {
        Some(state.low_utilization_since.unwrap_or(sample.timestamp.min(now)))
    } else {
        None
    };

    let current = state.current_size;
    let raw = raw_target(spec, current, sample);
    let target = spec.clamp(raw);

    if target > current {
        if state.is_circuit_open(now) {
            return Evaluation::hold(next, ScaleReason::CircuitOpen, Some(target));
        }
        if !cooldown_elapsed(state.last_scale_up_at, spec.scale_up_cooldown_secs, now) {
            return Evaluation::hold(next, ScaleReason::CooldownActive, Some(target));
        }

        let reason = if raw <= current as u64 {
            ScaleReason::BoundsClamp
        } else if state.consecutive_failures > 0 {
            ScaleReason::FailureRecovery
        } else {
            ScaleReason::HighUtilization
        };
        let intent = ScaleIntent::up(target - current, reason);
        next.pending_delta = intent.signed_delta();
        next.last_scale_up_at = Some(now);

        debug!(
            pool = %spec.id,
            from = current,
            to = target,
            utilization = sample.utilization,
            pending_work = sample.pending_work_units,
            reason = reason.as_str(),
            "scaling up"
        );
        return Evaluation {
            intent,
            state: next,
            signals: Vec::new(),
            target: Some(target),
        };
    }

    if target < current {
        if !cooldown_elapsed(state.last_scale_down_at, spec.scale_down_cooldown_secs, now) {
            return Evaluation::hold(next, ScaleReason::CooldownActive, Some(target));
        }

        let sustained = next
            .low_utilization_since
            .is_some_and(|since| now.saturating_sub(since) >= spec.scale_down_cooldown_secs);
        let (target, reason) = if raw >= current as u64 {
            (target, ScaleReason::BoundsClamp)
        } else if sustained {
            let reason = if state.consecutive_failures > 0 {
                ScaleReason::FailureRecovery
            } else {
                ScaleReason::LowUtilization
            };
            (target, reason)
        } else if current > spec.max_size {
            // Back into bounds now; the rest waits for the streak.
            (spec.max_size, ScaleReason::BoundsClamp)
        } else {
            return Evaluation::hold(next, ScaleReason::HysteresisHold, Some(target));
        };
        let intent = ScaleIntent::down(current - target, reason);
        next.pending_delta = intent.signed_delta();
        next.last_scale_down_at = Some(now);
        if reason != ScaleReason::BoundsClamp {
            // The smaller pool has to prove itself before shrinking again.
            next.low_utilization_since = None;
        }

        debug!(
            pool = %spec.id,
            from = current,
            to = target,
            utilization = sample.utilization,
            reason = reason.as_str(),
            "scaling down"
        );
        return Evaluation {
            intent,
            state: next,
            signals: Vec::new(),
            target: Some(target),
        };
    }

    Evaluation::hold(next, ScaleReason::Steady, Some(target))
}

/// Unclamped size the pool should have for this sample.
fn raw_target(spec: &PoolSpec, current: u32, sample: &LoadSample) -> u64 {
    // Dividing first keeps utilization == target an exact 1.0 ratio.
    let ratio = sample.utilization / spec.target_utilization;
    // Float-to-int casts saturate; NaN lands on zero.
    let by_utilization = (current as f64 * ratio).ceil() as u64;
    let by_queue = sample
        .pending_work_units
        .div_ceil(spec.assumed_node_capacity.max(1) as u64);
    by_utilization.saturating_add(by_queue)
}

fn cooldown_elapsed(last: Option<Timestamp>, cooldown_secs: u64, now: Timestamp) -> bool {
    last.is_none_or(|at| now.saturating_sub(at) >= cooldown_secs)
}
