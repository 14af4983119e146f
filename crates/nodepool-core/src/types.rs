//! Domain types for the capacity reconciler.
//!
//! Timestamps are Unix epoch seconds. `PoolSpec` is immutable for the life
//! of a reconciler; `PoolState` is a plain value that is passed into and
//! returned from every reconciler step.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unique identifier for a worker pool.
pub type PoolId = String;

/// Unix timestamp in seconds.
pub type Timestamp = u64;

// ── Pool spec ──────────────────────────────────────────────────────

/// Immutable sizing policy for a single worker pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolSpec {
    pub id: PoolId,
    pub min_size: u32,
    pub max_size: u32,
    /// Initial size, used when the platform cannot report one.
    pub desired_size: u32,
    /// Minimum seconds between two scale-ups.
    pub scale_up_cooldown_secs: u64,
    /// Minimum seconds between two scale-downs. Also the length of the
    /// sustained-low-utilization window that gates a scale-down.
    pub scale_down_cooldown_secs: u64,
    /// Utilization the pool is steered towards, in (0, 1].
    pub target_utilization: f64,
    /// Work units a single node is assumed to absorb.
    pub assumed_node_capacity: u32,
}

impl PoolSpec {
    /// Clamp a node count into `[min_size, max_size]`.
    pub fn clamp(&self, size: u64) -> u32 {
        size.clamp(self.min_size as u64, self.max_size as u64) as u32
    }
}

// ── Pool state ─────────────────────────────────────────────────────

/// Mutable reconciler state for one pool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolState {
    /// Ready nodes as last confirmed by the executor.
    pub current_size: u32,
    /// Signed delta of the in-flight operation; zero when idle.
    pub pending_delta: i32,
    pub last_scale_up_at: Option<Timestamp>,
    pub last_scale_down_at: Option<Timestamp>,
    pub consecutive_failures: u32,
    /// Start of the current streak of samples below the scale-down threshold.
    pub low_utilization_since: Option<Timestamp>,
    /// Scale-up stays suppressed until this instant.
    pub circuit_open_until: Option<Timestamp>,
}

impl PoolState {
    /// Fresh state for a pool observed at `current_size` nodes.
    pub fn new(current_size: u32) -> Self {
        Self {
            current_size,
            ..Self::default()
        }
    }

    /// Rebuild state from a checkpoint after a restart.
    ///
    /// Cooldown stamps, the failure counter and the circuit window survive;
    /// the node count is re-observed and any in-flight operation is dropped.
    pub fn resume(checkpoint: PoolState, observed_size: u32) -> Self {
        Self {
            current_size: observed_size,
            pending_delta: 0,
            ..checkpoint
        }
    }

    pub fn is_idle(&self) -> bool {
        self.pending_delta == 0
    }

    pub fn is_circuit_open(&self, now: Timestamp) -> bool {
        self.circuit_open_until.is_some_and(|until| now < until)
    }
}

// ── Load sample ────────────────────────────────────────────────────

/// Point-in-time load observation for a pool.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoadSample {
    pub timestamp: Timestamp,
    /// Fraction of pool capacity in use, 0.0–1.0.
    pub utilization: f64,
    /// Work items waiting for capacity.
    #[serde(default)]
    pub pending_work_units: u64,
}

impl LoadSample {
    /// Clock skew tolerated between a sample source and the reconciler.
    pub const MAX_CLOCK_SKEW_SECS: u64 = 5;

    /// True when the sample claims a time past `now` plus the skew allowance.
    pub fn is_from_future(&self, now: Timestamp) -> bool {
        self.timestamp > now.saturating_add(Self::MAX_CLOCK_SKEW_SECS)
    }
}

// ── Scale intent ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
    None,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::None => "none",
        }
    }
}

/// Why an intent was (or was not) proposed.
///
/// The first four explain an actionable intent; the rest explain a hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleReason {
    HighUtilization,
    LowUtilization,
    FailureRecovery,
    BoundsClamp,
    PendingOperation,
    StaleSample,
    InvalidSample,
    CooldownActive,
    CircuitOpen,
    HysteresisHold,
    Steady,
}

impl ScaleReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScaleReason::HighUtilization => "high_utilization",
            ScaleReason::LowUtilization => "low_utilization",
            ScaleReason::FailureRecovery => "failure_recovery",
            ScaleReason::BoundsClamp => "bounds_clamp",
            ScaleReason::PendingOperation => "pending_operation",
            ScaleReason::StaleSample => "stale_sample",
            ScaleReason::InvalidSample => "invalid_sample",
            ScaleReason::CooldownActive => "cooldown_active",
            ScaleReason::CircuitOpen => "circuit_open",
            ScaleReason::HysteresisHold => "hysteresis_hold",
            ScaleReason::Steady => "steady",
        }
    }
}

/// A scaling decision handed to the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleIntent {
    pub direction: Direction,
    /// Node count delta; zero for `Direction::None`.
    pub magnitude: u32,
    pub reason: ScaleReason,
}

impl ScaleIntent {
    pub fn none(reason: ScaleReason) -> Self {
        Self {
            direction: Direction::None,
            magnitude: 0,
            reason,
        }
    }

    pub fn up(magnitude: u32, reason: ScaleReason) -> Self {
        Self {
            direction: Direction::Up,
            magnitude,
            reason,
        }
    }

    pub fn down(magnitude: u32, reason: ScaleReason) -> Self {
        Self {
            direction: Direction::Down,
            magnitude,
            reason,
        }
    }

    pub fn is_actionable(&self) -> bool {
        self.direction != Direction::None && self.magnitude > 0
    }

    /// Signed node delta this intent asks for.
    pub fn signed_delta(&self) -> i32 {
        let magnitude = self.magnitude.min(i32::MAX as u32) as i32;
        match self.direction {
            Direction::Up => magnitude,
            Direction::Down => -magnitude,
            Direction::None => 0,
        }
    }

    /// Pool size after applying this intent to `current`.
    pub fn target_from(&self, current: u32) -> u32 {
        match self.direction {
            Direction::Up => current.saturating_add(self.magnitude),
            Direction::Down => current.saturating_sub(self.magnitude),
            Direction::None => current,
        }
    }
}

// ── Outcomes and signals ───────────────────────────────────────────

/// Error reported by an executor. Recorded, never propagated.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutorError {
    #[error("executor timed out after {after_secs}s")]
    Timeout { after_secs: u64 },

    #[error("platform rejected the change: {message}")]
    Rejected { message: String },

    #[error("command exited with status {status}: {stderr}")]
    Command { status: i32, stderr: String },

    #[error("executor i/o error: {message}")]
    Io { message: String },
}

/// Result of an executor attempt, fed back into the reconciler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Succeeded { new_size: u32 },
    PartialSucceeded { new_size: u32 },
    Failed { error: ExecutorError },
}

impl Outcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failed { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Succeeded { .. } => "succeeded",
            Outcome::PartialSucceeded { .. } => "partial",
            Outcome::Failed { .. } => "failed",
        }
    }
}

/// Non-fatal conditions surfaced by a reconciler step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum Signal {
    /// The latest sample is older than the staleness threshold.
    StaleSample { age_secs: u64, threshold_secs: u64 },
    /// The sample carried values the reconciler cannot reason about.
    InvalidSample { detail: String },
    /// No sample has been observed for the pool yet.
    MissingSample,
    /// Scale-up is suppressed until `until`.
    CircuitOpen {
        until: Timestamp,
        consecutive_failures: u32,
    },
    /// A success closed a previously open circuit.
    CircuitClosed,
    /// The executor failed to carry out an intent.
    ExecutorFailure { error: ExecutorError },
}

impl Signal {
    pub fn label(&self) -> &'static str {
        match self {
            Signal::StaleSample { .. } => "stale_sample",
            Signal::InvalidSample { .. } => "invalid_sample",
            Signal::MissingSample => "missing_sample",
            Signal::CircuitOpen { .. } => "circuit_open",
            Signal::CircuitClosed => "circuit_closed",
            Signal::ExecutorFailure { .. } => "executor_failure",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intent_targets_saturate() {
        assert_eq!(ScaleIntent::up(3, ScaleReason::HighUtilization).target_from(2), 5);
        assert_eq!(ScaleIntent::down(5, ScaleReason::LowUtilization).target_from(2), 0);
        assert_eq!(ScaleIntent::none(ScaleReason::Steady).target_from(4), 4);
    }

    #[test]
    fn signed_delta_follows_direction() {
        assert_eq!(ScaleIntent::up(2, ScaleReason::BoundsClamp).signed_delta(), 2);
        assert_eq!(ScaleIntent::down(2, ScaleReason::BoundsClamp).signed_delta(), -2);
        assert_eq!(ScaleIntent::none(ScaleReason::Steady).signed_delta(), 0);
    }

    #[test]
    fn resume_drops_inflight_operation() {
        let checkpoint = PoolState {
            current_size: 4,
            pending_delta: 2,
            last_scale_up_at: Some(100),
            consecutive_failures: 1,
            circuit_open_until: Some(500),
            ..PoolState::default()
        };
        let state = PoolState::resume(checkpoint, 5);
        assert_eq!(state.current_size, 5);
        assert!(state.is_idle());
        assert_eq!(state.last_scale_up_at, Some(100));
        assert_eq!(state.consecutive_failures, 1);
        assert!(state.is_circuit_open(499));
        assert!(!state.is_circuit_open(500));
    }

    #[test]
    fn future_samples_allow_small_skew() {
        let sample = |timestamp| LoadSample {
            timestamp,
            utilization: 0.5,
            pending_work_units: 0,
        };
        assert!(!sample(1_000).is_from_future(1_000));
        assert!(!sample(1_005).is_from_future(1_000));
        assert!(sample(1_006).is_from_future(1_000));
        // Milliseconds instead of seconds.
        assert!(sample(1_700_000_000_000).is_from_future(1_700_000_000));
    }

    #[test]
    fn outcome_serializes_with_status_tag() {
        let outcome = Outcome::Failed {
            error: ExecutorError::Timeout { after_secs: 30 },
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error"]["kind"], "timeout");
    }
}
