//! Prometheus text exposition format.
//!
//! Renders reconciler snapshots for scraping by a Prometheus server or a
//! compatible agent. Every series carries a `pool` label.

use std::fmt::Write;

use crate::counters::PoolMetricsSnapshot;

type Extract = fn(&PoolMetricsSnapshot) -> i64;

/// (name, type, help, value)
const FAMILIES: &[(&str, &str, &str, Extract)] = &[
    ("nodepool_ticks_total", "counter", "Reconciler ticks run.", |s| s.ticks as i64),
    ("nodepool_scale_up_intents_total", "counter", "Scale-up intents issued.", |s| {
        s.scale_up_intents as i64
    }),
    ("nodepool_scale_down_intents_total", "counter", "Scale-down intents issued.", |s| {
        s.scale_down_intents as i64
    }),
    ("nodepool_holds_total", "counter", "Ticks that ended without an intent.", |s| s.holds as i64),
    ("nodepool_cooldown_holds_total", "counter", "Holds caused by an active cooldown.", |s| {
        s.cooldown_holds as i64
    }),
    ("nodepool_hysteresis_holds_total", "counter", "Scale-downs held back by hysteresis.", |s| {
        s.hysteresis_holds as i64
    }),
    ("nodepool_circuit_holds_total", "counter", "Scale-ups suppressed by an open circuit.", |s| {
        s.circuit_holds as i64
    }),
    ("nodepool_stale_samples_total", "counter", "Samples older than the staleness threshold.", |s| {
        s.stale_samples as i64
    }),
    ("nodepool_invalid_samples_total", "counter", "Samples with unusable values.", |s| {
        s.invalid_samples as i64
    }),
    ("nodepool_missing_samples_total", "counter", "Ticks with no sample available.", |s| {
        s.missing_samples as i64
    }),
    ("nodepool_circuit_opens_total", "counter", "Times the scale-up circuit (re)opened.", |s| {
        s.circuit_opens as i64
    }),
    ("nodepool_executor_failures_total", "counter", "Failed scale operations.", |s| {
        s.executor_failures as i64
    }),
    ("nodepool_checkpoint_failures_total", "counter", "Failed state checkpoint writes.", |s| {
        s.checkpoint_failures as i64
    }),
    ("nodepool_current_size", "gauge", "Ready nodes as last confirmed.", |s| s.current_size as i64),
    ("nodepool_pending_delta", "gauge", "Node delta of the in-flight operation.", |s| s.pending_delta),
    ("nodepool_consecutive_failures", "gauge", "Consecutive failed scale operations.", |s| {
        s.consecutive_failures as i64
    }),
    ("nodepool_circuit_open", "gauge", "1 while scale-up is suppressed.", |s| s.circuit_open as i64),
];

/// Render pool snapshots into Prometheus text format.
///
/// HELP and TYPE lines are emitted even when there are no pools.
pub fn render_prometheus(snapshots: &[PoolMetricsSnapshot]) -> String {
    let mut out = String::new();
    for (name, kind, help, value) in FAMILIES {
        let _ = writeln!(out, "# HELP {name} {help}");
        let _ = writeln!(out, "# TYPE {name} {kind}");
        for s in snapshots {
            let _ = writeln!(out, "{name}{{pool=\"{}\"}} {}", s.pool_id, value(s));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_snapshot(pool_id: &str) -> PoolMetricsSnapshot {
        PoolMetricsSnapshot {
            pool_id: pool_id.to_string(),
            ticks: 12,
            scale_up_intents: 3,
            scale_down_intents: 1,
            holds: 8,
            cooldown_holds: 2,
            hysteresis_holds: 4,
            circuit_holds: 1,
            stale_samples: 0,
            invalid_samples: 0,
            missing_samples: 2,
            circuit_opens: 1,
            executor_failures: 3,
            checkpoint_failures: 0,
            current_size: 4,
            pending_delta: -1,
            consecutive_failures: 3,
            circuit_open: true,
        }
    }

    #[test]
    fn render_empty() {
        let output = render_prometheus(&[]);
        assert!(output.contains("# HELP nodepool_ticks_total"));
        assert!(output.contains("# TYPE nodepool_current_size gauge"));
        assert!(!output.contains("pool=\""));
    }

    #[test]
    fn render_single_pool() {
        let output = render_prometheus(&[test_snapshot("general")]);

        assert!(output.contains("nodepool_ticks_total{pool=\"general\"} 12"));
        assert!(output.contains("nodepool_scale_up_intents_total{pool=\"general\"} 3"));
        assert!(output.contains("nodepool_hysteresis_holds_total{pool=\"general\"} 4"));
        assert!(output.contains("nodepool_executor_failures_total{pool=\"general\"} 3"));
        assert!(output.contains("nodepool_current_size{pool=\"general\"} 4"));
        assert!(output.contains("nodepool_pending_delta{pool=\"general\"} -1"));
        assert!(output.contains("nodepool_circuit_open{pool=\"general\"} 1"));
    }

    #[test]
    fn every_sample_line_is_labelled() {
        let output = render_prometheus(&[test_snapshot("general"), test_snapshot("gpu")]);
        let samples: Vec<_> = output
            .lines()
            .filter(|line| !line.starts_with('#'))
            .collect();

        assert_eq!(samples.len(), FAMILIES.len() * 2);
        for line in samples {
            assert!(line.contains("{pool=\""), "line should have labels: {line}");
        }
    }
}
