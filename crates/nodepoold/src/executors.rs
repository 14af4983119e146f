//! Bundled `ScaleExecutor` implementations.
//!
//! - `SimulatedExecutor` keeps node counts in memory; every resize succeeds.
//!   Useful for dry runs against real load signals.
//! - `CommandExecutor` shells out to operator-supplied templates, e.g. a
//!   managed node group resize. `{pool}` and `{target}` are substituted
//!   before the command runs under `sh -c`.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, bail};
use tokio::process::Command;
use tokio::sync::RwLock;
use tracing::{debug, info};

use nodepool_core::{ExecutorError, ExecutorSettings, Outcome, PoolId, PoolSpec};
use nodepool_metrics::BoxFuture;
use nodepool_reconcile::{ScaleExecutor, ScaleRequest};

/// Build the executor selected in configuration.
pub fn build(settings: &ExecutorSettings) -> Arc<dyn ScaleExecutor> {
    match settings {
        ExecutorSettings::Simulated => {
            info!("using simulated executor");
            Arc::new(SimulatedExecutor::default())
        }
        ExecutorSettings::Command { apply, observe } => {
            info!(apply = %apply, observe = ?observe, "using command executor");
            Arc::new(CommandExecutor::new(apply.clone(), observe.clone()))
        }
    }
}

// ── Simulated ──────────────────────────────────────────────────

#[derive(Default)]
pub struct SimulatedExecutor {
    sizes: RwLock<HashMap<PoolId, u32>>,
}

impl ScaleExecutor for SimulatedExecutor {
    fn observe_size<'a>(&'a self, spec: &'a PoolSpec) -> BoxFuture<'a, anyhow::Result<u32>> {
        Box::pin(async move {
            let mut sizes = self.sizes.write().await;
            Ok(*sizes.entry(spec.id.clone()).or_insert(spec.desired_size))
        })
    }

    fn apply<'a>(&'a self, request: &'a ScaleRequest) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            self.sizes
                .write()
                .await
                .insert(request.pool_id.clone(), request.target);
            debug!(pool = %request.pool_id, size = request.target, "simulated resize");
            Outcome::Succeeded {
                new_size: request.target,
            }
        })
    }
}

// ── Command ────────────────────────────────────────────────────

pub struct CommandExecutor {
    apply: String,
    observe: Option<String>,
}

impl CommandExecutor {
    pub fn new(apply: String, observe: Option<String>) -> Self {
        Self { apply, observe }
    }

    fn render(template: &str, pool_id: &str, target: Option<u32>) -> String {
        let rendered = template.replace("{pool}", pool_id);
        match target {
            Some(target) => rendered.replace("{target}", &target.to_string()),
            None => rendered,
        }
    }

    async fn shell(command: &str) -> std::io::Result<std::process::Output> {
        Command::new("sh")
            .arg("-c")
            .arg(command)
            .kill_on_drop(true)
            .output()
            .await
    }
}

impl ScaleExecutor for CommandExecutor {
    fn observe_size<'a>(&'a self, spec: &'a PoolSpec) -> BoxFuture<'a, anyhow::Result<u32>> {
        Box::pin(async move {
            let Some(template) = &self.observe else {
                bail!("no observe command configured");
            };
            let command = Self::render(template, &spec.id, None);
            let output = Self::shell(&command)
                .await
                .with_context(|| format!("failed to run observe command for {}", spec.id))?;
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                bail!(
                    "observe command exited with {}: {}",
                    output.status.code().unwrap_or(-1),
                    stderr.trim()
                );
            }
            let stdout = String::from_utf8_lossy(&output.stdout);
            stdout
                .trim()
                .parse::<u32>()
                .with_context(|| format!("observe command printed {:?}, expected a node count", stdout.trim()))
        })
    }

    fn apply<'a>(&'a self, request: &'a ScaleRequest) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            let command = Self::render(&self.apply, &request.pool_id, Some(request.target));
            debug!(pool = %request.pool_id, %command, "running apply command");
            match Self::shell(&command).await {
                Ok(output) if output.status.success() => Outcome::Succeeded {
                    new_size: request.target,
                },
                Ok(output) => Outcome::Failed {
                    error: ExecutorError::Command {
                        status: output.status.code().unwrap_or(-1),
                        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                    },
                },
                Err(e) => Outcome::Failed {
                    error: ExecutorError::Io {
                        message: e.to_string(),
                    },
                },
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodepool_core::{ScaleIntent, ScaleReason};

    fn test_spec() -> PoolSpec {
        PoolSpec {
            id: "general".to_string(),
            min_size: 2,
            max_size: 6,
            desired_size: 2,
            scale_up_cooldown_secs: 60,
            scale_down_cooldown_secs: 300,
            target_utilization: 0.7,
            assumed_node_capacity: 10,
        }
    }

    fn request(target: u32) -> ScaleRequest {
        ScaleRequest {
            pool_id: "general".to_string(),
            from: 2,
            target,
            intent: ScaleIntent::up(target - 2, ScaleReason::HighUtilization),
        }
    }

    #[test]
    fn render_substitutes_placeholders() {
        let rendered = CommandExecutor::render(
            "resize --group {pool} --size {target} # {pool}",
            "general",
            Some(4),
        );
        assert_eq!(rendered, "resize --group general --size 4 # general");
        assert_eq!(CommandExecutor::render("count {pool}", "gpu", None), "count gpu");
    }

    #[tokio::test]
    async fn simulated_tracks_sizes() {
        let exec = SimulatedExecutor::default();
        let spec = test_spec();
        assert_eq!(exec.observe_size(&spec).await.unwrap(), 2);

        let outcome = exec.apply(&request(4)).await;
        assert_eq!(outcome, Outcome::Succeeded { new_size: 4 });
        assert_eq!(exec.observe_size(&spec).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn command_success_reports_target() {
        let exec = CommandExecutor::new("test {target} -eq 3 && test {pool} = general".into(), None);
        assert_eq!(exec.apply(&request(3)).await, Outcome::Succeeded { new_size: 3 });
    }

    #[tokio::test]
    async fn command_failure_captures_status_and_stderr() {
        let exec = CommandExecutor::new("echo quota exceeded >&2; exit 3".into(), None);
        let outcome = exec.apply(&request(3)).await;
        assert_eq!(
            outcome,
            Outcome::Failed {
                error: ExecutorError::Command {
                    status: 3,
                    stderr: "quota exceeded".to_string(),
                },
            }
        );
    }

    #[tokio::test]
    async fn observe_parses_stdout() {
        let exec = CommandExecutor::new("true".into(), Some("echo ' 5 '".into()));
        assert_eq!(exec.observe_size(&test_spec()).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn observe_errors() {
        let spec = test_spec();

        let exec = CommandExecutor::new("true".into(), None);
        assert!(exec.observe_size(&spec).await.is_err());

        let exec = CommandExecutor::new("true".into(), Some("echo lots".into()));
        assert!(exec.observe_size(&spec).await.is_err());

        let exec = CommandExecutor::new("true".into(), Some("exit 1".into()));
        assert!(exec.observe_size(&spec).await.is_err());
    }
}
