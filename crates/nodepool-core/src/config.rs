//! nodepool.toml configuration parser.
//!
//! The raw file shape (`NodepoolConfig`) keeps durations as strings and
//! leaves optional knobs unset. `NodepoolConfig::resolve` fills defaults,
//! validates everything and produces the immutable `Settings` the daemon
//! runs with. A config that fails validation must keep the daemon from
//! starting.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration::parse_duration;
use crate::error::ConfigError;
use crate::types::PoolSpec;

fn default_tick_interval() -> String {
    "30s".to_string()
}

fn default_hysteresis_margin() -> f64 {
    0.1
}

const fn default_failure_threshold() -> u32 {
    3
}

const fn default_backoff_cap_multiplier() -> u32 {
    10
}

fn default_executor_timeout() -> String {
    "5m".to_string()
}

fn default_scale_up_cooldown() -> String {
    "60s".to_string()
}

fn default_scale_down_cooldown() -> String {
    "5m".to_string()
}

const fn default_assumed_node_capacity() -> u32 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodepoolConfig {
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub pools: Vec<PoolConfig>,
}

/// Loop-wide tuning shared by every pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    #[serde(default = "default_tick_interval")]
    pub tick_interval: String,
    /// Defaults to twice the tick interval.
    pub staleness_threshold: Option<String>,
    #[serde(default = "default_hysteresis_margin")]
    pub hysteresis_margin: f64,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_backoff_cap_multiplier")]
    pub backoff_cap_multiplier: u32,
    #[serde(default = "default_executor_timeout")]
    pub executor_timeout: String,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            tick_interval: default_tick_interval(),
            staleness_threshold: None,
            hysteresis_margin: default_hysteresis_margin(),
            failure_threshold: default_failure_threshold(),
            backoff_cap_multiplier: default_backoff_cap_multiplier(),
            executor_timeout: default_executor_timeout(),
        }
    }
}

/// Which executor carries out scale intents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutorConfig {
    /// Keep node counts in memory and apply changes instantly.
    #[default]
    Simulated,
    /// Shell out to an operator-supplied command.
    ///
    /// `{pool}` and `{target}` are substituted before execution.
    Command {
        apply: String,
        observe: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub id: String,
    pub min_size: u32,
    pub max_size: u32,
    pub desired_size: u32,
    #[serde(default = "default_scale_up_cooldown")]
    pub scale_up_cooldown: String,
    #[serde(default = "default_scale_down_cooldown")]
    pub scale_down_cooldown: String,
    pub target_utilization: f64,
    #[serde(default = "default_assumed_node_capacity")]
    pub assumed_node_capacity: u32,
}

/// Validated loop-wide tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcilerTuning {
    pub tick_interval: Duration,
    pub staleness_threshold: Duration,
    pub hysteresis_margin: f64,
    pub failure_threshold: u32,
    pub backoff_cap_multiplier: u32,
    pub executor_timeout: Duration,
}

impl Default for ReconcilerTuning {
    fn default() -> Self {
        let tick_interval = Duration::from_secs(30);
        Self {
            tick_interval,
            staleness_threshold: tick_interval * 2,
            hysteresis_margin: default_hysteresis_margin(),
            failure_threshold: default_failure_threshold(),
            backoff_cap_multiplier: default_backoff_cap_multiplier(),
            executor_timeout: Duration::from_secs(300),
        }
    }
}

/// Validated executor selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutorSettings {
    Simulated,
    Command {
        apply: String,
        observe: Option<String>,
    },
}

/// Fully validated configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub tuning: ReconcilerTuning,
    pub executor: ExecutorSettings,
    pub pools: Vec<PoolSpec>,
}

impl NodepoolConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Read, parse and validate a config file in one step.
    pub fn load(path: &Path) -> Result<Settings, ConfigError> {
        Self::from_file(path)?.resolve()
    }

    /// Apply defaults and validate.
    pub fn resolve(&self) -> Result<Settings, ConfigError> {
        let tuning = self.reconciler.resolve()?;
        let executor = self.executor.resolve()?;

        if self.pools.is_empty() {
            return Err(ConfigError::setting("pools", "at least one pool is required"));
        }

        let mut seen = HashSet::new();
        let mut pools = Vec::with_capacity(self.pools.len());
        for pool in &self.pools {
            if !seen.insert(pool.id.as_str()) {
                return Err(ConfigError::spec(&pool.id, "duplicate pool id"));
            }
            pools.push(pool.resolve()?);
        }

        Ok(Settings {
            tuning,
            executor,
            pools,
        })
    }
}

impl ReconcilerConfig {
    fn resolve(&self) -> Result<ReconcilerTuning, ConfigError> {
        let tick_interval = duration_field("reconciler.tick_interval", &self.tick_interval)?;
        if tick_interval.is_zero() {
            return Err(ConfigError::setting(
                "reconciler.tick_interval",
                "must be greater than zero",
            ));
        }

        let staleness_threshold = match &self.staleness_threshold {
            Some(s) => duration_field("reconciler.staleness_threshold", s)?,
            None => tick_interval * 2,
        };

        if !(0.0..1.0).contains(&self.hysteresis_margin) {
            return Err(ConfigError::setting(
                "reconciler.hysteresis_margin",
                format!("{} is outside [0, 1)", self.hysteresis_margin),
            ));
        }
        if self.failure_threshold == 0 {
            return Err(ConfigError::setting(
                "reconciler.failure_threshold",
                "must be at least 1",
            ));
        }
        if self.backoff_cap_multiplier == 0 {
            return Err(ConfigError::setting(
                "reconciler.backoff_cap_multiplier",
                "must be at least 1",
            ));
        }

        let executor_timeout =
            duration_field("reconciler.executor_timeout", &self.executor_timeout)?;
        if executor_timeout.is_zero() {
            return Err(ConfigError::setting(
                "reconciler.executor_timeout",
                "must be greater than zero",
            ));
        }

        Ok(ReconcilerTuning {
            tick_interval,
            staleness_threshold,
            hysteresis_margin: self.hysteresis_margin,
            failure_threshold: self.failure_threshold,
            backoff_cap_multiplier: self.backoff_cap_multiplier,
            executor_timeout,
        })
    }
}

impl ExecutorConfig {
    fn resolve(&self) -> Result<ExecutorSettings, ConfigError> {
        match self {
            ExecutorConfig::Simulated => Ok(ExecutorSettings::Simulated),
            ExecutorConfig::Command { apply, observe } => {
                if apply.trim().is_empty() {
                    return Err(ConfigError::setting(
                        "executor.apply",
                        "command template is empty",
                    ));
                }
                Ok(ExecutorSettings::Command {
                    apply: apply.clone(),
                    observe: observe.clone().filter(|o| !o.trim().is_empty()),
                })
            }
        }
    }
}

impl PoolConfig {
    fn resolve(&self) -> Result<PoolSpec, ConfigError> {
        if self.id.is_empty() {
            return Err(ConfigError::spec(&self.id, "pool id is empty"));
        }
        if !self
            .id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(ConfigError::spec(
                &self.id,
                "pool id may only contain ASCII letters, digits, '-', '_' and '.'",
            ));
        }
        if self.min_size > self.max_size {
            return Err(ConfigError::spec(
                &self.id,
                format!("min_size {} > max_size {}", self.min_size, self.max_size),
            ));
        }
        if self.desired_size < self.min_size || self.desired_size > self.max_size {
            return Err(ConfigError::spec(
                &self.id,
                format!(
                    "desired_size {} is outside [{}, {}]",
                    self.desired_size, self.min_size, self.max_size
                ),
            ));
        }
        if !(self.target_utilization > 0.0 && self.target_utilization <= 1.0) {
            return Err(ConfigError::spec(
                &self.id,
                format!("target_utilization {} is outside (0, 1]", self.target_utilization),
            ));
        }
        if self.assumed_node_capacity == 0 {
            return Err(ConfigError::spec(&self.id, "assumed_node_capacity must be at least 1"));
        }

        let scale_up = parse_duration(&self.scale_up_cooldown).ok_or_else(|| {
            ConfigError::spec(
                &self.id,
                format!("bad scale_up_cooldown '{}'", self.scale_up_cooldown),
            )
        })?;
        let scale_down = parse_duration(&self.scale_down_cooldown).ok_or_else(|| {
            ConfigError::spec(
                &self.id,
                format!("bad scale_down_cooldown '{}'", self.scale_down_cooldown),
            )
        })?;

        Ok(PoolSpec {
            id: self.id.clone(),
            min_size: self.min_size,
            max_size: self.max_size,
            desired_size: self.desired_size,
            scale_up_cooldown_secs: whole_secs(scale_up),
            scale_down_cooldown_secs: whole_secs(scale_down),
            target_utilization: self.target_utilization,
            assumed_node_capacity: self.assumed_node_capacity,
        })
    }
}

/// Cooldowns are tracked in whole seconds; any fraction rounds up.
fn whole_secs(duration: Duration) -> u64 {
    duration.as_secs() + u64::from(duration.subsec_nanos() > 0)
}

fn duration_field(field: &str, value: &str) -> Result<Duration, ConfigError> {
    parse_duration(value)
        .ok_or_else(|| ConfigError::setting(field, format!("cannot parse duration '{value}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[[pools]]
id = "general"
min_size = 2
max_size = 6
desired_size = 2
target_utilization = 0.7
"#;

    fn pool_with(fields: &str) -> String {
        format!(
            r#"
[[pools]]
id = "general"
{fields}
"#
        )
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let settings = NodepoolConfig::from_toml_str(MINIMAL).unwrap().resolve().unwrap();

        assert_eq!(settings.tuning, ReconcilerTuning::default());
        assert_eq!(settings.executor, ExecutorSettings::Simulated);
        assert_eq!(settings.pools.len(), 1);

        let pool = &settings.pools[0];
        assert_eq!(pool.id, "general");
        assert_eq!(pool.scale_up_cooldown_secs, 60);
        assert_eq!(pool.scale_down_cooldown_secs, 300);
        assert_eq!(pool.assumed_node_capacity, 10);
    }

    #[test]
    fn staleness_defaults_to_twice_the_tick() {
        let toml_str = format!("[reconciler]\ntick_interval = \"10s\"\n{MINIMAL}");
        let settings = NodepoolConfig::from_toml_str(&toml_str).unwrap().resolve().unwrap();
        assert_eq!(settings.tuning.staleness_threshold, Duration::from_secs(20));
    }

    #[test]
    fn full_config_parses() {
        let toml_str = r#"
[reconciler]
tick_interval = "15s"
staleness_threshold = "45s"
hysteresis_margin = 0.2
failure_threshold = 5
backoff_cap_multiplier = 4
executor_timeout = "2m"

[executor]
kind = "command"
apply = "scale-pool {pool} {target}"
observe = "count-nodes {pool}"

[[pools]]
id = "general"
min_size = 1
max_size = 10
desired_size = 3
scale_up_cooldown = "30s"
scale_down_cooldown = "10m"
target_utilization = 0.6
assumed_node_capacity = 4

[[pools]]
id = "gpu"
min_size = 0
max_size = 2
desired_size = 0
target_utilization = 0.9
"#;
        let settings = NodepoolConfig::from_toml_str(toml_str).unwrap().resolve().unwrap();

        assert_eq!(settings.tuning.tick_interval, Duration::from_secs(15));
        assert_eq!(settings.tuning.staleness_threshold, Duration::from_secs(45));
        assert_eq!(settings.tuning.failure_threshold, 5);
        assert_eq!(settings.tuning.executor_timeout, Duration::from_secs(120));
        assert_eq!(
            settings.executor,
            ExecutorSettings::Command {
                apply: "scale-pool {pool} {target}".to_string(),
                observe: Some("count-nodes {pool}".to_string()),
            }
        );
        assert_eq!(settings.pools[0].scale_down_cooldown_secs, 600);
        assert_eq!(settings.pools[1].min_size, 0);
    }

    #[test]
    fn sub_second_cooldowns_round_up() {
        let toml_str = pool_with(
            "min_size = 1\nmax_size = 3\ndesired_size = 1\ntarget_utilization = 0.7\n\
             scale_up_cooldown = \"500ms\"\nscale_down_cooldown = \"1500ms\"",
        );
        let settings = NodepoolConfig::from_toml_str(&toml_str).unwrap().resolve().unwrap();
        assert_eq!(settings.pools[0].scale_up_cooldown_secs, 1);
        assert_eq!(settings.pools[0].scale_down_cooldown_secs, 2);

        let toml_str = pool_with(
            "min_size = 1\nmax_size = 3\ndesired_size = 1\ntarget_utilization = 0.7\n\
             scale_up_cooldown = \"0s\"",
        );
        let settings = NodepoolConfig::from_toml_str(&toml_str).unwrap().resolve().unwrap();
        assert_eq!(settings.pools[0].scale_up_cooldown_secs, 0);
    }

    #[test]
    fn inverted_bounds_are_rejected() {
        let toml_str = pool_with(
            "min_size = 5\nmax_size = 2\ndesired_size = 3\ntarget_utilization = 0.7",
        );
        let err = NodepoolConfig::from_toml_str(&toml_str).unwrap().resolve().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSpec { ref pool, .. } if pool == "general"));
    }

    #[test]
    fn desired_outside_bounds_is_rejected() {
        let toml_str = pool_with(
            "min_size = 2\nmax_size = 6\ndesired_size = 7\ntarget_utilization = 0.7",
        );
        let err = NodepoolConfig::from_toml_str(&toml_str).unwrap().resolve().unwrap_err();
        assert!(err.to_string().contains("desired_size 7"));
    }

    #[test]
    fn target_utilization_must_be_a_fraction() {
        for bad in ["0.0", "1.5", "-0.3", "nan"] {
            let toml_str = pool_with(&format!(
                "min_size = 1\nmax_size = 3\ndesired_size = 1\ntarget_utilization = {bad}"
            ));
            let err = NodepoolConfig::from_toml_str(&toml_str).unwrap().resolve().unwrap_err();
            assert!(matches!(err, ConfigError::InvalidSpec { .. }), "accepted {bad}");
        }
    }

    #[test]
    fn duplicate_pool_ids_are_rejected() {
        let toml_str = format!("{MINIMAL}{MINIMAL}");
        let err = NodepoolConfig::from_toml_str(&toml_str).unwrap().resolve().unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn pool_ids_are_restricted() {
        for bad in ["", "a:b", "team/pool", "with space"] {
            let toml_str = format!(
                "[[pools]]\nid = \"{bad}\"\nmin_size = 1\nmax_size = 2\ndesired_size = 1\ntarget_utilization = 0.5"
            );
            let err = NodepoolConfig::from_toml_str(&toml_str).unwrap().resolve().unwrap_err();
            assert!(matches!(err, ConfigError::InvalidSpec { .. }), "accepted {bad:?}");
        }
    }

    #[test]
    fn empty_pool_list_is_rejected() {
        let err = NodepoolConfig::from_toml_str("").unwrap().resolve().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSetting { ref field, .. } if field == "pools"));
    }

    #[test]
    fn bad_tuning_is_rejected() {
        let cases = [
            "tick_interval = \"0s\"",
            "tick_interval = \"whenever\"",
            "hysteresis_margin = 1.0",
            "failure_threshold = 0",
            "backoff_cap_multiplier = 0",
        ];
        for case in cases {
            let toml_str = format!("[reconciler]\n{case}\n{MINIMAL}");
            let err = NodepoolConfig::from_toml_str(&toml_str).unwrap().resolve().unwrap_err();
            assert!(matches!(err, ConfigError::InvalidSetting { .. }), "accepted {case}");
        }
    }

    #[test]
    fn command_executor_needs_an_apply_template() {
        let toml_str = format!("[executor]\nkind = \"command\"\napply = \"  \"\n{MINIMAL}");
        let err = NodepoolConfig::from_toml_str(&toml_str).unwrap().resolve().unwrap_err();
        assert!(err.to_string().contains("executor.apply"));

        let toml_str = format!("[executor]\nkind = \"command\"\n{MINIMAL}");
        assert!(matches!(
            NodepoolConfig::from_toml_str(&toml_str),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn load_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodepool.toml");
        std::fs::write(&path, MINIMAL).unwrap();

        let settings = NodepoolConfig::load(&path).unwrap();
        assert_eq!(settings.pools[0].max_size, 6);

        let missing = NodepoolConfig::load(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Io { .. }));
    }

    #[test]
    fn bundled_sample_config_is_valid() {
        let sample = include_str!("../../../config/nodepool.toml");
        let settings = NodepoolConfig::from_toml_str(sample).unwrap().resolve().unwrap();
        assert_eq!(settings.executor, ExecutorSettings::Simulated);
        let ids: Vec<_> = settings.pools.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["general", "gpu"]);
        assert_eq!(settings.pools[1].scale_down_cooldown_secs, 900);
    }
}
