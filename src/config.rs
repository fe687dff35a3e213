//! Session configuration and running metrics.
//!
//! Configuration is stored in `.tix/config.yaml`: models, context
//! thresholds, timeouts, breaker limits. `RALPH_PROFILE` selects an
//! alternate file (`.tix/config.<profile>.yaml`) so a repo can keep a
//! `ci` profile alongside the default.

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{RalphError, Result};
use crate::types::tix_root;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_model")]
    pub model_build: String,

    #[serde(default = "default_context_window")]
    pub context_window: u64,
    #[serde(default = "default_warn_pct")]
    pub context_warn_pct: u8,
    #[serde(default = "default_compact_pct")]
    pub context_compact_pct: u8,
    #[serde(default = "default_kill_pct")]
    pub context_kill_pct: u8,

    #[serde(default = "default_stage_timeout_ms")]
    pub stage_timeout_ms: u64,
    #[serde(default = "default_iteration_timeout_ms")]
    pub iteration_timeout_ms: u64,

    #[serde(default = "default_max_failures")]
    pub max_failures: u32,
    #[serde(default = "default_max_decompose_depth")]
    pub max_decompose_depth: u32,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    #[serde(default = "default_commit_prefix")]
    pub commit_prefix: String,

    /// Optional hard cost cap for the whole session; the breaker trips
    /// once `Metrics::cost` would exceed it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_cost_cap: Option<f64>,

    /// Minimum repeated-rejection and common-failure-pattern counts
    /// before the rejection analyzer reports an issue.
    #[serde(default = "default_rejection_threshold")]
    pub rejection_threshold: u32,

    /// Upper bound on concurrent subagents during INVESTIGATE/VERIFY
    /// fork/join fan-out.
    #[serde(default = "default_max_parallel_subagents")]
    pub max_parallel_subagents: usize,
}

fn default_model() -> String {
    "default".to_string()
}
fn default_context_window() -> u64 {
    200_000
}
fn default_warn_pct() -> u8 {
    70
}
fn default_compact_pct() -> u8 {
    85
}
fn default_kill_pct() -> u8 {
    95
}
fn default_stage_timeout_ms() -> u64 {
    300_000
}
fn default_iteration_timeout_ms() -> u64 {
    1_800_000
}
fn default_max_failures() -> u32 {
    3
}
fn default_max_decompose_depth() -> u32 {
    3
}
fn default_max_iterations() -> u32 {
    100
}
fn default_commit_prefix() -> String {
    "ralph:".to_string()
}
fn default_rejection_threshold() -> u32 {
    3
}
fn default_max_parallel_subagents() -> usize {
    4
}

impl Default for Config {
    fn default() -> Self {
        Config {
            model: default_model(),
            model_build: default_model(),
            context_window: default_context_window(),
            context_warn_pct: default_warn_pct(),
            context_compact_pct: default_compact_pct(),
            context_kill_pct: default_kill_pct(),
            stage_timeout_ms: default_stage_timeout_ms(),
            iteration_timeout_ms: default_iteration_timeout_ms(),
            max_failures: default_max_failures(),
            max_decompose_depth: default_max_decompose_depth(),
            max_iterations: default_max_iterations(),
            commit_prefix: default_commit_prefix(),
            session_cost_cap: None,
            rejection_threshold: default_rejection_threshold(),
            max_parallel_subagents: default_max_parallel_subagents(),
        }
    }
}

impl Config {
    pub fn config_path() -> PathBuf {
        match std::env::var("RALPH_PROFILE") {
            Ok(profile) if !profile.is_empty() => {
                tix_root().join(format!("config.{profile}.yaml"))
            }
            _ => tix_root().join("config.yaml"),
        }
    }

    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = fs::read_to_string(&path).map_err(|e| {
            RalphError::Io(std::io::Error::new(
                e.kind(),
                format!("failed to read config at {}: {e}", path.display()),
            ))
        })?;
        Ok(serde_yaml_ng::from_str(&content)?)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = serde_yaml_ng::to_string(self)?;
        fs::write(&path, content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }

    pub fn context_warn_threshold(&self) -> u64 {
        self.context_window * self.context_warn_pct as u64 / 100
    }

    pub fn context_compact_threshold(&self) -> u64 {
        self.context_window * self.context_compact_pct as u64 / 100
    }

    pub fn context_kill_threshold(&self) -> u64 {
        self.context_window * self.context_kill_pct as u64 / 100
    }
}

/// Per-session running totals. Each completed iteration's numbers are
/// also written onto the task it resolved as metadata rows (see
/// `cache::queries::put_meta`); this struct is the in-memory session
/// aggregate the orchestrator consults for breaker decisions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metrics {
    pub total_cost: f64,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub iterations_completed: u32,
    /// Iterations killed, keyed by kill reason (`context_limit`, `timeout`, …).
    pub iterations_killed: std::collections::BTreeMap<String, u32>,
    pub consecutive_failures: u32,
}

impl Metrics {
    pub fn record_usage(&mut self, tokens_in: u64, tokens_out: u64, cost: f64) {
        self.tokens_in += tokens_in;
        self.tokens_out += tokens_out;
        self.total_cost += cost;
    }

    pub fn record_success(&mut self) {
        self.iterations_completed += 1;
        self.consecutive_failures = 0;
    }

    pub fn record_failure(&mut self, reason: &str) {
        self.iterations_completed += 1;
        self.consecutive_failures += 1;
        *self.iterations_killed.entry(reason.to_string()).or_insert(0) += 1;
    }

    pub fn exceeds_cost_cap(&self, cap: Option<f64>) -> bool {
        cap.is_some_and(|cap| self.total_cost >= cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_defaults() {
        let config = Config::default();
        assert_eq!(config.context_warn_pct, 70);
        assert_eq!(config.context_compact_pct, 85);
        assert_eq!(config.context_kill_pct, 95);
        assert_eq!(config.max_failures, 3);
        assert_eq!(config.commit_prefix, "ralph:");
    }

    #[test]
    fn config_roundtrips_through_yaml() {
        let mut config = Config::default();
        config.model = "custom-model".to_string();
        let yaml = serde_yaml_ng::to_string(&config).unwrap();
        let parsed: Config = serde_yaml_ng::from_str(&yaml).unwrap();
        assert_eq!(parsed.model, "custom-model");
    }

    #[test]
    fn thresholds_scale_with_context_window() {
        let mut config = Config::default();
        config.context_window = 1000;
        assert_eq!(config.context_warn_threshold(), 700);
        assert_eq!(config.context_compact_threshold(), 850);
        assert_eq!(config.context_kill_threshold(), 950);
    }

    #[test]
    fn breaker_trips_at_consecutive_failures() {
        let mut metrics = Metrics::default();
        for _ in 0..3 {
            metrics.record_failure("timeout");
        }
        assert_eq!(metrics.consecutive_failures, 3);
        metrics.record_success();
        assert_eq!(metrics.consecutive_failures, 0);
    }
}
