//! Agent Driver: spawns the external code-generating agent, streams its
//! structured stdout, and extracts running usage metrics. The driver
//! never interprets the semantic content of `done` — that is a stage
//! executor's job; the driver's contract ends at handing back the
//! final event verbatim.

pub mod cancel;
pub mod types;

pub use cancel::CancelToken;
pub use types::{AgentEvent, AgentOutcome, UsageMetrics};

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::context_monitor::{self, ContextMonitor, Pressure};
use crate::error::{RalphError, Result};

/// How long the driver waits for a child to die after a kill signal
/// before giving up and logging a manual-cleanup warning.
const KILL_GRACE: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct AgentDriver {
    /// Path to the external agent binary.
    pub agent_bin: PathBuf,
    /// Directory events for this run are logged to, one file per run.
    pub events_dir: PathBuf,
}

impl AgentDriver {
    pub fn new(agent_bin: impl Into<PathBuf>, events_dir: impl Into<PathBuf>) -> Self {
        AgentDriver {
            agent_bin: agent_bin.into(),
            events_dir: events_dir.into(),
        }
    }

    /// Run the agent with `prompt` in `cwd`, bounded by `stage_timeout`.
    /// `cancel` is polled between stdout lines; a requested cancel lets
    /// the current inflight line finish before returning `Cancelled`.
    /// `config` drives the live Context Monitor assessment of
    /// cumulative token usage as it streams in, not just a check after
    /// the child exits.
    pub async fn run(
        &self,
        prompt: &str,
        cwd: &Path,
        stage_timeout: Duration,
        cancel: &CancelToken,
        config: &Config,
    ) -> Result<AgentOutcome> {
        std::fs::create_dir_all(&self.events_dir)?;
        let events_log_path = self
            .events_dir
            .join(format!("{}.ndjson", crate::types::generate_hex(12)));

        let mut child = Command::new(&self.agent_bin)
            .current_dir(cwd)
            .arg("--prompt")
            .arg(prompt)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RalphError::Other("agent child had no stdout".to_string()))?;
        let mut lines = BufReader::new(stdout).lines();

        let mut events_log = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&events_log_path)
            .await?;

        let mut metrics = UsageMetrics::default();
        let mut final_event = None;
        let monitor = ContextMonitor::new(config);
        let mut warned = false;
        let mut compacted = false;
        let mut exploration_log: Vec<String> = Vec::new();
        let mut recent_errors: Vec<String> = Vec::new();

        let run_future = async {
            loop {
                if cancel.is_forced() {
                    return AgentOutcome::Cancelled {
                        metrics,
                        events_log_path: events_log_path.clone(),
                    };
                }

                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let _ = events_log.write_all(line.as_bytes()).await;
                        let _ = events_log.write_all(b"\n").await;

                        match serde_json::from_str::<AgentEvent>(&line) {
                            Ok(AgentEvent::Usage {
                                tokens_in,
                                tokens_out,
                                cost,
                            }) => metrics.accumulate(tokens_in, tokens_out, cost),
                            Ok(AgentEvent::Done { result }) => {
                                final_event = Some(result);
                            }
                            Ok(AgentEvent::ToolStarted { tool, .. }) => {
                                debug!(tool = %tool, "agent tool started");
                            }
                            Ok(AgentEvent::Message { text }) => {
                                if text.to_lowercase().contains("error") && recent_errors.len() < 10 {
                                    recent_errors.push(text.clone());
                                }
                                if exploration_log.len() < 200 {
                                    exploration_log.push(text);
                                }
                            }
                            Ok(_) => {}
                            Err(e) => {
                                warn!(error = %e, line = %line, "unparseable agent event");
                            }
                        }

                        match monitor.assess(metrics.total_tokens()) {
                            Pressure::Normal => {}
                            Pressure::Warn => {
                                if !warned {
                                    warned = true;
                                    warn!(
                                        pct = monitor.pct_used(metrics.total_tokens()),
                                        "context pressure: warn tier"
                                    );
                                }
                            }
                            Pressure::Compact => {
                                if !compacted {
                                    compacted = true;
                                    let task_name: String = prompt.chars().take(80).collect();
                                    let (summary, estimated_tokens) = context_monitor::compact(
                                        &task_name,
                                        prompt,
                                        None,
                                        &[],
                                        &recent_errors,
                                        &exploration_log,
                                    );
                                    info!(
                                        preserved = summary.preserved.len(),
                                        summarized = summary.summarized.len(),
                                        discarded = summary.discarded_count,
                                        estimated_tokens,
                                        "context compaction performed"
                                    );
                                    if estimated_tokens >= config.context_warn_threshold() {
                                        warn!(
                                            "compaction did not bring context below the warn \
                                             threshold; killing"
                                        );
                                        let _ = child.start_kill();
                                        let _ = timeout(KILL_GRACE, child.wait()).await;
                                        return AgentOutcome::ContextKilled {
                                            metrics,
                                            events_log_path: events_log_path.clone(),
                                        };
                                    }
                                }
                            }
                            Pressure::Kill => {
                                warn!("context pressure reached the kill tier; terminating agent");
                                let _ = child.start_kill();
                                let _ = timeout(KILL_GRACE, child.wait()).await;
                                return AgentOutcome::ContextKilled {
                                    metrics,
                                    events_log_path: events_log_path.clone(),
                                };
                            }
                        }

                        if cancel.is_requested() {
                            return AgentOutcome::Cancelled {
                                metrics,
                                events_log_path: events_log_path.clone(),
                            };
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "error reading agent stdout");
                        break;
                    }
                }
            }

            let status = child.wait().await.ok();
            AgentOutcome::Completed {
                exit_code: status.and_then(|s| s.code()).unwrap_or(-1),
                metrics,
                final_event,
                events_log_path: events_log_path.clone(),
            }
        };

        match timeout(stage_timeout, run_future).await {
            Ok(outcome) => Ok(outcome),
            Err(_) => {
                if let Err(e) = child.start_kill() {
                    warn!(error = %e, "failed to kill timed-out agent process");
                }
                match timeout(KILL_GRACE, child.wait()).await {
                    Ok(_) => {}
                    Err(_) => {
                        warn!("agent process did not terminate after kill; manual cleanup may be needed");
                    }
                }
                Ok(AgentOutcome::TimedOut {
                    metrics,
                    events_log_path,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_binary_surfaces_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let driver = AgentDriver::new(
            dir.path().join("does-not-exist"),
            dir.path().join("events"),
        );
        let result = driver
            .run(
                "hello",
                dir.path(),
                Duration::from_secs(1),
                &CancelToken::new(),
                &Config::default(),
            )
            .await;
        assert!(result.is_err());
    }
}
