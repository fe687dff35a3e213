//! Stage executors: INVESTIGATE, BUILD, VERIFY, DECOMPOSE.
//!
//! Each executor is a function of the store at entry that returns the
//! events it wants applied; it never writes to the store itself. The
//! orchestrator applies `new_events` in order after the executor
//! returns, which is what keeps subagent fan-out from racing a write.

pub mod build;
pub mod decompose;
pub mod investigate;
pub mod verify;

use std::path::Path;
use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::agent::{AgentDriver, AgentOutcome, CancelToken, UsageMetrics};
use crate::config::Config;
use crate::error::{RalphError, Result};
use crate::log::PlanEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Investigate,
    Build,
    Verify,
    Decompose,
    Complete,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Investigate => "investigate",
            Stage::Build => "build",
            Stage::Verify => "verify",
            Stage::Decompose => "decompose",
            Stage::Complete => "complete",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
    Skip,
}

/// What a stage executor hands back to the orchestrator: the events it
/// wants applied, and an optional hint about what to run next.
#[derive(Debug, Clone)]
pub struct StageResult {
    pub outcome: Outcome,
    pub new_events: Vec<PlanEvent>,
    pub next_hint: Option<Stage>,
    /// Token/cost usage observed across this stage's agent call(s), for
    /// the orchestrator's session-cost breaker.
    pub usage: UsageMetrics,
}

impl StageResult {
    pub fn skip() -> Self {
        StageResult {
            outcome: Outcome::Skip,
            new_events: Vec::new(),
            next_hint: None,
            usage: UsageMetrics::default(),
        }
    }

    pub fn success(new_events: Vec<PlanEvent>) -> Self {
        StageResult {
            outcome: Outcome::Success,
            new_events,
            next_hint: None,
            usage: UsageMetrics::default(),
        }
    }

    pub fn failure(new_events: Vec<PlanEvent>) -> Self {
        StageResult {
            outcome: Outcome::Failure,
            new_events,
            next_hint: None,
            usage: UsageMetrics::default(),
        }
    }

    pub fn with_hint(mut self, stage: Stage) -> Self {
        self.next_hint = Some(stage);
        self
    }

    pub fn with_usage(mut self, usage: UsageMetrics) -> Self {
        self.usage = usage;
        self
    }
}

/// Run the agent bounded by `config.stage_timeout_ms` and decode its
/// final `done` payload as `T`. A timeout, missing `done` event, or
/// cancellation all surface as `Result::Err` — callers map these onto
/// a `kill_reason` rather than propagating a panic.
pub async fn invoke_agent<T: DeserializeOwned>(
    driver: &AgentDriver,
    prompt: &str,
    cwd: &Path,
    config: &Config,
    cancel: &CancelToken,
) -> Result<(T, UsageMetrics)> {
    let stage_timeout = Duration::from_millis(config.stage_timeout_ms);
    match driver.run(prompt, cwd, stage_timeout, cancel, config).await? {
        AgentOutcome::Completed {
            final_event: Some(value),
            metrics,
            ..
        } => {
            let parsed = serde_json::from_value(value).map_err(|e| RalphError::Parse {
                line: 0,
                message: format!("agent reply did not match the expected shape: {e}"),
            })?;
            Ok((parsed, metrics))
        }
        AgentOutcome::Completed {
            final_event: None, ..
        } => Err(RalphError::Other(
            "agent exited without emitting a done event".to_string(),
        )),
        AgentOutcome::TimedOut { .. } => Err(RalphError::Timeout {
            what: "agent stage".to_string(),
            seconds: stage_timeout.as_secs(),
        }),
        AgentOutcome::ContextKilled { .. } => Err(RalphError::ContextLimit(
            "agent stage".to_string(),
        )),
        AgentOutcome::Cancelled { .. } => Err(RalphError::Cancelled),
    }
}

/// Validation shared by INVESTIGATE/DECOMPOSE replies: notes must carry
/// enough substance to act on and name a place in the source tree.
pub fn notes_reference_source(notes: &str) -> bool {
    notes.contains('/') || notes.contains('.') && notes.split_whitespace().count() > 1
}

pub fn notes_are_substantial(notes: &str, min_len: usize) -> bool {
    notes.trim().len() >= min_len
}
