//! Event shapes the agent subprocess is allowed to emit on stdout.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One line of the agent's stdout stream. The driver depends only on
/// `usage` (running totals) and `done` (terminal outcome); `tool.*`
/// and `message` are forwarded for logging but carry no semantics the
/// driver itself interprets — that belongs to the stage executor that
/// reads `final_event`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum AgentEvent {
    #[serde(rename = "tool.started")]
    ToolStarted {
        tool: String,
        #[serde(default)]
        params: Value,
    },
    #[serde(rename = "tool.result")]
    ToolResult {
        #[serde(default)]
        result: Value,
    },
    #[serde(rename = "usage")]
    Usage {
        tokens_in: u64,
        tokens_out: u64,
        #[serde(default)]
        cost: f64,
    },
    #[serde(rename = "message")]
    Message { text: String },
    #[serde(rename = "done")]
    Done {
        #[serde(default)]
        result: Value,
    },
}

/// Cumulative token/cost usage observed across an agent run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct UsageMetrics {
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub cost: f64,
}

impl UsageMetrics {
    pub fn accumulate(&mut self, tokens_in: u64, tokens_out: u64, cost: f64) {
        self.tokens_in += tokens_in;
        self.tokens_out += tokens_out;
        self.cost += cost;
    }

    pub fn total_tokens(&self) -> u64 {
        self.tokens_in + self.tokens_out
    }
}

/// Outcome returned by the Agent Driver to a stage executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AgentOutcome {
    /// The child exited; `final_event` is the last `done` event seen,
    /// if any.
    Completed {
        exit_code: i32,
        metrics: UsageMetrics,
        final_event: Option<Value>,
        events_log_path: std::path::PathBuf,
    },
    TimedOut {
        metrics: UsageMetrics,
        events_log_path: std::path::PathBuf,
    },
    /// The Context Monitor's kill tier fired mid-stream (or compaction
    /// failed to bring usage back under the warn threshold); the child
    /// was terminated before it reached its own `done` event.
    ContextKilled {
        metrics: UsageMetrics,
        events_log_path: std::path::PathBuf,
    },
    Cancelled {
        metrics: UsageMetrics,
        events_log_path: std::path::PathBuf,
    },
}
