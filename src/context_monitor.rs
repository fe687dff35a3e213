//! Tiered token-pressure handling: warn, compact, kill. Consumes the
//! cumulative token count the Agent Driver reports and decides what
//! the stage executor should do next.

use serde::{Deserialize, Serialize};

use crate::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Pressure {
    Normal,
    Warn,
    Compact,
    Kill,
}

pub struct ContextMonitor<'a> {
    config: &'a Config,
}

impl<'a> ContextMonitor<'a> {
    pub fn new(config: &'a Config) -> Self {
        ContextMonitor { config }
    }

    /// Classify `tokens_used` against the configured thresholds.
    pub fn assess(&self, tokens_used: u64) -> Pressure {
        if tokens_used >= self.config.context_kill_threshold() {
            Pressure::Kill
        } else if tokens_used >= self.config.context_compact_threshold() {
            Pressure::Compact
        } else if tokens_used >= self.config.context_warn_threshold() {
            Pressure::Warn
        } else {
            Pressure::Normal
        }
    }

    pub fn pct_used(&self, tokens_used: u64) -> u8 {
        if self.config.context_window == 0 {
            return 0;
        }
        ((tokens_used as f64 / self.config.context_window as f64) * 100.0).round() as u8
    }
}

/// A (lossy) summary of conversation state produced by compaction,
/// ordered by the priority the spec assigns: preserve first, then
/// summarize, discard the rest.
#[derive(Debug, Clone, Default)]
pub struct CompactionSummary {
    pub preserved: Vec<String>,
    pub summarized: Vec<String>,
    pub discarded_count: usize,
}

/// Apply the preserve/summarize/discard policy to a raw transcript of
/// iteration log lines. Returns the summary plus an estimate of the
/// resulting token count (roughly 4 chars/token, matching the
/// driver's own accounting granularity).
pub fn compact(
    task_name: &str,
    task_notes: &str,
    task_accept: Option<&str>,
    active_edit_paths: &[String],
    recent_errors: &[String],
    exploration_log: &[String],
) -> (CompactionSummary, u64) {
    let mut summary = CompactionSummary::default();

    summary.preserved.push(format!("task: {task_name}"));
    summary.preserved.push(format!("notes: {task_notes}"));
    if let Some(accept) = task_accept {
        summary.preserved.push(format!("accept: {accept}"));
    }
    for path in active_edit_paths {
        summary.preserved.push(format!("active edit: {path}"));
    }
    for error in recent_errors.iter().take(5) {
        summary.preserved.push(format!("recent error: {error}"));
    }

    for entry in exploration_log {
        summary.summarized.push(summarize_line(entry));
    }
    summary.discarded_count = exploration_log.len();

    let char_count: usize = summary
        .preserved
        .iter()
        .chain(summary.summarized.iter())
        .map(|s| s.len())
        .sum();
    let estimated_tokens = (char_count / 4) as u64;

    (summary, estimated_tokens)
}

fn summarize_line(line: &str) -> String {
    if line.len() <= 120 {
        return line.to_string();
    }
    format!("{}… ({} chars)", &line[..117], line.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        let mut c = Config::default();
        c.context_window = 1000;
        c
    }

    #[test]
    fn assesses_normal_below_warn() {
        let c = config();
        let monitor = ContextMonitor::new(&c);
        assert_eq!(monitor.assess(600), Pressure::Normal);
    }

    #[test]
    fn assesses_warn_then_compact_then_kill() {
        let c = config();
        let monitor = ContextMonitor::new(&c);
        assert_eq!(monitor.assess(700), Pressure::Warn);
        assert_eq!(monitor.assess(850), Pressure::Compact);
        assert_eq!(monitor.assess(950), Pressure::Kill);
    }

    #[test]
    fn compaction_preserves_task_identity_first() {
        let (summary, _) = compact("build the thing", "do X then Y", Some("tests pass"), &[], &[], &[]);
        assert!(summary.preserved[0].contains("build the thing"));
    }
}
