//! The plan log: an append-only, newline-delimited JSON file that is
//! the single source of truth for ticket state. The ticket cache is a
//! rebuildable index over it; nothing here ever edits a line in place.

pub mod types;

pub use types::{
    AcceptEventFields, DeleteEventFields, InboxEventFields, MetaValue, PlanEvent,
    RejectEventFields, SpecEventFields, StageEventFields, TicketEventFields,
};

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{RalphError, Result};
use crate::types::plan_log_path;

/// A line that failed to parse: 1-based line number plus message, so
/// the replayer can log a `parse` warning and keep going.
#[derive(Debug, Clone)]
pub struct ParseWarning {
    pub line: usize,
    pub message: String,
}

/// Result of reading the whole log: well-formed events in order, plus
/// any lines that failed to parse.
#[derive(Debug, Default)]
pub struct ReadOutcome {
    pub events: Vec<PlanEvent>,
    pub warnings: Vec<ParseWarning>,
}

/// Append one event to the log at `path`. Opens in append mode, writes
/// exactly one JSON line terminated by `\n`, flushes, and closes —
/// mirroring the single-`write(2)`-per-line contract §5 relies on for
/// crash safety.
pub fn append_event(path: &Path, event: &PlanEvent) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let json = serde_json::to_string(event)?;
    writeln!(file, "{json}")?;
    file.flush()?;
    Ok(())
}

pub fn append_event_default(event: &PlanEvent) -> Result<()> {
    append_event(&plan_log_path(), event)
}

/// Read and parse every line in the log. Blank lines and lines whose
/// first non-whitespace character is `#` are ignored. A line that
/// fails to parse as JSON, or parses but doesn't match any known event
/// shape, is recorded as a warning — the replay never aborts on a
/// malformed line.
pub fn read_events(path: &Path) -> Result<ReadOutcome> {
    let mut outcome = ReadOutcome::default();
    if !path.exists() {
        return Ok(outcome);
    }

    let file = std::fs::File::open(path)?;
    let reader = BufReader::new(file);

    for (idx, line) in reader.lines().enumerate() {
        let line_no = idx + 1;
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                outcome.warnings.push(ParseWarning {
                    line: line_no,
                    message: e.to_string(),
                });
                continue;
            }
        };

        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        match serde_json::from_str::<PlanEvent>(trimmed) {
            Ok(event) => outcome.events.push(event),
            Err(e) => {
                warn!(line = line_no, error = %e, "malformed plan log line");
                outcome.warnings.push(ParseWarning {
                    line: line_no,
                    message: e.to_string(),
                });
            }
        }
    }

    Ok(outcome)
}

pub fn read_events_default() -> Result<ReadOutcome> {
    read_events(&plan_log_path())
}

/// Byte size of the log file, used by the cache staleness check
/// (`cache_meta.last_log_size`). Zero if the file does not exist.
pub fn log_size(path: &Path) -> Result<u64> {
    match std::fs::metadata(path) {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(RalphError::Io(e)),
    }
}

pub fn log_size_default() -> Result<u64> {
    log_size(&plan_log_path())
}

/// Rewrite the log atomically: write to a temp file in the same
/// directory, then rename over the original. Used by `plan_compact`;
/// never used for ordinary event appends.
pub fn rewrite_log(path: &Path, lines: &[String]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    for line in lines {
        writeln!(tmp, "{line}")?;
    }
    tmp.flush()?;
    tmp.persist(path)
        .map_err(|e| RalphError::Io(e.error))?;
    Ok(())
}

pub fn default_plan_log_path() -> PathBuf {
    plan_log_path()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::types::TicketEventFields;

    #[test]
    fn append_then_read_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.jsonl");

        let event = PlanEvent::Task(TicketEventFields {
            id: "t-aaaa0001".to_string(),
            name: Some("build a thing".to_string()),
            s: Some("p".to_string()),
            ..Default::default()
        });
        append_event(&path, &event).unwrap();

        let outcome = read_events(&path).unwrap();
        assert_eq!(outcome.events.len(), 1);
        assert!(outcome.warnings.is_empty());
        assert_eq!(outcome.events[0].kind(), "task");
    }

    #[test]
    fn malformed_line_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.jsonl");
        std::fs::write(&path, "not json at all\n{\"t\":\"delete\",\"id\":\"t-x\"}\n").unwrap();

        let outcome = read_events(&path).unwrap();
        assert_eq!(outcome.events.len(), 1);
        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(outcome.warnings[0].line, 1);
    }

    #[test]
    fn blank_and_comment_lines_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.jsonl");
        std::fs::write(&path, "\n# a comment\n{\"t\":\"delete\",\"id\":\"t-x\"}\n").unwrap();

        let outcome = read_events(&path).unwrap();
        assert_eq!(outcome.events.len(), 1);
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn log_size_reflects_bytes_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.jsonl");
        assert_eq!(log_size(&path).unwrap(), 0);

        let event = PlanEvent::Delete(DeleteEventFields {
            id: "t-aaaa0001".to_string(),
        });
        append_event(&path, &event).unwrap();
        assert!(log_size(&path).unwrap() > 0);
    }
}
