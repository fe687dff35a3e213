//! Core entity types: tickets, tombstones, and the small enums that
//! travel with them. Mirrors the shape the plan log and ticket cache
//! agree on — see `log::types` for the wire encoding of these values.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use unicase::UniCase;

use crate::error::RalphError;

/// Root directory for a session's `tix` state, default `.tix`.
///
/// Resolution order: `TIX_ROOT` env var, else `.tix` relative to cwd.
pub fn tix_root() -> PathBuf {
    if let Ok(root) = std::env::var("TIX_ROOT") {
        PathBuf::from(root)
    } else {
        PathBuf::from(".tix")
    }
}

pub fn plan_log_path() -> PathBuf {
    tix_root().join("plan.jsonl")
}

pub fn cache_db_path() -> PathBuf {
    tix_root().join("cache.db")
}

pub const MAX_LABELS: usize = 32;
pub const MAX_NAME_BYTES: usize = 512;

/// Current time as Unix seconds, the unit every timestamp field in the
/// ticket/cache/log model uses.
pub fn now_unix() -> i64 {
    jiff::Timestamp::now().as_second()
}

/// Current time as an ISO-8601 string (no fractional seconds), used
/// for the human-readable `done_at` field.
pub fn iso_now() -> String {
    jiff::Timestamp::now().strftime("%Y-%m-%dT%H:%M:%SZ").to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TicketType {
    #[default]
    Task,
    Issue,
    Note,
}

impl TicketType {
    pub fn prefix(self) -> char {
        match self {
            TicketType::Task => 't',
            TicketType::Issue => 'i',
            TicketType::Note => 'n',
        }
    }
}

impl fmt::Display for TicketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TicketType::Task => write!(f, "task"),
            TicketType::Issue => write!(f, "issue"),
            TicketType::Note => write!(f, "note"),
        }
    }
}

impl FromStr for TicketType {
    type Err = RalphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = UniCase::new(s);
        if s == UniCase::new("task") || s == UniCase::new("t") {
            Ok(TicketType::Task)
        } else if s == UniCase::new("issue") || s == UniCase::new("i") {
            Ok(TicketType::Issue)
        } else if s == UniCase::new("note") || s == UniCase::new("n") {
            Ok(TicketType::Note)
        } else {
            Err(RalphError::InvalidArg(format!("invalid ticket type '{s}'")))
        }
    }
}

/// Status codes as stored in both the log (`p`/`d`/`a`/`r`/`x`) and the
/// cache (integer). `status < 2` is the "still pending work" cutoff
/// TQL's default exclusion relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    #[default]
    Pending,
    Done,
    Accepted,
    Rejected,
    Deleted,
}

impl TicketStatus {
    pub fn as_code(self) -> i64 {
        match self {
            TicketStatus::Pending => 0,
            TicketStatus::Done => 1,
            TicketStatus::Accepted => 2,
            TicketStatus::Rejected => 3,
            TicketStatus::Deleted => 4,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(TicketStatus::Pending),
            1 => Some(TicketStatus::Done),
            2 => Some(TicketStatus::Accepted),
            3 => Some(TicketStatus::Rejected),
            4 => Some(TicketStatus::Deleted),
            _ => None,
        }
    }

    /// Single-letter log code: `p`, `d`, `a`, `r`, `x`.
    pub fn log_char(self) -> char {
        match self {
            TicketStatus::Pending => 'p',
            TicketStatus::Done => 'd',
            TicketStatus::Accepted => 'a',
            TicketStatus::Rejected => 'r',
            TicketStatus::Deleted => 'x',
        }
    }

    pub fn from_log_char(c: char) -> Option<Self> {
        match c {
            'p' => Some(TicketStatus::Pending),
            'd' => Some(TicketStatus::Done),
            'a' => Some(TicketStatus::Accepted),
            'r' => Some(TicketStatus::Rejected),
            'x' => Some(TicketStatus::Deleted),
            _ => None,
        }
    }

    /// Resolved tickets (status >= 2) are excluded from default queries.
    pub fn is_resolved(self) -> bool {
        self.as_code() >= 2
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TicketStatus::Pending => write!(f, "pending"),
            TicketStatus::Done => write!(f, "done"),
            TicketStatus::Accepted => write!(f, "accepted"),
            TicketStatus::Rejected => write!(f, "rejected"),
            TicketStatus::Deleted => write!(f, "deleted"),
        }
    }
}

impl FromStr for TicketStatus {
    type Err = RalphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = UniCase::new(s);
        if s == UniCase::new("pending") {
            Ok(TicketStatus::Pending)
        } else if s == UniCase::new("done") {
            Ok(TicketStatus::Done)
        } else if s == UniCase::new("accepted") {
            Ok(TicketStatus::Accepted)
        } else if s == UniCase::new("rejected") {
            Ok(TicketStatus::Rejected)
        } else if s == UniCase::new("deleted") {
            Ok(TicketStatus::Deleted)
        } else {
            Err(RalphError::InvalidArg(format!("invalid status '{s}'")))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TicketPriority {
    #[default]
    None,
    Low,
    Medium,
    High,
}

impl TicketPriority {
    pub fn as_code(self) -> i64 {
        match self {
            TicketPriority::None => 0,
            TicketPriority::Low => 1,
            TicketPriority::Medium => 2,
            TicketPriority::High => 3,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(TicketPriority::None),
            1 => Some(TicketPriority::Low),
            2 => Some(TicketPriority::Medium),
            3 => Some(TicketPriority::High),
            _ => None,
        }
    }
}

impl fmt::Display for TicketPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TicketPriority::None => write!(f, "none"),
            TicketPriority::Low => write!(f, "low"),
            TicketPriority::Medium => write!(f, "medium"),
            TicketPriority::High => write!(f, "high"),
        }
    }
}

impl FromStr for TicketPriority {
    type Err = RalphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = UniCase::new(s);
        if s == UniCase::new("none") {
            Ok(TicketPriority::None)
        } else if s == UniCase::new("low") {
            Ok(TicketPriority::Low)
        } else if s == UniCase::new("medium") {
            Ok(TicketPriority::Medium)
        } else if s == UniCase::new("high") {
            Ok(TicketPriority::High)
        } else {
            Err(RalphError::InvalidArg(format!("invalid priority '{s}'")))
        }
    }
}

/// The unit of scheduled work: a task, issue, or note.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: String,
    #[serde(rename = "type")]
    pub ticket_type: TicketType,
    pub status: TicketStatus,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accept: Option<String>,
    #[serde(default)]
    pub priority: TicketPriority,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deps: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supersedes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supersedes_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default)]
    pub kill_reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kill_log: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default)]
    pub resolved_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compacted_at: Option<i64>,

    /// Denormalized display fields, populated from the referenced ticket
    /// at write time so listings avoid a join.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_from_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supersedes_name: Option<String>,
}

impl Ticket {
    pub fn new(ticket_type: TicketType, name: impl Into<String>, now: i64) -> Self {
        Ticket {
            id: generate_ticket_id(ticket_type),
            ticket_type,
            status: TicketStatus::Pending,
            name: name.into(),
            spec: None,
            notes: None,
            accept: None,
            priority: TicketPriority::default(),
            deps: Vec::new(),
            parent: None,
            created_from: None,
            supersedes: None,
            supersedes_reason: None,
            labels: Vec::new(),
            author: None,
            done_at: None,
            branch: None,
            kill_reason: String::new(),
            kill_log: None,
            created_at: now,
            updated_at: now,
            resolved_at: 0,
            compacted_at: None,
            created_from_name: None,
            supersedes_name: None,
        }
    }

    pub fn is_killed(&self) -> bool {
        !self.kill_reason.is_empty()
    }

    pub fn push_label(&mut self, label: impl Into<String>) -> crate::error::Result<()> {
        let label = label.into();
        if self.labels.contains(&label) {
            return Ok(());
        }
        if self.labels.len() >= MAX_LABELS {
            return Err(RalphError::Overflow(format!(
                "ticket '{}' already has the maximum of {MAX_LABELS} labels",
                self.id
            )));
        }
        self.labels.push(label);
        Ok(())
    }
}

/// A permanent accept/reject record. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tombstone {
    pub id: String,
    pub done_at: String,
    pub reason: Option<String>,
    pub name: String,
    pub is_accept: bool,
    pub timestamp: i64,
}

/// Generate a ticket id of the form `{prefix}-{8 lowercase hex}`.
pub fn generate_ticket_id(ticket_type: TicketType) -> String {
    format!("{}-{}", ticket_type.prefix(), generate_hex(8))
}

/// Generate `length` lowercase hex characters from process entropy.
pub fn generate_hex(length: usize) -> String {
    use rand::Rng;
    let num_bytes = length.div_ceil(2);
    let mut buf = vec![0u8; num_bytes];
    rand::rng().fill(&mut buf[..]);
    let hex: String = buf.iter().map(|b| format!("{b:02x}")).collect();
    hex[..length].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticket_status_ordering_matches_codes() {
        assert!(TicketStatus::Pending < TicketStatus::Done);
        assert!(TicketStatus::Done < TicketStatus::Accepted);
        assert!(!TicketStatus::Pending.is_resolved());
        assert!(TicketStatus::Accepted.is_resolved());
        assert!(TicketStatus::Rejected.is_resolved());
    }

    #[test]
    fn ticket_status_log_char_roundtrip() {
        for s in [
            TicketStatus::Pending,
            TicketStatus::Done,
            TicketStatus::Accepted,
            TicketStatus::Rejected,
            TicketStatus::Deleted,
        ] {
            assert_eq!(TicketStatus::from_log_char(s.log_char()), Some(s));
        }
    }

    #[test]
    fn ticket_type_from_str_case_insensitive() {
        assert_eq!("TASK".parse::<TicketType>().unwrap(), TicketType::Task);
        assert_eq!("Issue".parse::<TicketType>().unwrap(), TicketType::Issue);
        assert!("bogus".parse::<TicketType>().is_err());
    }

    #[test]
    fn generated_id_has_expected_shape() {
        let id = generate_ticket_id(TicketType::Task);
        assert!(id.starts_with("t-"));
        assert_eq!(id.len(), 10);
        assert!(id[2..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn push_label_dedups_and_caps() {
        let mut t = Ticket::new(TicketType::Task, "x", 0);
        t.push_label("a").unwrap();
        t.push_label("a").unwrap();
        assert_eq!(t.labels, vec!["a".to_string()]);
        for i in 0..MAX_LABELS - 1 {
            t.push_label(format!("l{i}")).unwrap();
        }
        assert_eq!(t.labels.len(), MAX_LABELS);
        assert!(t.push_label("overflow").is_err());
    }
}
