//! Engine-wide error type.
//!
//! Every tagged kind in the error handling design has a corresponding
//! variant here; the orchestrator and CLI both match on these variants
//! to decide whether to recover, retry, or surface a failure to the
//! user as a final JSON status document.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RalphError {
    /// Bad input from a caller. Surfaced; never retried.
    #[error("invalid argument: {0}")]
    InvalidArg(String),

    /// Ticket, id, or file missing. Surfaced; caller decides.
    #[error("not found: {0}")]
    NotFound(String),

    /// File, subprocess, or git failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSONL line. Logged with a line number; replay continues.
    #[error("parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    /// Buffer / bind / label count limit exceeded.
    #[error("overflow: {0}")]
    Overflow(String),

    /// Duplicate id or inconsistent tombstone.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Stage or iteration wall-clock exceeded. Routes to DECOMPOSE.
    #[error("timeout after {seconds}s running {what}")]
    Timeout { what: String, seconds: u64 },

    /// Context monitor kill. Routes to DECOMPOSE.
    #[error("context limit exceeded: {0}")]
    ContextLimit(String),

    /// User interrupt. Clean exit.
    #[error("cancelled")]
    Cancelled,

    /// Too many consecutive failures. Aborts the session.
    #[error("breaker tripped: {0}")]
    Breaker(String),

    #[error("cache error: {0}")]
    Cache(#[from] crate::cache::CacheError),

    #[error("query error: {0}")]
    Query(#[from] crate::query::QueryError),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl RalphError {
    /// The `spec.md` §7 error-kind tag, for JSON status documents and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            RalphError::InvalidArg(_) => "invalid_arg",
            RalphError::NotFound(_) => "not_found",
            RalphError::Io(_) => "io",
            RalphError::Parse { .. } => "parse",
            RalphError::Overflow(_) => "overflow",
            RalphError::Conflict(_) => "conflict",
            RalphError::Timeout { .. } => "timeout",
            RalphError::ContextLimit(_) => "context_limit",
            RalphError::Cancelled => "cancelled",
            RalphError::Breaker(_) => "breaker",
            RalphError::Cache(_) => "io",
            RalphError::Query(_) => "invalid_arg",
            RalphError::Yaml(_) | RalphError::Json(_) => "parse",
            RalphError::Other(_) => "invalid_arg",
        }
    }

    /// Whether the orchestrator should route around this failure rather
    /// than abort the session outright.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            RalphError::Timeout { .. } | RalphError::ContextLimit(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, RalphError>;
