//! TQL abstract syntax: one `Query` per pipeline, built directly by
//! the parser and consumed only by the compiler.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Tasks,
    Issues,
    Notes,
    Tickets,
    Tombstones,
}

impl Source {
    pub fn parse(s: &str) -> Option<Source> {
        match s {
            "tasks" => Some(Source::Tasks),
            "issues" => Some(Source::Issues),
            "notes" => Some(Source::Notes),
            "tickets" => Some(Source::Tickets),
            "tombstones" => Some(Source::Tombstones),
            _ => None,
        }
    }

    /// Whether this source draws from the `tickets` table (as opposed
    /// to `tombstones`), and if so which `type` value it's restricted to.
    pub fn ticket_type_filter(self) -> Option<&'static str> {
        match self {
            Source::Tasks => Some("task"),
            Source::Issues => Some("issue"),
            Source::Notes => Some("note"),
            Source::Tickets => None,
            Source::Tombstones => None,
        }
    }

    pub fn table(self) -> &'static str {
        match self {
            Source::Tombstones => "tombstones",
            _ => "tickets",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Source::Tasks => "tasks",
            Source::Issues => "issues",
            Source::Notes => "notes",
            Source::Tickets => "tickets",
            Source::Tombstones => "tombstones",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    NotEq,
    Gt,
    Lt,
    Gte,
    Lte,
}

/// A raw filter value as written in the query text, before the
/// compiler resolves enum sugar or numeric parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawValue {
    /// `field=` or `field!=` with no operand: IS NULL / IS NOT NULL.
    Empty,
    List(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct FilterClause {
    pub field: String,
    pub op: FilterOp,
    pub value: RawValue,
    /// `!field=val` form: wrap the compiled predicate in `NOT (...)`.
    pub negated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggKind {
    Count,
    Sum,
    Avg,
    Min,
    Max,
    CountDistinct,
}

#[derive(Debug, Clone)]
pub struct Aggregate {
    pub kind: AggKind,
    pub column: Option<String>,
}

#[derive(Debug, Clone)]
pub enum Clause {
    Filter(FilterClause),
    Select(Vec<String>),
    Sort { field: String, desc: bool },
    Limit(i64),
    Offset(i64),
    Distinct,
    Group(String),
    Aggregate(Aggregate),
    Having(FilterClause),
}

#[derive(Debug, Clone)]
pub struct Query {
    pub source: Source,
    pub all: bool,
    pub clauses: Vec<Clause>,
}

impl Query {
    pub fn has_status_filter(&self) -> bool {
        self.clauses.iter().any(|c| {
            matches!(c, Clause::Filter(f) if f.field == "status")
        })
    }
}
