//! Command-line surface: argument parsing only. Dispatch lives in
//! `commands`, matching the split the teacher's `cli.rs` uses.

use clap::{Parser, Subcommand};

use crate::error::Result;

#[derive(Debug, Parser)]
#[command(name = "tix")]
#[command(about = "Autonomous construct-mode engine and tix plan store")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Create the `.tix/` layout and an empty plan log
    Init,

    /// Run the state machine until COMPLETE or a breaker trips
    Construct {
        /// Path to the spec file driving this session (default: spec.md)
        spec: Option<String>,
    },

    /// Run only the PLAN entry: break a spec into initial tasks/issues, then prioritize
    Plan {
        spec: Option<String>,
    },

    /// Compile and execute a Ticket Query Language expression
    Query {
        tql: String,
    },

    /// Human-readable session dashboard (the one command exempt from JSON output)
    Status,

    /// Aggregate reports over resolved tickets
    Report {
        #[command(subcommand)]
        kind: ReportKind,
    },

    /// Scored keyword search over name/notes/accept
    Search {
        query: String,
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },

    /// Dependency tree, rooted at `id` or showing every root ticket
    Tree {
        id: Option<String>,
    },

    /// Integrity scan: cycles, broken refs, tombstone coherence
    Validate,

    /// Task ticket mutations
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },

    /// Issue ticket mutations
    Issue {
        #[command(subcommand)]
        action: IssueAction,
    },

    /// Apply a batch of plan-log events from a JSONL or JSON-array file
    Batch {
        path: String,
    },

    /// Rewrite the log, dropping committed+resolved tickets
    Compact,
}

#[derive(Debug, Subcommand)]
pub enum ReportKind {
    Velocity,
    Actors,
    Models,
}

#[derive(Debug, Subcommand)]
pub enum TaskAction {
    /// Create a new task
    Add {
        name: String,
        #[arg(long)]
        notes: Option<String>,
        #[arg(long)]
        accept: Option<String>,
        #[arg(long, default_value = "none")]
        priority: String,
        #[arg(long, value_delimiter = ',')]
        deps: Vec<String>,
    },
    /// Mark a task done (BUILD's normal exit, available as a manual override)
    Done {
        id: String,
    },
    /// Accept a task, writing its tombstone
    Accept {
        id: String,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Reject a task and reopen it as pending
    Reject {
        id: String,
        #[arg(long)]
        reason: String,
    },
    /// Delete a task
    Delete {
        id: String,
    },
    /// Recompute priority for every pending task
    Prioritize,
    /// Set a field (name, notes, accept, priority) on a task
    Update {
        id: String,
        field: String,
        value: String,
    },
}

#[derive(Debug, Subcommand)]
pub enum IssueAction {
    /// Create a new issue
    Add {
        name: String,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Accept a single issue
    Done {
        id: String,
    },
    /// Accept every pending issue
    DoneAll,
    /// Accept a specific set of issues by id
    DoneIds {
        ids: Vec<String>,
    },
}

impl Commands {
    pub async fn run(self) -> Result<()> {
        use crate::commands::*;
        match self {
            Commands::Init => cmd_init().await,
            Commands::Construct { spec } => cmd_construct(spec).await,
            Commands::Plan { spec } => cmd_plan(spec).await,
            Commands::Query { tql } => cmd_query(&tql).await,
            Commands::Status => cmd_status().await,
            Commands::Report { kind } => cmd_report(kind).await,
            Commands::Search { query, limit } => cmd_search(&query, limit).await,
            Commands::Tree { id } => cmd_tree(id).await,
            Commands::Validate => cmd_validate().await,
            Commands::Task { action } => action.run().await,
            Commands::Issue { action } => action.run().await,
            Commands::Batch { path } => cmd_batch(&path).await,
            Commands::Compact => cmd_compact().await,
        }
    }
}
