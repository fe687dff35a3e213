//! Command handlers: one function per `cli::Commands` leaf, each
//! opening the store itself rather than threading it through from
//! `main`, the way the teacher's `commands::cmd_*` functions do.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::agent::{AgentDriver, CancelToken};
use crate::cache::SimpleFilter;
use crate::cli::{IssueAction, ReportKind, TaskAction};
use crate::config::Config;
use crate::error::{RalphError, Result};
use crate::log::PlanEvent;
use crate::orchestrator::{Orchestrator, SessionOutcome};
use crate::prioritize;
use crate::stages::invoke_agent;
use crate::store::{ticket_to_event, PlanStore};
use crate::types::{now_unix, Ticket, TicketPriority, TicketStatus, TicketType};
use unicase::UniCase;

fn repo_root() -> PathBuf {
    PathBuf::from(".")
}

async fn open_store() -> Result<PlanStore> {
    PlanStore::open(repo_root()).await
}

fn agent_bin() -> PathBuf {
    std::env::var_os("RALPH_AGENT_BIN")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("ralph-agent"))
}

fn project_rules() -> String {
    std::fs::read_to_string(crate::types::tix_root().join("RULES.md")).unwrap_or_default()
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn cmd_init() -> Result<()> {
    let root = crate::types::tix_root();
    std::fs::create_dir_all(&root)?;
    std::fs::create_dir_all(root.join("events"))?;
    let log_path = crate::types::plan_log_path();
    if !log_path.exists() {
        std::fs::write(&log_path, "")?;
    }
    if !Config::config_path().exists() {
        Config::default().save()?;
    }
    print_json(&json!({"status": "initialized", "root": root}))
}

pub async fn cmd_construct(spec: Option<String>) -> Result<()> {
    let store = open_store().await?;
    let config = Config::load()?;
    let driver = AgentDriver::new(agent_bin(), crate::types::tix_root().join("events"));
    let spec_path = spec.unwrap_or_else(|| "spec.md".to_string());

    let mut orchestrator = Orchestrator::new(store, driver, config, repo_root(), project_rules(), spec_path);
    let outcome = orchestrator.run().await?;

    match &outcome {
        SessionOutcome::Complete { .. } => print_json(&outcome)?,
        SessionOutcome::Aborted { .. } => {
            print_json(&outcome)?;
            return Err(RalphError::Other("construct session aborted".to_string()));
        }
        SessionOutcome::Cancelled => print_json(&outcome)?,
    }
    Ok(())
}

#[derive(Debug, Deserialize, Default)]
struct PlanProposal {
    name: String,
    #[serde(default)]
    notes: Option<String>,
    #[serde(default)]
    accept: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct PlanReply {
    #[serde(default)]
    tasks: Vec<PlanProposal>,
    #[serde(default)]
    issues: Vec<PlanProposal>,
}

pub async fn cmd_plan(spec: Option<String>) -> Result<()> {
    let store = open_store().await?;
    let config = Config::load()?;
    let driver = AgentDriver::new(agent_bin(), crate::types::tix_root().join("events"));
    let spec_path = spec.unwrap_or_else(|| "spec.md".to_string());
    let spec_text = std::fs::read_to_string(&spec_path)
        .map_err(|e| RalphError::Io(std::io::Error::new(e.kind(), format!("reading {spec_path}: {e}"))))?;

    let prompt = format!(
        "Read this specification and break it into an initial set of tasks and issues:\n\n{spec_text}\n\n\
         Reply with JSON: {{\"tasks\": [{{\"name\", \"notes\", \"accept\"}}], \
         \"issues\": [{{\"name\", \"notes\"}}]}}."
    );

    let (reply, _usage) = invoke_agent::<PlanReply>(&driver, &prompt, &repo_root(), &config, &CancelToken::new()).await?;

    let now = now_unix();
    let mut events = Vec::new();
    for proposal in &reply.tasks {
        let mut task = Ticket::new(TicketType::Task, proposal.name.clone(), now);
        task.notes = proposal.notes.clone();
        task.accept = proposal.accept.clone();
        task.spec = Some(spec_path.clone());
        events.push(ticket_to_event(&task));
    }
    for proposal in &reply.issues {
        let mut issue = Ticket::new(TicketType::Issue, proposal.name.clone(), now);
        issue.notes = proposal.notes.clone();
        issue.spec = Some(spec_path.clone());
        events.push(ticket_to_event(&issue));
    }
    store.append_events(&events).await?;

    let reprioritized = prioritize::prioritize(&store).await?;
    store.append_events(&reprioritized).await?;

    print_json(&json!({
        "tasks_created": reply.tasks.len(),
        "issues_created": reply.issues.len(),
    }))
}

pub async fn cmd_query(tql: &str) -> Result<()> {
    let store = open_store().await?;
    let conn = store.cache.connection().await?;
    let result = crate::query::run(&conn, tql).await?;

    let rows: Vec<serde_json::Value> = result
        .rows
        .into_iter()
        .map(|row| serde_json::Value::Object(row.into_iter().collect()))
        .collect();
    print_json(&json!({"columns": result.columns, "rows": rows}))
}

pub async fn cmd_status() -> Result<()> {
    let store = open_store().await?;
    crate::display::print_dashboard(&store).await
}

pub async fn cmd_report(kind: ReportKind) -> Result<()> {
    let store = open_store().await?;
    let conn = store.cache.connection().await?;

    let sql = match kind {
        ReportKind::Velocity => {
            "SELECT substr(done_at, 1, 10) AS day, CAST(COUNT(*) AS REAL) AS count FROM tombstones \
             WHERE is_accept = 1 GROUP BY day ORDER BY day"
        }
        ReportKind::Actors => {
            "SELECT COALESCE(author, 'unknown') AS actor, CAST(COUNT(*) AS REAL) AS count FROM tickets \
             WHERE status = 2 GROUP BY actor ORDER BY count DESC"
        }
        ReportKind::Models => {
            "SELECT key, CAST(SUM(value_num) AS REAL) AS total FROM ticket_meta \
             WHERE key IN ('tokens_in', 'tokens_out', 'cost') GROUP BY key"
        }
    };

    let mut rows = conn.query(sql, ()).await.map_err(crate::cache::CacheError::from)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().await.map_err(crate::cache::CacheError::from)? {
        let a: String = row.get(0).map_err(crate::cache::CacheError::from)?;
        let b: f64 = row.get(1).map_err(crate::cache::CacheError::from)?;
        out.push(json!({"key": a, "value": b}));
    }
    print_json(&out)
}

pub async fn cmd_search(query: &str, limit: usize) -> Result<()> {
    let store = open_store().await?;
    let hits = store.search(query, limit).await?;
    print_json(&hits.into_iter().map(|h| json!({"id": h.id, "name": h.name, "score": h.score})).collect::<Vec<_>>())
}

pub async fn cmd_tree(id: Option<String>) -> Result<()> {
    let store = open_store().await?;
    let all = store.list_tickets_filtered(&SimpleFilter::default()).await?;

    let roots: Vec<&Ticket> = match &id {
        Some(id) => all.iter().filter(|t| &t.id == id).collect(),
        None => all.iter().filter(|t| t.deps.is_empty()).collect(),
    };

    let by_id: std::collections::HashMap<&str, &Ticket> =
        all.iter().map(|t| (t.id.as_str(), t)).collect();

    fn render(
        ticket: &Ticket,
        by_id: &std::collections::HashMap<&str, &Ticket>,
        depth: usize,
        visiting: &mut std::collections::HashSet<String>,
        out: &mut Vec<String>,
    ) {
        out.push(format!("{}{} [{}] {}", "  ".repeat(depth), ticket.id, ticket.status, ticket.name));
        if !visiting.insert(ticket.id.clone()) {
            out.push(format!("{}  (cycle)", "  ".repeat(depth)));
            return;
        }
        for dep in &ticket.deps {
            if let Some(dep_ticket) = by_id.get(dep.as_str()) {
                render(dep_ticket, by_id, depth + 1, visiting, out);
            } else {
                out.push(format!("{}  {} (broken ref)", "  ".repeat(depth + 1), dep));
            }
        }
        visiting.remove(&ticket.id);
    }

    let mut lines = Vec::new();
    for root in roots {
        let mut visiting = std::collections::HashSet::new();
        render(root, &by_id, 0, &mut visiting, &mut lines);
    }
    for line in &lines {
        println!("{line}");
    }
    Ok(())
}

pub async fn cmd_validate() -> Result<()> {
    let store = open_store().await?;
    let report = store.validate().await?;
    print_json(&report)?;
    if !report.valid {
        return Err(RalphError::Conflict("plan store failed validation".to_string()));
    }
    Ok(())
}

pub async fn cmd_task_add(
    name: &str,
    notes: Option<&str>,
    accept: Option<&str>,
    priority: &str,
    deps: &[String],
) -> Result<()> {
    let store = open_store().await?;
    let mut task = Ticket::new(TicketType::Task, name, now_unix());
    task.notes = notes.map(str::to_string);
    task.accept = accept.map(str::to_string);
    task.priority = priority.parse::<TicketPriority>()?;
    task.deps = deps.to_vec();
    store.upsert_ticket(&task).await?;
    print_json(&task)
}

pub async fn cmd_task_done(id: &str) -> Result<()> {
    let store = open_store().await?;
    let mut task = store.get_ticket(id).await?;
    task.status = TicketStatus::Done;
    task.done_at = Some(crate::git::current_commit(&repo_root()));
    store.upsert_ticket(&task).await?;
    print_json(&task)
}

pub async fn cmd_task_accept(id: &str, reason: Option<&str>) -> Result<()> {
    accept_ticket(id, reason).await
}

pub async fn cmd_task_reject(id: &str, reason: &str) -> Result<()> {
    reject_ticket(id, reason).await
}

pub async fn cmd_task_delete(id: &str) -> Result<()> {
    let store = open_store().await?;
    store.delete_ticket(id).await?;
    print_json(&json!({"deleted": id}))
}

pub async fn cmd_task_prioritize() -> Result<()> {
    let store = open_store().await?;
    let events = prioritize::prioritize(&store).await?;
    let count = events.len();
    store.append_events(&events).await?;
    print_json(&json!({"reprioritized": count}))
}

pub async fn cmd_task_update(id: &str, field: &str, value: &str) -> Result<()> {
    let store = open_store().await?;
    let mut task = store.get_ticket(id).await?;
    let field = UniCase::new(field);
    if field == UniCase::new("name") {
        task.name = value.to_string();
    } else if field == UniCase::new("notes") {
        task.notes = Some(value.to_string());
    } else if field == UniCase::new("accept") {
        task.accept = Some(value.to_string());
    } else if field == UniCase::new("priority") {
        task.priority = value.parse::<TicketPriority>()?;
    } else {
        return Err(RalphError::InvalidArg(format!("unknown field '{field}'")));
    }
    store.upsert_ticket(&task).await?;
    print_json(&task)
}

pub async fn cmd_issue_add(name: &str, notes: Option<&str>) -> Result<()> {
    let store = open_store().await?;
    let mut issue = Ticket::new(TicketType::Issue, name, now_unix());
    issue.notes = notes.map(str::to_string);
    store.upsert_ticket(&issue).await?;
    print_json(&issue)
}

pub async fn cmd_issue_done(id: &str) -> Result<()> {
    accept_ticket(id, None).await
}

pub async fn cmd_issue_done_all() -> Result<()> {
    let store = open_store().await?;
    let pending = store
        .list_tickets_filtered(&SimpleFilter {
            ticket_type: Some(TicketType::Issue),
            status: Some(TicketStatus::Pending),
            ..Default::default()
        })
        .await?;
    for issue in &pending {
        let done_at = issue.done_at.clone().unwrap_or_default();
        store.add_tombstone(&issue.id, true, done_at, None, Some(issue.name.clone())).await?;
        let mut updated = issue.clone();
        updated.status = TicketStatus::Accepted;
        updated.resolved_at = now_unix();
        store.upsert_ticket(&updated).await?;
    }
    print_json(&json!({"accepted": pending.len()}))
}

pub async fn cmd_issue_done_ids(ids: &[String]) -> Result<()> {
    for id in ids {
        accept_ticket(id, None).await?;
    }
    print_json(&json!({"accepted": ids.len()}))
}

async fn accept_ticket(id: &str, reason: Option<&str>) -> Result<()> {
    let store = open_store().await?;
    let mut ticket = store.get_ticket(id).await?;
    let done_at = ticket.done_at.clone().unwrap_or_default();
    store
        .add_tombstone(id, true, done_at, reason.map(str::to_string), Some(ticket.name.clone()))
        .await?;
    ticket.status = TicketStatus::Accepted;
    ticket.resolved_at = now_unix();
    store.upsert_ticket(&ticket).await?;
    print_json(&ticket)
}

async fn reject_ticket(id: &str, reason: &str) -> Result<()> {
    let store = open_store().await?;
    let mut ticket = store.get_ticket(id).await?;
    let done_at = ticket.done_at.clone().unwrap_or_default();
    store
        .add_tombstone(id, false, done_at, Some(reason.to_string()), Some(ticket.name.clone()))
        .await?;
    ticket.status = TicketStatus::Pending;
    ticket.resolved_at = 0;
    ticket.kill_reason.clear();
    ticket.kill_log = None;
    store.upsert_ticket(&ticket).await?;
    print_json(&ticket)
}

pub async fn cmd_batch(path: &str) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| RalphError::Io(std::io::Error::new(e.kind(), format!("reading {path}: {e}"))))?;

    let events: Vec<PlanEvent> = if content.trim_start().starts_with('[') {
        serde_json::from_str(&content)?
    } else {
        content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(serde_json::from_str)
            .collect::<std::result::Result<Vec<_>, _>>()?
    };

    let store = open_store().await?;
    store.append_events(&events).await?;
    print_json(&json!({"applied": events.len()}))
}

pub async fn cmd_compact() -> Result<()> {
    let store = open_store().await?;
    let tickets = store.list_tickets_filtered(&SimpleFilter::default()).await?;
    let committed_ids: std::collections::HashSet<String> = tickets
        .iter()
        .filter(|t| t.status.is_resolved())
        .map(|t| t.id.clone())
        .collect();
    store.plan_compact(&committed_ids, &std::collections::HashSet::new()).await?;
    print_json(&json!({"compacted": committed_ids.len()}))
}

impl TaskAction {
    pub async fn run(self) -> Result<()> {
        match self {
            TaskAction::Add { name, notes, accept, priority, deps } => {
                cmd_task_add(&name, notes.as_deref(), accept.as_deref(), &priority, &deps).await
            }
            TaskAction::Done { id } => cmd_task_done(&id).await,
            TaskAction::Accept { id, reason } => cmd_task_accept(&id, reason.as_deref()).await,
            TaskAction::Reject { id, reason } => cmd_task_reject(&id, &reason).await,
            TaskAction::Delete { id } => cmd_task_delete(&id).await,
            TaskAction::Prioritize => cmd_task_prioritize().await,
            TaskAction::Update { id, field, value } => cmd_task_update(&id, &field, &value).await,
        }
    }
}

impl IssueAction {
    pub async fn run(self) -> Result<()> {
        match self {
            IssueAction::Add { name, notes } => cmd_issue_add(&name, notes.as_deref()).await,
            IssueAction::Done { id } => cmd_issue_done(&id).await,
            IssueAction::DoneAll => cmd_issue_done_all().await,
            IssueAction::DoneIds { ids } => cmd_issue_done_ids(&ids).await,
        }
    }
}
