//! BUILD: executes tasks in dependency+priority order, one per call.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::agent::{AgentDriver, AgentOutcome, CancelToken};
use crate::cache::SimpleFilter;
use crate::config::Config;
use crate::error::{RalphError, Result};
use crate::git;
use crate::log::{MetaValue, PlanEvent};
use crate::store::{ticket_to_event, PlanStore};
use crate::types::{TicketStatus, TicketType, Ticket};

use super::StageResult;

fn build_prompt(task: &Ticket, project_rules: &str) -> String {
    format!(
        "Build task {id}: {name}\n\nNotes:\n{notes}\n\nAcceptance criteria:\n{accept}\n\nProject rules:\n{rules}",
        id = task.id,
        name = task.name,
        notes = task.notes.as_deref().unwrap_or("(none)"),
        accept = task.accept.as_deref().unwrap_or("(none)"),
        rules = project_rules,
    )
}

/// Tasks whose every dep is accepted, sorted by priority desc, then
/// `created_at` asc, with id as a stable tiebreak.
pub(crate) async fn ready_tasks(store: &PlanStore, pending: &[Ticket]) -> Result<Vec<Ticket>> {
    let mut ready = Vec::new();
    for task in pending {
        let mut all_accepted = true;
        for dep in &task.deps {
            match store.get_ticket(dep).await {
                Ok(dep_ticket) if dep_ticket.status == TicketStatus::Accepted => {}
                _ => {
                    all_accepted = false;
                    break;
                }
            }
        }
        if all_accepted {
            ready.push(task.clone());
        }
    }
    ready.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then(a.created_at.cmp(&b.created_at))
            .then(a.id.cmp(&b.id))
    });
    Ok(ready)
}

pub async fn run(
    store: &PlanStore,
    driver: &AgentDriver,
    config: &Config,
    cwd: &Path,
    project_rules: &str,
    cancel: &CancelToken,
) -> Result<StageResult> {
    let pending = store
        .list_tickets_filtered(&SimpleFilter {
            ticket_type: Some(TicketType::Task),
            status: Some(TicketStatus::Pending),
            ..Default::default()
        })
        .await?;

    if pending.is_empty() {
        return Ok(StageResult::skip());
    }

    let ready = ready_tasks(store, &pending).await?;
    if ready.is_empty() {
        // Pending tasks exist but all are blocked on unaccepted deps;
        // the orchestrator routes elsewhere.
        return Ok(StageResult::skip());
    }

    let task = &ready[0];
    let prompt = build_prompt(task, project_rules);
    let stage_timeout = Duration::from_millis(config.stage_timeout_ms);

    let outcome = driver.run(&prompt, cwd, stage_timeout, cancel, config).await?;

    match outcome {
        AgentOutcome::Completed { metrics, .. } => {
            let head = git::current_commit(&store.repo_root);
            let mut updated = task.clone();
            updated.status = TicketStatus::Done;
            updated.done_at = Some(head);
            updated.kill_reason.clear();
            updated.kill_log = None;

            let event = match ticket_to_event(&updated) {
                PlanEvent::Task(mut fields) => {
                    let mut meta = BTreeMap::new();
                    meta.insert(
                        "tokens_in".to_string(),
                        MetaValue::Num(metrics.tokens_in as f64),
                    );
                    meta.insert(
                        "tokens_out".to_string(),
                        MetaValue::Num(metrics.tokens_out as f64),
                    );
                    meta.insert("cost".to_string(), MetaValue::Num(metrics.cost));
                    fields.meta = Some(meta);
                    PlanEvent::Task(fields)
                }
                other => other,
            };
            Ok(StageResult::success(vec![event]).with_usage(metrics))
        }
        AgentOutcome::TimedOut { events_log_path, metrics } => {
            Ok(kill_result(task, "timeout", &events_log_path).with_usage(metrics))
        }
        AgentOutcome::ContextKilled { events_log_path, metrics } => {
            Ok(kill_result(task, "context_limit", &events_log_path).with_usage(metrics))
        }
        AgentOutcome::Cancelled { .. } => Err(RalphError::Cancelled),
    }
}

/// `kill_log` stores the path to the agent's raw event log, not its
/// content — DECOMPOSE reads only the head/tail of the file at that
/// path, since the verbosity of the full log is what caused the kill.
fn kill_result(task: &Ticket, kill_reason: &str, kill_log_path: &Path) -> StageResult {
    let mut updated = task.clone();
    updated.kill_reason = kill_reason.to_string();
    updated.kill_log = Some(kill_log_path.display().to_string());
    StageResult::failure(vec![ticket_to_event(&updated)])
}
