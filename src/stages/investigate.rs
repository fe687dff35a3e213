//! INVESTIGATE: converts pending issues into concrete tasks.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::agent::{AgentDriver, CancelToken};
use crate::cache::SimpleFilter;
use crate::config::Config;
use crate::error::Result;
use crate::log::AcceptEventFields;
use crate::log::PlanEvent;
use crate::store::{ticket_to_event, PlanStore};
use crate::types::{iso_now, now_unix, Ticket, TicketStatus, TicketType};

use super::{invoke_agent, notes_are_substantial, notes_reference_source, StageResult};

const MIN_NOTES_LEN: usize = 50;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Resolution {
    Task,
    Trivial,
    OutOfScope,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct TaskProposal {
    #[serde(default)]
    name: String,
    #[serde(default)]
    notes: String,
    #[serde(default)]
    accept: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct InvestigateReply {
    #[serde(default)]
    issue_id: String,
    #[serde(default)]
    root_cause: String,
    resolution: Resolution,
    #[serde(default)]
    task: Option<TaskProposal>,
    #[serde(default)]
    trivial_fix: Option<String>,
    #[serde(default)]
    out_of_scope_reason: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    research: String,
}

fn prompt_for(issue: &Ticket) -> String {
    format!(
        "Investigate issue {id}: {name}\n\nNotes:\n{notes}\n\nRoot-cause this issue. Reply with JSON: \
         {{\"issue_id\", \"root_cause\", \"resolution\": \"task\"|\"trivial\"|\"out_of_scope\", \
         \"task\"?: {{\"name\", \"notes\", \"accept\"}}, \"trivial_fix\"?, \"out_of_scope_reason\"?, \"research\"}}.",
        id = issue.id,
        name = issue.name,
        notes = issue.notes.as_deref().unwrap_or("(none)"),
    )
}

pub async fn run(
    store: &PlanStore,
    driver: &AgentDriver,
    config: &Config,
    cwd: &Path,
    cancel: &CancelToken,
) -> Result<StageResult> {
    let issues = store
        .list_tickets_filtered(&SimpleFilter {
            ticket_type: Some(TicketType::Issue),
            status: Some(TicketStatus::Pending),
            ..Default::default()
        })
        .await?;

    if issues.is_empty() {
        return Ok(StageResult::skip());
    }

    let permits = config.max_parallel_subagents.max(1);
    let semaphore = Arc::new(Semaphore::new(permits));
    let mut joinset: JoinSet<(String, Result<(InvestigateReply, crate::agent::UsageMetrics)>)> =
        JoinSet::new();

    for issue in &issues {
        let semaphore = semaphore.clone();
        let driver = driver.clone();
        let config = config.clone();
        let cancel = cancel.clone();
        let cwd = cwd.to_path_buf();
        let prompt = prompt_for(issue);
        let issue_id = issue.id.clone();

        joinset.spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            let result = invoke_agent::<InvestigateReply>(&driver, &prompt, &cwd, &config, &cancel).await;
            (issue_id, result)
        });
    }

    // Collect every join result before touching the store, so fan-out
    // concurrency never races a store mutation (§5's ordering rule).
    let mut replies_by_issue: HashMap<String, Result<InvestigateReply>> = HashMap::new();
    let mut total_usage = crate::agent::UsageMetrics::default();
    while let Some(joined) = joinset.join_next().await {
        match joined {
            Ok((issue_id, result)) => {
                let result = result.map(|(reply, usage)| {
                    total_usage.accumulate(usage.tokens_in, usage.tokens_out, usage.cost);
                    reply
                });
                replies_by_issue.insert(issue_id, result);
            }
            Err(e) => tracing::warn!(error = %e, "investigate subagent task panicked"),
        }
    }

    let now = now_unix();
    let mut new_events = Vec::new();
    let mut processed = 0usize;

    for issue in &issues {
        let reply = match replies_by_issue.remove(&issue.id) {
            Some(Ok(reply)) => reply,
            Some(Err(e)) => {
                tracing::warn!(issue = %issue.id, error = %e, "investigate subagent failed");
                continue;
            }
            None => continue,
        };

        let reason = match &reply.resolution {
            Resolution::Task => {
                let proposal = reply.task.clone().unwrap_or_default();
                let valid = notes_are_substantial(&proposal.notes, MIN_NOTES_LEN)
                    && proposal
                        .accept
                        .as_deref()
                        .is_some_and(|a| !a.trim().is_empty())
                    && notes_reference_source(&proposal.notes);

                if valid {
                    let mut task = Ticket::new(TicketType::Task, proposal.name, now);
                    task.notes = Some(proposal.notes);
                    task.accept = proposal.accept;
                    task.priority = issue.priority;
                    task.created_from = Some(issue.id.clone());
                    new_events.push(ticket_to_event(&task));
                    format!("resolved via new task {}: {}", task.id, reply.root_cause)
                } else {
                    let mut followup = Ticket::new(
                        TicketType::Issue,
                        format!("follow-up: clarify {}", issue.name),
                        now,
                    );
                    followup.notes = Some(format!(
                        "Investigation of {} proposed a task that failed validation \
                         (notes/accept too thin); root cause noted: {}",
                        issue.id, reply.root_cause
                    ));
                    followup.priority = issue.priority;
                    followup.created_from = Some(issue.id.clone());
                    new_events.push(ticket_to_event(&followup));
                    format!("investigation reply needed follow-up: {}", reply.root_cause)
                }
            }
            Resolution::Trivial => {
                let mut task = Ticket::new(TicketType::Task, format!("fix: {}", issue.name), now);
                task.notes = Some(
                    reply
                        .trivial_fix
                        .clone()
                        .unwrap_or_else(|| reply.root_cause.clone()),
                );
                task.priority = issue.priority;
                task.created_from = Some(issue.id.clone());
                new_events.push(ticket_to_event(&task));
                format!("trivial fix captured as task {}", task.id)
            }
            Resolution::OutOfScope => reply
                .out_of_scope_reason
                .clone()
                .unwrap_or_else(|| reply.root_cause.clone()),
        };

        new_events.push(PlanEvent::Accept(AcceptEventFields {
            id: issue.id.clone(),
            done_at: iso_now(),
            timestamp: Some(now),
            reason: Some(reason),
            name: Some(issue.name.clone()),
        }));
        processed += 1;
    }

    if processed == 0 {
        return Ok(StageResult::skip());
    }

    Ok(StageResult::success(new_events).with_usage(total_usage))
}
