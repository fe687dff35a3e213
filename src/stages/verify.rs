//! VERIFY: accepts or rejects done tasks and surfaces spec gaps.

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
use crate::log::{AcceptEventFields, PlanEvent, RejectEventFields, TicketEventFields};
use crate::prioritize;
use crate::store::{ticket_to_event, PlanStore};
use crate::types::{now_unix, Ticket, TicketStatus, TicketType};

use super::{invoke_agent, StageResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Verdict {
    Accept,
    Reject,
}

#[derive(Debug, Clone, Deserialize)]
struct VerifyReply {
    #[serde(default)]
    #[allow(dead_code)]
    task_id: String,
    verdict: Verdict,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    gaps: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct SpecEvalReply {
    #[serde(default)]
    tasks: Vec<ProposedTicket>,
    #[serde(default)]
    issues: Vec<ProposedTicket>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct ProposedTicket {
    name: String,
    #[serde(default)]
    notes: Option<String>,
    #[serde(default)]
    accept: Option<String>,
}

fn verify_prompt(task: &Ticket) -> String {
    format!(
        "Verify task {id}: {name}\n\nNotes:\n{notes}\n\nAcceptance criteria:\n{accept}\n\n\
         Check whether the acceptance criteria are actually met. Reply with JSON: \
         {{\"task_id\", \"verdict\": \"accept\"|\"reject\", \"reason\", \"gaps\"?: [string]}}.",
        id = task.id,
        name = task.name,
        notes = task.notes.as_deref().unwrap_or("(none)"),
        accept = task.accept.as_deref().unwrap_or("(none)"),
    )
}

fn spec_eval_prompt(spec_path: &str, gaps: &[String]) -> String {
    format!(
        "Read the spec at {spec_path} and the current code. Given these gaps surfaced during \
         verification:\n{gaps}\n\nReply with JSON: {{\"tasks\"?: [{{\"name\", \"notes\", \"accept\"}}], \
         \"issues\"?: [{{\"name\", \"notes\"}}]}} for anything the spec requires that isn't covered.",
        gaps = gaps.join("\n- "),
    )
}

pub async fn run(
    store: &PlanStore,
    driver: &AgentDriver,
    config: &Config,
    cwd: &Path,
    spec_path: &str,
    cancel: &CancelToken,
) -> Result<StageResult> {
    let done_tasks = store
        .list_tickets_filtered(&SimpleFilter {
            ticket_type: Some(TicketType::Task),
            status: Some(TicketStatus::Done),
            ..Default::default()
        })
        .await?;

    if done_tasks.is_empty() {
        // Nothing done and nothing pending either: nothing for VERIFY
        // to act on; the orchestrator's entry rule handles COMPLETE.
        return Ok(StageResult::skip());
    }

    let permits = config.max_parallel_subagents.max(1);
    let semaphore = Arc::new(Semaphore::new(permits));
    let mut joinset: JoinSet<(String, Result<(VerifyReply, crate::agent::UsageMetrics)>)> =
        JoinSet::new();

    for task in &done_tasks {
        let semaphore = semaphore.clone();
        let driver = driver.clone();
        let config = config.clone();
        let cancel = cancel.clone();
        let cwd = cwd.to_path_buf();
        let prompt = verify_prompt(task);
        let task_id = task.id.clone();

        joinset.spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            let result = invoke_agent::<VerifyReply>(&driver, &prompt, &cwd, &config, &cancel).await;
            (task_id, result)
        });
    }

    let mut replies: HashMap<String, Result<VerifyReply>> = HashMap::new();
    let mut total_usage = crate::agent::UsageMetrics::default();
    while let Some(joined) = joinset.join_next().await {
        match joined {
            Ok((task_id, result)) => {
                let result = result.map(|(reply, usage)| {
                    total_usage.accumulate(usage.tokens_in, usage.tokens_out, usage.cost);
                    reply
                });
                replies.insert(task_id, result);
            }
            Err(e) => tracing::warn!(error = %e, "verify subagent task panicked"),
        }
    }

    let now = now_unix();
    let mut new_events = Vec::new();
    let mut all_gaps = Vec::new();

    for task in &done_tasks {
        let reply = match replies.remove(&task.id) {
            Some(Ok(reply)) => reply,
            Some(Err(e)) => {
                tracing::warn!(task = %task.id, error = %e, "verify subagent failed");
                continue;
            }
            None => continue,
        };

        // The tombstone's `done_at` is the commit hash BUILD recorded
        // when the task finished, not the moment VERIFY judges it.
        let done_at = task.done_at.clone().unwrap_or_default();

        match reply.verdict {
            Verdict::Accept => {
                new_events.push(PlanEvent::Accept(AcceptEventFields {
                    id: task.id.clone(),
                    done_at: done_at.clone(),
                    timestamp: Some(now),
                    reason: Some(reply.reason.clone()),
                    name: Some(task.name.clone()),
                }));
            }
            Verdict::Reject => {
                new_events.push(PlanEvent::Reject(RejectEventFields {
                    id: task.id.clone(),
                    done_at: done_at.clone(),
                    reason: reply.reason.clone(),
                    timestamp: Some(now),
                    name: Some(task.name.clone()),
                }));
                // Follow-up line reopens the ticket as pending for retry.
                new_events.push(PlanEvent::Task(TicketEventFields {
                    id: task.id.clone(),
                    s: Some(TicketStatus::Pending.log_char().to_string()),
                    ..Default::default()
                }));
                all_gaps.extend(reply.gaps.clone());
            }
        }
    }

    if !all_gaps.is_empty() {
        match invoke_agent::<SpecEvalReply>(
            driver,
            &spec_eval_prompt(spec_path, &all_gaps),
            cwd,
            config,
            cancel,
        )
        .await
        {
            Ok((eval, metrics)) => {
                total_usage.accumulate(metrics.tokens_in, metrics.tokens_out, metrics.cost);
                for proposed in eval.tasks {
                    let mut task = Ticket::new(TicketType::Task, proposed.name, now);
                    task.notes = proposed.notes;
                    task.accept = proposed.accept;
                    new_events.push(ticket_to_event(&task));
                }
                for proposed in eval.issues {
                    let mut issue = Ticket::new(TicketType::Issue, proposed.name, now);
                    issue.notes = proposed.notes;
                    new_events.push(ticket_to_event(&issue));
                }
            }
            Err(e) => tracing::warn!(error = %e, "spec-evaluation subagent failed"),
        }
    }

    let reprioritized = prioritize::prioritize(store).await?;
    new_events.extend(reprioritized);

    if new_events.is_empty() {
        return Ok(StageResult::skip().with_usage(total_usage));
    }

    Ok(StageResult::success(new_events).with_usage(total_usage))
}
