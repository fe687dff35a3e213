//! DECOMPOSE: breaks a killed ticket into smaller subtasks.

use std::path::Path;

use serde::Deserialize;

use crate::agent::{AgentDriver, CancelToken};
use crate::cache::SimpleFilter;
use crate::config::Config;
use crate::error::Result;
use crate::log::DeleteEventFields;
use crate::log::PlanEvent;
use crate::store::{ticket_to_event, PlanStore};
use crate::types::{now_unix, Ticket, TicketType};

use super::{invoke_agent, notes_are_substantial, StageResult};

const MIN_NOTES_LEN: usize = 20;
const HEAD_LINES: usize = 50;
const TAIL_LINES: usize = 100;

#[derive(Debug, Clone, Deserialize, Default)]
struct SubtaskProposal {
    #[serde(default)]
    name: String,
    #[serde(default)]
    notes: String,
    #[serde(default)]
    accept: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct DecomposeReply {
    #[serde(default)]
    subtasks: Vec<SubtaskProposal>,
}

/// The agent only ever sees the head and tail of a kill log — its
/// verbose middle is exactly what caused the kill in the first place.
fn head_and_tail(kill_log: &str) -> String {
    let lines: Vec<&str> = kill_log.lines().collect();
    if lines.len() <= HEAD_LINES + TAIL_LINES {
        return kill_log.to_string();
    }
    let head = &lines[..HEAD_LINES];
    let tail = &lines[lines.len() - TAIL_LINES..];
    format!(
        "{}\n… ({} lines omitted) …\n{}",
        head.join("\n"),
        lines.len() - HEAD_LINES - TAIL_LINES,
        tail.join("\n")
    )
}

fn decompose_prompt(ticket: &Ticket, excerpt: &str) -> String {
    format!(
        "Ticket {id} ({name}) was killed: {kill_reason}.\n\nRelevant log excerpt:\n{excerpt}\n\n\
         Break this into 2-5 smaller subtasks, each independently buildable. Reply with JSON: \
         {{\"subtasks\": [{{\"name\", \"notes\", \"accept\"}}]}}.",
        id = ticket.id,
        name = ticket.name,
        kill_reason = ticket.kill_reason,
    )
}

/// Walk the `parent` chain, counting hops back to the root ticket.
async fn decomposition_depth(store: &PlanStore, ticket: &Ticket) -> Result<u32> {
    let mut depth = 0;
    let mut current = ticket.parent.clone();
    while let Some(parent_id) = current {
        depth += 1;
        match store.get_ticket(&parent_id).await {
            Ok(parent) => current = parent.parent,
            Err(_) => break,
        }
        if depth > 64 {
            break;
        }
    }
    Ok(depth)
}

pub async fn run(
    store: &PlanStore,
    driver: &AgentDriver,
    config: &Config,
    cwd: &Path,
    cancel: &CancelToken,
) -> Result<StageResult> {
    let killed = store
        .list_tickets_filtered(&SimpleFilter {
            kill_reason_set: Some(true),
            ..Default::default()
        })
        .await?;

    let Some(ticket) = killed.iter().max_by_key(|t| t.updated_at) else {
        return Ok(StageResult::skip());
    };

    let depth = decomposition_depth(store, ticket).await?;
    if depth >= config.max_decompose_depth {
        let mut issue = Ticket::new(
            TicketType::Issue,
            format!("human intervention needed: {}", ticket.name),
            now_unix(),
        );
        issue.notes = Some(format!(
            "Ticket {} has been decomposed {depth} times (limit {}) and is still failing: {}",
            ticket.id, config.max_decompose_depth, ticket.kill_reason
        ));
        issue.priority = ticket.priority;
        return Ok(StageResult::failure(vec![ticket_to_event(&issue)]));
    }

    let kill_log = match &ticket.kill_log {
        Some(path) => tokio::fs::read_to_string(path).await.unwrap_or_default(),
        None => String::new(),
    };
    let excerpt = head_and_tail(&kill_log);
    let prompt = decompose_prompt(ticket, &excerpt);

    let (reply, metrics) =
        invoke_agent::<DecomposeReply>(driver, &prompt, cwd, config, cancel).await?;

    let now = now_unix();
    let valid_subtasks: Vec<&SubtaskProposal> = reply
        .subtasks
        .iter()
        .filter(|s| {
            notes_are_substantial(&s.notes, MIN_NOTES_LEN)
                && s.accept.as_deref().is_some_and(|a| !a.trim().is_empty())
        })
        .collect();

    if valid_subtasks.len() < 2 {
        return Ok(StageResult::failure(Vec::new()).with_usage(metrics));
    }

    let mut new_events = Vec::new();
    for proposal in valid_subtasks.iter().take(5) {
        let mut subtask = Ticket::new(TicketType::Task, proposal.name.clone(), now);
        subtask.notes = Some(proposal.notes.clone());
        subtask.accept = proposal.accept.clone();
        subtask.parent = Some(ticket.id.clone());
        subtask.priority = ticket.priority;
        new_events.push(ticket_to_event(&subtask));
    }

    new_events.push(PlanEvent::Delete(DeleteEventFields {
        id: ticket.id.clone(),
    }));

    Ok(StageResult::success(new_events).with_usage(metrics))
}
