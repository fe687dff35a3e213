//! Shared prioritization: re-scores pending tasks without an explicit
//! priority, called from both the initial PLAN entry point and VERIFY.

use std::collections::{HashMap, HashSet};

use crate::cache::SimpleFilter;
use crate::error::Result;
use crate::log::PlanEvent;
use crate::store::{ticket_to_event, PlanStore};
use crate::types::{Ticket, TicketPriority, TicketType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Complexity {
    Small,
    Medium,
    Large,
}

const CLEANUP_KEYWORDS: &[&str] = &["cleanup", "clean up", "docs", "documentation", "nice to have", "nit"];
const LARGE_KEYWORDS: &[&str] = &["rewrite", "redesign", "migrate", "overhaul", "refactor entire"];

fn estimate_complexity(ticket: &Ticket) -> Complexity {
    let notes_len = ticket.notes.as_deref().unwrap_or("").len();
    let text = format!(
        "{} {}",
        ticket.name.to_lowercase(),
        ticket.notes.as_deref().unwrap_or("").to_lowercase()
    );

    if LARGE_KEYWORDS.iter().any(|kw| text.contains(kw)) || notes_len > 800 {
        return Complexity::Large;
    }
    if notes_len < 150 {
        return Complexity::Small;
    }
    Complexity::Medium
}

fn is_cleanup(ticket: &Ticket) -> bool {
    let text = ticket.name.to_lowercase();
    CLEANUP_KEYWORDS.iter().any(|kw| text.contains(kw))
}

/// Re-score every pending task lacking an explicit priority and return
/// the task events carrying the updated value. Tasks that already have
/// a priority are left untouched.
pub async fn prioritize(store: &PlanStore) -> Result<Vec<PlanEvent>> {
    let pending_tasks = store
        .list_tickets_filtered(&SimpleFilter {
            ticket_type: Some(TicketType::Task),
            status: Some(crate::types::TicketStatus::Pending),
            ..Default::default()
        })
        .await?;

    // deps -> count of tasks that depend on it (transitive dependents).
    let mut direct_dependents: HashMap<String, Vec<String>> = HashMap::new();
    for task in &pending_tasks {
        for dep in &task.deps {
            direct_dependents
                .entry(dep.clone())
                .or_default()
                .push(task.id.clone());
        }
    }

    let mut dependent_counts: HashMap<String, usize> = HashMap::new();
    for task in &pending_tasks {
        dependent_counts.insert(task.id.clone(), transitive_dependents(&task.id, &direct_dependents));
    }

    let max_dependents = dependent_counts.values().copied().max().unwrap_or(0);

    let mut events = Vec::new();
    for task in &pending_tasks {
        if task.priority != TicketPriority::None {
            continue;
        }

        let dependents = dependent_counts.get(&task.id).copied().unwrap_or(0);
        let on_critical_path = max_dependents > 0 && dependents == max_dependents;
        let complexity = estimate_complexity(task);

        let priority = if is_cleanup(task) {
            TicketPriority::Low
        } else if (complexity == Complexity::Small && dependents >= 2) || on_critical_path {
            TicketPriority::High
        } else {
            TicketPriority::Medium
        };

        let mut updated = task.clone();
        updated.priority = priority;
        events.push(ticket_to_event(&updated));
    }

    Ok(events)
}

fn transitive_dependents(id: &str, direct: &HashMap<String, Vec<String>>) -> usize {
    let mut seen = HashSet::new();
    let mut stack = vec![id.to_string()];
    while let Some(current) = stack.pop() {
        if let Some(children) = direct.get(&current) {
            for child in children {
                if seen.insert(child.clone()) {
                    stack.push(child.clone());
                }
            }
        }
    }
    seen.len()
}
