//! Rejection Analyzer: scans recent reject tombstones for a task stuck
//! failing the same way, or a prerequisite several tasks are all
//! missing. Runs after every VERIFY; its issues feed the next
//! INVESTIGATE.

use std::collections::{HashMap, HashSet};

use crate::config::Config;
use crate::error::Result;
use crate::log::PlanEvent;
use crate::store::{ticket_to_event, PlanStore};
use crate::types::{now_unix, Ticket, TicketPriority, TicketType};

const RECENT_TOMBSTONE_LIMIT: i64 = 200;

/// First handful of words of a rejection reason, lowercased — a cheap
/// stand-in for clustering on the actual error message without pulling
/// in a similarity/NLP dependency for a problem this small.
fn error_fingerprint(reason: &str) -> String {
    reason
        .to_lowercase()
        .split_whitespace()
        .take(6)
        .collect::<Vec<_>>()
        .join(" ")
}

pub async fn analyze(store: &PlanStore, config: &Config) -> Result<Vec<PlanEvent>> {
    let rejections = store
        .list_tombstones(Some(false), RECENT_TOMBSTONE_LIMIT)
        .await?;
    let threshold = config.rejection_threshold as usize;

    // Keyed by (ticket_id, error_fingerprint) so a ticket rejected for
    // several unrelated reasons doesn't trip the threshold on raw count.
    let mut by_ticket: HashMap<(String, String), (String, Vec<String>)> = HashMap::new();
    let mut by_error: HashMap<String, HashSet<String>> = HashMap::new();

    for tombstone in &rejections {
        let Some(reason) = &tombstone.reason else {
            continue;
        };
        let fingerprint = error_fingerprint(reason);
        by_ticket
            .entry((tombstone.id.clone(), fingerprint.clone()))
            .or_insert_with(|| (tombstone.name.clone(), Vec::new()))
            .1
            .push(reason.clone());
        by_error.entry(fingerprint).or_default().insert(tombstone.id.clone());
    }

    let now = now_unix();
    let mut events = Vec::new();

    for ((ticket_id, _fingerprint), (name, reasons)) in &by_ticket {
        if reasons.len() < threshold {
            continue;
        }
        let mut issue = Ticket::new(TicketType::Issue, format!("REPEATED REJECTION: {name}"), now);
        issue.notes = Some(format!(
            "Task {ticket_id} has been rejected {} times with a similar error:\n- {}",
            reasons.len(),
            reasons.join("\n- ")
        ));
        issue.priority = TicketPriority::High;
        issue.created_from = Some(ticket_id.clone());
        events.push(ticket_to_event(&issue));
    }

    for (fingerprint, ticket_ids) in &by_error {
        if ticket_ids.len() < threshold {
            continue;
        }
        let mut ids: Vec<&str> = ticket_ids.iter().map(String::as_str).collect();
        ids.sort_unstable();
        let mut issue = Ticket::new(
            TicketType::Issue,
            format!("COMMON FAILURE PATTERN: {fingerprint}"),
            now,
        );
        issue.notes = Some(format!(
            "{} different tasks failed with a similar error (\"{fingerprint}\"), suggesting a \
             shared unmet prerequisite. Affected tasks: {}",
            ids.len(),
            ids.join(", ")
        ));
        issue.priority = TicketPriority::High;
        events.push(ticket_to_event(&issue));
    }

    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_across_similar_messages() {
        let a = error_fingerprint("connection refused while dialing postgres on port 5432");
        let b = error_fingerprint("connection refused while dialing postgres on port 9999 retrying");
        assert_eq!(a, "connection refused while dialing postgres on");
        assert_eq!(a, b);
    }
}
