//! Reference resolution and whole-plan validation: broken/stale edge
//! accounting, cycle detection over `deps`, and tombstone consistency.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use super::{PlanStore, RefState};
use crate::cache::SimpleFilter;
use crate::error::Result;
use crate::types::TicketStatus;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RefCounts {
    pub resolved: i64,
    pub stale: i64,
    pub broken: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

pub async fn count_refs(store: &PlanStore) -> Result<RefCounts> {
    let tickets = store
        .list_tickets_filtered(&SimpleFilter::default())
        .await?;

    let mut counts = RefCounts::default();
    let mut edges: Vec<&str> = Vec::new();
    for ticket in &tickets {
        edges.extend(ticket.deps.iter().map(String::as_str));
        edges.extend(ticket.created_from.as_deref());
        edges.extend(ticket.supersedes.as_deref());
        edges.extend(ticket.parent.as_deref());
    }

    for id in edges {
        match store.resolve_ref(id).await? {
            RefState::Resolved => counts.resolved += 1,
            RefState::Stale => counts.stale += 1,
            RefState::Broken => counts.broken += 1,
        }
    }

    Ok(counts)
}

pub async fn validate(store: &PlanStore) -> Result<ValidationReport> {
    let tickets = store
        .list_tickets_filtered(&SimpleFilter::default())
        .await?;

    let mut report = ValidationReport {
        valid: true,
        ..Default::default()
    };

    let mut seen_ids = HashSet::new();
    let mut graph: HashMap<String, Vec<String>> = HashMap::new();

    for ticket in &tickets {
        if !seen_ids.insert(ticket.id.clone()) {
            report.errors.push(format!("duplicate ticket id '{}'", ticket.id));
        }
        graph.insert(ticket.id.clone(), ticket.deps.clone());

        for dep in &ticket.deps {
            match store.resolve_ref(dep).await? {
                RefState::Broken => {
                    report
                        .errors
                        .push(format!("'{}' depends on missing ticket '{dep}'", ticket.id));
                }
                RefState::Stale => {
                    report.warnings.push(format!(
                        "'{}' depends on resolved/removed ticket '{dep}'",
                        ticket.id
                    ));
                }
                RefState::Resolved => {}
            }
        }

        let has_tombstone = conn_has_tombstone(store, &ticket.id, ticket.status).await?;
        if ticket.status.is_resolved() && !has_tombstone {
            report.errors.push(format!(
                "ticket '{}' is {} but has no matching tombstone",
                ticket.id, ticket.status
            ));
        }
    }

    if let Some(cycle) = find_cycle(&graph) {
        report
            .errors
            .push(format!("dependency cycle: {}", cycle.join(" -> ")));
    }

    report.valid = report.errors.is_empty();
    Ok(report)
}

async fn conn_has_tombstone(
    store: &PlanStore,
    id: &str,
    status: TicketStatus,
) -> Result<bool> {
    if !status.is_resolved() || status == TicketStatus::Deleted {
        return Ok(true);
    }
    let conn = store.cache.connection().await?;
    let want_accept = status == TicketStatus::Accepted;
    let mut rows = conn
        .query(
            "SELECT 1 FROM tombstones WHERE id = ?1 AND is_accept = ?2 LIMIT 1",
            (id.to_string(), want_accept as i64),
        )
        .await
        .map_err(crate::cache::CacheError::from)?;
    Ok(rows.next().await.map_err(crate::cache::CacheError::from)?.is_some())
}

fn find_cycle(graph: &HashMap<String, Vec<String>>) -> Option<Vec<String>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    let mut marks: HashMap<&str, Mark> = HashMap::new();
    let mut stack = Vec::new();

    fn visit<'a>(
        node: &'a str,
        graph: &'a HashMap<String, Vec<String>>,
        marks: &mut HashMap<&'a str, Mark>,
        stack: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        match marks.get(node) {
            Some(Mark::Done) => return None,
            Some(Mark::Visiting) => {
                stack.push(node.to_string());
                return Some(stack.clone());
            }
            None => {}
        }
        marks.insert(node, Mark::Visiting);
        stack.push(node.to_string());

        if let Some(deps) = graph.get(node) {
            for dep in deps {
                if let Some(cycle) = visit(dep, graph, marks, stack) {
                    return Some(cycle);
                }
            }
        }

        stack.pop();
        marks.insert(node, Mark::Done);
        None
    }

    for node in graph.keys() {
        if marks.contains_key(node.as_str()) {
            continue;
        }
        if let Some(cycle) = visit(node, graph, &mut marks, &mut stack) {
            return Some(cycle);
        }
    }

    None
}
