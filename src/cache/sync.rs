//! Rebuild-from-log replay: the only place that turns a `PlanEvent`
//! into cache-table writes. Used both for a full rebuild (truncate +
//! replay every line) and for incremental appends (apply the one new
//! event the store just wrote), so the two paths can never drift.

use turso::Connection;

use crate::cache::database::TicketCache;
use crate::cache::error::CacheError;
use crate::cache::queries;
use crate::log::{PlanEvent, TicketEventFields};
use crate::types::{Ticket, TicketStatus, TicketType, Tombstone};

/// Apply one decoded log line against the cache tables reachable from
/// `conn`. Field-level last-write-wins: ticket fields absent from the
/// event keep whatever the existing row already has.
pub async fn apply_event(conn: &Connection, event: &PlanEvent, now: i64) -> Result<(), CacheError> {
    match event {
        PlanEvent::Config(_) | PlanEvent::Spec(_) | PlanEvent::Stage(_) | PlanEvent::Inbox(_) => {
            // Not part of the ticket/tombstone model; the plan store
            // reads these straight off the log when it needs them.
            Ok(())
        }
        PlanEvent::Task(fields) => apply_ticket_fields(conn, TicketType::Task, fields, now).await,
        PlanEvent::Issue(fields) => apply_ticket_fields(conn, TicketType::Issue, fields, now).await,
        PlanEvent::Note(fields) => apply_ticket_fields(conn, TicketType::Note, fields, now).await,
        PlanEvent::Accept(fields) => {
            let mut ticket = load_or_default(conn, &fields.id, TicketType::Task, now).await?;
            ticket.status = TicketStatus::Accepted;
            ticket.done_at = Some(fields.done_at.clone());
            ticket.resolved_at = fields.timestamp.unwrap_or(now);
            ticket.updated_at = ticket.resolved_at;
            queries::put_ticket(conn, &ticket).await?;

            queries::insert_tombstone(
                conn,
                &Tombstone {
                    id: fields.id.clone(),
                    done_at: fields.done_at.clone(),
                    reason: fields.reason.clone(),
                    name: fields.name.clone().unwrap_or_else(|| ticket.name.clone()),
                    is_accept: true,
                    timestamp: ticket.resolved_at,
                },
            )
            .await
        }
        PlanEvent::Reject(fields) => {
            let mut ticket = load_or_default(conn, &fields.id, TicketType::Task, now).await?;
            ticket.status = TicketStatus::Rejected;
            ticket.done_at = Some(fields.done_at.clone());
            ticket.resolved_at = fields.timestamp.unwrap_or(now);
            ticket.updated_at = ticket.resolved_at;
            queries::put_ticket(conn, &ticket).await?;

            queries::insert_tombstone(
                conn,
                &Tombstone {
                    id: fields.id.clone(),
                    done_at: fields.done_at.clone(),
                    reason: Some(fields.reason.clone()),
                    name: fields.name.clone().unwrap_or_else(|| ticket.name.clone()),
                    is_accept: false,
                    timestamp: ticket.resolved_at,
                },
            )
            .await
        }
        PlanEvent::Delete(fields) => {
            let mut ticket = load_or_default(conn, &fields.id, TicketType::Task, now).await?;
            ticket.status = TicketStatus::Deleted;
            ticket.resolved_at = now;
            ticket.updated_at = now;
            queries::put_ticket(conn, &ticket).await
        }
    }
}

async fn load_or_default(
    conn: &Connection,
    id: &str,
    default_type: TicketType,
    now: i64,
) -> Result<Ticket, CacheError> {
    match queries::get_ticket(conn, id).await? {
        Some(ticket) => Ok(ticket),
        None => Ok(Ticket::new(default_type, id, now)),
    }
}

async fn apply_ticket_fields(
    conn: &Connection,
    ticket_type: TicketType,
    fields: &TicketEventFields,
    now: i64,
) -> Result<(), CacheError> {
    let was_rejected = queries::get_ticket(conn, &fields.id)
        .await?
        .map(|t| t.status == TicketStatus::Rejected)
        .unwrap_or(false);

    let mut ticket = load_or_default(conn, &fields.id, ticket_type, now).await?;
    ticket.ticket_type = ticket_type;

    if let Some(name) = &fields.name {
        ticket.name = name.clone();
    }
    if let Some(s) = &fields.s {
        if let Some(c) = s.chars().next()
            && let Some(status) = TicketStatus::from_log_char(c)
        {
            ticket.status = status;
        }
    }
    if let Some(spec) = &fields.spec {
        ticket.spec = Some(spec.clone());
    }
    if let Some(notes) = &fields.notes {
        ticket.notes = Some(notes.clone());
    }
    if let Some(accept) = &fields.accept {
        ticket.accept = Some(accept.clone());
    }
    if let Some(priority) = fields.priority {
        ticket.priority = priority;
    }
    if !fields.deps.is_empty() {
        ticket.deps = fields.deps.clone();
    }
    if let Some(parent) = &fields.parent {
        ticket.parent = Some(parent.clone());
    }
    if let Some(created_from) = &fields.created_from {
        ticket.created_from = Some(created_from.clone());
    }
    if let Some(supersedes) = &fields.supersedes {
        ticket.supersedes = Some(supersedes.clone());
    }
    if let Some(reason) = &fields.supersedes_reason {
        ticket.supersedes_reason = Some(reason.clone());
    }
    for label in &fields.labels {
        let _ = ticket.push_label(label.clone());
    }
    if let Some(author) = &fields.author {
        ticket.author = Some(author.clone());
    }
    if let Some(branch) = &fields.branch {
        ticket.branch = Some(branch.clone());
    }
    if let Some(kill_reason) = &fields.kill_reason {
        ticket.kill_reason = kill_reason.clone();
    }
    if let Some(kill_log) = &fields.kill_log {
        ticket.kill_log = Some(kill_log.clone());
    }
    if let Some(done_at) = &fields.done_at {
        ticket.done_at = Some(done_at.clone());
    }

    // Reopening a previously-rejected ticket (an explicit `p` status
    // after a reject tombstone) clears the kill markers it was closed
    // with.
    if was_rejected && ticket.status == TicketStatus::Pending {
        ticket.resolved_at = 0;
        ticket.kill_reason.clear();
    }

    ticket.updated_at = now;
    queries::put_ticket(conn, &ticket).await?;

    for (key, value) in fields.all_meta() {
        queries::put_meta(conn, &ticket.id, &key, &value).await?;
    }

    Ok(())
}

/// Full rebuild: truncate every derived table and replay the log from
/// the start. Parse warnings are logged by `log::read_events` and
/// otherwise ignored here — a malformed line contributes nothing to
/// the cache, it doesn't abort the rebuild.
pub async fn rebuild(
    cache: &TicketCache,
    log_path: &std::path::Path,
    committed_commit: &str,
    now: i64,
) -> crate::error::Result<()> {
    let outcome = crate::log::read_events(log_path)?;
    let conn = cache.connection().await?;

    cache.truncate_all().await?;
    for event in &outcome.events {
        apply_event(&conn, event, now).await?;
    }

    let log_size = crate::log::log_size(log_path)?;
    cache.record_rebuilt(committed_commit, log_size).await?;
    Ok(())
}
