//! Row <-> `Ticket`/`Tombstone` conversion and the hand-written query
//! helpers the Plan Store API uses directly (not through TQL) for hot
//! paths like `get_ticket` and `list_tickets_filtered`.

use turso::{Connection, Value as SqlValue};

use crate::cache::error::CacheError;
use crate::log::MetaValue;
use crate::types::{Ticket, TicketPriority, TicketStatus, TicketType, Tombstone};

fn col<T: turso::FromValue>(row: &turso::Row, idx: usize, name: &str) -> Result<T, CacheError> {
    row.get::<T>(idx).map_err(|e| CacheError::CacheColumnExtraction {
        column: name.to_string(),
        error: e.to_string(),
    })
}

const TICKET_COLUMNS: &str = "id, type, status, name, spec, notes, accept, priority, parent, \
    created_from, supersedes, supersedes_reason, kill_reason, kill_log, author, \
    done_at, branch, created_at, updated_at, resolved_at, compacted_at, created_from_name, \
    supersedes_name";

fn row_to_ticket(row: &turso::Row) -> Result<Ticket, CacheError> {
    let ticket_type_str: String = col(row, 1, "type")?;
    let status_code: i64 = col(row, 2, "status")?;
    let priority_code: i64 = col(row, 7, "priority")?;

    Ok(Ticket {
        id: col(row, 0, "id")?,
        ticket_type: ticket_type_str.parse::<TicketType>().unwrap_or_default(),
        status: TicketStatus::from_code(status_code).unwrap_or_default(),
        name: col(row, 3, "name")?,
        spec: col(row, 4, "spec")?,
        notes: col(row, 5, "notes")?,
        accept: col(row, 6, "accept")?,
        priority: TicketPriority::from_code(priority_code).unwrap_or_default(),
        deps: Vec::new(),
        parent: col(row, 8, "parent")?,
        created_from: col(row, 9, "created_from")?,
        supersedes: col(row, 10, "supersedes")?,
        supersedes_reason: col(row, 11, "supersedes_reason")?,
        labels: Vec::new(),
        author: col(row, 14, "author")?,
        done_at: col(row, 15, "done_at")?,
        branch: col(row, 16, "branch")?,
        kill_reason: col::<Option<String>>(row, 12, "kill_reason")?.unwrap_or_default(),
        kill_log: col(row, 13, "kill_log")?,
        created_at: col(row, 17, "created_at")?,
        updated_at: col(row, 18, "updated_at")?,
        resolved_at: col(row, 19, "resolved_at")?,
        compacted_at: col(row, 20, "compacted_at")?,
        created_from_name: col(row, 21, "created_from_name")?,
        supersedes_name: col(row, 22, "supersedes_name")?,
    })
}

/// Fetch one ticket by id, including its deps/labels.
pub async fn get_ticket(conn: &Connection, id: &str) -> Result<Option<Ticket>, CacheError> {
    let mut rows = conn
        .query(
            &format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE id = ?1"),
            [id],
        )
        .await?;

    let Some(row) = rows.next().await? else {
        return Ok(None);
    };
    let mut ticket = row_to_ticket(&row)?;
    ticket.deps = get_deps(conn, id).await?;
    ticket.labels = get_labels(conn, id).await?;
    Ok(Some(ticket))
}

pub async fn get_deps(conn: &Connection, ticket_id: &str) -> Result<Vec<String>, CacheError> {
    let mut rows = conn
        .query(
            "SELECT dep_id FROM ticket_deps WHERE ticket_id = ?1 ORDER BY ordinal ASC",
            [ticket_id],
        )
        .await?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().await? {
        out.push(col(&row, 0, "dep_id")?);
    }
    Ok(out)
}

pub async fn get_labels(conn: &Connection, ticket_id: &str) -> Result<Vec<String>, CacheError> {
    let mut rows = conn
        .query(
            "SELECT label FROM ticket_labels WHERE ticket_id = ?1",
            [ticket_id],
        )
        .await?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().await? {
        out.push(col(&row, 0, "label")?);
    }
    Ok(out)
}

pub async fn get_meta(
    conn: &Connection,
    ticket_id: &str,
) -> Result<Vec<(String, MetaValue)>, CacheError> {
    let mut rows = conn
        .query(
            "SELECT key, value_num, value_text FROM ticket_meta WHERE ticket_id = ?1",
            [ticket_id],
        )
        .await?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().await? {
        let key: String = col(&row, 0, "key")?;
        let value_num: Option<f64> = col(&row, 1, "value_num")?;
        let value_text: Option<String> = col(&row, 2, "value_text")?;
        let value = match (value_num, value_text) {
            (Some(n), _) => MetaValue::Num(n),
            (None, Some(t)) => MetaValue::Text(t),
            (None, None) => continue,
        };
        out.push((key, value));
    }
    Ok(out)
}

/// Insert or fully replace a ticket row plus its deps/labels. Callers
/// are responsible for merging field-level last-write-wins semantics
/// before calling this — see `cache::sync::apply_event`.
pub async fn put_ticket(conn: &Connection, ticket: &Ticket) -> Result<(), CacheError> {
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO tickets ({TICKET_COLUMNS}) VALUES \
             (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21,?22,?23)"
        ),
        (
            ticket.id.clone(),
            ticket.ticket_type.to_string(),
            ticket.status.as_code(),
            ticket.name.clone(),
            ticket.spec.clone(),
            ticket.notes.clone(),
            ticket.accept.clone(),
            ticket.priority.as_code(),
            ticket.parent.clone(),
            ticket.created_from.clone(),
            ticket.supersedes.clone(),
            ticket.supersedes_reason.clone(),
            ticket.kill_reason.clone(),
            ticket.kill_log.clone(),
            ticket.author.clone(),
            ticket.done_at.clone(),
            ticket.branch.clone(),
            ticket.created_at,
            ticket.updated_at,
            ticket.resolved_at,
            ticket.compacted_at,
            ticket.created_from_name.clone(),
            ticket.supersedes_name.clone(),
        ),
    )
    .await?;

    conn.execute("DELETE FROM ticket_deps WHERE ticket_id = ?1", [ticket.id.clone()])
        .await?;
    for (ordinal, dep) in ticket.deps.iter().enumerate() {
        conn.execute(
            "INSERT OR REPLACE INTO ticket_deps (ticket_id, dep_id, ordinal) VALUES (?1,?2,?3)",
            (ticket.id.clone(), dep.clone(), ordinal as i64),
        )
        .await?;
    }

    conn.execute("DELETE FROM ticket_labels WHERE ticket_id = ?1", [ticket.id.clone()])
        .await?;
    for label in &ticket.labels {
        conn.execute(
            "INSERT OR REPLACE INTO ticket_labels (ticket_id, label) VALUES (?1,?2)",
            (ticket.id.clone(), label.clone()),
        )
        .await?;
    }

    Ok(())
}

pub async fn put_meta(
    conn: &Connection,
    ticket_id: &str,
    key: &str,
    value: &MetaValue,
) -> Result<(), CacheError> {
    match value {
        MetaValue::Num(n) => {
            conn.execute(
                "INSERT OR REPLACE INTO ticket_meta (ticket_id, key, value_num, value_text) \
                 VALUES (?1, ?2, ?3, NULL)",
                (ticket_id, key, *n),
            )
            .await?;
        }
        MetaValue::Text(t) => {
            conn.execute(
                "INSERT OR REPLACE INTO ticket_meta (ticket_id, key, value_num, value_text) \
                 VALUES (?1, ?2, NULL, ?3)",
                (ticket_id, key, t.clone()),
            )
            .await?;
        }
    }
    Ok(())
}

pub async fn insert_tombstone(conn: &Connection, tombstone: &Tombstone) -> Result<(), CacheError> {
    conn.execute(
        "INSERT OR REPLACE INTO tombstones (id, done_at, reason, name, is_accept, timestamp) \
         VALUES (?1,?2,?3,?4,?5,?6)",
        (
            tombstone.id.clone(),
            tombstone.done_at.clone(),
            tombstone.reason.clone(),
            tombstone.name.clone(),
            tombstone.is_accept as i64,
            tombstone.timestamp,
        ),
    )
    .await?;
    Ok(())
}

/// Most recent tombstones, optionally filtered by accept/reject, for
/// the rejection analyzer and `report`/`tree` commands.
pub async fn list_tombstones(
    conn: &Connection,
    is_accept: Option<bool>,
    limit: i64,
) -> Result<Vec<Tombstone>, CacheError> {
    let (where_clause, binds): (String, Vec<SqlValue>) = match is_accept {
        Some(v) => (" WHERE is_accept = ?1".to_string(), vec![SqlValue::Integer(v as i64)]),
        None => (String::new(), Vec::new()),
    };
    let sql = format!(
        "SELECT id, done_at, reason, name, is_accept, timestamp FROM tombstones{where_clause} \
         ORDER BY timestamp DESC LIMIT {limit}"
    );
    let mut rows = conn.query(&sql, binds).await?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().await? {
        let is_accept_code: i64 = col(&row, 4, "is_accept")?;
        out.push(Tombstone {
            id: col(&row, 0, "id")?,
            done_at: col(&row, 1, "done_at")?,
            reason: col(&row, 2, "reason")?,
            name: col(&row, 3, "name")?,
            is_accept: is_accept_code != 0,
            timestamp: col(&row, 5, "timestamp")?,
        });
    }
    Ok(out)
}

pub async fn count_tombstones(conn: &Connection, is_accept: bool) -> Result<i64, CacheError> {
    let mut rows = conn
        .query(
            "SELECT COUNT(*) FROM tombstones WHERE is_accept = ?1",
            [is_accept as i64],
        )
        .await?;
    let row = rows.next().await?.ok_or(CacheError::CacheDataIntegrity(
        "COUNT query returned no rows".to_string(),
    ))?;
    col(&row, 0, "count")
}

/// Simple field-equality filter used by `list_tickets_filtered` — the
/// non-TQL hot path for callers that only need a handful of fixed
/// predicates (e.g. the orchestrator's stage-entry checks).
#[derive(Debug, Clone, Default)]
pub struct SimpleFilter {
    pub ticket_type: Option<TicketType>,
    pub status: Option<TicketStatus>,
    pub max_status: Option<TicketStatus>,
    pub kill_reason_set: Option<bool>,
}

pub async fn list_tickets_filtered(
    conn: &Connection,
    filter: &SimpleFilter,
) -> Result<Vec<Ticket>, CacheError> {
    let mut clauses = Vec::new();
    let mut binds: Vec<SqlValue> = Vec::new();

    if let Some(t) = filter.ticket_type {
        clauses.push(format!("type = ?{}", binds.len() + 1));
        binds.push(SqlValue::Text(t.to_string()));
    }
    if let Some(s) = filter.status {
        clauses.push(format!("status = ?{}", binds.len() + 1));
        binds.push(SqlValue::Integer(s.as_code()));
    }
    if let Some(s) = filter.max_status {
        clauses.push(format!("status < ?{}", binds.len() + 1));
        binds.push(SqlValue::Integer(s.as_code()));
    }
    if let Some(set) = filter.kill_reason_set {
        if set {
            clauses.push("kill_reason != ''".to_string());
        } else {
            clauses.push("kill_reason = ''".to_string());
        }
    }

    let where_clause = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };

    let sql = format!("SELECT {TICKET_COLUMNS} FROM tickets{where_clause} ORDER BY created_at ASC");
    let mut rows = conn.query(&sql, binds).await?;

    let mut out = Vec::new();
    while let Some(row) = rows.next().await? {
        let mut ticket = row_to_ticket(&row)?;
        ticket.deps = get_deps(conn, &ticket.id).await?;
        ticket.labels = get_labels(conn, &ticket.id).await?;
        out.push(ticket);
    }
    Ok(out)
}
