//! Plan Store API: the facade the rest of the engine uses instead of
//! touching the log or cache directly. Every write goes log-first,
//! cache-second, within the same call — see `upsert_ticket`.

pub mod search;
pub mod validate;

pub use search::{SearchHit, keyword_cloud};
pub use validate::{RefCounts, ValidationReport};

use std::path::PathBuf;

use crate::cache::{SimpleFilter, TicketCache};
use crate::error::{RalphError, Result};
use crate::log::{
    AcceptEventFields, DeleteEventFields, PlanEvent, RejectEventFields, TicketEventFields,
};
use crate::types::{now_unix, Ticket, TicketStatus};

pub struct PlanStore {
    pub log_path: PathBuf,
    pub repo_root: PathBuf,
    pub cache: TicketCache,
}

/// Resolution state of a reference (`deps`/`parent`/`created_from`/`supersedes`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefState {
    Resolved,
    Stale,
    Broken,
}

impl PlanStore {
    pub async fn open(repo_root: impl Into<PathBuf>) -> Result<Self> {
        let repo_root = repo_root.into();
        let log_path = crate::types::plan_log_path();
        let cache_path = crate::types::cache_db_path();
        let commit = crate::git::current_commit(&repo_root);
        let cache =
            crate::cache::open_and_refresh(&cache_path, &log_path, &commit, now_unix()).await?;
        Ok(PlanStore {
            log_path,
            repo_root,
            cache,
        })
    }

    /// Re-check staleness and rebuild if the log or HEAD moved since
    /// `open` — cheap when nothing changed, since `is_stale` is three
    /// meta lookups.
    pub async fn refresh(&self) -> Result<()> {
        let commit = crate::git::current_commit(&self.repo_root);
        let log_size = crate::log::log_size(&self.log_path)?;
        if self.cache.is_stale(&commit, log_size).await? {
            crate::cache::sync::rebuild(&self.cache, &self.log_path, &commit, now_unix()).await?;
        }
        Ok(())
    }

    /// Write one event line to the log and apply it to the cache.
    pub async fn upsert_ticket(&self, ticket: &Ticket) -> Result<()> {
        self.append_event(&ticket_to_event(ticket)).await
    }

    /// Write one event to the log and apply it to the cache. The
    /// building block every higher-level write (`upsert_ticket`,
    /// `add_tombstone`, stage executors' batched `new_events`) funnels
    /// through, so log and cache can never drift from each other.
    pub async fn append_event(&self, event: &PlanEvent) -> Result<()> {
        crate::log::append_event(&self.log_path, event)?;
        let conn = self.cache.connection().await?;
        crate::cache::sync::apply_event(&conn, event, now_unix()).await?;
        Ok(())
    }

    /// Apply a batch of events in order — the orchestrator's "apply
    /// `new_events` atomically" step. Atomic only with respect to
    /// ordering (no interleaving with other store access, since the
    /// orchestrator is single-threaded); a crash mid-batch leaves a
    /// valid prefix in the log, which replay tolerates.
    pub async fn append_events(&self, events: &[PlanEvent]) -> Result<()> {
        for event in events {
            self.append_event(event).await?;
        }
        Ok(())
    }

    pub async fn get_ticket(&self, id: &str) -> Result<Ticket> {
        let conn = self.cache.connection().await?;
        crate::cache::queries::get_ticket(&conn, id)
            .await?
            .ok_or_else(|| RalphError::NotFound(format!("ticket '{id}' not found")))
    }

    pub async fn list_tickets_filtered(&self, filter: &SimpleFilter) -> Result<Vec<Ticket>> {
        let conn = self.cache.connection().await?;
        Ok(crate::cache::queries::list_tickets_filtered(&conn, filter).await?)
    }

    /// `done_at` is the ticket's already-recorded commit hash from when
    /// it was marked done, not a fresh timestamp — the tombstone records
    /// provenance of the work, not the moment it was judged.
    pub async fn add_tombstone(
        &self,
        id: &str,
        is_accept: bool,
        done_at: String,
        reason: Option<String>,
        name: Option<String>,
    ) -> Result<()> {
        let event = if is_accept {
            PlanEvent::Accept(AcceptEventFields {
                id: id.to_string(),
                done_at,
                timestamp: Some(now_unix()),
                reason,
                name,
            })
        } else {
            PlanEvent::Reject(RejectEventFields {
                id: id.to_string(),
                done_at,
                reason: reason.unwrap_or_default(),
                timestamp: Some(now_unix()),
                name,
            })
        };
        crate::log::append_event(&self.log_path, &event)?;
        let conn = self.cache.connection().await?;
        crate::cache::sync::apply_event(&conn, &event, now_unix()).await
            .map_err(RalphError::from)
    }

    pub async fn delete_ticket(&self, id: &str) -> Result<()> {
        let event = PlanEvent::Delete(DeleteEventFields { id: id.to_string() });
        crate::log::append_event(&self.log_path, &event)?;
        let conn = self.cache.connection().await?;
        crate::cache::sync::apply_event(&conn, &event, now_unix()).await
            .map_err(RalphError::from)
    }

    /// `resolved` if `id` exists with `status < 2`; `stale` if it exists
    /// only as a tombstone or with a resolved status; `broken` if it
    /// appears nowhere.
    pub async fn resolve_ref(&self, id: &str) -> Result<RefState> {
        let conn = self.cache.connection().await?;
        if let Some(ticket) = crate::cache::queries::get_ticket(&conn, id).await? {
            return Ok(if ticket.status.is_resolved() {
                RefState::Stale
            } else {
                RefState::Resolved
            });
        }

        let mut rows = conn
            .query("SELECT 1 FROM tombstones WHERE id = ?1 LIMIT 1", [id])
            .await
            .map_err(crate::cache::CacheError::from)?;
        if rows.next().await.map_err(crate::cache::CacheError::from)?.is_some() {
            return Ok(RefState::Stale);
        }

        Ok(RefState::Broken)
    }

    /// For every `deps`/`created_from`/`supersedes`/`parent` edge across
    /// all tickets, how many resolve/are stale/are broken.
    pub async fn count_refs(&self) -> Result<RefCounts> {
        validate::count_refs(self).await
    }

    pub async fn validate(&self) -> Result<ValidationReport> {
        validate::validate(self).await
    }

    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
        search::search(self, query, k).await
    }

    pub async fn list_tombstones(
        &self,
        is_accept: Option<bool>,
        limit: i64,
    ) -> Result<Vec<crate::types::Tombstone>> {
        let conn = self.cache.connection().await?;
        Ok(crate::cache::queries::list_tombstones(&conn, is_accept, limit).await?)
    }

    /// Rewrite the log: one line per still-present ticket, then
    /// tombstones, dropping resolved tickets in `committed_ids` unless
    /// they're also named in `preserve_ids` (the caller's "don't drop
    /// my unpushed history" escape hatch).
    pub async fn plan_compact(
        &self,
        committed_ids: &std::collections::HashSet<String>,
        preserve_ids: &std::collections::HashSet<String>,
    ) -> Result<()> {
        let conn = self.cache.connection().await?;
        let filter = SimpleFilter::default();
        let all = crate::cache::queries::list_tickets_filtered(&conn, &filter).await?;

        let mut lines = Vec::new();
        for ticket in &all {
            let drop = ticket.status.is_resolved()
                && committed_ids.contains(&ticket.id)
                && !preserve_ids.contains(&ticket.id);
            if drop {
                continue;
            }
            lines.push(serde_json::to_string(&ticket_to_event(ticket))?);

            if ticket.status == TicketStatus::Accepted || ticket.status == TicketStatus::Rejected {
                if let Some(done_at) = &ticket.done_at {
                    let is_accept = ticket.status == TicketStatus::Accepted;
                    let event = if is_accept {
                        PlanEvent::Accept(AcceptEventFields {
                            id: ticket.id.clone(),
                            done_at: done_at.clone(),
                            timestamp: Some(ticket.resolved_at),
                            reason: None,
                            name: Some(ticket.name.clone()),
                        })
                    } else {
                        PlanEvent::Reject(RejectEventFields {
                            id: ticket.id.clone(),
                            done_at: done_at.clone(),
                            reason: ticket.kill_reason.clone(),
                            timestamp: Some(ticket.resolved_at),
                            name: Some(ticket.name.clone()),
                        })
                    };
                    lines.push(serde_json::to_string(&event)?);
                }
            }
        }

        crate::log::rewrite_log(&self.log_path, &lines)?;
        self.refresh().await
    }
}

/// Snapshot a ticket's full current state into a log event. Every
/// write carries the whole ticket, which is what makes replay
/// tolerant of last-write-wins on any subset of fields.
pub fn ticket_to_event(ticket: &Ticket) -> PlanEvent {
    let fields = TicketEventFields {
        id: ticket.id.clone(),
        name: Some(ticket.name.clone()),
        s: Some(ticket.status.log_char().to_string()),
        spec: ticket.spec.clone(),
        notes: ticket.notes.clone(),
        accept: ticket.accept.clone(),
        priority: Some(ticket.priority),
        deps: ticket.deps.clone(),
        parent: ticket.parent.clone(),
        created_from: ticket.created_from.clone(),
        supersedes: ticket.supersedes.clone(),
        supersedes_reason: ticket.supersedes_reason.clone(),
        labels: ticket.labels.clone(),
        author: ticket.author.clone(),
        branch: ticket.branch.clone(),
        kill_reason: Some(ticket.kill_reason.clone()),
        kill_log: ticket.kill_log.clone(),
        done_at: ticket.done_at.clone(),
        meta: None,
        inline_meta: Default::default(),
    };

    match ticket.ticket_type {
        crate::types::TicketType::Task => PlanEvent::Task(fields),
        crate::types::TicketType::Issue => PlanEvent::Issue(fields),
        crate::types::TicketType::Note => PlanEvent::Note(fields),
    }
}
