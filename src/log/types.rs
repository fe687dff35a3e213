//! Wire shapes for plan log events.
//!
//! A line is any JSON object with a `t` discriminator. We deserialize
//! leniently into `RawEvent` first (see `log::mod`) rather than
//! directly into `PlanEvent`, since a malformed line must produce a
//! parse warning and not abort the replay.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{TicketPriority, TicketType};

/// Metadata value attached to a ticket event, either numeric or text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MetaValue {
    Num(f64),
    Text(String),
}

/// Fields shared by `task` / `issue` / `note` events. The reference
/// corpus shows both an inline form (meta keys as top-level fields
/// outside the known set) and a nested `meta: {}` form; we accept
/// both on read and only ever emit the nested form.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TicketEventFields {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accept: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<TicketPriority>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deps: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supersedes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supersedes_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kill_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kill_log: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done_at: Option<String>,
    /// Nested telemetry form; new writes always use this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<std::collections::BTreeMap<String, MetaValue>>,
    /// Inline legacy telemetry: any unrecognized top-level key.
    #[serde(flatten)]
    pub inline_meta: std::collections::BTreeMap<String, Value>,
}

impl TicketEventFields {
    pub fn ticket_type(&self, t: &str) -> TicketType {
        match t {
            "issue" => TicketType::Issue,
            "note" => TicketType::Note,
            _ => TicketType::Task,
        }
    }

    /// All metadata entries, merging the nested form with any
    /// remaining inline (non-schema) keys.
    pub fn all_meta(&self) -> Vec<(String, MetaValue)> {
        let mut out = Vec::new();
        if let Some(meta) = &self.meta {
            out.extend(meta.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        for (k, v) in &self.inline_meta {
            let value = match v {
                Value::Number(n) => n.as_f64().map(MetaValue::Num),
                Value::String(s) => Some(MetaValue::Text(s.clone())),
                _ => None,
            };
            if let Some(value) = value {
                out.push((k.clone(), value));
            }
        }
        out
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptEventFields {
    pub id: String,
    pub done_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectEventFields {
    pub id: String,
    pub done_at: String,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteEventFields {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxEventFields {
    pub id: String,
    pub spec: String,
    pub status: String,
    pub added_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecEventFields {
    pub spec: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageEventFields {
    pub stage: String,
}

/// A single plan log event, post-validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum PlanEvent {
    #[serde(rename = "config")]
    Config(Value),
    #[serde(rename = "spec")]
    Spec(SpecEventFields),
    #[serde(rename = "stage")]
    Stage(StageEventFields),
    #[serde(rename = "task")]
    Task(TicketEventFields),
    #[serde(rename = "issue")]
    Issue(TicketEventFields),
    #[serde(rename = "note")]
    Note(TicketEventFields),
    #[serde(rename = "accept")]
    Accept(AcceptEventFields),
    #[serde(rename = "reject")]
    Reject(RejectEventFields),
    #[serde(rename = "delete")]
    Delete(DeleteEventFields),
    #[serde(rename = "inbox")]
    Inbox(InboxEventFields),
}

impl PlanEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            PlanEvent::Config(_) => "config",
            PlanEvent::Spec(_) => "spec",
            PlanEvent::Stage(_) => "stage",
            PlanEvent::Task(_) => "task",
            PlanEvent::Issue(_) => "issue",
            PlanEvent::Note(_) => "note",
            PlanEvent::Accept(_) => "accept",
            PlanEvent::Reject(_) => "reject",
            PlanEvent::Delete(_) => "delete",
            PlanEvent::Inbox(_) => "inbox",
        }
    }
}
