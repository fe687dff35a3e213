#[path = "common/mod.rs"]
mod common;

use common::RootGuard;
use ralph::types::{Ticket, TicketPriority, TicketStatus, TicketType};
use ralph::PlanStore;
use serial_test::serial;

#[tokio::test]
#[serial]
async fn upsert_then_list_round_trips() {
    let _guard = RootGuard::new();
    let store = PlanStore::open(".").await.unwrap();

    let mut task = Ticket::new(TicketType::Task, "write the parser", 1_000);
    task.notes = Some("parse TQL expressions".to_string());
    task.accept = Some("tql test suite passes".to_string());
    store.upsert_ticket(&task).await.unwrap();

    let fetched = store.get_ticket(&task.id).await.unwrap();
    assert_eq!(fetched.name, "write the parser");
    assert_eq!(fetched.status, TicketStatus::Pending);

    let all = store
        .list_tickets_filtered(&ralph::cache::SimpleFilter {
            ticket_type: Some(TicketType::Task),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(all.len(), 1);
}

#[tokio::test]
#[serial]
async fn accept_writes_tombstone_and_resolves_status() {
    let _guard = RootGuard::new();
    let store = PlanStore::open(".").await.unwrap();

    let mut task = Ticket::new(TicketType::Task, "ship it", 1_000);
    task.status = TicketStatus::Done;
    task.done_at = Some("abc123".to_string());
    store.upsert_ticket(&task).await.unwrap();

    store
        .add_tombstone(
            &task.id,
            true,
            task.done_at.clone().unwrap(),
            Some("looks good".to_string()),
            Some(task.name.clone()),
        )
        .await
        .unwrap();
    task.status = TicketStatus::Accepted;
    store.upsert_ticket(&task).await.unwrap();

    let tombstones = store.list_tombstones(Some(true), 10).await.unwrap();
    assert_eq!(tombstones.len(), 1);
    assert_eq!(tombstones[0].id, task.id);
    assert_eq!(tombstones[0].done_at, "abc123");

    let fetched = store.get_ticket(&task.id).await.unwrap();
    assert!(fetched.status.is_resolved());
}

#[tokio::test]
#[serial]
async fn validate_flags_broken_dependency() {
    let _guard = RootGuard::new();
    let store = PlanStore::open(".").await.unwrap();

    let mut task = Ticket::new(TicketType::Task, "depends on nothing real", 1_000);
    task.deps = vec!["t-deadbeef".to_string()];
    store.upsert_ticket(&task).await.unwrap();

    let report = store.validate().await.unwrap();
    assert!(!report.valid);
    assert!(report.errors.iter().any(|e| e.contains("t-deadbeef")));
}

#[tokio::test]
#[serial]
async fn validate_detects_dependency_cycle() {
    let _guard = RootGuard::new();
    let store = PlanStore::open(".").await.unwrap();

    let mut a = Ticket::new(TicketType::Task, "a", 1_000);
    let mut b = Ticket::new(TicketType::Task, "b", 1_000);
    a.deps = vec![b.id.clone()];
    b.deps = vec![a.id.clone()];
    store.upsert_ticket(&a).await.unwrap();
    store.upsert_ticket(&b).await.unwrap();

    let report = store.validate().await.unwrap();
    assert!(!report.valid);
}

#[tokio::test]
#[serial]
async fn plan_compact_drops_resolved_committed_tickets() {
    let _guard = RootGuard::new();
    let store = PlanStore::open(".").await.unwrap();

    let mut done = Ticket::new(TicketType::Task, "old resolved work", 1_000);
    done.status = TicketStatus::Accepted;
    done.done_at = Some("abc123".to_string());
    done.resolved_at = 1_000;
    store.upsert_ticket(&done).await.unwrap();

    let mut pending = Ticket::new(TicketType::Task, "still open", 1_000);
    store.upsert_ticket(&pending).await.unwrap();

    let mut committed = std::collections::HashSet::new();
    committed.insert(done.id.clone());
    store
        .plan_compact(&committed, &std::collections::HashSet::new())
        .await
        .unwrap();

    assert!(store.get_ticket(&done.id).await.is_err());
    assert!(store.get_ticket(&pending.id).await.is_ok());
}

#[tokio::test]
#[serial]
async fn prioritize_demotes_cleanup_tasks() {
    let _guard = RootGuard::new();
    let store = PlanStore::open(".").await.unwrap();

    let mut task = Ticket::new(TicketType::Task, "docs cleanup for the query module", 1_000);
    store.upsert_ticket(&task).await.unwrap();

    let events = ralph::prioritize::prioritize(&store).await.unwrap();
    assert!(!events.is_empty());
    store.append_events(&events).await.unwrap();

    let fetched = store.get_ticket(&task.id).await.unwrap();
    assert_eq!(fetched.priority, TicketPriority::Low);
}

#[tokio::test]
#[serial]
async fn prioritize_elevates_the_critical_path_bottleneck() {
    let _guard = RootGuard::new();
    let store = PlanStore::open(".").await.unwrap();

    let mut bottleneck = Ticket::new(TicketType::Task, "shared schema change", 1_000);
    store.upsert_ticket(&bottleneck).await.unwrap();

    let mut dependent_a = Ticket::new(TicketType::Task, "build on schema a", 1_000);
    dependent_a.deps = vec![bottleneck.id.clone()];
    store.upsert_ticket(&dependent_a).await.unwrap();

    let mut dependent_b = Ticket::new(TicketType::Task, "build on schema b", 1_000);
    dependent_b.deps = vec![bottleneck.id.clone()];
    store.upsert_ticket(&dependent_b).await.unwrap();

    let events = ralph::prioritize::prioritize(&store).await.unwrap();
    store.append_events(&events).await.unwrap();

    let fetched = store.get_ticket(&bottleneck.id).await.unwrap();
    assert_eq!(fetched.priority, TicketPriority::High);
}
