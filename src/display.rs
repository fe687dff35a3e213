//! Human-readable dashboard rendering for `status` — the one command
//! exempt from JSON output. Everything else prints JSON.

use owo_colors::OwoColorize;
use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::cache::SimpleFilter;
use crate::error::Result;
use crate::store::PlanStore;
use crate::types::{TicketStatus, TicketType};

fn format_status_colored(status: TicketStatus) -> String {
    let badge = format!("[{status}]");
    match status {
        TicketStatus::Pending => badge.yellow().to_string(),
        TicketStatus::Done => badge.cyan().to_string(),
        TicketStatus::Accepted => badge.green().to_string(),
        TicketStatus::Rejected => badge.red().to_string(),
        TicketStatus::Deleted => badge.dimmed().to_string(),
    }
}

#[derive(Tabled)]
struct KilledRow {
    #[tabled(rename = "id")]
    id: String,
    #[tabled(rename = "name")]
    name: String,
    #[tabled(rename = "kill reason")]
    kill_reason: String,
}

#[derive(Tabled)]
struct VerifyRow {
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "id")]
    id: String,
    #[tabled(rename = "name")]
    name: String,
}

#[derive(Tabled)]
struct ResolutionRow {
    #[tabled(rename = "outcome")]
    outcome: String,
    #[tabled(rename = "id")]
    id: String,
    #[tabled(rename = "name")]
    name: String,
}

pub async fn print_dashboard(store: &PlanStore) -> Result<()> {
    let all = store.list_tickets_filtered(&SimpleFilter::default()).await?;

    let tasks: Vec<_> = all.iter().filter(|t| t.ticket_type == TicketType::Task).collect();
    let issues: Vec<_> = all.iter().filter(|t| t.ticket_type == TicketType::Issue).collect();
    let killed: Vec<_> = all.iter().filter(|t| t.is_killed()).collect();

    let pending_tasks = tasks.iter().filter(|t| t.status == TicketStatus::Pending).count();
    let done_tasks = tasks.iter().filter(|t| t.status == TicketStatus::Done).count();
    let accepted_tasks = tasks.iter().filter(|t| t.status == TicketStatus::Accepted).count();
    let pending_issues = issues.iter().filter(|t| t.status == TicketStatus::Pending).count();

    println!("{}", "tix plan store".bold());
    println!(
        "tasks: {} pending, {} done, {} accepted, {} total",
        pending_tasks,
        done_tasks,
        accepted_tasks,
        tasks.len()
    );
    println!("issues: {pending_issues} pending, {} total", issues.len());

    if !killed.is_empty() {
        println!();
        println!("{}", "killed, awaiting decompose:".bold());
        let rows: Vec<KilledRow> = killed
            .iter()
            .map(|t| KilledRow {
                id: t.id.clone(),
                name: t.name.clone(),
                kill_reason: t.kill_reason.clone(),
            })
            .collect();
        println!("{}", Table::new(rows).with(Style::rounded()));
    }

    let in_flight: Vec<_> = tasks.iter().filter(|t| t.status == TicketStatus::Done).collect();
    if !in_flight.is_empty() {
        println!();
        println!("{}", "awaiting verification:".bold());
        let rows: Vec<VerifyRow> = in_flight
            .iter()
            .map(|t| VerifyRow {
                status: format_status_colored(t.status),
                id: t.id.clone(),
                name: t.name.clone(),
            })
            .collect();
        println!("{}", Table::new(rows).with(Style::rounded()));
    }

    let tombstones = store.list_tombstones(None, 5).await?;
    if !tombstones.is_empty() {
        println!();
        println!("{}", "recent resolutions:".bold());
        let rows: Vec<ResolutionRow> = tombstones
            .iter()
            .map(|stone| ResolutionRow {
                outcome: if stone.is_accept {
                    "accepted".green().to_string()
                } else {
                    "rejected".red().to_string()
                },
                id: stone.id.clone(),
                name: stone.name.clone(),
            })
            .collect();
        println!("{}", Table::new(rows).with(Style::rounded()));
    }

    Ok(())
}
