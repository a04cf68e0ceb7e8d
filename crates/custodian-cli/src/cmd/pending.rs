use crate::app::App;
use crate::output::{print_json, print_table};
use anyhow::Context;
use clap::Subcommand;
use custodian_core::queue::PendingQueue;

#[derive(Subcommand)]
pub enum PendingSubcommand {
    /// List staged offboarding actions
    List,
    /// Put an ERROR row back to PENDING so the next validated trigger runs it
    Reset { request_id: String },
}

pub fn run(app: &App, subcmd: PendingSubcommand, json: bool) -> anyhow::Result<()> {
    let queue = PendingQueue::open(app.settings.pending_queue_path());
    match subcmd {
        PendingSubcommand::List => list(&queue, json),
        PendingSubcommand::Reset { request_id } => reset(&queue, &request_id, json),
    }
}

fn list(queue: &PendingQueue, json: bool) -> anyhow::Result<()> {
    let actions = queue.list().context("failed to read pending queue")?;

    if json {
        return print_json(&actions);
    }
    if actions.is_empty() {
        println!("No pending offboarding actions.");
        return Ok(());
    }
    let rows: Vec<Vec<String>> = actions
        .iter()
        .map(|a| {
            vec![
                a.request_id.clone(),
                a.status.to_string(),
                a.identity.email(),
                a.identity.end_date.map(|d| d.to_string()).unwrap_or_default(),
                a.last_error.clone(),
            ]
        })
        .collect();
    print_table(&["REQUEST", "STATUS", "EMAIL", "END", "LAST ERROR"], &rows);
    Ok(())
}

fn reset(queue: &PendingQueue, request_id: &str, json: bool) -> anyhow::Result<()> {
    queue.reset(request_id)?;
    if json {
        print_json(&serde_json::json!({ "request_id": request_id, "status": "PENDING" }))?;
    } else {
        println!("Pending row {request_id} reset to PENDING");
    }
    Ok(())
}
