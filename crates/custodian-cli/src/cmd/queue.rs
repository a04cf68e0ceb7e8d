use crate::app::App;
use crate::output::{print_json, print_table};
use anyhow::Context;
use clap::Subcommand;
use custodian_core::queue::{field, OverrideQueue};
use std::collections::BTreeMap;

#[derive(Subcommand)]
pub enum QueueSubcommand {
    /// List every override request with its status
    List,
    /// Put an ERROR or HOLD request back to READY
    Reset { request_id: String },
}

pub fn run(app: &App, subcmd: QueueSubcommand, json: bool) -> anyhow::Result<()> {
    let queue = OverrideQueue::open(app.settings.override_queue_path());
    match subcmd {
        QueueSubcommand::List => list(&queue, json),
        QueueSubcommand::Reset { request_id } => reset(&queue, &request_id, json),
    }
}

// ---------------------------------------------------------------------------
// list
// ---------------------------------------------------------------------------

fn list(queue: &OverrideQueue, json: bool) -> anyhow::Result<()> {
    let table = queue.list().context("failed to read override queue")?;

    if json {
        let rows: Vec<BTreeMap<&str, &str>> = table
            .rows
            .iter()
            .map(|row| {
                table
                    .headers
                    .iter()
                    .map(|h| (h.as_str(), field(row, h)))
                    .collect()
            })
            .collect();
        return print_json(&rows);
    }

    if table.rows.is_empty() {
        println!("No override requests.");
        return Ok(());
    }
    let rows: Vec<Vec<String>> = table
        .rows
        .iter()
        .map(|row| {
            ["request_id", "status", "work_email", "start_date", "last_error"]
                .iter()
                .map(|c| field(row, c).to_string())
                .collect()
        })
        .collect();
    print_table(&["REQUEST", "STATUS", "EMAIL", "START", "LAST ERROR"], &rows);
    Ok(())
}

// ---------------------------------------------------------------------------
// reset
// ---------------------------------------------------------------------------

fn reset(queue: &OverrideQueue, request_id: &str, json: bool) -> anyhow::Result<()> {
    queue.reset(request_id)?;
    if json {
        print_json(&serde_json::json!({ "request_id": request_id, "status": "READY" }))?;
    } else {
        println!("Request {request_id} reset to READY");
    }
    Ok(())
}
