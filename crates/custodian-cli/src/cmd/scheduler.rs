use crate::app::App;
use crate::output::print_json;
use chrono::{NaiveDate, Utc};
use custodian_core::scheduler::{Scheduler, TickReport};
use tokio_util::sync::CancellationToken;

pub fn run(app: &App, once: bool, date: Option<NaiveDate>, json: bool) -> anyhow::Result<()> {
    let policy = app.policy()?;
    let registry = app.registry(policy.clone());
    let validator = app.validator()?;
    let mut scheduler = Scheduler::new(app.settings.clone(), registry, policy, validator)?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let cancel = CancellationToken::new();
        let on_signal = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received; stopping after the current step");
                on_signal.cancel();
            }
        });

        if !once {
            scheduler.run(cancel).await?;
            return Ok(());
        }

        scheduler.startup()?;
        let today = date.unwrap_or_else(|| Utc::now().date_naive());
        let report = scheduler.tick(today, &cancel).await;
        if json {
            print_json(&report)?;
        } else {
            print_report(&report);
        }
        if !report.failed.is_empty() {
            anyhow::bail!("{} item(s) failed: {}", report.failed.len(), report.failed.join(", "));
        }
        Ok(())
    })
}

fn print_report(report: &TickReport) {
    let sections: [(&str, &Vec<String>); 8] = [
        ("onboarded", &report.onboarded),
        ("offboarded", &report.offboarded),
        ("staged", &report.staged),
        ("held (pending row ERROR)", &report.held),
        ("overrides completed", &report.overrides_completed),
        ("deferred", &report.deferred),
        ("already completed", &report.already_completed),
        ("failed", &report.failed),
    ];
    let mut any = false;
    for (label, items) in sections {
        if !items.is_empty() {
            any = true;
            println!("{label}: {}", items.join(", "));
        }
    }
    if !any {
        println!("Nothing to do.");
    }
    if report.cancelled {
        println!("tick cancelled before completion");
    }
}
