use crate::app::App;
use crate::output::print_json;
use custodian_core::preflight;

pub fn run(app: &App, json: bool) -> anyhow::Result<()> {
    let policy = app.policy()?;
    let registry = app.registry(policy.clone());
    let report = preflight::run(&app.settings, &registry, &policy);

    if json {
        print_json(&serde_json::json!({
            "ok": report.is_clean(),
            "blocking": report.blocking,
            "warnings": report.warnings,
            "policy": policy.summary(),
            "execution_mode": app.settings.execution_mode,
        }))?;
    } else {
        let summary = policy.summary();
        println!(
            "execution_mode={} protected_rules={} actions={}",
            app.settings.execution_mode,
            summary.total_rules,
            registry.len()
        );
        for w in &report.warnings {
            println!("[warning] {w}");
        }
        for b in &report.blocking {
            println!("[blocking] {b}");
        }
        if report.is_clean() && report.warnings.is_empty() {
            println!("Preflight passed. No issues.");
        }
    }

    if !report.is_clean() {
        anyhow::bail!("preflight found {} blocking issue(s)", report.blocking.len());
    }
    Ok(())
}
