use crate::app::App;
use crate::output::{print_json, print_table};
use anyhow::Context;
use clap::Args;
use custodian_core::action::ActionContext;
use custodian_core::identity::TargetIdentity;
use custodian_core::notify::LogNotifier;
use custodian_core::orchestrator::{Orchestrator, RunResult};
use custodian_core::preflight::offboarding_gate_issue;
use custodian_core::workflow::Workflow;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Args)]
pub struct RunWorkflowArgs {
    /// Workflow YAML; bare names resolve against `workflows_dir`
    #[arg(long)]
    pub workflow: PathBuf,

    /// Identity JSON file
    #[arg(long)]
    pub identity: PathBuf,

    /// Record steps as SKIPPED without calling any action
    #[arg(long)]
    pub dry_run: bool,

    /// Required to execute an offboarding workflow for real
    #[arg(long)]
    pub execute_live: bool,

    #[arg(long, default_value = "manual_cli")]
    pub trigger_source: String,

    #[arg(long)]
    pub request_id: Option<String>,

    /// Resume an earlier run instead of starting a new one
    #[arg(long)]
    pub run_id: Option<String>,
}

pub fn run(app: &App, args: RunWorkflowArgs, json: bool) -> anyhow::Result<()> {
    if args.dry_run && args.execute_live {
        anyhow::bail!("--dry-run and --execute-live are mutually exclusive");
    }

    let path = resolve_workflow(&app.settings.workflows_dir, &args.workflow);
    let workflow = Workflow::load(&path)
        .with_context(|| format!("failed to load workflow '{}'", path.display()))?;
    let identity = load_identity(&args.identity)?;

    let offboarding = workflow.is_offboarding(Some(&path));
    let dry_run = args.dry_run || (offboarding && !args.execute_live);
    if offboarding {
        if let Some(issue) = offboarding_gate_issue(&workflow, &path.display().to_string()) {
            anyhow::bail!("{issue}");
        }
        if dry_run && !args.dry_run {
            tracing::warn!("offboarding workflow runs as dry run; pass --execute-live to execute");
        }
    }

    let policy = app.policy()?;
    let registry = app.registry(policy.clone());
    let mut orchestrator = Orchestrator::new(registry)
        .with_notifier(Arc::new(LogNotifier), app.settings.notify_mode)
        .with_state_dir(app.settings.state_dir.clone());
    if offboarding {
        orchestrator = orchestrator.with_policy_guard(policy);
    }

    let rt = tokio::runtime::Runtime::new()?;
    let result = rt.block_on(async {
        let cancel = CancellationToken::new();
        let on_signal = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                on_signal.cancel();
            }
        });

        let mut ctx = ActionContext::new(identity, args.trigger_source.clone())
            .with_request_id(args.request_id.clone())
            .with_cancel(cancel);
        ctx.run_id = args.run_id.clone().unwrap_or_default();
        orchestrator.run(&workflow, &ctx, dry_run).await
    })?;

    if json {
        print_json(&serde_json::json!({
            "dry_run": dry_run,
            "result": result,
        }))?;
    } else {
        print_result(&result, dry_run);
    }

    if !result.success {
        anyhow::bail!("workflow '{}' failed: {}", result.workflow, result.failure_summary());
    }
    Ok(())
}

fn resolve_workflow(workflows_dir: &Path, given: &Path) -> PathBuf {
    if given.exists() || given.is_absolute() {
        return given.to_path_buf();
    }
    let candidate = workflows_dir.join(given);
    if candidate.exists() {
        return candidate;
    }
    let with_ext = workflows_dir.join(given).with_extension("yaml");
    if with_ext.exists() {
        with_ext
    } else {
        given.to_path_buf()
    }
}

fn load_identity(path: &Path) -> anyhow::Result<TargetIdentity> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read identity file '{}'", path.display()))?;
    let identity: TargetIdentity = serde_json::from_str(&data)
        .with_context(|| format!("identity file '{}' is not valid JSON", path.display()))?;
    identity.validate()?;
    Ok(identity)
}

fn print_result(result: &RunResult, dry_run: bool) {
    let verdict = match (result.success, result.cancelled) {
        (_, true) => "cancelled",
        (true, _) => "succeeded",
        (false, _) => "failed",
    };
    println!(
        "Run {} ({}{}) {verdict}: {}/{} step(s) ok, {} failed",
        result.run_id,
        result.workflow,
        if dry_run { ", dry run" } else { "" },
        result.step_succeeded,
        result.step_total,
        result.step_failed,
    );
    if !result.failures.is_empty() {
        let rows: Vec<Vec<String>> = result
            .failures
            .iter()
            .map(|f| vec![f.step.clone(), f.detail.clone()])
            .collect();
        print_table(&["STEP", "DETAIL"], &rows);
    }
}
