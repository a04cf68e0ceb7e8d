//! The control loop.
//!
//! Each tick runs three phases in order: validated onboarding, validated
//! offboarding (per execution mode), then the manual override queue. A
//! failure for one identity is logged and recorded; it never aborts the tick.
//!
//! Destructive offboarding runs only after a clean startup report, only with
//! a gated workflow, and always under the protected-target guard.

use crate::action::{ActionContext, ActionRegistry};
use crate::config::Settings;
use crate::error::{CustodianError, Result};
use crate::history::CompletionHistory;
use crate::identity::TargetIdentity;
use crate::orchestrator::{Orchestrator, RunResult};
use crate::policy::ProtectedTargetPolicy;
use crate::preflight::{self, PreflightReport};
use crate::queue::{ManualOverrideRequest, OverrideQueue, PendingQueue, Staged};
use crate::trigger::TriggerValidator;
use crate::types::{ExecutionMode, PendingStatus, TriggerKind};
use crate::workflow::Workflow;
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const ONBOARD_SOURCE: &str = "dual_validation";
const OFFBOARD_SOURCE: &str = "dual_validation_departure";
const OVERRIDE_SOURCE: &str = "manual_override_csv";

/// What one tick did, by email or request id.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TickReport {
    pub onboarded: Vec<String>,
    pub offboarded: Vec<String>,
    pub staged: Vec<String>,
    /// Departures whose pending row is ERROR and waits for an operator reset.
    pub held: Vec<String>,
    pub overrides_completed: Vec<String>,
    pub deferred: Vec<String>,
    pub already_completed: Vec<String>,
    pub failed: Vec<String>,
    pub cancelled: bool,
}

/// Whether an override request may run today.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready(String),
    Deferred(String),
    Invalid(String),
}

/// Early-execution switches first, then the start-date guard.
pub fn override_readiness(
    settings: &Settings,
    request: &ManualOverrideRequest,
    today: NaiveDate,
) -> Readiness {
    if settings.manual_override_allow_early {
        return Readiness::Ready("global early-execution override enabled".into());
    }
    if request.allow_before_start_date {
        return Readiness::Ready("request-level early-execution override enabled".into());
    }
    if !settings.manual_override_enforce_start_date {
        return Readiness::Ready("start-date guard disabled".into());
    }
    match request.identity.start_date {
        None => Readiness::Invalid("start_date missing; expected YYYY-MM-DD".into()),
        Some(start) if start > today => Readiness::Deferred(format!(
            "deferred until start_date={start} (today={today})"
        )),
        Some(_) => Readiness::Ready("eligible by start-date policy".into()),
    }
}

/// Run ids are stable per request and event so a rerun resumes the same
/// run state instead of starting over.
pub fn run_id_for(kind: TriggerKind, request_id: &str, identity: &TargetIdentity) -> String {
    let raw = format!("{}_{request_id}_{}", kind.request_prefix(), identity.dedupe_key(kind));
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '-' })
        .collect()
}

pub struct Scheduler {
    settings: Arc<Settings>,
    registry: Arc<ActionRegistry>,
    policy: Arc<ProtectedTargetPolicy>,
    validator: TriggerValidator,
    startup_report: Option<PreflightReport>,
    overrides: OverrideQueue,
    pending: PendingQueue,
    history: CompletionHistory,
}

impl Scheduler {
    pub fn new(
        settings: Arc<Settings>,
        registry: Arc<ActionRegistry>,
        policy: Arc<ProtectedTargetPolicy>,
        validator: TriggerValidator,
    ) -> Result<Self> {
        Ok(Self {
            overrides: OverrideQueue::open(settings.override_queue_path()),
            pending: PendingQueue::open(settings.pending_queue_path()),
            history: CompletionHistory::load(&settings.history_path())?,
            settings,
            registry,
            policy,
            validator,
            startup_report: None,
        })
    }

    pub fn history(&self) -> &CompletionHistory {
        &self.history
    }

    pub fn preflight(&self) -> PreflightReport {
        preflight::run(&self.settings, &self.registry, &self.policy)
    }

    /// Create queue files and run preflight. With `preflight_strict`, any
    /// blocking issue refuses startup; without it the scheduler runs but
    /// never executes offboarding live.
    pub fn startup(&mut self) -> Result<PreflightReport> {
        self.overrides.ensure()?;
        self.pending.ensure()?;
        let report = self.preflight();
        report.log();
        if !report.is_clean() {
            if self.settings.preflight_strict {
                return Err(CustodianError::Configuration(format!(
                    "preflight_strict is enabled and preflight found {} blocking issue(s); first: {}",
                    report.blocking.len(),
                    report.blocking[0]
                )));
            }
            tracing::warn!("continuing despite blocking preflight issues; offboarding is staged only until they are fixed and the scheduler restarts");
        }
        self.startup_report = Some(report.clone());
        Ok(report)
    }

    /// Whether validated offboarding triggers execute, and why.
    pub fn live_allowed(&self) -> (bool, String) {
        let Some(startup) = &self.startup_report else {
            return (false, "startup checks have not run".into());
        };
        if let Some(first) = startup.blocking.first() {
            return (false, format!("live offboarding refused by blocking preflight issue: {first}"));
        }
        match self.settings.execution_mode {
            ExecutionMode::Live => (true, "live mode forced by configuration".into()),
            ExecutionMode::Staged => (false, "safety-staged mode configured".into()),
            ExecutionMode::Auto => {
                let report = self.preflight();
                if let Some(first) = report.blocking.first() {
                    return (false, format!("auto mode paused by blocking preflight issue: {first}"));
                }
                if self.policy.is_empty() {
                    return (false, "auto mode paused because protected target policy is empty".into());
                }
                (true, "auto mode checks passed".into())
            }
        }
    }

    /// Startup, an immediate tick, then one tick per interval until `cancel`
    /// fires.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<()> {
        self.startup()?;
        let interval = Duration::from_secs(self.settings.interval_minutes.max(1) * 60);
        tracing::info!(
            interval_minutes = self.settings.interval_minutes,
            execution_mode = %self.settings.execution_mode,
            override_queue = %self.settings.override_queue_path().display(),
            pending_queue = %self.settings.pending_queue_path().display(),
            "scheduler started"
        );
        loop {
            let report = self.tick(Utc::now().date_naive(), &cancel).await;
            if report.cancelled {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = cancel.cancelled() => break,
            }
        }
        tracing::info!("scheduler stopped by operator");
        Ok(())
    }

    pub async fn tick(&mut self, today: NaiveDate, cancel: &CancellationToken) -> TickReport {
        tracing::info!(%today, "scheduler tick");
        let mut report = TickReport::default();

        self.process_onboarding(today, cancel, &mut report).await;
        if !cancel.is_cancelled() {
            self.process_offboarding(today, cancel, &mut report).await;
        }
        if !cancel.is_cancelled() {
            if let Err(e) = self.process_overrides(today, cancel, &mut report).await {
                tracing::error!("override queue processing failed: {e}");
            }
        }
        report.cancelled = cancel.is_cancelled();
        report
    }

    // -----------------------------------------------------------------------
    // Phases
    // -----------------------------------------------------------------------

    async fn process_onboarding(
        &mut self,
        today: NaiveDate,
        cancel: &CancellationToken,
        report: &mut TickReport,
    ) {
        let triggers = match self.validator.validate(TriggerKind::Onboard, today).await {
            Ok(t) => t,
            Err(e) => {
                tracing::error!("onboarding scan failed: {e}");
                return;
            }
        };
        for trigger in triggers {
            if cancel.is_cancelled() {
                return;
            }
            let identity = trigger.identity();
            let email = identity.email();
            if self.history.contains(TriggerKind::Onboard, identity) {
                tracing::info!(email = %email, "onboarding already completed; skipping");
                report.already_completed.push(email);
                continue;
            }
            let request_id = trigger.request_id(TriggerKind::Onboard);
            if self
                .execute(TriggerKind::Onboard, identity, ONBOARD_SOURCE, &request_id, false, cancel)
                .await
            {
                report.onboarded.push(email);
            } else {
                report.failed.push(email);
            }
        }
    }

    async fn process_offboarding(
        &mut self,
        today: NaiveDate,
        cancel: &CancellationToken,
        report: &mut TickReport,
    ) {
        let triggers = match self.validator.validate(TriggerKind::Offboard, today).await {
            Ok(t) => t,
            Err(e) => {
                tracing::error!("offboarding scan failed: {e}");
                return;
            }
        };
        if triggers.is_empty() {
            return;
        }
        let (execute_live, reason) = self.live_allowed();
        tracing::info!(
            count = triggers.len(),
            mode = %self.settings.execution_mode,
            execute_live,
            "validated departures: {reason}"
        );

        for trigger in triggers {
            if cancel.is_cancelled() {
                return;
            }
            let identity = trigger.identity();
            let email = identity.email();

            if self.history.contains(TriggerKind::Offboard, identity) {
                tracing::info!(email = %email, "offboarding already completed; clearing stale pending row");
                if let Err(e) = self.pending.remove_for(identity) {
                    tracing::error!(email = %email, "could not remove pending row: {e}");
                }
                report.already_completed.push(email);
                continue;
            }

            let request_id = match self.pending.stage(&trigger, PendingStatus::Pending, "") {
                Ok(Staged::Written(outcome, request_id)) => {
                    tracing::info!(email = %email, request_id = %request_id, ?outcome, "pending offboarding row staged");
                    request_id
                }
                Ok(Staged::Held(request_id)) => {
                    tracing::warn!(email = %email, request_id = %request_id, "pending row is ERROR; waiting for operator reset");
                    report.held.push(email);
                    continue;
                }
                Err(e) => {
                    tracing::error!(email = %email, "could not stage pending row: {e}");
                    report.failed.push(email);
                    continue;
                }
            };

            if !execute_live {
                tracing::info!(email = %email, "offboarding staged only; no destructive actions executed");
                report.staged.push(email);
                continue;
            }

            if self
                .execute(TriggerKind::Offboard, identity, OFFBOARD_SOURCE, &request_id, false, cancel)
                .await
            {
                if let Err(e) = self.pending.remove_for(identity) {
                    tracing::error!(email = %email, "could not remove completed pending row: {e}");
                }
                report.offboarded.push(email);
            } else {
                if let Err(e) = self.pending.mark_error(
                    &identity.dedupe_key(TriggerKind::Offboard),
                    "offboarding execution failed; investigate, then run `custodian pending reset` once remediated",
                ) {
                    tracing::error!(email = %email, "could not mark pending row ERROR: {e}");
                }
                report.failed.push(email);
            }
        }
    }

    async fn process_overrides(
        &mut self,
        today: NaiveDate,
        cancel: &CancellationToken,
        report: &mut TickReport,
    ) -> Result<()> {
        let batch = self.overrides.load_ready()?;

        for (request_id, error) in &batch.invalid {
            if request_id == "missing-request-id" {
                tracing::error!("override row has no request_id and cannot be marked ERROR; fix the CSV by hand");
                continue;
            }
            tracing::error!(request_id = %request_id, "invalid override request: {error}");
            self.overrides.mark_error(request_id, error)?;
            report.failed.push(request_id.clone());
        }

        for request in batch.ready {
            if cancel.is_cancelled() {
                return Ok(());
            }
            let id = request.request_id.clone();
            match override_readiness(&self.settings, &request, today) {
                Readiness::Ready(_) => {}
                Readiness::Deferred(reason) => {
                    tracing::info!(request_id = %id, "{reason}");
                    report.deferred.push(id);
                    continue;
                }
                Readiness::Invalid(reason) => {
                    tracing::error!(request_id = %id, "{reason}");
                    self.overrides.mark_error(&id, &reason)?;
                    report.failed.push(id);
                    continue;
                }
            }

            if self.history.contains(TriggerKind::Onboard, &request.identity) {
                tracing::info!(request_id = %id, "override already satisfied; removing request");
                self.overrides.remove(&id)?;
                report.already_completed.push(id);
                continue;
            }

            if self
                .execute(TriggerKind::Onboard, &request.identity, OVERRIDE_SOURCE, &id, false, cancel)
                .await
            {
                if !self.overrides.remove(&id)? {
                    tracing::warn!(request_id = %id, "override succeeded but row was gone at dequeue");
                }
                report.overrides_completed.push(id);
            } else {
                tracing::error!(request_id = %id, "override request failed; marking ERROR");
                self.overrides.mark_error(
                    &id,
                    "onboarding execution failed; review scheduler logs and set status=READY after remediation",
                )?;
                report.failed.push(id);
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    fn workflow_for(&self, kind: TriggerKind) -> Result<Workflow> {
        match kind {
            TriggerKind::Onboard => Workflow::load(&self.settings.onboard_workflow_path()),
            TriggerKind::Offboard => Workflow::load(&self.settings.offboard_workflow_path()),
        }
    }

    fn orchestrator_for(&self, kind: TriggerKind) -> Orchestrator {
        let orchestrator = Orchestrator::new(self.registry.clone())
            .with_notifier(Arc::new(crate::notify::LogNotifier), self.settings.notify_mode)
            .with_state_dir(self.settings.state_dir.clone());
        match kind {
            TriggerKind::Onboard => orchestrator,
            TriggerKind::Offboard => orchestrator.with_policy_guard(self.policy.clone()),
        }
    }

    async fn run_workflow(
        &self,
        kind: TriggerKind,
        identity: &TargetIdentity,
        trigger_source: &str,
        request_id: &str,
        dry_run: bool,
        cancel: &CancellationToken,
    ) -> Result<RunResult> {
        let workflow = self.workflow_for(kind)?;
        if kind == TriggerKind::Offboard {
            let shown = self.settings.offboard_workflow_path().display().to_string();
            if let Some(issue) = preflight::offboarding_gate_issue(&workflow, &shown) {
                return Err(CustodianError::Configuration(issue));
            }
        }
        let mut ctx = ActionContext::new(identity.clone(), trigger_source)
            .with_request_id(Some(request_id.to_string()))
            .with_cancel(cancel.clone());
        ctx.run_id = run_id_for(kind, request_id, identity);
        self.orchestrator_for(kind).run(&workflow, &ctx, dry_run).await
    }

    /// Run the workflow for `kind` and record success in the history.
    /// Returns whether the run succeeded; every failure is logged.
    pub async fn execute(
        &mut self,
        kind: TriggerKind,
        identity: &TargetIdentity,
        trigger_source: &str,
        request_id: &str,
        dry_run: bool,
        cancel: &CancellationToken,
    ) -> bool {
        let email = identity.email();
        tracing::info!(kind = %kind, email = %email, trigger_source, request_id, dry_run, "triggering workflow");

        let result = self
            .run_workflow(kind, identity, trigger_source, request_id, dry_run, cancel)
            .await;
        match result {
            Ok(run) if run.success => {
                if !dry_run {
                    if let Err(e) = self.history.record(kind, identity, trigger_source, Some(request_id)) {
                        tracing::error!(email = %email, "run succeeded but history write failed: {e}");
                    }
                }
                true
            }
            Ok(run) => {
                tracing::error!(email = %email, run_id = %run.run_id, "workflow failed: {}", run.failure_summary());
                false
            }
            Err(e) => {
                tracing::error!(email = %email, "workflow could not run: {e}");
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
