//! Step execution state machine.
//!
//! Steps run strictly in declared order. Each transition is persisted to the
//! run state before the next one starts, so a crashed run resumes at the
//! first step that is not `OK`.
//!
//! A failed protected-target gate halts the run: every later step is
//! recorded `FAILED` without its handler being called, whatever the step's
//! own `requires` say.

use crate::action::{Action, ActionContext, ActionError, ActionRegistry, NormalizedOutcome};
use crate::builtin::VALIDATE_TARGET_EMAIL;
use crate::error::Result;
use crate::notify::{should_send, LogNotifier, Notifier, RunEvent};
use crate::policy::{PolicyGuard, ProtectedTargetPolicy};
use crate::run_state::{RunState, StepResult};
use crate::types::{NotifyMode, StepKind, StepStatus};
use crate::workflow::{Step, Workflow};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

// ---------------------------------------------------------------------------
// RunResult
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepFailure {
    pub step: String,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunResult {
    pub run_id: String,
    pub workflow: String,
    pub success: bool,
    pub cancelled: bool,
    pub failures: Vec<StepFailure>,
    pub step_total: usize,
    pub step_succeeded: usize,
    pub step_failed: usize,
}

impl RunResult {
    /// Failures joined into one line for queue `last_error` columns.
    pub fn failure_summary(&self) -> String {
        self.failures
            .iter()
            .map(|f| format!("{}: {}", f.step, f.detail))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator {
    registry: Arc<ActionRegistry>,
    notifier: Arc<dyn Notifier>,
    notify_mode: NotifyMode,
    state_dir: Option<PathBuf>,
    guard: Option<Arc<ProtectedTargetPolicy>>,
}

/// How an action step ended, before it is written to the run state.
enum StepEnd {
    Ok(serde_json::Value, u32),
    Failed(String, u32),
    Cancelled(u32),
}

impl Orchestrator {
    pub fn new(registry: Arc<ActionRegistry>) -> Self {
        Self {
            registry,
            notifier: Arc::new(LogNotifier),
            notify_mode: NotifyMode::Summary,
            state_dir: None,
            guard: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>, mode: NotifyMode) -> Self {
        self.notifier = notifier;
        self.notify_mode = mode;
        self
    }

    /// Persist run state under `state_dir/runs/`. Without it runs are
    /// in-memory and cannot resume.
    pub fn with_state_dir(mut self, state_dir: impl Into<PathBuf>) -> Self {
        self.state_dir = Some(state_dir.into());
        self
    }

    /// Check `policy` before every action handler. Offboarding runs use
    /// this so a workflow without a working gate still cannot touch a
    /// protected identity.
    pub fn with_policy_guard(mut self, policy: Arc<ProtectedTargetPolicy>) -> Self {
        self.guard = Some(policy);
        self
    }

    fn emit(&self, event: RunEvent) {
        if should_send(self.notify_mode, &event) {
            self.notifier.notify(&event);
        }
    }

    /// Execute `workflow` for the identity in `ctx`.
    ///
    /// `ctx.run_id` selects the run state to resume; an empty id starts a
    /// fresh run. Step failures are reported in the result, not as `Err`;
    /// `Err` means the run state itself could not be persisted.
    pub async fn run(
        &self,
        workflow: &Workflow,
        ctx: &ActionContext,
        dry_run: bool,
    ) -> Result<RunResult> {
        let run_id = if ctx.run_id.is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            ctx.run_id.clone()
        };
        let mut ctx = ctx.clone();
        ctx.run_id = run_id.clone();
        ctx.dry_run = dry_run;

        let mut state = match &self.state_dir {
            Some(dir) => RunState::open(dir, &run_id)?,
            None => RunState::in_memory(&run_id),
        };
        state.workflow = workflow.name.clone();

        let email = ctx.identity.email();
        tracing::info!(run_id = %run_id, workflow = %workflow.name, email = %email, dry_run, "run started");
        self.emit(RunEvent::Started {
            run_id: run_id.clone(),
            workflow: workflow.name.clone(),
            email: email.clone(),
            dry_run,
        });

        let mut failures = Vec::new();
        let mut cancelled = false;
        let mut halted_by: Option<String> = None;

        for step in &workflow.steps {
            if state.status(&step.id) == Some(StepStatus::Ok) {
                tracing::info!(run_id = %run_id, step = %step.id, "step already OK; skipping");
                continue;
            }

            if let Some(gate) = &halted_by {
                let detail = format!("blocked by {gate}");
                self.record(&mut state, &step.id, StepStatus::Failed, Utc::now(), json!({"error": detail}), 0)?;
                failures.push(StepFailure {
                    step: step.id.clone(),
                    detail,
                });
                continue;
            }

            if ctx.cancel.is_cancelled() {
                tracing::warn!(run_id = %run_id, step = %step.id, "run cancelled before step");
                self.record(&mut state, &step.id, StepStatus::Failed, Utc::now(), json!({"error": "cancelled"}), 0)?;
                failures.push(StepFailure {
                    step: step.id.clone(),
                    detail: "cancelled".into(),
                });
                cancelled = true;
                break;
            }

            if let Some(dep) = step
                .requires
                .iter()
                .find(|dep| !state.status(dep).is_some_and(StepStatus::satisfies_requirement))
            {
                let detail = format!("blocked by {dep}");
                tracing::warn!(run_id = %run_id, step = %step.id, "{detail}");
                self.record(&mut state, &step.id, StepStatus::Failed, Utc::now(), json!({"error": detail}), 0)?;
                failures.push(StepFailure {
                    step: step.id.clone(),
                    detail,
                });
                if is_gate(step) {
                    halted_by = Some(step.id.clone());
                }
                continue;
            }

            let started = Utc::now();
            self.emit(RunEvent::StepStarted {
                run_id: run_id.clone(),
                step: step.id.clone(),
            });

            if step.kind == StepKind::Manual {
                self.record(&mut state, &step.id, StepStatus::Manual, started, json!(step.description), 0)?;
                continue;
            }

            if dry_run {
                self.record(&mut state, &step.id, StepStatus::Skipped, started, json!({"dry_run": true}), 0)?;
                continue;
            }

            state.set(&step.id, StepResult::running(started))?;
            match self.execute_step(step, &ctx).await {
                StepEnd::Ok(detail, attempts) => {
                    self.record(&mut state, &step.id, StepStatus::Ok, started, detail, attempts)?;
                }
                StepEnd::Failed(detail, attempts) => {
                    tracing::error!(run_id = %run_id, step = %step.id, attempts, "step failed: {detail}");
                    self.record(&mut state, &step.id, StepStatus::Failed, started, json!({"error": detail}), attempts)?;
                    failures.push(StepFailure {
                        step: step.id.clone(),
                        detail,
                    });
                    if is_gate(step) {
                        tracing::error!(run_id = %run_id, step = %step.id, "protected-target gate failed; halting run");
                        halted_by = Some(step.id.clone());
                    }
                }
                StepEnd::Cancelled(attempts) => {
                    tracing::warn!(run_id = %run_id, step = %step.id, "run cancelled during step");
                    self.record(&mut state, &step.id, StepStatus::Failed, started, json!({"error": "cancelled"}), attempts)?;
                    failures.push(StepFailure {
                        step: step.id.clone(),
                        detail: "cancelled".into(),
                    });
                    cancelled = true;
                    break;
                }
            }
        }

        let step_total = workflow.steps.len();
        let step_succeeded = workflow
            .steps
            .iter()
            .filter(|s| state.status(&s.id).is_some_and(StepStatus::satisfies_requirement))
            .count();
        let step_failed = workflow
            .steps
            .iter()
            .filter(|s| state.status(&s.id) == Some(StepStatus::Failed))
            .count();

        let result = RunResult {
            run_id: run_id.clone(),
            workflow: workflow.name.clone(),
            success: failures.is_empty(),
            cancelled,
            failures,
            step_total,
            step_succeeded,
            step_failed,
        };

        self.emit(RunEvent::Summary {
            run_id,
            workflow: workflow.name.clone(),
            email,
            success: result.success,
            steps_total: step_total,
            steps_succeeded: step_succeeded,
            steps_failed: step_failed,
        });
        Ok(result)
    }

    fn record(
        &self,
        state: &mut RunState,
        step_id: &str,
        status: StepStatus,
        started: chrono::DateTime<Utc>,
        detail: serde_json::Value,
        attempts: u32,
    ) -> Result<()> {
        self.emit(RunEvent::StepFinished {
            run_id: state.run_id.clone(),
            step: step_id.to_string(),
            status,
            detail: detail.clone(),
        });
        state.set(step_id, StepResult::finished(status, started, detail, attempts))
    }

    /// Run the step's action within its retry budget, then its verify action
    /// once.
    async fn execute_step(&self, step: &Step, ctx: &ActionContext) -> StepEnd {
        let Some(action_id) = step.action.as_deref() else {
            return StepEnd::Failed(format!("step '{}' has no action", step.id), 0);
        };
        let Some(action) = self.registry.get(action_id) else {
            return StepEnd::Failed(format!("unknown action '{action_id}'"), 0);
        };
        let action: Arc<dyn Action> = match &self.guard {
            Some(policy) => PolicyGuard::wrap(action_id, action, policy.clone()),
            None => action,
        };

        let max_attempts = step.retries.saturating_add(1);
        let wait = Duration::from_secs(step.retry_wait_seconds);
        let mut attempts = 0;

        let outcome: NormalizedOutcome = loop {
            attempts += 1;
            let error = match action.execute(ctx).await {
                Ok(ret) => {
                    let out = ret.normalize();
                    if out.ok {
                        break out;
                    }
                    out.detail
                        .unwrap_or_else(|| format!("{action_id} reported failure"))
                }
                Err(ActionError::Cancelled) => return StepEnd::Cancelled(attempts),
                Err(e) if !e.is_retryable() => return StepEnd::Failed(e.to_string(), attempts),
                Err(e) => e.to_string(),
            };

            if attempts >= max_attempts {
                return StepEnd::Failed(error, attempts);
            }
            tracing::warn!(
                step = %step.id,
                attempt = attempts,
                max_attempts,
                "attempt failed, retrying in {}s: {error}",
                step.retry_wait_seconds
            );
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = ctx.cancel.cancelled() => return StepEnd::Cancelled(attempts),
            }
        };

        let mut detail = json!({ "attempts": attempts });
        if let Some(text) = &outcome.detail {
            detail["detail"] = json!(text);
        }

        if let Some(verify_id) = step.verify.as_deref() {
            let Some(verify) = self.registry.get(verify_id) else {
                return StepEnd::Failed(format!("unknown verify action '{verify_id}'"), attempts);
            };
            let checked = match verify.execute(ctx).await {
                Ok(ret) => ret.normalize(),
                Err(ActionError::Cancelled) => return StepEnd::Cancelled(attempts),
                Err(e) => NormalizedOutcome {
                    ok: false,
                    detail: Some(e.to_string()),
                },
            };
            if !checked.ok {
                return StepEnd::Failed(
                    format!(
                        "verify '{verify_id}' failed: {}",
                        checked.detail.as_deref().unwrap_or("no detail")
                    ),
                    attempts,
                );
            }
            detail["verify"] = json!(checked);
        }

        StepEnd::Ok(detail, attempts)
    }
}

fn is_gate(step: &Step) -> bool {
    step.kind == StepKind::Action && step.action.as_deref() == Some(VALIDATE_TARGET_EMAIL)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
