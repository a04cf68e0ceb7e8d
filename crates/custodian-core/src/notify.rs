//! Run notifications. Message templating and delivery channels (chat webhooks,
//! email) belong to adapters; the core only emits structured events.

use crate::types::{NotifyMode, StepStatus};
use serde::Serialize;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    Started {
        run_id: String,
        workflow: String,
        email: String,
        dry_run: bool,
    },
    StepStarted {
        run_id: String,
        step: String,
    },
    StepFinished {
        run_id: String,
        step: String,
        status: StepStatus,
        detail: serde_json::Value,
    },
    Summary {
        run_id: String,
        workflow: String,
        email: String,
        success: bool,
        steps_total: usize,
        steps_succeeded: usize,
        steps_failed: usize,
    },
}

impl RunEvent {
    pub fn is_step_event(&self) -> bool {
        matches!(self, RunEvent::StepStarted { .. } | RunEvent::StepFinished { .. })
    }

    /// One-line rendering used by the log notifier.
    pub fn message(&self) -> String {
        match self {
            RunEvent::Started {
                workflow,
                email,
                dry_run,
                ..
            } => format!("starting '{workflow}' for {email} (dry_run={dry_run})"),
            RunEvent::StepStarted { step, .. } => format!("step '{step}' started"),
            RunEvent::StepFinished { step, status, .. } => format!("step '{step}' {status}"),
            RunEvent::Summary {
                workflow,
                email,
                success,
                steps_total,
                steps_succeeded,
                steps_failed,
                ..
            } => format!(
                "'{workflow}' for {email}: success={success} steps_total={steps_total} \
                 steps_succeeded={steps_succeeded} steps_failed={steps_failed}"
            ),
        }
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, event: &RunEvent);
}

/// Gate step-level events behind `NotifyMode::Verbose`.
pub fn should_send(mode: NotifyMode, event: &RunEvent) -> bool {
    mode == NotifyMode::Verbose || !event.is_step_event()
}

/// Default notifier: every event becomes a `tracing` line.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, event: &RunEvent) {
        match event {
            RunEvent::Summary { success: false, run_id, .. } => {
                tracing::warn!(run_id = %run_id, "{}", event.message())
            }
            RunEvent::Summary { run_id, .. } | RunEvent::Started { run_id, .. } => {
                tracing::info!(run_id = %run_id, "{}", event.message())
            }
            RunEvent::StepStarted { run_id, .. } | RunEvent::StepFinished { run_id, .. } => {
                tracing::debug!(run_id = %run_id, "{}", event.message())
            }
        }
    }
}

/// Keeps every event in memory; for embedding callers that render their own
/// reports.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    events: Mutex<Vec<RunEvent>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RunEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl Notifier for MemoryNotifier {
    fn notify(&self, event: &RunEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event.clone()),
            Err(poisoned) => poisoned.into_inner().push(event.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step_event() -> RunEvent {
        RunEvent::StepStarted {
            run_id: "r".into(),
            step: "gate".into(),
        }
    }

    #[test]
    fn summary_mode_suppresses_step_events() {
        assert!(!should_send(NotifyMode::Summary, &step_event()));
        assert!(should_send(NotifyMode::Verbose, &step_event()));
    }

    #[test]
    fn summary_message_carries_counts() {
        let event = RunEvent::Summary {
            run_id: "r".into(),
            workflow: "Offboard".into(),
            email: "a@co.example".into(),
            success: false,
            steps_total: 3,
            steps_succeeded: 2,
            steps_failed: 1,
        };
        assert!(should_send(NotifyMode::Summary, &event));
        let msg = event.message();
        assert!(msg.contains("steps_total=3"));
        assert!(msg.contains("steps_succeeded=2"));
        assert!(msg.contains("steps_failed=1"));
    }

    #[test]
    fn memory_notifier_records() {
        let n = MemoryNotifier::new();
        n.notify(&step_event());
        assert_eq!(n.events().len(), 1);
    }
}
