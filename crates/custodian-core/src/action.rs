//! The narrow contract external adapters implement.
//!
//! An `Action` receives an `ActionContext` and returns one of the legacy
//! outcome shapes in `ActionReturn`. The orchestrator only ever looks at the
//! normalized `(ok, detail)` pair; vendor-specific fields never reach it.
//! Adapters register into an `ActionRegistry` at startup, and preflight
//! verifies every workflow binding resolves before anything runs.

use crate::identity::TargetIdentity;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// ActionContext
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ActionContext {
    pub identity: TargetIdentity,
    pub dry_run: bool,
    pub trigger_source: String,
    pub request_id: Option<String>,
    pub run_id: String,
    /// Free-form adapter parameters (ticket ids, OU names, ...).
    pub extra: BTreeMap<String, String>,
    /// Fires when an operator aborts the run. Long-polling handlers should
    /// select on `cancel.cancelled()`.
    pub cancel: CancellationToken,
}

impl ActionContext {
    pub fn new(identity: TargetIdentity, trigger_source: impl Into<String>) -> Self {
        Self {
            identity,
            dry_run: false,
            trigger_source: trigger_source.into(),
            request_id: None,
            run_id: String::new(),
            extra: BTreeMap::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

// ---------------------------------------------------------------------------
// Outcome shapes
// ---------------------------------------------------------------------------

/// Structured handler result. Either `ok` or `status` decides success.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Outcome {
    pub fn ok(detail: impl Into<String>) -> Self {
        Self {
            ok: Some(true),
            status: None,
            detail: Some(detail.into()),
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            ok: Some(false),
            status: None,
            detail: Some(detail.into()),
        }
    }
}

/// Every shape a handler may return. `Unit` and `Flag(true)` are the legacy
/// success forms; `Flag(false)` is failure; `Structured` carries its own
/// verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionReturn {
    Unit,
    Flag(bool),
    Structured(Outcome),
}

impl From<()> for ActionReturn {
    fn from(_: ()) -> Self {
        ActionReturn::Unit
    }
}

impl From<bool> for ActionReturn {
    fn from(b: bool) -> Self {
        ActionReturn::Flag(b)
    }
}

impl From<Outcome> for ActionReturn {
    fn from(o: Outcome) -> Self {
        ActionReturn::Structured(o)
    }
}

/// The only view of a handler result the orchestrator consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedOutcome {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

const SUCCESS_STATUSES: &[&str] = &["ok", "success", "succeeded", "completed", "skipped", "noop"];

impl ActionReturn {
    pub fn normalize(self) -> NormalizedOutcome {
        match self {
            ActionReturn::Unit => NormalizedOutcome { ok: true, detail: None },
            ActionReturn::Flag(ok) => NormalizedOutcome { ok, detail: None },
            ActionReturn::Structured(outcome) => {
                let ok = match (outcome.ok, outcome.status.as_deref()) {
                    (Some(ok), _) => ok,
                    (None, Some(status)) => {
                        SUCCESS_STATUSES.contains(&status.trim().to_lowercase().as_str())
                    }
                    (None, None) => true,
                };
                NormalizedOutcome {
                    ok,
                    detail: outcome.detail.or(outcome.status),
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ActionError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ActionError {
    /// Vendor call failed or timed out; eligible for the step's retry budget.
    #[error("{0}")]
    Transient(String),

    /// Target is protected. Never retried.
    #[error("protected target blocked: {0}")]
    PolicyBlocked(String),

    /// The context cannot be acted on (missing field, bad input). Never retried.
    #[error("invalid input: {0}")]
    Invalid(String),

    #[error("cancelled")]
    Cancelled,
}

impl ActionError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ActionError::Transient(_))
    }
}

pub type ActionResult = std::result::Result<ActionReturn, ActionError>;

// ---------------------------------------------------------------------------
// Action trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Action: Send + Sync {
    async fn execute(&self, ctx: &ActionContext) -> ActionResult;
}

/// Adapts a synchronous closure into an `Action`.
pub struct FnAction<F>(pub F);

#[async_trait]
impl<F> Action for FnAction<F>
where
    F: Fn(&ActionContext) -> ActionResult + Send + Sync,
{
    async fn execute(&self, ctx: &ActionContext) -> ActionResult {
        (self.0)(ctx)
    }
}

// ---------------------------------------------------------------------------
// ActionRegistry
// ---------------------------------------------------------------------------

/// Lookup from action id (e.g. `directory.disable_user`) to handler.
#[derive(Clone, Default)]
pub struct ActionRegistry {
    actions: BTreeMap<String, Arc<dyn Action>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: impl Into<String>, action: Arc<dyn Action>) -> &mut Self {
        let id = id.into();
        if self.actions.insert(id.clone(), action).is_some() {
            tracing::warn!(action = %id, "action re-registered; previous handler replaced");
        }
        self
    }

    pub fn register_fn<F>(&mut self, id: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(&ActionContext) -> ActionResult + Send + Sync + 'static,
    {
        self.register(id, Arc::new(FnAction(f)))
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Action>> {
        self.actions.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.actions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("actions", &self.actions.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_shapes_normalize() {
        assert!(ActionReturn::Unit.normalize().ok);
        assert!(ActionReturn::from(true).normalize().ok);
        assert!(!ActionReturn::from(false).normalize().ok);
    }

    #[test]
    fn structured_ok_field_wins_over_status() {
        let out = ActionReturn::from(Outcome {
            ok: Some(false),
            status: Some("success".into()),
            detail: Some("vendor said no".into()),
        })
        .normalize();
        assert!(!out.ok);
        assert_eq!(out.detail.as_deref(), Some("vendor said no"));
    }

    #[test]
    fn structured_status_only() {
        let skipped = Outcome {
            status: Some("Skipped".into()),
            ..Default::default()
        };
        assert!(ActionReturn::from(skipped).normalize().ok);

        let failed = Outcome {
            status: Some("failed".into()),
            ..Default::default()
        };
        let out = ActionReturn::from(failed).normalize();
        assert!(!out.ok);
        assert_eq!(out.detail.as_deref(), Some("failed"));
    }

    #[test]
    fn structured_without_verdict_is_success() {
        assert!(ActionReturn::from(Outcome::default()).normalize().ok);
    }

    #[test]
    fn only_transient_errors_retry() {
        assert!(ActionError::Transient("timeout".into()).is_retryable());
        assert!(!ActionError::PolicyBlocked("vip".into()).is_retryable());
        assert!(!ActionError::Invalid("no email".into()).is_retryable());
        assert!(!ActionError::Cancelled.is_retryable());
    }

    #[tokio::test]
    async fn registry_resolves_closures() {
        let mut registry = ActionRegistry::new();
        registry.register_fn("test.ok", |_ctx| Ok(true.into()));
        assert!(registry.contains("test.ok"));
        assert!(!registry.contains("test.missing"));

        let ctx = ActionContext::new(
            TargetIdentity::new("A", "B", "a@co.example"),
            "unit-test",
        );
        let action = registry.get("test.ok").unwrap();
        let out = action.execute(&ctx).await.unwrap().normalize();
        assert!(out.ok);
    }
}
