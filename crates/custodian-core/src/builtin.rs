//! Actions that ship with the engine and need no vendor adapter.

use crate::action::{Action, ActionContext, ActionError, ActionRegistry, ActionResult, Outcome};
use crate::policy::ProtectedTargetPolicy;
use async_trait::async_trait;
use std::sync::Arc;

pub const NOOP: &str = "builtin.noop";
pub const VALIDATE_PROFILE: &str = "builtin.validate_profile";
/// The protected-target gate every offboarding workflow must open with.
pub const VALIDATE_TARGET_EMAIL: &str = "builtin.validate_target_email";

/// Register the built-in actions. Pass the same `policy` the offboarding
/// orchestrator guards with so the gate and the guard agree.
pub fn register_builtins(
    registry: &mut ActionRegistry,
    policy: Arc<ProtectedTargetPolicy>,
    corporate_domains: &[String],
) {
    registry.register(NOOP, Arc::new(Noop));
    registry.register(VALIDATE_PROFILE, Arc::new(ValidateProfile));
    registry.register(
        VALIDATE_TARGET_EMAIL,
        Arc::new(TargetEmailGate::new(policy, corporate_domains)),
    );
}

// ---------------------------------------------------------------------------
// builtin.noop
// ---------------------------------------------------------------------------

pub struct Noop;

#[async_trait]
impl Action for Noop {
    async fn execute(&self, _ctx: &ActionContext) -> ActionResult {
        Ok(Outcome {
            status: Some("noop".into()),
            ..Default::default()
        }
        .into())
    }
}

// ---------------------------------------------------------------------------
// builtin.validate_profile
// ---------------------------------------------------------------------------

pub struct ValidateProfile;

#[async_trait]
impl Action for ValidateProfile {
    async fn execute(&self, ctx: &ActionContext) -> ActionResult {
        ctx.identity
            .validate()
            .map_err(|e| ActionError::Invalid(e.to_string()))?;
        Ok(Outcome::ok(format!("profile complete for {}", ctx.identity.email())).into())
    }
}

// ---------------------------------------------------------------------------
// builtin.validate_target_email
// ---------------------------------------------------------------------------

pub struct TargetEmailGate {
    policy: Arc<ProtectedTargetPolicy>,
    corporate_domains: Vec<String>,
}

impl TargetEmailGate {
    pub fn new(policy: Arc<ProtectedTargetPolicy>, corporate_domains: &[String]) -> Self {
        Self {
            policy,
            corporate_domains: corporate_domains
                .iter()
                .map(|d| d.trim().trim_start_matches('@').to_lowercase())
                .filter(|d| !d.is_empty())
                .collect(),
        }
    }
}

#[async_trait]
impl Action for TargetEmailGate {
    async fn execute(&self, ctx: &ActionContext) -> ActionResult {
        let email = ctx.identity.email();
        if email.is_empty() {
            return Err(ActionError::Invalid("work_email missing on target identity".into()));
        }
        self.policy.check(&ctx.identity, VALIDATE_TARGET_EMAIL)?;

        if !self.corporate_domains.is_empty() {
            let domain = ctx.identity.domain().unwrap_or_default();
            if !self.corporate_domains.contains(&domain) {
                tracing::error!(email = %email, domain = %domain, "target outside corporate domains");
                return Err(ActionError::PolicyBlocked(format!(
                    "'{email}' is outside the corporate domains ({})",
                    self.corporate_domains.join(", ")
                )));
            }
        }
        Ok(Outcome::ok(format!("target '{email}' cleared protected-target policy")).into())
    }
}
