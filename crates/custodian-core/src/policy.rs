//! Protected-target policy: identities no destructive action may touch.
//!
//! Rules merge from three places, all lowercased and de-duplicated:
//!   1. the YAML policy file (`protected_targets_file`),
//!   2. comma-separated overrides in `Settings`,
//!   3. the administrative fallback mailbox, which is always protected so the
//!      automation can never lock out its own operator.
//!
//! `PolicyGuard` wraps a destructive handler so the check runs again right
//! before the side effect, independent of what the workflow file says.

use crate::action::{Action, ActionContext, ActionError, ActionResult};
use crate::config::Settings;
use crate::error::{CustodianError, Result};
use crate::identity::TargetIdentity;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// PolicyRules (file format)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyRules {
    #[serde(default)]
    pub emails: Vec<String>,
    #[serde(default)]
    pub usernames: Vec<String>,
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default)]
    pub departments: Vec<String>,
    #[serde(default)]
    pub titles_contains: Vec<String>,
}

impl PolicyRules {
    fn extend(&mut self, other: PolicyRules) {
        self.emails.extend(other.emails);
        self.usernames.extend(other.usernames);
        self.domains.extend(other.domains);
        self.departments.extend(other.departments);
        self.titles_contains.extend(other.titles_contains);
    }

    fn normalized(self) -> Self {
        Self {
            emails: normalize_list(self.emails),
            usernames: normalize_list(self.usernames),
            domains: normalize_list(self.domains),
            departments: normalize_list(self.departments),
            titles_contains: normalize_list(self.titles_contains),
        }
    }

    pub fn total_rules(&self) -> usize {
        self.emails.len()
            + self.usernames.len()
            + self.domains.len()
            + self.departments.len()
            + self.titles_contains.len()
    }
}

fn normalize_list(values: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(values.len());
    for v in values {
        let lowered = v.trim().to_lowercase();
        if !lowered.is_empty() && !out.contains(&lowered) {
            out.push(lowered);
        }
    }
    out
}

/// Split a comma-separated override value.
pub fn csv_values(raw: &str) -> Vec<String> {
    raw.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect()
}

// ---------------------------------------------------------------------------
// PolicyDecision / PolicySummary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyDecision {
    pub blocked: bool,
    pub reason: String,
}

impl PolicyDecision {
    fn block(reason: String) -> Self {
        Self { blocked: true, reason }
    }

    fn allow() -> Self {
        Self {
            blocked: false,
            reason: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicySummary {
    pub path: Option<PathBuf>,
    pub emails: usize,
    pub usernames: usize,
    pub domains: usize,
    pub departments: usize,
    pub titles_contains: usize,
    pub total_rules: usize,
}

// ---------------------------------------------------------------------------
// ProtectedTargetPolicy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectedTargetPolicy {
    rules: PolicyRules,
    source: Option<PathBuf>,
}

impl ProtectedTargetPolicy {
    /// Build a policy from explicit rules plus the always-protected admin
    /// mailbox.
    pub fn new(rules: PolicyRules, admin_email: Option<&str>) -> Self {
        let mut rules = rules;
        if let Some(admin) = admin_email {
            rules.emails.push(admin.to_string());
        }
        Self {
            rules: rules.normalized(),
            source: None,
        }
    }

    /// Merge the policy file, the settings overrides and the admin mailbox.
    ///
    /// A missing policy file contributes no rules; preflight warns when the
    /// merged policy ends up empty. An unreadable or malformed file is a
    /// configuration fault.
    pub fn load(settings: &Settings) -> Result<Self> {
        let mut rules = match &settings.protected_targets_file {
            Some(path) => Self::read_rules(path)?,
            None => PolicyRules::default(),
        };
        rules.extend(settings.protected_overrides());
        let mut policy = Self::new(rules, settings.admin_email.as_deref());
        policy.source = settings.protected_targets_file.clone();
        Ok(policy)
    }

    fn read_rules(path: &Path) -> Result<PolicyRules> {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "protected targets file not found");
            return Ok(PolicyRules::default());
        }
        let data = std::fs::read_to_string(path)?;
        if data.trim().is_empty() {
            return Ok(PolicyRules::default());
        }
        serde_yaml::from_str(&data).map_err(|e| {
            CustodianError::Configuration(format!(
                "protected targets file '{}' is malformed: {e}",
                path.display()
            ))
        })
    }

    pub fn rules(&self) -> &PolicyRules {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.total_rules() == 0
    }

    pub fn summary(&self) -> PolicySummary {
        PolicySummary {
            path: self.source.clone(),
            emails: self.rules.emails.len(),
            usernames: self.rules.usernames.len(),
            domains: self.rules.domains.len(),
            departments: self.rules.departments.len(),
            titles_contains: self.rules.titles_contains.len(),
            total_rules: self.rules.total_rules(),
        }
    }

    /// First matching rule wins: email, username, domain, department, title.
    /// An identity without an email is always blocked.
    pub fn evaluate(&self, identity: &TargetIdentity) -> PolicyDecision {
        let email = identity.email();
        if email.is_empty() {
            return PolicyDecision::block("work_email missing on target identity".into());
        }
        if self.rules.emails.contains(&email) {
            return PolicyDecision::block(format!(
                "work_email '{email}' is in protected email list"
            ));
        }

        let username = identity.username();
        if !username.is_empty() && self.rules.usernames.contains(&username) {
            return PolicyDecision::block(format!(
                "username '{username}' is in protected username list"
            ));
        }

        if let Some(domain) = identity.domain() {
            if self.rules.domains.contains(&domain) {
                return PolicyDecision::block(format!(
                    "email domain '{domain}' is in protected domain list"
                ));
            }
        }

        let department = identity.department.trim().to_lowercase();
        if !department.is_empty() && self.rules.departments.contains(&department) {
            return PolicyDecision::block(format!(
                "department '{department}' is in protected department list"
            ));
        }

        let title = identity
            .title
            .as_deref()
            .unwrap_or("")
            .trim()
            .to_lowercase();
        if let Some(token) = self.rules.titles_contains.iter().find(|t| title.contains(t.as_str())) {
            return PolicyDecision::block(format!("title contains protected token '{token}'"));
        }

        PolicyDecision::allow()
    }

    /// `evaluate` as an action result, logging blocks at error level.
    pub fn check(&self, identity: &TargetIdentity, action_name: &str) -> std::result::Result<(), ActionError> {
        let decision = self.evaluate(identity);
        if decision.blocked {
            let detail = format!(
                "'{}' during '{action_name}': {}. No destructive action executed.",
                identity.email(),
                decision.reason
            );
            tracing::error!(email = %identity.email(), action = %action_name, reason = %decision.reason, "protected target blocked");
            return Err(ActionError::PolicyBlocked(detail));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// PolicyGuard
// ---------------------------------------------------------------------------

/// Runs the protected-target check before delegating to a destructive
/// handler. `Orchestrator::with_policy_guard` wraps every handler of an
/// offboarding run in one.
pub struct PolicyGuard {
    name: String,
    inner: Arc<dyn Action>,
    policy: Arc<ProtectedTargetPolicy>,
}

impl PolicyGuard {
    pub fn wrap(
        name: impl Into<String>,
        inner: Arc<dyn Action>,
        policy: Arc<ProtectedTargetPolicy>,
    ) -> Arc<dyn Action> {
        Arc::new(Self {
            name: name.into(),
            inner,
            policy,
        })
    }
}

#[async_trait]
impl Action for PolicyGuard {
    async fn execute(&self, ctx: &ActionContext) -> ActionResult {
        self.policy.check(&ctx.identity, &self.name)?;
        self.inner.execute(ctx).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionRegistry;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn user(email: &str) -> TargetIdentity {
        let mut id = TargetIdentity::new("Test", "User", email);
        id.department = "IT".into();
        id.title = Some("Systems Engineer".into());
        id
    }

    fn policy(rules: PolicyRules) -> ProtectedTargetPolicy {
        ProtectedTargetPolicy::new(rules, None)
    }

    #[test]
    fn blocks_protected_email_case_insensitively() {
        let p = policy(PolicyRules {
            emails: vec!["VIP@co.example".into()],
            ..Default::default()
        });
        let d = p.evaluate(&user("vip@CO.example"));
        assert!(d.blocked);
        assert!(d.reason.contains("protected email list"));
    }

    #[test]
    fn admin_mailbox_is_implicitly_protected() {
        let p = ProtectedTargetPolicy::new(PolicyRules::default(), Some("it-admin@co.example"));
        assert_eq!(p.summary().emails, 1);
        let d = p.evaluate(&user("it-admin@co.example"));
        assert!(d.blocked, "admin mailbox must be protected without explicit rule");
    }

    #[test]
    fn blocks_username_domain_department_and_title() {
        let p = policy(PolicyRules {
            usernames: vec!["danadmin".into()],
            domains: vec!["board.example".into()],
            departments: vec!["Executive".into()],
            titles_contains: vec!["chief".into()],
            ..Default::default()
        });
        assert!(p.evaluate(&user("danadmin@co.example")).reason.contains("username"));
        assert!(p.evaluate(&user("x@board.example")).reason.contains("domain"));

        let mut exec = user("y@co.example");
        exec.department = " executive ".into();
        assert!(p.evaluate(&exec).reason.contains("department"));

        let mut cfo = user("z@co.example");
        cfo.title = Some("Chief Financial Officer".into());
        assert!(p.evaluate(&cfo).reason.contains("title"));

        assert!(!p.evaluate(&user("regular@co.example")).blocked);
    }

    #[test]
    fn missing_email_is_blocked() {
        let p = policy(PolicyRules::default());
        assert!(p.evaluate(&user("  ")).blocked);
    }

    #[test]
    fn rules_are_deduplicated() {
        let p = ProtectedTargetPolicy::new(
            PolicyRules {
                emails: vec!["a@co.example".into(), " A@co.example".into(), "".into()],
                ..Default::default()
            },
            Some("a@co.example"),
        );
        assert_eq!(p.rules().emails, vec!["a@co.example".to_string()]);
    }

    #[test]
    fn loads_file_and_settings_overrides() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("protected.yaml");
        std::fs::write(&path, "emails: [ceo@co.example]\ntitles_contains: [director]\n").unwrap();

        let mut settings = Settings::default();
        settings.protected_targets_file = Some(path.clone());
        settings.protected_usernames = "breakglass".into();
        settings.admin_email = Some("ops@co.example".into());

        let p = ProtectedTargetPolicy::load(&settings).unwrap();
        let summary = p.summary();
        assert_eq!(summary.emails, 2);
        assert_eq!(summary.usernames, 1);
        assert_eq!(summary.titles_contains, 1);
        assert_eq!(summary.total_rules, 4);
        assert_eq!(summary.path, Some(path));
    }

    #[test]
    fn malformed_file_is_configuration_fault() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("protected.yaml");
        std::fs::write(&path, "emails: [a@co.example]\nemial: typo\n").unwrap();
        let mut settings = Settings::default();
        settings.protected_targets_file = Some(path);
        assert!(matches!(
            ProtectedTargetPolicy::load(&settings),
            Err(CustodianError::Configuration(_))
        ));
    }

    #[test]
    fn missing_file_yields_empty_policy() {
        let dir = TempDir::new().unwrap();
        let mut settings = Settings::default();
        settings.protected_targets_file = Some(dir.path().join("absent.yaml"));
        let p = ProtectedTargetPolicy::load(&settings).unwrap();
        assert!(p.is_empty());
    }

    #[tokio::test]
    async fn guard_blocks_before_inner_handler_runs() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut inner = ActionRegistry::new();
        inner.register_fn("directory.disable_user", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(true.into())
        });

        let p = Arc::new(policy(PolicyRules {
            emails: vec!["vip@co.example".into()],
            ..Default::default()
        }));
        let guarded = PolicyGuard::wrap(
            "directory.disable_user",
            inner.get("directory.disable_user").unwrap(),
            p,
        );

        let blocked = ActionContext::new(user("vip@co.example"), "test");
        let err = guarded.execute(&blocked).await.unwrap_err();
        assert!(matches!(err, ActionError::PolicyBlocked(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let allowed = ActionContext::new(user("someone@co.example"), "test");
        assert!(guarded.execute(&allowed).await.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
