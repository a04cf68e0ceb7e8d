//! Startup checks run before the scheduler does anything.
//!
//! Blocking issues mean the engine cannot be trusted to act: a workflow that
//! fails to load, a step bound to an unregistered action, an offboarding
//! workflow that does not open with the protected-target gate, or a required
//! setting left empty. Warnings are logged and otherwise ignored.

use crate::action::ActionRegistry;
use crate::builtin::VALIDATE_TARGET_EMAIL;
use crate::config::{Settings, WarnLevel};
use crate::paths;
use crate::policy::ProtectedTargetPolicy;
use crate::types::StepKind;
use crate::workflow::Workflow;
use serde::Serialize;
use std::path::PathBuf;

const MAX_SENSIBLE_RETRIES: u32 = 10;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PreflightReport {
    pub blocking: Vec<String>,
    pub warnings: Vec<String>,
}

impl PreflightReport {
    pub fn is_clean(&self) -> bool {
        self.blocking.is_empty()
    }

    pub fn log(&self) {
        for warning in &self.warnings {
            tracing::warn!("preflight warning: {warning}");
        }
        for issue in &self.blocking {
            tracing::error!("preflight blocking issue: {issue}");
        }
    }
}

/// Workflow files to check: everything in `workflows_dir`, plus the
/// configured onboard/offboard paths when they live elsewhere.
pub fn workflow_paths(settings: &Settings) -> Vec<PathBuf> {
    let mut found = paths::workflow_files(&settings.workflows_dir).unwrap_or_default();
    for path in [settings.onboard_workflow_path(), settings.offboard_workflow_path()] {
        if !found.contains(&path) {
            found.push(path);
        }
    }
    found
}

/// Why an offboarding workflow is unsafe to run, if it is: the
/// protected-target gate must be its first step.
pub fn offboarding_gate_issue(workflow: &Workflow, shown: &str) -> Option<String> {
    let gate_first = workflow.steps.first().is_some_and(|s| {
        s.kind == StepKind::Action && s.action.as_deref() == Some(VALIDATE_TARGET_EMAIL)
    });
    if gate_first {
        return None;
    }
    let has_gate = workflow
        .steps
        .iter()
        .any(|s| s.action.as_deref() == Some(VALIDATE_TARGET_EMAIL));
    Some(if has_gate {
        format!("offboarding workflow '{shown}' must run '{VALIDATE_TARGET_EMAIL}' as its first step")
    } else {
        format!("offboarding workflow '{shown}' missing required action '{VALIDATE_TARGET_EMAIL}'")
    })
}

pub fn run(
    settings: &Settings,
    registry: &ActionRegistry,
    policy: &ProtectedTargetPolicy,
) -> PreflightReport {
    run_with_env(settings, registry, policy, |key| std::env::var(key).ok())
}

pub fn run_with_env<F>(
    settings: &Settings,
    registry: &ActionRegistry,
    policy: &ProtectedTargetPolicy,
    lookup: F,
) -> PreflightReport
where
    F: Fn(&str) -> Option<String>,
{
    let mut report = PreflightReport::default();

    for warning in settings.validate() {
        match warning.level {
            WarnLevel::Error => report.blocking.push(warning.message),
            WarnLevel::Warning => report.warnings.push(warning.message),
        }
    }

    let mut unbound: Vec<String> = Vec::new();
    for path in workflow_paths(settings) {
        let shown = path.display().to_string();
        let workflow = match Workflow::load(&path) {
            Ok(wf) => wf,
            Err(e) => {
                report
                    .blocking
                    .push(format!("failed to load workflow '{shown}': {e}"));
                continue;
            }
        };

        for step in &workflow.steps {
            for action in step.bound_actions() {
                if !registry.contains(action) {
                    unbound.push(format!("{shown}:{}:{action}", step.id));
                }
            }
            if step.retries > MAX_SENSIBLE_RETRIES {
                report.warnings.push(format!(
                    "workflow '{shown}' step '{}' retries {} times",
                    step.id, step.retries
                ));
            }
        }

        if workflow.is_offboarding(Some(&path)) {
            if let Some(issue) = offboarding_gate_issue(&workflow, &shown) {
                report.blocking.push(issue);
            }
        }
    }
    if !unbound.is_empty() {
        report.blocking.push(format!(
            "workflow action(s) not registered: {}",
            unbound.join(", ")
        ));
    }

    for key in &settings.required_settings {
        let present = lookup(key).is_some_and(|v| !v.trim().is_empty());
        if !present {
            report.blocking.push(format!("{key} missing: required setting is empty"));
        }
    }

    if policy.is_empty() {
        let source = settings
            .protected_targets_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "protected_targets_file".into());
        report.warnings.push(format!(
            "protected target policy is empty; populate '{source}' or CUSTODIAN_PROTECTED_* before live offboarding"
        ));
    }

    match &settings.feed_file {
        None => report
            .warnings
            .push("no feed_file configured; dual-source scans will find no triggers".into()),
        Some(path) if !path.exists() => report
            .warnings
            .push(format!("feed_file '{}' does not exist", path.display())),
        Some(_) => {}
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin;
    use crate::policy::PolicyRules;
    use std::sync::Arc;
    use tempfile::TempDir;

    const ONBOARD: &str = "name: Onboard\nsteps:\n  - id: profile\n    action: builtin.validate_profile\n";
    const OFFBOARD: &str = "name: Offboard\nsteps:\n  - id: gate\n    action: builtin.validate_target_email\n  - id: disable\n    action: builtin.noop\n    requires: [gate]\n";

    struct Fixture {
        dir: TempDir,
        settings: Settings,
        registry: ActionRegistry,
        policy: ProtectedTargetPolicy,
    }

    fn fixture(offboard: &str) -> Fixture {
        let dir = TempDir::new().unwrap();
        let workflows = dir.path().join("workflows");
        std::fs::create_dir_all(&workflows).unwrap();
        std::fs::write(workflows.join("onboard.yaml"), ONBOARD).unwrap();
        std::fs::write(workflows.join("offboard.yaml"), offboard).unwrap();
        let feed = dir.path().join("feed.yaml");
        std::fs::write(&feed, "identities: []\n").unwrap();

        let mut settings = Settings::default();
        settings.workflows_dir = workflows;
        settings.admin_email = Some("ops@co.example".into());
        settings.feed_file = Some(feed);
        let policy = ProtectedTargetPolicy::new(
            PolicyRules {
                emails: vec!["ceo@co.example".into()],
                ..Default::default()
            },
            settings.admin_email.as_deref(),
        );
        let mut registry = ActionRegistry::new();
        builtin::register_builtins(&mut registry, Arc::new(policy.clone()), &[]);
        Fixture {
            dir,
            settings,
            registry,
            policy,
        }
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn clean_setup_has_no_issues() {
        let f = fixture(OFFBOARD);
        let report = run_with_env(&f.settings, &f.registry, &f.policy, no_env);
        assert!(report.is_clean(), "{:?}", report.blocking);
        assert!(report.warnings.is_empty(), "{:?}", report.warnings);
    }

    #[test]
    fn missing_gate_blocks() {
        let f = fixture("name: Offboard\nsteps:\n  - id: disable\n    action: builtin.noop\n");
        let report = run_with_env(&f.settings, &f.registry, &f.policy, no_env);
        assert!(report
            .blocking
            .iter()
            .any(|b| b.contains("missing required action 'builtin.validate_target_email'")));
    }

    #[test]
    fn gate_not_first_blocks() {
        let f = fixture(
            "name: Leaver\nsteps:\n  - id: disable\n    action: builtin.noop\n  - id: gate\n    action: builtin.validate_target_email\n",
        );
        let report = run_with_env(&f.settings, &f.registry, &f.policy, no_env);
        assert!(report.blocking.iter().any(|b| b.contains("as its first step")));
    }

    #[test]
    fn unregistered_actions_block() {
        let f = fixture(OFFBOARD);
        std::fs::write(
            f.settings.workflows_dir.join("extra.yaml"),
            "name: Extra\nsteps:\n  - id: a\n    action: okta.create_user\n    verify: okta.verify_user\n",
        )
        .unwrap();
        let report = run_with_env(&f.settings, &f.registry, &f.policy, no_env);
        let issue = report
            .blocking
            .iter()
            .find(|b| b.starts_with("workflow action(s) not registered"))
            .unwrap();
        assert!(issue.contains("a:okta.create_user"));
        assert!(issue.contains("a:okta.verify_user"));
    }

    #[test]
    fn unloadable_workflow_blocks() {
        let f = fixture(OFFBOARD);
        std::fs::write(f.settings.workflows_dir.join("broken.yaml"), "name: [").unwrap();
        let report = run_with_env(&f.settings, &f.registry, &f.policy, no_env);
        assert!(report.blocking.iter().any(|b| b.contains("broken.yaml")));
    }

    #[test]
    fn required_settings_are_checked() {
        let mut f = fixture(OFFBOARD);
        f.settings.required_settings = vec!["OKTA_TOKEN".into(), "AD_HOST".into()];
        let report = run_with_env(&f.settings, &f.registry, &f.policy, |k| {
            (k == "AD_HOST").then(|| "dc01".to_string())
        });
        assert_eq!(report.blocking, vec!["OKTA_TOKEN missing: required setting is empty"]);
    }

    #[test]
    fn empty_policy_is_a_warning() {
        let f = fixture(OFFBOARD);
        let empty = ProtectedTargetPolicy::new(PolicyRules::default(), None);
        let report = run_with_env(&f.settings, &f.registry, &empty, no_env);
        assert!(report.is_clean());
        assert!(report.warnings.iter().any(|w| w.contains("policy is empty")));
        drop(f.dir);
    }
}
