use crate::error::{CustodianError, Result};
use crate::types::StepKind;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Step {
    pub id: String,
    #[serde(default, alias = "name")]
    pub description: String,
    #[serde(default, rename = "type")]
    pub kind: StepKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Action invoked once after a successful `action`; not retried.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires: Vec<String>,
    /// Retries after the first attempt. `0` means one attempt total.
    #[serde(default)]
    pub retries: u32,
    #[serde(default = "default_retry_wait", alias = "retry_wait")]
    pub retry_wait_seconds: u64,
}

fn default_retry_wait() -> u64 {
    5
}

impl Step {
    pub fn action(id: impl Into<String>, action: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            description: id.clone(),
            id,
            kind: StepKind::Action,
            action: Some(action.into()),
            verify: None,
            requires: Vec::new(),
            retries: 0,
            retry_wait_seconds: default_retry_wait(),
        }
    }

    pub fn manual(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            kind: StepKind::Manual,
            action: None,
            verify: None,
            requires: Vec::new(),
            retries: 0,
            retry_wait_seconds: default_retry_wait(),
        }
    }

    pub fn with_retries(mut self, retries: u32, wait_seconds: u64) -> Self {
        self.retries = retries;
        self.retry_wait_seconds = wait_seconds;
        self
    }

    pub fn with_requires(mut self, requires: &[&str]) -> Self {
        self.requires = requires.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_verify(mut self, verify: impl Into<String>) -> Self {
        self.verify = Some(verify.into());
        self
    }

    /// Action ids this step needs from the registry (`action` then `verify`).
    pub fn bound_actions(&self) -> impl Iterator<Item = &str> {
        self.action.as_deref().into_iter().chain(self.verify.as_deref())
    }
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Workflow {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub steps: Vec<Step>,
}

fn default_version() -> String {
    "1".to_string()
}

impl Workflow {
    pub fn new(name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            name: name.into(),
            version: default_version(),
            steps,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let workflow: Workflow = serde_yaml::from_str(&data)?;
        workflow.validate()?;
        Ok(workflow)
    }

    pub fn from_yaml(data: &str) -> Result<Self> {
        let workflow: Workflow = serde_yaml::from_str(data)?;
        workflow.validate()?;
        Ok(workflow)
    }

    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Structural checks: unique non-empty ids, `requires` pointing only at
    /// earlier steps, and an action id on every action step.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| CustodianError::InvalidWorkflow {
            workflow: self.name.clone(),
            reason,
        };

        let mut seen: HashSet<&str> = HashSet::new();
        for step in &self.steps {
            if step.id.trim().is_empty() {
                return Err(invalid("step with empty id".into()));
            }
            for dep in &step.requires {
                if dep == &step.id {
                    return Err(invalid(format!("step '{}' requires itself", step.id)));
                }
                if !seen.contains(dep.as_str()) {
                    return Err(invalid(format!(
                        "step '{}' requires '{dep}', which is not an earlier step",
                        step.id
                    )));
                }
            }
            if step.kind == StepKind::Action
                && step.action.as_deref().map(str::trim).unwrap_or("").is_empty()
            {
                return Err(invalid(format!("action step '{}' has no action id", step.id)));
            }
            if !seen.insert(step.id.as_str()) {
                return Err(invalid(format!("duplicate step id '{}'", step.id)));
            }
        }
        Ok(())
    }

    /// Whether this workflow performs offboarding and therefore must open
    /// with the protected-target gate. Decided from the name or file name.
    pub fn is_offboarding(&self, source: Option<&Path>) -> bool {
        let by_name = self.name.to_lowercase().contains("offboard");
        let by_file = source
            .and_then(|p| p.file_name())
            .and_then(|f| f.to_str())
            .map(|f| f.to_lowercase().contains("offboard"))
            .unwrap_or(false);
        by_name || by_file
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const OFFBOARD: &str = r#"
name: Offboard US
version: "2"
steps:
  - id: gate
    description: Protected target gate
    action: builtin.validate_target_email
  - id: disable
    name: Disable directory account
    action: directory.disable_user
    verify: directory.verify_disabled
    requires: [gate]
    retries: 2
    retry_wait_seconds: 10
  - id: badge
    type: manual
    description: Collect badge
"#;

    #[test]
    fn parses_workflow_yaml() {
        let wf = Workflow::from_yaml(OFFBOARD).unwrap();
        assert_eq!(wf.name, "Offboard US");
        assert_eq!(wf.version, "2");
        assert_eq!(wf.steps.len(), 3);
        let disable = wf.step("disable").unwrap();
        assert_eq!(disable.description, "Disable directory account");
        assert_eq!(disable.retries, 2);
        assert_eq!(disable.retry_wait_seconds, 10);
        assert_eq!(disable.requires, vec!["gate".to_string()]);
        assert_eq!(
            disable.bound_actions().collect::<Vec<_>>(),
            vec!["directory.disable_user", "directory.verify_disabled"]
        );
        assert_eq!(wf.step("badge").unwrap().kind, StepKind::Manual);
    }

    #[test]
    fn step_defaults() {
        let wf = Workflow::from_yaml("name: w\nsteps:\n  - id: a\n    action: builtin.noop\n").unwrap();
        let a = &wf.steps[0];
        assert_eq!(a.kind, StepKind::Action);
        assert_eq!(a.retries, 0);
        assert_eq!(a.retry_wait_seconds, 5);
        assert_eq!(wf.version, "1");
    }

    #[test]
    fn rejects_unknown_fields() {
        let yaml = "name: w\nsteps:\n  - id: a\n    action: builtin.noop\n    retrys: 3\n";
        assert!(Workflow::from_yaml(yaml).is_err(), "typo should be rejected");
    }

    #[test]
    fn rejects_forward_requirement() {
        let wf = Workflow::new(
            "w",
            vec![
                Step::action("a", "builtin.noop").with_requires(&["b"]),
                Step::action("b", "builtin.noop"),
            ],
        );
        let err = wf.validate().unwrap_err().to_string();
        assert!(err.contains("not an earlier step"), "{err}");
    }

    #[test]
    fn rejects_duplicate_ids() {
        let wf = Workflow::new(
            "w",
            vec![Step::action("a", "builtin.noop"), Step::action("a", "builtin.noop")],
        );
        assert!(wf.validate().unwrap_err().to_string().contains("duplicate"));
    }

    #[test]
    fn rejects_action_step_without_action() {
        let yaml = "name: w\nsteps:\n  - id: a\n    type: action\n";
        assert!(Workflow::from_yaml(yaml).is_err());
    }

    #[test]
    fn offboarding_detection() {
        let wf = Workflow::new("Leaver flow", vec![]);
        assert!(!wf.is_offboarding(None));
        assert!(wf.is_offboarding(Some(Path::new("workflows/offboard_us.yaml"))));
        assert!(Workflow::new("Offboard EU", vec![]).is_offboarding(None));
    }

    #[test]
    fn load_from_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("offboard.yaml");
        std::fs::write(&path, OFFBOARD).unwrap();
        let wf = Workflow::load(&path).unwrap();
        assert_eq!(wf.steps[0].id, "gate");
    }
}
