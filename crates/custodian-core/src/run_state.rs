use crate::error::Result;
use crate::paths;
use crate::types::StepStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// StepResult
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub detail: serde_json::Value,
    /// Handler invocations made for this step (0 for manual/dry-run).
    #[serde(default)]
    pub attempts: u32,
}

impl StepResult {
    pub fn running(started_at: DateTime<Utc>) -> Self {
        Self {
            status: StepStatus::Running,
            started_at: Some(started_at),
            finished_at: None,
            detail: serde_json::Value::Null,
            attempts: 0,
        }
    }

    pub fn finished(
        status: StepStatus,
        started_at: DateTime<Utc>,
        detail: serde_json::Value,
        attempts: u32,
    ) -> Self {
        Self {
            status,
            started_at: Some(started_at),
            finished_at: Some(Utc::now()),
            detail,
            attempts,
        }
    }
}

// ---------------------------------------------------------------------------
// RunState
// ---------------------------------------------------------------------------

/// Per-run record of step outcomes; the resume anchor for a crashed run.
///
/// Every `set` rewrites the file atomically when the state is backed by disk.
/// `in_memory` states are used for ad-hoc runs that need no resume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: String,
    #[serde(default)]
    pub workflow: String,
    #[serde(default)]
    pub steps: BTreeMap<String, StepResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    path: Option<PathBuf>,
}

impl RunState {
    pub fn in_memory(run_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.into(),
            workflow: String::new(),
            steps: BTreeMap::new(),
            created_at: now,
            updated_at: now,
            path: None,
        }
    }

    /// Open the state for `run_id` under `state_dir`, loading any prior
    /// progress so completed steps are not re-run.
    pub fn open(state_dir: &Path, run_id: &str) -> Result<Self> {
        let path = paths::run_state_path(state_dir, run_id);
        let mut state = if path.exists() {
            let data = std::fs::read_to_string(&path)?;
            serde_yaml::from_str::<RunState>(&data)?
        } else {
            Self::in_memory(run_id)
        };
        state.path = Some(path);
        Ok(state)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn status(&self, step_id: &str) -> Option<StepStatus> {
        self.steps.get(step_id).map(|r| r.status)
    }

    pub fn get(&self, step_id: &str) -> Option<&StepResult> {
        self.steps.get(step_id)
    }

    pub fn set(&mut self, step_id: &str, result: StepResult) -> Result<()> {
        self.steps.insert(step_id.to_string(), result);
        self.updated_at = Utc::now();
        self.save()
    }

    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(path, data.as_bytes())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn run_state_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut state = RunState::open(dir.path(), "run-1").unwrap();
        state.workflow = "Onboard".into();
        state
            .set(
                "gate",
                StepResult::finished(
                    StepStatus::Ok,
                    Utc::now(),
                    serde_json::json!({"detail": "passed"}),
                    1,
                ),
            )
            .unwrap();
        assert!(dir.path().join("runs/run-1.yaml").exists());

        let loaded = RunState::open(dir.path(), "run-1").unwrap();
        assert_eq!(loaded.workflow, "Onboard");
        assert_eq!(loaded.status("gate"), Some(StepStatus::Ok));
        assert_eq!(loaded.get("gate").unwrap().attempts, 1);
        assert_eq!(loaded.status("other"), None);
    }

    #[test]
    fn in_memory_state_does_not_touch_disk() {
        let dir = TempDir::new().unwrap();
        let mut state = RunState::in_memory("ephemeral");
        state
            .set("a", StepResult::running(Utc::now()))
            .unwrap();
        assert!(state.path().is_none());
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }
}
