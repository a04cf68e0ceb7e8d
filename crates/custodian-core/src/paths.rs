use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const CONFIG_FILE: &str = "custodian.yaml";
pub const STATE_DIR: &str = "custodian_state";
pub const RUNS_DIR: &str = "runs";
pub const WORKFLOWS_DIR: &str = "workflows";

pub const OVERRIDE_QUEUE_FILE: &str = "manual_overrides.csv";
pub const PENDING_QUEUE_FILE: &str = "pending_offboards.csv";
pub const HISTORY_FILE: &str = "scheduler_state.yaml";

pub const ONBOARD_WORKFLOW_FILE: &str = "onboard.yaml";
pub const OFFBOARD_WORKFLOW_FILE: &str = "offboard.yaml";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn runs_dir(state_dir: &Path) -> PathBuf {
    state_dir.join(RUNS_DIR)
}

pub fn run_state_path(state_dir: &Path, run_id: &str) -> PathBuf {
    runs_dir(state_dir).join(format!("{run_id}.yaml"))
}

pub fn override_queue_path(state_dir: &Path) -> PathBuf {
    state_dir.join(OVERRIDE_QUEUE_FILE)
}

pub fn pending_queue_path(state_dir: &Path) -> PathBuf {
    state_dir.join(PENDING_QUEUE_FILE)
}

pub fn history_path(state_dir: &Path) -> PathBuf {
    state_dir.join(HISTORY_FILE)
}

pub fn onboard_workflow_path(workflows_dir: &Path) -> PathBuf {
    workflows_dir.join(ONBOARD_WORKFLOW_FILE)
}

pub fn offboard_workflow_path(workflows_dir: &Path) -> PathBuf {
    workflows_dir.join(OFFBOARD_WORKFLOW_FILE)
}

/// All `*.yaml` / `*.yml` files directly under `dir`, sorted by path.
/// Missing directory yields an empty list.
pub fn workflow_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && matches!(
                    p.extension().and_then(|e| e.to_str()),
                    Some("yaml") | Some("yml")
                )
        })
        .collect();
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn run_state_path_is_under_runs() {
        let p = run_state_path(Path::new("/tmp/state"), "abc123");
        assert_eq!(p, PathBuf::from("/tmp/state/runs/abc123.yaml"));
    }

    #[test]
    fn workflow_files_sorted_and_filtered() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("offboard.yaml"), "").unwrap();
        std::fs::write(dir.path().join("onboard.yml"), "").unwrap();
        std::fs::write(dir.path().join("README.md"), "").unwrap();
        let files = workflow_files(dir.path()).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("offboard.yaml"));
        assert!(files[1].ends_with("onboard.yml"));
    }

    #[test]
    fn workflow_files_missing_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(workflow_files(&dir.path().join("nope")).unwrap().is_empty());
    }
}
