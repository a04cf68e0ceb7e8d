use crate::error::Result;
use crate::identity::TargetIdentity;
use crate::types::TriggerKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub work_email: String,
    pub date: String,
    pub completed_at: DateTime<Utc>,
    pub trigger_source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct HistoryFile {
    #[serde(default)]
    onboarding_success: BTreeMap<String, CompletionRecord>,
    #[serde(default)]
    offboarding_success: BTreeMap<String, CompletionRecord>,
}

/// Lifecycle events that already completed, keyed by `email|date`.
///
/// Consulted before every execution so repeated detections of the same
/// event never run its workflow twice.
#[derive(Debug, Clone)]
pub struct CompletionHistory {
    path: PathBuf,
    data: HistoryFile,
}

impl CompletionHistory {
    pub fn load(path: &Path) -> Result<Self> {
        let data = if path.exists() {
            let text = std::fs::read_to_string(path)?;
            if text.trim().is_empty() {
                HistoryFile::default()
            } else {
                serde_yaml::from_str(&text)?
            }
        } else {
            HistoryFile::default()
        };
        Ok(Self {
            path: path.to_path_buf(),
            data,
        })
    }

    fn bucket(&self, kind: TriggerKind) -> &BTreeMap<String, CompletionRecord> {
        match kind {
            TriggerKind::Onboard => &self.data.onboarding_success,
            TriggerKind::Offboard => &self.data.offboarding_success,
        }
    }

    pub fn contains(&self, kind: TriggerKind, identity: &TargetIdentity) -> bool {
        self.bucket(kind).contains_key(&identity.dedupe_key(kind))
    }

    pub fn get(&self, kind: TriggerKind, dedupe_key: &str) -> Option<&CompletionRecord> {
        self.bucket(kind).get(dedupe_key)
    }

    pub fn len(&self, kind: TriggerKind) -> usize {
        self.bucket(kind).len()
    }

    /// Record a successful run and persist immediately.
    pub fn record(
        &mut self,
        kind: TriggerKind,
        identity: &TargetIdentity,
        trigger_source: &str,
        request_id: Option<&str>,
    ) -> Result<()> {
        let record = CompletionRecord {
            work_email: identity.email(),
            date: identity
                .event_date(kind)
                .map(|d| d.to_string())
                .unwrap_or_default(),
            completed_at: Utc::now(),
            trigger_source: trigger_source.to_string(),
            request_id: request_id.map(str::to_string),
        };
        let bucket = match kind {
            TriggerKind::Onboard => &mut self.data.onboarding_success,
            TriggerKind::Offboard => &mut self.data.offboarding_success,
        };
        bucket.insert(identity.dedupe_key(kind), record);
        let text = serde_yaml::to_string(&self.data)?;
        crate::io::atomic_write(&self.path, text.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    #[test]
    fn record_persists_and_reloads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("scheduler_state.yaml");
        let mut id = TargetIdentity::new("A", "B", "Alice@co.example");
        id.start_date = NaiveDate::from_ymd_opt(2026, 2, 2);

        let mut history = CompletionHistory::load(&path).unwrap();
        assert!(!history.contains(TriggerKind::Onboard, &id));
        history
            .record(TriggerKind::Onboard, &id, "rippling:onboarding:alice@co.example", Some("ONB-140"))
            .unwrap();

        let reloaded = CompletionHistory::load(&path).unwrap();
        assert!(reloaded.contains(TriggerKind::Onboard, &id));
        assert!(!reloaded.contains(TriggerKind::Offboard, &id));
        let rec = reloaded
            .get(TriggerKind::Onboard, "alice@co.example|2026-02-02")
            .unwrap();
        assert_eq!(rec.request_id.as_deref(), Some("ONB-140"));
        assert_eq!(rec.date, "2026-02-02");
    }

    #[test]
    fn different_date_is_a_new_event() {
        let dir = TempDir::new().unwrap();
        let mut history = CompletionHistory::load(&dir.path().join("h.yaml")).unwrap();
        let mut id = TargetIdentity::new("A", "B", "a@co.example");
        id.end_date = NaiveDate::from_ymd_opt(2026, 2, 2);
        history.record(TriggerKind::Offboard, &id, "manual", None).unwrap();

        id.end_date = NaiveDate::from_ymd_opt(2027, 2, 2);
        assert!(!history.contains(TriggerKind::Offboard, &id));
        assert_eq!(history.len(TriggerKind::Offboard), 1);
    }
}
