use crate::error::{CustodianError, Result};
use crate::paths;
use crate::policy::{csv_values, PolicyRules};
use crate::trigger::overlapping_keywords;
use crate::types::{ExecutionMode, NotifyMode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ENV_PREFIX: &str = "CUSTODIAN_";

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Process-wide configuration, built once at startup and passed by reference.
///
/// Precedence: defaults, then the YAML file, then `CUSTODIAN_*` environment
/// variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub state_dir: PathBuf,
    pub workflows_dir: PathBuf,
    pub onboard_workflow: Option<PathBuf>,
    pub offboard_workflow: Option<PathBuf>,
    pub override_queue: Option<PathBuf>,
    pub pending_queue: Option<PathBuf>,
    pub history_file: Option<PathBuf>,
    /// Snapshot feed used as both candidate and ticket source.
    pub feed_file: Option<PathBuf>,

    pub execution_mode: ExecutionMode,
    pub interval_minutes: u64,
    pub lookback_minutes: u64,
    pub notify_mode: NotifyMode,
    pub preflight_strict: bool,

    pub admin_email: Option<String>,
    pub corporate_domains: Vec<String>,
    pub protected_targets_file: Option<PathBuf>,
    pub protected_emails: String,
    pub protected_usernames: String,
    pub protected_domains: String,
    pub protected_departments: String,
    pub protected_titles: String,

    pub manual_override_allow_early: bool,
    pub manual_override_enforce_start_date: bool,

    pub onboarding_keywords: Vec<String>,
    pub offboarding_keywords: Vec<String>,
    pub source_a_name: String,
    pub source_b_name: String,

    /// Environment variables adapters need; preflight blocks when any is unset.
    pub required_settings: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(paths::STATE_DIR),
            workflows_dir: PathBuf::from(paths::WORKFLOWS_DIR),
            onboard_workflow: None,
            offboard_workflow: None,
            override_queue: None,
            pending_queue: None,
            history_file: None,
            feed_file: None,
            execution_mode: ExecutionMode::Staged,
            interval_minutes: 5,
            lookback_minutes: 1440,
            notify_mode: NotifyMode::Summary,
            preflight_strict: false,
            admin_email: None,
            corporate_domains: Vec::new(),
            protected_targets_file: None,
            protected_emails: String::new(),
            protected_usernames: String::new(),
            protected_domains: String::new(),
            protected_departments: String::new(),
            protected_titles: String::new(),
            manual_override_allow_early: false,
            manual_override_enforce_start_date: true,
            onboarding_keywords: default_onboarding_keywords(),
            offboarding_keywords: default_offboarding_keywords(),
            source_a_name: "rippling".to_string(),
            source_b_name: "freshservice".to_string(),
            required_settings: Vec::new(),
        }
    }
}

fn default_onboarding_keywords() -> Vec<String> {
    ["onboard", "new hire"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_offboarding_keywords() -> Vec<String> {
    [
        "offboard",
        "termination",
        "terminate",
        "deprovision",
        "departure",
        "separation",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Settings {
    /// Defaults, then `config_file` (if given), then environment overrides.
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        let mut settings = match config_file {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        settings.apply_env(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            CustodianError::Configuration(format!(
                "cannot read config file '{}': {e}",
                path.display()
            ))
        })?;
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(&data)?)
    }

    /// Apply `CUSTODIAN_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(&format!("{ENV_PREFIX}{name}"))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(v) = get("STATE_DIR") {
            self.state_dir = PathBuf::from(v);
        }
        if let Some(v) = get("WORKFLOWS_DIR") {
            self.workflows_dir = PathBuf::from(v);
        }
        if let Some(v) = get("FEED_FILE") {
            self.feed_file = Some(PathBuf::from(v));
        }
        if let Some(v) = get("EXECUTION_MODE") {
            self.execution_mode = v.parse()?;
        }
        if let Some(v) = get("INTERVAL_MINUTES") {
            self.interval_minutes = parse_number("INTERVAL_MINUTES", &v)?;
        }
        if let Some(v) = get("LOOKBACK_MINUTES") {
            self.lookback_minutes = parse_number("LOOKBACK_MINUTES", &v)?;
        }
        if let Some(v) = get("NOTIFY_MODE") {
            self.notify_mode = v.parse()?;
        }
        if let Some(v) = get("PREFLIGHT_STRICT") {
            self.preflight_strict = parse_flag(&v);
        }
        if let Some(v) = get("ADMIN_EMAIL") {
            self.admin_email = Some(v);
        }
        if let Some(v) = get("CORPORATE_DOMAINS") {
            self.corporate_domains = csv_values(&v);
        }
        if let Some(v) = get("PROTECTED_TARGETS_FILE") {
            self.protected_targets_file = Some(PathBuf::from(v));
        }
        if let Some(v) = get("PROTECTED_EMAILS") {
            self.protected_emails = v;
        }
        if let Some(v) = get("PROTECTED_USERNAMES") {
            self.protected_usernames = v;
        }
        if let Some(v) = get("PROTECTED_DOMAINS") {
            self.protected_domains = v;
        }
        if let Some(v) = get("PROTECTED_DEPARTMENTS") {
            self.protected_departments = v;
        }
        if let Some(v) = get("PROTECTED_TITLES") {
            self.protected_titles = v;
        }
        if let Some(v) = get("MANUAL_OVERRIDE_ALLOW_EARLY") {
            self.manual_override_allow_early = parse_flag(&v);
        }
        if let Some(v) = get("MANUAL_OVERRIDE_ENFORCE_START_DATE") {
            self.manual_override_enforce_start_date = parse_flag(&v);
        }
        Ok(())
    }

    /// Re-anchor every relative path at `root`.
    pub fn rooted(mut self, root: &Path) -> Self {
        let anchor = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = root.join(&*p);
            }
        };
        anchor(&mut self.state_dir);
        anchor(&mut self.workflows_dir);
        for p in [
            &mut self.onboard_workflow,
            &mut self.offboard_workflow,
            &mut self.override_queue,
            &mut self.pending_queue,
            &mut self.history_file,
            &mut self.feed_file,
            &mut self.protected_targets_file,
        ]
        .into_iter()
        .flatten()
        {
            anchor(p);
        }
        self
    }

    // -----------------------------------------------------------------------
    // Derived paths
    // -----------------------------------------------------------------------

    pub fn onboard_workflow_path(&self) -> PathBuf {
        self.onboard_workflow
            .clone()
            .unwrap_or_else(|| paths::onboard_workflow_path(&self.workflows_dir))
    }

    pub fn offboard_workflow_path(&self) -> PathBuf {
        self.offboard_workflow
            .clone()
            .unwrap_or_else(|| paths::offboard_workflow_path(&self.workflows_dir))
    }

    pub fn override_queue_path(&self) -> PathBuf {
        self.override_queue
            .clone()
            .unwrap_or_else(|| paths::override_queue_path(&self.state_dir))
    }

    pub fn pending_queue_path(&self) -> PathBuf {
        self.pending_queue
            .clone()
            .unwrap_or_else(|| paths::pending_queue_path(&self.state_dir))
    }

    pub fn history_path(&self) -> PathBuf {
        self.history_file
            .clone()
            .unwrap_or_else(|| paths::history_path(&self.state_dir))
    }

    pub fn protected_overrides(&self) -> PolicyRules {
        PolicyRules {
            emails: csv_values(&self.protected_emails),
            usernames: csv_values(&self.protected_usernames),
            domains: csv_values(&self.protected_domains),
            departments: csv_values(&self.protected_departments),
            titles_contains: csv_values(&self.protected_titles),
        }
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.interval_minutes == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "interval_minutes must be at least 1".to_string(),
            });
        }

        if self.onboarding_keywords.is_empty() || self.offboarding_keywords.is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "onboarding and offboarding keyword sets must both be non-empty"
                    .to_string(),
            });
        }

        for (on, off) in overlapping_keywords(&self.onboarding_keywords, &self.offboarding_keywords) {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!(
                    "keyword '{on}' overlaps offboarding keyword '{off}'; \
                     a single ticket could trigger both kinds"
                ),
            });
        }

        if self.source_a_name.trim().eq_ignore_ascii_case(self.source_b_name.trim()) {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!(
                    "source_a_name and source_b_name are both '{}'; triggers need two distinct sources",
                    self.source_a_name
                ),
            });
        }

        if self.admin_email.as_deref().map(str::trim).unwrap_or("").is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "admin_email is not set; the operator mailbox is not implicitly protected"
                    .to_string(),
            });
        }

        if self.execution_mode == ExecutionMode::Live && self.corporate_domains.is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "live execution with no corporate_domains configured; \
                          the target gate will accept any email domain"
                    .to_string(),
            });
        }

        warnings
    }
}

fn parse_flag(v: &str) -> bool {
    matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn parse_number(name: &str, v: &str) -> Result<u64> {
    v.parse().map_err(|_| {
        CustodianError::Configuration(format!("{ENV_PREFIX}{name} must be a whole number, got '{v}'"))
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn default_settings_roundtrip() {
        let s = Settings::default();
        let yaml = serde_yaml::to_string(&s).unwrap();
        let parsed: Settings = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, s);
        assert_eq!(parsed.execution_mode, ExecutionMode::Staged);
        assert!(parsed.manual_override_enforce_start_date);
    }

    #[test]
    fn file_then_env_precedence() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("custodian.yaml");
        std::fs::write(&path, "execution_mode: auto\ninterval_minutes: 10\nadmin_email: a@co.example\n")
            .unwrap();
        let mut s = Settings::from_file(&path).unwrap();
        assert_eq!(s.execution_mode, ExecutionMode::Auto);
        assert_eq!(s.interval_minutes, 10);

        s.apply_env(env(&[
            ("CUSTODIAN_EXECUTION_MODE", "live"),
            ("CUSTODIAN_PROTECTED_EMAILS", "vip@co.example, ceo@co.example"),
            ("CUSTODIAN_PREFLIGHT_STRICT", "true"),
            ("CUSTODIAN_INTERVAL_MINUTES", "  "),
        ]))
        .unwrap();
        assert_eq!(s.execution_mode, ExecutionMode::Live);
        assert_eq!(s.interval_minutes, 10, "blank env value must not override");
        assert!(s.preflight_strict);
        assert_eq!(s.protected_overrides().emails.len(), 2);
    }

    #[test]
    fn bad_env_values_are_configuration_faults() {
        let mut s = Settings::default();
        assert!(s.apply_env(env(&[("CUSTODIAN_INTERVAL_MINUTES", "soon")])).is_err());
        assert!(s.apply_env(env(&[("CUSTODIAN_EXECUTION_MODE", "maybe")])).is_err());
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(serde_yaml::from_str::<Settings>("executon_mode: live\n").is_err());
    }

    #[test]
    fn rooted_anchors_relative_paths() {
        let mut s = Settings::default();
        s.feed_file = Some(PathBuf::from("feeds/today.yaml"));
        s.history_file = Some(PathBuf::from("/var/lib/custodian/history.yaml"));
        let s = s.rooted(Path::new("/srv/app"));
        assert_eq!(s.state_dir, PathBuf::from("/srv/app/custodian_state"));
        assert_eq!(s.feed_file, Some(PathBuf::from("/srv/app/feeds/today.yaml")));
        assert_eq!(
            s.history_path(),
            PathBuf::from("/var/lib/custodian/history.yaml")
        );
        assert_eq!(
            s.override_queue_path(),
            PathBuf::from("/srv/app/custodian_state/manual_overrides.csv")
        );
        assert_eq!(
            s.offboard_workflow_path(),
            PathBuf::from("/srv/app/workflows/offboard.yaml")
        );
    }

    #[test]
    fn validate_flags_overlapping_keywords() {
        let mut s = Settings::default();
        s.admin_email = Some("ops@co.example".into());
        assert!(s.validate().is_empty());

        s.offboarding_keywords.push("new hire".into());
        let warnings = s.validate();
        assert!(warnings
            .iter()
            .any(|w| w.level == WarnLevel::Error && w.message.contains("overlaps")));
    }

    #[test]
    fn validate_flags_identical_sources() {
        let mut s = Settings::default();
        s.source_b_name = "Rippling".into();
        assert!(s
            .validate()
            .iter()
            .any(|w| w.message.contains("two distinct sources")));
    }

    #[test]
    fn validate_warns_missing_admin_email() {
        let s = Settings::default();
        assert!(s
            .validate()
            .iter()
            .any(|w| w.level == WarnLevel::Warning && w.message.contains("admin_email")));
    }
}
