//! The target of a lifecycle workflow.
//!
//! Identities are built by upstream adapters (HR feed, ticket import, operator
//! queue rows) and are read-only to the engine. `work_email` is the natural
//! key; every comparison lowercases it first.

use crate::error::{CustodianError, Result};
use crate::types::TriggerKind;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetIdentity {
    pub first_name: String,
    pub last_name: String,
    pub work_email: String,
    #[serde(default)]
    pub department: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub employment_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manager_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl TargetIdentity {
    pub fn new(
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        work_email: impl Into<String>,
    ) -> Self {
        Self {
            first_name: first_name.into(),
            last_name: last_name.into(),
            work_email: work_email.into(),
            department: String::new(),
            title: None,
            employment_type: String::new(),
            manager_email: None,
            start_date: None,
            end_date: None,
            location: None,
        }
    }

    pub fn email(&self) -> String {
        self.work_email.trim().to_lowercase()
    }

    /// Local part of the work email.
    pub fn username(&self) -> String {
        let email = self.email();
        match email.split_once('@') {
            Some((local, _)) => local.to_string(),
            None => email,
        }
    }

    pub fn domain(&self) -> Option<String> {
        self.email()
            .split_once('@')
            .map(|(_, d)| d.to_string())
            .filter(|d| !d.is_empty())
    }

    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name.trim(), self.last_name.trim())
    }

    /// The date that makes this identity actionable for `kind`.
    pub fn event_date(&self, kind: TriggerKind) -> Option<NaiveDate> {
        match kind {
            TriggerKind::Onboard => self.start_date,
            TriggerKind::Offboard => self.end_date,
        }
    }

    /// `email|date` for the lifecycle event of `kind`. Identical detections on
    /// different scheduler ticks collapse onto the same key.
    pub fn dedupe_key(&self, kind: TriggerKind) -> String {
        let date = self
            .event_date(kind)
            .map(|d| d.to_string())
            .unwrap_or_default();
        format!("{}|{}", self.email(), date)
    }

    /// Reject identities missing fields every workflow relies on.
    pub fn validate(&self) -> Result<()> {
        let missing: Vec<&str> = [
            ("first_name", self.first_name.trim().is_empty()),
            ("last_name", self.last_name.trim().is_empty()),
            ("work_email", self.work_email.trim().is_empty()),
        ]
        .into_iter()
        .filter(|(_, empty)| *empty)
        .map(|(name, _)| name)
        .collect();
        if !missing.is_empty() {
            return Err(CustodianError::Validation(format!(
                "identity missing required field(s): {}",
                missing.join(", ")
            )));
        }
        let email = self.email();
        match email.split_once('@') {
            Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
            _ => Err(CustodianError::Validation(format!(
                "work_email '{email}' is not a valid address"
            ))),
        }
    }
}

/// Parse an ISO `YYYY-MM-DD` date, tolerating a trailing time component.
pub fn parse_date(text: &str) -> Result<NaiveDate> {
    let trimmed = text.trim();
    let head = trimmed.get(..10).unwrap_or(trimmed);
    NaiveDate::parse_from_str(head, "%Y-%m-%d")
        .map_err(|_| CustodianError::InvalidDate(trimmed.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> TargetIdentity {
        let mut id = TargetIdentity::new("Alice", "Nguyen", " Alice@Co.Example ");
        id.start_date = Some(NaiveDate::from_ymd_opt(2026, 2, 2).unwrap());
        id
    }

    #[test]
    fn email_parts_are_normalized() {
        let id = alice();
        assert_eq!(id.email(), "alice@co.example");
        assert_eq!(id.username(), "alice");
        assert_eq!(id.domain().as_deref(), Some("co.example"));
    }

    #[test]
    fn dedupe_key_uses_email_and_event_date() {
        let mut id = alice();
        assert_eq!(id.dedupe_key(TriggerKind::Onboard), "alice@co.example|2026-02-02");
        assert_eq!(id.dedupe_key(TriggerKind::Offboard), "alice@co.example|");
        id.end_date = Some(NaiveDate::from_ymd_opt(2026, 3, 1).unwrap());
        assert_eq!(id.dedupe_key(TriggerKind::Offboard), "alice@co.example|2026-03-01");
    }

    #[test]
    fn validate_rejects_missing_names() {
        let id = TargetIdentity::new("", "Nguyen", "alice@co.example");
        let err = id.validate().unwrap_err().to_string();
        assert!(err.contains("first_name"));
    }

    #[test]
    fn validate_rejects_malformed_email() {
        let id = TargetIdentity::new("Alice", "Nguyen", "alice");
        assert!(id.validate().is_err());
    }

    #[test]
    fn parse_date_accepts_timestamp_suffix() {
        let d = parse_date("2026-02-02T09:00:00Z").unwrap();
        assert_eq!(d.to_string(), "2026-02-02");
        assert!(parse_date("02/02/2026").is_err());
    }

    #[test]
    fn identity_json_defaults() {
        let json = r#"{"first_name":"Bo","last_name":"Ek","work_email":"bo@co.example"}"#;
        let id: TargetIdentity = serde_json::from_str(json).unwrap();
        assert!(id.start_date.is_none());
        assert_eq!(id.department, "");
    }
}
