//! A YAML snapshot that stands in for both upstream systems.
//!
//! ```yaml
//! identities:
//!   - first_name: Alice
//!     last_name: Nguyen
//!     work_email: alice@co.example
//!     start_date: 2026-02-02
//! tickets:
//!   - ticket_id: "140"
//!     subject: "New hire: Alice Nguyen"
//!     body: "Please prepare alice@co.example"
//!     updated_at: 2026-02-02T08:00:00Z
//! ```
//!
//! `FeedFile` is one parsed snapshot. `FeedSource` re-reads the file on
//! every fetch, so a long-running scheduler sees what upstream last wrote.

use super::{CandidateSource, Ticket, TicketSource};
use crate::error::{CustodianError, Result};
use crate::identity::TargetIdentity;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedTicket {
    #[serde(flatten)]
    pub ticket: Ticket,
    /// Tickets without a timestamp are always inside the lookback window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedFile {
    #[serde(default)]
    pub identities: Vec<TargetIdentity>,
    #[serde(default)]
    pub tickets: Vec<FeedTicket>,
}

impl FeedFile {
    pub fn new(identities: Vec<TargetIdentity>, tickets: Vec<Ticket>) -> Self {
        Self {
            identities,
            tickets: tickets
                .into_iter()
                .map(|ticket| FeedTicket {
                    ticket,
                    updated_at: None,
                })
                .collect(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(&data)?)
    }

    fn dated(&self, pick: impl Fn(&TargetIdentity) -> Option<NaiveDate>, date: NaiveDate) -> Vec<TargetIdentity> {
        self.identities
            .iter()
            .filter(|&i| pick(i) == Some(date))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl CandidateSource for FeedFile {
    async fn onboarding_candidates(&self, date: NaiveDate) -> Result<Vec<TargetIdentity>> {
        Ok(self.dated(|i| i.start_date, date))
    }

    async fn offboarding_candidates(&self, date: NaiveDate) -> Result<Vec<TargetIdentity>> {
        Ok(self.dated(|i| i.end_date, date))
    }
}

#[async_trait]
impl TicketSource for FeedFile {
    async fn tickets_matching(
        &self,
        keywords: &[String],
        lookback: chrono::Duration,
    ) -> Result<Vec<Ticket>> {
        let since = Utc::now() - lookback;
        Ok(self
            .tickets
            .iter()
            .filter(|t| t.updated_at.map_or(true, |at| at >= since))
            .filter(|t| t.ticket.matches_any(keywords))
            .map(|t| t.ticket.clone())
            .collect())
    }
}

// ---------------------------------------------------------------------------
// FeedSource
// ---------------------------------------------------------------------------

pub struct FeedSource {
    path: PathBuf,
}

impl FeedSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The file as it is now. Missing reads as empty.
    pub fn snapshot(&self) -> Result<FeedFile> {
        if !self.path.exists() {
            tracing::debug!(path = %self.path.display(), "feed file missing; treating as empty");
            return Ok(FeedFile::default());
        }
        FeedFile::load(&self.path).map_err(|e| {
            CustodianError::Configuration(format!("feed '{}': {e}", self.path.display()))
        })
    }
}

#[async_trait]
impl CandidateSource for FeedSource {
    async fn onboarding_candidates(&self, date: NaiveDate) -> Result<Vec<TargetIdentity>> {
        self.snapshot()?.onboarding_candidates(date).await
    }

    async fn offboarding_candidates(&self, date: NaiveDate) -> Result<Vec<TargetIdentity>> {
        self.snapshot()?.offboarding_candidates(date).await
    }
}

#[async_trait]
impl TicketSource for FeedSource {
    async fn tickets_matching(
        &self,
        keywords: &[String],
        lookback: chrono::Duration,
    ) -> Result<Vec<Ticket>> {
        self.snapshot()?.tickets_matching(keywords, lookback).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const FEED: &str = r#"
identities:
  - first_name: Alice
    last_name: Nguyen
    work_email: alice@co.example
    start_date: 2026-02-02
  - first_name: Carol
    last_name: Diaz
    work_email: carol@co.example
    end_date: 2026-02-02
tickets:
  - ticket_id: "140"
    subject: "New hire: Alice"
    body: "alice@co.example"
  - ticket_id: "99"
    subject: "Offboard Carol"
    emails: [carol@co.example]
    updated_at: 2001-01-01T00:00:00Z
"#;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, 2).unwrap()
    }

    #[tokio::test]
    async fn feed_serves_both_sources() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("feed.yaml");
        std::fs::write(&path, FEED).unwrap();
        let feed = FeedFile::load(&path).unwrap();

        let on = feed.onboarding_candidates(day()).await.unwrap();
        assert_eq!(on.len(), 1);
        assert_eq!(on[0].work_email, "alice@co.example");
        let off = feed.offboarding_candidates(day()).await.unwrap();
        assert_eq!(off[0].work_email, "carol@co.example");

        let onboarding = feed
            .tickets_matching(&["new hire".to_string()], chrono::Duration::minutes(60))
            .await
            .unwrap();
        assert_eq!(onboarding.len(), 1);
        assert_eq!(onboarding[0].ticket_id, "140");
    }

    #[tokio::test]
    async fn source_rereads_file_on_every_fetch() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("feed.yaml");
        let source = FeedSource::new(&path);
        assert!(source.onboarding_candidates(day()).await.unwrap().is_empty());

        std::fs::write(&path, FEED).unwrap();
        let on = source.onboarding_candidates(day()).await.unwrap();
        assert_eq!(on[0].work_email, "alice@co.example");

        std::fs::write(&path, "identities: [\n").unwrap();
        let err = source.offboarding_candidates(day()).await.unwrap_err();
        assert!(err.to_string().contains("feed.yaml"));
    }

    #[tokio::test]
    async fn stale_tickets_fall_outside_lookback() {
        let feed: FeedFile = serde_yaml::from_str(FEED).unwrap();
        let off = feed
            .tickets_matching(&["offboard".to_string()], chrono::Duration::minutes(1440))
            .await
            .unwrap();
        assert!(off.is_empty());
    }
}
