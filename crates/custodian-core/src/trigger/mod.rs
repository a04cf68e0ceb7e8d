//! Dual-source trigger validation.
//!
//! A lifecycle event is acted on only when two unrelated systems agree: the
//! HR system lists the identity with today's start/end date, and the ticket
//! system carries a matching lifecycle ticket naming the same email. Either
//! side alone yields nothing.

pub mod feed;

use crate::config::Settings;
use crate::error::{CustodianError, Result};
use crate::identity::TargetIdentity;
use crate::types::TriggerKind;
use async_trait::async_trait;
use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

// ---------------------------------------------------------------------------
// ValidatedTrigger
// ---------------------------------------------------------------------------

/// Refuse empty or identical confirmation sources (trimmed, case-insensitive).
pub fn ensure_distinct_sources(source_a: &str, source_b: &str) -> Result<()> {
    let (a, b) = (source_a.trim(), source_b.trim());
    if a.is_empty() || b.is_empty() {
        return Err(CustodianError::Validation(
            "both confirmation sources are required".into(),
        ));
    }
    if a.eq_ignore_ascii_case(b) {
        return Err(CustodianError::Validation(
            "confirmation_source_a and confirmation_source_b must be distinct".into(),
        ));
    }
    Ok(())
}

/// An identity corroborated by two distinct sources. The only constructor
/// enforces the distinctness check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidatedTrigger {
    identity: TargetIdentity,
    confirmation_source_a: String,
    confirmation_source_b: String,
}

impl ValidatedTrigger {
    pub fn new(
        identity: TargetIdentity,
        confirmation_source_a: impl Into<String>,
        confirmation_source_b: impl Into<String>,
    ) -> Result<Self> {
        let confirmation_source_a = confirmation_source_a.into().trim().to_string();
        let confirmation_source_b = confirmation_source_b.into().trim().to_string();
        ensure_distinct_sources(&confirmation_source_a, &confirmation_source_b)?;
        Ok(Self {
            identity,
            confirmation_source_a,
            confirmation_source_b,
        })
    }

    pub fn identity(&self) -> &TargetIdentity {
        &self.identity
    }

    pub fn confirmation_source_a(&self) -> &str {
        &self.confirmation_source_a
    }

    pub fn confirmation_source_b(&self) -> &str {
        &self.confirmation_source_b
    }

    /// `ONB-<ticket>` / `OFF-<ticket>`, derived from source B.
    pub fn request_id(&self, kind: TriggerKind) -> String {
        request_id_for(kind, &self.confirmation_source_b)
    }
}

/// Build a request id from the last `:` segment of a source label, with
/// anything outside `[A-Za-z0-9_-]` replaced by `-`.
pub fn request_id_for(kind: TriggerKind, source: &str) -> String {
    let token = source.trim().rsplit(':').next().unwrap_or("");
    let cleaned: String = token
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('-');
    let cleaned = if cleaned.is_empty() { "unknown" } else { cleaned };
    format!("{}-{cleaned}", kind.request_prefix())
}

// ---------------------------------------------------------------------------
// Source contracts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub ticket_id: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
    /// Requester / custom-field emails reported by the ticket system.
    #[serde(default)]
    pub emails: Vec<String>,
}

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap())
}

impl Ticket {
    /// Whether any keyword occurs in the subject or body (case-insensitive).
    pub fn matches_any(&self, keywords: &[String]) -> bool {
        let haystack = format!("{}\n{}", self.subject, self.body).to_lowercase();
        keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .any(|k| !k.is_empty() && haystack.contains(&k))
    }

    /// Explicit emails plus any addresses mentioned in subject or body,
    /// lowercased, sorted and de-duplicated.
    pub fn mentioned_emails(&self) -> Vec<String> {
        let re = email_regex();
        let mut out: Vec<String> = self
            .emails
            .iter()
            .map(|e| e.trim().to_lowercase())
            .filter(|e| re.is_match(e))
            .collect();
        for text in [&self.subject, &self.body] {
            out.extend(re.find_iter(text).map(|m| m.as_str().to_lowercase()));
        }
        out.sort();
        out.dedup();
        out
    }
}

/// Source A: the HR system of record.
#[async_trait]
pub trait CandidateSource: Send + Sync {
    async fn onboarding_candidates(&self, date: NaiveDate) -> Result<Vec<TargetIdentity>>;
    async fn offboarding_candidates(&self, date: NaiveDate) -> Result<Vec<TargetIdentity>>;
}

/// Source B: the ticketing system.
#[async_trait]
pub trait TicketSource: Send + Sync {
    async fn tickets_matching(
        &self,
        keywords: &[String],
        lookback: chrono::Duration,
    ) -> Result<Vec<Ticket>>;
}

// ---------------------------------------------------------------------------
// Keyword sets
// ---------------------------------------------------------------------------

/// Pairs `(onboarding, offboarding)` where one keyword contains the other.
pub fn overlapping_keywords(onboarding: &[String], offboarding: &[String]) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for on in onboarding {
        for off in offboarding {
            let (a, b) = (on.trim().to_lowercase(), off.trim().to_lowercase());
            if a.is_empty() || b.is_empty() {
                continue;
            }
            if a.contains(&b) || b.contains(&a) {
                out.push((on.clone(), off.clone()));
            }
        }
    }
    out
}

// ---------------------------------------------------------------------------
// TriggerValidator
// ---------------------------------------------------------------------------

pub struct TriggerValidator {
    candidates: Arc<dyn CandidateSource>,
    tickets: Arc<dyn TicketSource>,
    source_a_name: String,
    source_b_name: String,
    onboarding_keywords: Vec<String>,
    offboarding_keywords: Vec<String>,
    lookback: chrono::Duration,
}

impl std::fmt::Debug for TriggerValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerValidator")
            .field("source_a_name", &self.source_a_name)
            .field("source_b_name", &self.source_b_name)
            .field("onboarding_keywords", &self.onboarding_keywords)
            .field("offboarding_keywords", &self.offboarding_keywords)
            .finish()
    }
}

impl TriggerValidator {
    pub fn new(
        candidates: Arc<dyn CandidateSource>,
        tickets: Arc<dyn TicketSource>,
        settings: &Settings,
    ) -> Result<Self> {
        if settings.onboarding_keywords.is_empty() || settings.offboarding_keywords.is_empty() {
            return Err(CustodianError::Configuration(
                "onboarding and offboarding keyword sets must both be non-empty".into(),
            ));
        }
        if let Some((on, off)) = overlapping_keywords(
            &settings.onboarding_keywords,
            &settings.offboarding_keywords,
        )
        .into_iter()
        .next()
        {
            return Err(CustodianError::Configuration(format!(
                "onboarding keyword '{on}' overlaps offboarding keyword '{off}'"
            )));
        }
        let (a, b) = (settings.source_a_name.trim(), settings.source_b_name.trim());
        if a.is_empty() || b.is_empty() || a.eq_ignore_ascii_case(b) {
            return Err(CustodianError::Configuration(format!(
                "trigger sources must be two distinct names, got '{a}' and '{b}'"
            )));
        }
        Ok(Self {
            candidates,
            tickets,
            source_a_name: a.to_string(),
            source_b_name: b.to_string(),
            onboarding_keywords: settings.onboarding_keywords.clone(),
            offboarding_keywords: settings.offboarding_keywords.clone(),
            lookback: chrono::Duration::minutes(settings.lookback_minutes as i64),
        })
    }

    fn keywords(&self, kind: TriggerKind) -> (&[String], &[String]) {
        match kind {
            TriggerKind::Onboard => (&self.onboarding_keywords, &self.offboarding_keywords),
            TriggerKind::Offboard => (&self.offboarding_keywords, &self.onboarding_keywords),
        }
    }

    /// Identities with an event of `kind` on `today` that both sources confirm.
    pub async fn validate(&self, kind: TriggerKind, today: NaiveDate) -> Result<Vec<ValidatedTrigger>> {
        tracing::info!(kind = %kind, %today, "starting dual-source scan");

        let candidates = match kind {
            TriggerKind::Onboard => self.candidates.onboarding_candidates(today).await?,
            TriggerKind::Offboard => self.candidates.offboarding_candidates(today).await?,
        };
        let candidates: Vec<TargetIdentity> = candidates
            .into_iter()
            .filter(|c| c.event_date(kind) == Some(today))
            .collect();
        if candidates.is_empty() {
            tracing::info!(kind = %kind, source = %self.source_a_name, "no candidates for today");
            return Ok(Vec::new());
        }

        let (keywords, opposite) = self.keywords(kind);
        let tickets = self.tickets.tickets_matching(keywords, self.lookback).await?;

        let mut ticket_by_email: HashMap<String, String> = HashMap::new();
        for ticket in &tickets {
            let ticket_id = ticket.ticket_id.trim();
            if ticket_id.is_empty() || !ticket.matches_any(keywords) {
                continue;
            }
            if ticket.matches_any(opposite) {
                tracing::warn!(ticket_id = %ticket_id, kind = %kind, "ticket matches both lifecycle kinds; ignored");
                continue;
            }
            for email in ticket.mentioned_emails() {
                ticket_by_email
                    .entry(email)
                    .or_insert_with(|| ticket_id.to_string());
            }
        }

        let mut triggers = Vec::new();
        for identity in candidates {
            let email = identity.email();
            if email.is_empty() {
                continue;
            }
            let Some(ticket_id) = ticket_by_email.get(&email) else {
                tracing::warn!(
                    email = %email,
                    kind = %kind,
                    "mismatch: found in {} but no {} ticket",
                    self.source_a_name,
                    self.source_b_name
                );
                continue;
            };
            let source_a = format!("{}:{}:{email}", self.source_a_name, kind.as_str());
            let source_b = format!("{}:ticket_id:{ticket_id}", self.source_b_name);
            match ValidatedTrigger::new(identity, source_a, source_b) {
                Ok(trigger) => {
                    tracing::info!(email = %email, ticket_id = %ticket_id, kind = %kind, "validated match");
                    triggers.push(trigger);
                }
                Err(e) => tracing::warn!(email = %email, "trigger rejected: {e}"),
            }
        }
        Ok(triggers)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use feed::FeedFile;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, 2).unwrap()
    }

    fn hire(email: &str) -> TargetIdentity {
        let mut id = TargetIdentity::new("First", "Last", email);
        id.start_date = Some(day());
        id
    }

    fn leaver(email: &str) -> TargetIdentity {
        let mut id = TargetIdentity::new("First", "Last", email);
        id.end_date = Some(day());
        id
    }

    fn ticket(id: &str, subject: &str, body: &str) -> Ticket {
        Ticket {
            ticket_id: id.into(),
            subject: subject.into(),
            body: body.into(),
            emails: Vec::new(),
        }
    }

    fn validator(feed: FeedFile) -> TriggerValidator {
        let feed = Arc::new(feed);
        TriggerValidator::new(feed.clone(), feed, &Settings::default()).unwrap()
    }

    #[tokio::test]
    async fn only_identities_in_both_sources_trigger() {
        let feed = FeedFile::new(
            vec![hire("alice@co.example")],
            vec![
                ticket("140", "New hire: Alice", "Please set up alice@co.example"),
                ticket("141", "New hire: Bob", "Account for bob@co.example"),
            ],
        );
        let triggers = validator(feed).validate(TriggerKind::Onboard, day()).await.unwrap();

        assert_eq!(triggers.len(), 1);
        let t = &triggers[0];
        assert_eq!(t.identity().email(), "alice@co.example");
        assert_eq!(t.confirmation_source_a(), "rippling:onboarding:alice@co.example");
        assert_eq!(t.confirmation_source_b(), "freshservice:ticket_id:140");
        assert_eq!(t.request_id(TriggerKind::Onboard), "ONB-140");
    }

    #[tokio::test]
    async fn single_source_never_triggers() {
        let only_hr = FeedFile::new(vec![leaver("carol@co.example")], vec![]);
        assert!(validator(only_hr)
            .validate(TriggerKind::Offboard, day())
            .await
            .unwrap()
            .is_empty());

        let only_ticket = FeedFile::new(
            vec![],
            vec![ticket("9", "Termination", "carol@co.example leaves today")],
        );
        assert!(validator(only_ticket)
            .validate(TriggerKind::Offboard, day())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn candidate_must_be_dated_today() {
        let mut later = leaver("dan@co.example");
        later.end_date = NaiveDate::from_ymd_opt(2026, 3, 1);
        let feed = FeedFile::new(
            vec![later],
            vec![ticket("7", "Offboard Dan", "dan@co.example")],
        );
        assert!(validator(feed)
            .validate(TriggerKind::Offboard, day())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn first_seen_ticket_wins_and_kinds_do_not_cross() {
        let feed = FeedFile::new(
            vec![leaver("erin@co.example"), hire("finn@co.example")],
            vec![
                ticket("20", "Departure", "erin@co.example"),
                ticket("21", "Departure follow-up", "ERIN@co.example"),
                ticket("22", "Offboard and new hire backfill", "finn@co.example"),
            ],
        );
        let v = validator(feed);
        let off = v.validate(TriggerKind::Offboard, day()).await.unwrap();
        assert_eq!(off.len(), 1);
        assert_eq!(off[0].confirmation_source_b(), "freshservice:ticket_id:20");
        assert_eq!(off[0].request_id(TriggerKind::Offboard), "OFF-20");

        let on = v.validate(TriggerKind::Onboard, day()).await.unwrap();
        assert!(on.is_empty(), "ticket matching both kinds is ambiguous");
    }

    #[test]
    fn identical_sources_are_refused() {
        let err = ValidatedTrigger::new(hire("a@co.example"), " HR:1 ", "hr:1").unwrap_err();
        assert!(err.to_string().contains("distinct"));
        assert!(ValidatedTrigger::new(hire("a@co.example"), "", "t:1").is_err());
    }

    #[test]
    fn request_id_sanitizes_ticket_token() {
        assert_eq!(request_id_for(TriggerKind::Offboard, "freshservice:ticket_id:#88/a"), "OFF-88-a");
        assert_eq!(request_id_for(TriggerKind::Onboard, ""), "ONB-unknown");
    }

    #[test]
    fn overlapping_keyword_sets_are_rejected() {
        let mut settings = Settings::default();
        settings.offboarding_keywords.push("hire".into());
        let feed = Arc::new(FeedFile::default());
        let err = TriggerValidator::new(feed.clone(), feed, &settings).unwrap_err();
        assert!(err.to_string().contains("overlaps"));
    }

    #[test]
    fn ticket_email_extraction() {
        let mut t = ticket("1", "Onboard Jo (JO@co.example)", "cc: mgr@co.example, not-an-email@");
        t.emails = vec![" Requester@Co.Example ".into(), "bogus".into()];
        assert_eq!(
            t.mentioned_emails(),
            vec!["jo@co.example", "mgr@co.example", "requester@co.example"]
        );
    }
}
