//! Staged offboarding intents, one row per `email|end_date`.

use super::{field, now_iso, truncate_error, CsvStore, Queue, Row, Upsert};
use crate::error::{CustodianError, Result};
use crate::identity::{parse_date, TargetIdentity};
use crate::trigger::ValidatedTrigger;
use crate::types::{PendingStatus, TriggerKind};
use serde::Serialize;
use std::path::PathBuf;

pub const PENDING_COLUMNS: &[&str] = &[
    "request_id",
    "status",
    "dedupe_key",
    "work_email",
    "first_name",
    "last_name",
    "department",
    "employment_type",
    "start_date",
    "end_date",
    "confirmation_source_a",
    "confirmation_source_b",
    "reason",
    "last_error",
    "created_at",
    "updated_at",
];

const KEY: &str = "dedupe_key";
const STAGED_REASON: &str = "Dual-source departure validated";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingAction {
    pub request_id: String,
    pub dedupe_key: String,
    pub status: PendingStatus,
    pub identity: TargetIdentity,
    pub confirmation_source_a: String,
    pub confirmation_source_b: String,
    pub reason: String,
    pub last_error: String,
    pub created_at: String,
    pub updated_at: String,
}

impl PendingAction {
    /// Lenient parse for listing: bad dates read as absent, unknown status as
    /// ERROR so it is never picked up silently.
    fn from_row(row: &Row) -> Self {
        let mut identity = TargetIdentity::new(
            field(row, "first_name"),
            field(row, "last_name"),
            field(row, "work_email"),
        );
        identity.department = field(row, "department").to_string();
        identity.employment_type = field(row, "employment_type").to_string();
        identity.start_date = parse_date(field(row, "start_date")).ok();
        identity.end_date = parse_date(field(row, "end_date")).ok();

        let status = if field(row, "status").eq_ignore_ascii_case(PendingStatus::Pending.as_str()) {
            PendingStatus::Pending
        } else {
            PendingStatus::Error
        };

        Self {
            request_id: field(row, "request_id").to_string(),
            dedupe_key: field(row, KEY).to_string(),
            status,
            identity,
            confirmation_source_a: field(row, "confirmation_source_a").to_string(),
            confirmation_source_b: field(row, "confirmation_source_b").to_string(),
            reason: field(row, "reason").to_string(),
            last_error: field(row, "last_error").to_string(),
            created_at: field(row, "created_at").to_string(),
            updated_at: field(row, "updated_at").to_string(),
        }
    }
}

/// What `stage` did with the row for a trigger's event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Staged {
    Written(Upsert, String),
    /// The row is ERROR and stays that way until an operator resets it.
    Held(String),
}

impl Staged {
    pub fn request_id(&self) -> &str {
        match self {
            Staged::Written(_, id) | Staged::Held(id) => id,
        }
    }
}

pub struct PendingQueue<Q: Queue = CsvStore> {
    store: Q,
}

impl PendingQueue<CsvStore> {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self::with_store(CsvStore::new(path, PENDING_COLUMNS))
    }
}

impl<Q: Queue> PendingQueue<Q> {
    pub fn with_store(store: Q) -> Self {
        Self { store }
    }

    pub fn ensure(&self) -> Result<()> {
        self.store.ensure()
    }

    pub fn list(&self) -> Result<Vec<PendingAction>> {
        Ok(self
            .store
            .load()?
            .rows
            .iter()
            .map(PendingAction::from_row)
            .collect())
    }

    /// Insert or refresh the row for this trigger's `email|end_date`.
    /// An existing ERROR row is never moved back to PENDING here; that takes
    /// `reset`.
    pub fn stage(
        &self,
        trigger: &ValidatedTrigger,
        status: PendingStatus,
        last_error: &str,
    ) -> Result<Staged> {
        let identity = trigger.identity();
        let dedupe_key = identity.dedupe_key(TriggerKind::Offboard);
        let now = now_iso();
        let mut table = self.store.load()?;

        if let Some(index) = table.position(KEY, &dedupe_key) {
            let row = &mut table.rows[index];
            let is_error = !field(row, "status").eq_ignore_ascii_case(PendingStatus::Pending.as_str());
            if is_error && status == PendingStatus::Pending {
                return Ok(Staged::Held(field(row, "request_id").to_string()));
            }
            row.insert("status".into(), status.to_string());
            row.insert("confirmation_source_a".into(), trigger.confirmation_source_a().to_string());
            row.insert("confirmation_source_b".into(), trigger.confirmation_source_b().to_string());
            row.insert("reason".into(), STAGED_REASON.into());
            row.insert("last_error".into(), truncate_error(last_error));
            row.insert("updated_at".into(), now);
            if field(row, "request_id").is_empty() {
                row.insert("request_id".into(), trigger.request_id(TriggerKind::Offboard));
            }
            let request_id = field(row, "request_id").to_string();
            self.store.save(&table)?;
            return Ok(Staged::Written(Upsert::Updated, request_id));
        }

        let request_id = trigger.request_id(TriggerKind::Offboard);
        let date = |d: Option<chrono::NaiveDate>| d.map(|d| d.to_string()).unwrap_or_default();
        let row: Row = [
            ("request_id", request_id.clone()),
            ("status", status.to_string()),
            ("dedupe_key", dedupe_key),
            ("work_email", identity.work_email.trim().to_string()),
            ("first_name", identity.first_name.clone()),
            ("last_name", identity.last_name.clone()),
            ("department", identity.department.clone()),
            ("employment_type", identity.employment_type.clone()),
            ("start_date", date(identity.start_date)),
            ("end_date", date(identity.end_date)),
            ("confirmation_source_a", trigger.confirmation_source_a().to_string()),
            ("confirmation_source_b", trigger.confirmation_source_b().to_string()),
            ("reason", STAGED_REASON.to_string()),
            ("last_error", truncate_error(last_error)),
            ("created_at", now.clone()),
            ("updated_at", now),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        table.rows.push(row);
        self.store.save(&table)?;
        Ok(Staged::Written(Upsert::Inserted, request_id))
    }

    /// Drop the row for this identity's offboarding event, if any.
    pub fn remove_for(&self, identity: &TargetIdentity) -> Result<bool> {
        self.store.remove(KEY, &identity.dedupe_key(TriggerKind::Offboard))
    }

    pub fn mark_error(&self, dedupe_key: &str, error: &str) -> Result<bool> {
        let mut table = self.store.load()?;
        let Some(index) = table.position(KEY, dedupe_key) else {
            return Ok(false);
        };
        let row = &mut table.rows[index];
        row.insert("status".into(), PendingStatus::Error.to_string());
        row.insert("last_error".into(), truncate_error(error));
        row.insert("updated_at".into(), now_iso());
        self.store.save(&table)?;
        Ok(true)
    }

    /// Put the row carrying `request_id` back to PENDING so the next
    /// validated trigger for its event executes again.
    pub fn reset(&self, request_id: &str) -> Result<()> {
        let mut table = self.store.load()?;
        let Some(index) = table.position("request_id", request_id) else {
            return Err(CustodianError::RequestNotFound(request_id.to_string()));
        };
        let row = &mut table.rows[index];
        row.insert("status".into(), PendingStatus::Pending.to_string());
        row.insert("last_error".into(), String::new());
        row.insert("updated_at".into(), now_iso());
        self.store.save(&table)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn trigger(email: &str, ticket: &str) -> ValidatedTrigger {
        let mut id = TargetIdentity::new("Carol", "Diaz", email);
        id.end_date = NaiveDate::from_ymd_opt(2026, 2, 2);
        ValidatedTrigger::new(
            id,
            format!("rippling:offboarding:{email}"),
            format!("freshservice:ticket_id:{ticket}"),
        )
        .unwrap()
    }

    #[test]
    fn stage_dedupes_by_email_and_end_date() {
        let dir = TempDir::new().unwrap();
        let q = PendingQueue::open(dir.path().join("pending_offboards.csv"));
        q.ensure().unwrap();

        let first = q.stage(&trigger("carol@co.example", "77"), PendingStatus::Pending, "").unwrap();
        assert_eq!(first, Staged::Written(Upsert::Inserted, "OFF-77".into()));

        // Same event seen on a later tick via a follow-up ticket.
        let second = q
            .stage(&trigger("Carol@co.example", "78"), PendingStatus::Pending, "")
            .unwrap();
        assert_eq!(
            second,
            Staged::Written(Upsert::Updated, "OFF-77".into()),
            "request id is stable across re-staging"
        );

        let rows = q.list().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].dedupe_key, "carol@co.example|2026-02-02");
        assert_eq!(rows[0].confirmation_source_b, "freshservice:ticket_id:78");
        assert_eq!(rows[0].status, PendingStatus::Pending);
    }

    #[test]
    fn mark_error_and_remove() {
        let dir = TempDir::new().unwrap();
        let q = PendingQueue::open(dir.path().join("pending_offboards.csv"));
        let t = trigger("carol@co.example", "77");
        q.stage(&t, PendingStatus::Pending, "").unwrap();

        assert!(q.mark_error("carol@co.example|2026-02-02", "disable failed").unwrap());
        let rows = q.list().unwrap();
        assert_eq!(rows[0].status, PendingStatus::Error);
        assert_eq!(rows[0].last_error, "disable failed");

        assert!(q.remove_for(t.identity()).unwrap());
        assert!(!q.remove_for(t.identity()).unwrap());
        assert!(q.list().unwrap().is_empty());
    }

    #[test]
    fn error_rows_stay_error_until_reset() {
        let dir = TempDir::new().unwrap();
        let q = PendingQueue::open(dir.path().join("pending_offboards.csv"));
        let t = trigger("carol@co.example", "77");
        q.stage(&t, PendingStatus::Pending, "").unwrap();
        q.mark_error("carol@co.example|2026-02-02", "disable failed").unwrap();

        let again = q.stage(&t, PendingStatus::Pending, "").unwrap();
        assert_eq!(again, Staged::Held("OFF-77".into()));
        let rows = q.list().unwrap();
        assert_eq!(rows[0].status, PendingStatus::Error);
        assert_eq!(rows[0].last_error, "disable failed");

        q.reset("OFF-77").unwrap();
        let rows = q.list().unwrap();
        assert_eq!(rows[0].status, PendingStatus::Pending);
        assert!(rows[0].last_error.is_empty());
        assert!(matches!(
            q.stage(&t, PendingStatus::Pending, "").unwrap(),
            Staged::Written(Upsert::Updated, _)
        ));

        assert!(matches!(q.reset("OFF-404"), Err(CustodianError::RequestNotFound(_))));
    }

    #[test]
    fn staged_error_keeps_truncated_detail() {
        let dir = TempDir::new().unwrap();
        let q = PendingQueue::open(dir.path().join("p.csv"));
        q.stage(&trigger("carol@co.example", "1"), PendingStatus::Error, &"e".repeat(800))
            .unwrap();
        assert_eq!(q.list().unwrap()[0].last_error.len(), 500);
    }
}
