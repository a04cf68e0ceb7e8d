//! Operator-submitted onboarding requests.
//!
//! Rows move `HOLD | READY → (removed on success) | ERROR`. ERROR rows stay put
//! until an operator resets them; the scheduler never retries them.

use super::{field, now_iso, truncate_error, CsvStore, Queue, Row, Table, Upsert};
use crate::error::{CustodianError, Result};
use crate::identity::{parse_date, TargetIdentity};
use crate::trigger::ensure_distinct_sources;
use crate::types::{RequestStatus, TriggerKind};
use serde::Serialize;
use std::path::PathBuf;

pub const OVERRIDE_COLUMNS: &[&str] = &[
    "request_id",
    "status",
    "work_email",
    "first_name",
    "last_name",
    "department",
    "employment_type",
    "start_date",
    "title",
    "manager_email",
    "location",
    "confirmation_source_a",
    "confirmation_source_b",
    "reason",
    "allow_before_start_date",
    "last_error",
    "created_at",
    "updated_at",
];

const REQUIRED_COLUMNS: &[&str] = &[
    "request_id",
    "work_email",
    "first_name",
    "last_name",
    "department",
    "employment_type",
    "start_date",
    "confirmation_source_a",
    "confirmation_source_b",
];

const KEY: &str = "request_id";

// ---------------------------------------------------------------------------
// ManualOverrideRequest
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManualOverrideRequest {
    pub request_id: String,
    pub identity: TargetIdentity,
    pub confirmation_source_a: String,
    pub confirmation_source_b: String,
    pub status: RequestStatus,
    pub reason: Option<String>,
    /// Execute even when `start_date` is still in the future.
    pub allow_before_start_date: bool,
    pub last_error: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

impl ManualOverrideRequest {
    pub fn new(
        request_id: impl Into<String>,
        identity: TargetIdentity,
        confirmation_source_a: impl Into<String>,
        confirmation_source_b: impl Into<String>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            identity,
            confirmation_source_a: confirmation_source_a.into(),
            confirmation_source_b: confirmation_source_b.into(),
            status: RequestStatus::Ready,
            reason: None,
            allow_before_start_date: false,
            last_error: None,
            created_at: None,
            updated_at: None,
        }
    }

    pub fn dedupe_key(&self) -> String {
        self.identity.dedupe_key(TriggerKind::Onboard)
    }

    pub fn to_row(&self) -> Row {
        let id = &self.identity;
        let opt = |v: &Option<String>| v.clone().unwrap_or_default();
        let now = now_iso();
        [
            ("request_id", self.request_id.clone()),
            ("status", self.status.to_string()),
            ("work_email", id.work_email.trim().to_string()),
            ("first_name", id.first_name.trim().to_string()),
            ("last_name", id.last_name.trim().to_string()),
            ("department", id.department.trim().to_string()),
            ("employment_type", id.employment_type.trim().to_string()),
            (
                "start_date",
                id.start_date.map(|d| d.to_string()).unwrap_or_default(),
            ),
            ("title", opt(&id.title)),
            ("manager_email", opt(&id.manager_email)),
            ("location", opt(&id.location)),
            ("confirmation_source_a", self.confirmation_source_a.clone()),
            ("confirmation_source_b", self.confirmation_source_b.clone()),
            ("reason", opt(&self.reason)),
            (
                "allow_before_start_date",
                if self.allow_before_start_date { "true" } else { "" }.to_string(),
            ),
            ("last_error", opt(&self.last_error)),
            ("created_at", self.created_at.clone().unwrap_or_else(|| now.clone())),
            ("updated_at", self.updated_at.clone().unwrap_or(now)),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }

    /// Parse and validate a queue row. Any error here makes the row invalid;
    /// the scheduler records it as ERROR instead of executing.
    pub fn from_row(row: &Row) -> Result<Self> {
        for column in REQUIRED_COLUMNS {
            if field(row, column).is_empty() {
                return Err(CustodianError::Validation(format!("{column} is required")));
            }
        }
        let source_a = field(row, "confirmation_source_a");
        let source_b = field(row, "confirmation_source_b");
        ensure_distinct_sources(source_a, source_b)?;

        let optional = |column: &str| {
            let v = field(row, column);
            (!v.is_empty()).then(|| v.to_string())
        };

        let mut identity = TargetIdentity::new(
            field(row, "first_name"),
            field(row, "last_name"),
            field(row, "work_email"),
        );
        identity.department = field(row, "department").to_string();
        identity.employment_type = field(row, "employment_type").to_string();
        identity.title = optional("title");
        identity.manager_email = optional("manager_email");
        identity.location = optional("location");
        identity.start_date = Some(parse_date(field(row, "start_date"))?);
        identity.validate()?;

        Ok(Self {
            request_id: field(row, "request_id").to_string(),
            identity,
            confirmation_source_a: source_a.to_string(),
            confirmation_source_b: source_b.to_string(),
            status: field(row, "status").parse()?,
            reason: optional("reason"),
            allow_before_start_date: is_truthy(field(row, "allow_before_start_date")),
            last_error: optional("last_error"),
            created_at: optional("created_at"),
            updated_at: optional("updated_at"),
        })
    }
}

fn is_truthy(v: &str) -> bool {
    matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "y")
}

// ---------------------------------------------------------------------------
// OverrideQueue
// ---------------------------------------------------------------------------

/// READY rows split into parsed requests and `(request_id, error)` pairs.
#[derive(Debug, Default)]
pub struct ReadyRequests {
    pub ready: Vec<ManualOverrideRequest>,
    pub invalid: Vec<(String, String)>,
}

pub struct OverrideQueue<Q: Queue = CsvStore> {
    store: Q,
}

impl OverrideQueue<CsvStore> {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self::with_store(CsvStore::new(path, OVERRIDE_COLUMNS))
    }
}

impl<Q: Queue> OverrideQueue<Q> {
    pub fn with_store(store: Q) -> Self {
        Self { store }
    }

    pub fn ensure(&self) -> Result<()> {
        self.store.ensure()
    }

    pub fn list(&self) -> Result<Table> {
        self.store.load()
    }

    pub fn load_ready(&self) -> Result<ReadyRequests> {
        let table = self.store.load()?;
        let mut out = ReadyRequests::default();
        for row in &table.rows {
            let status = field(row, "status");
            if !status.is_empty() && !status.eq_ignore_ascii_case(RequestStatus::Ready.as_str()) {
                continue;
            }
            let request_id = field(row, KEY);
            if request_id.is_empty() {
                out.invalid
                    .push(("missing-request-id".into(), "request_id is required".into()));
                continue;
            }
            match ManualOverrideRequest::from_row(row) {
                Ok(request) => out.ready.push(request),
                Err(e) => out.invalid.push((request_id.to_string(), e.to_string())),
            }
        }
        Ok(out)
    }

    /// Insert `request`, or replace an existing row with the same id when
    /// `allow_update` is set. The original `created_at` is kept on update.
    pub fn enqueue(&self, request: &ManualOverrideRequest, allow_update: bool) -> Result<Upsert> {
        let mut row = request.to_row();
        row.insert("last_error".into(), String::new());
        ManualOverrideRequest::from_row(&row)?;

        let mut table = self.store.load()?;
        match table.position(KEY, &request.request_id) {
            Some(_) if !allow_update => {
                Err(CustodianError::DuplicateRequest(request.request_id.clone()))
            }
            Some(index) => {
                let existing = &table.rows[index];
                let created = field(existing, "created_at").to_string();
                if !created.is_empty() {
                    row.insert("created_at".into(), created);
                }
                row.insert("updated_at".into(), now_iso());
                table.rows[index] = row;
                self.store.save(&table)?;
                tracing::info!(request_id = %request.request_id, "override request updated");
                Ok(Upsert::Updated)
            }
            None => {
                table.rows.push(row);
                self.store.save(&table)?;
                tracing::info!(request_id = %request.request_id, "override request queued");
                Ok(Upsert::Inserted)
            }
        }
    }

    pub fn remove(&self, request_id: &str) -> Result<bool> {
        self.store.remove(KEY, request_id)
    }

    pub fn mark_error(&self, request_id: &str, error: &str) -> Result<bool> {
        self.update_row(request_id, |row, now| {
            row.insert("status".into(), RequestStatus::Error.to_string());
            row.insert("last_error".into(), truncate_error(error));
            row.insert("updated_at".into(), now.to_string());
            if field(row, "created_at").is_empty() {
                row.insert("created_at".into(), now.to_string());
            }
        })
    }

    /// Put an ERROR or HOLD row back to READY and clear its error.
    pub fn reset(&self, request_id: &str) -> Result<()> {
        let found = self.update_row(request_id, |row, now| {
            row.insert("status".into(), RequestStatus::Ready.to_string());
            row.insert("last_error".into(), String::new());
            row.insert("updated_at".into(), now.to_string());
        })?;
        if !found {
            return Err(CustodianError::RequestNotFound(request_id.to_string()));
        }
        Ok(())
    }

    fn update_row<F>(&self, request_id: &str, mutate: F) -> Result<bool>
    where
        F: FnOnce(&mut Row, &str),
    {
        let mut table = self.store.load()?;
        let Some(index) = table.position(KEY, request_id) else {
            return Ok(false);
        };
        mutate(&mut table.rows[index], &now_iso());
        self.store.save(&table)?;
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
