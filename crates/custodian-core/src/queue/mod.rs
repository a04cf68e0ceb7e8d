//! Durable operator queues.
//!
//! Both queues are read-modify-write over a row store: read every row,
//! mutate in memory, write the whole file to a temp sibling and rename. A
//! crash at any point leaves either the old file or the new one.

pub mod overrides;
pub mod pending;
pub mod store;

pub use overrides::{ManualOverrideRequest, OverrideQueue, ReadyRequests};
pub use pending::{PendingAction, PendingQueue, Staged};
pub use store::CsvStore;

use crate::error::Result;
use chrono::{SecondsFormat, Utc};
use std::collections::HashMap;

/// Maximum stored length of a `last_error` value.
pub const MAX_ERROR_LEN: usize = 500;

pub type Row = HashMap<String, String>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Row>,
}

impl Table {
    pub fn position(&self, key_column: &str, key: &str) -> Option<usize> {
        self.rows
            .iter()
            .position(|row| field(row, key_column) == key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Upsert {
    Inserted,
    Updated,
}

/// Row-level storage behind the typed queues. Swapping CSV for another
/// single-writer store means implementing `ensure`, `load` and `save`.
pub trait Queue {
    fn ensure(&self) -> Result<()>;

    fn load(&self) -> Result<Table>;

    fn save(&self, table: &Table) -> Result<()>;

    fn upsert(&self, key_column: &str, row: Row) -> Result<Upsert> {
        let mut table = self.load()?;
        let key = field(&row, key_column).to_string();
        let outcome = match table.position(key_column, &key) {
            Some(index) => {
                table.rows[index] = row;
                Upsert::Updated
            }
            None => {
                table.rows.push(row);
                Upsert::Inserted
            }
        };
        self.save(&table)?;
        Ok(outcome)
    }

    fn remove(&self, key_column: &str, key: &str) -> Result<bool> {
        let mut table = self.load()?;
        let before = table.rows.len();
        table.rows.retain(|row| field(row, key_column) != key);
        if table.rows.len() == before {
            return Ok(false);
        }
        self.save(&table)?;
        Ok(true)
    }
}

pub fn field<'a>(row: &'a Row, column: &str) -> &'a str {
    row.get(column).map(String::as_str).unwrap_or("").trim()
}

pub(crate) fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub(crate) fn truncate_error(text: &str) -> String {
    text.chars().take(MAX_ERROR_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_error_counts_chars() {
        let long = "é".repeat(600);
        assert_eq!(truncate_error(&long).chars().count(), MAX_ERROR_LEN);
        assert_eq!(truncate_error("short"), "short");
    }

    #[test]
    fn now_iso_is_utc_seconds() {
        let ts = now_iso();
        assert!(ts.ends_with('Z'));
        assert_eq!(ts.len(), "2026-01-01T00:00:00Z".len());
    }
}
