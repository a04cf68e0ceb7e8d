use super::{Queue, Row, Table};
use crate::error::Result;
use crate::io::atomic_write_with;
use std::path::{Path, PathBuf};

/// CSV file with a fixed leading header set.
///
/// Reads tolerate missing and unknown columns; writes always emit the base
/// columns first, followed by any extra columns the file already carried.
#[derive(Debug, Clone)]
pub struct CsvStore {
    path: PathBuf,
    base_columns: &'static [&'static str],
}

impl CsvStore {
    pub fn new(path: impl Into<PathBuf>, base_columns: &'static [&'static str]) -> Self {
        Self {
            path: path.into(),
            base_columns,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn resolved_headers<'a>(&self, existing: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        let mut headers: Vec<String> = Vec::new();
        for header in self.base_columns.iter().copied().chain(existing) {
            let header = header.trim();
            if !header.is_empty() && !headers.iter().any(|h| h == header) {
                headers.push(header.to_string());
            }
        }
        headers
    }
}

impl Queue for CsvStore {
    fn ensure(&self) -> Result<()> {
        if self.path.exists() {
            return Ok(());
        }
        self.save(&Table {
            headers: self.resolved_headers(std::iter::empty()),
            rows: Vec::new(),
        })
    }

    fn load(&self) -> Result<Table> {
        if !self.path.exists() {
            return Ok(Table {
                headers: self.resolved_headers(std::iter::empty()),
                rows: Vec::new(),
            });
        }
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(&self.path)?;
        let file_headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        let headers = self.resolved_headers(file_headers.iter().map(String::as_str));

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            let mut row = Row::new();
            for (name, value) in file_headers.iter().zip(record.iter()) {
                let name = name.trim();
                if !name.is_empty() {
                    row.insert(name.to_string(), value.trim().to_string());
                }
            }
            for header in &headers {
                row.entry(header.clone()).or_default();
            }
            rows.push(row);
        }
        Ok(Table { headers, rows })
    }

    fn save(&self, table: &Table) -> Result<()> {
        let headers = self.resolved_headers(table.headers.iter().map(String::as_str));
        atomic_write_with(&self.path, |w| {
            let mut writer = csv::Writer::from_writer(w);
            writer.write_record(&headers)?;
            for row in &table.rows {
                writer.write_record(
                    headers
                        .iter()
                        .map(|h| row.get(h).map(String::as_str).unwrap_or("")),
                )?;
            }
            writer.flush()?;
            Ok(())
        })
    }
}
