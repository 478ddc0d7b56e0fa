//! In-memory, time-indexed view of a save group's history.

use crate::error::AppResult;
use chrono::{NaiveDate, NaiveDateTime};
use std::io::Write;
use tracing::warn;

/// One logged acquisition: timestamp plus values in column order.
#[derive(Clone, Debug, PartialEq)]
pub struct Row {
    /// Combined `date` + `time` columns.
    pub timestamp: NaiveDateTime,
    /// One value per data column; `NaN` where a file lacked the column.
    pub values: Vec<f64>,
}

/// Rows of one save group, indexed by timestamp.
///
/// Columns are the channel names (the `date`/`time` columns are folded into
/// [`Row::timestamp`]). Rows keep the order they were read in, which is file
/// order, which is acquisition order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DataTable {
    columns: Vec<String>,
    rows: Vec<Row>,
}

impl DataTable {
    /// An empty table with the given data columns.
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Data column names.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// All rows.
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when there are no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Timestamp/value pairs for one column.
    pub fn column(&self, name: &str) -> Option<Vec<(NaiveDateTime, f64)>> {
        let index = self.columns.iter().position(|c| c == name)?;
        Some(
            self.rows
                .iter()
                .map(|row| (row.timestamp, row.values[index]))
                .collect(),
        )
    }

    /// Earliest and latest timestamps.
    pub fn time_span(&self) -> Option<(NaiveDateTime, NaiveDateTime)> {
        let first = self.rows.iter().map(|r| r.timestamp).min()?;
        let last = self.rows.iter().map(|r| r.timestamp).max()?;
        Some((first, last))
    }

    pub(crate) fn push(&mut self, row: Row) {
        debug_assert_eq!(row.values.len(), self.columns.len());
        self.rows.push(row);
    }

    /// Appends another table's rows, matching columns by name.
    ///
    /// An empty table without columns adopts `other`'s columns. Columns this
    /// table has but `other` lacks are filled with `NaN`; extra columns in
    /// `other` are dropped.
    pub fn append(&mut self, other: DataTable) {
        if self.columns.is_empty() && self.rows.is_empty() {
            *self = other;
            return;
        }
        if other.columns == self.columns {
            self.rows.extend(other.rows);
            return;
        }

        let extra: Vec<&String> = other
            .columns
            .iter()
            .filter(|c| !self.columns.contains(c))
            .collect();
        if !extra.is_empty() {
            warn!("Dropping columns {:?} not present in loaded data", extra);
        }
        let mapping: Vec<Option<usize>> = self
            .columns
            .iter()
            .map(|c| other.columns.iter().position(|o| o == c))
            .collect();
        self.rows.extend(other.rows.into_iter().map(|row| Row {
            timestamp: row.timestamp,
            values: mapping
                .iter()
                .map(|m| m.map_or(f64::NAN, |i| row.values[i]))
                .collect(),
        }));
    }

    /// Drops rows dated before `date`.
    pub fn retain_from(&mut self, date: NaiveDate) {
        self.rows.retain(|row| row.timestamp.date() >= date);
    }

    /// Writes the table back out in the logger's CSV layout.
    pub fn write_csv<W: Write>(&self, out: W, date_format: &str, time_format: &str) -> AppResult<()> {
        let mut writer = csv::Writer::from_writer(out);
        let mut header = vec!["date".to_string(), "time".to_string()];
        header.extend(self.columns.iter().cloned());
        writer.write_record(&header)?;
        for row in &self.rows {
            let mut record = vec![
                row.timestamp.format(date_format).to_string(),
                row.timestamp.format(time_format).to_string(),
            ];
            record.extend(row.values.iter().map(|v| format!("{:.6}", v)));
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }
}
