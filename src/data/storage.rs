//! CSV append primitives shared by every log destination.
//!
//! A row is appended with the header-or-append discipline:
//!
//! - a missing (or empty) file is created and receives the header first;
//! - an existing file must carry the same set of field names, and the row is
//!   written in the file's column order;
//! - any other header is a [`DaqError::HeaderMismatch`] and nothing is written.
//!
//! Each append is encoded in memory and handed to the OS as a single
//! `write_all` on a file opened in append mode, so a reader never observes a
//! row split across two writes from this process.

use crate::error::{AppResult, DaqError};
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;

/// What an append did to the file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The file was new; header and row were written.
    Created,
    /// The row was appended under an existing header.
    Appended,
}

/// Reads the first record of a CSV file.
///
/// Returns `Ok(None)` for a missing or empty file.
pub fn read_header(path: &Path) -> AppResult<Option<Vec<String>>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(DaqError::storage(path, e)),
    };
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(file);
    match reader.records().next() {
        Some(record) => Ok(Some(record?.iter().map(str::to_string).collect())),
        None => Ok(None),
    }
}

/// Appends one row to `path` using the header-or-append discipline.
///
/// `fields` and `values` are parallel: `values[i]` belongs in column
/// `fields[i]`. The parent directory is created if it is missing, but not its
/// ancestors, so an unreachable drive root still fails.
pub fn append_row(path: &Path, fields: &[String], values: &[String]) -> AppResult<AppendOutcome> {
    debug_assert_eq!(fields.len(), values.len());

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.is_dir() {
            fs::create_dir(parent).map_err(|e| DaqError::storage(parent, e))?;
        }
    }

    let existing = read_header(path)?;
    let (header, row) = match &existing {
        None => (Some(fields), values.to_vec()),
        Some(found) => (None, order_for_header(path, found, fields, values)?),
    };

    let mut writer = csv::Writer::from_writer(Vec::new());
    if let Some(header) = header {
        writer.write_record(header)?;
    }
    writer.write_record(&row)?;
    let bytes = writer
        .into_inner()
        .map_err(|e| DaqError::storage(path, std::io::Error::other(e.to_string())))?;

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| DaqError::storage(path, e))?;
    file.write_all(&bytes)
        .map_err(|e| DaqError::storage(path, e))?;

    Ok(if existing.is_none() {
        AppendOutcome::Created
    } else {
        AppendOutcome::Appended
    })
}

/// Reorders `values` to match `found`, or reports a mismatch.
fn order_for_header(
    path: &Path,
    found: &[String],
    fields: &[String],
    values: &[String],
) -> AppResult<Vec<String>> {
    let mismatch = || DaqError::HeaderMismatch {
        path: path.to_path_buf(),
        expected: fields.to_vec(),
        found: found.to_vec(),
    };

    if found == fields {
        return Ok(values.to_vec());
    }
    let found_set: HashSet<&str> = found.iter().map(String::as_str).collect();
    let field_set: HashSet<&str> = fields.iter().map(String::as_str).collect();
    if found.len() != fields.len() || found_set != field_set {
        return Err(mismatch());
    }
    found
        .iter()
        .map(|name| {
            fields
                .iter()
                .position(|f| f == name)
                .map(|i| values[i].clone())
                .ok_or_else(mismatch)
        })
        .collect()
}
