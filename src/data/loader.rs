//! Incremental reader for a save group's daily CSV logs.
//!
//! [`Loader::grab_dates`] is a stateless read of a date range.
//! [`Loader::refresh_data`] keeps a buffer plus a [`Watermark`] so that
//! repeated calls only read rows appended since the previous call.
//!
//! Loaders share nothing with the writer. The file for today may be appended
//! to while it is read, so only bytes up to the last newline are parsed; a
//! partially written final line is picked up by the next refresh.

use crate::data::save_group::SaveGroup;
use crate::data::table::{DataTable, Row};
use crate::error::{AppResult, DaqError};
use chrono::{Local, NaiveDate, NaiveDateTime};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, warn};

/// How much of the log history is already in the buffer.
///
/// When `loaded_start_date` is set, every row dated in
/// `[loaded_start_date, loaded_stop_date)` is buffered, and only rows after the
/// first `lines_loaded` data rows of the stop-date file remain unread.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Watermark {
    /// First date held in the buffer.
    pub loaded_start_date: Option<NaiveDate>,
    /// Last date visited by the most recent refresh.
    pub loaded_stop_date: Option<NaiveDate>,
    /// Data rows already consumed from the stop-date file.
    pub lines_loaded: usize,
}

/// Rows read from one file.
struct FileChunk {
    table: DataTable,
    /// Complete data rows consumed past the skipped ones, malformed rows included.
    rows_read: usize,
}

/// Reads one save group's history.
#[derive(Debug)]
pub struct Loader {
    log_dir: PathBuf,
    group_name: String,
    date_format: String,
    time_format: String,
    data: DataTable,
    watermark: Watermark,
}

impl Loader {
    /// A loader for `{log_dir}/{group_name} {date}.csv` with default formats.
    pub fn new(log_dir: impl Into<PathBuf>, group_name: impl Into<String>) -> Self {
        Self {
            log_dir: log_dir.into(),
            group_name: group_name.into(),
            date_format: "%Y-%m-%d".to_string(),
            time_format: "%H:%M:%S".to_string(),
            data: DataTable::default(),
            watermark: Watermark::default(),
        }
    }

    /// A loader reading the primary log of `group`.
    pub fn for_group(group: &SaveGroup) -> Self {
        Self::new(group.log_dir(), group.name())
            .with_formats(group.date_format(), group.time_format())
    }

    /// Overrides the date and time formats.
    pub fn with_formats(mut self, date_format: &str, time_format: &str) -> Self {
        self.date_format = date_format.to_string();
        self.time_format = time_format.to_string();
        self
    }

    /// The buffer as of the last refresh.
    pub fn data(&self) -> &DataTable {
        &self.data
    }

    /// Current watermark.
    pub fn watermark(&self) -> Watermark {
        self.watermark
    }

    /// Log file for `date`.
    pub fn file_path(&self, date: NaiveDate) -> PathBuf {
        self.log_dir.join(format!(
            "{} {}.csv",
            self.group_name,
            date.format(&self.date_format)
        ))
    }

    /// Column header of this group's log files.
    ///
    /// Taken from the first matching file in the log directory, so callers can
    /// discover channel names without configuration. `None` if no file exists.
    pub fn header(&self) -> AppResult<Option<Vec<String>>> {
        let prefix = format!("{} ", self.group_name);
        let entries = match fs::read_dir(&self.log_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(DaqError::storage(&self.log_dir, e)),
        };
        let mut files: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(&prefix) && n.ends_with(".csv"))
            })
            .collect();
        files.sort();
        match files.first() {
            Some(path) => crate::data::storage::read_header(path),
            None => Ok(None),
        }
    }

    /// Reads every row dated in `[start_date, stop_date]`.
    ///
    /// Missing days are logged and skipped. Does not touch the buffer or
    /// watermark.
    pub fn grab_dates(&self, start_date: NaiveDate, stop_date: NaiveDate) -> AppResult<DataTable> {
        debug!(
            "Grabbing data for dates {} through {}",
            start_date, stop_date
        );
        let t0 = Instant::now();
        let mut data = DataTable::default();
        for date in start_date.iter_days().take_while(|d| *d <= stop_date) {
            let path = self.file_path(date);
            match self.read_file(&path, 0)? {
                Some(chunk) => data.append(chunk.table),
                None => warn!("File not found: {}", path.display()),
            }
        }
        debug!("Grabbing took {:.3} s", t0.elapsed().as_secs_f64());
        Ok(data)
    }

    /// Brings the buffer up to date from `start` through now.
    pub fn refresh_data(&mut self, start: NaiveDateTime) -> AppResult<&DataTable> {
        self.refresh_data_until(start, Local::now().date_naive())
    }

    /// Brings the buffer up to date from `start` through `today`.
    ///
    /// - With nothing loaded, or `start` earlier than the buffer, the buffer is
    ///   discarded and rebuilt from `start`.
    /// - A later `start` trims rows dated before it.
    /// - Dates before the previous stop date are already buffered and skipped;
    ///   the previous stop date resumes after `lines_loaded` rows; later dates
    ///   are read from the top.
    ///
    /// If any file cannot be read the error is returned and neither the buffer
    /// nor the watermark moves past the trim step, so the next call re-reads
    /// exactly the rows this one could not commit.
    pub fn refresh_data_until(
        &mut self,
        start: NaiveDateTime,
        today: NaiveDate,
    ) -> AppResult<&DataTable> {
        let start_date = start.date();
        debug!("Refreshing data from {} through {}", start, today);
        let t0 = Instant::now();

        match self.watermark.loaded_start_date {
            Some(loaded_start) if start_date >= loaded_start => {
                if start_date > loaded_start {
                    self.data.retain_from(start_date);
                    self.watermark.loaded_start_date = Some(start_date);
                }
            }
            _ => {
                // Hard reset: nothing loaded yet, or older history requested
                self.data = DataTable::default();
                self.watermark = Watermark::default();
            }
        }

        let walk_start = self.watermark.loaded_start_date.unwrap_or(start_date);
        let mut watermark = self.watermark;
        let mut staged = Vec::new();
        for date in walk_start.iter_days().take_while(|d| *d <= today) {
            if let Some(loaded_stop) = watermark.loaded_stop_date {
                if date < loaded_stop {
                    continue;
                }
                if date > loaded_stop {
                    // New file: read from the top
                    watermark.lines_loaded = 0;
                }
            }

            let path = self.file_path(date);
            match self.read_file(&path, watermark.lines_loaded)? {
                Some(chunk) => {
                    if !chunk.table.is_empty() {
                        staged.push(chunk.table);
                    }
                    if date == today {
                        watermark.lines_loaded += chunk.rows_read;
                    }
                }
                None => warn!("File not found: {}", path.display()),
            }

            watermark.loaded_start_date.get_or_insert(date);
            watermark.loaded_stop_date = Some(date);
        }

        for table in staged {
            self.data.append(table);
        }
        self.watermark = watermark;

        debug!(
            "Refreshing took {:.3} s, {} rows buffered",
            t0.elapsed().as_secs_f64(),
            self.data.len()
        );
        Ok(&self.data)
    }

    /// Reads complete rows of `path` after skipping `skip` data rows.
    ///
    /// `Ok(None)` means the file does not exist.
    fn read_file(&self, path: &Path, skip: usize) -> AppResult<Option<FileChunk>> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(DaqError::storage(path, e)),
        };
        // Ignore a final line the writer has not finished yet
        let complete = bytes
            .iter()
            .rposition(|&b| b == b'\n')
            .map_or(0, |i| i + 1);

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(&bytes[..complete]);
        let header: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        if header.is_empty() {
            return Ok(Some(FileChunk {
                table: DataTable::default(),
                rows_read: 0,
            }));
        }

        let date_col = header.iter().position(|h| h == "date").unwrap_or(0);
        let time_col = header.iter().position(|h| h == "time").unwrap_or(1);
        let data_cols: Vec<usize> = (0..header.len())
            .filter(|&i| i != date_col && i != time_col)
            .collect();
        let columns = data_cols.iter().map(|&i| header[i].clone()).collect();
        let datetime_format = format!("{} {}", self.date_format, self.time_format);

        let mut table = DataTable::new(columns);
        let mut rows_read = 0;
        for (line, record) in reader.records().enumerate().skip(skip) {
            rows_read += 1;
            let record = match record {
                Ok(record) => record,
                Err(e) => {
                    warn!("Skipping unreadable row {} in {}: {}", line + 1, path.display(), e);
                    continue;
                }
            };
            match parse_row(&record, date_col, time_col, &data_cols, &datetime_format) {
                Some(row) => table.push(row),
                None => warn!(
                    "Skipping malformed row {} in {}: {:?}",
                    line + 1,
                    path.display(),
                    record
                ),
            }
        }

        Ok(Some(FileChunk { table, rows_read }))
    }
}

fn parse_row(
    record: &csv::StringRecord,
    date_col: usize,
    time_col: usize,
    data_cols: &[usize],
    datetime_format: &str,
) -> Option<Row> {
    let stamp = format!(
        "{} {}",
        record.get(date_col)?.trim(),
        record.get(time_col)?.trim()
    );
    let timestamp = NaiveDateTime::parse_from_str(&stamp, datetime_format).ok()?;
    let values = data_cols
        .iter()
        .map(|&i| record.get(i)?.trim().parse::<f64>().ok())
        .collect::<Option<Vec<f64>>>()?;
    Some(Row { timestamp, values })
}
