//! Save groups: channels persisted together as one CSV row.
//!
//! Each call to [`SaveGroup::save_data`] writes the same row to up to three
//! destinations with independent failure domains:
//!
//! 1. the primary log `{log_dir}/{name} {date}.csv`, falling back to
//!    `{error_dir}/Error - {name} {date}.csv` when the primary cannot be written;
//! 2. the backup log `{backup_dir}/{name} {date}.csv`, whose failures are logged
//!    and never escalated.
//!
//! The goal is to keep every row that can still be written somewhere, not
//! all-or-nothing delivery.

use crate::data::storage::append_row;
use crate::error::{AppResult, DaqError};
use crate::instrument::Channel;
use chrono::format::{Item, StrftimeItems};
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::HashSet;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

/// Decimal places written for every channel value.
pub const VALUE_PRECISION: usize = 6;

/// Where the primary copy of a row ended up.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PrimaryOutcome {
    /// Written to the primary log.
    Logged(PathBuf),
    /// Primary failed; written to the error log instead.
    ErrorLogged(PathBuf),
    /// Neither primary nor error log could be written.
    Dropped,
}

/// Result of one [`SaveGroup::save_data`] call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SaveReport {
    /// Fate of the primary copy.
    pub primary: PrimaryOutcome,
    /// Whether the backup copy was written.
    pub backup_written: bool,
}

/// Returns true if `format` is a usable chrono strftime string.
pub fn is_valid_format(format: &str) -> bool {
    !format.is_empty() && !StrftimeItems::new(format).any(|item| matches!(item, Item::Error))
}

fn format_timestamp(timestamp: &NaiveDateTime, format: &str) -> AppResult<String> {
    let mut out = String::new();
    write!(out, "{}", timestamp.format(format))
        .map_err(|_| DaqError::Configuration(format!("Invalid timestamp format '{}'", format)))?;
    Ok(out)
}

/// A named bundle of channels written as one CSV row per cycle.
#[derive(Debug)]
pub struct SaveGroup {
    name: String,
    channels: Vec<Channel>,
    log_dir: PathBuf,
    backup_dir: PathBuf,
    error_dir: PathBuf,
    date_format: String,
    time_format: String,
}

/// Builder for [`SaveGroup`].
#[derive(Debug)]
pub struct SaveGroupBuilder {
    name: String,
    channels: Vec<Channel>,
    log_dir: PathBuf,
    backup_dir: PathBuf,
    error_dir: PathBuf,
    date_format: String,
    time_format: String,
}

impl SaveGroupBuilder {
    /// Member channels, in column order.
    pub fn channels(mut self, channels: Vec<Channel>) -> Self {
        self.channels = channels;
        self
    }

    /// Adds one channel after the existing ones.
    pub fn channel(mut self, channel: Channel) -> Self {
        self.channels.push(channel);
        self
    }

    /// Directory of the primary log.
    pub fn log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = dir.into();
        self
    }

    /// Directory of the backup log.
    pub fn backup_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.backup_dir = dir.into();
        self
    }

    /// Directory of the error log.
    pub fn error_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.error_dir = dir.into();
        self
    }

    /// chrono format of the `date` column and file names.
    pub fn date_format(mut self, format: impl Into<String>) -> Self {
        self.date_format = format.into();
        self
    }

    /// chrono format of the `time` column.
    pub fn time_format(mut self, format: impl Into<String>) -> Self {
        self.time_format = format.into();
        self
    }

    /// Validates and builds the group.
    pub fn build(self) -> AppResult<SaveGroup> {
        if self.name.trim().is_empty() {
            return Err(DaqError::Configuration(
                "Save group name must not be empty".to_string(),
            ));
        }
        if self.channels.is_empty() {
            return Err(DaqError::Configuration(format!(
                "Save group '{}' has no channels",
                self.name
            )));
        }
        let mut seen = HashSet::new();
        for channel in &self.channels {
            if matches!(channel.name(), "date" | "time") || !seen.insert(channel.name()) {
                return Err(DaqError::Configuration(format!(
                    "Channel name '{}' is not unique in save group '{}'",
                    channel.name(),
                    self.name
                )));
            }
        }
        for format in [&self.date_format, &self.time_format] {
            if !is_valid_format(format) {
                return Err(DaqError::Configuration(format!(
                    "Invalid timestamp format '{}' for save group '{}'",
                    format, self.name
                )));
            }
        }

        Ok(SaveGroup {
            name: self.name,
            channels: self.channels,
            log_dir: self.log_dir,
            backup_dir: self.backup_dir,
            error_dir: self.error_dir,
            date_format: self.date_format,
            time_format: self.time_format,
        })
    }
}

impl SaveGroup {
    /// Starts a builder with the default `%Y-%m-%d` / `%H:%M:%S` formats.
    pub fn builder(name: impl Into<String>) -> SaveGroupBuilder {
        SaveGroupBuilder {
            name: name.into(),
            channels: Vec::new(),
            log_dir: PathBuf::new(),
            backup_dir: PathBuf::new(),
            error_dir: PathBuf::new(),
            date_format: "%Y-%m-%d".to_string(),
            time_format: "%H:%M:%S".to_string(),
        }
    }

    /// Group name; prefix of every file this group writes.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Member channels in column order.
    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    /// Mutable access for the controller's configure and update passes.
    pub fn channels_mut(&mut self) -> &mut [Channel] {
        &mut self.channels
    }

    /// Primary log directory.
    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Backup log directory.
    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Error log directory.
    pub fn error_dir(&self) -> &Path {
        &self.error_dir
    }

    /// chrono format of the `date` column.
    pub fn date_format(&self) -> &str {
        &self.date_format
    }

    /// chrono format of the `time` column.
    pub fn time_format(&self) -> &str {
        &self.time_format
    }

    /// `date`, `time`, then channel names.
    pub fn field_names(&self) -> Vec<String> {
        let mut fields = vec!["date".to_string(), "time".to_string()];
        fields.extend(self.channels.iter().map(|c| c.name().to_string()));
        fields
    }

    /// `{name} {date}.csv` for a formatted date.
    pub fn file_name(&self, date: &str) -> String {
        format!("{} {}.csv", self.name, date)
    }

    /// Primary log file for `date`.
    pub fn log_path(&self, date: NaiveDate) -> AppResult<PathBuf> {
        let date = format_timestamp(&date.and_time(chrono::NaiveTime::MIN), &self.date_format)?;
        Ok(self.log_dir.join(self.file_name(&date)))
    }

    /// Persists the channels' current values stamped with `timestamp`.
    ///
    /// I/O failures never escape: the primary falls back to the error log and
    /// the backup is best-effort. A [`DaqError::HeaderMismatch`] on the primary
    /// log is returned after the backup attempt, since writing that row would
    /// corrupt the file's meaning.
    pub fn save_data(&self, timestamp: NaiveDateTime) -> AppResult<SaveReport> {
        let date = format_timestamp(&timestamp, &self.date_format)?;
        let time = format_timestamp(&timestamp, &self.time_format)?;

        let fields = self.field_names();
        let mut values = vec![date.clone(), time];
        values.extend(
            self.channels
                .iter()
                .map(|c| format!("{:.*}", VALUE_PRECISION, c.current_value())),
        );

        let file_name = self.file_name(&date);
        let log_path = self.log_dir.join(&file_name);

        let mut mismatch = None;
        let primary = match append_row(&log_path, &fields, &values) {
            Ok(_) => {
                debug!("[{}] wrote {:?} to {}", self.name, values, log_path.display());
                PrimaryOutcome::Logged(log_path)
            }
            Err(e @ DaqError::HeaderMismatch { .. }) => {
                error!("[{}] {}", self.name, e);
                mismatch = Some(e);
                PrimaryOutcome::Dropped
            }
            Err(e) => {
                warn!(
                    "[{}] Failed to write data to log file {}: {}",
                    self.name,
                    log_path.display(),
                    e
                );
                let error_path = self.error_dir.join(format!("Error - {}", file_name));
                match append_row(&error_path, &fields, &values) {
                    Ok(_) => PrimaryOutcome::ErrorLogged(error_path),
                    Err(e) => {
                        error!(
                            "[{}] Failed to write data to error log {}: {}",
                            self.name,
                            error_path.display(),
                            e
                        );
                        PrimaryOutcome::Dropped
                    }
                }
            }
        };

        let backup_path = self.backup_dir.join(&file_name);
        let backup_written = match append_row(&backup_path, &fields, &values) {
            Ok(_) => true,
            Err(e) => {
                error!(
                    "[{}] Failed to write to backup log {}: {}",
                    self.name,
                    backup_path.display(),
                    e
                );
                false
            }
        };

        match mismatch {
            Some(e) => Err(e),
            None => Ok(SaveReport {
                primary,
                backup_written,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::Conversion;
    use std::fs;
    use tempfile::{tempdir, TempDir};

    fn stamp() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(14, 30, 5)
            .unwrap()
    }

    fn group(root: &TempDir, names: &[&str]) -> SaveGroup {
        let mut builder = SaveGroup::builder("G")
            .log_dir(root.path().join("log"))
            .backup_dir(root.path().join("backup"))
            .error_dir(root.path().join("error"));
        for (i, name) in names.iter().enumerate() {
            builder = builder.channel(Channel::new(*name, 101 + i as u32));
        }
        builder.build().unwrap()
    }

    #[test]
    fn test_builder_rejects_duplicate_names() {
        let result = SaveGroup::builder("G")
            .channel(Channel::new("A", 101))
            .channel(Channel::new("A", 102))
            .build();
        assert!(matches!(result, Err(DaqError::Configuration(_))));
    }

    #[test]
    fn test_builder_rejects_bad_format() {
        let result = SaveGroup::builder("G")
            .channel(Channel::new("A", 101))
            .date_format("%Y-%")
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_save_writes_primary_and_backup() {
        let root = tempdir().unwrap();
        let mut g = group(&root, &["A", "B"]);
        g.channels_mut()[0].set_current_value(23.451);
        g.channels_mut()[1].set_current_value(-0.0023);

        let report = g.save_data(stamp()).unwrap();
        let expected = root.path().join("log").join("G 2024-01-15.csv");
        assert_eq!(report.primary, PrimaryOutcome::Logged(expected.clone()));
        assert!(report.backup_written);

        let contents = fs::read_to_string(expected).unwrap();
        assert_eq!(contents, "date,time,A,B\n2024-01-15,14:30:05,23.451000,-0.002300\n");
        let backup = fs::read_to_string(root.path().join("backup").join("G 2024-01-15.csv")).unwrap();
        assert_eq!(backup, contents);
    }

    #[test]
    fn test_primary_failure_falls_back_to_error_log() {
        let root = tempdir().unwrap();
        // A regular file where the log drive should be: unwritable for everyone
        let blocker = root.path().join("offline-drive");
        fs::write(&blocker, "").unwrap();
        let g = SaveGroup::builder("G")
            .channel(Channel::new("A", 101).with_conversion(Conversion::Identity))
            .log_dir(blocker.join("G"))
            .backup_dir(root.path().join("backup"))
            .error_dir(root.path().join("error"))
            .build()
            .unwrap();

        let report = g.save_data(stamp()).unwrap();
        let error_path = root.path().join("error").join("Error - G 2024-01-15.csv");
        assert_eq!(report.primary, PrimaryOutcome::ErrorLogged(error_path.clone()));
        assert!(report.backup_written);
        assert!(fs::read_to_string(error_path).unwrap().contains("14:30:05,0.000000"));
    }

    #[test]
    fn test_all_destinations_down_is_not_an_error() {
        let root = tempdir().unwrap();
        let blocker = root.path().join("blocker");
        fs::write(&blocker, "").unwrap();
        let g = SaveGroup::builder("G")
            .channel(Channel::new("A", 101))
            .log_dir(blocker.join("log"))
            .backup_dir(blocker.join("backup"))
            .error_dir(blocker.join("error"))
            .build()
            .unwrap();

        let report = g.save_data(stamp()).unwrap();
        assert_eq!(report.primary, PrimaryOutcome::Dropped);
        assert!(!report.backup_written);
    }

    #[test]
    fn test_header_mismatch_is_raised() {
        let root = tempdir().unwrap();
        let log_dir = root.path().join("log");
        fs::create_dir(&log_dir).unwrap();
        let path = log_dir.join("G 2024-01-15.csv");
        fs::write(&path, "date,time,A,B\n").unwrap();

        let g = group(&root, &["A", "C"]);
        let result = g.save_data(stamp());
        assert!(matches!(result, Err(DaqError::HeaderMismatch { .. })));
        assert_eq!(fs::read_to_string(&path).unwrap(), "date,time,A,B\n");
        // The mismatch is not an I/O failure, so nothing goes to the error log
        assert!(!root.path().join("error").exists());
    }

    #[test]
    fn test_log_path() {
        let root = tempdir().unwrap();
        let g = group(&root, &["A"]);
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(
            g.log_path(date).unwrap(),
            root.path().join("log").join("G 2024-03-09.csv")
        );
    }
}
