//! Configuration loading using Figment
//!
//! Settings are loaded from:
//! 1. a TOML file (base configuration, `config/default.toml` by default)
//! 2. environment variables prefixed with `KLOG_` (nested keys split on `__`)
//!
//! # Environment Variable Overrides
//!
//! ```text
//! KLOG_APPLICATION__LOG_LEVEL=debug
//! KLOG_INSTRUMENT__PORT=/dev/ttyUSB0
//! KLOG_STORAGE__LOG_DIR=/mnt/dataraid/KeithleyLogger
//! ```
//!
//! The settings only describe the setup; [`Settings::build_save_groups`] is
//! the one place that turns them into [`SaveGroup`]s and [`Channel`]s.

use crate::data::save_group::is_valid_format;
use crate::data::SaveGroup;
use crate::error::{AppResult, DaqError};
use crate::instrument::{Channel, Conversion, SenseFunction};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Top-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationSettings,
    /// Serial link to the multimeter
    #[serde(default)]
    pub instrument: InstrumentSettings,
    /// Acquisition cadence
    #[serde(default)]
    pub acquisition: AcquisitionSettings,
    /// Log destinations and file naming
    pub storage: StorageSettings,
    /// Channels grouped by output file
    #[serde(default)]
    pub groups: Vec<GroupSettings>,
}

/// Application-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApplicationSettings {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

/// Serial link settings
#[derive(Debug, Clone, Deserialize)]
pub struct InstrumentSettings {
    /// Serial port (e.g., "COM6", "/dev/ttyUSB0")
    #[serde(default = "default_port")]
    pub port: String,
    /// Baud rate
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Response timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Appended to every command
    #[serde(default = "default_command_terminator")]
    pub command_terminator: String,
    /// Ends every response; only the first byte is used
    #[serde(default = "default_response_terminator")]
    pub response_terminator: String,
    /// Pause between preamble commands in milliseconds
    #[serde(default = "default_inter_command_delay_ms")]
    pub inter_command_delay_ms: u64,
}

impl Default for InstrumentSettings {
    fn default() -> Self {
        Self {
            port: default_port(),
            baud_rate: default_baud_rate(),
            timeout_ms: default_timeout_ms(),
            command_terminator: default_command_terminator(),
            response_terminator: default_response_terminator(),
            inter_command_delay_ms: default_inter_command_delay_ms(),
        }
    }
}

impl InstrumentSettings {
    /// The response terminator as a single byte.
    pub fn response_terminator_byte(&self) -> u8 {
        self.response_terminator.bytes().next().unwrap_or(b'\r')
    }

    /// Pause between preamble commands.
    pub fn inter_command_delay(&self) -> Duration {
        Duration::from_millis(self.inter_command_delay_ms)
    }
}

/// Acquisition cadence
#[derive(Debug, Clone, Deserialize)]
pub struct AcquisitionSettings {
    /// Minimum seconds between acquisition cycles
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
        }
    }
}

impl AcquisitionSettings {
    /// Minimum time between acquisition cycles.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Log destinations and file naming
#[derive(Debug, Clone, Deserialize)]
pub struct StorageSettings {
    /// Primary log root; each group writes to a subdirectory named after it
    pub log_dir: PathBuf,
    /// Backup log root; each group writes to a subdirectory named after it
    pub backup_dir: PathBuf,
    /// Shared directory for rows the primary destination refused
    pub error_dir: PathBuf,
    /// chrono format for the `date` column and file names
    #[serde(default = "default_date_format")]
    pub date_format: String,
    /// chrono format for the `time` column
    #[serde(default = "default_time_format")]
    pub time_format: String,
}

/// One save group
#[derive(Debug, Clone, Deserialize)]
pub struct GroupSettings {
    /// File name prefix and subdirectory name
    pub name: String,
    /// Member channels in column order
    pub channels: Vec<ChannelSettings>,
}

/// One channel
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelSettings {
    /// Column header
    pub name: String,
    /// Multimeter port address
    pub hard_port: u32,
    /// Port setup
    #[serde(default)]
    pub function: SenseFunction,
    /// Raw to physical conversion
    #[serde(default)]
    pub conversion: Conversion,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_port() -> String {
    "COM6".to_string()
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_timeout_ms() -> u64 {
    15_000
}

fn default_command_terminator() -> String {
    "\n".to_string()
}

fn default_response_terminator() -> String {
    "\r".to_string()
}

fn default_inter_command_delay_ms() -> u64 {
    250
}

fn default_interval_secs() -> u64 {
    30
}

fn default_date_format() -> String {
    "%Y-%m-%d".to_string()
}

fn default_time_format() -> String {
    "%H:%M:%S".to_string()
}

impl Settings {
    /// Load settings from `path` and `KLOG_` environment variables
    ///
    /// Environment variables take precedence over the file. The result is
    /// validated before it is returned.
    ///
    /// # Errors
    ///
    /// Returns [`DaqError::Config`] if the sources cannot be parsed and
    /// [`DaqError::Configuration`] if validation fails.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let settings: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("KLOG_").split("__"))
            .extract()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from a TOML string (no environment overrides).
    pub fn from_toml_str(toml: &str) -> AppResult<Self> {
        let settings: Self = Figment::new().merge(Toml::string(toml)).extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Log level is valid (trace, debug, info, warn, error)
    /// - The acquisition interval is non-zero
    /// - Date and time formats are valid strftime strings
    /// - Group names are unique and every group has channels
    /// - Channel names are unique within a group
    /// - No port is scanned twice
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.acquisition.interval_secs == 0 {
            return Err(DaqError::Configuration(
                "acquisition.interval_secs must be greater than 0".to_string(),
            ));
        }

        for format in [&self.storage.date_format, &self.storage.time_format] {
            if !is_valid_format(format) {
                return Err(DaqError::Configuration(format!(
                    "Invalid timestamp format '{}' in [storage]",
                    format
                )));
            }
        }

        let mut group_names = HashSet::new();
        let mut ports = HashSet::new();
        for group in &self.groups {
            if !group_names.insert(group.name.as_str()) {
                return Err(DaqError::Configuration(format!(
                    "Duplicate group name: '{}'",
                    group.name
                )));
            }
            if group.channels.is_empty() {
                return Err(DaqError::Configuration(format!(
                    "Group '{}' has no channels",
                    group.name
                )));
            }

            let mut channel_names = HashSet::new();
            for channel in &group.channels {
                if matches!(channel.name.as_str(), "date" | "time") {
                    return Err(DaqError::Configuration(format!(
                        "Channel name '{}' in group '{}' collides with a timestamp column",
                        channel.name, group.name
                    )));
                }
                if !channel_names.insert(channel.name.as_str()) {
                    return Err(DaqError::Configuration(format!(
                        "Duplicate channel name '{}' in group '{}'",
                        channel.name, group.name
                    )));
                }
                if !ports.insert(channel.hard_port) {
                    return Err(DaqError::Configuration(format!(
                        "Port {} is assigned to more than one channel",
                        channel.hard_port
                    )));
                }
            }
        }

        Ok(())
    }

    /// Builds the configured save groups with their channels.
    ///
    /// Each group logs to `{log_dir}/{name}` and backs up to
    /// `{backup_dir}/{name}`; all groups share `error_dir`.
    pub fn build_save_groups(&self) -> AppResult<Vec<SaveGroup>> {
        self.groups
            .iter()
            .map(|group| {
                let channels = group
                    .channels
                    .iter()
                    .map(|c| {
                        Channel::with_function(c.name.clone(), c.hard_port, &c.function)
                            .with_conversion(c.conversion.clone())
                    })
                    .collect();
                SaveGroup::builder(group.name.clone())
                    .channels(channels)
                    .log_dir(self.storage.log_dir.join(&group.name))
                    .backup_dir(self.storage.backup_dir.join(&group.name))
                    .error_dir(self.storage.error_dir.clone())
                    .date_format(self.storage.date_format.clone())
                    .time_format(self.storage.time_format.clone())
                    .build()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[application]
log_level = "debug"

[instrument]
port = "/dev/ttyUSB0"

[acquisition]
interval_secs = 10

[storage]
log_dir = "/data/log"
backup_dir = "/data/backup"
error_dir = "/data/error"

[[groups]]
name = "MagField"
[[groups.channels]]
name = "Mag X"
hard_port = 101
conversion = { type = "linear", gain = 100.0 }
[[groups.channels]]
name = "Mag Y"
hard_port = 102
conversion = { type = "linear", gain = 100.0 }

[[groups]]
name = "Bake"
[[groups.channels]]
name = "sci gate"
hard_port = 115
function = { type = "thermocouple", tc_type = "K" }
"#;

    #[test]
    fn test_parse_sample_settings() {
        let settings = Settings::from_toml_str(SAMPLE).unwrap();
        assert_eq!(settings.application.log_level, "debug");
        assert_eq!(settings.instrument.port, "/dev/ttyUSB0");
        assert_eq!(settings.instrument.baud_rate, 9600);
        assert_eq!(settings.instrument.response_terminator_byte(), b'\r');
        assert_eq!(settings.acquisition.interval(), Duration::from_secs(10));
        assert_eq!(settings.storage.date_format, "%Y-%m-%d");
        assert_eq!(settings.groups.len(), 2);
    }

    #[test]
    fn test_build_save_groups() {
        let settings = Settings::from_toml_str(SAMPLE).unwrap();
        let groups = settings.build_save_groups().unwrap();
        assert_eq!(groups[0].name(), "MagField");
        assert_eq!(groups[0].log_dir(), Path::new("/data/log/MagField"));
        assert_eq!(groups[0].backup_dir(), Path::new("/data/backup/MagField"));
        assert_eq!(groups[0].error_dir(), Path::new("/data/error"));
        let mag_x = &groups[0].channels()[0];
        assert!((mag_x.convert(0.01) - 1.0).abs() < 1e-12);
        assert_eq!(groups[1].channels()[0].init_commands().len(), 6);
    }

    #[test]
    fn test_duplicate_channel_name_rejected() {
        let toml = SAMPLE.replace("Mag Y", "Mag X");
        assert!(matches!(
            Settings::from_toml_str(&toml),
            Err(DaqError::Configuration(_))
        ));
    }

    #[test]
    fn test_duplicate_port_rejected() {
        let toml = SAMPLE.replace("hard_port = 115", "hard_port = 101");
        assert!(matches!(
            Settings::from_toml_str(&toml),
            Err(DaqError::Configuration(_))
        ));
    }

    #[test]
    fn test_invalid_log_level_rejected() {
        let toml = SAMPLE.replace("\"debug\"", "\"verbose\"");
        assert!(Settings::from_toml_str(&toml).is_err());
    }

    #[test]
    fn test_missing_storage_is_config_error() {
        let result = Settings::from_toml_str("[application]\nlog_level = \"info\"\n");
        assert!(matches!(result, Err(DaqError::Config(_))));
    }
}
