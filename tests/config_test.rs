//! Tests for loading settings from disk.

use keithley_logger::{config::Settings, DaqError};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tempfile::tempdir;

#[test]
fn test_shipped_default_config_loads() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/default.toml");
    let settings = Settings::load_from(&path).expect("default config should be valid");

    assert_eq!(settings.acquisition.interval(), Duration::from_secs(30));
    let names: Vec<&str> = settings.groups.iter().map(|g| g.name.as_str()).collect();
    assert_eq!(names, vec!["MagField", "IonPump", "IonGauge"]);

    let groups = settings.build_save_groups().unwrap();
    let gauge = &groups[2].channels()[0];
    assert_eq!(gauge.hard_port(), 106);
    assert!((gauge.convert(5.5) - 1.0).abs() < 1e-12);
}

#[test]
fn test_load_from_file_applies_defaults() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("logger.toml");
    fs::write(
        &path,
        r#"
[storage]
log_dir = "/tmp/log"
backup_dir = "/tmp/backup"
error_dir = "/tmp/error"

[[groups]]
name = "LabTemp"
[[groups.channels]]
name = "Temp_exp_cloud"
hard_port = 108
function = { type = "rtd" }
"#,
    )
    .unwrap();

    let settings = Settings::load_from(&path).unwrap();
    assert_eq!(settings.instrument.baud_rate, 9600);
    assert_eq!(settings.storage.time_format, "%H:%M:%S");
    let groups = settings.build_save_groups().unwrap();
    assert_eq!(
        groups[0].channels()[0].init_commands()[0],
        "SENS:FUNC 'TEMP',(@108)"
    );
}

#[test]
fn test_reserved_channel_name_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("logger.toml");
    fs::write(
        &path,
        r#"
[storage]
log_dir = "/tmp/log"
backup_dir = "/tmp/backup"
error_dir = "/tmp/error"

[[groups]]
name = "Bad"
[[groups.channels]]
name = "time"
hard_port = 101
"#,
    )
    .unwrap();

    assert!(matches!(
        Settings::load_from(&path),
        Err(DaqError::Configuration(_))
    ));
}
