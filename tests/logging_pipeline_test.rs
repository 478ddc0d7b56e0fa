//! End-to-end tests: scripted multimeter -> controller -> CSV files -> loader.

use chrono::{Local, NaiveDateTime};
use keithley_logger::{
    adapters::{MockTransport, SimulatedTransport},
    config::Settings,
    data::{Loader, PrimaryOutcome},
    instrument::Keithley2700,
    AcquisitionController, CycleOutcome,
};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tempfile::{tempdir, TempDir};

/// Settings for the lab's three groups, rooted in `root`.
fn settings(root: &Path) -> Settings {
    let toml = format!(
        r#"
[storage]
log_dir = '{log}'
backup_dir = '{backup}'
error_dir = '{error}'

[[groups]]
name = "MagField"
[[groups.channels]]
name = "Mag X"
hard_port = 101
conversion = {{ type = "linear", gain = 100.0 }}
[[groups.channels]]
name = "Mag Y"
hard_port = 102
conversion = {{ type = "linear", gain = 100.0 }}
[[groups.channels]]
name = "Mag Z"
hard_port = 103
conversion = {{ type = "linear", gain = 100.0 }}

[[groups]]
name = "IonPump"
[[groups.channels]]
name = "IonPump"
hard_port = 104
conversion = {{ type = "linear", gain = 1.0, offset = -10.0 }}
"#,
        log = root.join("log").display(),
        backup = root.join("backup").display(),
        error = root.join("error").display(),
    );
    Settings::from_toml_str(&toml).expect("valid settings")
}

fn mock_controller(root: &TempDir, mock: &MockTransport) -> AcquisitionController {
    let groups = settings(root.path())
        .build_save_groups()
        .expect("groups build");
    let driver =
        Keithley2700::new(Box::new(mock.clone())).with_inter_command_delay(Duration::ZERO);
    AcquisitionController::new(driver, groups)
}

fn now() -> NaiveDateTime {
    Local::now().naive_local()
}

#[tokio::test]
async fn test_cycle_writes_primary_and_backup() {
    let root = tempdir().unwrap();
    fs::create_dir(root.path().join("log")).unwrap();
    fs::create_dir(root.path().join("backup")).unwrap();
    let mock = MockTransport::new();
    let mut controller = mock_controller(&root, &mock);
    controller.initialize().await.unwrap();

    let stamp = now();
    mock.push_response("+1.0000000E-02,+2.0000000E-02,+3.0000000E-02,+2.7500000E+00\r");
    let outcome = controller.run_cycle_at(stamp).await.unwrap();
    assert_eq!(
        outcome,
        CycleOutcome::Saved {
            groups_written: 2,
            failed_groups: vec![]
        }
    );

    let file_name = format!("MagField {}.csv", stamp.format("%Y-%m-%d"));
    let expected = format!(
        "date,time,Mag X,Mag Y,Mag Z\n{},{},1.000000,2.000000,3.000000\n",
        stamp.format("%Y-%m-%d"),
        stamp.format("%H:%M:%S")
    );
    let primary = fs::read_to_string(root.path().join("log/MagField").join(&file_name)).unwrap();
    let backup = fs::read_to_string(root.path().join("backup/MagField").join(&file_name)).unwrap();
    assert_eq!(primary, expected);
    assert_eq!(backup, expected);
    assert!(!root.path().join("error").exists());
}

#[tokio::test]
async fn test_short_sample_list_writes_nothing() {
    let root = tempdir().unwrap();
    fs::create_dir(root.path().join("log")).unwrap();
    fs::create_dir(root.path().join("backup")).unwrap();
    let mock = MockTransport::new();
    let mut controller = mock_controller(&root, &mock);
    controller.initialize().await.unwrap();

    mock.push_response("0.01,0.02,0.03");
    let outcome = controller.run_cycle_at(now()).await.unwrap();

    assert!(matches!(outcome, CycleOutcome::Skipped(_)));
    assert_eq!(fs::read_dir(root.path().join("log")).unwrap().count(), 0);
    assert_eq!(fs::read_dir(root.path().join("backup")).unwrap().count(), 0);
}

#[tokio::test]
async fn test_unreachable_log_drive_falls_back_to_error_log() {
    let root = tempdir().unwrap();
    // A regular file where the log drive should be makes every primary write fail
    fs::write(root.path().join("log"), b"not a directory").unwrap();
    fs::create_dir(root.path().join("backup")).unwrap();
    fs::create_dir(root.path().join("error")).unwrap();

    let stamp = now();
    let mock = MockTransport::new();
    let mut controller = mock_controller(&root, &mock);
    controller.initialize().await.unwrap();
    mock.push_response("0.01,0.02,0.03,2.75");
    controller.run_cycle_at(stamp).await.unwrap();

    let date = stamp.format("%Y-%m-%d");
    let error_log = root
        .path()
        .join("error")
        .join(format!("Error - MagField {}.csv", date));
    let backup = root
        .path()
        .join("backup/MagField")
        .join(format!("MagField {}.csv", date));
    let error_contents = fs::read_to_string(error_log).unwrap();
    assert_eq!(error_contents, fs::read_to_string(backup).unwrap());
    assert!(error_contents.ends_with(",1.000000,2.000000,3.000000\n"));

    let report = controller.groups()[1].save_data(stamp).unwrap();
    assert!(matches!(report.primary, PrimaryOutcome::ErrorLogged(_)));
    assert!(report.backup_written);
}

#[tokio::test]
async fn test_loader_reads_back_what_was_logged() {
    let root = tempdir().unwrap();
    fs::create_dir(root.path().join("log")).unwrap();
    fs::create_dir(root.path().join("backup")).unwrap();
    let mock = MockTransport::new();
    let mut controller = mock_controller(&root, &mock);
    controller.initialize().await.unwrap();

    let start = now();
    let mut loader = Loader::for_group(&controller.groups()[0]);

    mock.push_response("0.01,0.02,0.03,2.75");
    controller.run_cycle_at(start).await.unwrap();
    assert_eq!(loader.refresh_data_until(start, start.date()).unwrap().len(), 1);

    mock.push_response("0.04,0.05,0.06,2.80");
    controller.run_cycle_at(start).await.unwrap();
    let buffered = loader
        .refresh_data_until(start, start.date())
        .unwrap()
        .clone();
    assert_eq!(buffered.len(), 2);
    assert_eq!(loader.watermark().lines_loaded, 2);

    let full = loader.grab_dates(start.date(), start.date()).unwrap();
    assert_eq!(buffered, full);
    assert_eq!(full.columns(), &["Mag X", "Mag Y", "Mag Z"]);
    let mag_z: Vec<f64> = full
        .column("Mag Z")
        .unwrap()
        .into_iter()
        .map(|(_, v)| v)
        .collect();
    assert_eq!(mag_z, vec![3.0, 6.0]);
    assert_eq!(
        loader.header().unwrap().unwrap(),
        vec!["date", "time", "Mag X", "Mag Y", "Mag Z"]
    );
}

#[tokio::test]
async fn test_simulated_multimeter_drives_every_group() {
    let root = tempdir().unwrap();
    fs::create_dir(root.path().join("log")).unwrap();
    fs::create_dir(root.path().join("backup")).unwrap();
    let groups = settings(root.path()).build_save_groups().unwrap();
    let transport = SimulatedTransport::new().with_outlier_probability(0.0);
    let driver = Keithley2700::new(Box::new(transport)).with_inter_command_delay(Duration::ZERO);
    let mut controller = AcquisitionController::new(driver, groups);
    controller.initialize().await.unwrap();

    let outcome = controller.run_cycle_at(now()).await.unwrap();
    assert_eq!(
        outcome,
        CycleOutcome::Saved {
            groups_written: 2,
            failed_groups: vec![]
        }
    );
    // Sine amplitude 1 V plus noise, scaled by 100
    for channel in controller.groups()[0].channels() {
        assert!(channel.current_value().abs() <= 106.0);
    }
    controller.stop().await.unwrap();
    controller.stop().await.unwrap();
}
