//! Corruption recovery tests for hdsched.
//!
//! These tests verify the system can handle:
//! - Corrupted session files (refused, never overwritten)
//! - Corrupted activity log lines
//! - Missing or empty data files
//! - Leftover lock files

mod common;

use common::{Clinic, TODAY};
use predicates::prelude::*;
use std::fs;
use std::io::Write as IoWrite;

#[test]
fn test_corrupted_session_file_is_refused_and_kept() {
    let clinic = Clinic::new(4);
    let sessions_path = clinic.data_dir().join("sessions.json");
    fs::write(&sessions_path, "{ invalid json }}}}").expect("Failed to write corrupted sessions");

    clinic
        .cli()
        .args(["book", "--patient", "P1", "--date", TODAY])
        .assert()
        .failure()
        .stderr(predicate::str::contains("JSON error"));

    // The corrupted file must be left for an operator to repair
    let contents = fs::read_to_string(&sessions_path).unwrap();
    assert_eq!(contents, "{ invalid json }}}}");
}

#[test]
fn test_reads_fail_on_corrupted_session_file() {
    let clinic = Clinic::new(4);
    fs::write(clinic.data_dir().join("sessions.json"), "[1, 2, 3]").unwrap();

    clinic
        .cli()
        .args(["list", "--date", TODAY])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error:"));
}

#[test]
fn test_empty_session_file_is_an_empty_book() {
    let clinic = Clinic::new(4);
    fs::write(clinic.data_dir().join("sessions.json"), "").unwrap();

    let list = clinic.json(&["list", "--date", TODAY]);
    assert!(list.as_array().unwrap().is_empty());

    clinic.book("P1", TODAY);
    let list = clinic.json(&["list", "--date", TODAY]);
    assert_eq!(list.as_array().unwrap().len(), 1);
}

#[test]
fn test_corrupted_activity_lines_do_not_block_bookings() {
    let clinic = Clinic::new(4);
    let log_path = clinic.data_dir().join("activity.log");
    {
        let mut file = fs::File::create(&log_path).unwrap();
        writeln!(file, "{{ not an event").unwrap();
        write!(file, "{{\"partial\": ").unwrap();
    }

    let id = clinic.book("P1", TODAY);

    let log = fs::read_to_string(&log_path).unwrap();
    assert!(log.starts_with("{ not an event"));
    assert!(log.contains(&id));
}

#[test]
fn test_missing_patient_file_reports_unknown_patient() {
    let clinic = Clinic::new(4);
    fs::remove_file(clinic.data_dir().join("patients.json")).unwrap();

    clinic
        .cli()
        .args(["book", "--patient", "P1", "--date", TODAY])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Not found: patient P1"));
}

#[test]
fn test_corrupted_patient_file() {
    let clinic = Clinic::new(4);
    fs::write(clinic.data_dir().join("patients.json"), "not json").unwrap();

    clinic
        .cli()
        .args(["book", "--patient", "P1", "--date", TODAY])
        .assert()
        .failure()
        .stderr(predicate::str::contains("JSON error"));

    assert!(!clinic.data_dir().join("sessions.json").exists());
}

#[test]
fn test_stale_lock_file_does_not_block() {
    let clinic = Clinic::new(4);
    // A lock file left by a crashed process holds no OS lock
    fs::write(clinic.data_dir().join("sessions.json.lock"), "").unwrap();

    clinic.book("P1", TODAY);
}

#[test]
fn test_missing_data_dir_is_created() {
    let clinic = Clinic::new(4);
    let patients = fs::read(clinic.data_dir().join("patients.json")).unwrap();
    fs::remove_dir_all(clinic.data_dir()).unwrap();

    clinic.cli().args(["list", "--date", TODAY]).assert().success();

    fs::create_dir_all(clinic.data_dir()).unwrap();
    fs::write(clinic.data_dir().join("patients.json"), patients).unwrap();
    clinic.book("P2", "2025-01-07");
}
