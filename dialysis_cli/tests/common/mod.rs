//! Shared fixture for hdsched CLI tests: a throwaway clinic with its own
//! config, prescription file and data directory.

#![allow(dead_code)]

use assert_cmd::Command;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// The date every test treats as today (a Monday)
pub const TODAY: &str = "2025-01-06";

pub struct Clinic {
    dir: TempDir,
}

impl Clinic {
    /// Clinic with `beds` beds in each of its two slots
    pub fn new(beds: u32) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let clinic = Self { dir };

        let config = format!(
            r#"
[scheduling]
default_horizon_days = 14

[equipment]
dialyser_max_reuse = 10
blood_tubing_max_reuse = 5

[[slots]]
id = "morning"
name = "Morning"
start = "07:00:00"
end = "11:00:00"
max_beds = {beds}

[[slots]]
id = "afternoon"
name = "Afternoon"
start = "12:00:00"
end = "16:00:00"
max_beds = {beds}
"#
        );
        fs::write(clinic.config_path(), config).expect("Failed to write config");

        let patients = json!([
            prescription("P1", "MWF", 0),
            prescription("P2", "Tue/Thu/Sat", 0),
            prescription("P3", "every 3 days", 0),
            prescription("P4", "MWF", 12),
        ]);
        fs::create_dir_all(clinic.data_dir()).expect("Failed to create data dir");
        fs::write(
            clinic.data_dir().join("patients.json"),
            serde_json::to_string_pretty(&patients).unwrap(),
        )
        .expect("Failed to write patients");

        clinic
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn data_dir(&self) -> PathBuf {
        self.dir.path().join("data")
    }

    pub fn config_path(&self) -> PathBuf {
        self.dir.path().join("config.toml")
    }

    /// hdsched pointed at this clinic's data directory only
    pub fn bare_cli(&self) -> Command {
        let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("hdsched"));
        cmd.arg("--data-dir")
            .arg(self.data_dir())
            .env("RUST_LOG", "warn");
        cmd
    }

    /// hdsched with this clinic's config and today pinned to `today`
    pub fn cli_at(&self, today: &str) -> Command {
        let mut cmd = self.bare_cli();
        cmd.arg("--config")
            .arg(self.config_path())
            .arg("--today")
            .arg(today);
        cmd
    }

    pub fn cli(&self) -> Command {
        self.cli_at(TODAY)
    }

    /// Run a command with `--json`, expect success and parse stdout
    pub fn json(&self, args: &[&str]) -> Value {
        self.json_at(TODAY, args)
    }

    pub fn json_at(&self, today: &str, args: &[&str]) -> Value {
        let output = self
            .cli_at(today)
            .arg("--json")
            .args(args)
            .output()
            .expect("Failed to run hdsched");
        assert!(
            output.status.success(),
            "hdsched {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        serde_json::from_slice(&output.stdout).expect("stdout is not JSON")
    }

    /// Book a patient and return the new session id
    pub fn book(&self, patient: &str, date: &str) -> String {
        let session = self.json(&["book", "--patient", patient, "--date", date]);
        session["id"].as_str().expect("session id").to_string()
    }

    pub fn show(&self, session: &str) -> Value {
        self.json(&["show", "--session", session])
    }
}

fn prescription(patient: &str, recurrence: &str, dialyser_reuse: u32) -> Value {
    json!({
        "patient_id": patient,
        "patient_name": format!("Patient {}", patient),
        "recurrence": recurrence,
        "anchor_date": TODAY,
        "preferred_slot": "morning",
        "treatment": { "dry_weight": 58.0, "duration_minutes": 240 },
        "equipment": {
            "dialyser_reuse_count": dialyser_reuse,
            "blood_tubing_reuse_count": 0
        }
    })
}
