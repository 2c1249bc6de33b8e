//! Append-only activity log.
//!
//! Missed, rescheduled, discharged and similar events are appended to a
//! JSONL (JSON Lines) file with file locking so several processes can
//! write safely. The scheduler never reads the log back for decisions.

use crate::{FieldGroup, Result};
use chrono::{DateTime, NaiveDate, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

/// What happened to a session
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActivityKind {
    Created {
        auto_generated: bool,
    },
    Missed {
        reason: String,
        notes: Option<String>,
    },
    MissedResolved,
    Rescheduled {
        from_date: NaiveDate,
        to_date: NaiveDate,
        from_slot: String,
        to_slot: String,
    },
    BedChanged {
        from_bed: Option<u32>,
        to_bed: u32,
    },
    Discharged {
        forced: bool,
        reason: Option<String>,
    },
    Archived,
    Corrected {
        group: FieldGroup,
        reason: String,
        fields: Vec<String>,
    },
    EquipmentAlert {
        message: String,
    },
}

impl ActivityKind {
    pub fn label(&self) -> &'static str {
        match self {
            ActivityKind::Created { .. } => "created",
            ActivityKind::Missed { .. } => "missed",
            ActivityKind::MissedResolved => "missed_resolved",
            ActivityKind::Rescheduled { .. } => "rescheduled",
            ActivityKind::BedChanged { .. } => "bed_changed",
            ActivityKind::Discharged { .. } => "discharged",
            ActivityKind::Archived => "archived",
            ActivityKind::Corrected { .. } => "corrected",
            ActivityKind::EquipmentAlert { .. } => "equipment_alert",
        }
    }
}

/// One entry in the activity log
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ActivityEvent {
    pub id: Uuid,
    pub at: DateTime<Utc>,
    pub session_id: Uuid,
    pub patient_id: String,
    pub actor: String,
    pub event: ActivityKind,
}

impl ActivityEvent {
    pub fn new(
        at: DateTime<Utc>,
        session_id: Uuid,
        patient_id: &str,
        actor: &str,
        event: ActivityKind,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            at,
            session_id,
            patient_id: patient_id.to_string(),
            actor: actor.to_string(),
            event,
        }
    }
}

/// Activity sink trait for recording events
pub trait ActivitySink: Send + Sync {
    fn append(&self, event: &ActivityEvent) -> Result<()>;
}

/// JSONL-based activity sink with file locking
#[derive(Clone, Debug)]
pub struct JsonlActivityLog {
    path: PathBuf,
}

impl JsonlActivityLog {
    /// Create a new JSONL sink for the given path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Ensure the parent directory exists
    fn ensure_parent_dir(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

impl ActivitySink for JsonlActivityLog {
    fn append(&self, event: &ActivityEvent) -> Result<()> {
        self.ensure_parent_dir()?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        file.lock_exclusive()?;

        let mut writer = std::io::BufWriter::new(&file);
        let line = serde_json::to_string(event)?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        drop(writer);

        file.unlock()?;

        tracing::debug!("Logged {} for session {}", event.event.label(), event.session_id);
        Ok(())
    }
}

/// Sink that keeps events in memory
#[derive(Debug, Default)]
pub struct MemoryActivitySink {
    events: Mutex<Vec<ActivityEvent>>,
}

impl MemoryActivitySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ActivityEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl ActivitySink for MemoryActivitySink {
    fn append(&self, event: &ActivityEvent) -> Result<()> {
        let mut events = self
            .events
            .lock()
            .map_err(|_| crate::Error::Other("activity sink lock poisoned".into()))?;
        events.push(event.clone());
        Ok(())
    }
}

/// Read all events from an activity log file
pub fn read_events(path: &Path) -> Result<Vec<ActivityEvent>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(path)?;
    file.lock_shared()?;

    let reader = BufReader::new(&file);
    let mut events = Vec::new();

    for (line_num, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<ActivityEvent>(&line) {
            Ok(event) => events.push(event),
            Err(e) => {
                tracing::warn!("Failed to parse activity at line {}: {}", line_num + 1, e);
            }
        }
    }

    file.unlock()?;
    tracing::debug!("Read {} activity events", events.len());
    Ok(events)
}
