//! Core domain types for the dialysis scheduling system.
//!
//! This module defines the fundamental types used throughout the system:
//! - Slots and prescriptions (read-only inputs)
//! - Clinical phases, statuses and per-phase locks
//! - Per-phase field groups
//! - The session record itself

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Slot and Prescription Types
// ============================================================================

/// A fixed daily time window with a bed capacity
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Slot {
    pub id: String,
    pub name: String,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub max_beds: u32,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

/// Treatment parameters carried from the prescription onto each session
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
pub struct TreatmentParameters {
    pub dry_weight: Option<f64>,
    pub dialyser_type: Option<String>,
    pub duration_minutes: Option<u32>,
    pub blood_flow_rate: Option<u32>,
    pub dialysate_flow_rate: Option<u32>,
    pub anticoagulation: Option<String>,
    pub access_type: Option<String>,
}

/// Equipment reuse counters tracked on the patient record
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct EquipmentCounters {
    pub dialyser_reuse_count: u32,
    pub blood_tubing_reuse_count: u32,
}

/// Prescription snapshot read from the patient store
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Prescription {
    pub patient_id: String,
    #[serde(default)]
    pub patient_name: String,
    /// Free-text cadence, e.g. "MWF" or "Every 3 days"
    pub recurrence: String,
    pub anchor_date: NaiveDate,
    pub preferred_slot: String,
    #[serde(default)]
    pub treatment: TreatmentParameters,
    #[serde(default)]
    pub equipment: EquipmentCounters,
}

// ============================================================================
// Phase, Status and Locks
// ============================================================================

/// Clinical phase of a session, in the only order it may advance
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    PreDialysis,
    IntraDialysis,
    PostDialysis,
    Completed,
}

impl Phase {
    /// The phase that follows this one, if any
    pub fn next(self) -> Option<Phase> {
        match self {
            Phase::PreDialysis => Some(Phase::IntraDialysis),
            Phase::IntraDialysis => Some(Phase::PostDialysis),
            Phase::PostDialysis => Some(Phase::Completed),
            Phase::Completed => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::PreDialysis => "PRE_DIALYSIS",
            Phase::IntraDialysis => "INTRA_DIALYSIS",
            Phase::PostDialysis => "POST_DIALYSIS",
            Phase::Completed => "COMPLETED",
        };
        f.write_str(s)
    }
}

/// Scheduling status, orthogonal to the clinical phase
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum SessionStatus {
    PreScheduled,
    Active,
    Completed,
    Missed,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::PreScheduled => "Pre-Scheduled",
            SessionStatus::Active => "Active",
            SessionStatus::Completed => "Completed",
            SessionStatus::Missed => "Missed",
        };
        f.write_str(s)
    }
}

/// The field group collected during a phase
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FieldGroup {
    PreDialysis,
    IntraDialysis,
    PostDialysis,
}

impl fmt::Display for FieldGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FieldGroup::PreDialysis => "pre-dialysis",
            FieldGroup::IntraDialysis => "intra-dialysis",
            FieldGroup::PostDialysis => "post-dialysis",
        };
        f.write_str(s)
    }
}

/// Per-phase lock flags
#[derive(Clone, Copy, Debug, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct PhaseLocks {
    pub pre_dialysis: bool,
    pub intra_dialysis: bool,
    pub post_dialysis: bool,
}

impl PhaseLocks {
    pub fn is_locked(&self, group: FieldGroup) -> bool {
        match group {
            FieldGroup::PreDialysis => self.pre_dialysis,
            FieldGroup::IntraDialysis => self.intra_dialysis,
            FieldGroup::PostDialysis => self.post_dialysis,
        }
    }

    pub fn lock(&mut self, group: FieldGroup) {
        match group {
            FieldGroup::PreDialysis => self.pre_dialysis = true,
            FieldGroup::IntraDialysis => self.intra_dialysis = true,
            FieldGroup::PostDialysis => self.post_dialysis = true,
        }
    }
}

// ============================================================================
// Field Groups
// ============================================================================

/// Vitals collected before the patient is connected
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
pub struct PreDialysisVitals {
    pub weight: Option<f64>,
    pub sbp: Option<i64>,
    pub dbp: Option<i64>,
    pub pulse: Option<i64>,
    pub temperature: Option<f64>,
    pub access_site: Option<String>,
    pub notes: Option<String>,
}

/// A single monitoring reading taken while on the machine
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct IntraReading {
    pub recorded_at: DateTime<Utc>,
    pub sbp: Option<i64>,
    pub dbp: Option<i64>,
    pub pulse: Option<i64>,
    pub blood_flow_rate: Option<i64>,
    pub venous_pressure: Option<i64>,
    pub arterial_pressure: Option<i64>,
    pub transmembrane_pressure: Option<i64>,
    pub notes: Option<String>,
}

impl IntraReading {
    pub fn empty(recorded_at: DateTime<Utc>) -> Self {
        Self {
            recorded_at,
            sbp: None,
            dbp: None,
            pulse: None,
            blood_flow_rate: None,
            venous_pressure: None,
            arterial_pressure: None,
            transmembrane_pressure: None,
            notes: None,
        }
    }
}

/// Vitals collected after disconnection
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
pub struct PostDialysisVitals {
    pub weight: Option<f64>,
    pub sbp: Option<i64>,
    pub dbp: Option<i64>,
    pub pulse: Option<i64>,
    pub temperature: Option<f64>,
    pub access_status: Option<String>,
    pub notes: Option<String>,
}

// ============================================================================
// Side Records
// ============================================================================

/// Details recorded when a session is marked missed
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MissedBlock {
    pub reason: String,
    pub notes: Option<String>,
    pub marked_at: DateTime<Utc>,
    pub marked_by: String,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
}

impl MissedBlock {
    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}

/// One field changed by an audited correction
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FieldChange {
    pub field: String,
    pub previous: serde_json::Value,
    pub new: serde_json::Value,
}

/// Audited amendment of a locked field group
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Correction {
    pub corrected_at: DateTime<Utc>,
    pub corrected_by: String,
    pub reason: String,
    pub group: FieldGroup,
    pub changes: Vec<FieldChange>,
}

// ============================================================================
// Session
// ============================================================================

/// A single scheduled treatment session
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub id: Uuid,
    pub patient_id: String,
    pub date: NaiveDate,
    pub slot_id: String,
    pub bed_number: Option<u32>,

    pub phase: Phase,
    pub status: SessionStatus,
    #[serde(default)]
    pub locks: PhaseLocks,

    /// Prescription snapshot taken at booking time
    pub recurrence: String,
    #[serde(default)]
    pub treatment: TreatmentParameters,

    #[serde(default)]
    pub pre: PreDialysisVitals,
    #[serde(default)]
    pub intra: Vec<IntraReading>,
    #[serde(default)]
    pub post: PostDialysisVitals,
    pub weight_loss: Option<f64>,

    pub missed: Option<MissedBlock>,
    pub discharge_reason: Option<String>,
    #[serde(default)]
    pub corrections: Vec<Correction>,

    pub is_auto_generated: bool,
    pub is_discharged: bool,
    pub is_moved_to_history: bool,
    pub parent_session_id: Option<Uuid>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub pre_completed_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub post_started_at: Option<DateTime<Utc>>,
    pub actual_end_time: Option<DateTime<Utc>>,

    /// Bumped on every committed change; used for compare-and-set
    #[serde(default)]
    pub revision: u64,
}

impl Session {
    /// Build a fresh session from a prescription snapshot
    ///
    /// Status is `Active` when the date is today, `PreScheduled` otherwise.
    pub fn from_prescription(
        prescription: &Prescription,
        date: NaiveDate,
        slot_id: &str,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> Self {
        Session {
            id: Uuid::new_v4(),
            patient_id: prescription.patient_id.clone(),
            date,
            slot_id: slot_id.to_string(),
            bed_number: None,
            phase: Phase::PreDialysis,
            status: scheduled_status(date, today),
            locks: PhaseLocks::default(),
            recurrence: prescription.recurrence.clone(),
            treatment: prescription.treatment.clone(),
            pre: PreDialysisVitals::default(),
            intra: Vec::new(),
            post: PostDialysisVitals::default(),
            weight_loss: None,
            missed: None,
            discharge_reason: None,
            corrections: Vec::new(),
            is_auto_generated: false,
            is_discharged: false,
            is_moved_to_history: false,
            parent_session_id: None,
            created_at: now,
            updated_at: now,
            pre_completed_at: None,
            started_at: None,
            post_started_at: None,
            actual_end_time: None,
            revision: 0,
        }
    }

    /// Counts toward the one-session-per-patient-per-date rule
    pub fn is_active(&self) -> bool {
        !self.is_discharged && !self.is_moved_to_history
    }

    /// Holds its bed in the (slot, date) grid
    ///
    /// Archived, missed and force-discharged sessions release their bed.
    /// Completed sessions keep it for the rest of the day.
    pub fn occupies_bed(&self) -> bool {
        if self.is_moved_to_history || self.status == SessionStatus::Missed {
            return false;
        }
        if self.is_discharged && self.status != SessionStatus::Completed {
            return false;
        }
        self.bed_number.is_some()
    }

    /// Bed number if this session currently holds it
    pub fn occupied_bed(&self) -> Option<u32> {
        if self.occupies_bed() {
            self.bed_number
        } else {
            None
        }
    }

    /// True once the patient has moved past pre-dialysis assessment
    pub fn treatment_started(&self) -> bool {
        self.phase != Phase::PreDialysis || self.locks.pre_dialysis
    }

    /// Record a committed change
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
        self.revision += 1;
    }
}

/// Status a not-yet-started session should carry on `date`
pub fn scheduled_status(date: NaiveDate, today: NaiveDate) -> SessionStatus {
    if date == today {
        SessionStatus::Active
    } else {
        SessionStatus::PreScheduled
    }
}
