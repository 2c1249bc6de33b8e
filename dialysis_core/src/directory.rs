//! Read-only collaborators: patient prescriptions and slot configuration.
//!
//! Both are queried on every use; nothing here caches across calls, so a
//! capacity change in the slot table is seen by the next allocation.

use crate::{Error, Prescription, Result, Slot};
use std::collections::HashMap;
use std::path::PathBuf;

/// Source of prescription snapshots
pub trait PatientDirectory: Send + Sync {
    fn prescription(&self, patient_id: &str) -> Result<Prescription>;
}

/// Source of slot definitions
pub trait SlotDirectory: Send + Sync {
    fn slots(&self) -> Result<Vec<Slot>>;

    fn slot(&self, slot_id: &str) -> Result<Slot> {
        self.slots()?
            .into_iter()
            .find(|s| s.id == slot_id)
            .ok_or_else(|| Error::NotFound(format!("slot {}", slot_id)))
    }
}

/// Prescriptions held in memory
#[derive(Clone, Debug, Default)]
pub struct MemoryPatientDirectory {
    prescriptions: HashMap<String, Prescription>,
}

impl MemoryPatientDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, prescription: Prescription) {
        self.prescriptions
            .insert(prescription.patient_id.clone(), prescription);
    }
}

impl PatientDirectory for MemoryPatientDirectory {
    fn prescription(&self, patient_id: &str) -> Result<Prescription> {
        self.prescriptions
            .get(patient_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("patient {}", patient_id)))
    }
}

/// Prescriptions read from a JSON array file on every lookup
#[derive(Clone, Debug)]
pub struct JsonPatientFile {
    path: PathBuf,
}

impl JsonPatientFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn load(&self) -> Result<Vec<Prescription>> {
        if !self.path.exists() {
            tracing::debug!("No patient file at {:?}", self.path);
            return Ok(Vec::new());
        }
        let contents = std::fs::read_to_string(&self.path)?;
        let prescriptions: Vec<Prescription> = serde_json::from_str(&contents)?;
        Ok(prescriptions)
    }
}

impl PatientDirectory for JsonPatientFile {
    fn prescription(&self, patient_id: &str) -> Result<Prescription> {
        self.load()?
            .into_iter()
            .find(|p| p.patient_id == patient_id)
            .ok_or_else(|| Error::NotFound(format!("patient {}", patient_id)))
    }
}

/// Slot table taken from configuration
#[derive(Clone, Debug, Default)]
pub struct ConfiguredSlots {
    slots: Vec<Slot>,
}

impl ConfiguredSlots {
    pub fn new(slots: Vec<Slot>) -> Self {
        Self { slots }
    }
}

impl SlotDirectory for ConfiguredSlots {
    fn slots(&self) -> Result<Vec<Slot>> {
        Ok(self.slots.clone())
    }
}
