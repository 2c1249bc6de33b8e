//! Error types for the dialysis_core library.

use chrono::NaiveDate;
use std::fmt;
use std::io;
use uuid::Uuid;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Which uniqueness rule a conflicting booking collided with
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConflictKind {
    /// The patient already has an active session on that date
    PatientDate,
    /// The bed is already occupied in that slot on that date
    Bed,
    /// The session changed since the caller last read it
    Revision,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictKind::PatientDate => write!(f, "patient already booked on this date"),
            ConflictKind::Bed => write!(f, "bed already occupied"),
            ConflictKind::Revision => write!(f, "session was modified concurrently"),
        }
    }
}

/// Core error type for dialysis_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Required fields missing or a payload could not be coerced
    #[error("Validation error: {0}")]
    Validation(String),

    /// Booking collides with an existing session
    #[error("Conflict: {kind} (existing session {existing})")]
    Conflict { kind: ConflictKind, existing: Uuid },

    /// Unknown session, patient or slot
    #[error("Not found: {0}")]
    NotFound(String),

    /// Action attempted from an illegal phase or status
    #[error("State error: {0}")]
    State(String),

    /// Every bed in the slot is taken on that date
    #[error("No bed available in slot {slot_id} on {date}")]
    CapacityExhausted { slot_id: String, date: NaiveDate },

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True for the per-date failures the generator records as skips
    pub fn is_skippable(&self) -> bool {
        matches!(
            self,
            Error::Conflict { .. } | Error::CapacityExhausted { .. }
        )
    }
}
