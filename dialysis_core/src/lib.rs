#![forbid(unsafe_code)]

//! Core domain model and business logic for hemodialysis session scheduling.
//!
//! This crate provides:
//! - Domain types (slots, prescriptions, sessions, phases, locks)
//! - Recurrence descriptor parsing and matching
//! - Recurring session generation and bed allocation
//! - Session lifecycle transitions, corrections and side outcomes
//! - Persistence (session store, activity log, CSV history)
//! - The `Scheduler` boundary tying these together

pub mod types;
pub mod error;
pub mod config;
pub mod logging;
pub mod clock;
pub mod cycle;
pub mod fields;
pub mod store;
pub mod file_store;
pub mod conflict;
pub mod allocator;
pub mod directory;
pub mod equipment;
pub mod activity;
pub mod history;
pub mod lifecycle;
pub mod generator;
pub mod scheduler;

// Re-export commonly used types
pub use error::{ConflictKind, Error, Result};
pub use types::*;
pub use config::Config;
pub use clock::{Clock, FixedClock, SystemClock};
pub use cycle::CyclePattern;
pub use fields::{Field, FieldPatch, FieldValue};
pub use store::{MemorySessionStore, SessionBook, SessionStore};
pub use file_store::JsonFileSessionStore;
pub use allocator::{BedCell, BedStatus};
pub use directory::{ConfiguredSlots, JsonPatientFile, MemoryPatientDirectory, PatientDirectory, SlotDirectory};
pub use equipment::{EquipmentMonitor, ReuseThresholds};
pub use activity::{ActivityEvent, ActivityKind, ActivitySink, JsonlActivityLog, MemoryActivitySink};
pub use history::export_archived;
pub use lifecycle::PhaseAction;
pub use generator::{GenerationReport, SkipReason, SkippedDate};
pub use scheduler::{RescheduleTarget, Scheduler};
