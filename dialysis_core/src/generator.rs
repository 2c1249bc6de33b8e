//! Recurring session generation from an anchor session.
//!
//! Each matching date in `(anchor.date, anchor.date + horizon]` is committed
//! as its own store transaction. Patient conflicts and full slots become
//! skipped entries; any other error stops the batch, leaving earlier dates
//! committed.

use crate::allocator::assign_bed;
use crate::conflict::ConflictGuard;
use crate::cycle::CyclePattern;
use crate::store::SessionStore;
use crate::{scheduled_status, Error, Phase, PhaseLocks, Result, Session, Slot};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// Longest horizon a single batch may cover
pub const MAX_HORIZON_DAYS: u32 = 366;

/// Why a matching date produced no session
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(tag = "reason", rename_all = "kebab-case")]
pub enum SkipReason {
    /// The patient already has a session that day, finished or not
    Conflict { existing: Uuid },
    /// Every bed in the slot is taken
    CapacityExhausted,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Conflict { existing } => {
                write!(f, "patient already booked (session {})", existing)
            }
            SkipReason::CapacityExhausted => write!(f, "no bed available"),
        }
    }
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct SkippedDate {
    pub date: NaiveDate,
    #[serde(flatten)]
    pub reason: SkipReason,
}

/// Outcome of one generation batch
#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct GenerationReport {
    pub created: Vec<Uuid>,
    pub skipped: Vec<SkippedDate>,
}

/// Batch parameters
#[derive(Clone, Copy, Debug)]
pub struct GenerationRequest {
    pub horizon_days: u32,
    pub max_sessions: Option<usize>,
}

/// Follow-on session copying the anchor's prescription snapshot
pub fn follow_on(
    anchor: &Session,
    date: NaiveDate,
    bed_number: u32,
    today: NaiveDate,
    now: DateTime<Utc>,
) -> Session {
    Session {
        id: Uuid::new_v4(),
        patient_id: anchor.patient_id.clone(),
        date,
        slot_id: anchor.slot_id.clone(),
        bed_number: Some(bed_number),
        phase: Phase::PreDialysis,
        status: scheduled_status(date, today),
        locks: PhaseLocks::default(),
        recurrence: anchor.recurrence.clone(),
        treatment: anchor.treatment.clone(),
        pre: Default::default(),
        intra: Vec::new(),
        post: Default::default(),
        weight_loss: None,
        missed: None,
        discharge_reason: None,
        corrections: Vec::new(),
        is_auto_generated: true,
        is_discharged: false,
        is_moved_to_history: false,
        parent_session_id: Some(anchor.id),
        created_at: now,
        updated_at: now,
        pre_completed_at: None,
        started_at: None,
        post_started_at: None,
        actual_end_time: None,
        revision: 0,
    }
}

/// Generate follow-on sessions for `anchor` in `slot`
pub fn generate<S: SessionStore>(
    store: &S,
    anchor: &Session,
    slot: &Slot,
    request: GenerationRequest,
    today: NaiveDate,
    now: DateTime<Utc>,
) -> Result<GenerationReport> {
    let pattern = CyclePattern::parse(&anchor.recurrence);
    if !pattern.is_known() {
        return Err(Error::Validation(format!(
            "unrecognized recurrence descriptor '{}'",
            anchor.recurrence
        )));
    }
    if request.horizon_days == 0 || request.horizon_days > MAX_HORIZON_DAYS {
        return Err(Error::Validation(format!(
            "horizon must be between 1 and {} days",
            MAX_HORIZON_DAYS
        )));
    }
    if anchor.is_moved_to_history {
        return Err(Error::State("anchor session is archived".into()));
    }

    let start = anchor.date + Duration::days(1);
    let end = anchor.date + Duration::days(i64::from(request.horizon_days));
    tracing::info!(
        "Generating {} sessions for patient {} from {} to {}",
        pattern,
        anchor.patient_id,
        start,
        end
    );

    let mut report = GenerationReport::default();
    for date in pattern.matching_dates(anchor.date, start, end) {
        if request
            .max_sessions
            .is_some_and(|max| report.created.len() >= max)
        {
            tracing::debug!("Reached session cap, stopping at {}", date);
            break;
        }

        let outcome = store.transaction(|book| {
            ConflictGuard::new(book).ensure_date_uncovered(&anchor.patient_id, date)?;
            let bed = assign_bed(book, slot, date, None).ok_or_else(|| {
                Error::CapacityExhausted {
                    slot_id: slot.id.clone(),
                    date,
                }
            })?;
            let session = follow_on(anchor, date, bed, today, now);
            let id = session.id;
            book.put(session);
            Ok(id)
        });

        match outcome {
            Ok(id) => {
                tracing::debug!("Created session {} on {}", id, date);
                report.created.push(id);
            }
            Err(e) if e.is_skippable() => {
                let reason = match e {
                    Error::Conflict { existing, .. } => SkipReason::Conflict { existing },
                    _ => SkipReason::CapacityExhausted,
                };
                tracing::warn!("Skipping {}: {}", date, reason);
                report.skipped.push(SkippedDate { date, reason });
            }
            Err(e) => return Err(e),
        }
    }

    tracing::info!(
        "Generation finished: {} created, {} skipped",
        report.created.len(),
        report.skipped.len()
    );
    Ok(report)
}
