//! Session lifecycle: clinical phase transitions and side outcomes.
//!
//! Every function here works on a single session and either applies the
//! whole change or returns an error with the session untouched. Checks
//! that need the rest of the book (bed and patient conflicts) live in the
//! scheduler, which calls these inside a store transaction.

use crate::fields::{Field, FieldPatch};
use crate::{
    scheduled_status, Correction, Error, FieldGroup, IntraReading, MissedBlock, Phase, Result,
    Session, SessionStatus,
};
use chrono::{DateTime, NaiveDate, Utc};
use std::fmt;
use std::str::FromStr;

const PRE_REQUIRED: [Field; 3] = [Field::PreWeight, Field::PreSbp, Field::PreDbp];
const POST_REQUIRED: [Field; 4] = [
    Field::PostWeight,
    Field::PostSbp,
    Field::PostDbp,
    Field::PostAccessStatus,
];

/// A clinical step requested against a session
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PhaseAction {
    SavePreDialysis,
    CompletePreDialysis,
    RecordIntraDialysis,
    StartPostDialysis,
    SavePostDialysis,
    CompletePostDialysis,
}

impl PhaseAction {
    pub const ALL: [PhaseAction; 6] = [
        PhaseAction::SavePreDialysis,
        PhaseAction::CompletePreDialysis,
        PhaseAction::RecordIntraDialysis,
        PhaseAction::StartPostDialysis,
        PhaseAction::SavePostDialysis,
        PhaseAction::CompletePostDialysis,
    ];

    /// Field group the action's payload must belong to
    pub fn group(self) -> FieldGroup {
        match self {
            PhaseAction::SavePreDialysis | PhaseAction::CompletePreDialysis => {
                FieldGroup::PreDialysis
            }
            PhaseAction::RecordIntraDialysis | PhaseAction::StartPostDialysis => {
                FieldGroup::IntraDialysis
            }
            PhaseAction::SavePostDialysis | PhaseAction::CompletePostDialysis => {
                FieldGroup::PostDialysis
            }
        }
    }

    /// Phase the session must be in
    pub fn required_phase(self) -> Phase {
        match self.group() {
            FieldGroup::PreDialysis => Phase::PreDialysis,
            FieldGroup::IntraDialysis => Phase::IntraDialysis,
            FieldGroup::PostDialysis => Phase::PostDialysis,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PhaseAction::SavePreDialysis => "save-pre",
            PhaseAction::CompletePreDialysis => "complete-pre",
            PhaseAction::RecordIntraDialysis => "record-intra",
            PhaseAction::StartPostDialysis => "start-post",
            PhaseAction::SavePostDialysis => "save-post",
            PhaseAction::CompletePostDialysis => "complete-post",
        }
    }
}

impl fmt::Display for PhaseAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PhaseAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        PhaseAction::ALL
            .into_iter()
            .find(|a| a.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::Validation(format!("unknown phase action '{}'", s)))
    }
}

/// Reject a stale compare-and-set revision
pub fn check_revision(session: &Session, expected: Option<u64>) -> Result<()> {
    match expected {
        Some(rev) if rev != session.revision => {
            tracing::debug!(
                "Session {} is at revision {}, caller expected {}",
                session.id,
                session.revision,
                rev
            );
            Err(Error::Conflict {
                kind: crate::ConflictKind::Revision,
                existing: session.id,
            })
        }
        _ => Ok(()),
    }
}

/// Apply a phase action with its payload
///
/// The payload is applied to a copy first; required-field checks run on
/// the copy, so a failing completion leaves no partial writes behind.
pub fn transition(
    session: &mut Session,
    action: PhaseAction,
    patch: &FieldPatch,
    today: NaiveDate,
    now: DateTime<Utc>,
) -> Result<()> {
    if patch.group() != action.group() {
        return Err(Error::Validation(format!(
            "{} takes {} fields, got {} fields",
            action,
            action.group(),
            patch.group()
        )));
    }
    ensure_open_for_treatment(session)?;
    ensure_phase(session, action.required_phase())?;

    let mut next = session.clone();
    match action {
        PhaseAction::SavePreDialysis => {
            ensure_unlocked(&next, FieldGroup::PreDialysis)?;
            patch.apply_to_pre(&mut next.pre)?;
        }
        PhaseAction::CompletePreDialysis => {
            ensure_unlocked(&next, FieldGroup::PreDialysis)?;
            if next.date > today {
                return Err(Error::State(format!(
                    "session is scheduled for {}; treatment cannot start early",
                    next.date
                )));
            }
            patch.apply_to_pre(&mut next.pre)?;
            require_fields(&PRE_REQUIRED, |f| pre_present(&next, f))?;
            next.phase = Phase::IntraDialysis;
            next.locks.lock(FieldGroup::PreDialysis);
            next.pre_completed_at = Some(now);
            next.started_at = Some(now);
            next.status = SessionStatus::Active;
        }
        PhaseAction::RecordIntraDialysis => {
            ensure_unlocked(&next, FieldGroup::IntraDialysis)?;
            if patch.is_empty() {
                return Err(Error::Validation("no readings supplied".into()));
            }
            record_reading(&mut next, patch, now)?;
        }
        PhaseAction::StartPostDialysis => {
            ensure_unlocked(&next, FieldGroup::IntraDialysis)?;
            if !patch.is_empty() {
                record_reading(&mut next, patch, now)?;
            }
            next.phase = Phase::PostDialysis;
            next.locks.lock(FieldGroup::IntraDialysis);
            next.post_started_at = Some(now);
        }
        PhaseAction::SavePostDialysis => {
            ensure_unlocked(&next, FieldGroup::PostDialysis)?;
            patch.apply_to_post(&mut next.post)?;
            next.weight_loss = weight_loss(&next);
        }
        PhaseAction::CompletePostDialysis => {
            ensure_unlocked(&next, FieldGroup::PostDialysis)?;
            patch.apply_to_post(&mut next.post)?;
            require_fields(&POST_REQUIRED, |f| post_present(&next, f))?;
            next.weight_loss = weight_loss(&next);
            next.phase = Phase::Completed;
            next.locks.lock(FieldGroup::PostDialysis);
            next.status = SessionStatus::Completed;
            next.is_discharged = true;
            next.actual_end_time = Some(now);
        }
    }

    tracing::info!(
        "Session {}: {} ({} -> {})",
        session.id,
        action,
        session.phase,
        next.phase
    );
    *session = next;
    Ok(())
}

fn record_reading(session: &mut Session, patch: &FieldPatch, now: DateTime<Utc>) -> Result<()> {
    let mut reading = IntraReading::empty(now);
    patch.apply_to_reading(&mut reading)?;
    session.intra.push(reading);
    Ok(())
}

fn ensure_open_for_treatment(session: &Session) -> Result<()> {
    if session.is_moved_to_history {
        return Err(Error::State("session is archived".into()));
    }
    if session.status == SessionStatus::Missed {
        return Err(Error::State(
            "session is marked missed; resolve it before documenting treatment".into(),
        ));
    }
    if session.is_discharged && session.phase != Phase::Completed {
        return Err(Error::State("session has been discharged".into()));
    }
    Ok(())
}

fn ensure_phase(session: &Session, required: Phase) -> Result<()> {
    if session.phase == required {
        return Ok(());
    }
    Err(Error::State(format!(
        "session is in {}, action requires {}",
        session.phase, required
    )))
}

fn ensure_unlocked(session: &Session, group: FieldGroup) -> Result<()> {
    if session.locks.is_locked(group) {
        return Err(Error::State(format!(
            "{} fields are locked; use an audited correction",
            group
        )));
    }
    Ok(())
}

fn require_fields(required: &[Field], present: impl Fn(Field) -> bool) -> Result<()> {
    let missing: Vec<&str> = required
        .iter()
        .filter(|f| !present(**f))
        .map(|f| f.name())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(Error::Validation(format!(
            "required fields missing: {}",
            missing.join(", ")
        )))
    }
}

fn pre_present(session: &Session, field: Field) -> bool {
    let pre = &session.pre;
    match field {
        Field::PreWeight => pre.weight.is_some(),
        Field::PreSbp => pre.sbp.is_some(),
        Field::PreDbp => pre.dbp.is_some(),
        _ => true,
    }
}

fn post_present(session: &Session, field: Field) -> bool {
    let post = &session.post;
    match field {
        Field::PostWeight => post.weight.is_some(),
        Field::PostSbp => post.sbp.is_some(),
        Field::PostDbp => post.dbp.is_some(),
        Field::PostAccessStatus => post
            .access_status
            .as_deref()
            .is_some_and(|s| !s.trim().is_empty()),
        _ => true,
    }
}

/// Pre-weight minus post-weight, rounded to 10 g
pub fn weight_loss(session: &Session) -> Option<f64> {
    let pre = session.pre.weight?;
    let post = session.post.weight?;
    Some(((pre - post) * 100.0).round() / 100.0)
}

/// Mark a not-yet-attended session as missed
pub fn mark_missed(
    session: &mut Session,
    reason: &str,
    notes: Option<&str>,
    actor: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    if reason.trim().is_empty() {
        return Err(Error::Validation("a missed reason is required".into()));
    }
    if session.is_moved_to_history {
        return Err(Error::State("session is archived".into()));
    }
    if session.is_discharged {
        return Err(Error::State("session has been discharged".into()));
    }
    match session.status {
        SessionStatus::Missed => {
            return Err(Error::State("session is already marked missed".into()))
        }
        SessionStatus::Completed => {
            return Err(Error::State(
                "a completed session cannot be marked missed".into(),
            ))
        }
        SessionStatus::Active => {
            return Err(Error::State(
                "an active session cannot be marked missed".into(),
            ))
        }
        SessionStatus::PreScheduled => {}
    }

    session.status = SessionStatus::Missed;
    session.missed = Some(MissedBlock {
        reason: reason.trim().to_string(),
        notes: notes.map(str::to_string),
        marked_at: now,
        marked_by: actor.to_string(),
        resolved_at: None,
        resolved_by: None,
    });
    tracing::info!("Session {} marked missed: {}", session.id, reason.trim());
    Ok(())
}

/// Clear a missed mark; the caller decides whether the bed is still free
pub fn resolve_missed(
    session: &mut Session,
    actor: &str,
    today: NaiveDate,
    now: DateTime<Utc>,
) -> Result<()> {
    if session.status != SessionStatus::Missed {
        return Err(Error::State("session is not marked missed".into()));
    }
    if session.is_moved_to_history {
        return Err(Error::State("session is archived".into()));
    }
    let block = session
        .missed
        .as_mut()
        .ok_or_else(|| Error::State("session has no missed record".into()))?;
    if block.is_resolved() {
        return Err(Error::State("missed record is already resolved".into()));
    }

    block.resolved_at = Some(now);
    block.resolved_by = Some(actor.to_string());
    session.status = scheduled_status(session.date, today);
    tracing::info!("Session {} missed mark resolved by {}", session.id, actor);
    Ok(())
}

/// Promote today's reserved session to active; bed allocation is the caller's
pub fn activate(session: &mut Session, today: NaiveDate) -> Result<()> {
    if session.is_moved_to_history {
        return Err(Error::State("session is archived".into()));
    }
    if session.is_discharged {
        return Err(Error::State("session has been discharged".into()));
    }
    if session.status != SessionStatus::PreScheduled {
        return Err(Error::State(format!(
            "only pre-scheduled sessions can be activated (status is {})",
            session.status
        )));
    }
    if session.date != today {
        return Err(Error::State(format!(
            "session is for {}; only today's reservations can be activated",
            session.date
        )));
    }
    session.status = SessionStatus::Active;
    Ok(())
}

/// Preconditions for moving a session to another bed
pub fn ensure_bed_changeable(session: &Session) -> Result<()> {
    if session.status == SessionStatus::Completed {
        return Err(Error::State(
            "bed cannot change on a completed session".into(),
        ));
    }
    if session.is_moved_to_history {
        return Err(Error::State("session is archived".into()));
    }
    if session.is_discharged {
        return Err(Error::State("session has been discharged".into()));
    }
    Ok(())
}

/// Preconditions for moving a session to another date or slot
pub fn ensure_reschedulable(session: &Session) -> Result<()> {
    ensure_bed_changeable(session)?;
    if session.treatment_started() {
        return Err(Error::State(
            "treatment has started; the session cannot be rescheduled".into(),
        ));
    }
    Ok(())
}

/// Close any open missed block as part of a reschedule
pub fn close_missed(session: &mut Session, actor: &str, now: DateTime<Utc>) {
    if let Some(block) = session.missed.as_mut() {
        if !block.is_resolved() {
            block.resolved_at = Some(now);
            block.resolved_by = Some(actor.to_string());
        }
    }
}

/// End a session without completing treatment
pub fn force_discharge(session: &mut Session, reason: &str) -> Result<()> {
    if reason.trim().is_empty() {
        return Err(Error::Validation("a discharge reason is required".into()));
    }
    if session.status == SessionStatus::Completed || session.phase == Phase::Completed {
        return Err(Error::State("session is already completed".into()));
    }
    if session.is_discharged {
        return Err(Error::State("session has already been discharged".into()));
    }
    if session.is_moved_to_history {
        return Err(Error::State("session is archived".into()));
    }

    session.is_discharged = true;
    session.discharge_reason = Some(reason.trim().to_string());
    tracing::info!("Session {} discharged: {}", session.id, reason.trim());
    Ok(())
}

/// Whether the session is between connection and completion
pub fn is_mid_treatment(session: &Session) -> bool {
    !session.is_discharged
        && matches!(session.phase, Phase::IntraDialysis | Phase::PostDialysis)
}

/// Move a session to history
pub fn archive(session: &mut Session) -> Result<()> {
    if session.is_moved_to_history {
        return Err(Error::State("session is already archived".into()));
    }
    if is_mid_treatment(session) {
        return Err(Error::State(format!(
            "session is in {}; finish or discharge it before archiving",
            session.phase
        )));
    }
    session.is_moved_to_history = true;
    Ok(())
}

/// Amend a locked field group with an audit record
///
/// Intra-dialysis corrections apply to the latest reading.
pub fn correct(
    session: &mut Session,
    patch: &FieldPatch,
    actor: &str,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<Correction> {
    if actor.trim().is_empty() {
        return Err(Error::Validation("a correcting actor is required".into()));
    }
    if reason.trim().is_empty() {
        return Err(Error::Validation("a correction reason is required".into()));
    }
    if patch.is_empty() {
        return Err(Error::Validation("no fields to correct".into()));
    }
    let group = patch.group();
    if !session.locks.is_locked(group) {
        return Err(Error::State(format!(
            "{} fields are not locked; use the ordinary save action",
            group
        )));
    }

    let mut next = session.clone();
    let changes = match group {
        FieldGroup::PreDialysis => patch.apply_to_pre(&mut next.pre)?,
        FieldGroup::IntraDialysis => {
            let reading = next
                .intra
                .last_mut()
                .ok_or_else(|| Error::State("no intra-dialysis readings to correct".into()))?;
            patch.apply_to_reading(reading)?
        }
        FieldGroup::PostDialysis => patch.apply_to_post(&mut next.post)?,
    };
    // A locked group was complete when it locked and must stay so
    match group {
        FieldGroup::PreDialysis => require_fields(&PRE_REQUIRED, |f| pre_present(&next, f))?,
        FieldGroup::PostDialysis => require_fields(&POST_REQUIRED, |f| post_present(&next, f))?,
        FieldGroup::IntraDialysis => {}
    }
    if next.weight_loss.is_some() || next.phase == Phase::Completed {
        next.weight_loss = weight_loss(&next);
    }

    let correction = Correction {
        corrected_at: now,
        corrected_by: actor.trim().to_string(),
        reason: reason.trim().to_string(),
        group,
        changes,
    };
    next.corrections.push(correction.clone());
    tracing::info!(
        "Session {}: {} correction by {} ({} fields)",
        session.id,
        group,
        actor,
        correction.changes.len()
    );
    *session = next;
    Ok(correction)
}
