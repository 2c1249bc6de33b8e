//! Scheduling boundary: every operation a front end may call.
//!
//! Each operation runs as one store transaction, re-checks its
//! preconditions against the committed book, and appends an activity
//! event after the commit succeeds.

use crate::activity::{ActivityEvent, ActivityKind, ActivitySink};
use crate::allocator::{self, BedCell};
use crate::clock::{Clock, SystemClock};
use crate::conflict::ConflictGuard;
use crate::directory::{PatientDirectory, SlotDirectory};
use crate::equipment::EquipmentMonitor;
use crate::fields::FieldPatch;
use crate::generator::{self, GenerationReport, GenerationRequest};
use crate::lifecycle::{self, PhaseAction};
use crate::store::{SessionBook, SessionStore};
use crate::{
    scheduled_status, Correction, Error, Prescription, Result, Session, SessionStatus, Slot,
};
use chrono::NaiveDate;
use uuid::Uuid;

/// Actor recorded for system-initiated events
pub const SYSTEM_ACTOR: &str = "system";

/// Target of a reschedule
#[derive(Clone, Debug, Default)]
pub struct RescheduleTarget {
    pub date: NaiveDate,
    /// Keep the current slot when `None`
    pub slot_id: Option<String>,
    /// First free bed when `None`
    pub bed_number: Option<u32>,
}

pub struct Scheduler<S: SessionStore> {
    store: S,
    patients: Box<dyn PatientDirectory>,
    slots: Box<dyn SlotDirectory>,
    activity: Box<dyn ActivitySink>,
    equipment: Option<Box<dyn EquipmentMonitor>>,
    clock: Box<dyn Clock>,
}

impl<S: SessionStore> Scheduler<S> {
    pub fn new(
        store: S,
        patients: impl PatientDirectory + 'static,
        slots: impl SlotDirectory + 'static,
        activity: impl ActivitySink + 'static,
    ) -> Self {
        Self {
            store,
            patients: Box::new(patients),
            slots: Box::new(slots),
            activity: Box::new(activity),
            equipment: None,
            clock: Box::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn with_equipment_monitor(mut self, monitor: impl EquipmentMonitor + 'static) -> Self {
        self.equipment = Some(Box::new(monitor));
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn record(&self, session: &Session, actor: &str, event: ActivityKind) {
        let event = ActivityEvent::new(
            self.clock.now(),
            session.id,
            &session.patient_id,
            actor,
            event,
        );
        // The session change is already committed; a failed append is reported, not undone
        if let Err(e) = self.activity.append(&event) {
            tracing::error!(
                "Failed to record {} for session {}: {}",
                event.event.label(),
                session.id,
                e
            );
        }
    }

    fn bookable_slot(&self, slot_id: &str) -> Result<Slot> {
        let slot = self.slots.slot(slot_id)?;
        if !slot.active {
            return Err(Error::State(format!("slot {} is not active", slot.id)));
        }
        Ok(slot)
    }

    /// Commit a change to one session, honoring a compare-and-set revision
    fn update<T, F>(&self, id: Uuid, expected_revision: Option<u64>, f: F) -> Result<(Session, T)>
    where
        F: FnOnce(&SessionBook, &mut Session) -> Result<T>,
    {
        let now = self.clock.now();
        self.store.transaction(|book| {
            let mut session = book.require(id)?.clone();
            lifecycle::check_revision(&session, expected_revision)?;
            let value = f(&*book, &mut session)?;
            session.touch(now);
            book.put(session.clone());
            Ok((session, value))
        })
    }

    // ------------------------------------------------------------------
    // Booking
    // ------------------------------------------------------------------

    /// Book one session from a prescription snapshot
    ///
    /// Uses the prescription's preferred slot unless `slot_id` is given.
    pub fn create_session(
        &self,
        prescription: &Prescription,
        date: NaiveDate,
        slot_id: Option<&str>,
    ) -> Result<Session> {
        let slot = self.bookable_slot(slot_id.unwrap_or(&prescription.preferred_slot))?;
        let today = self.clock.today();
        let now = self.clock.now();

        let session = self.store.transaction(|book| {
            ConflictGuard::new(book).ensure_patient_free(&prescription.patient_id, date, None)?;
            let bed = allocator::assign_bed(book, &slot, date, None).ok_or_else(|| {
                Error::CapacityExhausted {
                    slot_id: slot.id.clone(),
                    date,
                }
            })?;
            let mut session = Session::from_prescription(prescription, date, &slot.id, today, now);
            session.bed_number = Some(bed);
            book.put(session.clone());
            Ok(session)
        })?;

        tracing::info!(
            "Booked patient {} on {} in {} bed {:?}",
            session.patient_id,
            session.date,
            session.slot_id,
            session.bed_number
        );
        self.record(&session, SYSTEM_ACTOR, ActivityKind::Created { auto_generated: false });
        self.check_equipment(&session, prescription);
        Ok(session)
    }

    /// Book a patient by id, looking up the prescription
    pub fn book_patient(
        &self,
        patient_id: &str,
        date: NaiveDate,
        slot_id: Option<&str>,
    ) -> Result<Session> {
        let prescription = self.patients.prescription(patient_id)?;
        self.create_session(&prescription, date, slot_id)
    }

    fn check_equipment(&self, session: &Session, prescription: &Prescription) {
        let Some(monitor) = &self.equipment else {
            return;
        };
        for alert in monitor.check(prescription) {
            tracing::warn!("Patient {}: {}", prescription.patient_id, alert);
            self.record(
                session,
                SYSTEM_ACTOR,
                ActivityKind::EquipmentAlert {
                    message: alert.to_string(),
                },
            );
        }
    }

    /// Generate follow-on sessions from an existing anchor session
    pub fn generate_recurring_sessions(
        &self,
        anchor_id: Uuid,
        horizon_days: u32,
        max_sessions: Option<usize>,
    ) -> Result<GenerationReport> {
        let anchor = self.session(anchor_id)?;
        let slot = self.bookable_slot(&anchor.slot_id)?;
        let request = GenerationRequest {
            horizon_days,
            max_sessions,
        };
        let report = generator::generate(
            &self.store,
            &anchor,
            &slot,
            request,
            self.clock.today(),
            self.clock.now(),
        )?;

        let created = self.store.read(|book| {
            Ok(report
                .created
                .iter()
                .filter_map(|id| book.get(*id).cloned())
                .collect::<Vec<_>>())
        })?;
        for session in &created {
            self.record(session, SYSTEM_ACTOR, ActivityKind::Created { auto_generated: true });
        }
        Ok(report)
    }

    // ------------------------------------------------------------------
    // Capacity
    // ------------------------------------------------------------------

    /// First free bed in a slot on a date
    pub fn assign_bed(
        &self,
        slot_id: &str,
        date: NaiveDate,
        exclude: Option<Uuid>,
    ) -> Result<Option<u32>> {
        let slot = self.slots.slot(slot_id)?;
        self.store
            .read(|book| Ok(allocator::assign_bed(book, &slot, date, exclude)))
    }

    pub fn occupancy_grid(&self, slot_id: &str, date: NaiveDate) -> Result<Vec<BedCell>> {
        let slot = self.slots.slot(slot_id)?;
        let today = self.clock.today();
        self.store
            .read(|book| Ok(allocator::occupancy_grid(book, &slot, date, today)))
    }

    // ------------------------------------------------------------------
    // Clinical phases
    // ------------------------------------------------------------------

    pub fn transition_phase(
        &self,
        id: Uuid,
        action: PhaseAction,
        patch: &FieldPatch,
        expected_revision: Option<u64>,
    ) -> Result<Session> {
        let today = self.clock.today();
        let now = self.clock.now();
        let (session, ()) = self.update(id, expected_revision, |_, session| {
            lifecycle::transition(session, action, patch, today, now)
        })?;

        if action == PhaseAction::CompletePostDialysis {
            self.record(
                &session,
                SYSTEM_ACTOR,
                ActivityKind::Discharged {
                    forced: false,
                    reason: None,
                },
            );
        }
        Ok(session)
    }

    /// Amend locked fields with an audit trail
    pub fn correct_locked_fields(
        &self,
        id: Uuid,
        patch: &FieldPatch,
        actor: &str,
        reason: &str,
    ) -> Result<(Session, Correction)> {
        let now = self.clock.now();
        let (session, correction) = self.update(id, None, |_, session| {
            lifecycle::correct(session, patch, actor, reason, now)
        })?;

        self.record(
            &session,
            actor,
            ActivityKind::Corrected {
                group: correction.group,
                reason: correction.reason.clone(),
                fields: correction.changes.iter().map(|c| c.field.clone()).collect(),
            },
        );
        Ok((session, correction))
    }

    // ------------------------------------------------------------------
    // Side outcomes
    // ------------------------------------------------------------------

    pub fn mark_missed(
        &self,
        id: Uuid,
        reason: &str,
        notes: Option<&str>,
        actor: &str,
    ) -> Result<Session> {
        let now = self.clock.now();
        let (session, ()) = self.update(id, None, |_, session| {
            lifecycle::mark_missed(session, reason, notes, actor, now)
        })?;

        self.record(
            &session,
            actor,
            ActivityKind::Missed {
                reason: reason.trim().to_string(),
                notes: notes.map(str::to_string),
            },
        );
        Ok(session)
    }

    /// Clear a missed mark; the bed is kept only if nobody took it meanwhile
    ///
    /// A session resolved on its own date becomes active and needs a bed, so a
    /// full slot fails with `CapacityExhausted` and leaves the session missed.
    pub fn resolve_missed(&self, id: Uuid, actor: &str) -> Result<Session> {
        let today = self.clock.today();
        let now = self.clock.now();
        let (session, ()) = self.update(id, None, |book, session| {
            lifecycle::resolve_missed(session, actor, today, now)?;
            if let Some(bed) = session.bed_number {
                let guard = ConflictGuard::new(book);
                let holder =
                    guard.bed_conflict(&session.slot_id, session.date, bed, Some(session.id));
                if let Some(holder) = holder {
                    tracing::info!(
                        "Bed {} now held by session {}; session {} released it",
                        bed,
                        holder,
                        session.id
                    );
                    session.bed_number = None;
                }
            }
            if session.bed_number.is_none() && session.status == SessionStatus::Active {
                let slot = self.slots.slot(&session.slot_id)?;
                let bed = allocator::assign_bed(book, &slot, session.date, Some(session.id))
                    .ok_or_else(|| Error::CapacityExhausted {
                        slot_id: slot.id.clone(),
                        date: session.date,
                    })?;
                session.bed_number = Some(bed);
            }
            Ok(())
        })?;

        self.record(&session, actor, ActivityKind::MissedResolved);
        Ok(session)
    }

    /// Promote today's reservation to active, allocating a bed if needed
    pub fn activate_reserved(&self, id: Uuid) -> Result<Session> {
        let today = self.clock.today();
        let (session, ()) = self.update(id, None, |book, session| {
            lifecycle::activate(session, today)?;
            let holds_bed = session.bed_number.is_some_and(|bed| {
                ConflictGuard::new(book)
                    .bed_conflict(&session.slot_id, session.date, bed, Some(session.id))
                    .is_none()
            });
            if !holds_bed {
                let slot = self.slots.slot(&session.slot_id)?;
                let bed = allocator::assign_bed(book, &slot, session.date, Some(session.id))
                    .ok_or_else(|| Error::CapacityExhausted {
                        slot_id: slot.id.clone(),
                        date: session.date,
                    })?;
                session.bed_number = Some(bed);
            }
            Ok(())
        })?;

        tracing::info!("Activated session {} in bed {:?}", session.id, session.bed_number);
        Ok(session)
    }

    /// Move a session to another bed, optionally in another slot
    pub fn change_bed(
        &self,
        id: Uuid,
        bed_number: u32,
        slot_id: Option<&str>,
        actor: &str,
    ) -> Result<Session> {
        let mut from_bed = None;
        let (session, ()) = self.update(id, None, |book, session| {
            lifecycle::ensure_bed_changeable(session)?;
            let slot = self.bookable_slot(slot_id.unwrap_or(&session.slot_id))?;
            allocator::check_bed_in_range(&slot, bed_number)?;
            ConflictGuard::new(book).ensure_bed_free(
                &slot.id,
                session.date,
                bed_number,
                Some(session.id),
            )?;
            from_bed = session.bed_number;
            session.slot_id = slot.id;
            session.bed_number = Some(bed_number);
            Ok(())
        })?;

        self.record(
            &session,
            actor,
            ActivityKind::BedChanged {
                from_bed,
                to_bed: bed_number,
            },
        );
        Ok(session)
    }

    /// Move a not-yet-started session to another date
    pub fn reschedule(&self, id: Uuid, target: &RescheduleTarget, actor: &str) -> Result<Session> {
        let today = self.clock.today();
        let now = self.clock.now();
        if target.date < today {
            return Err(Error::Validation(format!(
                "cannot reschedule into the past ({})",
                target.date
            )));
        }

        let mut from = None;
        let (session, ()) = self.update(id, None, |book, session| {
            lifecycle::ensure_reschedulable(session)?;
            let slot = self.bookable_slot(target.slot_id.as_deref().unwrap_or(&session.slot_id))?;
            let guard = ConflictGuard::new(book);
            guard.ensure_patient_free(&session.patient_id, target.date, Some(session.id))?;

            let bed = match target.bed_number {
                Some(bed) => {
                    allocator::check_bed_in_range(&slot, bed)?;
                    guard.ensure_bed_free(&slot.id, target.date, bed, Some(session.id))?;
                    bed
                }
                None => allocator::assign_bed(book, &slot, target.date, Some(session.id))
                    .ok_or_else(|| Error::CapacityExhausted {
                        slot_id: slot.id.clone(),
                        date: target.date,
                    })?,
            };

            from = Some((session.date, session.slot_id.clone()));
            lifecycle::close_missed(session, actor, now);
            session.date = target.date;
            session.slot_id = slot.id;
            session.bed_number = Some(bed);
            session.status = scheduled_status(target.date, today);
            Ok(())
        })?;

        if let Some((from_date, from_slot)) = from {
            tracing::info!(
                "Rescheduled session {} from {} to {}",
                session.id,
                from_date,
                session.date
            );
            self.record(
                &session,
                actor,
                ActivityKind::Rescheduled {
                    from_date,
                    to_date: session.date,
                    from_slot,
                    to_slot: session.slot_id.clone(),
                },
            );
        }
        Ok(session)
    }

    /// End a session without completing treatment; its bed is released
    pub fn force_discharge(&self, id: Uuid, reason: &str, actor: &str) -> Result<Session> {
        let (session, ()) = self.update(id, None, |_, session| {
            lifecycle::force_discharge(session, reason)
        })?;

        self.record(
            &session,
            actor,
            ActivityKind::Discharged {
                forced: true,
                reason: session.discharge_reason.clone(),
            },
        );
        Ok(session)
    }

    pub fn archive_session(&self, id: Uuid, actor: &str) -> Result<Session> {
        let (session, ()) = self.update(id, None, |_, session| lifecycle::archive(session))?;
        tracing::info!("Archived session {}", session.id);
        self.record(&session, actor, ActivityKind::Archived);
        Ok(session)
    }

    /// Archive every finished session dated before `cutoff`
    ///
    /// Finished means discharged (completed or forced) or marked missed.
    /// Sessions still awaiting treatment are left alone.
    pub fn archive_before(&self, cutoff: NaiveDate, actor: &str) -> Result<Vec<Session>> {
        let now = self.clock.now();
        let archived = self.store.transaction(|book| {
            let ids: Vec<Uuid> = book
                .iter()
                .filter(|s| {
                    s.date < cutoff
                        && !s.is_moved_to_history
                        && (s.is_discharged || s.status == SessionStatus::Missed)
                })
                .map(|s| s.id)
                .collect();

            let mut archived = Vec::with_capacity(ids.len());
            for id in ids {
                let session = book.require_mut(id)?;
                lifecycle::archive(session)?;
                session.touch(now);
                archived.push(session.clone());
            }
            Ok(archived)
        })?;

        tracing::info!("Archived {} sessions dated before {}", archived.len(), cutoff);
        for session in &archived {
            self.record(session, actor, ActivityKind::Archived);
        }
        Ok(archived)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn session(&self, id: Uuid) -> Result<Session> {
        self.store.read(|book| book.require(id).cloned())
    }

    /// Sessions on a date, ordered by slot then bed
    pub fn sessions_on(&self, date: NaiveDate) -> Result<Vec<Session>> {
        self.store.read(|book| {
            let mut sessions: Vec<Session> = book.on_date(date).cloned().collect();
            sessions.sort_by(|a, b| {
                a.slot_id
                    .cmp(&b.slot_id)
                    .then(a.bed_number.cmp(&b.bed_number))
                    .then(a.created_at.cmp(&b.created_at))
            });
            Ok(sessions)
        })
    }

    /// Archived sessions, for export
    pub fn archived_sessions(&self) -> Result<Vec<Session>> {
        self.store.read(|book| {
            Ok(book
                .iter()
                .filter(|s| s.is_moved_to_history)
                .cloned()
                .collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::MemoryActivitySink;
    use crate::clock::FixedClock;
    use crate::directory::{ConfiguredSlots, MemoryPatientDirectory};
    use crate::equipment::ReuseThresholds;
    use crate::fields::Field;
    use crate::store::MemorySessionStore;
    use crate::{ConflictKind, EquipmentCounters, FieldGroup, Phase};
    use chrono::NaiveTime;
    use serde_json::json;
    use std::sync::Arc;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, d).unwrap()
    }

    fn slot(id: &str, max_beds: u32) -> Slot {
        Slot {
            id: id.into(),
            name: id.into(),
            start: NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(11, 0, 0).unwrap(),
            max_beds,
            active: true,
        }
    }

    fn prescription(patient: &str) -> Prescription {
        Prescription {
            patient_id: patient.into(),
            patient_name: format!("Patient {}", patient),
            recurrence: "MWF".into(),
            anchor_date: day(6),
            preferred_slot: "morning".into(),
            treatment: Default::default(),
            equipment: EquipmentCounters::default(),
        }
    }

    struct SharedSink(Arc<MemoryActivitySink>);

    impl ActivitySink for SharedSink {
        fn append(&self, event: &ActivityEvent) -> Result<()> {
            self.0.append(event)
        }
    }

    fn scheduler_with(
        beds: u32,
        today: NaiveDate,
    ) -> (Scheduler<MemorySessionStore>, Arc<MemoryActivitySink>) {
        crate::logging::init_test();
        let mut patients = MemoryPatientDirectory::new();
        for id in ["P1", "P2", "P3"] {
            patients.insert(prescription(id));
        }
        let sink = Arc::new(MemoryActivitySink::new());
        let scheduler = Scheduler::new(
            MemorySessionStore::new(),
            patients,
            ConfiguredSlots::new(vec![slot("morning", beds), slot("afternoon", beds)]),
            SharedSink(Arc::clone(&sink)),
        )
        .with_clock(FixedClock::on(today));
        (scheduler, sink)
    }

    fn scheduler() -> Scheduler<MemorySessionStore> {
        scheduler_with(10, day(6)).0
    }

    fn patch(group: FieldGroup, payload: serde_json::Value) -> FieldPatch {
        FieldPatch::from_json(group, &payload).unwrap()
    }

    fn run_to_completion(s: &Scheduler<MemorySessionStore>, id: Uuid) -> Session {
        s.transition_phase(
            id,
            PhaseAction::CompletePreDialysis,
            &patch(
                FieldGroup::PreDialysis,
                json!({"preWeight": 60, "preSBP": 140, "preDBP": 85}),
            ),
            None,
        )
        .unwrap();
        s.transition_phase(
            id,
            PhaseAction::StartPostDialysis,
            &FieldPatch::new(FieldGroup::IntraDialysis),
            None,
        )
        .unwrap();
        s.transition_phase(
            id,
            PhaseAction::CompletePostDialysis,
            &patch(
                FieldGroup::PostDialysis,
                json!({"postWeight": 58, "postSBP": 120, "postDBP": 75, "postAccessStatus": "good"}),
            ),
            None,
        )
        .unwrap()
    }

    fn assert_invariants(s: &Scheduler<MemorySessionStore>) {
        s.store()
            .read(|book| {
                let mut patient_days = std::collections::HashSet::new();
                let mut beds = std::collections::HashSet::new();
                for session in book.iter() {
                    if session.is_active() {
                        assert!(
                            patient_days.insert((session.patient_id.clone(), session.date)),
                            "two active sessions for {} on {}",
                            session.patient_id,
                            session.date
                        );
                    }
                    if let Some(bed) = session.occupied_bed() {
                        assert!((1..=10).contains(&bed));
                        assert!(beds.insert((session.slot_id.clone(), session.date, bed)));
                    }
                }
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_book_assigns_first_free_bed() {
        let s = scheduler();
        let a = s.book_patient("P1", day(6), None).unwrap();
        let b = s.book_patient("P2", day(6), None).unwrap();
        assert_eq!(a.bed_number, Some(1));
        assert_eq!(b.bed_number, Some(2));
        assert_eq!(a.status, SessionStatus::Active);
        assert_eq!(s.assign_bed("morning", day(6), None).unwrap(), Some(3));
        assert_eq!(s.assign_bed("morning", day(6), Some(a.id)).unwrap(), Some(1));
    }

    #[test]
    fn test_double_booking_patient_conflicts() {
        let s = scheduler();
        let first = s.book_patient("P1", day(8), None).unwrap();
        let err = s.book_patient("P1", day(8), Some("afternoon")).unwrap_err();
        match err {
            Error::Conflict { kind, existing } => {
                assert_eq!(kind, ConflictKind::PatientDate);
                assert_eq!(existing, first.id);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_patient_and_slot() {
        let s = scheduler();
        assert!(matches!(s.book_patient("nobody", day(6), None), Err(Error::NotFound(_))));
        assert!(matches!(
            s.book_patient("P1", day(6), Some("night")),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_mwf_scenario() {
        let s = scheduler();
        let anchor = s.book_patient("P1", day(6), None).unwrap();
        let report = s.generate_recurring_sessions(anchor.id, 14, Some(3)).unwrap();
        let dates: Vec<NaiveDate> = report
            .created
            .iter()
            .map(|id| s.session(*id).unwrap().date)
            .collect();
        assert_eq!(dates, vec![day(8), day(10), day(13)]);

        let rerun = s.generate_recurring_sessions(anchor.id, 7, None).unwrap();
        assert!(rerun.created.is_empty());
        assert_eq!(rerun.skipped.len(), 3);
        assert_invariants(&s);
    }

    #[test]
    fn test_full_slot_rejects_booking_and_skips_generation() {
        let (s, _) = scheduler_with(1, day(6));
        s.book_patient("P2", day(8), None).unwrap();
        assert_eq!(s.assign_bed("morning", day(8), None).unwrap(), None);

        let err = s.book_patient("P3", day(8), None).unwrap_err();
        assert!(matches!(err, Error::CapacityExhausted { .. }));

        let anchor = s.book_patient("P1", day(6), None).unwrap();
        let report = s.generate_recurring_sessions(anchor.id, 7, None).unwrap();
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].date, day(8));
        assert_eq!(report.created.len(), 2);
    }

    #[test]
    fn test_full_round_trip() {
        let (s, sink) = scheduler_with(10, day(6));
        let session = s.book_patient("P1", day(6), None).unwrap();
        let done = run_to_completion(&s, session.id);

        assert_eq!(done.phase, Phase::Completed);
        assert_eq!(done.status, SessionStatus::Completed);
        assert!(done.is_discharged);
        assert_eq!(done.weight_loss, Some(2.0));
        assert_eq!(done.revision, 3);

        let kinds: Vec<&str> = sink.events().iter().map(|e| e.event.label()).collect();
        assert_eq!(kinds, vec!["created", "discharged"]);

        // Completed sessions keep their bed for the day
        assert_eq!(s.assign_bed("morning", day(6), None).unwrap(), Some(2));
    }

    #[test]
    fn test_mark_missed_on_completed_leaves_session_unchanged() {
        let s = scheduler();
        let session = s.book_patient("P1", day(6), None).unwrap();
        let done = run_to_completion(&s, session.id);

        let err = s.mark_missed(done.id, "No show", None, "nurse").unwrap_err();
        assert!(matches!(err, Error::State(_)));
        assert_eq!(s.session(done.id).unwrap(), done);
    }

    #[test]
    fn test_missed_releases_bed_and_resolve_reclaims_if_free() {
        let (s, sink) = scheduler_with(1, day(6));
        let session = s.book_patient("P1", day(8), None).unwrap();
        let missed = s.mark_missed(session.id, "Transport", Some("no ride"), "nurse").unwrap();
        assert_eq!(missed.status, SessionStatus::Missed);
        assert_eq!(s.assign_bed("morning", day(8), None).unwrap(), Some(1));

        let resolved = s.resolve_missed(session.id, "charge").unwrap();
        assert_eq!(resolved.status, SessionStatus::PreScheduled);
        assert_eq!(resolved.bed_number, Some(1));

        let labels: Vec<&str> = sink.events().iter().map(|e| e.event.label()).collect();
        assert_eq!(labels, vec!["created", "missed", "missed_resolved"]);
    }

    #[test]
    fn test_resolve_missed_clears_taken_bed() {
        let (s, _) = scheduler_with(1, day(6));
        let session = s.book_patient("P1", day(8), None).unwrap();
        s.mark_missed(session.id, "Transport", None, "nurse").unwrap();
        s.book_patient("P2", day(8), None).unwrap();

        let resolved = s.resolve_missed(session.id, "charge").unwrap();
        assert_eq!(resolved.bed_number, None);
        assert_invariants(&s);
    }

    #[test]
    fn test_resolve_missed_on_the_day_needs_a_bed() {
        let (s, _) = scheduler_with(2, day(6));
        let session = s.book_patient("P1", day(8), None).unwrap();
        s.mark_missed(session.id, "Transport", None, "nurse").unwrap();
        s.book_patient("P2", day(8), None).unwrap();

        let s = s.with_clock(FixedClock::on(day(8)));
        let resolved = s.resolve_missed(session.id, "charge").unwrap();
        assert_eq!(resolved.status, SessionStatus::Active);
        assert_eq!(resolved.bed_number, Some(2));
        assert_invariants(&s);
    }

    #[test]
    fn test_resolve_missed_on_the_day_in_full_slot() {
        let (s, _) = scheduler_with(1, day(6));
        let session = s.book_patient("P1", day(8), None).unwrap();
        s.mark_missed(session.id, "Transport", None, "nurse").unwrap();
        s.book_patient("P2", day(8), None).unwrap();

        let s = s.with_clock(FixedClock::on(day(8)));
        assert!(matches!(
            s.resolve_missed(session.id, "charge"),
            Err(Error::CapacityExhausted { .. })
        ));

        let unchanged = s.session(session.id).unwrap();
        assert_eq!(unchanged.status, SessionStatus::Missed);
        assert!(unchanged.missed.as_ref().is_some_and(|m| !m.is_resolved()));
        assert!(matches!(
            s.transition_phase(
                session.id,
                PhaseAction::CompletePreDialysis,
                &patch(
                    FieldGroup::PreDialysis,
                    json!({"preWeight": 60, "preSBP": 140, "preDBP": 85}),
                ),
                None,
            ),
            Err(Error::State(_))
        ));
    }

    #[test]
    fn test_activate_reserved_today() {
        let s = scheduler();
        let session = s.book_patient("P1", day(6), None).unwrap();
        assert!(matches!(s.activate_reserved(session.id), Err(Error::State(_))));

        let (s, _) = scheduler_with(10, day(8));
        let anchor = s.book_patient("P1", day(8), None).unwrap();
        let report = s.generate_recurring_sessions(anchor.id, 7, None).unwrap();
        let future = report.created[0];
        assert!(s.activate_reserved(future).is_err());

        let (s, _) = scheduler_with(10, day(6));
        let reserved = s.book_patient("P2", day(8), None).unwrap();
        let s = s.with_clock(FixedClock::on(day(8)));
        let active = s.activate_reserved(reserved.id).unwrap();
        assert_eq!(active.status, SessionStatus::Active);
        assert_eq!(active.bed_number, Some(1));
    }

    #[test]
    fn test_change_bed_checks_range_and_occupancy() {
        let s = scheduler();
        let a = s.book_patient("P1", day(6), None).unwrap();
        let b = s.book_patient("P2", day(6), None).unwrap();

        assert!(matches!(s.change_bed(a.id, 11, None, "nurse"), Err(Error::Validation(_))));
        assert!(matches!(
            s.change_bed(a.id, b.bed_number.unwrap(), None, "nurse"),
            Err(Error::Conflict {
                kind: ConflictKind::Bed,
                ..
            })
        ));

        let moved = s.change_bed(a.id, 7, Some("afternoon"), "nurse").unwrap();
        assert_eq!(moved.slot_id, "afternoon");
        assert_eq!(moved.bed_number, Some(7));
        assert_invariants(&s);
    }

    #[test]
    fn test_reschedule_moves_and_resolves_missed() {
        let (s, sink) = scheduler_with(10, day(6));
        let session = s.book_patient("P1", day(8), None).unwrap();
        s.mark_missed(session.id, "Sick", None, "nurse").unwrap();

        let target = RescheduleTarget {
            date: day(9),
            slot_id: Some("afternoon".into()),
            bed_number: None,
        };
        let moved = s.reschedule(session.id, &target, "charge").unwrap();
        assert_eq!(moved.date, day(9));
        assert_eq!(moved.slot_id, "afternoon");
        assert_eq!(moved.status, SessionStatus::PreScheduled);
        assert!(moved.missed.as_ref().unwrap().is_resolved());
        assert!(sink.events().iter().any(|e| e.event.label() == "rescheduled"));
    }

    #[test]
    fn test_reschedule_rejects_conflicts_and_started_sessions() {
        let s = scheduler();
        let a = s.book_patient("P1", day(8), None).unwrap();
        s.book_patient("P1", day(10), None).unwrap();

        let onto_existing = RescheduleTarget {
            date: day(10),
            ..Default::default()
        };
        assert!(matches!(
            s.reschedule(a.id, &onto_existing, "charge"),
            Err(Error::Conflict { .. })
        ));

        let past = RescheduleTarget {
            date: day(1),
            ..Default::default()
        };
        assert!(matches!(s.reschedule(a.id, &past, "charge"), Err(Error::Validation(_))));

        let today = s.book_patient("P2", day(6), None).unwrap();
        s.transition_phase(
            today.id,
            PhaseAction::CompletePreDialysis,
            &patch(
                FieldGroup::PreDialysis,
                json!({"preWeight": 60, "preSBP": 140, "preDBP": 85}),
            ),
            None,
        )
        .unwrap();
        let later = RescheduleTarget {
            date: day(7),
            ..Default::default()
        };
        assert!(matches!(s.reschedule(today.id, &later, "charge"), Err(Error::State(_))));
    }

    #[test]
    fn test_force_discharge_frees_patient_day() {
        let s = scheduler();
        let session = s.book_patient("P1", day(6), None).unwrap();
        let discharged = s.force_discharge(session.id, "Transferred", "dr.a").unwrap();
        assert!(discharged.is_discharged);
        assert_eq!(discharged.occupied_bed(), None);

        let rebooked = s.book_patient("P1", day(6), None).unwrap();
        assert_eq!(rebooked.bed_number, Some(1));
        assert_invariants(&s);
    }

    #[test]
    fn test_archive_and_archive_before() {
        let s = scheduler();
        let done = s.book_patient("P1", day(6), None).unwrap();
        run_to_completion(&s, done.id);
        let missed = s.book_patient("P2", day(7), None).unwrap();
        s.mark_missed(missed.id, "No show", None, "nurse").unwrap();
        let waiting = s.book_patient("P3", day(7), None).unwrap();

        let archived = s.archive_before(day(8), "clerk").unwrap();
        let ids: Vec<Uuid> = archived.iter().map(|s| s.id).collect();
        assert!(ids.contains(&done.id));
        assert!(ids.contains(&missed.id));
        assert!(!ids.contains(&waiting.id));
        assert_eq!(s.archived_sessions().unwrap().len(), 2);

        assert!(matches!(s.archive_session(done.id, "clerk"), Err(Error::State(_))));
        s.archive_session(waiting.id, "clerk").unwrap();
    }

    #[test]
    fn test_archive_rejected_mid_treatment() {
        let s = scheduler();
        let session = s.book_patient("P1", day(6), None).unwrap();
        s.transition_phase(
            session.id,
            PhaseAction::CompletePreDialysis,
            &patch(
                FieldGroup::PreDialysis,
                json!({"preWeight": 60, "preSBP": 140, "preDBP": 85}),
            ),
            None,
        )
        .unwrap();
        assert!(matches!(s.archive_session(session.id, "clerk"), Err(Error::State(_))));
    }

    #[test]
    fn test_locked_fields_accept_only_audited_corrections() {
        let (s, sink) = scheduler_with(10, day(6));
        let session = s.book_patient("P1", day(6), None).unwrap();
        let done = run_to_completion(&s, session.id);

        let edit = patch(FieldGroup::PreDialysis, json!({"preWeight": 61}));
        assert!(s
            .transition_phase(done.id, PhaseAction::SavePreDialysis, &edit, None)
            .is_err());

        let (corrected, correction) = s
            .correct_locked_fields(done.id, &edit, "dr.b", "scale error")
            .unwrap();
        assert_eq!(corrected.pre.weight, Some(61.0));
        assert_eq!(corrected.weight_loss, Some(3.0));
        assert_eq!(corrected.phase, Phase::Completed);
        assert_eq!(correction.changes[0].field, Field::PreWeight.name());
        assert!(sink.events().iter().any(|e| e.event.label() == "corrected"));

        s.archive_session(done.id, "clerk").unwrap();
        s.correct_locked_fields(done.id, &edit, "dr.b", "again").unwrap();
    }

    #[test]
    fn test_stale_revision_rejected() {
        let s = scheduler();
        let session = s.book_patient("P1", day(6), None).unwrap();
        let save = patch(FieldGroup::PreDialysis, json!({"preNotes": "stable"}));
        let saved = s
            .transition_phase(session.id, PhaseAction::SavePreDialysis, &save, Some(0))
            .unwrap();
        assert_eq!(saved.revision, 1);

        let err = s
            .transition_phase(session.id, PhaseAction::SavePreDialysis, &save, Some(0))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Conflict {
                kind: ConflictKind::Revision,
                ..
            }
        ));
    }

    #[test]
    fn test_equipment_alert_does_not_block() {
        let mut patients = MemoryPatientDirectory::new();
        let mut worn = prescription("P1");
        worn.equipment.dialyser_reuse_count = 12;
        patients.insert(worn);
        let sink = Arc::new(MemoryActivitySink::new());
        let s = Scheduler::new(
            MemorySessionStore::new(),
            patients,
            ConfiguredSlots::new(vec![slot("morning", 10)]),
            SharedSink(Arc::clone(&sink)),
        )
        .with_clock(FixedClock::on(day(6)))
        .with_equipment_monitor(ReuseThresholds {
            dialyser_max_reuse: 10,
            blood_tubing_max_reuse: 5,
        });

        s.book_patient("P1", day(6), None).unwrap();
        let labels: Vec<&str> = sink.events().iter().map(|e| e.event.label()).collect();
        assert_eq!(labels, vec!["created", "equipment_alert"]);
    }

    #[test]
    fn test_inactive_slot_refuses_booking() {
        let mut off = slot("morning", 10);
        off.active = false;
        let mut patients = MemoryPatientDirectory::new();
        patients.insert(prescription("P1"));
        let s = Scheduler::new(
            MemorySessionStore::new(),
            patients,
            ConfiguredSlots::new(vec![off]),
            MemoryActivitySink::new(),
        );
        assert!(matches!(s.book_patient("P1", day(6), None), Err(Error::State(_))));
    }

    #[test]
    fn test_concurrent_creators_one_session() {
        let s = Arc::new(scheduler());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let s = Arc::clone(&s);
                std::thread::spawn(move || s.book_patient("P1", day(9), None))
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let ok = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(ok, 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, Error::Conflict { .. })));
        assert_eq!(s.sessions_on(day(9)).unwrap().len(), 1);
    }

    #[test]
    fn test_concurrent_bookings_get_distinct_beds() {
        let (s, _) = scheduler_with(10, day(6));
        let s = Arc::new(s);
        let handles: Vec<_> = ["P1", "P2", "P3"]
            .into_iter()
            .map(|p| {
                let s = Arc::clone(&s);
                std::thread::spawn(move || s.book_patient(p, day(9), None).unwrap())
            })
            .collect();
        let mut beds: Vec<u32> = handles
            .into_iter()
            .map(|h| h.join().unwrap().bed_number.unwrap())
            .collect();
        beds.sort_unstable();
        assert_eq!(beds, vec![1, 2, 3]);
        assert_invariants(&s);
    }

    #[test]
    fn test_occupancy_grid_statuses() {
        let s = scheduler();
        let done = s.book_patient("P1", day(6), None).unwrap();
        run_to_completion(&s, done.id);
        s.book_patient("P2", day(6), None).unwrap();

        let grid = s.occupancy_grid("morning", day(6)).unwrap();
        assert_eq!(grid.len(), 10);
        assert_eq!(grid[0].status, allocator::BedStatus::Completed);
        assert_eq!(grid[1].status, allocator::BedStatus::Occupied);
        assert_eq!(grid[2].status, allocator::BedStatus::Available);

        s.book_patient("P3", day(7), None).unwrap();
        let tomorrow = s.occupancy_grid("morning", day(7)).unwrap();
        assert_eq!(tomorrow[0].status, allocator::BedStatus::PreScheduled);
    }
}
