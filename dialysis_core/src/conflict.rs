//! Uniqueness checks for bookings.
//!
//! Two rules guard the session book:
//! - one active (not discharged, not archived) session per patient per date
//! - one bed-occupying session per (slot, date, bed)
//!
//! Manual booking only needs the first rule, so a patient can be rebooked
//! after a forced discharge. Recurring generation is stricter: any session
//! on the date, whether treated, discharged or archived, covers it.
//!
//! Both checks take an optional session id to exclude, so an existing
//! session can be edited in place without colliding with itself.

use crate::error::ConflictKind;
use crate::store::SessionBook;
use crate::{Error, Result};
use chrono::NaiveDate;
use uuid::Uuid;

/// Read-only view over a book that answers conflict questions
pub struct ConflictGuard<'a> {
    book: &'a SessionBook,
}

impl<'a> ConflictGuard<'a> {
    pub fn new(book: &'a SessionBook) -> Self {
        Self { book }
    }

    /// Existing active session for this patient on this date
    pub fn patient_date_conflict(
        &self,
        patient_id: &str,
        date: NaiveDate,
        exclude: Option<Uuid>,
    ) -> Option<Uuid> {
        self.book
            .for_patient(patient_id, date)
            .find(|s| s.is_active() && Some(s.id) != exclude)
            .map(|s| s.id)
    }

    /// Any session for this patient on this date, whatever its state
    ///
    /// Active sessions are preferred so the reported id is the one staff
    /// would act on.
    pub fn patient_date_covered(&self, patient_id: &str, date: NaiveDate) -> Option<Uuid> {
        self.patient_date_conflict(patient_id, date, None).or_else(|| {
            self.book
                .for_patient(patient_id, date)
                .next()
                .map(|s| s.id)
        })
    }

    /// Existing session holding this bed in this slot on this date
    pub fn bed_conflict(
        &self,
        slot_id: &str,
        date: NaiveDate,
        bed_number: u32,
        exclude: Option<Uuid>,
    ) -> Option<Uuid> {
        self.book
            .in_slot(slot_id, date)
            .find(|s| s.occupied_bed() == Some(bed_number) && Some(s.id) != exclude)
            .map(|s| s.id)
    }

    pub fn ensure_patient_free(
        &self,
        patient_id: &str,
        date: NaiveDate,
        exclude: Option<Uuid>,
    ) -> Result<()> {
        match self.patient_date_conflict(patient_id, date, exclude) {
            Some(existing) => {
                tracing::debug!(
                    "Patient {} already has session {} on {}",
                    patient_id,
                    existing,
                    date
                );
                Err(Error::Conflict {
                    kind: ConflictKind::PatientDate,
                    existing,
                })
            }
            None => Ok(()),
        }
    }

    /// Fail if generation would add a second session to a covered date
    pub fn ensure_date_uncovered(&self, patient_id: &str, date: NaiveDate) -> Result<()> {
        match self.patient_date_covered(patient_id, date) {
            Some(existing) => {
                tracing::debug!(
                    "Patient {} already has session {} on {}",
                    patient_id,
                    existing,
                    date
                );
                Err(Error::Conflict {
                    kind: ConflictKind::PatientDate,
                    existing,
                })
            }
            None => Ok(()),
        }
    }

    pub fn ensure_bed_free(
        &self,
        slot_id: &str,
        date: NaiveDate,
        bed_number: u32,
        exclude: Option<Uuid>,
    ) -> Result<()> {
        match self.bed_conflict(slot_id, date, bed_number, exclude) {
            Some(existing) => {
                tracing::debug!(
                    "Bed {} in slot {} on {} held by session {}",
                    bed_number,
                    slot_id,
                    date,
                    existing
                );
                Err(Error::Conflict {
                    kind: ConflictKind::Bed,
                    existing,
                })
            }
            None => Ok(()),
        }
    }
}
