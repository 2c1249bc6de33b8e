//! Bed allocation within a slot.
//!
//! Each (slot, date) is modelled as a fixed array of `max_beds` entries.
//! Allocation is a first-fit scan from bed 1; the grid view is a pure
//! projection of the same array for display.

use crate::store::SessionBook;
use crate::{Error, Result, Session, SessionStatus, Slot};
use chrono::NaiveDate;
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// Largest bed count a slot may be configured with
pub const MAX_BEDS_PER_SLOT: u32 = 500;

/// Bed array for one slot on one date
#[derive(Clone, Debug)]
pub struct BedMap {
    beds: Vec<Option<Uuid>>,
}

impl BedMap {
    /// Build the array from bed-occupying sessions, skipping `exclude`
    ///
    /// Beds numbered outside `[1, max_beds]` are ignored.
    pub fn build(book: &SessionBook, slot: &Slot, date: NaiveDate, exclude: Option<Uuid>) -> Self {
        let mut beds = vec![None; slot.max_beds as usize];
        for session in book.in_slot(&slot.id, date) {
            if Some(session.id) == exclude {
                continue;
            }
            if let Some(bed) = session.occupied_bed() {
                let idx = bed as usize;
                if idx >= 1 && idx <= beds.len() && beds[idx - 1].is_none() {
                    beds[idx - 1] = Some(session.id);
                }
            }
        }
        Self { beds }
    }

    pub fn capacity(&self) -> u32 {
        self.beds.len() as u32
    }

    pub fn occupant(&self, bed_number: u32) -> Option<Uuid> {
        let idx = bed_number as usize;
        if idx == 0 || idx > self.beds.len() {
            return None;
        }
        self.beds[idx - 1]
    }

    /// Lowest-numbered free bed
    pub fn first_free(&self) -> Option<u32> {
        self.beds
            .iter()
            .position(|b| b.is_none())
            .map(|idx| idx as u32 + 1)
    }

    pub fn occupied_count(&self) -> usize {
        self.beds.iter().filter(|b| b.is_some()).count()
    }
}

/// First free bed in `slot` on `date`, ignoring `exclude`
pub fn assign_bed(
    book: &SessionBook,
    slot: &Slot,
    date: NaiveDate,
    exclude: Option<Uuid>,
) -> Option<u32> {
    let bed = BedMap::build(book, slot, date, exclude).first_free();
    match bed {
        Some(n) => tracing::debug!("Slot {} on {}: bed {} is free", slot.id, date, n),
        None => tracing::debug!("Slot {} on {}: all {} beds taken", slot.id, date, slot.max_beds),
    }
    bed
}

/// Reject bed numbers outside the slot's capacity
pub fn check_bed_in_range(slot: &Slot, bed_number: u32) -> Result<()> {
    if bed_number == 0 || bed_number > slot.max_beds {
        return Err(Error::Validation(format!(
            "bed {} is outside slot {} capacity (1..={})",
            bed_number, slot.id, slot.max_beds
        )));
    }
    Ok(())
}

/// Display status of one bed in the occupancy grid
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum BedStatus {
    Available,
    Occupied,
    PreScheduled,
    Completed,
}

impl fmt::Display for BedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BedStatus::Available => "available",
            BedStatus::Occupied => "occupied",
            BedStatus::PreScheduled => "pre-scheduled",
            BedStatus::Completed => "completed",
        };
        f.write_str(s)
    }
}

/// One bed in the occupancy grid
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct BedCell {
    pub bed_number: u32,
    pub status: BedStatus,
    pub session_id: Option<Uuid>,
    pub patient_id: Option<String>,
}

fn bed_status(session: &Session, today: NaiveDate) -> BedStatus {
    match session.status {
        SessionStatus::Completed => BedStatus::Completed,
        SessionStatus::PreScheduled => BedStatus::PreScheduled,
        _ if session.date > today => BedStatus::PreScheduled,
        _ => BedStatus::Occupied,
    }
}

/// Per-bed status for `slot` on `date`
pub fn occupancy_grid(
    book: &SessionBook,
    slot: &Slot,
    date: NaiveDate,
    today: NaiveDate,
) -> Vec<BedCell> {
    let map = BedMap::build(book, slot, date, None);
    (1..=map.capacity())
        .map(|bed| match map.occupant(bed).and_then(|id| book.get(id)) {
            Some(session) => BedCell {
                bed_number: bed,
                status: bed_status(session, today),
                session_id: Some(session.id),
                patient_id: Some(session.patient_id.clone()),
            },
            None => BedCell {
                bed_number: bed,
                status: BedStatus::Available,
                session_id: None,
                patient_id: None,
            },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Prescription;
    use chrono::{NaiveTime, Utc};

    fn slot(max_beds: u32) -> Slot {
        Slot {
            id: "morning".into(),
            name: "Morning".into(),
            start: NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(11, 0, 0).unwrap(),
            max_beds,
            active: true,
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 6).unwrap()
    }

    fn session(patient: &str, bed: u32, date: NaiveDate, today: NaiveDate) -> Session {
        let p = Prescription {
            patient_id: patient.into(),
            patient_name: String::new(),
            recurrence: "daily".into(),
            anchor_date: date,
            preferred_slot: "morning".into(),
            treatment: Default::default(),
            equipment: Default::default(),
        };
        let mut s = Session::from_prescription(&p, date, "morning", today, Utc::now());
        s.bed_number = Some(bed);
        s
    }

    #[test]
    fn test_first_fit_fills_gaps() {
        let mut book = SessionBook::new();
        book.put(session("P1", 1, date(), date()));
        book.put(session("P2", 3, date(), date()));

        assert_eq!(assign_bed(&book, &slot(4), date(), None), Some(2));
    }

    #[test]
    fn test_full_slot_returns_none() {
        let mut book = SessionBook::new();
        for i in 1..=10 {
            book.put(session(&format!("P{}", i), i, date(), date()));
        }
        assert_eq!(assign_bed(&book, &slot(10), date(), None), None);
    }

    #[test]
    fn test_exclude_frees_own_bed() {
        let mut book = SessionBook::new();
        let s = session("P1", 1, date(), date());
        let id = s.id;
        book.put(s);

        assert_eq!(assign_bed(&book, &slot(1), date(), None), None);
        assert_eq!(assign_bed(&book, &slot(1), date(), Some(id)), Some(1));
    }

    #[test]
    fn test_missed_session_releases_bed() {
        let mut book = SessionBook::new();
        let mut s = session("P1", 1, date(), date());
        s.status = SessionStatus::Missed;
        book.put(s);
        assert_eq!(assign_bed(&book, &slot(1), date(), None), Some(1));
    }

    #[test]
    fn test_out_of_range_beds_ignored() {
        let mut book = SessionBook::new();
        book.put(session("P1", 7, date(), date()));
        let map = BedMap::build(&book, &slot(5), date(), None);
        assert_eq!(map.occupied_count(), 0);
        assert!(check_bed_in_range(&slot(5), 7).is_err());
        assert!(check_bed_in_range(&slot(5), 0).is_err());
        assert!(check_bed_in_range(&slot(5), 5).is_ok());
    }

    #[test]
    fn test_occupancy_grid_statuses() {
        let today = date();
        let tomorrow = today.succ_opt().unwrap();
        let mut book = SessionBook::new();

        book.put(session("P1", 1, today, today));
        let mut done = session("P2", 2, today, today);
        done.status = SessionStatus::Completed;
        done.is_discharged = true;
        book.put(done);

        let grid = occupancy_grid(&book, &slot(3), today, today);
        let statuses: Vec<_> = grid.iter().map(|c| c.status).collect();
        assert_eq!(
            statuses,
            vec![BedStatus::Occupied, BedStatus::Completed, BedStatus::Available]
        );
        assert_eq!(grid[0].patient_id.as_deref(), Some("P1"));

        let mut future = SessionBook::new();
        future.put(session("P3", 1, tomorrow, today));
        let grid = occupancy_grid(&future, &slot(2), tomorrow, today);
        assert_eq!(grid[0].status, BedStatus::PreScheduled);
    }
}
