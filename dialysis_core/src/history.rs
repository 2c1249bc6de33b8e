//! CSV export of archived sessions.
//!
//! Archived sessions are appended to `history.csv`. Headers are written
//! only when the file is new, and sessions already present in the file are
//! skipped, so repeated exports never duplicate rows.

use crate::{Result, Session};
use csv::ReaderBuilder;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::OpenOptions;
use std::path::Path;

/// A row in the history CSV
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct HistoryRow {
    pub id: String,
    pub patient_id: String,
    pub date: String,
    pub slot_id: String,
    pub bed_number: Option<u32>,
    pub phase: String,
    pub status: String,
    pub is_auto_generated: bool,
    pub is_discharged: bool,
    pub pre_weight: Option<f64>,
    pub pre_sbp: Option<i64>,
    pub pre_dbp: Option<i64>,
    pub post_weight: Option<f64>,
    pub post_sbp: Option<i64>,
    pub post_dbp: Option<i64>,
    pub post_access_status: Option<String>,
    pub weight_loss: Option<f64>,
    pub intra_readings: usize,
    pub corrections: usize,
    pub started_at: Option<String>,
    pub actual_end_time: Option<String>,
    pub missed_reason: Option<String>,
    pub discharge_reason: Option<String>,
}

impl From<&Session> for HistoryRow {
    fn from(session: &Session) -> Self {
        HistoryRow {
            id: session.id.to_string(),
            patient_id: session.patient_id.clone(),
            date: session.date.to_string(),
            slot_id: session.slot_id.clone(),
            bed_number: session.bed_number,
            phase: session.phase.to_string(),
            status: session.status.to_string(),
            is_auto_generated: session.is_auto_generated,
            is_discharged: session.is_discharged,
            pre_weight: session.pre.weight,
            pre_sbp: session.pre.sbp,
            pre_dbp: session.pre.dbp,
            post_weight: session.post.weight,
            post_sbp: session.post.sbp,
            post_dbp: session.post.dbp,
            post_access_status: session.post.access_status.clone(),
            weight_loss: session.weight_loss,
            intra_readings: session.intra.len(),
            corrections: session.corrections.len(),
            started_at: session.started_at.map(|t| t.to_rfc3339()),
            actual_end_time: session.actual_end_time.map(|t| t.to_rfc3339()),
            missed_reason: session.missed.as_ref().map(|m| m.reason.clone()),
            discharge_reason: session.discharge_reason.clone(),
        }
    }
}

/// Read every row of a history file; unreadable rows are skipped
pub fn load_history(path: &Path) -> Result<Vec<HistoryRow>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let mut reader = ReaderBuilder::new().has_headers(true).from_path(path)?;
    let mut rows = Vec::new();
    for result in reader.deserialize::<HistoryRow>() {
        match result {
            Ok(row) => rows.push(row),
            Err(e) => {
                tracing::warn!("Failed to deserialize history row: {}", e);
            }
        }
    }
    Ok(rows)
}

/// Append archived sessions not yet in `csv_path`; returns rows written
pub fn export_archived<'a, I>(sessions: I, csv_path: &Path) -> Result<usize>
where
    I: IntoIterator<Item = &'a Session>,
{
    let already: HashSet<String> = load_history(csv_path)?
        .into_iter()
        .map(|row| row.id)
        .collect();

    let pending: Vec<HistoryRow> = sessions
        .into_iter()
        .filter(|s| s.is_moved_to_history)
        .map(HistoryRow::from)
        .filter(|row| !already.contains(&row.id))
        .collect();

    if pending.is_empty() {
        tracing::info!("No new archived sessions to export");
        return Ok(0);
    }

    if let Some(parent) = csv_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(csv_path)?;
    let needs_headers = file.metadata()?.len() == 0;

    let mut writer = csv::WriterBuilder::new()
        .has_headers(needs_headers)
        .from_writer(file);
    for row in &pending {
        writer.serialize(row)?;
    }

    writer.flush()?;
    let file = writer
        .into_inner()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    file.sync_all()?;

    tracing::info!("Exported {} archived sessions to {:?}", pending.len(), csv_path);
    Ok(pending.len())
}
