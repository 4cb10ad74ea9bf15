use rusqlite::Connection;
use std::path::Path;

use super::{ImportOutcome, SkipReason};
use crate::error::Result;
use crate::formats::dicom::{self, DicomError, DicomHeader};
use crate::ingest::db_writer;

/// Session value used when StudyID is absent or not an integer
const DEFAULT_SESSION: i64 = 1;

/// Read the header of `path` and link it, creating any missing part of the
/// participant → scan → session → sequence → repetition chain.
///
/// Format problems are skips; I/O errors propagate.
pub fn import(conn: &Connection, path: &Path) -> Result<ImportOutcome> {
    let header = match dicom::read_header(path) {
        Ok(header) => header,
        Err(DicomError::Io(e)) => return Err(e.into()),
        Err(e) => {
            log::warn!("Skipping DICOM {}: {}", path.display(), e);
            return Ok(ImportOutcome::Skipped(SkipReason::MalformedHeader(e.to_string())));
        }
    };

    let repetition_id = link_header(conn, &header)?;
    record_file(conn, path, repetition_id)?;
    Ok(ImportOutcome::Linked { repetition_id })
}

/// Attach `path` to an already resolved repetition without reading it
pub fn record_file(conn: &Connection, path: &Path, repetition_id: i64) -> Result<()> {
    if db_writer::insert_dicom(conn, path, repetition_id)? {
        log::debug!("Linked DICOM {} to repetition {}", path.display(), repetition_id);
    }
    Ok(())
}

fn session_value(header: &DicomHeader) -> i64 {
    header
        .study_id
        .as_deref()
        .and_then(|id| id.trim().parse().ok())
        .unwrap_or(DEFAULT_SESSION)
}

fn link_header(conn: &Connection, header: &DicomHeader) -> Result<i64> {
    db_writer::get_or_create_participant(
        conn,
        &header.patient_id,
        header.patient_sex.as_deref(),
        header.patient_birth_date,
    )?;
    let scan_id = db_writer::get_or_create_scan(conn, &header.patient_id, header.scan_date)?;
    let session_id = db_writer::get_or_create_session(conn, scan_id, session_value(header))?;
    let sequence_type_id = db_writer::get_or_create_sequence_type(conn, &header.sequence_type)?;
    let sequence_id = db_writer::get_or_create_sequence(conn, session_id, sequence_type_id)?;
    db_writer::get_or_create_repetition(conn, sequence_id, header.series_number)
}
