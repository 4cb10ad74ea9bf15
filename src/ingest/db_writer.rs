//! Row-level writes and lookups for the acquisition chain.
//!
//! Every `get_or_create_*` is an `INSERT OR IGNORE` against the unique
//! constraints of migration 002 followed by a select on the same natural
//! key. `find_*` functions only read and are used where parents must
//! already exist.

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

use crate::error::{Result, ScanlineageError};
use crate::formats::dicom::SequenceTypeInfo;
use crate::ingest::classifier::FileType;

/// Stored form of a file path; it must reopen the same file later
pub(crate) fn path_key(path: &Path) -> Result<&str> {
    path.to_str().ok_or_else(|| {
        ScanlineageError::InvalidInput(format!("path is not valid UTF-8: {}", path.display()))
    })
}

/// Record that `path` was seen by `step_id`.
///
/// Re-visiting a path within the same step refreshes its type and copy flag;
/// a repetition already known for the row is kept when none is given.
pub fn record_data_file(
    conn: &Connection,
    path: &Path,
    file_type: FileType,
    is_copy: bool,
    step_id: i64,
    repetition_id: Option<i64>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO data_file (path, type, is_copy, processing_step_id, repetition_id)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(path, processing_step_id) DO UPDATE SET
            type = excluded.type,
            is_copy = excluded.is_copy,
            repetition_id = COALESCE(excluded.repetition_id, data_file.repetition_id)",
        params![path_key(path)?, file_type.as_str(), is_copy, step_id, repetition_id],
    )?;
    Ok(())
}

fn gender_from_sex(sex: Option<&str>) -> &'static str {
    match sex.map(|s| s.trim().to_ascii_uppercase()).as_deref() {
        Some("M") => "male",
        Some("F") => "female",
        Some("O") => "other",
        _ => "unknown",
    }
}

/// Register a participant; an existing row is left untouched
pub fn get_or_create_participant(
    conn: &Connection,
    participant_id: &str,
    sex: Option<&str>,
    birthdate: Option<NaiveDate>,
) -> Result<()> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO participant (id, gender, birthdate) VALUES (?1, ?2, ?3)",
        params![participant_id, gender_from_sex(sex), birthdate],
    )?;
    if inserted > 0 {
        log::debug!("Created participant {}", participant_id);
    }
    Ok(())
}

pub fn get_or_create_scan(conn: &Connection, participant_id: &str, date: NaiveDate) -> Result<i64> {
    conn.execute(
        "INSERT OR IGNORE INTO scan (date, role, comment, participant_id) VALUES (?1, 'U', '', ?2)",
        params![date, participant_id],
    )?;
    Ok(conn.query_row(
        "SELECT id FROM scan WHERE participant_id = ?1 AND date = ?2",
        params![participant_id, date],
        |row| row.get(0),
    )?)
}

pub fn get_or_create_session(conn: &Connection, scan_id: i64, value: i64) -> Result<i64> {
    conn.execute(
        "INSERT OR IGNORE INTO session (scan_id, value) VALUES (?1, ?2)",
        params![scan_id, value],
    )?;
    Ok(conn.query_row(
        "SELECT id FROM session WHERE scan_id = ?1 AND value = ?2",
        params![scan_id, value],
        |row| row.get(0),
    )?)
}

const SEQUENCE_TYPE_MATCH: &str = "name IS ?1
    AND manufacturer IS ?2
    AND manufacturer_model_name IS ?3
    AND institution_name IS ?4
    AND slice_thickness IS ?5
    AND repetition_time IS ?6
    AND echo_time IS ?7
    AND echo_number IS ?8
    AND number_of_phase_encoding_steps IS ?9
    AND percent_phase_field_of_view IS ?10
    AND pixel_bandwidth IS ?11
    AND flip_angle IS ?12
    AND rows IS ?13
    AND columns IS ?14
    AND magnetic_field_strength IS ?15
    AND space_between_slices IS ?16
    AND echo_train_length IS ?17
    AND percent_sampling IS ?18
    AND pixel_spacing_0 IS ?19
    AND pixel_spacing_1 IS ?20";

/// Get or create the sequence_type row matching every acquisition parameter.
///
/// The table has no unique constraint, so the insert is guarded by
/// `WHERE NOT EXISTS` in the same statement; the lowest matching id wins.
pub fn get_or_create_sequence_type(conn: &Connection, info: &SequenceTypeInfo) -> Result<i64> {
    let (spacing_0, spacing_1) = match info.pixel_spacing {
        Some((row, col)) => (Some(row), Some(col)),
        None => (None, None),
    };
    let values = params![
        info.name,
        info.manufacturer,
        info.manufacturer_model_name,
        info.institution_name,
        info.slice_thickness,
        info.repetition_time,
        info.echo_time,
        info.echo_number,
        info.number_of_phase_encoding_steps,
        info.percent_phase_field_of_view,
        info.pixel_bandwidth,
        info.flip_angle,
        info.rows,
        info.columns,
        info.magnetic_field_strength,
        info.space_between_slices,
        info.echo_train_length,
        info.percent_sampling,
        spacing_0,
        spacing_1,
    ];

    let inserted = conn.execute(
        &format!(
            "INSERT INTO sequence_type (
                name, manufacturer, manufacturer_model_name, institution_name,
                slice_thickness, repetition_time, echo_time, echo_number,
                number_of_phase_encoding_steps, percent_phase_field_of_view,
                pixel_bandwidth, flip_angle, rows, columns, magnetic_field_strength,
                space_between_slices, echo_train_length, percent_sampling,
                pixel_spacing_0, pixel_spacing_1
            )
            SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10,
                   ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20
            WHERE NOT EXISTS (SELECT 1 FROM sequence_type WHERE {})",
            SEQUENCE_TYPE_MATCH
        ),
        values,
    )?;

    let id: i64 = conn.query_row(
        &format!("SELECT MIN(id) FROM sequence_type WHERE {}", SEQUENCE_TYPE_MATCH),
        values,
        |row| row.get(0),
    )?;

    if inserted > 0 {
        log::info!("Created sequence type {} '{}'", id, info.name);
    }
    Ok(id)
}

pub fn get_or_create_sequence(conn: &Connection, session_id: i64, sequence_type_id: i64) -> Result<i64> {
    conn.execute(
        "INSERT OR IGNORE INTO sequence (session_id, sequence_type_id) VALUES (?1, ?2)",
        params![session_id, sequence_type_id],
    )?;
    Ok(conn.query_row(
        "SELECT id FROM sequence WHERE session_id = ?1 AND sequence_type_id = ?2",
        params![session_id, sequence_type_id],
        |row| row.get(0),
    )?)
}

pub fn get_or_create_repetition(conn: &Connection, sequence_id: i64, value: i64) -> Result<i64> {
    conn.execute(
        "INSERT OR IGNORE INTO repetition (sequence_id, value) VALUES (?1, ?2)",
        params![sequence_id, value],
    )?;
    Ok(conn.query_row(
        "SELECT id FROM repetition WHERE sequence_id = ?1 AND value = ?2",
        params![sequence_id, value],
        |row| row.get(0),
    )?)
}

/// Insert the `dicom` leaf for `path`; false if the path was already recorded
pub fn insert_dicom(conn: &Connection, path: &Path, repetition_id: i64) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO dicom (repetition_id, path) VALUES (?1, ?2)",
        params![repetition_id, path_key(path)?],
    )?;
    Ok(inserted > 0)
}

pub fn find_scan(conn: &Connection, participant_id: &str, date: NaiveDate) -> Result<Option<i64>> {
    Ok(conn
        .query_row(
            "SELECT id FROM scan WHERE participant_id = ?1 AND date = ?2",
            params![participant_id, date],
            |row| row.get(0),
        )
        .optional()?)
}

pub fn find_session(conn: &Connection, scan_id: i64, value: i64) -> Result<Option<i64>> {
    Ok(conn
        .query_row(
            "SELECT id FROM session WHERE scan_id = ?1 AND value = ?2",
            params![scan_id, value],
            |row| row.get(0),
        )
        .optional()?)
}

/// Ids of every sequence_type named `name`, lowest first
pub fn find_sequence_types(conn: &Connection, name: &str) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare("SELECT id FROM sequence_type WHERE name = ?1 ORDER BY id")?;
    let ids = stmt
        .query_map(params![name], |row| row.get(0))?
        .collect::<std::result::Result<Vec<i64>, _>>()?;
    Ok(ids)
}

pub fn find_sequence(conn: &Connection, session_id: i64, sequence_type_id: i64) -> Result<Option<i64>> {
    Ok(conn
        .query_row(
            "SELECT id FROM sequence WHERE session_id = ?1 AND sequence_type_id = ?2",
            params![session_id, sequence_type_id],
            |row| row.get(0),
        )
        .optional()?)
}

pub fn find_repetition(conn: &Connection, sequence_id: i64, value: i64) -> Result<Option<i64>> {
    Ok(conn
        .query_row(
            "SELECT id FROM repetition WHERE sequence_id = ?1 AND value = ?2",
            params![sequence_id, value],
            |row| row.get(0),
        )
        .optional()?)
}

/// Insert the `nifti` leaf for `path`; false if the path was already recorded
pub fn insert_nifti(
    conn: &Connection,
    path: &Path,
    repetition_id: i64,
    result_type: &str,
    output_type: &str,
) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO nifti (repetition_id, path, result_type, output_type)
         VALUES (?1, ?2, ?3, ?4)",
        params![repetition_id, path_key(path)?, result_type, output_type],
    )?;
    Ok(inserted > 0)
}
