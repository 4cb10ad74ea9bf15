//! Provenance and processing-step lineage.
//!
//! Both entities are identified by their natural key. Creation is an
//! `INSERT OR IGNORE` against the unique indexes of migration 001 followed by
//! a lookup on the same key, so concurrent ingesters converge on one row.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::db::Db;
use crate::error::{Result, ScanlineageError};

/// Origin of a dataset: name plus the toolchain that produced it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProvenanceFields {
    pub dataset: String,
    pub matlab_version: Option<String>,
    pub spm_version: Option<String>,
    pub spm_revision: Option<String>,
    pub fn_called: Option<String>,
    pub fn_version: Option<String>,
    pub others: Option<String>,
}

impl ProvenanceFields {
    pub fn new(dataset: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            ..Default::default()
        }
    }

    /// Empty optional fields are stored as NULL so `Some("")` and `None` share a key
    fn normalized(&self) -> Self {
        let clean = |v: &Option<String>| v.as_ref().filter(|s| !s.trim().is_empty()).cloned();
        Self {
            dataset: self.dataset.trim().to_string(),
            matlab_version: clean(&self.matlab_version),
            spm_version: clean(&self.spm_version),
            spm_revision: clean(&self.spm_revision),
            fn_called: clean(&self.fn_called),
            fn_version: clean(&self.fn_version),
            others: clean(&self.others),
        }
    }
}

/// A processing step row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessingStep {
    pub id: i64,
    pub name: String,
    pub provenance_id: i64,
    pub previous_step_id: Option<i64>,
    pub execution_date: Option<DateTime<Utc>>,
}

/// Create (or get if already exists) a provenance record and return its id
pub fn create_or_get_provenance(conn: &Connection, fields: &ProvenanceFields) -> Result<i64> {
    let fields = fields.normalized();
    if fields.dataset.is_empty() {
        return Err(ScanlineageError::InvalidInput(
            "provenance dataset must not be empty".to_string(),
        ));
    }

    let inserted = conn.execute(
        "INSERT OR IGNORE INTO provenance (
            dataset, matlab_version, spm_version, spm_revision, fn_called, fn_version, others
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            fields.dataset,
            fields.matlab_version,
            fields.spm_version,
            fields.spm_revision,
            fields.fn_called,
            fields.fn_version,
            fields.others,
        ],
    )?;

    let id: i64 = conn.query_row(
        "SELECT id FROM provenance
         WHERE dataset = ?1
           AND IFNULL(matlab_version, '') = IFNULL(?2, '')
           AND IFNULL(spm_version, '') = IFNULL(?3, '')
           AND IFNULL(spm_revision, '') = IFNULL(?4, '')
           AND IFNULL(fn_called, '') = IFNULL(?5, '')
           AND IFNULL(fn_version, '') = IFNULL(?6, '')
           AND IFNULL(others, '') = IFNULL(?7, '')",
        params![
            fields.dataset,
            fields.matlab_version,
            fields.spm_version,
            fields.spm_revision,
            fields.fn_called,
            fields.fn_version,
            fields.others,
        ],
        |row| row.get(0),
    )?;

    if inserted > 0 {
        log::info!("Created provenance {} for dataset '{}'", id, fields.dataset);
    } else {
        log::debug!("Reusing provenance {} for dataset '{}'", id, fields.dataset);
    }

    Ok(id)
}

/// Create (or get if already exists) a processing step and stamp its execution date.
///
/// The step is keyed by `(name, provenance_id, previous_step_id)`; the
/// execution date is refreshed on every call.
pub fn create_or_get_step(
    conn: &Connection,
    name: &str,
    provenance_id: i64,
    previous_step_id: Option<i64>,
) -> Result<i64> {
    if name.trim().is_empty() {
        return Err(ScanlineageError::InvalidInput(
            "processing step name must not be empty".to_string(),
        ));
    }

    let inserted = conn.execute(
        "INSERT OR IGNORE INTO processing_step (name, provenance_id, previous_step_id)
         VALUES (?1, ?2, ?3)",
        params![name, provenance_id, previous_step_id],
    )?;

    let id: i64 = conn.query_row(
        "SELECT id FROM processing_step
         WHERE name = ?1 AND provenance_id = ?2
           AND IFNULL(previous_step_id, 0) = IFNULL(?3, 0)",
        params![name, provenance_id, previous_step_id],
        |row| row.get(0),
    )?;

    conn.execute(
        "UPDATE processing_step SET execution_date = ?1 WHERE id = ?2",
        params![Utc::now(), id],
    )?;

    if inserted > 0 {
        log::info!("Created processing step {} '{}' (previous: {:?})", id, name, previous_step_id);
    } else {
        log::info!("Reusing processing step {} '{}'", id, name);
    }

    Ok(id)
}

/// Load one processing step
pub fn get_step(conn: &Connection, step_id: i64) -> Result<Option<ProcessingStep>> {
    let step = conn
        .query_row(
            "SELECT id, name, provenance_id, previous_step_id, execution_date
             FROM processing_step WHERE id = ?1",
            params![step_id],
            |row| {
                Ok(ProcessingStep {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    provenance_id: row.get(2)?,
                    previous_step_id: row.get(3)?,
                    execution_date: row.get(4)?,
                })
            },
        )
        .optional()?;
    Ok(step)
}

/// Create (or get) a provenance record on its own connection.
///
/// `db_url` falls back to `SCANLINEAGE_DB_URL`, then to the configuration file.
pub fn create_provenance(fields: &ProvenanceFields, db_url: Option<&str>) -> Result<i64> {
    let db = Db::from_url(db_url)?;
    db.session(|conn| create_or_get_provenance(conn, fields))
}
