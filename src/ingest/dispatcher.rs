//! Folder walk: classify every entry, flag copies of the previous step and
//! route recognized files to their importer.

use rusqlite::Connection;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::ingest::classifier::{ContentSniffer, FileType, TypeClassifier};
use crate::ingest::copy_detector::hashes_for_step;
use crate::ingest::db_writer::record_data_file;
use crate::ingest::importers::nifti::NiftiContext;
use crate::ingest::importers::{dicom, nifti, ImportOutcome};
use crate::ingest::metadata::compute_file_hash;
use crate::ingest::walker::discover_entries;
use crate::lineage::create_or_get_step;

/// Parameters of one `visit` invocation
#[derive(Debug, Clone)]
pub struct VisitRequest {
    pub step_name: String,
    pub folder: PathBuf,
    pub provenance_id: i64,
    pub previous_step_id: Option<i64>,
    /// Reuse the first DICOM header of each directory for its siblings
    pub optimize: bool,
    pub nifti_context: Option<NiftiContext>,
}

impl VisitRequest {
    pub fn new(step_name: impl Into<String>, folder: impl Into<PathBuf>, provenance_id: i64) -> Self {
        Self {
            step_name: step_name.into(),
            folder: folder.into(),
            provenance_id,
            previous_step_id: None,
            optimize: true,
            nifti_context: None,
        }
    }

    pub fn previous_step(mut self, previous_step_id: Option<i64>) -> Self {
        self.previous_step_id = previous_step_id;
        self
    }

    pub fn optimize(mut self, optimize: bool) -> Self {
        self.optimize = optimize;
        self
    }

    pub fn nifti_context(mut self, context: Option<NiftiContext>) -> Self {
        self.nifti_context = context;
        self
    }
}

/// What one walk did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VisitSummary {
    pub step_id: i64,
    pub entries: usize,
    pub directories: usize,
    pub dicom: usize,
    pub nifti: usize,
    pub unrecognized: usize,
    pub copies: usize,
    pub linked: usize,
    pub skipped: usize,
    pub memo_hits: usize,
}

/// Directory → repetition resolved from the first DICOM file read there.
///
/// Lives for one walk; never persisted.
#[derive(Debug, Default)]
pub struct DirectoryMemo {
    entries: HashMap<PathBuf, i64>,
}

impl DirectoryMemo {
    pub fn get(&self, dir: &Path) -> Option<i64> {
        self.entries.get(dir).copied()
    }

    pub fn insert(&mut self, dir: &Path, repetition_id: i64) {
        self.entries.insert(dir.to_path_buf(), repetition_id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Walk `request.folder` under a get-or-created processing step.
///
/// Format-level problems skip the file; I/O and database errors stop the
/// walk with everything already written left in place.
pub fn visit_folder<S: ContentSniffer>(
    conn: &Connection,
    request: &VisitRequest,
    classifier: &TypeClassifier<S>,
) -> Result<VisitSummary> {
    let entries = discover_entries(&request.folder)?;

    let step_id = create_or_get_step(
        conn,
        &request.step_name,
        request.provenance_id,
        request.previous_step_id,
    )?;
    let previous_hashes = hashes_for_step(conn, request.previous_step_id)?;

    let mut summary = VisitSummary {
        step_id,
        ..Default::default()
    };
    let mut memo = DirectoryMemo::default();

    for path in &entries {
        summary.entries += 1;

        let file_type = classifier.classify(path)?;
        match file_type {
            FileType::NotAFile => {
                summary.directories += 1;
                continue;
            }
            FileType::Unrecognized => {
                summary.unrecognized += 1;
                continue;
            }
            FileType::Dicom => summary.dicom += 1,
            FileType::Nifti => summary.nifti += 1,
        }

        let is_copy = matches_previous_step(path, &previous_hashes)?;
        let outcome = match file_type {
            FileType::Dicom => import_dicom(conn, path, request.optimize, &mut memo, &mut summary)?,
            FileType::Nifti => nifti::import(conn, path, request.nifti_context.as_ref())?,
            FileType::NotAFile | FileType::Unrecognized => continue,
        };

        record_data_file(conn, path, file_type, is_copy, step_id, outcome.repetition_id())?;

        if is_copy {
            summary.copies += 1;
        }
        match outcome {
            ImportOutcome::Linked { .. } => summary.linked += 1,
            ImportOutcome::Skipped(reason) => {
                log::debug!("Not linked {}: {}", path.display(), reason);
                summary.skipped += 1;
            }
        }
    }

    log::info!(
        "Step {} '{}' visited {}: {} entries, {} DICOM, {} NIfTI, {} unrecognized, {} copies, {} linked, {} skipped ({} memo hits)",
        step_id,
        request.step_name,
        request.folder.display(),
        summary.entries,
        summary.dicom,
        summary.nifti,
        summary.unrecognized,
        summary.copies,
        summary.linked,
        summary.skipped,
        summary.memo_hits
    );
    Ok(summary)
}

fn matches_previous_step(path: &Path, previous_hashes: &HashSet<String>) -> Result<bool> {
    if previous_hashes.is_empty() {
        return Ok(false);
    }
    Ok(previous_hashes.contains(&compute_file_hash(path)?))
}

fn import_dicom(
    conn: &Connection,
    path: &Path,
    optimize: bool,
    memo: &mut DirectoryMemo,
    summary: &mut VisitSummary,
) -> Result<ImportOutcome> {
    if !optimize {
        return dicom::import(conn, path);
    }

    let Some(dir) = path.parent() else {
        return dicom::import(conn, path);
    };

    if let Some(repetition_id) = memo.get(dir) {
        summary.memo_hits += 1;
        dicom::record_file(conn, path, repetition_id)?;
        return Ok(ImportOutcome::Linked { repetition_id });
    }

    let outcome = dicom::import(conn, path)?;
    if let ImportOutcome::Linked { repetition_id } = outcome {
        memo.insert(dir, repetition_id);
    }
    Ok(outcome)
}
