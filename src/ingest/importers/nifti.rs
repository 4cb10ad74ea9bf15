use chrono::NaiveDate;
use rusqlite::Connection;
use serde::Serialize;
use std::path::Path;

use super::{ImportOutcome, SkipReason};
use crate::error::{Result, ScanlineageError};
use crate::ingest::db_writer;
use crate::ingest::metadata::{parse_file_type_tags, NiftiPathInfo};
use crate::ingest::walker::discover_entries;

/// Participant and scan date a NIfTI tree belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NiftiContext {
    pub participant_id: String,
    pub scan_date: NaiveDate,
}

impl NiftiContext {
    pub fn new(participant_id: impl Into<String>, scan_date: NaiveDate) -> Self {
        Self {
            participant_id: participant_id.into(),
            scan_date,
        }
    }
}

/// Parse a scan date given as `YYYY-MM-DD` or `DD.MM.YYYY`
pub fn parse_scan_date(value: &str) -> Result<NaiveDate> {
    let value = value.trim();
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(value, "%d.%m.%Y"))
        .map_err(|_| {
            ScanlineageError::InvalidInput(format!(
                "scan date '{}' is neither YYYY-MM-DD nor DD.MM.YYYY",
                value
            ))
        })
}

/// Link a NIfTI file through its `<session>/<sequence>/<repetition>/<file>.nii`
/// location.
///
/// Every parent of the chain must already be registered; the first missing
/// one skips the file without writing anything.
pub fn import(conn: &Connection, path: &Path, context: Option<&NiftiContext>) -> Result<ImportOutcome> {
    let info = match NiftiPathInfo::parse(path) {
        Ok(info) => info,
        Err(e) => {
            log::warn!("Skipping NIfTI {}: {}", path.display(), e);
            return Ok(ImportOutcome::Skipped(SkipReason::PathConvention(e)));
        }
    };

    let Some(context) = context else {
        log::info!("Skipping NIfTI {}: no participant id / scan date given", path.display());
        return Ok(ImportOutcome::Skipped(SkipReason::MissingContext));
    };

    let repetition_id = match resolve_repetition(conn, context, &info)? {
        Ok(id) => id,
        Err(link) => {
            log::info!("Skipping NIfTI {}: no matching {}", path.display(), link);
            return Ok(ImportOutcome::Skipped(SkipReason::UnresolvedChain(link)));
        }
    };

    let tags = parse_file_type_tags(&info.file_stem);
    if db_writer::insert_nifti(conn, path, repetition_id, &tags.prefix_type, &tags.postfix_type)? {
        log::debug!(
            "Linked NIfTI {} to repetition {} ({} / {})",
            path.display(),
            repetition_id,
            tags.prefix_type,
            tags.postfix_type
        );
    }

    Ok(ImportOutcome::Linked { repetition_id })
}

/// Walk scan → session → sequence → repetition; the inner error names the
/// first link that did not resolve
fn resolve_repetition(
    conn: &Connection,
    context: &NiftiContext,
    info: &NiftiPathInfo,
) -> Result<std::result::Result<i64, &'static str>> {
    let Some(scan_id) = db_writer::find_scan(conn, &context.participant_id, context.scan_date)? else {
        return Ok(Err("scan"));
    };
    let Some(session_id) = db_writer::find_session(conn, scan_id, info.session)? else {
        return Ok(Err("session"));
    };

    let sequence_types = db_writer::find_sequence_types(conn, &info.sequence)?;
    let Some(&sequence_type_id) = sequence_types.first() else {
        return Ok(Err("sequence type"));
    };
    if sequence_types.len() > 1 {
        log::warn!(
            "{} sequence types are named '{}', using the lowest id {}",
            sequence_types.len(),
            info.sequence,
            sequence_type_id
        );
    }

    let Some(sequence_id) = db_writer::find_sequence(conn, session_id, sequence_type_id)? else {
        return Ok(Err("sequence"));
    };
    let Some(repetition_id) = db_writer::find_repetition(conn, sequence_id, info.repetition)? else {
        return Ok(Err("repetition"));
    };
    Ok(Ok(repetition_id))
}

/// Counts from one standalone NIfTI import
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NiftiImportSummary {
    pub files: usize,
    pub linked: usize,
    pub skipped: usize,
}

/// Import every `*.nii` file below `folder` for one participant and scan date.
///
/// Files are not content-sniffed here; the lowercase `.nii` extension selects
/// them, matching the path convention.
pub fn import_nifti_folder(
    conn: &Connection,
    folder: &Path,
    context: &NiftiContext,
) -> Result<NiftiImportSummary> {
    let mut summary = NiftiImportSummary::default();

    for path in discover_entries(folder)? {
        let is_nii = path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("nii");
        if !is_nii {
            continue;
        }

        summary.files += 1;
        match import(conn, &path, Some(context))? {
            ImportOutcome::Linked { .. } => summary.linked += 1,
            ImportOutcome::Skipped(_) => summary.skipped += 1,
        }
    }

    log::info!(
        "NIfTI import of {}: {} files, {} linked, {} skipped",
        folder.display(),
        summary.files,
        summary.linked,
        summary.skipped
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::metadata::PathConventionError;
    use crate::test_support::{
        count, insert_duplicate_sequence_type, migrated_conn, nifti1_bytes, register_chain, write_file,
    };
    use tempfile::TempDir;

    fn p1_context() -> NiftiContext {
        NiftiContext::new("P1", NaiveDate::from_ymd_opt(2020, 1, 1).unwrap())
    }

    #[test]
    fn test_parse_scan_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2020, 1, 31).unwrap();
        assert_eq!(parse_scan_date("2020-01-31").unwrap(), expected);
        assert_eq!(parse_scan_date("31.01.2020").unwrap(), expected);
        assert!(matches!(parse_scan_date("01/31/2020"), Err(ScanlineageError::InvalidInput(_))));
    }

    #[test]
    fn test_registered_chain_creates_one_record() {
        let (conn, _tmp) = migrated_conn();
        let repetition = register_chain(&conn, "P1", "2020-01-01", 3, "SEQ_A", 2);
        let path = Path::new("/data/P1/03/SEQ_A/2/run-01_typeX.nii");

        let outcome = import(&conn, path, Some(&p1_context())).unwrap();
        assert_eq!(outcome, ImportOutcome::Linked { repetition_id: repetition });

        let (stored_rep, result_type, output_type): (i64, String, String) = conn
            .query_row(
                "SELECT repetition_id, result_type, output_type FROM nifti WHERE path = ?1",
                [path.to_string_lossy().to_string()],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .unwrap();
        assert_eq!(stored_rep, repetition);
        assert_eq!(result_type, "unknown");
        assert_eq!(output_type, "typeX");

        import(&conn, path, Some(&p1_context())).unwrap();
        assert_eq!(count(&conn, "nifti"), 1);
    }

    #[test]
    fn test_missing_parent_creates_nothing() {
        let (conn, _tmp) = migrated_conn();
        register_chain(&conn, "P1", "2020-01-01", 3, "SEQ_A", 1);

        let cases = [
            ("/data/P1/03/SEQ_A/2/run-01_typeX.nii", "repetition"),
            ("/data/P1/04/SEQ_A/1/run-01_typeX.nii", "session"),
            ("/data/P1/03/SEQ_B/1/run-01_typeX.nii", "sequence type"),
        ];
        for (path, link) in cases {
            assert_eq!(
                import(&conn, Path::new(path), Some(&p1_context())).unwrap(),
                ImportOutcome::Skipped(SkipReason::UnresolvedChain(link))
            );
        }

        let other_day = NiftiContext::new("P1", NaiveDate::from_ymd_opt(2020, 1, 2).unwrap());
        assert_eq!(
            import(&conn, Path::new("/data/P1/03/SEQ_A/1/x.nii"), Some(&other_day)).unwrap(),
            ImportOutcome::Skipped(SkipReason::UnresolvedChain("scan"))
        );
        assert_eq!(count(&conn, "nifti"), 0);
    }

    #[test]
    fn test_sequence_registered_in_another_session_is_unresolved() {
        let (conn, _tmp) = migrated_conn();
        register_chain(&conn, "P1", "2020-01-01", 3, "SEQ_A", 2);
        register_chain(&conn, "P1", "2020-01-01", 4, "SEQ_B", 2);

        assert_eq!(
            import(&conn, Path::new("/data/4/SEQ_A/2/x.nii"), Some(&p1_context())).unwrap(),
            ImportOutcome::Skipped(SkipReason::UnresolvedChain("sequence"))
        );
    }

    #[test]
    fn test_non_integer_segments_skip() {
        let (conn, _tmp) = migrated_conn();
        register_chain(&conn, "P1", "2020-01-01", 3, "SEQ_A", 2);

        let outcome = import(&conn, Path::new("/data/three/SEQ_A/2/x.nii"), Some(&p1_context())).unwrap();
        assert!(matches!(
            outcome,
            ImportOutcome::Skipped(SkipReason::PathConvention(PathConventionError::NotAnInteger { .. }))
        ));
    }

    #[test]
    fn test_without_context_the_file_is_skipped() {
        let (conn, _tmp) = migrated_conn();
        register_chain(&conn, "P1", "2020-01-01", 3, "SEQ_A", 2);

        assert_eq!(
            import(&conn, Path::new("/data/03/SEQ_A/2/x.nii"), None).unwrap(),
            ImportOutcome::Skipped(SkipReason::MissingContext)
        );
        assert_eq!(count(&conn, "nifti"), 0);
    }

    #[test]
    fn test_duplicate_sequence_types_use_lowest_id() {
        let (conn, _tmp) = migrated_conn();
        let repetition = register_chain(&conn, "P1", "2020-01-01", 3, "SEQ_A", 2);
        let duplicate = insert_duplicate_sequence_type(&conn, "SEQ_A");
        assert!(duplicate > 1);

        let outcome = import(&conn, Path::new("/data/03/SEQ_A/2/x.nii"), Some(&p1_context())).unwrap();
        assert_eq!(outcome, ImportOutcome::Linked { repetition_id: repetition });
    }

    #[test]
    fn test_import_nifti_folder() {
        let (conn, _tmp) = migrated_conn();
        register_chain(&conn, "P1", "2020-01-01", 3, "SEQ_A", 2);
        let files = TempDir::new().unwrap();
        let root = files.path();
        write_file(&root.join("03/SEQ_A/2/c1PR_s-01_T1.nii"), &nifti1_bytes());
        write_file(&root.join("03/SEQ_A/2/run-01_typeX.nii"), &nifti1_bytes());
        write_file(&root.join("03/SEQ_A/9/run-01_typeX.nii"), &nifti1_bytes());
        write_file(&root.join("03/SEQ_A/2/notes.txt"), b"not an image");
        write_file(&root.join("03/SEQ_A/2/run-02_typeX.NII"), &nifti1_bytes());

        let summary = import_nifti_folder(&conn, root, &p1_context()).unwrap();
        assert_eq!(
            summary,
            NiftiImportSummary {
                files: 3,
                linked: 2,
                skipped: 1
            }
        );

        let prefix: String = conn
            .query_row(
                "SELECT result_type FROM nifti WHERE path LIKE '%c1PR_s-01_T1.nii'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(prefix, "c1");
        assert_eq!(count(&conn, "nifti"), 2);
    }
}
