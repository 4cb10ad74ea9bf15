pub mod classifier;
pub mod copy_detector;
pub mod db_writer;
pub mod dispatcher;
pub mod importers;
pub mod metadata;
pub mod walker;

pub use classifier::{ContentSniffer, FileType, MagicSniffer, SniffError, TypeClassifier};
pub use copy_detector::hashes_for_step;
pub use dispatcher::{visit_folder, DirectoryMemo, VisitRequest, VisitSummary};
pub use importers::nifti::{import_nifti_folder, parse_scan_date, NiftiContext, NiftiImportSummary};
pub use importers::{ImportOutcome, SkipReason};
pub use metadata::{compute_file_hash, parse_file_type_tags, NiftiPathInfo};
pub use walker::discover_entries;

use crate::db::Db;
use crate::error::Result;

/// Ingest one folder under a processing step and return the step id.
///
/// Opens one connection for the whole walk and closes it before returning,
/// also on error. `db_url` falls back to `SCANLINEAGE_DB_URL`, then to the
/// configuration file.
pub fn visit(request: &VisitRequest, db_url: Option<&str>) -> Result<i64> {
    Ok(visit_with_summary(request, db_url)?.step_id)
}

/// Same as [`visit`], returning the per-walk counts
pub fn visit_with_summary(request: &VisitRequest, db_url: Option<&str>) -> Result<VisitSummary> {
    let db = Db::from_url(db_url)?;
    let classifier = TypeClassifier::new();
    db.session(|conn| visit_folder(conn, request, &classifier))
}

/// Standalone NIfTI import of `folder` on its own connection
pub fn import_nifti(folder: &std::path::Path, context: &NiftiContext, db_url: Option<&str>) -> Result<NiftiImportSummary> {
    let db = Db::from_url(db_url)?;
    db.session(|conn| import_nifti_folder(conn, folder, context))
}
