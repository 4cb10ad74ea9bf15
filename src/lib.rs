pub mod config;
pub mod error;
pub mod db;
pub mod formats;
pub mod lineage;
pub mod ingest;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::Config;
pub use error::{ScanlineageError, Result};
pub use ingest::{visit, visit_with_summary, VisitRequest, VisitSummary};
pub use lineage::{create_or_get_provenance, create_or_get_step, create_provenance, ProvenanceFields};
