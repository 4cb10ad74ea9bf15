//! Per-format importers that place a classified file in the acquisition chain.

pub mod dicom;
pub mod nifti;

use std::fmt;

use crate::ingest::metadata::PathConventionError;

/// Result of importing one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportOutcome {
    /// The file's leaf record hangs off this repetition
    Linked { repetition_id: i64 },
    Skipped(SkipReason),
}

impl ImportOutcome {
    pub fn repetition_id(&self) -> Option<i64> {
        match self {
            ImportOutcome::Linked { repetition_id } => Some(*repetition_id),
            ImportOutcome::Skipped(_) => None,
        }
    }
}

/// Why a recognized file was not linked
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    PathConvention(PathConventionError),
    /// NIfTI linkage needs a participant and scan date
    MissingContext,
    /// A parent entity of the chain is not registered
    UnresolvedChain(&'static str),
    MalformedHeader(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::PathConvention(e) => write!(f, "path convention: {}", e),
            SkipReason::MissingContext => write!(f, "no participant id / scan date given"),
            SkipReason::UnresolvedChain(link) => write!(f, "no matching {}", link),
            SkipReason::MalformedHeader(reason) => write!(f, "unreadable header: {}", reason),
        }
    }
}
