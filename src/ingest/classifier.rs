//! Content-based file type classification.
//!
//! A [`ContentSniffer`] describes a file's bytes with a human-readable
//! signature string; the [`TypeClassifier`] maps that description onto the
//! closed set of [`FileType`]s, running the NIfTI structural parser when the
//! sniffer only sees generic binary data.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::Path;
use thiserror::Error;

use crate::error::Result;
use crate::formats::nifti::{self, NiftiError};

/// Signature reported for DICOM Part 10 files
pub const DICOM_SIGNATURE: &str = "DICOM medical imaging data";
/// Signature reported for binary content no signature matched
pub const GENERIC_BINARY_SIGNATURE: &str = "data";

const SNIFF_LENGTH: u64 = 8192;

/// Classification of one walked entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileType {
    Dicom,
    Nifti,
    Unrecognized,
    NotAFile,
}

impl FileType {
    /// Label stored in `data_file.type`
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Dicom => "DICOM",
            FileType::Nifti => "NIFTI",
            FileType::Unrecognized => "other",
            FileType::NotAFile => "directory",
        }
    }
}

#[derive(Error, Debug)]
pub enum SniffError {
    #[error("is a directory")]
    IsADirectory,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Describes file content, `file(1)`-style
pub trait ContentSniffer {
    /// Signature string for the file at `path`; directories fail with
    /// [`SniffError::IsADirectory`].
    fn sniff(&self, path: &Path) -> std::result::Result<String, SniffError>;
}

/// Signature sniffer backed by the `infer` magic-number table
#[derive(Debug, Default, Clone, Copy)]
pub struct MagicSniffer;

impl ContentSniffer for MagicSniffer {
    fn sniff(&self, path: &Path) -> std::result::Result<String, SniffError> {
        let metadata = fs::metadata(path)?;
        if metadata.is_dir() {
            return Err(SniffError::IsADirectory);
        }
        // fifos and devices would block or never end
        if !metadata.is_file() {
            return Ok("special file".to_string());
        }

        let mut head = Vec::with_capacity(SNIFF_LENGTH as usize);
        File::open(path)?.take(SNIFF_LENGTH).read_to_end(&mut head)?;

        Ok(describe(&head))
    }
}

fn describe(head: &[u8]) -> String {
    if head.is_empty() {
        return "empty".to_string();
    }

    if let Some(kind) = infer::get(head) {
        if kind.mime_type() == "application/dicom" {
            return DICOM_SIGNATURE.to_string();
        }
        return format!("{} ({})", kind.mime_type(), kind.extension());
    }

    if head.contains(&0) {
        return GENERIC_BINARY_SIGNATURE.to_string();
    }
    match std::str::from_utf8(head) {
        Ok(text) if text.is_ascii() => "ASCII text".to_string(),
        Ok(_) => "UTF-8 Unicode text".to_string(),
        // a multi-byte character cut at the sniff boundary is still text
        Err(e) if e.error_len().is_none() && head.len() as u64 == SNIFF_LENGTH => {
            "UTF-8 Unicode text".to_string()
        }
        Err(_) => GENERIC_BINARY_SIGNATURE.to_string(),
    }
}

/// Maps sniffed signatures onto [`FileType`]s
#[derive(Debug, Default, Clone)]
pub struct TypeClassifier<S = MagicSniffer> {
    sniffer: S,
}

impl TypeClassifier<MagicSniffer> {
    pub fn new() -> Self {
        Self { sniffer: MagicSniffer }
    }
}

impl<S: ContentSniffer> TypeClassifier<S> {
    pub fn with_sniffer(sniffer: S) -> Self {
        Self { sniffer }
    }

    /// Classify the entry at `path`.
    ///
    /// Unrecognized content is logged and reported, never an error. I/O
    /// failures while sniffing or reading the NIfTI header propagate.
    pub fn classify(&self, path: &Path) -> Result<FileType> {
        let signature = match self.sniffer.sniff(path) {
            Ok(signature) => signature,
            Err(SniffError::IsADirectory) => return Ok(FileType::NotAFile),
            Err(SniffError::Io(e)) => return Err(e.into()),
        };

        if signature == DICOM_SIGNATURE {
            return Ok(FileType::Dicom);
        }

        if signature == GENERIC_BINARY_SIGNATURE {
            match nifti::load(path) {
                Ok(header) => {
                    log::debug!(
                        "NIfTI {:?} image {:?} (datatype {}): {}",
                        header.version,
                        header.dims,
                        header.datatype,
                        path.display()
                    );
                    return Ok(FileType::Nifti);
                }
                Err(NiftiError::NotNifti(reason)) => {
                    log::info!(
                        "found a file of type 'data' but does not seem to be NIfTI ({}): {}",
                        reason,
                        path.display()
                    );
                }
                Err(NiftiError::Io(e)) => return Err(e.into()),
            }
        } else {
            log::info!("found a file with unhandled type ({}): {}", signature, path.display());
        }

        Ok(FileType::Unrecognized)
    }
}
