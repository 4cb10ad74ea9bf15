use regex::Regex;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::sync::OnceLock;
use thiserror::Error;

use crate::error::Result;

/// Bytes fed to the hasher per read; files are never loaded whole.
pub const HASH_BLOCK_SIZE: usize = 65536;

/// Text preceding this marker in a NIfTI filename is its result type.
const PREFIX_MARKER: &str = "PR";

/// Tag used when a filename carries no prefix or postfix type.
pub const UNKNOWN_TYPE: &str = "unknown";

/// Compute the SHA256 content digest of a file, reading it block by block
pub fn compute_file_hash(path: &Path) -> Result<String> {
    let file = File::open(path)?;
    Ok(hash_reader(file, HASH_BLOCK_SIZE)?)
}

/// Hex SHA256 of everything `reader` yields, read `block_size` bytes at a time
pub fn hash_reader<R: Read>(mut reader: R, block_size: usize) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; block_size.max(1)];

    loop {
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buffer[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Why a NIfTI path does not follow `<session>/<sequence>/<repetition>/<file>.nii`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathConventionError {
    #[error("expected <session>/<sequence>/<repetition>/<file>.nii")]
    Layout,

    #[error("{field} '{value}' is not an integer")]
    NotAnInteger { field: &'static str, value: String },
}

/// Acquisition coordinates encoded in a NIfTI file's location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NiftiPathInfo {
    pub session: i64,
    pub sequence: String,
    pub repetition: i64,
    /// Filename without the `.nii` extension
    pub file_stem: String,
}

fn layout_regex() -> &'static Regex {
    static LAYOUT: OnceLock<Regex> = OnceLock::new();
    LAYOUT.get_or_init(|| {
        Regex::new(r"(?:^|/)([^/]+)/([^/]+)/([^/]+)/([^/]+)\.nii$").expect("Invalid regex pattern")
    })
}

fn postfix_regex() -> &'static Regex {
    static POSTFIX: OnceLock<Regex> = OnceLock::new();
    POSTFIX.get_or_init(|| Regex::new(r"-\d\d_(.+)").expect("Invalid regex pattern"))
}

impl NiftiPathInfo {
    /// Recover session, sequence name and repetition from the 4th-, 3rd- and
    /// 2nd-from-last path components.
    ///
    /// Handles both forward slashes and backslashes.
    pub fn parse(path: &Path) -> std::result::Result<Self, PathConventionError> {
        let normalized = path.to_string_lossy().replace('\\', "/");
        let caps = layout_regex()
            .captures(&normalized)
            .ok_or(PathConventionError::Layout)?;

        let integer = |field: &'static str, value: &str| {
            value.parse::<i64>().map_err(|_| PathConventionError::NotAnInteger {
                field,
                value: value.to_string(),
            })
        };

        Ok(Self {
            session: integer("session", &caps[1])?,
            sequence: caps[2].to_string(),
            repetition: integer("repetition", &caps[3])?,
            file_stem: caps[4].to_string(),
        })
    }
}

/// Result/output classification carried by a NIfTI filename
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTypeTags {
    /// Text before the last `PR` marker
    pub prefix_type: String,
    /// Text after the first `-NN_` group
    pub postfix_type: String,
}

/// Split a NIfTI filename stem into its prefix and postfix type tags.
///
/// ```text
/// "c1PR_sub-03_T1"    → prefix "c1",      postfix "T1"
/// "c1PR_T1"           → prefix "c1",      postfix "unknown"
/// "run-01_typeX"      → prefix "unknown", postfix "typeX"
/// "mwc2PR_s-12_T1w"   → prefix "mwc2",    postfix "T1w"
/// ```
pub fn parse_file_type_tags(file_stem: &str) -> FileTypeTags {
    let prefix_type = file_stem
        .rfind(PREFIX_MARKER)
        .map(|idx| file_stem[..idx].to_string())
        .unwrap_or_else(|| UNKNOWN_TYPE.to_string());

    let postfix_type = postfix_regex()
        .captures(file_stem)
        .map(|caps| caps[1].to_string())
        .unwrap_or_else(|| UNKNOWN_TYPE.to_string());

    FileTypeTags { prefix_type, postfix_type }
}
