use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

use crate::error::{Result, ScanlineageError};

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|name| name.starts_with('.'))
            .unwrap_or(false)
}

// Stored paths must reopen the same file, which a lossy name cannot do.
fn has_utf8_path(entry: &DirEntry) -> bool {
    if entry.path().to_str().is_some() {
        return true;
    }
    log::warn!("Skipping non-UTF-8 path {}", entry.path().display());
    false
}

/// Enumerate every entry (files and directories) below `root`.
///
/// Symlinks are followed and entries come back sorted by file name within
/// each directory, so repeated walks over the same tree see the same order.
/// Hidden entries and everything beneath hidden directories are skipped, and
/// so are entries whose path is not valid UTF-8.
/// Unreadable entries are logged and skipped; the walk itself never fails
/// once the root has been validated.
pub fn discover_entries(root: &Path) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        return Err(ScanlineageError::InvalidInput(format!(
            "folder does not exist or is not a directory: {}",
            root.display()
        )));
    }

    let mut entries = Vec::new();

    for entry in WalkDir::new(root)
        .min_depth(1)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_hidden(e) && has_utf8_path(e))
    {
        match entry {
            Ok(entry) => entries.push(entry.into_path()),
            Err(e) => {
                let path = e
                    .path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| root.display().to_string());
                log::warn!("Skipping unreadable entry {}: {}", path, e);
            }
        }
    }

    log::info!("Discovered {} entries in {}", entries.len(), root.display());
    Ok(entries)
}
