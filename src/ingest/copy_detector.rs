use rusqlite::{params, Connection};
use std::collections::HashSet;
use std::path::Path;

use crate::error::Result;
use crate::ingest::metadata::compute_file_hash;

/// Content digests of every file recorded under `step_id`.
///
/// Files are re-hashed from disk; a recorded file that can no longer be read
/// fails the whole call.
pub fn hashes_for_step(conn: &Connection, step_id: Option<i64>) -> Result<HashSet<String>> {
    let Some(step_id) = step_id else {
        return Ok(HashSet::new());
    };

    let mut stmt = conn.prepare(
        "SELECT path FROM data_file WHERE processing_step_id = ?1 ORDER BY id",
    )?;
    let paths = stmt
        .query_map(params![step_id], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut hashes = HashSet::with_capacity(paths.len());
    for path in &paths {
        hashes.insert(compute_file_hash(Path::new(path))?);
    }

    log::info!(
        "Hashed {} files of previous step {} ({} distinct contents)",
        paths.len(),
        step_id,
        hashes.len()
    );
    Ok(hashes)
}
