//! Schema migrations: `NNN_name.sql` files applied in version order.
//!
//! Each file runs in its own transaction together with its row in
//! `schema_migrations`, so a failing file leaves neither tables nor a
//! version record behind. Applied files are tracked by version number.

use rusqlite::{params, Connection};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, ScanlineageError};

struct MigrationFile {
    version: u32,
    name: String,
    path: PathBuf,
}

fn ensure_migrations_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
    )?;
    Ok(())
}

/// Versions recorded in `schema_migrations`, lowest first.
///
/// A database that was never migrated has no versions.
pub fn applied_versions(conn: &Connection) -> Result<BTreeSet<u32>> {
    ensure_migrations_table(conn)?;
    let mut stmt = conn.prepare("SELECT version FROM schema_migrations")?;
    let versions = stmt
        .query_map([], |row| row.get::<_, u32>(0))?
        .collect::<std::result::Result<BTreeSet<_>, rusqlite::Error>>()?;
    Ok(versions)
}

/// Split `"002_acquisition.sql"` into `(2, "acquisition")`
fn parse_migration_filename(filename: &str) -> Option<(u32, &str)> {
    let stem = filename.strip_suffix(".sql")?;
    let (digits, name) = stem.split_once('_')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) || name.is_empty() {
        return None;
    }
    Some((digits.parse().ok()?, name))
}

fn discover_migrations(migrations_dir: &Path) -> Result<Vec<MigrationFile>> {
    let entries = fs::read_dir(migrations_dir).map_err(|e| {
        ScanlineageError::Migration(format!(
            "cannot read migrations directory {}: {}",
            migrations_dir.display(),
            e
        ))
    })?;

    let mut migrations: Vec<MigrationFile> = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("sql") {
            continue;
        }
        let filename = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        let (version, name) = parse_migration_filename(filename).ok_or_else(|| {
            ScanlineageError::Migration(format!(
                "migration file {} is not named NNN_name.sql",
                path.display()
            ))
        })?;
        let name = name.to_string();
        migrations.push(MigrationFile { version, name, path });
    }

    migrations.sort_by_key(|m| m.version);
    if let Some(pair) = migrations.windows(2).find(|pair| pair[0].version == pair[1].version) {
        return Err(ScanlineageError::Migration(format!(
            "migrations {} and {} share version {}",
            pair[0].path.display(),
            pair[1].path.display(),
            pair[0].version
        )));
    }
    Ok(migrations)
}

fn apply(conn: &mut Connection, migration: &MigrationFile) -> Result<()> {
    let sql = fs::read_to_string(&migration.path)?;

    let tx = conn.transaction()?;
    tx.execute_batch(&sql).map_err(|e| {
        ScanlineageError::Migration(format!(
            "migration {:03}_{} failed: {}",
            migration.version, migration.name, e
        ))
    })?;
    tx.execute(
        "INSERT INTO schema_migrations (version, name) VALUES (?1, ?2)",
        params![migration.version, migration.name],
    )?;
    tx.commit()?;
    Ok(())
}

/// Apply every migration in `migrations_dir` whose version is not yet
/// recorded. Returns how many were applied.
pub fn run_migrations(conn: &mut Connection, migrations_dir: &Path) -> Result<usize> {
    let applied = applied_versions(conn)?;
    let migrations = discover_migrations(migrations_dir)?;

    let known: BTreeSet<u32> = migrations.iter().map(|m| m.version).collect();
    for version in applied.difference(&known) {
        log::warn!(
            "Database records migration version {} with no file in {}",
            version,
            migrations_dir.display()
        );
    }

    let mut count = 0;
    for migration in migrations.iter().filter(|m| !applied.contains(&m.version)) {
        log::info!("Applying migration {:03}_{}", migration.version, migration.name);
        apply(conn, migration)?;
        count += 1;
    }

    if count == 0 {
        log::debug!("Schema up to date ({} migrations)", applied.len());
    } else {
        log::info!("Applied {} migration(s)", count);
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn names(conn: &Connection, sql: &str) -> Vec<String> {
        conn.prepare(sql)
            .unwrap()
            .query_map([], |row| row.get::<_, String>(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()
            .unwrap()
    }

    fn scratch() -> (TempDir, PathBuf, Connection) {
        let temp_dir = TempDir::new().unwrap();
        let migrations_dir = temp_dir.path().join("migrations");
        fs::create_dir(&migrations_dir).unwrap();
        let conn = Connection::open(temp_dir.path().join("test.db")).unwrap();
        (temp_dir, migrations_dir, conn)
    }

    #[test]
    fn test_parse_migration_filename() {
        assert_eq!(parse_migration_filename("001_lineage.sql"), Some((1, "lineage")));
        assert_eq!(parse_migration_filename("010_add_check.sql"), Some((10, "add_check")));
        assert_eq!(parse_migration_filename("lineage.sql"), None);
        assert_eq!(parse_migration_filename("x01_lineage.sql"), None);
        assert_eq!(parse_migration_filename("001_.sql"), None);
        assert_eq!(parse_migration_filename("001_lineage.txt"), None);
    }

    #[test]
    fn test_pending_migrations_apply_in_version_order() {
        let (_tmp, dir, mut conn) = scratch();
        // 010 needs the table from 2, which sorts after it by name
        fs::write(dir.join("010_seed.sql"), "INSERT INTO parent (id) VALUES (1);").unwrap();
        fs::write(dir.join("2_parent.sql"), "CREATE TABLE parent (id INTEGER PRIMARY KEY);").unwrap();
        fs::write(dir.join("README.md"), "not a migration").unwrap();

        assert_eq!(run_migrations(&mut conn, &dir).unwrap(), 2);
        assert_eq!(applied_versions(&conn).unwrap().into_iter().collect::<Vec<_>>(), vec![2, 10]);

        fs::write(dir.join("011_more.sql"), "CREATE TABLE more (id INTEGER);").unwrap();
        assert_eq!(run_migrations(&mut conn, &dir).unwrap(), 1);
        assert_eq!(run_migrations(&mut conn, &dir).unwrap(), 0);
    }

    #[test]
    fn test_duplicate_versions_are_rejected() {
        let (_tmp, dir, mut conn) = scratch();
        fs::write(dir.join("001_a.sql"), "CREATE TABLE a (id INTEGER);").unwrap();
        fs::write(dir.join("001_b.sql"), "CREATE TABLE b (id INTEGER);").unwrap();

        let err = run_migrations(&mut conn, &dir).unwrap_err();
        assert!(matches!(err, ScanlineageError::Migration(_)));
        assert!(applied_versions(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_badly_named_sql_file_is_rejected() {
        let (_tmp, dir, mut conn) = scratch();
        fs::write(dir.join("lineage.sql"), "CREATE TABLE a (id INTEGER);").unwrap();

        assert!(matches!(
            run_migrations(&mut conn, &dir),
            Err(ScanlineageError::Migration(_))
        ));
    }

    #[test]
    fn test_failed_migration_is_rolled_back() {
        let (_tmp, dir, mut conn) = scratch();
        fs::write(dir.join("001_ok.sql"), "CREATE TABLE first (id INTEGER);").unwrap();
        fs::write(
            dir.join("002_broken.sql"),
            "CREATE TABLE ok_table (id INTEGER); CREATE TABLE broken (",
        )
        .unwrap();

        let err = run_migrations(&mut conn, &dir).unwrap_err();
        assert!(matches!(err, ScanlineageError::Migration(_)));

        let tables = names(&conn, "SELECT name FROM sqlite_master WHERE type='table'");
        assert!(tables.contains(&"first".to_string()));
        assert!(!tables.contains(&"ok_table".to_string()));
        assert_eq!(applied_versions(&conn).unwrap().into_iter().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_full_migration_schema() {
        let temp_dir = TempDir::new().unwrap();
        let mut conn = Connection::open(temp_dir.path().join("test.db")).unwrap();
        let migrations_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations");

        assert_eq!(run_migrations(&mut conn, &migrations_dir).unwrap(), 3);
        assert_eq!(run_migrations(&mut conn, &migrations_dir).unwrap(), 0);

        let tables = names(&conn, "SELECT name FROM sqlite_master WHERE type='table' ORDER BY name");
        for expected in [
            "provenance", "processing_step", "participant", "scan", "session",
            "sequence_type", "sequence", "repetition", "dicom", "nifti", "data_file",
            "researcher", "project", "responsible", "quality_check", "check",
            "schema_migrations",
        ] {
            assert!(tables.contains(&expected.to_string()), "missing table {}", expected);
        }

        let indexes = names(&conn, "SELECT name FROM sqlite_master WHERE type='index' AND name LIKE 'idx_%'");
        assert!(indexes.contains(&"idx_provenance_natural_key".to_string()));
        assert!(indexes.contains(&"idx_processing_step_natural_key".to_string()));
        assert!(indexes.contains(&"idx_data_file_step".to_string()));
    }
}
