use scanlineage::Config;
use scanlineage::db::{migrate, Db};
use scanlineage::error::ScanlineageError;
use std::path::PathBuf;
use anyhow::Result;

fn main() -> Result<()> {
    // Optional config: the database may come from SCANLINEAGE_DB_URL alone
    let config = Config::load().ok();
    let log_level = config
        .as_ref()
        .map(|c| c.ingest.log_level.clone())
        .unwrap_or_else(|| "info".to_string());

    env_logger::Builder::from_env(
        env_logger::Env::default()
            .filter_or("RUST_LOG", log_level)
    ).init();

    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("verify");

    match command {
        "migrate" => {
            run_migrations(config.as_ref())?;
        }
        "verify" | _ => {
            // Default: apply migrations, then verify the schema
            let db = run_migrations(config.as_ref())?;
            verify_database_schema(&db)?;
        }
    }

    Ok(())
}

fn run_migrations(config: Option<&Config>) -> Result<Db> {
    log::info!("Starting scanlineage v{}", env!("CARGO_PKG_VERSION"));

    let db = Db::from_url(None)?;
    log::info!("Database path: {}", db.path().display());

    let migrations_dir = config
        .map(|c| c.migrations_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("migrations"));
    let applied = db.session(|conn| migrate::run_migrations(conn, &migrations_dir))?;

    log::info!("Database initialized successfully ({} new migrations)", applied);
    Ok(db)
}

/// Verify that all expected database objects exist
fn verify_database_schema(db: &Db) -> Result<()> {
    db.session(|conn| {
        let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")?;
        let tables: Vec<String> = stmt.query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;

        let expected_tables = [
            "provenance", "processing_step", "participant", "researcher", "project",
            "responsible", "scan", "session", "sequence_type", "sequence", "repetition",
            "dicom", "nifti", "data_file", "quality_check", "check", "schema_migrations",
        ];
        let mut all_tables_exist = true;

        for table in &expected_tables {
            if !tables.iter().any(|t| t == table) {
                log::error!("Missing table: {}", table);
                all_tables_exist = false;
            } else {
                log::debug!("✓ Table exists: {}", table);
            }
        }

        if !all_tables_exist {
            return Err(ScanlineageError::Config("Not all required tables exist".to_string()));
        }

        let applied = migrate::applied_versions(conn)?;
        if applied.len() < 3 {
            return Err(ScanlineageError::Config(format!("Expected at least 3 migrations, found {}", applied.len())));
        }
        log::debug!("✓ {} migrations applied", applied.len());

        // Natural-key indexes back every get-or-create
        let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type='index' AND name LIKE 'idx_%' ORDER BY name")?;
        let indexes: Vec<String> = stmt.query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;

        for index_name in ["idx_provenance_natural_key", "idx_processing_step_natural_key"] {
            if !indexes.iter().any(|i| i == index_name) {
                return Err(ScanlineageError::Config(format!("Missing unique index: {}", index_name)));
            }
            log::debug!("✓ Unique index exists: {}", index_name);
        }

        let journal_mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
        if journal_mode.to_uppercase() != "WAL" {
            return Err(ScanlineageError::Config(format!("Journal mode is not WAL: {}", journal_mode)));
        }
        log::debug!("✓ Journal mode: WAL");

        let foreign_keys: i32 = conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0))?;
        if foreign_keys != 1 {
            return Err(ScanlineageError::Config("Foreign keys not enabled".to_string()));
        }
        log::debug!("✓ Foreign keys enabled");

        let integrity: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
        if integrity != "ok" {
            return Err(ScanlineageError::Config(format!("Database integrity check failed: {}", integrity)));
        }
        log::info!("✓ Database integrity: OK");

        Ok(())
    })?;

    log::info!("✓ Database schema verification complete");
    Ok(())
}
