use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;
use crate::error::{Result, ScanlineageError};

pub mod migrate;

/// Environment variable consulted when no database URL is passed explicitly.
pub const DB_URL_ENV: &str = "SCANLINEAGE_DB_URL";

/// Database connection wrapper
///
/// Holds only the location of the database. Each ingestion entry point
/// acquires exactly one connection through [`Db::session`] and releases it
/// before returning.
pub struct Db {
    path: PathBuf,
}

impl Db {
    /// Create a new database connection manager
    pub fn new<P: AsRef<Path>>(db_path: P) -> Self {
        Self {
            path: db_path.as_ref().to_path_buf(),
        }
    }

    /// Build a manager from a connection descriptor, falling back to
    /// `SCANLINEAGE_DB_URL` and then to the configuration file.
    pub fn from_url(db_url: Option<&str>) -> Result<Self> {
        let url = resolve_db_url(db_url)?;
        Ok(Self::new(resolve_db_path(&url)?))
    }

    /// Path of the SQLite database file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a new database connection with optimized pragmas
    pub fn open_connection(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)
            .map_err(ScanlineageError::Database)?;

        // WAL so readers don't block the single writer; foreign keys enforce the ownership chain
        conn.execute_batch(
            "PRAGMA journal_mode = WAL; \
             PRAGMA synchronous = NORMAL; \
             PRAGMA foreign_keys = ON; \
             PRAGMA temp_store = MEMORY; \
             PRAGMA cache_size = -65536; \
             PRAGMA mmap_size = 268435456; \
             PRAGMA wal_autocheckpoint = 1000;"
        )?;
        conn.busy_timeout(Duration::from_secs(5))?;

        Ok(conn)
    }

    /// Run `f` against one freshly opened connection and close it afterwards.
    ///
    /// Every statement commits as it executes, so whatever `f` wrote before
    /// failing stays in the database.
    pub fn session<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        log::info!("Connecting to database {}...", self.path.display());
        let mut conn = self.open_connection()?;

        let result = f(&mut conn);

        log::info!("Closing database connection...");
        let closed = conn.close().map_err(|(_, e)| ScanlineageError::Database(e));

        let value = result?;
        closed?;
        Ok(value)
    }
}

/// Resolve the connection descriptor to use for one invocation.
pub fn resolve_db_url(db_url: Option<&str>) -> Result<String> {
    if let Some(url) = db_url {
        return Ok(url.to_string());
    }

    let _ = dotenv::dotenv();
    if let Ok(url) = std::env::var(DB_URL_ENV) {
        return Ok(url);
    }

    let config = crate::config::Config::load().map_err(|e| {
        ScanlineageError::Config(format!(
            "No database URL given, {} unset and no usable config file: {}",
            DB_URL_ENV, e
        ))
    })?;
    Ok(config.db_url().to_string())
}

/// Map a connection descriptor to a SQLite file path.
///
/// Accepted forms: `sqlite://relative.db`, `sqlite:///absolute.db`,
/// `file:///absolute.db` and bare filesystem paths.
pub fn resolve_db_path(db_url: &str) -> Result<PathBuf> {
    let trimmed = db_url.trim();

    if let Some(rest) = trimmed.strip_prefix("sqlite://") {
        if rest.is_empty() {
            return Err(ScanlineageError::Config(
                "sqlite:// URL without a database path".to_string(),
            ));
        }
        return Ok(PathBuf::from(rest));
    }

    match Url::parse(trimmed) {
        Ok(url) if url.scheme() == "file" => url.to_file_path().map_err(|_| {
            ScanlineageError::Config(format!("Invalid file URL: {}", trimmed))
        }),
        // single-letter schemes are Windows drive letters
        Ok(url) if url.scheme().len() > 1 => Err(ScanlineageError::Config(format!(
            "Unsupported database scheme '{}' (expected sqlite:// or file://)",
            url.scheme()
        ))),
        _ => Ok(PathBuf::from(trimmed)),
    }
}
