use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

/// Storage backend configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Connection descriptor: `sqlite://path`, `file:///abs/path` or a bare path.
    pub url: String,
    #[serde(default = "default_migrations_dir")]
    pub migrations_dir: PathBuf,
}

/// Ingestion behaviour
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Reuse DICOM metadata for every file of a leaf directory.
    #[serde(default = "default_optimize")]
    pub optimize: bool,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            optimize: default_optimize(),
            log_level: default_log_level(),
        }
    }
}

fn default_migrations_dir() -> PathBuf {
    PathBuf::from("migrations")
}

fn default_optimize() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from file
    ///
    /// Loads environment variables from .env file (if present) before loading config.
    /// Looks for config file in this order:
    /// 1. Path specified in SCANLINEAGE_CONFIG environment variable
    /// 2. ./config.toml in current directory
    pub fn load() -> Result<Self> {
        // .env is optional
        let _ = dotenv::dotenv();

        let config_path = std::env::var("SCANLINEAGE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.toml"));

        Self::from_path(&config_path)
    }

    /// Load and validate configuration from an explicit file
    pub fn from_path(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: Config = toml::from_str(&config_str)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.database.url.trim().is_empty() {
            anyhow::bail!("database.url must not be empty");
        }

        crate::db::resolve_db_path(&self.database.url)
            .with_context(|| format!("Unsupported database.url: {}", self.database.url))?;

        Ok(())
    }

    /// Database connection descriptor
    pub fn db_url(&self) -> &str {
        &self.database.url
    }

    /// Directory holding the SQL migrations
    pub fn migrations_dir(&self) -> &Path {
        &self.database.migrations_dir
    }
}
