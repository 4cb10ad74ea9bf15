use thiserror::Error;

/// Main error type for scanlineage
#[derive(Error, Debug)]
pub enum ScanlineageError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// File system I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Schema migration errors
    #[error("Migration error: {0}")]
    Migration(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Convenient Result type using ScanlineageError
pub type Result<T> = std::result::Result<T, ScanlineageError>;
