//! Error types for the event loader

use std::path::PathBuf;

use thiserror::Error;

/// Loader error type
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file absent, malformed, or missing a required key.
    #[error("Config error: {0}")]
    Config(String),

    /// Source file does not exist.
    #[error("Source not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    /// Tree or branch absent from the source.
    #[error("Schema error: {0}")]
    Schema(String),

    /// Source file could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Branch groups disagree with each other or with the event count.
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    /// Column renames produce an ambiguous output column.
    #[error("Column conflict: {0}")]
    ColumnConflict(String),

    /// Nested structure lacks expected fields or has inconsistent offsets.
    #[error("Invalid structure: {0}")]
    InvalidStructure(String),

    /// Durable cache store failure.
    #[error("Cache error: {0}")]
    Cache(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Arrow error
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Parquet error
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
