use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OverlayError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("overlay {name} not found")]
    NotFound { name: String },
    #[error("overlay with name {name} already exists")]
    AlreadyExists { name: String },
    #[error("invalid overlay: {0}")]
    Invalid(String),
    #[error("overlay store path not configured")]
    MissingStore,
    #[error("failed to open database at {path}: {source}")]
    OpenDatabase {
        path: PathBuf,
        source: rusqlite::Error,
    },
}

pub type OverlayResult<T> = std::result::Result<T, OverlayError>;
