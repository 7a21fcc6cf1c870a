//! Error type for the on-disk state store.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from state-store filesystem operations.
///
/// These are never fatal to the sync engine: every failure leaves the file
/// in its prior state, and the next poll cycle re-evaluates it.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to create data directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to scan data directory {path}: {source}")]
    Scan {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("device filename {0:?} is not a valid base id")]
    InvalidFilename(String),
}
