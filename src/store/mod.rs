//! Filesystem-encoded sync state.
//!
//! A data file's lifecycle status is its filename suffix; the directory is
//! the database. See [`fs::FileStateStore`] for the invariants.

pub mod error;
pub mod fs;
pub mod status;

pub use error::StoreError;
pub use fs::{FileStateStore, SaveOutcome};
pub use status::FileStatus;
