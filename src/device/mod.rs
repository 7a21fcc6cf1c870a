//! The logging-device boundary.
//!
//! The gateway talks to the device through the [`LoggingDevice`] trait; the
//! production implementation wraps the serial link and lives outside this
//! crate. [`local::LocalDirectoryDevice`] is the in-tree implementation,
//! backed by a plain directory, used for end-to-end runs and tests.

pub mod local;

use std::collections::BTreeSet;

use async_trait::async_trait;
use thiserror::Error;

/// Errors surfaced by device commands.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The device no longer has the requested file (already erased).
    /// Not retried within the cycle; the next poll re-lists.
    #[error("no such file on device: {0}")]
    NoSuchFile(String),

    /// Command-level failure (timeout, framing error, device busy).
    #[error("device command failed: {0}")]
    Command(String),

    #[error("device i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of fetching a file from the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileFetch {
    /// Raw payload plus the CRC-32 value the device transmitted after it.
    File { payload: Vec<u8>, checksum: u32 },
    /// The device answered with a zero-length transfer: no data yet.
    Empty,
}

/// Capabilities the gateway needs from a logging device.
///
/// Object-safe so the sync engine can hold an `Arc<dyn LoggingDevice>`.
#[async_trait]
pub trait LoggingDevice: Send + Sync {
    /// The set of filenames currently stored on the device, sorted and
    /// deduplicated so identical listings process in identical order.
    async fn list_available_filenames(&self) -> Result<BTreeSet<String>, DeviceError>;

    /// Fetch one file's payload and its checksum trailer.
    async fn fetch_file(&self, filename: &str) -> Result<FileFetch, DeviceError>;

    /// Ask the device to erase a file. Returns whether the device
    /// confirmed the erase.
    async fn erase_file(&self, filename: &str) -> Result<bool, DeviceError>;
}
