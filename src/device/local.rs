//! Directory-backed device implementation.
//!
//! Treats a local directory of `.BT` files as if it were the device's
//! storage: listing scans the directory, fetching reads the bytes and
//! computes the CRC trailer a well-behaved device would transmit, and
//! erasing deletes the file. Used by the binary when pointed at a staging
//! directory and by integration-style tests that exercise the full
//! download-save-upload path without serial hardware.

use std::collections::BTreeSet;
use std::path::PathBuf;

use async_trait::async_trait;

use super::{DeviceError, FileFetch, LoggingDevice};
use crate::checksum;
use crate::store::status;

#[derive(Debug, Clone)]
pub struct LocalDirectoryDevice {
    directory: PathBuf,
}

impl LocalDirectoryDevice {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    /// Find the on-disk path for a listed filename. Listings are
    /// normalized to upper case, so the match must ignore case.
    async fn resolve(&self, filename: &str) -> Result<Option<PathBuf>, DeviceError> {
        let direct = self.directory.join(filename);
        if tokio::fs::try_exists(&direct).await? {
            return Ok(Some(direct));
        }
        let mut entries = tokio::fs::read_dir(&self.directory).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if name
                .to_str()
                .is_some_and(|n| n.eq_ignore_ascii_case(filename))
            {
                return Ok(Some(entry.path()));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl LoggingDevice for LocalDirectoryDevice {
    async fn list_available_filenames(&self) -> Result<BTreeSet<String>, DeviceError> {
        let mut entries = tokio::fs::read_dir(&self.directory)
            .await
            .map_err(|e| DeviceError::Command(format!("cannot list device directory: {e}")))?;

        let mut names = BTreeSet::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            // Device firmware only ever stores 8-hex-digit .BT files; ignore
            // anything else that found its way into the staging directory.
            let upper = name.to_ascii_uppercase();
            if upper.ends_with(".BT") && status::is_valid_base_id(status::base_id(&upper)) {
                names.insert(upper);
            }
        }
        Ok(names)
    }

    async fn fetch_file(&self, filename: &str) -> Result<FileFetch, DeviceError> {
        let Some(path) = self.resolve(filename).await? else {
            return Err(DeviceError::NoSuchFile(filename.to_string()));
        };
        let payload = tokio::fs::read(&path).await?;

        if payload.is_empty() {
            return Ok(FileFetch::Empty);
        }

        let crc = checksum::compute(&payload);
        Ok(FileFetch::File {
            payload,
            checksum: crc,
        })
    }

    async fn erase_file(&self, filename: &str) -> Result<bool, DeviceError> {
        let Some(path) = self.resolve(filename).await? else {
            return Ok(false);
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) => {
                tracing::error!(filename, "failed to erase file from device directory: {e}");
                Ok(false)
            }
        }
    }
}
