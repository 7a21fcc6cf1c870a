//! On-disk file state store.
//!
//! Sole authority over the data-file directory. A file's status lives in
//! its filename suffix and nowhere else, so the store survives process
//! crashes for free: whatever the directory says at startup is the truth.
//! All mutation happens under one directory-wide mutex, and status changes
//! are atomic renames, which is what guarantees at most one pending action
//! per base id even with several upload workers running.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::error::StoreError;
use super::status::{self, FileStatus};
use crate::checksum;

/// Result of [`FileStateStore::save`].
#[derive(Debug, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Checksum verified; the file is on disk with the downloaded suffix
    /// and is ready for upload.
    Saved(PathBuf),
    /// Payload written but the CRC trailer did not match; the file carries
    /// the incorrect-checksum suffix and awaits re-download.
    ChecksumMismatch(PathBuf),
    /// A record for this base id already exists; nothing was written.
    Duplicate(FileStatus),
}

pub struct FileStateStore {
    directory: PathBuf,
    /// Serializes every directory mutation and scan-then-act sequence.
    lock: Mutex<()>,
}

impl std::fmt::Debug for FileStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStateStore")
            .field("directory", &self.directory)
            .finish_non_exhaustive()
    }
}

impl FileStateStore {
    /// Open the store, creating the data directory if needed.
    pub fn open(directory: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let directory = directory.into();
        fs::create_dir_all(&directory).map_err(|source| StoreError::CreateDir {
            path: directory.clone(),
            source,
        })?;
        Ok(Self {
            directory,
            lock: Mutex::new(()),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Status of the file with the given base id, or `None` if no file with
    /// that base id exists locally.
    pub fn status_of(&self, base: &str) -> Option<FileStatus> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        self.find_matching(base).map(|(_, status)| status)
    }

    /// Save a freshly fetched payload.
    ///
    /// Duplicate-suppressed: if a file for this base id already exists with
    /// any status other than incorrect-checksum, nothing is written. An
    /// existing incorrect-checksum file is deleted first so the slot is
    /// free for the re-download. The payload lands in a temp file with the
    /// writing suffix and is renamed to its verified status, so a crash
    /// mid-write leaves at worst a stray `.WRITING` file that no decision
    /// path acts on.
    pub fn save(
        &self,
        device_filename: &str,
        payload: &[u8],
        expected_crc: u32,
    ) -> Result<SaveOutcome, StoreError> {
        let base = status::base_id(device_filename).to_ascii_uppercase();
        if !status::is_valid_base_id(&base) {
            return Err(StoreError::InvalidFilename(device_filename.to_string()));
        }

        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());

        if let Some((existing, existing_status)) = self.find_matching(&base) {
            if existing_status != FileStatus::IncorrectChecksum {
                tracing::debug!(
                    base,
                    status = %existing_status,
                    "already have this file, ignoring duplicate download"
                );
                return Ok(SaveOutcome::Duplicate(existing_status));
            }
            // Clear the slot so the re-downloaded copy can take it.
            fs::remove_file(&existing).map_err(|source| StoreError::Write {
                path: existing.clone(),
                source,
            })?;
            tracing::debug!(path = %existing.display(), "removed stale incorrect-checksum file");
        }

        let temp = self
            .directory
            .join(format!("{}{}", base, FileStatus::Writing.suffix()));
        if let Err(source) = fs::write(&temp, payload) {
            let _ = fs::remove_file(&temp);
            return Err(StoreError::Write { path: temp, source });
        }

        let verified = checksum::verify(payload, expected_crc);
        let target_status = if verified {
            FileStatus::Downloaded
        } else {
            tracing::warn!(base, "checksum failed for downloaded data file");
            FileStatus::IncorrectChecksum
        };

        match self.rename_suffix(&temp, FileStatus::Writing, target_status) {
            Ok(path) => {
                tracing::info!(path = %path.display(), "data file saved");
                if verified {
                    Ok(SaveOutcome::Saved(path))
                } else {
                    Ok(SaveOutcome::ChecksumMismatch(path))
                }
            }
            Err(source) => {
                let _ = fs::remove_file(&temp);
                Err(StoreError::Write { path: temp, source })
            }
        }
    }

    /// Atomically rename a file from one status suffix to another.
    ///
    /// Returns `None` on any failure (wrong current suffix, target already
    /// present, rename error); the file keeps its prior state and the next
    /// poll cycle re-evaluates it.
    pub fn transition(&self, path: &Path, from: FileStatus, to: FileStatus) -> Option<PathBuf> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        match self.rename_suffix(path, from, to) {
            Ok(new_path) => Some(new_path),
            Err(e) => {
                tracing::error!(
                    path = %path.display(),
                    from = %from,
                    to = %to,
                    "status rename failed: {e}"
                );
                None
            }
        }
    }

    /// Claim a downloaded file for upload by renaming it to the uploading
    /// suffix. The rename is the mutual exclusion: of two workers racing
    /// for the same file, exactly one gets `Some`.
    pub fn begin_upload(&self, path: &Path) -> Option<PathBuf> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        self.rename_suffix(path, FileStatus::Downloaded, FileStatus::Uploading)
            .ok()
    }

    /// Rename every file stuck in the uploading state back to downloaded.
    ///
    /// Run once at startup. A file in the uploading state means the previous
    /// process died mid-upload with the server outcome unknown; re-uploading
    /// risks a duplicate (which the server deduplicates) while skipping
    /// risks data loss, so re-upload wins.
    pub fn recover_interrupted_uploads(&self) -> Result<usize, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let stuck = self.files_with_status_locked(FileStatus::Uploading)?;
        let mut recovered = 0;
        for path in stuck {
            match self.rename_suffix(&path, FileStatus::Uploading, FileStatus::Downloaded) {
                Ok(_) => recovered += 1,
                Err(e) => {
                    tracing::error!(
                        path = %path.display(),
                        "failed to recover interrupted upload: {e}"
                    );
                }
            }
        }
        Ok(recovered)
    }

    /// All files currently in the downloaded state, sorted by filename so
    /// repeated scans of the same directory yield the same order.
    pub fn files_ready_for_upload(&self) -> Result<Vec<PathBuf>, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        self.files_with_status_locked(FileStatus::Downloaded)
    }

    /// First file whose name starts with the base id, with its decoded
    /// status. Caller must hold the lock.
    fn find_matching(&self, base: &str) -> Option<(PathBuf, FileStatus)> {
        let base_upper = base.to_ascii_uppercase();
        let entries = fs::read_dir(&self.directory).ok()?;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.to_ascii_uppercase().starts_with(&base_upper) {
                if let Some(status) = FileStatus::from_filename(name) {
                    return Some((entry.path(), status));
                }
            }
        }
        None
    }

    fn files_with_status_locked(&self, wanted: FileStatus) -> Result<Vec<PathBuf>, StoreError> {
        let entries = fs::read_dir(&self.directory).map_err(|source| StoreError::Scan {
            path: self.directory.clone(),
            source,
        })?;
        let mut matches = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if FileStatus::from_filename(name) == Some(wanted) {
                matches.push(entry.path());
            }
        }
        matches.sort();
        Ok(matches)
    }

    /// Rename `<base><from>` to `<base><to>`, case-insensitively on the
    /// current suffix. Caller must hold the lock. Refuses to clobber an
    /// existing target, which would break the one-file-per-base-id
    /// invariant.
    fn rename_suffix(
        &self,
        path: &Path,
        from: FileStatus,
        to: FileStatus,
    ) -> std::io::Result<PathBuf> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| std::io::Error::other("non-UTF-8 filename"))?;

        let upper = name.to_ascii_uppercase();
        if !upper.ends_with(from.suffix()) {
            return Err(std::io::Error::other(format!(
                "filename {name:?} does not carry the {from} suffix"
            )));
        }

        let stem = &name[..name.len() - from.suffix().len()];
        let new_path = self.directory.join(format!("{}{}", stem, to.suffix()));
        if new_path.exists() {
            return Err(std::io::Error::other(format!(
                "target {} already exists",
                new_path.display()
            )));
        }
        fs::rename(path, &new_path)?;
        tracing::trace!(
            from = %path.display(),
            to = %new_path.display(),
            "renamed data file"
        );
        Ok(new_path)
    }
}
