//! Download coordinator — reconciles the device's file list with local
//! state.
//!
//! One poll cycle lists the device, decides an action per filename from the
//! local status suffix alone, and dispatches downloads and device erases.
//! Failures never abort the cycle; a file whose action fails keeps its
//! on-disk state and is re-evaluated on the next poll.

use std::sync::Arc;

use crate::device::{DeviceError, FileFetch, LoggingDevice};
use crate::retry::{ChecksumRetryDecision, ChecksumRetryPolicy, PollDelay};
use crate::stats::SyncStats;
use crate::store::status;
use crate::store::{FileStateStore, FileStatus, SaveOutcome};
use crate::upload::UploadQueue;

/// Device-side action for one reported filename. Computed fresh every
/// cycle, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileAction {
    NoAction,
    DownloadFromDevice,
    EraseFromDevice,
}

/// Result of one poll cycle.
#[derive(Debug, Clone, Copy)]
pub struct PollOutcome {
    pub delay: PollDelay,
    /// Downloads and erases dispatched this cycle.
    pub actions: usize,
}

pub struct DownloadCoordinator {
    device: Arc<dyn LoggingDevice>,
    store: Arc<FileStateStore>,
    uploads: UploadQueue,
    stats: Arc<SyncStats>,
    retries: ChecksumRetryPolicy,
}

impl DownloadCoordinator {
    pub fn new(
        device: Arc<dyn LoggingDevice>,
        store: Arc<FileStateStore>,
        uploads: UploadQueue,
        stats: Arc<SyncStats>,
        max_checksum_retries: u32,
    ) -> Self {
        Self {
            device,
            store,
            uploads,
            stats,
            retries: ChecksumRetryPolicy::new(max_checksum_retries),
        }
    }

    /// List the device and reconcile every reported filename.
    ///
    /// A failed list call yields a short retry delay; an empty list yields
    /// the long idle delay.
    pub async fn poll_once(&self) -> PollOutcome {
        let filenames = match self.device.list_available_filenames().await {
            Ok(names) => names,
            Err(e) => {
                tracing::warn!("device listing failed: {e}");
                return PollOutcome {
                    delay: PollDelay::Short,
                    actions: 0,
                };
            }
        };

        if filenames.is_empty() {
            tracing::trace!("device reports no files");
            return PollOutcome {
                delay: PollDelay::Long,
                actions: 0,
            };
        }

        let mut actions = 0;
        for filename in &filenames {
            match self.action_for(filename) {
                FileAction::NoAction => {}
                FileAction::DownloadFromDevice => {
                    actions += 1;
                    self.download(filename).await;
                }
                FileAction::EraseFromDevice => {
                    actions += 1;
                    self.erase(filename).await;
                }
            }
        }

        PollOutcome {
            delay: PollDelay::Short,
            actions,
        }
    }

    /// Decide what to do about a device-reported filename.
    ///
    /// Consumes one checksum retry when it decides to re-download an
    /// incorrect-checksum file, so calling this is not free of side effects
    /// on the retry budget.
    fn action_for(&self, filename: &str) -> FileAction {
        let base = status::base_id(filename);
        match self.store.status_of(base) {
            None => FileAction::DownloadFromDevice,
            Some(s) if s.is_terminal() => FileAction::EraseFromDevice,
            Some(FileStatus::IncorrectChecksum) => match self.retries.decide(filename) {
                ChecksumRetryDecision::Redownload => FileAction::DownloadFromDevice,
                ChecksumRetryDecision::GiveUp => {
                    tracing::warn!(
                        filename,
                        "checksum retries exhausted, erasing device copy and \
                         keeping the local file for inspection"
                    );
                    FileAction::EraseFromDevice
                }
            },
            // Writing, Downloaded, or Uploading: a transfer is in flight or
            // an upload is pending.
            Some(_) => FileAction::NoAction,
        }
    }

    async fn download(&self, filename: &str) {
        self.stats.download_requested();
        let base = status::base_id(filename);
        tracing::debug!(
            filename,
            created = ?status::timestamp_of(&base.to_ascii_uppercase()),
            "downloading from device"
        );

        let fetched = match self.device.fetch_file(filename).await {
            Ok(f) => f,
            Err(DeviceError::NoSuchFile(_)) => {
                // Erased out from under us; the next listing won't have it.
                tracing::warn!(filename, "file vanished from device before download");
                self.stats.download_failed();
                return;
            }
            Err(e) => {
                tracing::warn!(filename, "download failed: {e}");
                self.stats.download_failed();
                return;
            }
        };

        let (payload, checksum) = match fetched {
            FileFetch::File { payload, checksum } => (payload, checksum),
            FileFetch::Empty => {
                tracing::debug!(filename, "device sent an empty transfer, no data yet");
                return;
            }
        };

        match self.store.save(filename, &payload, checksum) {
            Ok(SaveOutcome::Saved(path)) => {
                self.stats.download_successful();
                self.uploads.submit(path);
            }
            Ok(SaveOutcome::ChecksumMismatch(path)) => {
                self.stats.download_failed();
                tracing::warn!(
                    path = %path.display(),
                    "saved with checksum mismatch, re-download pending"
                );
            }
            Ok(SaveOutcome::Duplicate(existing)) => {
                tracing::debug!(filename, status = %existing, "duplicate download suppressed");
            }
            Err(e) => {
                self.stats.download_failed();
                tracing::error!(filename, "failed to save download: {e}");
            }
        }
    }

    async fn erase(&self, filename: &str) {
        self.stats.delete_requested();
        match self.device.erase_file(filename).await {
            Ok(true) => {
                self.stats.delete_successful();
                self.retries.clear(filename);
                tracing::info!(filename, "erased from device");
            }
            Ok(false) => {
                self.stats.delete_failed();
                tracing::warn!(filename, "device did not confirm erase, will retry");
            }
            Err(e) => {
                self.stats.delete_failed();
                tracing::error!(filename, "device erase failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum;
    use crate::upload;
    use std::collections::{BTreeMap, BTreeSet};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use async_trait::async_trait;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct ScriptedDevice {
        files: Mutex<BTreeMap<String, Vec<u8>>>,
        /// Filenames whose transmitted checksum is always wrong.
        corrupt: BTreeSet<String>,
        fail_listing: AtomicBool,
        confirm_erase: bool,
        fetches: AtomicUsize,
        erased: Mutex<Vec<String>>,
    }

    impl ScriptedDevice {
        fn with_file(self, name: &str, payload: &[u8]) -> Self {
            self.files
                .lock()
                .unwrap()
                .insert(name.to_string(), payload.to_vec());
            self
        }
    }

    #[async_trait]
    impl LoggingDevice for ScriptedDevice {
        async fn list_available_filenames(&self) -> Result<BTreeSet<String>, DeviceError> {
            if self.fail_listing.load(Ordering::SeqCst) {
                return Err(DeviceError::Command("serial timeout".into()));
            }
            Ok(self.files.lock().unwrap().keys().cloned().collect())
        }

        async fn fetch_file(&self, filename: &str) -> Result<FileFetch, DeviceError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let files = self.files.lock().unwrap();
            let payload = files
                .get(filename)
                .ok_or_else(|| DeviceError::NoSuchFile(filename.to_string()))?
                .clone();
            if payload.is_empty() {
                return Ok(FileFetch::Empty);
            }
            let mut crc = checksum::compute(&payload);
            if self.corrupt.contains(filename) {
                crc ^= 1;
            }
            Ok(FileFetch::File {
                payload,
                checksum: crc,
            })
        }

        async fn erase_file(&self, filename: &str) -> Result<bool, DeviceError> {
            self.erased.lock().unwrap().push(filename.to_string());
            if !self.confirm_erase {
                return Ok(false);
            }
            Ok(self.files.lock().unwrap().remove(filename).is_some())
        }
    }

    struct Harness {
        _dir: TempDir,
        store: Arc<FileStateStore>,
        device: Arc<ScriptedDevice>,
        coordinator: DownloadCoordinator,
        upload_rx: mpsc::UnboundedReceiver<PathBuf>,
    }

    fn harness(device: ScriptedDevice, max_retries: u32) -> Harness {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FileStateStore::open(dir.path().join("data")).unwrap());
        let device = Arc::new(device);
        let (queue, upload_rx) = upload::queue();
        let coordinator = DownloadCoordinator::new(
            Arc::clone(&device) as Arc<dyn LoggingDevice>,
            Arc::clone(&store),
            queue,
            Arc::new(SyncStats::new()),
            max_retries,
        );
        Harness {
            _dir: dir,
            store,
            device,
            coordinator,
            upload_rx,
        }
    }

    #[tokio::test]
    async fn new_file_is_downloaded_and_submitted_for_upload() {
        let mut h = harness(
            ScriptedDevice {
                confirm_erase: true,
                ..Default::default()
            }
            .with_file("0005E1A3.BT", b"records"),
            3,
        );

        let outcome = h.coordinator.poll_once().await;
        assert_eq!(outcome.actions, 1);
        assert_eq!(outcome.delay, PollDelay::Short);
        assert_eq!(h.store.status_of("0005E1A3"), Some(FileStatus::Downloaded));

        let submitted = h.upload_rx.try_recv().unwrap();
        assert_eq!(submitted.file_name().unwrap(), "0005E1A3.BT");
    }

    #[tokio::test]
    async fn uploaded_file_still_on_device_gets_erased() {
        let h = harness(
            ScriptedDevice {
                confirm_erase: true,
                ..Default::default()
            }
            .with_file("0005E1A3.BT", b"records"),
            3,
        );
        std::fs::write(h.store.directory().join("0005E1A3.BTU"), b"records").unwrap();

        let outcome = h.coordinator.poll_once().await;
        assert_eq!(outcome.actions, 1);
        assert_eq!(*h.device.erased.lock().unwrap(), vec!["0005E1A3.BT"]);
        // Local copy untouched.
        assert_eq!(h.store.status_of("0005E1A3"), Some(FileStatus::Uploaded));
    }

    #[tokio::test]
    async fn corrupt_file_is_quarantined_after_erase_does_not_reupload() {
        let h = harness(
            ScriptedDevice {
                confirm_erase: true,
                ..Default::default()
            }
            .with_file("0005E1A3.BT", b"records"),
            3,
        );
        std::fs::write(h.store.directory().join("0005E1A3.BTX"), b"records").unwrap();

        h.coordinator.poll_once().await;
        assert_eq!(*h.device.erased.lock().unwrap(), vec!["0005E1A3.BT"]);
        assert_eq!(h.device.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn checksum_failures_retry_exactly_max_times_then_erase() {
        let h = harness(
            ScriptedDevice {
                corrupt: BTreeSet::from(["0005E1A3.BT".to_string()]),
                confirm_erase: true,
                ..Default::default()
            }
            .with_file("0005E1A3.BT", b"records"),
            2,
        );

        // Initial download plus two re-downloads, all failing verification.
        for _ in 0..3 {
            h.coordinator.poll_once().await;
            assert_eq!(
                h.store.status_of("0005E1A3"),
                Some(FileStatus::IncorrectChecksum)
            );
            assert!(h.device.erased.lock().unwrap().is_empty());
        }
        assert_eq!(h.device.fetches.load(Ordering::SeqCst), 3);

        // Budget exhausted: the device copy goes, the local one stays.
        h.coordinator.poll_once().await;
        assert_eq!(*h.device.erased.lock().unwrap(), vec!["0005E1A3.BT"]);
        assert_eq!(
            h.store.status_of("0005E1A3"),
            Some(FileStatus::IncorrectChecksum)
        );
        assert_eq!(h.device.fetches.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn pending_upload_statuses_are_left_alone() {
        let h = harness(
            ScriptedDevice {
                confirm_erase: true,
                ..Default::default()
            }
            .with_file("0005E1A3.BT", b"a")
            .with_file("0005E1A4.BT", b"b"),
            3,
        );
        std::fs::write(h.store.directory().join("0005E1A3.BT"), b"a").unwrap();
        std::fs::write(h.store.directory().join("0005E1A4.UPLOADING"), b"b").unwrap();

        let outcome = h.coordinator.poll_once().await;
        assert_eq!(outcome.actions, 0);
        assert_eq!(h.device.fetches.load(Ordering::SeqCst), 0);
        assert!(h.device.erased.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_listing_schedules_short_retry() {
        let h = harness(
            ScriptedDevice {
                fail_listing: AtomicBool::new(true),
                confirm_erase: true,
                ..Default::default()
            },
            3,
        );

        let outcome = h.coordinator.poll_once().await;
        assert_eq!(outcome.delay, PollDelay::Short);
        assert_eq!(outcome.actions, 0);
    }

    #[tokio::test]
    async fn empty_listing_schedules_long_delay() {
        let h = harness(
            ScriptedDevice {
                confirm_erase: true,
                ..Default::default()
            },
            3,
        );

        let outcome = h.coordinator.poll_once().await;
        assert_eq!(outcome.delay, PollDelay::Long);
        assert_eq!(outcome.actions, 0);
    }

    #[tokio::test]
    async fn empty_transfer_is_not_an_error() {
        let mut h = harness(
            ScriptedDevice {
                confirm_erase: true,
                ..Default::default()
            }
            .with_file("0005E1A3.BT", b""),
            3,
        );

        let outcome = h.coordinator.poll_once().await;
        assert_eq!(outcome.actions, 1);
        assert_eq!(h.store.status_of("0005E1A3"), None);
        assert!(h.upload_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unconfirmed_erase_is_retried_next_cycle() {
        let h = harness(
            ScriptedDevice {
                confirm_erase: false,
                ..Default::default()
            }
            .with_file("0005E1A3.BT", b"records"),
            3,
        );
        std::fs::write(h.store.directory().join("0005E1A3.BTU"), b"records").unwrap();

        h.coordinator.poll_once().await;
        h.coordinator.poll_once().await;
        assert_eq!(
            *h.device.erased.lock().unwrap(),
            vec!["0005E1A3.BT", "0005E1A3.BT"]
        );
    }
}
