//! Sync engine — owns the poll loop and the upload worker pool.
//!
//! Startup repairs whatever the previous process left behind: files stuck
//! in the uploading state are renamed back to downloaded, and every
//! downloaded file is queued for upload before the first device poll.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::device::LoggingDevice;
use crate::download::DownloadCoordinator;
use crate::retry::PollSchedule;
use crate::stats::SyncStats;
use crate::store::{FileStateStore, StoreError};
use crate::upload::{self, UploadConfig, UploadCoordinator, UploadQueue};

pub struct SyncEngine {
    store: Arc<FileStateStore>,
    stats: Arc<SyncStats>,
    downloads: DownloadCoordinator,
    uploader: Arc<UploadCoordinator>,
    queue: UploadQueue,
    upload_rx: mpsc::UnboundedReceiver<PathBuf>,
    schedule: PollSchedule,
}

impl SyncEngine {
    pub fn new(config: &Config, device: Arc<dyn LoggingDevice>) -> anyhow::Result<Self> {
        let store = Arc::new(FileStateStore::open(&config.data_directory)?);
        let stats = Arc::new(SyncStats::new());
        let (queue, upload_rx) = upload::queue();

        let uploader = Arc::new(UploadCoordinator::new(
            UploadConfig {
                endpoint: config.upload_endpoint(),
                workers: config.upload_workers,
                request_timeout: config.http_timeout,
                retry_delay: config.upload_retry,
            },
            Arc::clone(&store),
            Arc::clone(&stats),
            queue.clone(),
        )?);

        let downloads = DownloadCoordinator::new(
            device,
            Arc::clone(&store),
            queue.clone(),
            Arc::clone(&stats),
            config.max_checksum_retries,
        );

        Ok(Self {
            store,
            stats,
            downloads,
            uploader,
            queue,
            upload_rx,
            schedule: config.poll,
        })
    }

    /// Run until the token is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let queued = recover_and_sweep(&self.store, &self.queue)?;
        if queued > 0 {
            tracing::info!(queued, "queued files left over from the previous run");
        }

        let upload_task = tokio::spawn(
            Arc::clone(&self.uploader).run(self.upload_rx, shutdown.clone()),
        );

        loop {
            if shutdown.is_cancelled() {
                break;
            }
            let outcome = self.downloads.poll_once().await;
            if outcome.actions > 0 {
                tracing::info!("transfer statistics:\n{}", self.stats);
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.schedule.duration(outcome.delay)) => {}
            }
        }

        tracing::info!("poll loop stopped, draining uploads");
        upload_task.await?;
        tracing::info!("final statistics:\n{}", self.stats);
        Ok(())
    }
}

/// Repair interrupted uploads and queue everything already downloaded.
///
/// A file stuck in the uploading state means the previous process died with
/// the server outcome unknown; re-uploading risks a duplicate the server
/// deduplicates, while skipping risks loss, so it goes back in the queue.
fn recover_and_sweep(store: &FileStateStore, queue: &UploadQueue) -> Result<usize, StoreError> {
    let recovered = store.recover_interrupted_uploads()?;
    if recovered > 0 {
        tracing::info!(recovered, "recovered uploads interrupted by the previous run");
    }

    let ready = store.files_ready_for_upload()?;
    let queued = ready.len();
    for path in ready {
        queue.submit(path);
    }
    Ok(queued)
}
