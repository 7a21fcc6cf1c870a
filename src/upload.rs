//! Upload coordinator — ships verified data files to the datastore server.
//!
//! Workers pull paths from a queue, claim each file by renaming it to the
//! uploading suffix (the rename is the mutual exclusion against double
//! upload), POST the bytes, and interpret the JSON response. A transport
//! failure is transient: the file goes back to downloaded and is re-queued
//! after a fixed delay. A response reporting failed records is permanent:
//! the file is quarantined as corrupt data and never re-uploaded.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::stats::SyncStats;
use crate::store::{FileStateStore, FileStatus};

/// How long in-flight uploads get to finish after shutdown is requested.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Server response to a binary upload.
///
/// Only `failed_binrecs` and `error_arr` drive control flow; the rest is
/// logged. Unknown fields are kept so a newer server does not break an
/// older gateway.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct UploadResponse {
    #[serde(default)]
    pub successful_datasets: Option<u64>,
    #[serde(default)]
    pub duplicate_datasets: Option<u64>,
    #[serde(default)]
    pub successful_binrecs: Option<u64>,
    #[serde(default)]
    pub failed_binrecs: Option<u64>,
    #[serde(default)]
    pub min_time: Option<i64>,
    #[serde(default)]
    pub max_time: Option<i64>,
    #[serde(default)]
    pub error_arr: Vec<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Parse a response body, tolerating noise before the JSON object.
///
/// Some server builds prefix the body with diagnostic text, so parsing
/// starts at the first `{`.
pub fn parse_response(body: &str) -> Option<UploadResponse> {
    let json = &body[body.find('{')?..];
    match serde_json::from_str(json) {
        Ok(response) => Some(response),
        Err(e) => {
            tracing::warn!("unparsable upload response: {e}");
            None
        }
    }
}

/// What an upload attempt means for the file's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadVerdict {
    /// Server accepted every record; the file is durably stored.
    Stored,
    /// Server processed the upload but rejected records; permanent.
    Rejected,
    /// No usable response; transport-level failure, retry later.
    NoResponse,
}

/// Interpret an upload response. Pure function of the response content.
///
/// A missing `failed_binrecs` counts as zero failures: servers omit the
/// field when there is nothing to report.
pub fn interpret(response: Option<&UploadResponse>) -> UploadVerdict {
    match response {
        None => UploadVerdict::NoResponse,
        Some(r) => {
            if r.failed_binrecs.unwrap_or(0) > 0 || !r.error_arr.is_empty() {
                UploadVerdict::Rejected
            } else {
                UploadVerdict::Stored
            }
        }
    }
}

/// Handle for submitting files to the upload workers.
#[derive(Clone)]
pub struct UploadQueue {
    tx: mpsc::UnboundedSender<PathBuf>,
}

impl UploadQueue {
    pub fn submit(&self, path: PathBuf) {
        if self.tx.send(path).is_err() {
            // Workers are gone; shutdown is in progress. The file keeps its
            // downloaded suffix and the startup sweep re-queues it.
            tracing::debug!("upload queue closed, submission dropped");
        }
    }
}

pub fn queue() -> (UploadQueue, mpsc::UnboundedReceiver<PathBuf>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (UploadQueue { tx }, rx)
}

#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Upload endpoint including the device nickname query parameter;
    /// workers append `&filename=<baseId>.BT` per request.
    pub endpoint: String,
    /// Simultaneous upload bound.
    pub workers: usize,
    pub request_timeout: Duration,
    /// Delay before a transport-failed upload is re-queued.
    pub retry_delay: Duration,
}

pub struct UploadCoordinator {
    store: Arc<FileStateStore>,
    stats: Arc<SyncStats>,
    client: reqwest::Client,
    config: UploadConfig,
    queue: UploadQueue,
}

impl UploadCoordinator {
    pub fn new(
        config: UploadConfig,
        store: Arc<FileStateStore>,
        stats: Arc<SyncStats>,
        queue: UploadQueue,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            store,
            stats,
            client,
            config,
            queue,
        })
    }

    /// Worker dispatch loop. Runs until the token is cancelled, then joins
    /// in-flight uploads for [`SHUTDOWN_GRACE`] and abandons the rest; an
    /// abandoned upload is repaired by crash recovery on the next start.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<PathBuf>, shutdown: CancellationToken) {
        let semaphore = Arc::new(Semaphore::new(self.config.workers.max(1)));
        let mut in_flight: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                next = rx.recv() => {
                    let Some(path) = next else { break };
                    // Reap finished tasks opportunistically so the set
                    // doesn't grow across a long session.
                    while in_flight.try_join_next().is_some() {}

                    let permit = tokio::select! {
                        _ = shutdown.cancelled() => break,
                        permit = semaphore.clone().acquire_owned() => match permit {
                            Ok(p) => p,
                            Err(_) => break,
                        },
                    };
                    let coordinator = Arc::clone(&self);
                    let token = shutdown.clone();
                    in_flight.spawn(async move {
                        coordinator.process(path, token).await;
                        drop(permit);
                    });
                }
            }
        }

        let drain = async {
            while in_flight.join_next().await.is_some() {}
        };
        if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
            tracing::warn!(
                grace_secs = SHUTDOWN_GRACE.as_secs(),
                "uploads still running after grace period, abandoning"
            );
            in_flight.abort_all();
        }
    }

    /// Upload one downloaded file end to end.
    async fn process(&self, path: PathBuf, shutdown: CancellationToken) {
        // The rename claims the file; losing the race means another worker
        // (or a state change) got there first.
        let Some(claimed) = self.store.begin_upload(&path) else {
            tracing::debug!(path = %path.display(), "file no longer uploadable, skipping");
            return;
        };
        self.stats.upload_requested();

        let base = match claimed.file_name().and_then(|n| n.to_str()) {
            Some(name) => crate::store::status::base_id(name).to_ascii_uppercase(),
            None => {
                tracing::error!(path = %claimed.display(), "non-UTF-8 upload path");
                self.stats.upload_failed();
                return;
            }
        };

        let payload = match tokio::fs::read(&claimed).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(path = %claimed.display(), "cannot read file for upload: {e}");
                // Same handling as a transport failure: back to downloaded,
                // retry after the delay.
                self.apply_verdict(&claimed, &base, UploadVerdict::NoResponse, shutdown);
                return;
            }
        };

        let response = self.request(&base, payload).await;
        self.apply_verdict(&claimed, &base, interpret(response.as_ref()), shutdown);
    }

    /// POST the payload; `None` covers every transport-level failure.
    async fn request(&self, base: &str, payload: Vec<u8>) -> Option<UploadResponse> {
        let url = format!("{}&filename={}.BT", self.config.endpoint, base);
        let result = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(payload)
            .send()
            .await;

        let response = match result {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(base, "upload request failed: {e}");
                return None;
            }
        };

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(base, %status, "upload rejected at transport level");
            return None;
        }

        match response.text().await {
            Ok(body) => parse_response(&body),
            Err(e) => {
                tracing::warn!(base, "failed to read upload response body: {e}");
                None
            }
        }
    }

    fn apply_verdict(
        &self,
        claimed: &std::path::Path,
        base: &str,
        verdict: UploadVerdict,
        shutdown: CancellationToken,
    ) {
        match verdict {
            UploadVerdict::Stored => {
                self.stats.upload_successful();
                tracing::info!(base, "upload accepted by server");
                self.store
                    .transition(claimed, FileStatus::Uploading, FileStatus::Uploaded);
                // Device-side erase is left to the next poll cycle.
            }
            UploadVerdict::Rejected => {
                self.stats.upload_failed();
                tracing::warn!(base, "server rejected records, quarantining file");
                self.store
                    .transition(claimed, FileStatus::Uploading, FileStatus::CorruptData);
            }
            UploadVerdict::NoResponse => {
                self.stats.upload_failed();
                tracing::warn!(
                    base,
                    retry_secs = self.config.retry_delay.as_secs(),
                    "no usable upload response, will retry"
                );
                let Some(downloaded) =
                    self.store
                        .transition(claimed, FileStatus::Uploading, FileStatus::Downloaded)
                else {
                    return;
                };
                let queue = self.queue.clone();
                let delay = self.config.retry_delay;
                tokio::spawn(async move {
                    tokio::select! {
                        _ = shutdown.cancelled() => {
                            // Dropped on purpose; the startup sweep re-queues
                            // downloaded files.
                        }
                        _ = tokio::time::sleep(delay) => queue.submit(downloaded),
                    }
                });
            }
        }
    }
}
