//! Running counters for the sync session, printed after active poll
//! cycles so operators can see progress at a glance.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct SyncStats {
    downloads_requested: AtomicU64,
    downloads_successful: AtomicU64,
    downloads_failed: AtomicU64,
    uploads_requested: AtomicU64,
    uploads_successful: AtomicU64,
    uploads_failed: AtomicU64,
    deletes_requested: AtomicU64,
    deletes_successful: AtomicU64,
    deletes_failed: AtomicU64,
}

impl SyncStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn download_requested(&self) {
        self.downloads_requested.fetch_add(1, Ordering::Relaxed);
    }

    pub fn download_successful(&self) {
        self.downloads_successful.fetch_add(1, Ordering::Relaxed);
    }

    pub fn download_failed(&self) {
        self.downloads_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn upload_requested(&self) {
        self.uploads_requested.fetch_add(1, Ordering::Relaxed);
    }

    pub fn upload_successful(&self) {
        self.uploads_successful.fetch_add(1, Ordering::Relaxed);
    }

    pub fn upload_failed(&self) {
        self.uploads_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn delete_requested(&self) {
        self.deletes_requested.fetch_add(1, Ordering::Relaxed);
    }

    pub fn delete_successful(&self) {
        self.deletes_successful.fetch_add(1, Ordering::Relaxed);
    }

    pub fn delete_failed(&self) {
        self.deletes_failed.fetch_add(1, Ordering::Relaxed);
    }
}

impl fmt::Display for SyncStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let row = |label: &str, requested: &AtomicU64, ok: &AtomicU64, failed: &AtomicU64| {
            format!(
                "| {:<9} | {:>9} | {:>10} | {:>6} |",
                label,
                requested.load(Ordering::Relaxed),
                ok.load(Ordering::Relaxed),
                failed.load(Ordering::Relaxed)
            )
        };
        writeln!(f, "+-----------+-----------+------------+--------+")?;
        writeln!(f, "|           | requested | successful | failed |")?;
        writeln!(f, "+-----------+-----------+------------+--------+")?;
        writeln!(
            f,
            "{}",
            row(
                "downloads",
                &self.downloads_requested,
                &self.downloads_successful,
                &self.downloads_failed
            )
        )?;
        writeln!(
            f,
            "{}",
            row(
                "uploads",
                &self.uploads_requested,
                &self.uploads_successful,
                &self.uploads_failed
            )
        )?;
        writeln!(
            f,
            "{}",
            row(
                "deletes",
                &self.deletes_requested,
                &self.deletes_successful,
                &self.deletes_failed
            )
        )?;
        write!(f, "+-----------+-----------+------------+--------+")
    }
}
