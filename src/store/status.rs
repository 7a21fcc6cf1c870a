//! File lifecycle status, encoded as a filename suffix.
//!
//! The suffix is the single source of truth for a file's position in the
//! sync state machine; there is no separate index, so every status query
//! is a directory scan. Matching is case-insensitive because the device
//! firmware emits upper-case names while manually copied files may not.

use chrono::{DateTime, TimeZone, Utc};

/// Lifecycle status of a data file, from the gateway's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    /// Payload is being written to disk; transient.
    Writing,
    /// Written and checksum-verified; ready for upload.
    Downloaded,
    /// Handed to an upload worker; outcome unknown until the server responds.
    Uploading,
    /// Durably stored server-side; terminal.
    Uploaded,
    /// The server rejected the records; terminal.
    CorruptData,
    /// Transfer checksum mismatched; eligible for bounded re-download.
    IncorrectChecksum,
}

impl FileStatus {
    /// The filename suffix encoding this status.
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::Writing => ".WRITING",
            Self::Downloaded => ".BT",
            Self::Uploading => ".UPLOADING",
            Self::Uploaded => ".BTU",
            Self::CorruptData => ".BTX",
            Self::IncorrectChecksum => ".BTC",
        }
    }

    /// Decode the status from a filename suffix, case-insensitively.
    ///
    /// `.BT` is checked last since every other status suffix would otherwise
    /// need explicit exclusion. `.BTU`, `.BTX`, and `.BTC` do not end with
    /// `.BT`, but ordering keeps the intent obvious.
    pub fn from_filename(filename: &str) -> Option<Self> {
        let upper = filename.to_ascii_uppercase();
        for status in [
            Self::Writing,
            Self::Uploading,
            Self::Uploaded,
            Self::CorruptData,
            Self::IncorrectChecksum,
            Self::Downloaded,
        ] {
            if upper.ends_with(status.suffix()) {
                return Some(status);
            }
        }
        None
    }

    /// Whether the file has reached a state with no further local
    /// transitions (only a device-side erase remains).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Uploaded | Self::CorruptData)
    }
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.suffix())
    }
}

/// Strip everything from the first `.` to get the device-assigned base id.
pub fn base_id(filename: &str) -> &str {
    match filename.find('.') {
        Some(dot) => &filename[..dot],
        None => filename,
    }
}

/// Whether a string is a well-formed base id: exactly 8 hex digits.
pub fn is_valid_base_id(id: &str) -> bool {
    id.len() == 8 && id.chars().all(|c| c.is_ascii_hexdigit())
}

/// The file's creation time, decoded from the base id (hex seconds since
/// the Unix epoch). `None` for malformed ids.
pub fn timestamp_of(id: &str) -> Option<DateTime<Utc>> {
    if !is_valid_base_id(id) {
        return None;
    }
    let seconds = i64::from_str_radix(id, 16).ok()?;
    Utc.timestamp_opt(seconds, 0).single()
}
