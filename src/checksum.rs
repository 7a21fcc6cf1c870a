//! CRC-32 trailer verification for device transfers.
//!
//! The logging device appends a CRC-32 (IEEE) of the payload, transmitted as
//! a big-endian u32 immediately after the payload bytes (the device's length
//! header is big-endian too). A mismatch means the serial transfer was
//! corrupted, not that the logged data itself is bad; the file is saved
//! with the incorrect-checksum status and re-downloaded later.

/// Compute the CRC-32 (IEEE) checksum of a payload.
pub fn compute(payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(payload);
    hasher.finalize()
}

/// Whether the payload matches the device-transmitted trailer value.
pub fn verify(payload: &[u8], expected: u32) -> bool {
    compute(payload) == expected
}
