use serde::{Deserialize, Serialize};

/// Default chunk size: 4 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 4 * 1024 * 1024;

/// Default bound on one buffered JSON unit: 16 MiB.
pub const DEFAULT_MAX_UNIT_BYTES: u64 = 16 * 1024 * 1024;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Upper bound on the bytes fetched per range read.
    pub chunk_size_bytes: u64,
    /// Fixed header at the start of every blob, prepended to each record.
    pub file_head_bytes: u64,
    /// Fixed trailer at the end of every blob, appended to each record and
    /// never consumed.
    pub file_tail_bytes: u64,
    /// Largest incomplete JSON unit kept buffered for a later pass. A longer
    /// one is reported as malformed.
    pub max_unit_bytes: u64,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            chunk_size_bytes: DEFAULT_CHUNK_SIZE,
            file_head_bytes: 0,
            file_tail_bytes: 0,
            max_unit_bytes: DEFAULT_MAX_UNIT_BYTES,
        }
    }
}

impl ReaderConfig {
    /// The half-open range a pass should read, given the resume offset and
    /// the blob size. A fresh blob starts after the header, or at its end
    /// if it is shorter than the header.
    pub fn readable_range(&self, offset: u64, size: u64) -> std::ops::Range<u64> {
        let start = if offset == 0 { self.file_head_bytes.min(size) } else { offset };
        let end = size.saturating_sub(self.file_tail_bytes);
        start..end.max(start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_blob_skips_header() {
        let config = ReaderConfig {
            file_head_bytes: 1,
            file_tail_bytes: 1,
            ..ReaderConfig::default()
        };
        assert_eq!(config.readable_range(0, 10), 1..9);
        assert_eq!(config.readable_range(4, 10), 4..9);
    }

    #[test]
    fn range_never_inverts() {
        let config = ReaderConfig {
            file_head_bytes: 8,
            file_tail_bytes: 8,
            ..ReaderConfig::default()
        };
        assert!(config.readable_range(0, 10).is_empty());
        assert!(ReaderConfig::default().readable_range(12, 10).is_empty());
    }
}
