use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry of a blob store listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobInfo {
    /// Blob name, `/`-separated, no leading slash.
    pub name: String,
    /// Current size in bytes.
    pub size: u64,
    /// Store-assigned version stamp. Opaque.
    pub etag: String,
    /// Last time the store saw the blob change.
    pub last_modified: DateTime<Utc>,
}

impl BlobInfo {
    pub fn new(
        name: impl Into<String>,
        size: u64,
        etag: impl Into<String>,
        last_modified: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            size,
            etag: etag.into(),
            last_modified,
        }
    }
}
