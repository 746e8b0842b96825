use std::fmt;
use std::ops::Range;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use lode_types::BlobInfo;

use crate::error::StoreResult;

/// Opaque lease token handed out by [`BlobStore::acquire_lease`].
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LeaseId(String);

impl LeaseId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A fresh random token, for backends that mint their own.
    pub fn generate() -> Self {
        Self(uuid::Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LeaseId({})", self.0)
    }
}

/// How long an acquired lease stays valid without being released.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LeaseDuration {
    Fixed(Duration),
    Infinite,
}

impl LeaseDuration {
    /// `-1` means infinite, any other value is whole seconds.
    pub fn from_secs(secs: i64) -> Self {
        if secs < 0 {
            Self::Infinite
        } else {
            Self::Fixed(Duration::from_secs(secs as u64))
        }
    }

    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            Self::Fixed(d) => Some(*d),
            Self::Infinite => None,
        }
    }
}

/// One page of a listing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListPage {
    pub blobs: Vec<BlobInfo>,
    /// Continuation marker; `None` on the last page.
    pub next_marker: Option<String>,
}

/// Full object contents together with the etag they were read at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionedBytes {
    pub data: Bytes,
    pub etag: String,
}

/// Remote store holding the blobs and the registry document.
///
/// Implementations must satisfy these invariants:
/// - A lease is exclusive: while one token is active, `acquire_lease` fails
///   with `LeaseAlreadyPresent` for everybody else.
/// - `put` on a leased blob succeeds only with the active token.
/// - `create_new` is atomic: of several concurrent callers exactly one sees
///   `true`.
/// - `break_lease` ends the active lease regardless of who holds it.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// List blobs in name order, starting after `marker`.
    async fn list_page(&self, marker: Option<&str>, max_results: usize) -> StoreResult<ListPage>;

    /// Read the whole blob.
    async fn get(&self, name: &str) -> StoreResult<VersionedBytes>;

    /// Read the half-open byte range `range`.
    async fn get_range(&self, name: &str, range: Range<u64>) -> StoreResult<Bytes>;

    /// Create or overwrite a blob. Returns the new etag.
    async fn put(&self, name: &str, data: Bytes, lease: Option<&LeaseId>) -> StoreResult<String>;

    /// Create a blob only if it does not exist. Returns `false` when it did.
    async fn create_new(&self, name: &str, data: Bytes) -> StoreResult<bool>;

    async fn acquire_lease(&self, name: &str, duration: LeaseDuration) -> StoreResult<LeaseId>;

    async fn release_lease(&self, name: &str, lease: &LeaseId) -> StoreResult<()>;

    async fn break_lease(&self, name: &str) -> StoreResult<()>;

    /// Follow continuation markers until the listing is exhausted.
    async fn list_all(&self, page_size: usize) -> StoreResult<Vec<BlobInfo>> {
        let page_size = page_size.max(1);
        let mut blobs = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let page = self.list_page(marker.as_deref(), page_size).await?;
            blobs.extend(page.blobs);
            match page.next_marker {
                Some(next) => marker = Some(next),
                None => break,
            }
        }
        Ok(blobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_duration_from_secs() {
        assert_eq!(LeaseDuration::from_secs(-1), LeaseDuration::Infinite);
        assert_eq!(
            LeaseDuration::from_secs(15),
            LeaseDuration::Fixed(Duration::from_secs(15))
        );
        assert_eq!(LeaseDuration::Infinite.as_duration(), None);
    }

    #[test]
    fn lease_ids_are_unique() {
        assert_ne!(LeaseId::generate(), LeaseId::generate());
    }
}
