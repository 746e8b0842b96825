use std::collections::BTreeMap;
use std::ops::{Bound, Range};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::debug;

use lode_types::BlobInfo;

use crate::error::{StoreError, StoreResult};
use crate::traits::{BlobStore, LeaseDuration, LeaseId, ListPage, VersionedBytes};

struct MemLease {
    id: LeaseId,
    expires_at: Option<Instant>,
}

impl MemLease {
    fn is_active(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

struct MemBlob {
    data: Vec<u8>,
    etag: String,
    last_modified: DateTime<Utc>,
    lease: Option<MemLease>,
}

impl MemBlob {
    fn active_lease(&self, now: Instant) -> Option<&MemLease> {
        self.lease.as_ref().filter(|lease| lease.is_active(now))
    }

    fn info(&self, name: &str) -> BlobInfo {
        BlobInfo::new(name, self.data.len() as u64, &self.etag, self.last_modified)
    }
}

/// In-memory, `BTreeMap`-based blob store.
///
/// Intended for tests and embedding. Several workers can share one instance
/// through an `Arc` to exercise the coordination protocol without a remote
/// service. Lease expiry follows the monotonic clock.
///
/// Fault injection: [`inject_stuck_lease_timeouts`] makes the next
/// `acquire_lease` calls grant an infinite lease and then report a timeout,
/// reproducing a store that leaves an unreleasable lock behind.
/// [`inject_lease_io_errors`] makes them fail with an I/O error and leave
/// any existing lease alone.
///
/// [`inject_stuck_lease_timeouts`]: InMemoryBlobStore::inject_stuck_lease_timeouts
/// [`inject_lease_io_errors`]: InMemoryBlobStore::inject_lease_io_errors
pub struct InMemoryBlobStore {
    blobs: RwLock<BTreeMap<String, MemBlob>>,
    next_etag: AtomicU64,
    stuck_lease_timeouts: Mutex<usize>,
    lease_io_errors: Mutex<usize>,
    breaks: AtomicUsize,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self {
            blobs: RwLock::new(BTreeMap::new()),
            next_etag: AtomicU64::new(1),
            stuck_lease_timeouts: Mutex::new(0),
            lease_io_errors: Mutex::new(0),
            breaks: AtomicUsize::new(0),
        }
    }

    fn mint_etag(&self) -> String {
        format!("0x{:016X}", self.next_etag.fetch_add(1, Ordering::Relaxed))
    }

    /// Write a blob directly, ignoring leases. Producer-side helper.
    pub fn insert(&self, name: &str, data: impl Into<Vec<u8>>) -> String {
        let etag = self.mint_etag();
        let mut map = self.blobs.write().expect("lock poisoned");
        let lease = map.remove(name).and_then(|old| old.lease);
        map.insert(
            name.to_string(),
            MemBlob {
                data: data.into(),
                etag: etag.clone(),
                last_modified: Utc::now(),
                lease,
            },
        );
        etag
    }

    /// Append to a blob, creating it if missing. Producer-side helper.
    pub fn append(&self, name: &str, data: &[u8]) -> String {
        let etag = self.mint_etag();
        let mut map = self.blobs.write().expect("lock poisoned");
        let blob = map.entry(name.to_string()).or_insert_with(|| MemBlob {
            data: Vec::new(),
            etag: String::new(),
            last_modified: Utc::now(),
            lease: None,
        });
        blob.data.extend_from_slice(data);
        blob.etag = etag.clone();
        blob.last_modified = Utc::now();
        etag
    }

    /// Remove a blob. Returns `true` if it existed.
    pub fn remove(&self, name: &str) -> bool {
        self.blobs
            .write()
            .expect("lock poisoned")
            .remove(name)
            .is_some()
    }

    /// Override the last-modified stamp of a blob.
    pub fn set_last_modified(&self, name: &str, at: DateTime<Utc>) -> StoreResult<()> {
        let mut map = self.blobs.write().expect("lock poisoned");
        let blob = map
            .get_mut(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        blob.last_modified = at;
        Ok(())
    }

    /// Raw contents of a blob, if present.
    pub fn contents(&self, name: &str) -> Option<Vec<u8>> {
        let map = self.blobs.read().expect("lock poisoned");
        map.get(name).map(|blob| blob.data.clone())
    }

    /// Whether an unexpired lease is held on `name`.
    pub fn is_leased(&self, name: &str) -> bool {
        let map = self.blobs.read().expect("lock poisoned");
        map.get(name)
            .and_then(|blob| blob.active_lease(Instant::now()))
            .is_some()
    }

    /// Make the next `count` lease acquisitions leave an infinite lease
    /// behind and then fail with [`StoreError::Timeout`].
    pub fn inject_stuck_lease_timeouts(&self, count: usize) {
        *self.stuck_lease_timeouts.lock().expect("lock poisoned") = count;
    }

    /// Make the next `count` lease acquisitions fail with [`StoreError::Io`]
    /// without touching the lease.
    pub fn inject_lease_io_errors(&self, count: usize) {
        *self.lease_io_errors.lock().expect("lock poisoned") = count;
    }

    /// Number of `break_lease` calls served so far.
    pub fn break_count(&self) -> usize {
        self.breaks.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.blobs.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.read().expect("lock poisoned").is_empty()
    }

    fn take_injected_timeout(&self) -> bool {
        take_one(&self.stuck_lease_timeouts)
    }

    fn take_injected_io_error(&self) -> bool {
        take_one(&self.lease_io_errors)
    }
}

fn take_one(counter: &Mutex<usize>) -> bool {
    let mut remaining = counter.lock().expect("lock poisoned");
    if *remaining > 0 {
        *remaining -= 1;
        true
    } else {
        false
    }
}

impl Default for InMemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBlobStore")
            .field("blob_count", &self.len())
            .finish()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn list_page(&self, marker: Option<&str>, max_results: usize) -> StoreResult<ListPage> {
        let map = self.blobs.read().expect("lock poisoned");
        let lower = match marker {
            Some(m) => Bound::Excluded(m.to_string()),
            None => Bound::Unbounded,
        };
        let max_results = max_results.max(1);
        let mut iter = map.range((lower, Bound::Unbounded));
        let blobs: Vec<BlobInfo> = iter
            .by_ref()
            .take(max_results)
            .map(|(name, blob)| blob.info(name))
            .collect();
        let next_marker = match iter.next() {
            Some(_) => blobs.last().map(|b| b.name.clone()),
            None => None,
        };
        Ok(ListPage { blobs, next_marker })
    }

    async fn get(&self, name: &str) -> StoreResult<VersionedBytes> {
        let map = self.blobs.read().expect("lock poisoned");
        let blob = map
            .get(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        Ok(VersionedBytes {
            data: Bytes::copy_from_slice(&blob.data),
            etag: blob.etag.clone(),
        })
    }

    async fn get_range(&self, name: &str, range: Range<u64>) -> StoreResult<Bytes> {
        let map = self.blobs.read().expect("lock poisoned");
        let blob = map
            .get(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        let size = blob.data.len() as u64;
        if range.start > range.end || range.end > size {
            return Err(StoreError::InvalidRange {
                name: name.to_string(),
                start: range.start,
                end: range.end,
                size,
            });
        }
        Ok(Bytes::copy_from_slice(
            &blob.data[range.start as usize..range.end as usize],
        ))
    }

    async fn put(&self, name: &str, data: Bytes, lease: Option<&LeaseId>) -> StoreResult<String> {
        let now = Instant::now();
        let etag = self.mint_etag();
        let mut map = self.blobs.write().expect("lock poisoned");

        if let Some(existing) = map.get(name) {
            match (existing.active_lease(now), lease) {
                (Some(active), Some(given)) if active.id == *given => {}
                (None, None) => {}
                _ => {
                    return Err(StoreError::LeaseMismatch {
                        name: name.to_string(),
                    })
                }
            }
        } else if lease.is_some() {
            return Err(StoreError::LeaseMismatch {
                name: name.to_string(),
            });
        }

        let kept_lease = map.remove(name).and_then(|old| old.lease);
        map.insert(
            name.to_string(),
            MemBlob {
                data: data.to_vec(),
                etag: etag.clone(),
                last_modified: Utc::now(),
                lease: kept_lease,
            },
        );
        debug!(blob = name, etag = %etag, "put");
        Ok(etag)
    }

    async fn create_new(&self, name: &str, data: Bytes) -> StoreResult<bool> {
        let etag = self.mint_etag();
        let mut map = self.blobs.write().expect("lock poisoned");
        if map.contains_key(name) {
            return Ok(false);
        }
        map.insert(
            name.to_string(),
            MemBlob {
                data: data.to_vec(),
                etag,
                last_modified: Utc::now(),
                lease: None,
            },
        );
        Ok(true)
    }

    async fn acquire_lease(&self, name: &str, duration: LeaseDuration) -> StoreResult<LeaseId> {
        let now = Instant::now();
        let mut map = self.blobs.write().expect("lock poisoned");
        let blob = map
            .get_mut(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        if self.take_injected_io_error() {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("acquire lease on {name}"),
            )));
        }
        if blob.active_lease(now).is_some() {
            return Err(StoreError::LeaseAlreadyPresent {
                name: name.to_string(),
            });
        }

        let id = LeaseId::generate();
        if self.take_injected_timeout() {
            blob.lease = Some(MemLease {
                id,
                expires_at: None,
            });
            return Err(StoreError::Timeout(format!("acquire lease on {name}")));
        }
        blob.lease = Some(MemLease {
            id: id.clone(),
            expires_at: duration.as_duration().map(|d| now + d),
        });
        Ok(id)
    }

    async fn release_lease(&self, name: &str, lease: &LeaseId) -> StoreResult<()> {
        let now = Instant::now();
        let mut map = self.blobs.write().expect("lock poisoned");
        let blob = map
            .get_mut(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        match blob.active_lease(now) {
            None => Err(StoreError::LeaseNotPresent {
                name: name.to_string(),
            }),
            Some(active) if active.id != *lease => Err(StoreError::LeaseMismatch {
                name: name.to_string(),
            }),
            Some(_) => {
                blob.lease = None;
                Ok(())
            }
        }
    }

    async fn break_lease(&self, name: &str) -> StoreResult<()> {
        let mut map = self.blobs.write().expect("lock poisoned");
        let blob = map
            .get_mut(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        blob.lease = None;
        self.breaks.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
