use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::ops::Range;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use lode_types::BlobInfo;

use crate::error::{StoreError, StoreResult};
use crate::traits::{BlobStore, LeaseDuration, LeaseId, ListPage, VersionedBytes};

/// Suffix of the sidecar file that records a blob's lease.
const LEASE_SUFFIX: &str = ".lease";

/// Prefix `tempfile` gives to staging files.
const TEMP_PREFIX: &str = ".tmp";

/// A lease file that cannot be parsed is treated as held for this long after
/// its last write, covering the gap between create and write.
const UNREADABLE_LEASE_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize, Deserialize)]
struct LeaseFile {
    lease_id: LeaseId,
    expires_at: Option<DateTime<Utc>>,
}

impl LeaseFile {
    fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

enum LeaseState {
    Free,
    Held(LeaseId),
    /// Present but unreadable and recently written.
    Pending,
}

/// Directory-backed blob store.
///
/// Blob names are `/`-separated paths relative to the root. A lease is a
/// sidecar `<name>.lease` file created with `O_EXCL`, so several processes
/// on one host can share a root. Overwrites stage into a temp file and
/// rename over the target, so readers never observe a torn registry.
///
/// An expired sidecar is reclaimed by renaming it aside first. If a fresh
/// lease was moved by mistake it is linked back, but a third process can
/// create the path in between; the displaced holder then fails its next
/// leased `put` with [`StoreError::LeaseMismatch`] rather than writing
/// without mutual exclusion.
///
/// Etags are derived from size and modification time; they change whenever
/// the file does.
#[derive(Clone, Debug)]
pub struct FsBlobStore {
    root: Arc<PathBuf>,
}

impl FsBlobStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root: Arc::new(root),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn blocking<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Path) -> StoreResult<T> + Send + 'static,
    {
        let root = Arc::clone(&self.root);
        tokio::task::spawn_blocking(move || f(&root))
            .await
            .map_err(|e| StoreError::Io(io::Error::new(io::ErrorKind::Other, e)))?
    }
}

fn blob_path(root: &Path, name: &str) -> StoreResult<PathBuf> {
    if name.is_empty() || name.ends_with(LEASE_SUFFIX) || name.ends_with('/') {
        return Err(StoreError::InvalidName(name.to_string()));
    }
    let relative = Path::new(name);
    let valid = relative
        .components()
        .all(|c| matches!(c, Component::Normal(part) if !part.to_string_lossy().starts_with(TEMP_PREFIX)));
    if !valid {
        return Err(StoreError::InvalidName(name.to_string()));
    }
    Ok(root.join(relative))
}

fn lease_path(blob: &Path) -> PathBuf {
    let mut os = blob.as_os_str().to_owned();
    os.push(LEASE_SUFFIX);
    PathBuf::from(os)
}

fn etag_for(meta: &fs::Metadata) -> String {
    let modified = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
        .unwrap_or_default();
    let mut hasher = blake3::Hasher::new();
    hasher.update(&meta.len().to_le_bytes());
    hasher.update(&modified.as_nanos().to_le_bytes());
    format!("0x{}", hex::encode_upper(&hasher.finalize().as_bytes()[..8]))
}

fn not_found(name: &str) -> impl FnOnce(io::Error) -> StoreError + '_ {
    move |e| {
        if e.kind() == io::ErrorKind::NotFound {
            StoreError::NotFound(name.to_string())
        } else {
            StoreError::Io(e)
        }
    }
}

fn read_lease(path: &Path) -> StoreResult<LeaseState> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(LeaseState::Free),
        Err(e) => return Err(e.into()),
    };
    match serde_json::from_slice::<LeaseFile>(&raw) {
        Ok(lease) if lease.is_active(Utc::now()) => Ok(LeaseState::Held(lease.lease_id)),
        Ok(_) => Ok(LeaseState::Free),
        Err(_) => {
            let age = fs::metadata(path)
                .and_then(|m| m.modified())
                .ok()
                .and_then(|t| t.elapsed().ok())
                .unwrap_or_default();
            if age < UNREADABLE_LEASE_GRACE {
                Ok(LeaseState::Pending)
            } else {
                Ok(LeaseState::Free)
            }
        }
    }
}

fn remove_if_present(path: &Path) -> StoreResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Move an expired lease file out of the way.
///
/// The file is renamed to a private name before it is inspected again, so a
/// lease another process created after our expiry check is never deleted:
/// it is linked back into place and `false` is returned. Returns `true` when
/// the lease path is free for another `create_new` attempt.
fn reclaim_expired(lease_file: &Path) -> bool {
    let staged = lease_file.with_file_name(format!("{TEMP_PREFIX}{}{LEASE_SUFFIX}", Uuid::now_v7()));
    match fs::rename(lease_file, &staged) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => return true,
        Err(e) => {
            debug!(path = %lease_file.display(), error = %e, "cannot reclaim expired lease");
            return false;
        }
    }
    match read_lease(&staged) {
        Ok(LeaseState::Free) => {
            if let Err(e) = fs::remove_file(&staged) {
                warn!(path = %staged.display(), error = %e, "cannot remove reclaimed lease file");
            }
            true
        }
        _ => {
            // Someone else's fresh lease; put it back unless a third party
            // already took the path.
            if let Err(e) = fs::hard_link(&staged, lease_file) {
                warn!(path = %lease_file.display(), error = %e, "cannot restore displaced lease");
            }
            if let Err(e) = fs::remove_file(&staged) {
                warn!(path = %staged.display(), error = %e, "cannot remove staged lease file");
            }
            false
        }
    }
}

fn write_atomically(path: &Path, data: &[u8]) -> StoreResult<()> {
    let parent = path
        .parent()
        .ok_or_else(|| StoreError::InvalidName(path.display().to_string()))?;
    fs::create_dir_all(parent)?;
    let mut staged = tempfile::NamedTempFile::new_in(parent)?;
    staged.write_all(data)?;
    staged.as_file().sync_all()?;
    staged.persist(path).map_err(|e| StoreError::Io(e.error))?;
    Ok(())
}

fn is_internal(file_name: &str) -> bool {
    file_name.ends_with(LEASE_SUFFIX) || file_name.starts_with(TEMP_PREFIX)
}

fn list_sorted(root: &Path) -> StoreResult<Vec<BlobInfo>> {
    let mut blobs = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|e| {
            StoreError::Io(
                e.into_io_error()
                    .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "walk error")),
            )
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        if is_internal(&entry.file_name().to_string_lossy()) {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let meta = match entry.metadata() {
            Ok(meta) => meta,
            Err(e) => {
                warn!(blob = %name, error = %e, "skipping unreadable entry");
                continue;
            }
        };
        let last_modified = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        blobs.push(BlobInfo::new(name, meta.len(), etag_for(&meta), last_modified));
    }
    blobs.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(blobs)
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn list_page(&self, marker: Option<&str>, max_results: usize) -> StoreResult<ListPage> {
        let marker = marker.map(str::to_string);
        let max_results = max_results.max(1);
        self.blocking(move |root| {
            let all = list_sorted(root)?;
            let mut rest = all
                .into_iter()
                .skip_while(|b| marker.as_deref().is_some_and(|m| b.name.as_str() <= m));
            let blobs: Vec<BlobInfo> = rest.by_ref().take(max_results).collect();
            let next_marker = match rest.next() {
                Some(_) => blobs.last().map(|b| b.name.clone()),
                None => None,
            };
            Ok(ListPage { blobs, next_marker })
        })
        .await
    }

    async fn get(&self, name: &str) -> StoreResult<VersionedBytes> {
        let name = name.to_string();
        self.blocking(move |root| {
            let path = blob_path(root, &name)?;
            let mut file = File::open(&path).map_err(not_found(&name))?;
            let meta = file.metadata()?;
            let mut data = Vec::with_capacity(meta.len() as usize);
            file.read_to_end(&mut data)?;
            Ok(VersionedBytes {
                data: Bytes::from(data),
                etag: etag_for(&meta),
            })
        })
        .await
    }

    async fn get_range(&self, name: &str, range: Range<u64>) -> StoreResult<Bytes> {
        let name = name.to_string();
        self.blocking(move |root| {
            let path = blob_path(root, &name)?;
            let mut file = File::open(&path).map_err(not_found(&name))?;
            let size = file.metadata()?.len();
            if range.start > range.end || range.end > size {
                return Err(StoreError::InvalidRange {
                    name,
                    start: range.start,
                    end: range.end,
                    size,
                });
            }
            file.seek(SeekFrom::Start(range.start))?;
            let mut data = vec![0u8; (range.end - range.start) as usize];
            file.read_exact(&mut data)?;
            Ok(Bytes::from(data))
        })
        .await
    }

    async fn put(&self, name: &str, data: Bytes, lease: Option<&LeaseId>) -> StoreResult<String> {
        let name = name.to_string();
        let lease = lease.cloned();
        self.blocking(move |root| {
            let path = blob_path(root, &name)?;
            let allowed = match (read_lease(&lease_path(&path))?, lease.as_ref()) {
                (LeaseState::Held(active), Some(given)) => active == *given,
                (LeaseState::Free, None) => true,
                _ => false,
            };
            if !allowed {
                return Err(StoreError::LeaseMismatch { name });
            }
            write_atomically(&path, &data)?;
            let etag = etag_for(&fs::metadata(&path)?);
            debug!(blob = %name, etag = %etag, "put");
            Ok(etag)
        })
        .await
    }

    async fn create_new(&self, name: &str, data: Bytes) -> StoreResult<bool> {
        let name = name.to_string();
        self.blocking(move |root| {
            let path = blob_path(root, &name)?;
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(&data)?;
                    file.sync_all()?;
                    Ok(true)
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn acquire_lease(&self, name: &str, duration: LeaseDuration) -> StoreResult<LeaseId> {
        let name = name.to_string();
        self.blocking(move |root| {
            let path = blob_path(root, &name)?;
            if !path.is_file() {
                return Err(StoreError::NotFound(name));
            }
            let lease_file = lease_path(&path);
            // Two attempts: the second one follows reclaiming an expired lease.
            for _ in 0..2 {
                match OpenOptions::new().write(true).create_new(true).open(&lease_file) {
                    Ok(mut file) => {
                        let lease = LeaseFile {
                            lease_id: LeaseId::generate(),
                            expires_at: duration.as_duration().and_then(|d| {
                                chrono::Duration::from_std(d).ok().map(|d| Utc::now() + d)
                            }),
                        };
                        let raw = serde_json::to_vec(&lease)
                            .map_err(|e| StoreError::Serialization(e.to_string()))?;
                        file.write_all(&raw)?;
                        file.sync_all()?;
                        return Ok(lease.lease_id);
                    }
                    Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                        // A sidecar we cannot inspect may belong to a live
                        // holder, so it counts as held.
                        let state = read_lease(&lease_file).unwrap_or_else(|err| {
                            debug!(blob = %name, error = %err, "lease file unreadable; treating as held");
                            LeaseState::Pending
                        });
                        let reclaimed = match state {
                            LeaseState::Free => reclaim_expired(&lease_file),
                            LeaseState::Held(_) | LeaseState::Pending => false,
                        };
                        if !reclaimed {
                            return Err(StoreError::LeaseAlreadyPresent { name });
                        }
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            Err(StoreError::LeaseAlreadyPresent { name })
        })
        .await
    }

    async fn release_lease(&self, name: &str, lease: &LeaseId) -> StoreResult<()> {
        let name = name.to_string();
        let lease = lease.clone();
        self.blocking(move |root| {
            let path = blob_path(root, &name)?;
            let lease_file = lease_path(&path);
            match read_lease(&lease_file)? {
                LeaseState::Held(active) if active == lease => remove_if_present(&lease_file),
                LeaseState::Held(_) | LeaseState::Pending => {
                    Err(StoreError::LeaseMismatch { name })
                }
                LeaseState::Free => Err(StoreError::LeaseNotPresent { name }),
            }
        })
        .await
    }

    async fn break_lease(&self, name: &str) -> StoreResult<()> {
        let name = name.to_string();
        self.blocking(move |root| {
            let path = blob_path(root, &name)?;
            if !path.is_file() {
                return Err(StoreError::NotFound(name));
            }
            remove_if_present(&lease_path(&path))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, FsBlobStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::open(dir.path()).unwrap();
        (dir, store)
    }

    fn fifteen_secs() -> LeaseDuration {
        LeaseDuration::Fixed(Duration::from_secs(15))
    }

    #[tokio::test]
    async fn lists_nested_blobs_with_slash_names() {
        let (dir, store) = store();
        fs::create_dir_all(dir.path().join("logs/2024")).unwrap();
        fs::write(dir.path().join("logs/2024/a.log"), b"hello").unwrap();
        fs::write(dir.path().join("top.log"), b"x").unwrap();

        let all = store.list_all(100).await.unwrap();
        let names: Vec<_> = all.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["logs/2024/a.log", "top.log"]);
        assert_eq!(all[0].size, 5);
    }

    #[tokio::test]
    async fn listing_hides_lease_files() {
        let (_dir, store) = store();
        store.create_new("data/registry", Bytes::from_static(b"{}")).await.unwrap();
        store.acquire_lease("data/registry", fifteen_secs()).await.unwrap();
        let names: Vec<_> = store
            .list_all(100)
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.name)
            .collect();
        assert_eq!(names, vec!["data/registry".to_string()]);
    }

    #[tokio::test]
    async fn paging_with_marker() {
        let (dir, store) = store();
        for name in ["a", "b", "c"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        let first = store.list_page(None, 2).await.unwrap();
        assert_eq!(first.next_marker.as_deref(), Some("b"));
        let second = store.list_page(first.next_marker.as_deref(), 2).await.unwrap();
        assert_eq!(second.blobs.len(), 1);
        assert_eq!(second.blobs[0].name, "c");
        assert!(second.next_marker.is_none());
    }

    #[tokio::test]
    async fn ranged_read() {
        let (dir, store) = store();
        fs::write(dir.path().join("blob"), b"0123456789").unwrap();
        assert_eq!(&store.get_range("blob", 3..7).await.unwrap()[..], b"3456");
        assert!(matches!(
            store.get_range("blob", 5..20).await,
            Err(StoreError::InvalidRange { .. })
        ));
        assert!(store.get("nope").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn lease_protocol() {
        let (_dir, store) = store();
        assert!(store.create_new("registry", Bytes::from_static(b"{}")).await.unwrap());
        assert!(!store.create_new("registry", Bytes::from_static(b"{}")).await.unwrap());

        let lease = store.acquire_lease("registry", fifteen_secs()).await.unwrap();
        assert!(store
            .acquire_lease("registry", fifteen_secs())
            .await
            .unwrap_err()
            .is_lease_contention());

        assert!(matches!(
            store.put("registry", Bytes::from_static(b"[]"), None).await,
            Err(StoreError::LeaseMismatch { .. })
        ));
        store
            .put("registry", Bytes::from_static(b"{\"a\":1}"), Some(&lease))
            .await
            .unwrap();
        assert_eq!(&store.get("registry").await.unwrap().data[..], b"{\"a\":1}");

        store.release_lease("registry", &lease).await.unwrap();
        store.put("registry", Bytes::from_static(b"{}"), None).await.unwrap();
    }

    #[tokio::test]
    async fn expired_lease_is_reclaimed() {
        let (_dir, store) = store();
        store.create_new("registry", Bytes::from_static(b"{}")).await.unwrap();
        store
            .acquire_lease("registry", LeaseDuration::Fixed(Duration::ZERO))
            .await
            .unwrap();
        assert!(store.acquire_lease("registry", fifteen_secs()).await.is_ok());
    }

    #[tokio::test]
    async fn unreadable_lease_file_counts_as_held() {
        let (dir, store) = store();
        store.create_new("registry", Bytes::from_static(b"{}")).await.unwrap();
        fs::create_dir(dir.path().join("registry.lease")).unwrap();

        let err = store.acquire_lease("registry", fifteen_secs()).await.unwrap_err();
        assert!(err.is_lease_contention());
        assert!(dir.path().join("registry.lease").is_dir());
    }

    #[tokio::test]
    async fn reclaim_puts_back_a_fresh_lease() {
        let (dir, store) = store();
        store.create_new("registry", Bytes::from_static(b"{}")).await.unwrap();
        let lease = store.acquire_lease("registry", fifteen_secs()).await.unwrap();
        let lease_file = dir.path().join("registry.lease");

        // A reclaimer that saw an older, expired lease at this path.
        assert!(!reclaim_expired(&lease_file));
        assert!(matches!(read_lease(&lease_file).unwrap(), LeaseState::Held(id) if id == lease));
        store.release_lease("registry", &lease).await.unwrap();

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with(TEMP_PREFIX))
            .collect();
        assert!(leftovers.is_empty(), "{leftovers:?}");
    }

    #[tokio::test]
    async fn reclaim_removes_an_expired_lease() {
        let (dir, store) = store();
        store.create_new("registry", Bytes::from_static(b"{}")).await.unwrap();
        store
            .acquire_lease("registry", LeaseDuration::Fixed(Duration::ZERO))
            .await
            .unwrap();
        let lease_file = dir.path().join("registry.lease");

        assert!(reclaim_expired(&lease_file));
        assert!(!lease_file.exists());
        assert!(reclaim_expired(&lease_file));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn break_clears_infinite_lease() {
        let (_dir, store) = store();
        store.create_new("registry", Bytes::from_static(b"{}")).await.unwrap();
        store
            .acquire_lease("registry", LeaseDuration::Infinite)
            .await
            .unwrap();
        store.break_lease("registry").await.unwrap();
        assert!(store.acquire_lease("registry", fifteen_secs()).await.is_ok());
    }

    #[tokio::test]
    async fn rejects_escaping_names() {
        let (_dir, store) = store();
        for bad in ["../outside", "/abs", "a/../b", "x.lease", ""] {
            assert!(
                matches!(store.get(bad).await, Err(StoreError::InvalidName(_))),
                "{bad} should be rejected"
            );
        }
    }
}
