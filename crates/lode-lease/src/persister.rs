use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, warn};

use lode_store::{BlobStore, StoreError};
use lode_types::{ReaderId, Registry, RegistryItem};

use crate::config::{LeaseConfig, StuckLeasePolicy};
use crate::error::{PersistError, PersistResult};
use crate::guard::LeaseGuard;

/// Loads and saves the registry document under its lease.
#[derive(Clone)]
pub struct RegistryPersister {
    store: Arc<dyn BlobStore>,
    config: LeaseConfig,
}

impl RegistryPersister {
    pub fn new(store: Arc<dyn BlobStore>, config: LeaseConfig) -> Self {
        Self { store, config }
    }

    pub fn registry_path(&self) -> &str {
        &self.config.registry_path
    }

    pub fn config(&self) -> &LeaseConfig {
        &self.config
    }

    /// Acquire the registry lease using the configured retry budget.
    pub async fn acquire_lease(&self) -> PersistResult<LeaseGuard> {
        self.acquire_lease_with(self.config.retry_limit, self.config.retry_interval())
            .await
    }

    /// Acquire the registry lease.
    ///
    /// Contention is retried up to `retry_limit` times, sleeping
    /// `retry_interval` in between. A timeout may have left a lease nobody
    /// can release; under [`StuckLeasePolicy::BreakAndRetry`]
    /// the lease is broken and acquisition retried, drawing on the same
    /// budget. Every other failure is surfaced immediately.
    pub async fn acquire_lease_with(
        &self,
        retry_limit: u32,
        retry_interval: Duration,
    ) -> PersistResult<LeaseGuard> {
        let path = self.registry_path();
        let duration = self.config.lease_duration();
        let mut attempts = 0u32;
        loop {
            let err = match self.store.acquire_lease(path, duration).await {
                Ok(lease) => {
                    debug!(registry = path, attempts, "registry lease acquired");
                    return Ok(LeaseGuard::new(path, lease));
                }
                Err(err) => err,
            };

            if err.is_lease_contention() {
                if attempts >= retry_limit {
                    return Err(PersistError::LeaseContention {
                        path: path.to_string(),
                        attempts,
                    });
                }
                attempts += 1;
                debug!(registry = path, attempts, "registry lease busy; retrying");
                tokio::time::sleep(retry_interval).await;
            } else if err.may_leave_stuck_lease()
                && self.config.stuck_lease_policy == StuckLeasePolicy::BreakAndRetry
            {
                if attempts >= retry_limit {
                    return Err(err.into());
                }
                attempts += 1;
                warn!(registry = path, error = %err, "lease acquisition failed; breaking possibly stuck lease");
                self.store.break_lease(path).await?;
            } else if err.is_not_found() {
                return Err(PersistError::RegistryMissing {
                    path: path.to_string(),
                });
            } else {
                return Err(err.into());
            }
        }
    }

    /// Release the lease, consuming the guard.
    pub async fn release_lease(&self, guard: LeaseGuard) -> PersistResult<()> {
        self.store
            .release_lease(guard.path(), guard.lease_id())
            .await?;
        debug!(registry = guard.path(), "registry lease released");
        Ok(())
    }

    /// Force-break the registry lease, whoever holds it.
    ///
    /// Operator escape hatch. Breaking a lease a healthy worker holds
    /// defeats mutual exclusion for that worker's current section.
    pub async fn break_lease(&self) -> PersistResult<()> {
        warn!(registry = self.registry_path(), "breaking registry lease");
        self.store.break_lease(self.registry_path()).await?;
        Ok(())
    }

    /// Read the current registry without taking the lease.
    pub async fn load(&self) -> PersistResult<Registry> {
        let path = self.registry_path();
        let doc = self.store.get(path).await.map_err(|e| match e {
            StoreError::NotFound(_) => PersistError::RegistryMissing {
                path: path.to_string(),
            },
            other => PersistError::Store(other),
        })?;
        Registry::parse(&doc.data).map_err(|e| PersistError::RegistryCorrupt {
            path: path.to_string(),
            reason: e.to_string(),
        })
    }

    /// Overwrite the registry document while holding the lease.
    pub async fn save(&self, registry: &Registry, guard: &LeaseGuard) -> PersistResult<()> {
        let body = registry
            .to_json()
            .map_err(|e| PersistError::Serialization(e.to_string()))?;
        self.store
            .put(guard.path(), Bytes::from(body), Some(guard.lease_id()))
            .await?;
        debug!(registry = guard.path(), items = registry.len(), "registry saved");
        Ok(())
    }

    /// Write an empty registry if none exists. Returns `false` when another
    /// worker got there first.
    pub async fn create(&self) -> PersistResult<bool> {
        self.create_seeded(&Registry::new()).await
    }

    /// Write `registry` as the initial document if none exists.
    pub async fn create_seeded(&self, registry: &Registry) -> PersistResult<bool> {
        let body = registry
            .to_json()
            .map_err(|e| PersistError::Serialization(e.to_string()))?;
        let created = self
            .store
            .create_new(self.registry_path(), Bytes::from(body))
            .await?;
        if created {
            debug!(registry = self.registry_path(), items = registry.len(), "registry created");
        }
        Ok(created)
    }

    /// Run `mutate` against a freshly loaded registry under the lease.
    ///
    /// The registry is saved only when `mutate` changed it. The lease is
    /// released on every exit path: success, load/save failure, or a panic
    /// inside `mutate` (which is resumed after the release).
    pub async fn with_registry<R, F>(&self, mutate: F) -> PersistResult<R>
    where
        F: FnOnce(&mut Registry) -> R + Send,
        R: Send,
    {
        let guard = self.acquire_lease().await?;
        let outcome = self.mutate_and_save(&guard, mutate).await;
        let released = self.release_lease(guard).await;

        match outcome {
            Ok(Ok(value)) => {
                if let Err(err) = released {
                    warn!(registry = self.registry_path(), error = %err, "failed to release registry lease");
                }
                Ok(value)
            }
            Ok(Err(err)) => {
                if let Err(release_err) = released {
                    warn!(registry = self.registry_path(), error = %release_err, "failed to release registry lease");
                }
                Err(err)
            }
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    async fn mutate_and_save<R, F>(
        &self,
        guard: &LeaseGuard,
        mutate: F,
    ) -> Result<PersistResult<R>, Box<dyn std::any::Any + Send>>
    where
        F: FnOnce(&mut Registry) -> R + Send,
        R: Send,
    {
        let mut registry = match self.load().await {
            Ok(registry) => registry,
            Err(err) => return Ok(Err(err)),
        };
        let before = registry.clone();
        let value = panic::catch_unwind(AssertUnwindSafe(|| mutate(&mut registry)))?;
        if registry != before {
            if let Err(err) = self.save(&registry, guard).await {
                return Ok(Err(err));
            }
        }
        Ok(Ok(value))
    }

    /// Reload, upsert `item`, save.
    pub async fn update(&self, item: RegistryItem) -> PersistResult<()> {
        debug!(blob = %item.blob_id, offset = item.offset, "checkpoint");
        self.with_registry(move |registry| {
            registry.upsert(item);
        })
        .await
    }

    /// Like [`update`](Self::update), but keeps the generation the registry
    /// currently holds for the blob. Other readers renormalize generations
    /// while a pass runs, so the value seen at claim time may be stale.
    pub async fn checkpoint(&self, item: RegistryItem) -> PersistResult<()> {
        debug!(blob = %item.blob_id, offset = item.offset, released = item.owner.is_none(), "checkpoint");
        self.with_registry(move |registry| {
            let generation = registry
                .get(&item.blob_id)
                .map_or(item.generation, |current| current.generation);
            registry.upsert(item.with_generation(generation));
        })
        .await
    }

    /// Clear every claim held by `reader`. Returns how many were released.
    pub async fn unregister_reader(&self, reader: &ReaderId) -> PersistResult<usize> {
        let released = self
            .with_registry(|registry| registry.release_owner(reader))
            .await?;
        debug!(reader = %reader, released, "reader unregistered");
        Ok(released)
    }
}

impl std::fmt::Debug for RegistryPersister {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryPersister")
            .field("config", &self.config)
            .finish()
    }
}
