use std::sync::Arc;

use tracing::{debug, info};

use lode_lease::{PersistError, RegistryPersister};
use lode_store::{BlobFilter, BlobStore};
use lode_types::{BlobInfo, ReaderId, Registry, RegistryItem};

use crate::config::{CreatePolicy, SchedulerConfig};
use crate::error::SchedResult;
use crate::policy::{self, Claim, ReconcileReport};

/// Decides which blob a reader works on next.
pub struct Scheduler {
    store: Arc<dyn BlobStore>,
    persister: RegistryPersister,
    filter: BlobFilter,
    config: SchedulerConfig,
    reader: ReaderId,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn BlobStore>,
        persister: RegistryPersister,
        config: SchedulerConfig,
        reader: ReaderId,
    ) -> SchedResult<Self> {
        let filter = BlobFilter::new(&config.path_filters)?;
        Ok(Self {
            store,
            persister,
            filter,
            config,
            reader,
        })
    }

    pub fn reader(&self) -> &ReaderId {
        &self.reader
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn persister(&self) -> &RegistryPersister {
        &self.persister
    }

    /// Candidate blobs: the filtered listing, minus the registry itself.
    pub async fn candidates(&self) -> SchedResult<Vec<BlobInfo>> {
        let registry_path = self.persister.registry_path();
        let blobs = self.store.list_all(self.config.list_page_size).await?;
        Ok(blobs
            .into_iter()
            .filter(|b| b.name != registry_path && self.filter.matches(&b.name))
            .collect())
    }

    /// Claim the next blob for this reader, or `None` if nothing has unread
    /// bytes this reader may take.
    ///
    /// Creates the registry first when it does not exist yet.
    pub async fn next_blob(&self) -> SchedResult<Option<Claim>> {
        let listing = self.candidates().await?;
        match self.decide(&listing).await {
            Err(PersistError::RegistryMissing { .. }) => {
                self.bootstrap(&listing).await?;
                Ok(self.decide(&listing).await?)
            }
            other => Ok(other?),
        }
    }

    /// Seed a missing registry according to the create policy.
    ///
    /// Returns `false` when the registry already existed, in which case it
    /// is left untouched.
    pub async fn bootstrap(&self, listing: &[BlobInfo]) -> SchedResult<bool> {
        let seed: Registry = match self.config.create_policy {
            CreatePolicy::Resume => listing
                .iter()
                .map(|b| RegistryItem::new(&b.name, &b.etag).with_offset(b.size))
                .collect(),
            CreatePolicy::StartOver => Registry::new(),
        };
        let created = self.persister.create_seeded(&seed).await?;
        if created {
            info!(
                registry = self.persister.registry_path(),
                policy = ?self.config.create_policy,
                items = seed.len(),
                "registry created"
            );
        } else {
            debug!(registry = self.persister.registry_path(), "registry created concurrently");
        }
        Ok(created)
    }

    async fn decide(&self, listing: &[BlobInfo]) -> Result<Option<Claim>, PersistError> {
        let reader = &self.reader;
        let config = &self.config;
        let claim = self
            .persister
            .with_registry(|registry| {
                let report = policy::reconcile(registry, listing);
                if report != ReconcileReport::default() {
                    debug!(
                        added = report.added,
                        removed = report.removed,
                        reset = report.reset,
                        "registry reconciled"
                    );
                }
                let candidates = policy::eligible(registry, listing, reader, config.reserved_tail_bytes);
                let chosen = policy::pick(registry, &candidates, config.poll_interval())?.clone();
                Some(policy::claim(registry, &chosen, reader, config.max_generation))
            })
            .await?;

        match &claim {
            Some(c) => debug!(
                reader = %self.reader.short_id(),
                blob = %c.blob.name,
                offset = c.offset,
                generation = c.generation,
                "blob claimed"
            ),
            None => debug!(reader = %self.reader.short_id(), "no eligible blob"),
        }
        Ok(claim)
    }
}
