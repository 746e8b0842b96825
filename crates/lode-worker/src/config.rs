use serde::{Deserialize, Serialize};

use lode_lease::LeaseConfig;
use lode_reader::ReaderConfig;
use lode_sched::SchedulerConfig;

use crate::error::{WorkerError, WorkerResult};

/// Shortest finite registry lease, in seconds.
pub const MIN_LEASE_SECS: i64 = 15;
/// Longest finite registry lease, in seconds.
pub const MAX_LEASE_SECS: i64 = 60;
/// Page size used when the configured one is 0.
pub const DEFAULT_LIST_PAGE_SIZE: usize = 100;

/// How blob bytes become records.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentMode {
    /// One record per chunk.
    #[default]
    Raw,
    /// One record per JSON object or array.
    Json,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Stable reader identity. A fresh one is generated when unset.
    pub reader_id: Option<String>,
    pub content_mode: ContentMode,
    /// Entries between mid-pass checkpoints.
    pub checkpoint_every: u64,
    pub lease: LeaseConfig,
    pub scheduler: SchedulerConfig,
    pub reader: ReaderConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            reader_id: None,
            content_mode: ContentMode::default(),
            checkpoint_every: 100,
            lease: LeaseConfig::default(),
            scheduler: SchedulerConfig::default(),
            reader: ReaderConfig::default(),
        }
    }
}

impl WorkerConfig {
    /// Apply the lenient defaults: a list page size of 0 means the default.
    pub fn normalize(&mut self) {
        if self.scheduler.list_page_size == 0 {
            self.scheduler.list_page_size = DEFAULT_LIST_PAGE_SIZE;
        }
    }

    pub fn validate(&self) -> WorkerResult<()> {
        let lease = self.lease.lease_duration_secs;
        if lease != -1 && !(MIN_LEASE_SECS..=MAX_LEASE_SECS).contains(&lease) {
            return Err(WorkerError::InvalidConfig(format!(
                "lease.lease_duration_secs must be -1 or within {MIN_LEASE_SECS}..={MAX_LEASE_SECS}, got {lease}"
            )));
        }
        if self.reader.chunk_size_bytes == 0 {
            return Err(WorkerError::InvalidConfig(
                "reader.chunk_size_bytes must be greater than 0".into(),
            ));
        }
        if self.reader.max_unit_bytes == 0 {
            return Err(WorkerError::InvalidConfig(
                "reader.max_unit_bytes must be greater than 0".into(),
            ));
        }
        if self.checkpoint_every == 0 {
            return Err(WorkerError::InvalidConfig(
                "checkpoint_every must be greater than 0".into(),
            ));
        }
        if self.scheduler.list_page_size == 0 {
            return Err(WorkerError::InvalidConfig(
                "scheduler.list_page_size must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}
