use std::time::Duration;

use serde::{Deserialize, Serialize};

use lode_types::DEFAULT_MAX_GENERATION;

/// How a missing registry is seeded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreatePolicy {
    /// Treat everything already in the store as consumed.
    #[default]
    Resume,
    /// Read every blob from the beginning.
    StartOver,
}

/// Configuration for the fairness scheduler.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Glob patterns selecting candidate blobs. Empty selects all.
    pub path_filters: Vec<String>,
    /// Seconds between polling cycles; also scales the staleness override.
    pub poll_interval_secs: u64,
    /// Generation ceiling; reaching it halves the generation.
    pub max_generation: u64,
    pub create_policy: CreatePolicy,
    /// Page size used when listing the store.
    pub list_page_size: usize,
    /// Trailer bytes never consumed, so a blob whose unread bytes are all
    /// trailer is not eligible. Not configurable on its own: the worker
    /// copies the reader's `file_tail_bytes` here.
    #[serde(skip)]
    pub reserved_tail_bytes: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            path_filters: Vec::new(),
            poll_interval_secs: 30,
            max_generation: DEFAULT_MAX_GENERATION,
            create_policy: CreatePolicy::default(),
            list_page_size: 100,
            reserved_tail_bytes: 0,
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}
