use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::WorkerResult;

/// One unit of output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    /// Name of the source blob.
    pub blob: String,
    /// Record bytes, already wrapped in the blob's header and trailer.
    pub content: Bytes,
}

/// Where records go.
///
/// A record is checkpointed only after `emit` returns `Ok`, so delivery is
/// at-least-once: a crash between `emit` and the next checkpoint replays
/// the record.
#[async_trait]
pub trait OutputSink: Send + Sync {
    async fn emit(&self, record: Record) -> WorkerResult<()>;
}

/// Collects records in memory.
#[derive(Debug, Default)]
pub struct VecSink {
    records: Mutex<Vec<Record>>,
}

impl VecSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<Record> {
        self.records.lock().expect("lock poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl OutputSink for VecSink {
    async fn emit(&self, record: Record) -> WorkerResult<()> {
        self.records.lock().expect("lock poisoned").push(record);
        Ok(())
    }
}
