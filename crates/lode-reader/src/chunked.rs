use std::ops::Range;
use std::sync::Arc;

use bytes::Bytes;
use tracing::trace;

use lode_store::BlobStore;

use crate::error::{ReaderError, ReaderResult};

/// One range read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
    /// Blob offset of the first byte.
    pub offset: u64,
    pub data: Bytes,
    /// Whether bytes remain before the bound after this chunk.
    pub more_available: bool,
}

impl Chunk {
    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Offset one past the last byte.
    pub fn end(&self) -> u64 {
        self.offset + self.len()
    }
}

/// Sequential reader over `[start, end)` of a single blob.
///
/// Used for one pass and then dropped.
pub struct ChunkedReader {
    store: Arc<dyn BlobStore>,
    blob: String,
    cursor: u64,
    end: u64,
    chunk_size: u64,
}

impl ChunkedReader {
    pub fn new(
        store: Arc<dyn BlobStore>,
        blob: impl Into<String>,
        range: Range<u64>,
        chunk_size: u64,
    ) -> ReaderResult<Self> {
        if chunk_size == 0 {
            return Err(ReaderError::ZeroChunkSize);
        }
        Ok(Self {
            store,
            blob: blob.into(),
            cursor: range.start,
            end: range.end,
            chunk_size,
        })
    }

    pub fn blob(&self) -> &str {
        &self.blob
    }

    /// Offset of the next byte to read.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn remaining(&self) -> u64 {
        self.end.saturating_sub(self.cursor)
    }

    /// Fetch the next chunk, or `None` once the bound is reached.
    pub async fn read(&mut self) -> ReaderResult<Option<Chunk>> {
        if self.cursor >= self.end {
            return Ok(None);
        }
        let stop = self.end.min(self.cursor.saturating_add(self.chunk_size));
        let data = self.store.get_range(&self.blob, self.cursor..stop).await?;
        if data.is_empty() {
            return Err(ReaderError::ShortRead {
                blob: self.blob.clone(),
                offset: self.cursor,
            });
        }

        let offset = self.cursor;
        self.cursor += data.len() as u64;
        trace!(blob = %self.blob, offset, len = data.len(), "chunk read");
        Ok(Some(Chunk {
            offset,
            data,
            more_available: self.cursor < self.end,
        }))
    }
}
