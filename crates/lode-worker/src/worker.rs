use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use lode_lease::{PersistError, RegistryPersister};
use lode_reader::{ChunkedReader, Framing, JsonStreamParser, ParseEvent, StreamParser};
use lode_sched::{Claim, Scheduler};
use lode_store::BlobStore;
use lode_types::{ReaderId, RegistryItem};

use crate::config::{ContentMode, WorkerConfig};
use crate::error::{WorkerError, WorkerResult};
use crate::sink::{OutputSink, Record};

/// What one pass did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PassOutcome {
    /// Nothing was eligible.
    Idle,
    Processed {
        blob: String,
        /// Offset the pass started from.
        from: u64,
        /// Offset recorded by the final checkpoint.
        to: u64,
        records: u64,
    },
}

/// Offset bookkeeping for one pass.
struct Progress {
    blob_id: String,
    etag: String,
    generation: u64,
    start: u64,
    consumed: u64,
    entries: u64,
    records: u64,
}

impl Progress {
    fn new(claim: &Claim, start: u64) -> Self {
        Self {
            blob_id: claim.blob.name.clone(),
            etag: claim.blob.etag.clone(),
            generation: claim.generation,
            start,
            consumed: 0,
            entries: 0,
            records: 0,
        }
    }

    fn offset(&self) -> u64 {
        self.start + self.consumed
    }

    fn item(&self, owner: Option<ReaderId>) -> RegistryItem {
        RegistryItem::new(&self.blob_id, &self.etag)
            .with_offset(self.offset())
            .with_owner(owner)
            .with_generation(self.generation)
    }
}

pub struct Worker {
    store: Arc<dyn BlobStore>,
    persister: RegistryPersister,
    scheduler: Scheduler,
    sink: Arc<dyn OutputSink>,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(
        store: Arc<dyn BlobStore>,
        sink: Arc<dyn OutputSink>,
        config: WorkerConfig,
    ) -> WorkerResult<Self> {
        config.validate()?;
        let reader = match &config.reader_id {
            Some(id) => ReaderId::new(id.as_str())
                .map_err(|e| WorkerError::InvalidConfig(e.to_string()))?,
            None => ReaderId::generate(),
        };
        let persister = RegistryPersister::new(store.clone(), config.lease.clone());
        let mut scheduler_config = config.scheduler.clone();
        scheduler_config.reserved_tail_bytes = config.reader.file_tail_bytes;
        let scheduler = Scheduler::new(store.clone(), persister.clone(), scheduler_config, reader)?;
        Ok(Self {
            store,
            persister,
            scheduler,
            sink,
            config,
        })
    }

    pub fn reader(&self) -> &ReaderId {
        self.scheduler.reader()
    }

    pub fn persister(&self) -> &RegistryPersister {
        &self.persister
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Claim one blob and drain it.
    ///
    /// The final checkpoint runs whether or not draining succeeded, so
    /// everything emitted is recorded and the blob is released. A draining
    /// error takes precedence over a checkpoint error.
    pub async fn process_once(&self) -> WorkerResult<PassOutcome> {
        let Some(claim) = self.scheduler.next_blob().await? else {
            return Ok(PassOutcome::Idle);
        };
        let range = self
            .config
            .reader
            .readable_range(claim.offset, claim.blob.size);
        info!(
            blob = %claim.blob.name,
            offset = claim.offset,
            size = claim.blob.size,
            "processing blob"
        );

        let mut progress = Progress::new(&claim, range.start);
        let drained = self.drain(&claim, range, &mut progress).await;
        let checkpoint = self.persister.checkpoint(progress.item(None)).await;

        match (drained, checkpoint) {
            (Err(err), checkpoint) => {
                if let Err(cp_err) = checkpoint {
                    warn!(blob = %claim.blob.name, error = %cp_err, "final checkpoint failed");
                }
                Err(err)
            }
            (Ok(()), Err(err)) => Err(err.into()),
            (Ok(()), Ok(())) => {
                debug!(
                    blob = %claim.blob.name,
                    offset = progress.offset(),
                    records = progress.records,
                    "pass complete"
                );
                Ok(PassOutcome::Processed {
                    blob: claim.blob.name,
                    from: claim.offset,
                    to: progress.offset(),
                    records: progress.records,
                })
            }
        }
    }

    async fn drain(
        &self,
        claim: &Claim,
        range: std::ops::Range<u64>,
        progress: &mut Progress,
    ) -> WorkerResult<()> {
        let blob = &claim.blob;
        let reader_config = &self.config.reader;
        let framing = Framing::fetch(
            self.store.as_ref(),
            &blob.name,
            blob.size,
            reader_config.file_head_bytes,
            reader_config.file_tail_bytes,
        )
        .await?;
        let mut reader = ChunkedReader::new(
            self.store.clone(),
            &blob.name,
            range,
            reader_config.chunk_size_bytes,
        )?;

        match self.config.content_mode {
            ContentMode::Raw => {
                while let Some(chunk) = reader.read().await? {
                    let len = chunk.len();
                    self.emit(&blob.name, framing.wrap(chunk.data)).await?;
                    progress.records += 1;
                    self.entry_processed(progress, len).await;
                }
            }
            ContentMode::Json => {
                let max_unit = usize::try_from(reader_config.max_unit_bytes).unwrap_or(usize::MAX);
                let mut parser = JsonStreamParser::with_max_unit_bytes(max_unit);
                while let Some(chunk) = reader.read().await? {
                    for event in parser.feed(&chunk.data) {
                        let consumed = event.consumed();
                        match event {
                            ParseEvent::Unit { content, .. } => {
                                self.emit(&blob.name, framing.wrap(content)).await?;
                                progress.records += 1;
                                self.entry_processed(progress, consumed).await;
                            }
                            ParseEvent::Malformed { len } => {
                                debug!(blob = %blob.name, len, "skipping malformed bytes");
                                self.entry_processed(progress, consumed).await;
                            }
                            ParseEvent::Skipped { .. } => progress.consumed += consumed,
                        }
                    }
                }
                if parser.buffered() > 0 {
                    debug!(
                        blob = %blob.name,
                        buffered = parser.buffered(),
                        "incomplete unit left for a later pass"
                    );
                }
            }
        }
        Ok(())
    }

    async fn emit(&self, blob: &str, content: bytes::Bytes) -> WorkerResult<()> {
        self.sink
            .emit(Record {
                blob: blob.to_string(),
                content,
            })
            .await
    }

    /// Account for one entry and checkpoint every `checkpoint_every`.
    /// A failed mid-pass checkpoint is logged; the final one catches up.
    async fn entry_processed(&self, progress: &mut Progress, consumed: u64) {
        progress.consumed += consumed;
        progress.entries += 1;
        if progress.entries % self.config.checkpoint_every != 0 {
            return;
        }
        let item = progress.item(Some(self.reader().clone()));
        if let Err(err) = self.persister.checkpoint(item).await {
            warn!(blob = %progress.blob_id, offset = progress.offset(), error = %err, "checkpoint failed");
        }
    }

    /// Run passes until `shutdown` is cancelled, then release every claim.
    ///
    /// A pass in flight is finished before stopping. Failed passes are
    /// logged and retried after the poll interval.
    pub async fn run(&self, shutdown: CancellationToken) -> WorkerResult<()> {
        info!(reader = %self.reader(), "worker started");
        let interval = self.config.scheduler.poll_interval();
        while !shutdown.is_cancelled() {
            match self.process_once().await {
                Ok(PassOutcome::Idle) => debug!("no eligible blob"),
                Ok(outcome) => debug!(?outcome, "pass finished"),
                Err(err) => error!(error = %err, "pass failed"),
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
        let released = self.shutdown().await?;
        info!(reader = %self.reader(), released, "worker stopped");
        Ok(())
    }

    /// Release every claim this reader holds. Returns how many there were.
    pub async fn shutdown(&self) -> WorkerResult<usize> {
        match self.persister.unregister_reader(self.reader()).await {
            Ok(released) => Ok(released),
            Err(PersistError::RegistryMissing { .. }) => Ok(0),
            Err(err) => Err(err.into()),
        }
    }
}
