use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("chunk size must be greater than zero")]
    ZeroChunkSize,

    #[error("store returned no bytes for {blob} at offset {offset}")]
    ShortRead { blob: String, offset: u64 },

    #[error("store error: {0}")]
    Store(#[from] lode_store::StoreError),
}

pub type ReaderResult<T> = Result<T, ReaderError>;
