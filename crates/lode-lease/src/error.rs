use lode_store::StoreError;
use thiserror::Error;

/// Errors from registry persistence.
#[derive(Debug, Error)]
pub enum PersistError {
    /// Lease retries ran out while another worker held the lease.
    #[error("registry lease on {path} still held after {attempts} retries")]
    LeaseContention { path: String, attempts: u32 },

    #[error("registry document {path} does not exist")]
    RegistryMissing { path: String },

    #[error("registry document {path} is corrupt: {reason}")]
    RegistryCorrupt { path: String, reason: String },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl PersistError {
    pub fn is_lease_contention(&self) -> bool {
        matches!(self, PersistError::LeaseContention { .. })
    }
}

pub type PersistResult<T> = Result<T, PersistError>;
