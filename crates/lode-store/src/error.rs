/// Errors from blob store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The named blob does not exist.
    #[error("blob not found: {0}")]
    NotFound(String),

    /// Another party currently holds the lease.
    #[error("lease already present on {name}")]
    LeaseAlreadyPresent { name: String },

    /// A leased operation presented no token or the wrong one.
    #[error("lease mismatch on {name}")]
    LeaseMismatch { name: String },

    /// Release was requested but no lease is active.
    #[error("no active lease on {name}")]
    LeaseNotPresent { name: String },

    /// Requested byte range lies outside the blob.
    #[error("invalid range {start}..{end} for {name} (size {size})")]
    InvalidRange {
        name: String,
        start: u64,
        end: u64,
        size: u64,
    },

    /// The blob name cannot be mapped onto this backend.
    #[error("invalid blob name: {0:?}")]
    InvalidName(String),

    /// A path filter pattern failed to compile.
    #[error("invalid path filter: {0}")]
    InvalidFilter(String),

    /// The store did not answer in time. The operation may or may not have
    /// taken effect.
    #[error("store operation timed out: {0}")]
    Timeout(String),

    /// Serialization of backend metadata failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// The lease is held by someone else. Waiting is the only remedy.
    pub fn is_lease_contention(&self) -> bool {
        matches!(self, StoreError::LeaseAlreadyPresent { .. })
    }

    /// Failures after which the store may have granted a lease nobody
    /// knows the token of. Only timeouts qualify: an I/O error says nothing
    /// about whether the lease is stuck or held by a healthy worker.
    pub fn may_leave_stuck_lease(&self) -> bool {
        matches!(self, StoreError::Timeout(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
