//! Blob store boundary for Lode.
//!
//! Lode coordinates workers through the store that holds the blobs. This
//! crate defines what Lode needs from such a store and ships two backends.
//!
//! # Required Primitives
//!
//! - paged listing with size, etag and last-modified time
//! - whole-object and byte-range reads
//! - overwrite that only succeeds while presenting the current lease
//! - atomic create-if-absent for bootstrap
//! - acquire, release and break of a time-bounded lease
//!
//! # Storage Backends
//!
//! All backends implement the [`BlobStore`] trait:
//!
//! - [`InMemoryBlobStore`]: shared-memory store for tests and embedding,
//!   with fault injection for lease failures
//! - [`FsBlobStore`]: directory-backed store for processes sharing one host
//!
//! # Error Kinds
//!
//! Retry policy upstream depends on telling lease contention apart from
//! everything else. Backends must report a held lease as
//! [`StoreError::LeaseAlreadyPresent`] and nothing else.

pub mod error;
pub mod filter;
pub mod fs;
pub mod memory;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use filter::BlobFilter;
pub use fs::FsBlobStore;
pub use memory::InMemoryBlobStore;
pub use traits::{BlobStore, LeaseDuration, LeaseId, ListPage, VersionedBytes};
