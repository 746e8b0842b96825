//! Foundation types for Lode.
//!
//! Lode lets independent workers share a growing set of append-only blobs
//! without a coordinator. The only shared state is a single registry
//! document stored next to the blobs; this crate defines that document and
//! the values that flow through every other Lode crate.
//!
//! # Key Types
//!
//! - [`RegistryItem`]: per-blob progress and ownership record
//! - [`Registry`]: the registry document: blob name → [`RegistryItem`]
//! - [`ReaderId`]: identity of one worker instance
//! - [`BlobInfo`]: one entry of a store listing

pub mod blob;
pub mod error;
pub mod item;
pub mod reader;
pub mod registry;

pub use blob::BlobInfo;
pub use error::TypeError;
pub use item::{RegistryItem, DEFAULT_MAX_GENERATION};
pub use reader::ReaderId;
pub use registry::Registry;
