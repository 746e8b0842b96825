//! Reading the unread part of one blob.
//!
//! A pass over a blob reads `[offset, size - tail)` in bounded chunks with
//! [`ChunkedReader`]. Optional fixed header and trailer ranges are fetched
//! once per pass by [`Framing`] and wrapped around every record. In JSON
//! mode the chunks are pushed through a [`StreamParser`] that splits the
//! byte stream into units and reports malformed spans, so the caller can
//! advance its offset past every byte it has accounted for.

pub mod chunked;
pub mod config;
pub mod error;
pub mod framing;
pub mod json;

pub use chunked::{Chunk, ChunkedReader};
pub use config::{ReaderConfig, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_UNIT_BYTES};
pub use error::{ReaderError, ReaderResult};
pub use framing::Framing;
pub use json::{JsonStreamParser, ParseEvent, StreamParser};
