use bytes::{Bytes, BytesMut};

use lode_store::BlobStore;

use crate::error::ReaderResult;

/// Fixed header and trailer of a blob, wrapped around every record.
///
/// Blobs that hold one JSON array per file are the usual case: the opening
/// `[` is the header, `]` the trailer, and each record is re-wrapped so it
/// parses on its own.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Framing {
    pub header: Bytes,
    pub trailer: Bytes,
}

impl Framing {
    /// Read the first `head` and last `tail` bytes of a blob of `size` bytes.
    /// Both ranges are clamped to the blob.
    pub async fn fetch(
        store: &dyn BlobStore,
        blob: &str,
        size: u64,
        head: u64,
        tail: u64,
    ) -> ReaderResult<Self> {
        let header = match head.min(size) {
            0 => Bytes::new(),
            n => store.get_range(blob, 0..n).await?,
        };
        let trailer = match tail.min(size) {
            0 => Bytes::new(),
            n => store.get_range(blob, size - n..size).await?,
        };
        Ok(Self { header, trailer })
    }

    pub fn is_empty(&self) -> bool {
        self.header.is_empty() && self.trailer.is_empty()
    }

    /// `header + content + trailer`.
    pub fn wrap(&self, content: Bytes) -> Bytes {
        if self.is_empty() {
            return content;
        }
        let mut out = BytesMut::with_capacity(self.header.len() + content.len() + self.trailer.len());
        out.extend_from_slice(&self.header);
        out.extend_from_slice(&content);
        out.extend_from_slice(&self.trailer);
        out.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lode_store::InMemoryBlobStore;

    #[tokio::test]
    async fn wraps_records_in_header_and_trailer() {
        let store = InMemoryBlobStore::new();
        store.insert("events.json", br#"[{"a":1},{"a":2}]"#.to_vec());
        let framing = Framing::fetch(&store, "events.json", 17, 1, 1).await.unwrap();
        assert_eq!(&framing.header[..], b"[");
        assert_eq!(&framing.trailer[..], b"]");
        assert_eq!(
            &framing.wrap(Bytes::from_static(br#"{"a":2}"#))[..],
            br#"[{"a":2}]"#
        );
    }

    #[tokio::test]
    async fn no_framing_passes_content_through() {
        let store = InMemoryBlobStore::new();
        store.insert("raw", b"abc".to_vec());
        let framing = Framing::fetch(&store, "raw", 3, 0, 0).await.unwrap();
        assert!(framing.is_empty());
        assert_eq!(&framing.wrap(Bytes::from_static(b"xyz"))[..], b"xyz");
    }

    #[tokio::test]
    async fn ranges_clamp_to_small_blobs() {
        let store = InMemoryBlobStore::new();
        store.insert("tiny", b"ab".to_vec());
        let framing = Framing::fetch(&store, "tiny", 2, 5, 5).await.unwrap();
        assert_eq!(&framing.header[..], b"ab");
        assert_eq!(&framing.trailer[..], b"ab");
    }
}
