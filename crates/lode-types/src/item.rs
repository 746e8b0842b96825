use serde::{Deserialize, Serialize};

use crate::reader::ReaderId;

/// Default generation ceiling (2^62 - 1).
pub const DEFAULT_MAX_GENERATION: u64 = (1 << 62) - 1;

/// Progress and ownership record for one blob.
///
/// `offset` counts bytes already consumed and must never exceed the blob's
/// last observed size. `generation` is the fairness counter the scheduler
/// uses to round-robin across blobs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegistryItem {
    pub blob_id: String,
    pub etag: String,
    pub offset: u64,
    pub owner: Option<ReaderId>,
    pub generation: u64,
}

impl RegistryItem {
    /// A fresh, unowned item at offset 0, generation 0.
    pub fn new(blob_id: impl Into<String>, etag: impl Into<String>) -> Self {
        Self {
            blob_id: blob_id.into(),
            etag: etag.into(),
            offset: 0,
            owner: None,
            generation: 0,
        }
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_owner(mut self, owner: Option<ReaderId>) -> Self {
        self.owner = owner;
        self
    }

    pub fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    pub fn is_owned_by(&self, reader: &ReaderId) -> bool {
        self.owner.as_ref() == Some(reader)
    }

    /// Unowned, or already owned by `reader`.
    pub fn is_claimable_by(&self, reader: &ReaderId) -> bool {
        match &self.owner {
            None => true,
            Some(owner) => owner == reader,
        }
    }

    /// Bump the generation by one. Reaching `max` halves the value instead,
    /// so the counter never wraps.
    pub fn raise_generation(&mut self, max: u64) {
        let next = self.generation.saturating_add(1);
        self.generation = if next >= max { next.min(max) / 2 } else { next };
    }
}

/// On-disk shape of one registry entry. The blob name is the map key.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct ItemDocument {
    pub etag: String,
    #[serde(default)]
    pub reader: Option<ReaderId>,
    #[serde(default)]
    pub offset: u64,
    #[serde(default)]
    pub gen: u64,
}

impl ItemDocument {
    pub(crate) fn into_item(self, blob_id: String) -> RegistryItem {
        RegistryItem {
            blob_id,
            etag: self.etag,
            offset: self.offset,
            owner: self.reader,
            generation: self.gen,
        }
    }
}

impl From<&RegistryItem> for ItemDocument {
    fn from(item: &RegistryItem) -> Self {
        Self {
            etag: item.etag.clone(),
            reader: item.owner.clone(),
            offset: item.offset,
            gen: item.generation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader(id: &str) -> ReaderId {
        ReaderId::new(id).unwrap()
    }

    #[test]
    fn new_item_is_unowned_at_zero() {
        let item = RegistryItem::new("logs/a.log", "0x1");
        assert_eq!(item.offset, 0);
        assert_eq!(item.generation, 0);
        assert!(item.owner.is_none());
    }

    #[test]
    fn claimable_by_nobody_or_self() {
        let me = reader("me");
        let other = reader("other");
        let free = RegistryItem::new("a", "e");
        assert!(free.is_claimable_by(&me));

        let mine = free.clone().with_owner(Some(me.clone()));
        assert!(mine.is_claimable_by(&me));
        assert!(mine.is_owned_by(&me));
        assert!(!mine.is_claimable_by(&other));
    }

    #[test]
    fn raise_generation_increments() {
        let mut item = RegistryItem::new("a", "e").with_generation(3);
        item.raise_generation(DEFAULT_MAX_GENERATION);
        assert_eq!(item.generation, 4);
    }

    #[test]
    fn raise_generation_at_max_halves() {
        let mut item = RegistryItem::new("a", "e").with_generation(10);
        item.raise_generation(10);
        assert_eq!(item.generation, 5);
    }

    #[test]
    fn raise_generation_reaching_max_halves() {
        let mut item = RegistryItem::new("a", "e").with_generation(9);
        item.raise_generation(10);
        assert_eq!(item.generation, 5);
    }

    #[test]
    fn raise_generation_never_wraps_at_u64_max() {
        let mut item = RegistryItem::new("a", "e").with_generation(u64::MAX);
        item.raise_generation(u64::MAX);
        assert_eq!(item.generation, u64::MAX / 2);
    }
}
