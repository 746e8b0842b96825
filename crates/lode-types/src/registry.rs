use std::collections::BTreeMap;

use crate::error::TypeError;
use crate::item::{ItemDocument, RegistryItem};
use crate::reader::ReaderId;

/// The registry document: blob name → [`RegistryItem`].
///
/// Every operation here is a pure in-memory transform. Loading and saving
/// against the store, and the lease that guards it, live in `lode-lease`.
/// Keys are kept sorted so serialization is canonical.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Registry {
    items: BTreeMap<String, RegistryItem>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the serialized document.
    ///
    /// Unknown per-item fields are ignored. If an item carries a stale
    /// `blob_id`, the map key wins.
    pub fn parse(bytes: &[u8]) -> Result<Self, TypeError> {
        let docs: BTreeMap<String, ItemDocument> =
            serde_json::from_slice(bytes).map_err(|e| TypeError::Corrupt(e.to_string()))?;
        let items = docs
            .into_iter()
            .map(|(name, doc)| {
                let item = doc.into_item(name.clone());
                (name, item)
            })
            .collect();
        Ok(Self { items })
    }

    /// Canonical JSON serialization (keys sorted, compact).
    pub fn to_json(&self) -> Result<Vec<u8>, TypeError> {
        let docs: BTreeMap<&str, ItemDocument> = self
            .items
            .iter()
            .map(|(name, item)| (name.as_str(), ItemDocument::from(item)))
            .collect();
        serde_json::to_vec(&docs).map_err(|e| TypeError::Serialization(e.to_string()))
    }

    /// Insert or replace the item keyed by its `blob_id`.
    /// Returns the previous item, if any.
    pub fn upsert(&mut self, item: RegistryItem) -> Option<RegistryItem> {
        self.items.insert(item.blob_id.clone(), item)
    }

    pub fn get(&self, blob_id: &str) -> Option<&RegistryItem> {
        self.items.get(blob_id)
    }

    pub fn get_mut(&mut self, blob_id: &str) -> Option<&mut RegistryItem> {
        self.items.get_mut(blob_id)
    }

    pub fn contains(&self, blob_id: &str) -> bool {
        self.items.contains_key(blob_id)
    }

    pub fn remove(&mut self, blob_id: &str) -> Option<RegistryItem> {
        self.items.remove(blob_id)
    }

    /// Remove every listed key. Returns how many were present.
    pub fn remove_many<I, K>(&mut self, blob_ids: I) -> usize
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        blob_ids
            .into_iter()
            .filter(|id| self.items.remove(id.as_ref()).is_some())
            .count()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.items.keys().map(String::as_str)
    }

    pub fn items(&self) -> impl Iterator<Item = &RegistryItem> {
        self.items.values()
    }

    pub fn items_mut(&mut self) -> impl Iterator<Item = &mut RegistryItem> {
        self.items.values_mut()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Clear ownership of every item owned by `reader`.
    /// Returns the number of items released.
    pub fn release_owner(&mut self, reader: &ReaderId) -> usize {
        let mut released = 0;
        for item in self.items.values_mut() {
            if item.is_owned_by(reader) {
                item.owner = None;
                released += 1;
            }
        }
        released
    }

    /// Smallest generation in the registry, `None` when empty.
    pub fn min_generation(&self) -> Option<u64> {
        self.items.values().map(|item| item.generation).min()
    }

    /// Shift every generation down so the minimum becomes 0.
    pub fn renormalize_generations(&mut self) {
        if let Some(min) = self.min_generation().filter(|min| *min > 0) {
            for item in self.items.values_mut() {
                item.generation -= min;
            }
        }
    }
}

impl FromIterator<RegistryItem> for Registry {
    fn from_iter<T: IntoIterator<Item = RegistryItem>>(iter: T) -> Self {
        let mut registry = Registry::new();
        for item in iter {
            registry.upsert(item);
        }
        registry
    }
}
