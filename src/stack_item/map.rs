//! Insertion-ordered map storage for the Map stack item.

use std::hash::{Hash, Hasher};

use indexmap::IndexMap;

use crate::error::{VmError, VmResult};
use crate::stack_item::StackItem;

/// A map key: a primitive stack item plus its byte-span projection.
///
/// Keys hash and compare by span, so `Integer(1)` and `ByteString([0x01])`
/// address the same entry while `Boolean(false)` (span `[0]`) and
/// `Integer(0)` (empty span) stay distinct — the same key equivalence the
/// value model's `equals` defines for primitives.
#[derive(Debug, Clone)]
pub struct MapKey {
    item: StackItem,
    span: Vec<u8>,
}

impl MapKey {
    /// Wraps a primitive item as a map key; fails for any other variant.
    pub fn new(item: StackItem) -> VmResult<Self> {
        if !item.item_type().is_primitive() {
            return Err(VmError::type_mismatch(
                "a primitive map key".to_string(),
                format!("{:?}", item.item_type()),
            ));
        }
        let span = item.as_bytes()?;
        Ok(Self { item, span })
    }

    /// The original key item.
    pub fn item(&self) -> &StackItem {
        &self.item
    }
}

impl PartialEq for MapKey {
    fn eq(&self, other: &Self) -> bool {
        self.span == other.span
    }
}

impl Eq for MapKey {}

impl Hash for MapKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.span.hash(state);
    }
}

/// The backing storage of a Map stack item. Entries preserve insertion
/// order; removal shifts rather than swaps so the order survives.
#[derive(Debug, Clone, Default)]
pub struct OrderedMap {
    entries: IndexMap<MapKey, StackItem>,
}

impl OrderedMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when the map has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Looks up the value stored under `key`.
    pub fn get(&self, key: &MapKey) -> Option<&StackItem> {
        self.entries.get(key)
    }

    /// Returns `true` when `key` is present.
    pub fn contains_key(&self, key: &MapKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Inserts or replaces the value under `key`, returning the previous
    /// value. Re-insertion keeps the key's original position.
    pub fn insert(&mut self, key: MapKey, value: StackItem) -> Option<StackItem> {
        self.entries.insert(key, value)
    }

    /// Removes the entry under `key`, preserving the order of the rest.
    pub fn remove(&mut self, key: &MapKey) -> Option<StackItem> {
        self.entries.shift_remove(key)
    }

    /// Removes every entry, returning them in insertion order.
    pub fn drain_all(&mut self) -> Vec<(MapKey, StackItem)> {
        self.entries.drain(..).collect()
    }

    /// Iterates entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&MapKey, &StackItem)> {
        self.entries.iter()
    }

    /// Key items in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &StackItem> {
        self.entries.keys().map(MapKey::item)
    }

    /// Values in insertion order.
    pub fn values(&self) -> impl Iterator<Item = &StackItem> {
        self.entries.values()
    }
}
