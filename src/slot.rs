//! Slot storage for static fields, local variables and arguments.
//!
//! A slot owns a fixed-size collection of stack items and keeps the
//! reference counter in sync whenever its content changes.

use crate::error::{VmError, VmResult};
use crate::reference_counter::ReferenceCounter;
use crate::stack_item::StackItem;

/// A fixed-length, randomly accessible sequence of stack items.
#[derive(Debug)]
pub struct Slot {
    items: Vec<StackItem>,
    reference_counter: ReferenceCounter,
}

impl Slot {
    /// Creates a slot populated with `items`.
    pub fn new(items: Vec<StackItem>, reference_counter: ReferenceCounter) -> Self {
        for item in &items {
            reference_counter.add_stack_reference(item);
        }
        Self {
            items,
            reference_counter,
        }
    }

    /// Creates a slot of `count` null items.
    pub fn with_count(count: usize, reference_counter: ReferenceCounter) -> Self {
        Self::new(vec![StackItem::null(); count], reference_counter)
    }

    /// The number of entries in the slot.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` for a zero-length slot.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The item stored at `index`.
    pub fn get(&self, index: usize) -> VmResult<&StackItem> {
        self.items
            .get(index)
            .ok_or_else(|| self.index_out_of_range(index))
    }

    /// Replaces the item at `index`, updating reference counts.
    pub fn set(&mut self, index: usize, item: StackItem) -> VmResult<()> {
        if index >= self.items.len() {
            return Err(self.index_out_of_range(index));
        }
        self.reference_counter.add_stack_reference(&item);
        let old = std::mem::replace(&mut self.items[index], item);
        self.reference_counter.remove_stack_reference(&old);
        Ok(())
    }

    /// Releases every reference held by the slot, leaving it empty.
    /// Invoked at frame unload; safe to call more than once.
    pub fn clear_references(&mut self) {
        for item in self.items.drain(..) {
            self.reference_counter.remove_stack_reference(&item);
        }
    }

    /// Iterates the stored items.
    pub fn iter(&self) -> std::slice::Iter<'_, StackItem> {
        self.items.iter()
    }

    fn index_out_of_range(&self, index: usize) -> VmError {
        VmError::out_of_range(format!(
            "slot index {index} out of range for size {}",
            self.items.len()
        ))
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.clear_references();
    }
}
