//! Live-reference accounting for compound items.
//!
//! The counter keeps an exact tally of stack references (items sitting on
//! evaluation stacks, in slots or on the result stack) and, lazily, of the
//! parent-to-child edges reachable from those roots. After each instruction
//! the engine polls [`ReferenceCounter::check_zero_referred`] and faults when
//! the returned bound exceeds the stack size limit, so adversarial scripts
//! cannot grow the live object graph without tripping it.
//!
//! Arrays and maps can form cycles. The checkpoint sweep walks the graph
//! from the roots with a visited set, so cycles are counted once while they
//! stay reachable and drop out of the count as soon as no root reaches them.

use std::cell::RefCell;
use std::rc::Rc;

use hashbrown::{HashMap, HashSet};

use crate::stack_item::StackItem;

/// A cloneable handle to the engine's reference accounting.
#[derive(Clone, Debug, Default)]
pub struct ReferenceCounter {
    inner: Rc<RefCell<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
    /// Exact number of items currently held by stacks and slots.
    stack_references: usize,
    /// Tracked items (compounds and buffers) with at least one stack
    /// reference; the stored clone keeps the cell alive for the sweep.
    roots: HashMap<usize, RootEntry>,
    /// Parent-to-child edge count from the last sweep.
    cached_edges: usize,
    /// Set when the object graph may have changed since the last sweep.
    dirty: bool,
}

#[derive(Debug)]
struct RootEntry {
    item: StackItem,
    count: usize,
}

/// Compounds and buffers participate in graph tracking; scalars only count
/// as stack references.
fn needs_tracking(item: &StackItem) -> bool {
    matches!(
        item,
        StackItem::Array(_) | StackItem::Struct(_) | StackItem::Map(_) | StackItem::Buffer(_)
    )
}

/// A tracked item's cell address, used as its identity while it is alive.
fn tracking_id(item: &StackItem) -> Option<usize> {
    match item {
        StackItem::Array(cell) | StackItem::Struct(cell) => Some(Rc::as_ptr(cell) as usize),
        StackItem::Map(cell) => Some(Rc::as_ptr(cell) as usize),
        StackItem::Buffer(cell) => Some(Rc::as_ptr(cell) as usize),
        _ => None,
    }
}

impl ReferenceCounter {
    /// Creates a fresh counter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `item` entered an evaluation stack or slot.
    pub fn add_stack_reference(&self, item: &StackItem) {
        let mut inner = self.inner.borrow_mut();
        inner.stack_references += 1;
        if let Some(id) = tracking_id(item) {
            inner
                .roots
                .entry(id)
                .or_insert_with(|| RootEntry {
                    item: item.clone(),
                    count: 0,
                })
                .count += 1;
            inner.dirty = true;
        }
    }

    /// Records that `item` left an evaluation stack or slot.
    pub fn remove_stack_reference(&self, item: &StackItem) {
        let mut inner = self.inner.borrow_mut();
        inner.stack_references = inner.stack_references.saturating_sub(1);
        if let Some(id) = tracking_id(item) {
            if let Some(entry) = inner.roots.get_mut(&id) {
                entry.count = entry.count.saturating_sub(1);
                if entry.count == 0 {
                    inner.roots.remove(&id);
                }
            }
            inner.dirty = true;
        }
    }

    /// Records that `parent` gained `child`.
    pub fn add_reference(&self, child: &StackItem, _parent: &StackItem) {
        if needs_tracking(child) {
            self.inner.borrow_mut().dirty = true;
        }
    }

    /// Records that `parent` lost `child`.
    pub fn remove_reference(&self, child: &StackItem, _parent: &StackItem) {
        if needs_tracking(child) {
            self.inner.borrow_mut().dirty = true;
        }
    }

    /// Exact number of items on stacks and in slots.
    pub fn stack_references(&self) -> usize {
        self.inner.borrow().stack_references
    }

    /// The bound most recently computed, without sweeping.
    pub fn count(&self) -> usize {
        let inner = self.inner.borrow();
        inner.stack_references + inner.cached_edges
    }

    /// Returns an upper bound on the number of live items: stack references
    /// plus compound child edges reachable from the roots. Re-walks the
    /// graph only when something changed since the last call; unreachable
    /// subgraphs, cyclic or not, no longer contribute.
    pub fn check_zero_referred(&self) -> usize {
        let mut inner = self.inner.borrow_mut();
        if inner.dirty {
            let roots: Vec<StackItem> =
                inner.roots.values().map(|entry| entry.item.clone()).collect();
            inner.cached_edges = count_live_edges(&roots);
            inner.dirty = false;
            log::trace!(
                "reference sweep: {} stack refs, {} live edges",
                inner.stack_references,
                inner.cached_edges
            );
        }
        inner.stack_references + inner.cached_edges
    }
}

/// Walks the object graph from `roots`, counting every edge to a tracked
/// child. Each cell is expanded once; revisits only count the edge.
fn count_live_edges(roots: &[StackItem]) -> usize {
    let mut visited: HashSet<usize> = HashSet::new();
    let mut pending: Vec<StackItem> = Vec::new();
    let mut edges = 0usize;

    for root in roots {
        if let Some(id) = tracking_id(root) {
            if visited.insert(id) {
                pending.push(root.clone());
            }
        }
    }

    while let Some(item) = pending.pop() {
        let children: Vec<StackItem> = match &item {
            StackItem::Array(cell) | StackItem::Struct(cell) => cell.borrow().clone(),
            StackItem::Map(cell) => cell.borrow().values().cloned().collect(),
            _ => Vec::new(),
        };
        for child in children {
            if let Some(id) = tracking_id(&child) {
                edges += 1;
                if visited.insert(id) {
                    pending.push(child);
                }
            }
        }
    }

    edges
}
