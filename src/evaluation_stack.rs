//! The per-frame operand stack.

use crate::error::{VmError, VmResult};
use crate::reference_counter::ReferenceCounter;
use crate::stack_item::{StackItem, StackItemType};

/// An ordered sequence of stack items. Index 0 addresses the top; every
/// mutation keeps the reference counter in sync.
#[derive(Debug)]
pub struct EvaluationStack {
    /// Bottom-first storage; the last element is the top of the stack.
    items: Vec<StackItem>,
    reference_counter: ReferenceCounter,
}

impl EvaluationStack {
    /// Creates an empty stack wired to `reference_counter`.
    pub fn new(reference_counter: ReferenceCounter) -> Self {
        Self {
            items: Vec::new(),
            reference_counter,
        }
    }

    /// The counter this stack reports to.
    pub fn reference_counter(&self) -> &ReferenceCounter {
        &self.reference_counter
    }

    /// The number of items on the stack.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` when the stack is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Pushes `item` onto the top of the stack.
    pub fn push(&mut self, item: StackItem) {
        self.reference_counter.add_stack_reference(&item);
        self.items.push(item);
    }

    /// Pops the top item.
    pub fn pop(&mut self) -> VmResult<StackItem> {
        match self.items.pop() {
            Some(item) => {
                self.reference_counter.remove_stack_reference(&item);
                Ok(item)
            }
            None => Err(VmError::stack_underflow(1, 0)),
        }
    }

    /// The item `index` positions below the top, without removing it.
    pub fn peek(&self, index: usize) -> VmResult<&StackItem> {
        if index >= self.items.len() {
            return Err(VmError::stack_underflow(index + 1, self.items.len()));
        }
        Ok(&self.items[self.items.len() - 1 - index])
    }

    /// Inserts `item` so that it ends up `index` positions below the top.
    pub fn insert(&mut self, index: usize, item: StackItem) -> VmResult<()> {
        if index > self.items.len() {
            return Err(VmError::stack_underflow(index, self.items.len()));
        }
        self.reference_counter.add_stack_reference(&item);
        let position = self.items.len() - index;
        self.items.insert(position, item);
        Ok(())
    }

    /// Removes and returns the item `index` positions below the top.
    pub fn remove(&mut self, index: usize) -> VmResult<StackItem> {
        if index >= self.items.len() {
            return Err(VmError::stack_underflow(index + 1, self.items.len()));
        }
        let position = self.items.len() - 1 - index;
        let item = self.items.remove(position);
        self.reference_counter.remove_stack_reference(&item);
        Ok(item)
    }

    /// Removes the item `index` positions below the top, verifying its type
    /// tag first.
    pub fn remove_of_type(&mut self, index: usize, expected: StackItemType) -> VmResult<StackItem> {
        let actual = self.peek(index)?.item_type();
        if actual != expected {
            return Err(VmError::type_mismatch(
                format!("{expected:?}"),
                format!("{actual:?}"),
            ));
        }
        self.remove(index)
    }

    /// Reverses the order of the top `count` items.
    pub fn reverse(&mut self, count: usize) -> VmResult<()> {
        if count > self.items.len() {
            return Err(VmError::stack_underflow(count, self.items.len()));
        }
        if count > 1 {
            let start = self.items.len() - count;
            self.items[start..].reverse();
        }
        Ok(())
    }

    /// Removes every item.
    pub fn clear(&mut self) {
        for item in self.items.drain(..) {
            self.reference_counter.remove_stack_reference(&item);
        }
    }

    /// Moves every item onto `target`, preserving bottom-to-top order, and
    /// leaves this stack empty.
    pub fn copy_to(&mut self, target: &mut EvaluationStack) {
        for item in &self.items {
            target.reference_counter.add_stack_reference(item);
            self.reference_counter.remove_stack_reference(item);
        }
        target.items.append(&mut self.items);
    }

    /// Iterates the items from bottom to top.
    pub fn iter(&self) -> std::slice::Iter<'_, StackItem> {
        self.items.iter()
    }
}

impl Drop for EvaluationStack {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_bigint::BigInt;

    fn int_at(stack: &EvaluationStack, index: usize) -> BigInt {
        stack
            .peek(index)
            .expect("peek")
            .as_int()
            .expect("integer item")
    }

    #[test]
    fn test_push_pop_peek() {
        let mut stack = EvaluationStack::new(ReferenceCounter::new());
        stack.push(StackItem::from_int(1));
        stack.push(StackItem::from_int(2));
        stack.push(StackItem::from_int(3));

        assert_eq!(stack.len(), 3);
        assert_eq!(int_at(&stack, 0), BigInt::from(3));
        assert_eq!(int_at(&stack, 2), BigInt::from(1));
        assert!(stack.peek(3).is_err());

        assert_eq!(
            stack.pop().expect("pop").as_int().expect("int"),
            BigInt::from(3)
        );
        assert_eq!(stack.len(), 2);
    }

    #[test]
    fn test_pop_empty_underflows() {
        let mut stack = EvaluationStack::new(ReferenceCounter::new());
        assert!(stack.pop().is_err());
    }

    #[test]
    fn test_insert_remove() {
        let mut stack = EvaluationStack::new(ReferenceCounter::new());
        stack.push(StackItem::from_int(1));
        stack.push(StackItem::from_int(3));

        // insert below the top, as TUCK would
        stack.insert(1, StackItem::from_int(2)).expect("insert");
        assert_eq!(int_at(&stack, 0), BigInt::from(3));
        assert_eq!(int_at(&stack, 1), BigInt::from(2));
        assert_eq!(int_at(&stack, 2), BigInt::from(1));

        let removed = stack.remove(1).expect("remove");
        assert_eq!(removed.as_int().expect("int"), BigInt::from(2));
        assert_eq!(stack.len(), 2);
        assert!(stack.remove(5).is_err());
    }

    #[test]
    fn test_remove_of_type() {
        let mut stack = EvaluationStack::new(ReferenceCounter::new());
        stack.push(StackItem::from_int(7));
        assert!(stack.remove_of_type(0, StackItemType::Array).is_err());
        assert_eq!(stack.len(), 1);
        assert!(stack.remove_of_type(0, StackItemType::Integer).is_ok());
        assert!(stack.is_empty());
    }

    #[test]
    fn test_reverse() {
        let mut stack = EvaluationStack::new(ReferenceCounter::new());
        for i in 1..=5 {
            stack.push(StackItem::from_int(i));
        }
        stack.reverse(3).expect("reverse");
        assert_eq!(int_at(&stack, 0), BigInt::from(3));
        assert_eq!(int_at(&stack, 1), BigInt::from(4));
        assert_eq!(int_at(&stack, 2), BigInt::from(5));
        assert_eq!(int_at(&stack, 3), BigInt::from(2));

        stack.reverse(5).expect("reverse");
        stack.reverse(5).expect("reverse");
        assert_eq!(int_at(&stack, 3), BigInt::from(2));

        assert!(stack.reverse(6).is_err());
        stack.reverse(0).expect("reverse of nothing");
        stack.reverse(1).expect("reverse of one");
    }

    #[test]
    fn test_copy_to_preserves_order_and_empties_source() {
        let counter = ReferenceCounter::new();
        let mut source = EvaluationStack::new(counter.clone());
        let mut target = EvaluationStack::new(counter.clone());

        target.push(StackItem::from_int(0));
        for i in 1..=3 {
            source.push(StackItem::from_int(i));
        }
        assert_eq!(counter.check_zero_referred(), 4);

        source.copy_to(&mut target);

        assert!(source.is_empty());
        assert_eq!(target.len(), 4);
        assert_eq!(int_at(&target, 0), BigInt::from(3));
        assert_eq!(int_at(&target, 1), BigInt::from(2));
        assert_eq!(int_at(&target, 2), BigInt::from(1));
        assert_eq!(int_at(&target, 3), BigInt::from(0));
        // a move between stacks on the same counter is reference-neutral
        assert_eq!(counter.check_zero_referred(), 4);
    }

    #[test]
    fn test_clear_releases_references() {
        let counter = ReferenceCounter::new();
        let mut stack = EvaluationStack::new(counter.clone());
        stack.push(StackItem::from_array(vec![StackItem::from_int(1)]));
        stack.push(StackItem::from_int(2));
        assert_eq!(counter.check_zero_referred(), 2);

        stack.clear();
        assert!(stack.is_empty());
        assert_eq!(counter.check_zero_referred(), 0);
    }
}
