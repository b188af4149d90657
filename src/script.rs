//! Immutable script bytes with instruction decoding.

use std::rc::Rc;

use crate::error::VmResult;
use crate::instruction::Instruction;

/// An immutable byte sequence holding VM bytecode.
///
/// Cloning a script shares the underlying bytes. Two scripts compare equal
/// when they refer to the same allocation or carry identical bytes, which is
/// the equality CALLA relies on when validating a pointer's origin.
#[derive(Clone, Debug)]
pub struct Script {
    bytes: Rc<Vec<u8>>,
}

impl Script {
    /// Creates a script from raw bytecode.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Rc::new(bytes),
        }
    }

    /// The script length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns `true` for an empty script.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The raw bytecode.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Decodes the instruction starting at `position`.
    pub fn instruction_at(&self, position: usize) -> VmResult<Instruction> {
        Instruction::decode(self.as_bytes(), position)
    }
}

impl PartialEq for Script {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.bytes, &other.bytes) || self.bytes == other.bytes
    }
}

impl Eq for Script {}

impl From<Vec<u8>> for Script {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}
