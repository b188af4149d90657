//! Wire-level stack item type tags.

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// The type tag of a stack item as it appears in CONVERT/ISTYPE/NEWARRAY_T
/// operands. Byte values follow the platform's published enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum StackItemType {
    /// Any type; only the null item reports it.
    Any = 0x00,
    /// An instruction address inside a specific script.
    Pointer = 0x10,
    /// A boolean value.
    Boolean = 0x20,
    /// An arbitrary-precision signed integer.
    Integer = 0x21,
    /// An immutable byte sequence.
    ByteString = 0x28,
    /// A mutable byte sequence.
    Buffer = 0x30,
    /// An ordered sequence of items.
    Array = 0x40,
    /// An ordered sequence of items with by-value copy semantics.
    Struct = 0x41,
    /// An insertion-ordered mapping with primitive keys.
    Map = 0x48,
    /// An opaque host handle.
    InteropInterface = 0x60,
}

impl StackItemType {
    /// Decodes a type tag from its wire byte.
    pub fn from_byte(byte: u8) -> Option<StackItemType> {
        StackItemType::try_from(byte).ok()
    }

    /// Returns `true` for a defined type tag byte.
    pub fn is_valid(byte: u8) -> bool {
        Self::from_byte(byte).is_some()
    }

    /// Boolean, Integer and ByteString are the primitive types.
    pub fn is_primitive(self) -> bool {
        matches!(
            self,
            StackItemType::Boolean | StackItemType::Integer | StackItemType::ByteString
        )
    }

    /// Array, Struct and Map are the compound types.
    pub fn is_compound(self) -> bool {
        matches!(
            self,
            StackItemType::Array | StackItemType::Struct | StackItemType::Map
        )
    }
}
