//! The value model: tagged stack item variants.
//!
//! Compound items (Array, Struct, Map) and Buffer are shared cells: cloning
//! a stack item clones the handle, not the payload, so aliases observe
//! mutation and equality for these variants is reference identity. The
//! primitive variants (Boolean, Integer, ByteString) compare by byte span.

pub mod item_type;
pub mod map;

pub use item_type::StackItemType;
pub use map::{MapKey, OrderedMap};

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use num_bigint::BigInt;
use num_traits::Zero;

use crate::error::{VmError, VmResult};
use crate::limits::ExecutionEngineLimits;
use crate::script::Script;

/// The maximum byte width of an Integer item, in signed little-endian
/// two's-complement encoding.
pub const MAX_INTEGER_SIZE: usize = 32;

/// An opaque host handle wrapped by a stack item.
pub trait InteropInterface: fmt::Debug {
    /// A short name describing the wrapped handle.
    fn interface_type(&self) -> &str;

    /// Downcast access to the concrete handle.
    fn as_any(&self) -> &dyn Any;
}

/// A value on the evaluation stack.
#[derive(Debug, Clone)]
pub enum StackItem {
    /// The null value.
    Null,

    /// A boolean value.
    Boolean(bool),

    /// An arbitrary-precision signed integer, at most
    /// [`MAX_INTEGER_SIZE`] bytes wide.
    Integer(BigInt),

    /// An immutable byte string.
    ByteString(Rc<Vec<u8>>),

    /// A mutable byte buffer with reference-identity semantics.
    Buffer(Rc<RefCell<Vec<u8>>>),

    /// An ordered sequence of items.
    Array(Rc<RefCell<Vec<StackItem>>>),

    /// An ordered sequence of items copied by value at container boundaries.
    Struct(Rc<RefCell<Vec<StackItem>>>),

    /// An insertion-ordered mapping from primitive keys to items.
    Map(Rc<RefCell<OrderedMap>>),

    /// An instruction address inside a specific script.
    Pointer {
        /// The script the pointer addresses.
        script: Script,
        /// The instruction position within the script.
        position: usize,
    },

    /// An opaque host handle.
    InteropInterface(Rc<dyn InteropInterface>),
}

impl StackItem {
    /// The null value.
    pub fn null() -> Self {
        StackItem::Null
    }

    /// The boolean true value.
    pub fn true_value() -> Self {
        StackItem::Boolean(true)
    }

    /// The boolean false value.
    pub fn false_value() -> Self {
        StackItem::Boolean(false)
    }

    /// Creates a boolean item.
    pub fn from_bool(value: bool) -> Self {
        StackItem::Boolean(value)
    }

    /// Creates an integer item. The caller is responsible for keeping the
    /// value within [`MAX_INTEGER_SIZE`]; opcode handlers use the engine's
    /// checked push instead.
    pub fn from_int<T: Into<BigInt>>(value: T) -> Self {
        StackItem::Integer(value.into())
    }

    /// Creates an immutable byte string item.
    pub fn from_byte_string<T: Into<Vec<u8>>>(value: T) -> Self {
        StackItem::ByteString(Rc::new(value.into()))
    }

    /// Creates a mutable buffer item.
    pub fn from_buffer<T: Into<Vec<u8>>>(value: T) -> Self {
        StackItem::Buffer(Rc::new(RefCell::new(value.into())))
    }

    /// Creates an array item owning `items`.
    pub fn from_array(items: Vec<StackItem>) -> Self {
        StackItem::Array(Rc::new(RefCell::new(items)))
    }

    /// Creates a struct item owning `items`.
    pub fn from_struct(items: Vec<StackItem>) -> Self {
        StackItem::Struct(Rc::new(RefCell::new(items)))
    }

    /// Creates a map item from prepared entries.
    pub fn from_map(map: OrderedMap) -> Self {
        StackItem::Map(Rc::new(RefCell::new(map)))
    }

    /// Creates an empty map item.
    pub fn new_map() -> Self {
        Self::from_map(OrderedMap::new())
    }

    /// Creates a pointer into `script`.
    pub fn from_pointer(script: Script, position: usize) -> Self {
        StackItem::Pointer { script, position }
    }

    /// Wraps a host handle.
    pub fn from_interface<T: InteropInterface + 'static>(value: T) -> Self {
        StackItem::InteropInterface(Rc::new(value))
    }

    /// The type tag of this item. Null reports `Any`.
    pub fn item_type(&self) -> StackItemType {
        match self {
            StackItem::Null => StackItemType::Any,
            StackItem::Boolean(_) => StackItemType::Boolean,
            StackItem::Integer(_) => StackItemType::Integer,
            StackItem::ByteString(_) => StackItemType::ByteString,
            StackItem::Buffer(_) => StackItemType::Buffer,
            StackItem::Array(_) => StackItemType::Array,
            StackItem::Struct(_) => StackItemType::Struct,
            StackItem::Map(_) => StackItemType::Map,
            StackItem::Pointer { .. } => StackItemType::Pointer,
            StackItem::InteropInterface(_) => StackItemType::InteropInterface,
        }
    }

    /// Returns `true` for the null item.
    pub fn is_null(&self) -> bool {
        matches!(self, StackItem::Null)
    }

    /// Boolean coercion. Defined for every variant.
    pub fn as_bool(&self) -> bool {
        match self {
            StackItem::Null => false,
            StackItem::Boolean(value) => *value,
            StackItem::Integer(value) => !value.is_zero(),
            StackItem::ByteString(bytes) => bytes.iter().any(|&byte| byte != 0),
            StackItem::Buffer(bytes) => bytes.borrow().iter().any(|&byte| byte != 0),
            StackItem::Array(_)
            | StackItem::Struct(_)
            | StackItem::Map(_)
            | StackItem::Pointer { .. }
            | StackItem::InteropInterface(_) => true,
        }
    }

    /// Integer coercion. Fails on non-primitive variants other than Buffer
    /// and on byte payloads wider than [`MAX_INTEGER_SIZE`].
    pub fn as_int(&self) -> VmResult<BigInt> {
        match self {
            StackItem::Boolean(value) => Ok(BigInt::from(u8::from(*value))),
            StackItem::Integer(value) => Ok(value.clone()),
            StackItem::ByteString(bytes) => decode_integer(bytes),
            StackItem::Buffer(bytes) => decode_integer(&bytes.borrow()),
            other => Err(VmError::type_mismatch(
                "Integer".to_string(),
                format!("{:?}", other.item_type()),
            )),
        }
    }

    /// Raw byte-span view. Defined for primitives and Buffer.
    pub fn as_bytes(&self) -> VmResult<Vec<u8>> {
        match self {
            StackItem::Boolean(value) => Ok(vec![u8::from(*value)]),
            StackItem::Integer(value) => Ok(encode_integer(value)),
            StackItem::ByteString(bytes) => Ok(bytes.as_ref().clone()),
            StackItem::Buffer(bytes) => Ok(bytes.borrow().clone()),
            other => Err(VmError::type_mismatch(
                "a byte span".to_string(),
                format!("{:?}", other.item_type()),
            )),
        }
    }

    /// Equality: primitives by byte span, Pointer by script and position,
    /// everything else by reference identity. Never inspects compound
    /// contents, so cycles cannot occur.
    pub fn equals(&self, other: &StackItem) -> bool {
        match (self, other) {
            (StackItem::Null, StackItem::Null) => true,
            (StackItem::Buffer(a), StackItem::Buffer(b)) => Rc::ptr_eq(a, b),
            (StackItem::Array(a), StackItem::Array(b))
            | (StackItem::Struct(a), StackItem::Struct(b)) => Rc::ptr_eq(a, b),
            (StackItem::Map(a), StackItem::Map(b)) => Rc::ptr_eq(a, b),
            (
                StackItem::Pointer {
                    script: script_a,
                    position: position_a,
                },
                StackItem::Pointer {
                    script: script_b,
                    position: position_b,
                },
            ) => position_a == position_b && script_a == script_b,
            (StackItem::InteropInterface(a), StackItem::InteropInterface(b)) => Rc::ptr_eq(a, b),
            (a, b) if a.item_type().is_primitive() && b.item_type().is_primitive() => {
                match (a.as_bytes(), b.as_bytes()) {
                    (Ok(span_a), Ok(span_b)) => span_a == span_b,
                    _ => false,
                }
            }
            _ => false,
        }
    }

    /// Converts this item to `target`.
    pub fn convert_to(&self, target: StackItemType) -> VmResult<StackItem> {
        if target == self.item_type() {
            return Ok(self.clone());
        }
        match target {
            StackItemType::Boolean => Ok(StackItem::from_bool(self.as_bool())),
            StackItemType::Integer => Ok(StackItem::Integer(self.as_int()?)),
            StackItemType::ByteString => Ok(StackItem::from_byte_string(self.as_bytes()?)),
            StackItemType::Buffer => Ok(StackItem::from_buffer(self.as_bytes()?)),
            _ => Err(VmError::type_mismatch(
                format!("{target:?}"),
                format!("{:?}", self.item_type()),
            )),
        }
    }

    /// Deep-clones a Struct: nested Structs are copied recursively while
    /// Arrays, Maps, Buffers and primitives are shared. Non-struct items
    /// come back as plain clones. The walk is budgeted by
    /// `limits.max_stack_size` so self-referential structs fail instead of
    /// recursing forever.
    pub fn deep_clone(&self, limits: &ExecutionEngineLimits) -> VmResult<StackItem> {
        let mut budget = limits.max_stack_size;
        self.deep_clone_inner(&mut budget)
    }

    fn deep_clone_inner(&self, budget: &mut usize) -> VmResult<StackItem> {
        match self {
            StackItem::Struct(fields) => {
                if *budget == 0 {
                    return Err(VmError::invalid_operation(
                        "struct clone exceeds the item limit",
                    ));
                }
                *budget -= 1;
                let source = fields.borrow();
                let mut cloned = Vec::with_capacity(source.len());
                for field in source.iter() {
                    cloned.push(field.deep_clone_inner(budget)?);
                }
                Ok(StackItem::from_struct(cloned))
            }
            other => Ok(other.clone()),
        }
    }
}

impl PartialEq for StackItem {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other)
    }
}

impl Eq for StackItem {}

/// Encodes an integer as minimal little-endian two's complement; zero is the
/// empty span.
pub fn encode_integer(value: &BigInt) -> Vec<u8> {
    if value.is_zero() {
        Vec::new()
    } else {
        value.to_signed_bytes_le()
    }
}

/// The encoded byte width of an integer.
pub fn integer_size(value: &BigInt) -> usize {
    encode_integer(value).len()
}

fn decode_integer(bytes: &[u8]) -> VmResult<BigInt> {
    if bytes.len() > MAX_INTEGER_SIZE {
        return Err(VmError::number_out_of_range(format!(
            "{} bytes do not fit an integer of at most {MAX_INTEGER_SIZE} bytes",
            bytes.len()
        )));
    }
    if bytes.is_empty() {
        return Ok(BigInt::zero());
    }
    Ok(BigInt::from_signed_bytes_le(bytes))
}
