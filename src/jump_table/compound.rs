//! Handlers for compound-type construction and manipulation.

use num_bigint::{BigInt, Sign};
use num_traits::ToPrimitive;

use crate::error::{VmError, VmResult};
use crate::execution_engine::ExecutionEngine;
use crate::instruction::Instruction;
use crate::jump_table::JumpTable;
use crate::op_code::OpCode;
use crate::stack_item::{MapKey, OrderedMap, StackItem, StackItemType};

pub(crate) fn register_handlers(table: &mut JumpTable) {
    table.register(OpCode::PACKMAP, packmap);
    table.register(OpCode::PACKSTRUCT, packstruct);
    table.register(OpCode::PACK, pack);
    table.register(OpCode::UNPACK, unpack);
    table.register(OpCode::NEWARRAY0, newarray0);
    table.register(OpCode::NEWARRAY, newarray);
    table.register(OpCode::NEWARRAY_T, newarray_t);
    table.register(OpCode::NEWSTRUCT0, newstruct0);
    table.register(OpCode::NEWSTRUCT, newstruct);
    table.register(OpCode::NEWMAP, newmap);
    table.register(OpCode::SIZE, size);
    table.register(OpCode::HASKEY, haskey);
    table.register(OpCode::KEYS, keys);
    table.register(OpCode::VALUES, values);
    table.register(OpCode::PICKITEM, pickitem);
    table.register(OpCode::APPEND, append);
    table.register(OpCode::SETITEM, setitem);
    table.register(OpCode::REVERSEITEMS, reverseitems);
    table.register(OpCode::REMOVE, remove);
    table.register(OpCode::CLEARITEMS, clearitems);
    table.register(OpCode::POPITEM, popitem);
}

/// Coerces an index key: non-negative and addressable.
fn item_index(key: &StackItem) -> VmResult<usize> {
    let value = key.as_int()?;
    if value.sign() == Sign::Minus {
        return Err(VmError::out_of_range(format!("negative index {value}")));
    }
    value
        .to_usize()
        .ok_or_else(|| VmError::out_of_range(format!("index {value} too large")))
}

/// Reports the edges of a freshly built compound to the reference counter.
fn notify_children_added(engine: &ExecutionEngine, parent: &StackItem) {
    let counter = engine.reference_counter();
    match parent {
        StackItem::Array(cell) | StackItem::Struct(cell) => {
            for child in cell.borrow().iter() {
                counter.add_reference(child, parent);
            }
        }
        StackItem::Map(cell) => {
            for (_, value) in cell.borrow().iter() {
                counter.add_reference(value, parent);
            }
        }
        _ => {}
    }
}

fn new_sequence_size(engine: &mut ExecutionEngine) -> VmResult<usize> {
    let size = engine.pop_int()?;
    if size.sign() == Sign::Minus {
        return Err(VmError::out_of_range(format!("negative size {size}")));
    }
    let limit = engine.limits().max_stack_size;
    match size.to_usize() {
        Some(size) if size <= limit => Ok(size),
        _ => Err(VmError::stack_overflow(
            size.to_usize().unwrap_or(usize::MAX),
            limit,
        )),
    }
}

fn packmap(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let count = engine.pop_count()?;
    let available = engine.context()?.evaluation_stack().len();
    if count.checked_mul(2).map_or(true, |need| need > available) {
        return Err(VmError::stack_underflow(count * 2, available));
    }
    let mut map = OrderedMap::new();
    for _ in 0..count {
        let key = MapKey::new(engine.pop()?)?;
        let value = engine.pop()?;
        map.insert(key, value);
    }
    let item = StackItem::from_map(map);
    notify_children_added(engine, &item);
    engine.push(item)
}

fn packstruct(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let items = pop_packed_items(engine)?;
    let item = StackItem::from_struct(items);
    notify_children_added(engine, &item);
    engine.push(item)
}

/// PACK: the first popped item becomes element 0.
fn pack(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let items = pop_packed_items(engine)?;
    let item = StackItem::from_array(items);
    notify_children_added(engine, &item);
    engine.push(item)
}

fn pop_packed_items(engine: &mut ExecutionEngine) -> VmResult<Vec<StackItem>> {
    let count = engine.pop_count()?;
    let available = engine.context()?.evaluation_stack().len();
    if count > available {
        return Err(VmError::stack_underflow(count, available));
    }
    let mut items = Vec::with_capacity(count);
    for _ in 0..count {
        items.push(engine.pop()?);
    }
    Ok(items)
}

/// UNPACK: spill a compound so element 0 ends up on top, then push the
/// count. Maps push value under key for each entry.
fn unpack(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let compound = engine.pop()?;
    let count = match &compound {
        StackItem::Array(cell) | StackItem::Struct(cell) => {
            let items = cell.borrow().clone();
            for item in items.iter().rev() {
                engine.push(item.clone())?;
            }
            items.len()
        }
        StackItem::Map(cell) => {
            let entries: Vec<(StackItem, StackItem)> = cell
                .borrow()
                .iter()
                .map(|(key, value)| (key.item().clone(), value.clone()))
                .collect();
            for (key, value) in entries.iter().rev() {
                engine.push(value.clone())?;
                engine.push(key.clone())?;
            }
            entries.len()
        }
        other => {
            return Err(VmError::type_mismatch(
                "Array, Struct or Map".to_string(),
                format!("{:?}", other.item_type()),
            ))
        }
    };
    engine.push_integer(BigInt::from(count))
}

fn newarray0(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    engine.push(StackItem::from_array(Vec::new()))
}

fn newarray(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let size = new_sequence_size(engine)?;
    engine.push(StackItem::from_array(vec![StackItem::null(); size]))
}

/// NEWARRAY_T: fill with the type-specific default. Defined types without a
/// dedicated default silently fill with null.
fn newarray_t(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let type_byte = instruction.token_u8()?;
    let item_type = StackItemType::from_byte(type_byte)
        .ok_or_else(|| VmError::out_of_range(format!("undefined item type {type_byte:#04x}")))?;
    let size = new_sequence_size(engine)?;
    let fill = match item_type {
        StackItemType::Boolean => StackItem::false_value(),
        StackItemType::Integer => StackItem::from_int(0),
        StackItemType::ByteString => StackItem::from_byte_string(Vec::new()),
        _ => StackItem::null(),
    };
    engine.push(StackItem::from_array(vec![fill; size]))
}

fn newstruct0(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    engine.push(StackItem::from_struct(Vec::new()))
}

fn newstruct(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let size = new_sequence_size(engine)?;
    engine.push(StackItem::from_struct(vec![StackItem::null(); size]))
}

fn newmap(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    engine.push(StackItem::new_map())
}

/// SIZE: element count for containers, byte length for primitives and
/// buffers.
fn size(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let item = engine.pop()?;
    let size = match &item {
        StackItem::Array(cell) | StackItem::Struct(cell) => cell.borrow().len(),
        StackItem::Map(cell) => cell.borrow().len(),
        StackItem::Boolean(_)
        | StackItem::Integer(_)
        | StackItem::ByteString(_)
        | StackItem::Buffer(_) => item.as_bytes()?.len(),
        other => {
            return Err(VmError::type_mismatch(
                "a sized item".to_string(),
                format!("{:?}", other.item_type()),
            ))
        }
    };
    engine.push_integer(BigInt::from(size))
}

fn haskey(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let key = engine.pop()?;
    if !key.item_type().is_primitive() {
        return Err(VmError::type_mismatch(
            "a primitive key".to_string(),
            format!("{:?}", key.item_type()),
        ));
    }
    let collection = engine.pop()?;
    let found = match &collection {
        StackItem::Array(cell) | StackItem::Struct(cell) => {
            item_index(&key)? < cell.borrow().len()
        }
        StackItem::Map(cell) => cell.borrow().contains_key(&MapKey::new(key)?),
        StackItem::ByteString(_) | StackItem::Buffer(_) => {
            item_index(&key)? < collection.as_bytes()?.len()
        }
        other => {
            return Err(VmError::type_mismatch(
                "Array, Struct, Map, ByteString or Buffer".to_string(),
                format!("{:?}", other.item_type()),
            ))
        }
    };
    engine.push_bool(found)
}

fn keys(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let item = engine.pop()?;
    let StackItem::Map(cell) = &item else {
        return Err(VmError::type_mismatch(
            "Map".to_string(),
            format!("{:?}", item.item_type()),
        ));
    };
    let keys: Vec<StackItem> = cell.borrow().keys().cloned().collect();
    let array = StackItem::from_array(keys);
    notify_children_added(engine, &array);
    engine.push(array)
}

/// VALUES: collect container values; struct values are copied, honoring
/// struct-by-value container semantics.
fn values(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let item = engine.pop()?;
    let source: Vec<StackItem> = match &item {
        StackItem::Array(cell) | StackItem::Struct(cell) => cell.borrow().clone(),
        StackItem::Map(cell) => cell.borrow().values().cloned().collect(),
        other => {
            return Err(VmError::type_mismatch(
                "Array, Struct or Map".to_string(),
                format!("{:?}", other.item_type()),
            ))
        }
    };
    let limits = *engine.limits();
    let mut collected = Vec::with_capacity(source.len());
    for value in source {
        collected.push(match value {
            StackItem::Struct(_) => value.deep_clone(&limits)?,
            other => other,
        });
    }
    let array = StackItem::from_array(collected);
    notify_children_added(engine, &array);
    engine.push(array)
}

fn pickitem(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let key = engine.pop()?;
    let collection = engine.pop()?;
    match &collection {
        StackItem::Array(cell) | StackItem::Struct(cell) => {
            let index = item_index(&key)?;
            let items = cell.borrow();
            let item = items
                .get(index)
                .ok_or_else(|| {
                    VmError::out_of_range(format!("index {index} beyond {} items", items.len()))
                })?
                .clone();
            drop(items);
            engine.push(item)
        }
        StackItem::Map(cell) => {
            let map_key = MapKey::new(key)?;
            let value = cell
                .borrow()
                .get(&map_key)
                .cloned()
                .ok_or_else(|| VmError::out_of_range("map key not found".to_string()))?;
            engine.push(value)
        }
        StackItem::Boolean(_)
        | StackItem::Integer(_)
        | StackItem::ByteString(_)
        | StackItem::Buffer(_) => {
            let bytes = collection.as_bytes()?;
            let index = item_index(&key)?;
            let byte = *bytes.get(index).ok_or_else(|| {
                VmError::out_of_range(format!("index {index} beyond {} bytes", bytes.len()))
            })?;
            engine.push_integer(BigInt::from(byte))
        }
        other => Err(VmError::type_mismatch(
            "an indexable item".to_string(),
            format!("{:?}", other.item_type()),
        )),
    }
}

/// APPEND: structs are copied on insertion.
fn append(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let item = engine.pop()?;
    let target = engine.pop()?;
    let item = match item {
        StackItem::Struct(_) => item.deep_clone(engine.limits())?,
        other => other,
    };
    match &target {
        StackItem::Array(cell) | StackItem::Struct(cell) => {
            cell.borrow_mut().push(item.clone());
            engine.reference_counter().add_reference(&item, &target);
            Ok(())
        }
        other => Err(VmError::type_mismatch(
            "Array or Struct".to_string(),
            format!("{:?}", other.item_type()),
        )),
    }
}

/// SETITEM: structs are copied on insertion; buffer writes take one byte in
/// [-128, 255].
fn setitem(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let value = engine.pop()?;
    let key = engine.pop()?;
    let target = engine.pop()?;
    let value = match value {
        StackItem::Struct(_) => value.deep_clone(engine.limits())?,
        other => other,
    };
    match &target {
        StackItem::Array(cell) | StackItem::Struct(cell) => {
            let index = item_index(&key)?;
            let mut items = cell.borrow_mut();
            let length = items.len();
            let slot = items.get_mut(index).ok_or_else(|| {
                VmError::out_of_range(format!("index {index} beyond {length} items"))
            })?;
            let old = std::mem::replace(slot, value.clone());
            drop(items);
            let counter = engine.reference_counter();
            counter.remove_reference(&old, &target);
            counter.add_reference(&value, &target);
            Ok(())
        }
        StackItem::Map(cell) => {
            let map_key = MapKey::new(key)?;
            let old = cell.borrow_mut().insert(map_key, value.clone());
            let counter = engine.reference_counter();
            if let Some(old) = old {
                counter.remove_reference(&old, &target);
            }
            counter.add_reference(&value, &target);
            Ok(())
        }
        StackItem::Buffer(cell) => {
            if !value.item_type().is_primitive() {
                return Err(VmError::type_mismatch(
                    "a primitive byte value".to_string(),
                    format!("{:?}", value.item_type()),
                ));
            }
            let index = item_index(&key)?;
            let byte = value.as_int()?;
            let byte = byte
                .to_i64()
                .filter(|b| (i64::from(i8::MIN)..=i64::from(u8::MAX)).contains(b))
                .ok_or_else(|| {
                    VmError::out_of_range(format!("byte value {byte} not in [-128, 255]"))
                })?;
            let mut bytes = cell.borrow_mut();
            let length = bytes.len();
            let slot = bytes.get_mut(index).ok_or_else(|| {
                VmError::out_of_range(format!("index {index} beyond {length} bytes"))
            })?;
            *slot = byte as u8;
            Ok(())
        }
        other => Err(VmError::type_mismatch(
            "Array, Struct, Map or Buffer".to_string(),
            format!("{:?}", other.item_type()),
        )),
    }
}

fn reverseitems(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let target = engine.pop()?;
    match &target {
        StackItem::Array(cell) | StackItem::Struct(cell) => {
            cell.borrow_mut().reverse();
            Ok(())
        }
        StackItem::Buffer(cell) => {
            cell.borrow_mut().reverse();
            Ok(())
        }
        other => Err(VmError::type_mismatch(
            "Array, Struct or Buffer".to_string(),
            format!("{:?}", other.item_type()),
        )),
    }
}

/// REMOVE: arrays by index, maps by key (absent keys are ignored).
fn remove(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let key = engine.pop()?;
    let target = engine.pop()?;
    match &target {
        StackItem::Array(cell) | StackItem::Struct(cell) => {
            let index = item_index(&key)?;
            let mut items = cell.borrow_mut();
            if index >= items.len() {
                return Err(VmError::out_of_range(format!(
                    "index {index} beyond {} items",
                    items.len()
                )));
            }
            let old = items.remove(index);
            drop(items);
            engine.reference_counter().remove_reference(&old, &target);
            Ok(())
        }
        StackItem::Map(cell) => {
            let map_key = MapKey::new(key)?;
            let old = cell.borrow_mut().remove(&map_key);
            if let Some(old) = old {
                engine.reference_counter().remove_reference(&old, &target);
            }
            Ok(())
        }
        other => Err(VmError::type_mismatch(
            "Array, Struct or Map".to_string(),
            format!("{:?}", other.item_type()),
        )),
    }
}

fn clearitems(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let target = engine.pop()?;
    match &target {
        StackItem::Array(cell) | StackItem::Struct(cell) => {
            let drained: Vec<StackItem> = cell.borrow_mut().drain(..).collect();
            for child in &drained {
                engine.reference_counter().remove_reference(child, &target);
            }
            Ok(())
        }
        StackItem::Map(cell) => {
            let drained = cell.borrow_mut().drain_all();
            for (_, value) in &drained {
                engine.reference_counter().remove_reference(value, &target);
            }
            Ok(())
        }
        other => Err(VmError::type_mismatch(
            "Array, Struct or Map".to_string(),
            format!("{:?}", other.item_type()),
        )),
    }
}

fn popitem(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let target = engine.pop()?;
    match &target {
        StackItem::Array(cell) | StackItem::Struct(cell) => {
            let item = cell
                .borrow_mut()
                .pop()
                .ok_or_else(|| VmError::out_of_range("POPITEM from an empty array".to_string()))?;
            engine.reference_counter().remove_reference(&item, &target);
            engine.push(item)
        }
        other => Err(VmError::type_mismatch(
            "Array or Struct".to_string(),
            format!("{:?}", other.item_type()),
        )),
    }
}
