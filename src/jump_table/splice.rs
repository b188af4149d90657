//! Handlers for byte-buffer splicing.

use crate::error::{VmError, VmResult};
use crate::execution_engine::ExecutionEngine;
use crate::instruction::Instruction;
use crate::jump_table::JumpTable;
use crate::op_code::OpCode;
use crate::stack_item::StackItem;

pub(crate) fn register_handlers(table: &mut JumpTable) {
    table.register(OpCode::NEWBUFFER, newbuffer);
    table.register(OpCode::MEMCPY, memcpy);
    table.register(OpCode::CAT, cat);
    table.register(OpCode::SUBSTR, substr);
    table.register(OpCode::LEFT, left);
    table.register(OpCode::RIGHT, right);
}

fn newbuffer(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let size = engine.pop_count()?;
    engine.limits().assert_max_item_size(size)?;
    engine.push(StackItem::from_buffer(vec![0u8; size]))
}

/// MEMCPY: copy `count` bytes from a source span into a destination buffer.
fn memcpy(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let count = engine.pop_count()?;
    let src_index = engine.pop_count()?;
    let src = engine.pop()?.as_bytes()?;
    if src_index
        .checked_add(count)
        .map_or(true, |end| end > src.len())
    {
        return Err(VmError::out_of_range(format!(
            "source range {src_index}+{count} exceeds {} bytes",
            src.len()
        )));
    }
    let dst_index = engine.pop_count()?;
    let dst_item = engine.pop()?;
    let StackItem::Buffer(dst) = &dst_item else {
        return Err(VmError::type_mismatch(
            "Buffer".to_string(),
            format!("{:?}", dst_item.item_type()),
        ));
    };
    let mut dst = dst.borrow_mut();
    if dst_index
        .checked_add(count)
        .map_or(true, |end| end > dst.len())
    {
        return Err(VmError::out_of_range(format!(
            "destination range {dst_index}+{count} exceeds {} bytes",
            dst.len()
        )));
    }
    dst[dst_index..dst_index + count].copy_from_slice(&src[src_index..src_index + count]);
    Ok(())
}

fn cat(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let x2 = engine.pop()?.as_bytes()?;
    let mut x1 = engine.pop()?.as_bytes()?;
    engine.limits().assert_max_item_size(x1.len() + x2.len())?;
    x1.extend_from_slice(&x2);
    engine.push(StackItem::from_buffer(x1))
}

fn substr(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let count = engine.pop_count()?;
    let index = engine.pop_count()?;
    let bytes = engine.pop()?.as_bytes()?;
    if index.checked_add(count).map_or(true, |end| end > bytes.len()) {
        return Err(VmError::out_of_range(format!(
            "substring {index}+{count} exceeds {} bytes",
            bytes.len()
        )));
    }
    engine.push(StackItem::from_buffer(bytes[index..index + count].to_vec()))
}

fn left(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let count = engine.pop_count()?;
    let bytes = engine.pop()?.as_bytes()?;
    if count > bytes.len() {
        return Err(VmError::out_of_range(format!(
            "LEFT count {count} exceeds {} bytes",
            bytes.len()
        )));
    }
    engine.push(StackItem::from_buffer(bytes[..count].to_vec()))
}

fn right(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let count = engine.pop_count()?;
    let bytes = engine.pop()?.as_bytes()?;
    if count > bytes.len() {
        return Err(VmError::out_of_range(format!(
            "RIGHT count {count} exceeds {} bytes",
            bytes.len()
        )));
    }
    engine.push(StackItem::from_buffer(bytes[bytes.len() - count..].to_vec()))
}
