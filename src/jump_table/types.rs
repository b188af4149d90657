//! Handlers for type inspection and conversion.

use crate::error::{VmError, VmResult};
use crate::execution_engine::ExecutionEngine;
use crate::instruction::Instruction;
use crate::jump_table::JumpTable;
use crate::op_code::OpCode;
use crate::stack_item::StackItemType;

pub(crate) fn register_handlers(table: &mut JumpTable) {
    table.register(OpCode::ISNULL, isnull);
    table.register(OpCode::ISTYPE, istype);
    table.register(OpCode::CONVERT, convert);
}

fn isnull(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let item = engine.pop()?;
    engine.push_bool(item.is_null())
}

/// ISTYPE: tests the operand type tag, which must be defined and not Any.
fn istype(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let type_byte = instruction.token_u8()?;
    let expected = StackItemType::from_byte(type_byte)
        .ok_or_else(|| VmError::out_of_range(format!("undefined item type {type_byte:#04x}")))?;
    if expected == StackItemType::Any {
        return Err(VmError::invalid_operation("ISTYPE with type Any"));
    }
    let item = engine.pop()?;
    engine.push_bool(item.item_type() == expected)
}

fn convert(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let type_byte = instruction.token_u8()?;
    let target = StackItemType::from_byte(type_byte)
        .ok_or_else(|| VmError::out_of_range(format!("undefined item type {type_byte:#04x}")))?;
    let item = engine.pop()?;
    let converted = item.convert_to(target)?;
    engine.push(converted)
}
