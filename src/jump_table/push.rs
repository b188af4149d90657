//! Handlers for the push group: constants, data payloads and pointers.

use num_bigint::BigInt;

use crate::error::{VmError, VmResult};
use crate::execution_engine::ExecutionEngine;
use crate::instruction::Instruction;
use crate::jump_table::JumpTable;
use crate::op_code::OpCode;
use crate::stack_item::StackItem;

pub(crate) fn register_handlers(table: &mut JumpTable) {
    table.register(OpCode::PUSHINT8, push_int);
    table.register(OpCode::PUSHINT16, push_int);
    table.register(OpCode::PUSHINT32, push_int);
    table.register(OpCode::PUSHINT64, push_int);
    table.register(OpCode::PUSHINT128, push_int);
    table.register(OpCode::PUSHINT256, push_int);
    table.register(OpCode::PUSHT, push_true);
    table.register(OpCode::PUSHF, push_false);
    table.register(OpCode::PUSHA, push_address);
    table.register(OpCode::PUSHNULL, push_null);
    table.register(OpCode::PUSHDATA1, push_data);
    table.register(OpCode::PUSHDATA2, push_data);
    table.register(OpCode::PUSHDATA4, push_data);
    table.register(OpCode::PUSHM1, push_small_int);
    for byte in OpCode::PUSH0 as u8..=OpCode::PUSH16 as u8 {
        if let Some(opcode) = OpCode::from_byte(byte) {
            table.register(opcode, push_small_int);
        }
    }
}

/// PUSHINT8..PUSHINT256: the operand is a signed little-endian integer.
fn push_int(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let value = BigInt::from_signed_bytes_le(instruction.operand());
    engine.push_integer(value)
}

fn push_true(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    engine.push(StackItem::true_value())
}

fn push_false(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    engine.push(StackItem::false_value())
}

/// PUSHA: a pointer into the current script at ip + offset.
fn push_address(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let offset = instruction.token_i32()?;
    let context = engine.context()?;
    let position = context.instruction_pointer() as i64 + offset as i64;
    if position < 0 || position > context.script().len() as i64 {
        return Err(VmError::out_of_range(format!(
            "pointer position {position} outside [0, {}]",
            context.script().len()
        )));
    }
    let pointer = StackItem::from_pointer(context.script().clone(), position as usize);
    engine.push(pointer)
}

fn push_null(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    engine.push(StackItem::null())
}

/// PUSHDATA1/2/4: the decoded payload becomes a byte string.
fn push_data(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    engine
        .limits()
        .assert_max_item_size(instruction.operand().len())?;
    engine.push(StackItem::from_byte_string(instruction.operand().to_vec()))
}

/// PUSHM1 and PUSH0..PUSH16: the value is encoded in the opcode itself.
fn push_small_int(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let value = instruction.opcode() as i32 - OpCode::PUSH0 as i32;
    engine.push_integer(BigInt::from(value))
}
