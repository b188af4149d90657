//! Handlers for evaluation stack manipulation.

use num_bigint::BigInt;

use crate::error::VmResult;
use crate::execution_engine::ExecutionEngine;
use crate::instruction::Instruction;
use crate::jump_table::JumpTable;
use crate::op_code::OpCode;

pub(crate) fn register_handlers(table: &mut JumpTable) {
    table.register(OpCode::DEPTH, depth);
    table.register(OpCode::DROP, drop_op);
    table.register(OpCode::NIP, nip);
    table.register(OpCode::XDROP, xdrop);
    table.register(OpCode::CLEAR, clear);
    table.register(OpCode::DUP, dup);
    table.register(OpCode::OVER, over);
    table.register(OpCode::PICK, pick);
    table.register(OpCode::TUCK, tuck);
    table.register(OpCode::SWAP, swap);
    table.register(OpCode::ROT, rot);
    table.register(OpCode::ROLL, roll);
    table.register(OpCode::REVERSE3, reverse3);
    table.register(OpCode::REVERSE4, reverse4);
    table.register(OpCode::REVERSEN, reversen);
}

fn depth(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let depth = engine.context()?.evaluation_stack().len();
    engine.push_integer(BigInt::from(depth))
}

fn drop_op(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    engine.pop()?;
    Ok(())
}

fn nip(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    engine.context_mut()?.evaluation_stack_mut().remove(1)?;
    Ok(())
}

fn xdrop(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let n = engine.pop_count()?;
    engine.context_mut()?.evaluation_stack_mut().remove(n)?;
    Ok(())
}

fn clear(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    engine.context_mut()?.evaluation_stack_mut().clear();
    Ok(())
}

fn dup(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let top = engine.peek(0)?;
    engine.push(top)
}

fn over(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let second = engine.peek(1)?;
    engine.push(second)
}

fn pick(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let n = engine.pop_count()?;
    let item = engine.peek(n)?;
    engine.push(item)
}

fn tuck(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let top = engine.peek(0)?;
    engine.context_mut()?.evaluation_stack_mut().insert(2, top)
}

fn swap(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let item = engine.context_mut()?.evaluation_stack_mut().remove(1)?;
    engine.push(item)
}

fn rot(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let item = engine.context_mut()?.evaluation_stack_mut().remove(2)?;
    engine.push(item)
}

fn roll(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let n = engine.pop_count()?;
    if n == 0 {
        return Ok(());
    }
    let item = engine.context_mut()?.evaluation_stack_mut().remove(n)?;
    engine.push(item)
}

fn reverse3(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    engine.context_mut()?.evaluation_stack_mut().reverse(3)
}

fn reverse4(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    engine.context_mut()?.evaluation_stack_mut().reverse(4)
}

fn reversen(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let n = engine.pop_count()?;
    engine.context_mut()?.evaluation_stack_mut().reverse(n)
}
