//! Handlers for slot initialization and slot I/O.

use crate::error::{VmError, VmResult};
use crate::execution_engine::ExecutionEngine;
use crate::instruction::Instruction;
use crate::jump_table::JumpTable;
use crate::op_code::OpCode;

pub(crate) fn register_handlers(table: &mut JumpTable) {
    table.register(OpCode::INITSSLOT, initsslot);
    table.register(OpCode::INITSLOT, initslot);
    table.register(OpCode::LDSFLD0, ldsfld0);
    table.register(OpCode::LDSFLD1, ldsfld1);
    table.register(OpCode::LDSFLD2, ldsfld2);
    table.register(OpCode::LDSFLD3, ldsfld3);
    table.register(OpCode::LDSFLD4, ldsfld4);
    table.register(OpCode::LDSFLD5, ldsfld5);
    table.register(OpCode::LDSFLD6, ldsfld6);
    table.register(OpCode::LDSFLD, ldsfld);
    table.register(OpCode::STSFLD0, stsfld0);
    table.register(OpCode::STSFLD1, stsfld1);
    table.register(OpCode::STSFLD2, stsfld2);
    table.register(OpCode::STSFLD3, stsfld3);
    table.register(OpCode::STSFLD4, stsfld4);
    table.register(OpCode::STSFLD5, stsfld5);
    table.register(OpCode::STSFLD6, stsfld6);
    table.register(OpCode::STSFLD, stsfld);
    table.register(OpCode::LDLOC0, ldloc0);
    table.register(OpCode::LDLOC1, ldloc1);
    table.register(OpCode::LDLOC2, ldloc2);
    table.register(OpCode::LDLOC3, ldloc3);
    table.register(OpCode::LDLOC4, ldloc4);
    table.register(OpCode::LDLOC5, ldloc5);
    table.register(OpCode::LDLOC6, ldloc6);
    table.register(OpCode::LDLOC, ldloc);
    table.register(OpCode::STLOC0, stloc0);
    table.register(OpCode::STLOC1, stloc1);
    table.register(OpCode::STLOC2, stloc2);
    table.register(OpCode::STLOC3, stloc3);
    table.register(OpCode::STLOC4, stloc4);
    table.register(OpCode::STLOC5, stloc5);
    table.register(OpCode::STLOC6, stloc6);
    table.register(OpCode::STLOC, stloc);
    table.register(OpCode::LDARG0, ldarg0);
    table.register(OpCode::LDARG1, ldarg1);
    table.register(OpCode::LDARG2, ldarg2);
    table.register(OpCode::LDARG3, ldarg3);
    table.register(OpCode::LDARG4, ldarg4);
    table.register(OpCode::LDARG5, ldarg5);
    table.register(OpCode::LDARG6, ldarg6);
    table.register(OpCode::LDARG, ldarg);
    table.register(OpCode::STARG0, starg0);
    table.register(OpCode::STARG1, starg1);
    table.register(OpCode::STARG2, starg2);
    table.register(OpCode::STARG3, starg3);
    table.register(OpCode::STARG4, starg4);
    table.register(OpCode::STARG5, starg5);
    table.register(OpCode::STARG6, starg6);
    table.register(OpCode::STARG, starg);
}

/// INITSSLOT: create the static field slot, once per shared state.
fn initsslot(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let count = instruction.token_u8()? as usize;
    if count == 0 {
        return Err(VmError::invalid_operation("INITSSLOT with zero fields"));
    }
    engine.context_mut()?.init_static_fields(count)
}

/// INITSLOT: create the locals and arguments, popping the arguments in
/// order so the first pop lands in argument slot 0.
fn initslot(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let local_count = instruction.token_u8()? as usize;
    let argument_count = instruction.token_u8_1()? as usize;
    if local_count == 0 && argument_count == 0 {
        return Err(VmError::invalid_operation(
            "INITSLOT with no locals or arguments",
        ));
    }
    let context = engine.context()?;
    if context.local_variables().is_some() || context.arguments().is_some() {
        return Err(VmError::invalid_operation(
            "local variable slots already initialized",
        ));
    }
    let mut arguments = Vec::with_capacity(argument_count);
    for _ in 0..argument_count {
        arguments.push(engine.pop()?);
    }
    engine.context_mut()?.init_slot(local_count, arguments)
}

fn load_static(engine: &mut ExecutionEngine, index: usize) -> VmResult<()> {
    let item = engine.context()?.load_static_field(index)?;
    engine.push(item)
}

fn store_static(engine: &mut ExecutionEngine, index: usize) -> VmResult<()> {
    let item = engine.pop()?;
    engine.context_mut()?.store_static_field(index, item)
}

fn load_local(engine: &mut ExecutionEngine, index: usize) -> VmResult<()> {
    let item = engine.context()?.load_local(index)?;
    engine.push(item)
}

fn store_local(engine: &mut ExecutionEngine, index: usize) -> VmResult<()> {
    let item = engine.pop()?;
    engine.context_mut()?.store_local(index, item)
}

fn load_argument(engine: &mut ExecutionEngine, index: usize) -> VmResult<()> {
    let item = engine.context()?.load_argument(index)?;
    engine.push(item)
}

fn store_argument(engine: &mut ExecutionEngine, index: usize) -> VmResult<()> {
    let item = engine.pop()?;
    engine.context_mut()?.store_argument(index, item)
}

macro_rules! numbered_slot_handlers {
    ($($name:ident => $helper:ident($index:expr);)+) => {
        $(
            fn $name(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
                $helper(engine, $index)
            }
        )+
    };
}

numbered_slot_handlers! {
    ldsfld0 => load_static(0);
    ldsfld1 => load_static(1);
    ldsfld2 => load_static(2);
    ldsfld3 => load_static(3);
    ldsfld4 => load_static(4);
    ldsfld5 => load_static(5);
    ldsfld6 => load_static(6);
    stsfld0 => store_static(0);
    stsfld1 => store_static(1);
    stsfld2 => store_static(2);
    stsfld3 => store_static(3);
    stsfld4 => store_static(4);
    stsfld5 => store_static(5);
    stsfld6 => store_static(6);
    ldloc0 => load_local(0);
    ldloc1 => load_local(1);
    ldloc2 => load_local(2);
    ldloc3 => load_local(3);
    ldloc4 => load_local(4);
    ldloc5 => load_local(5);
    ldloc6 => load_local(6);
    stloc0 => store_local(0);
    stloc1 => store_local(1);
    stloc2 => store_local(2);
    stloc3 => store_local(3);
    stloc4 => store_local(4);
    stloc5 => store_local(5);
    stloc6 => store_local(6);
    ldarg0 => load_argument(0);
    ldarg1 => load_argument(1);
    ldarg2 => load_argument(2);
    ldarg3 => load_argument(3);
    ldarg4 => load_argument(4);
    ldarg5 => load_argument(5);
    ldarg6 => load_argument(6);
    starg0 => store_argument(0);
    starg1 => store_argument(1);
    starg2 => store_argument(2);
    starg3 => store_argument(3);
    starg4 => store_argument(4);
    starg5 => store_argument(5);
    starg6 => store_argument(6);
}

fn ldsfld(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let index = instruction.token_u8()? as usize;
    load_static(engine, index)
}

fn stsfld(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let index = instruction.token_u8()? as usize;
    store_static(engine, index)
}

fn ldloc(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let index = instruction.token_u8()? as usize;
    load_local(engine, index)
}

fn stloc(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let index = instruction.token_u8()? as usize;
    store_local(engine, index)
}

fn ldarg(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let index = instruction.token_u8()? as usize;
    load_argument(engine, index)
}

fn starg(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let index = instruction.token_u8()? as usize;
    store_argument(engine, index)
}
