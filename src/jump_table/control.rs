//! Handlers for flow control: jumps, calls, returns, aborts and the
//! structured-exception opcodes.

use crate::error::{VmError, VmResult};
use crate::exception_handling::{ExceptionHandlingContext, ExceptionHandlingState};
use crate::execution_engine::ExecutionEngine;
use crate::instruction::Instruction;
use crate::jump_table::JumpTable;
use crate::op_code::OpCode;
use crate::stack_item::StackItem;

pub(crate) fn register_handlers(table: &mut JumpTable) {
    table.register(OpCode::NOP, nop);
    table.register(OpCode::JMP, jmp);
    table.register(OpCode::JMP_L, jmp_l);
    table.register(OpCode::JMPIF, jmpif);
    table.register(OpCode::JMPIF_L, jmpif_l);
    table.register(OpCode::JMPIFNOT, jmpifnot);
    table.register(OpCode::JMPIFNOT_L, jmpifnot_l);
    table.register(OpCode::JMPEQ, jmpeq);
    table.register(OpCode::JMPEQ_L, jmpeq_l);
    table.register(OpCode::JMPNE, jmpne);
    table.register(OpCode::JMPNE_L, jmpne_l);
    table.register(OpCode::JMPGT, jmpgt);
    table.register(OpCode::JMPGT_L, jmpgt_l);
    table.register(OpCode::JMPGE, jmpge);
    table.register(OpCode::JMPGE_L, jmpge_l);
    table.register(OpCode::JMPLT, jmplt);
    table.register(OpCode::JMPLT_L, jmplt_l);
    table.register(OpCode::JMPLE, jmple);
    table.register(OpCode::JMPLE_L, jmple_l);
    table.register(OpCode::CALL, call);
    table.register(OpCode::CALL_L, call_l);
    table.register(OpCode::CALLA, calla);
    table.register(OpCode::CALLT, callt);
    table.register(OpCode::ABORT, abort);
    table.register(OpCode::ABORTMSG, abort_msg);
    table.register(OpCode::ASSERT, assert_op);
    table.register(OpCode::ASSERTMSG, assert_msg);
    table.register(OpCode::THROW, throw);
    table.register(OpCode::TRY, try_op);
    table.register(OpCode::TRY_L, try_l);
    table.register(OpCode::ENDTRY, endtry);
    table.register(OpCode::ENDTRY_L, endtry_l);
    table.register(OpCode::ENDFINALLY, endfinally);
    table.register(OpCode::RET, ret);
    table.register(OpCode::SYSCALL, syscall);
}

fn branch_offset(instruction: &Instruction, long: bool) -> VmResult<i32> {
    if long {
        instruction.token_i32()
    } else {
        Ok(instruction.token_i8()? as i32)
    }
}

fn branch(
    engine: &mut ExecutionEngine,
    instruction: &Instruction,
    long: bool,
    condition: bool,
) -> VmResult<()> {
    let offset = branch_offset(instruction, long)?;
    if condition {
        engine.execute_jump_offset(offset)?;
    }
    Ok(())
}

fn nop(_engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    Ok(())
}

fn jmp(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    branch(engine, instruction, false, true)
}

fn jmp_l(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    branch(engine, instruction, true, true)
}

fn jmpif(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let condition = engine.pop_bool()?;
    branch(engine, instruction, false, condition)
}

fn jmpif_l(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let condition = engine.pop_bool()?;
    branch(engine, instruction, true, condition)
}

fn jmpifnot(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let condition = engine.pop_bool()?;
    branch(engine, instruction, false, !condition)
}

fn jmpifnot_l(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let condition = engine.pop_bool()?;
    branch(engine, instruction, true, !condition)
}

fn jmpeq(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let x2 = engine.pop_int()?;
    let x1 = engine.pop_int()?;
    branch(engine, instruction, false, x1 == x2)
}

fn jmpeq_l(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let x2 = engine.pop_int()?;
    let x1 = engine.pop_int()?;
    branch(engine, instruction, true, x1 == x2)
}

fn jmpne(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let x2 = engine.pop_int()?;
    let x1 = engine.pop_int()?;
    branch(engine, instruction, false, x1 != x2)
}

fn jmpne_l(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let x2 = engine.pop_int()?;
    let x1 = engine.pop_int()?;
    branch(engine, instruction, true, x1 != x2)
}

fn jmpgt(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let x2 = engine.pop_int()?;
    let x1 = engine.pop_int()?;
    branch(engine, instruction, false, x1 > x2)
}

fn jmpgt_l(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let x2 = engine.pop_int()?;
    let x1 = engine.pop_int()?;
    branch(engine, instruction, true, x1 > x2)
}

fn jmpge(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let x2 = engine.pop_int()?;
    let x1 = engine.pop_int()?;
    branch(engine, instruction, false, x1 >= x2)
}

fn jmpge_l(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let x2 = engine.pop_int()?;
    let x1 = engine.pop_int()?;
    branch(engine, instruction, true, x1 >= x2)
}

fn jmplt(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let x2 = engine.pop_int()?;
    let x1 = engine.pop_int()?;
    branch(engine, instruction, false, x1 < x2)
}

fn jmplt_l(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let x2 = engine.pop_int()?;
    let x1 = engine.pop_int()?;
    branch(engine, instruction, true, x1 < x2)
}

fn jmple(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let x2 = engine.pop_int()?;
    let x1 = engine.pop_int()?;
    branch(engine, instruction, false, x1 <= x2)
}

fn jmple_l(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let x2 = engine.pop_int()?;
    let x1 = engine.pop_int()?;
    branch(engine, instruction, true, x1 <= x2)
}

fn call(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let offset = instruction.token_i8()? as i32;
    engine.execute_call_offset(offset)
}

fn call_l(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let offset = instruction.token_i32()?;
    engine.execute_call_offset(offset)
}

/// CALLA: call through a pointer, which must address the current script.
fn calla(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let item = engine.pop()?;
    let StackItem::Pointer { script, position } = item else {
        return Err(VmError::type_mismatch(
            "Pointer".to_string(),
            format!("{:?}", item.item_type()),
        ));
    };
    if &script != engine.context()?.script() {
        return Err(VmError::invalid_operation(
            "CALLA pointer targets a different script",
        ));
    }
    engine.call_to(position as i64)
}

fn callt(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let token = instruction.token_u16()?;
    engine.invoke_load_token(token)
}

fn abort(_engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    Err(VmError::abort("ABORT instruction reached"))
}

fn abort_msg(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let message = engine.pop()?.as_bytes()?;
    Err(VmError::abort(format!(
        "ABORTMSG: {}",
        String::from_utf8_lossy(&message)
    )))
}

fn assert_op(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    if engine.pop_bool()? {
        Ok(())
    } else {
        Err(VmError::abort("ASSERT failed"))
    }
}

fn assert_msg(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let message = engine.pop()?.as_bytes()?;
    if engine.pop_bool()? {
        Ok(())
    } else {
        Err(VmError::abort(format!(
            "ASSERTMSG: {}",
            String::from_utf8_lossy(&message)
        )))
    }
}

fn throw(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let item = engine.pop()?;
    engine.throw(item)
}

fn try_op(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let catch_offset = instruction.token_i8()? as i32;
    let finally_offset = instruction.token_i8_1()? as i32;
    execute_try(engine, catch_offset, finally_offset)
}

fn try_l(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let catch_offset = instruction.token_i32()?;
    let finally_offset = instruction.token_i32_1()?;
    execute_try(engine, catch_offset, finally_offset)
}

fn execute_try(
    engine: &mut ExecutionEngine,
    catch_offset: i32,
    finally_offset: i32,
) -> VmResult<()> {
    if catch_offset == 0 && finally_offset == 0 {
        return Err(VmError::invalid_operation(
            "try block declares neither catch nor finally",
        ));
    }
    let max_depth = engine.limits().max_try_nesting_depth;
    let context = engine.context_mut()?;
    let origin = context.instruction_pointer() as i64;
    let length = context.script().len() as i64;

    let resolve = |offset: i32| -> VmResult<Option<usize>> {
        if offset == 0 {
            return Ok(None);
        }
        let pointer = origin + offset as i64;
        if pointer < 0 || pointer > length {
            return Err(VmError::out_of_range(format!(
                "handler position {pointer} outside [0, {length}]"
            )));
        }
        Ok(Some(pointer as usize))
    };
    let catch_pointer = resolve(catch_offset)?;
    let finally_pointer = resolve(finally_offset)?;

    context.push_try(
        ExceptionHandlingContext::new(catch_pointer, finally_pointer),
        max_depth,
    )
}

fn endtry(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let offset = instruction.token_i8()? as i32;
    execute_endtry(engine, offset)
}

fn endtry_l(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let offset = instruction.token_i32()?;
    execute_endtry(engine, offset)
}

/// ENDTRY: leave the try or catch block. Runs the finally block first when
/// one is declared, remembering where to resume.
fn execute_endtry(engine: &mut ExecutionEngine, offset: i32) -> VmResult<()> {
    {
        let context = engine.context_mut()?;
        let frame = context
            .try_frame()
            .ok_or_else(|| VmError::invalid_operation("ENDTRY with no matching try"))?;
        if frame.state() == ExceptionHandlingState::Finally {
            return Err(VmError::invalid_operation("ENDTRY inside a finally block"));
        }
        let origin = context.instruction_pointer() as i64;
        let length = context.script().len() as i64;
        let end = origin + offset as i64;
        if end < 0 || end > length {
            return Err(VmError::out_of_range(format!(
                "ENDTRY target {end} outside [0, {length}]"
            )));
        }
        let end = end as usize;

        let finally_pointer = frame.finally_pointer();
        match finally_pointer {
            Some(target) => {
                let frame = context
                    .try_frame_mut()
                    .ok_or_else(|| VmError::invalid_operation("ENDTRY with no matching try"))?;
                frame.set_state(ExceptionHandlingState::Finally);
                frame.set_end_pointer(end);
                context.set_instruction_pointer(target);
            }
            None => {
                context.pop_try();
                context.set_instruction_pointer(end);
            }
        }
    }
    engine.is_jumping = true;
    Ok(())
}

/// ENDFINALLY: the finally block finished. Resume after the region, or keep
/// unwinding when an exception is still pending.
fn endfinally(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let pending = engine.has_uncaught_exception();
    {
        let context = engine.context_mut()?;
        let frame = context
            .pop_try()
            .ok_or_else(|| VmError::invalid_operation("ENDFINALLY with no matching try"))?;
        if !pending {
            let end = frame.end_pointer().ok_or_else(|| {
                VmError::invalid_operation("finally block entered without ENDTRY")
            })?;
            context.set_instruction_pointer(end);
        }
    }
    if pending {
        engine.handle_exception()?;
    } else {
        engine.is_jumping = true;
    }
    Ok(())
}

fn ret(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    engine.execute_ret()
}

fn syscall(engine: &mut ExecutionEngine, instruction: &Instruction) -> VmResult<()> {
    let method = instruction.token_u32()?;
    engine.invoke_syscall(method)
}
