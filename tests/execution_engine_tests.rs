//! Script-driven tests of the dispatch loop and the opcode groups.

use std::cell::RefCell;
use std::rc::Rc;

use num_bigint::BigInt;
use stack_vm::{
    EngineHooks, ExecutionEngine, Instruction, OpCode, Script, ScriptBuilder, StackItem,
    StackItemType, VMState, VmError, VmResult,
};

fn run(script: Script) -> ExecutionEngine {
    let mut engine = ExecutionEngine::new();
    engine.load_script(script, 0).expect("load script");
    engine.execute();
    engine
}

fn run_bytes(bytes: Vec<u8>) -> ExecutionEngine {
    run(Script::new(bytes))
}

fn result_int(engine: &ExecutionEngine, index: usize) -> BigInt {
    engine
        .result_stack()
        .peek(index)
        .expect("result item")
        .as_int()
        .expect("integer result")
}

// -- scenarios -------------------------------------------------------------

#[test]
fn test_arithmetic_halt() {
    // PUSH2 PUSH3 ADD RET
    let engine = run_bytes(vec![0x12, 0x13, 0x9E, 0x40]);
    assert_eq!(engine.state(), VMState::HALT);
    assert_eq!(engine.result_stack().len(), 1);
    assert_eq!(result_int(&engine, 0), BigInt::from(5));
    assert!(engine.current_context().is_none());
    assert!(engine.entry_context().is_none());
}

#[test]
fn test_conditional_jump_taken() {
    // PUSH1 JMPIF +4 PUSH7 RET PUSH9 RET
    let engine = run_bytes(vec![0x11, 0x24, 0x04, 0x17, 0x40, 0x19, 0x40]);
    assert_eq!(engine.state(), VMState::HALT);
    assert_eq!(engine.result_stack().len(), 1);
    assert_eq!(result_int(&engine, 0), BigInt::from(9));
}

#[test]
fn test_conditional_jump_not_taken() {
    // PUSH0 JMPIF +4 PUSH7 RET PUSH9 RET
    let engine = run_bytes(vec![0x10, 0x24, 0x04, 0x17, 0x40, 0x19, 0x40]);
    assert_eq!(engine.state(), VMState::HALT);
    assert_eq!(result_int(&engine, 0), BigInt::from(7));
}

#[test]
fn test_call_and_return_ordering() {
    // CALL +4 PUSH2 RET ; PUSH1 RET
    let engine = run_bytes(vec![0x34, 0x04, 0x12, 0x40, 0x11, 0x40]);
    assert_eq!(engine.state(), VMState::HALT);
    assert_eq!(engine.result_stack().len(), 2);
    // top-first: the caller's 2, then the callee's 1
    assert_eq!(result_int(&engine, 0), BigInt::from(2));
    assert_eq!(result_int(&engine, 1), BigInt::from(1));
}

// -- push group ------------------------------------------------------------

#[test]
fn test_push_constants() {
    let mut builder = ScriptBuilder::new();
    builder
        .emit_push_int(-1)
        .emit_push_int(16)
        .emit_push_int(-300)
        .emit_push_bool(true)
        .emit(OpCode::PUSHNULL)
        .emit(OpCode::RET);
    let engine = run(builder.to_script());

    assert_eq!(engine.state(), VMState::HALT);
    assert!(engine.result_stack().peek(0).expect("null").is_null());
    assert!(engine.result_stack().peek(1).expect("bool").as_bool());
    assert_eq!(result_int(&engine, 2), BigInt::from(-300));
    assert_eq!(result_int(&engine, 3), BigInt::from(16));
    assert_eq!(result_int(&engine, 4), BigInt::from(-1));
}

#[test]
fn test_pushdata_payload() {
    let mut builder = ScriptBuilder::new();
    builder.emit_push_data(&[0xDE, 0xAD, 0xBE, 0xEF]).emit(OpCode::RET);
    let engine = run(builder.to_script());

    let item = engine.result_stack().peek(0).expect("payload");
    assert_eq!(item.item_type(), StackItemType::ByteString);
    assert_eq!(item.as_bytes().expect("bytes"), vec![0xDE, 0xAD, 0xBE, 0xEF]);
}

#[test]
fn test_pusha_and_calla() {
    // PUSHA +8 CALLA RET NOP ; PUSH3 RET
    let engine = run_bytes(vec![
        0x0A, 0x08, 0x00, 0x00, 0x00, // 0: PUSHA -> 8
        0x36, // 5: CALLA
        0x40, // 6: RET
        0x21, // 7: NOP
        0x13, // 8: PUSH3
        0x40, // 9: RET
    ]);
    assert_eq!(engine.state(), VMState::HALT);
    assert_eq!(result_int(&engine, 0), BigInt::from(3));
}

#[test]
fn test_pusha_out_of_bounds_faults() {
    let engine = run_bytes(vec![0x0A, 0x7F, 0x00, 0x00, 0x00, 0x40]);
    assert_eq!(engine.state(), VMState::FAULT);
}

#[test]
fn test_calla_rejects_foreign_script() {
    let mut engine = ExecutionEngine::new();
    engine
        .load_script(Script::new(vec![0x36, 0x40]), 0)
        .expect("load script");
    let foreign = Script::new(vec![0x11, 0x40]);
    engine
        .push(StackItem::from_pointer(foreign, 0))
        .expect("push pointer");
    assert_eq!(engine.execute(), VMState::FAULT);
}

// -- jumps -----------------------------------------------------------------

#[test]
fn test_jump_to_script_length_is_legal() {
    // JMP +2 lands exactly at the end; the synthetic RET halts cleanly.
    let engine = run_bytes(vec![0x22, 0x02]);
    assert_eq!(engine.state(), VMState::HALT);
}

#[test]
fn test_jump_past_script_length_faults() {
    let engine = run_bytes(vec![0x22, 0x03]);
    assert_eq!(engine.state(), VMState::FAULT);
}

#[test]
fn test_comparison_jumps_are_numeric() {
    // PUSH1 PUSHDATA1 [0x01] JMPEQ +4 PUSH7 RET PUSH9 RET
    // the byte string coerces to 1, so the branch is taken
    let engine = run_bytes(vec![
        0x11, 0x0C, 0x01, 0x01, 0x28, 0x04, 0x17, 0x40, 0x19, 0x40,
    ]);
    assert_eq!(engine.state(), VMState::HALT);
    assert_eq!(result_int(&engine, 0), BigInt::from(9));
}

// -- stack manipulation ----------------------------------------------------

#[test]
fn test_depth_dup_swap() {
    let mut builder = ScriptBuilder::new();
    builder
        .emit_push_int(1)
        .emit_push_int(2)
        .emit(OpCode::SWAP)
        .emit(OpCode::DUP)
        .emit(OpCode::DEPTH)
        .emit(OpCode::RET);
    let engine = run(builder.to_script());

    assert_eq!(result_int(&engine, 0), BigInt::from(3)); // DEPTH
    assert_eq!(result_int(&engine, 1), BigInt::from(1)); // DUP of swapped top
    assert_eq!(result_int(&engine, 2), BigInt::from(1));
    assert_eq!(result_int(&engine, 3), BigInt::from(2));
}

#[test]
fn test_rot_roll_pick_tuck() {
    let mut builder = ScriptBuilder::new();
    builder
        .emit_push_int(1)
        .emit_push_int(2)
        .emit_push_int(3)
        .emit(OpCode::ROT) // 2 3 1
        .emit_push_int(2)
        .emit(OpCode::PICK) // 2 3 1 2
        .emit(OpCode::TUCK) // 2 3 2 1 2
        .emit(OpCode::RET);
    let engine = run(builder.to_script());

    let expected = [2, 1, 2, 3, 2];
    for (index, value) in expected.iter().enumerate() {
        assert_eq!(result_int(&engine, index), BigInt::from(*value));
    }
}

#[test]
fn test_xdrop_and_reversen() {
    let mut builder = ScriptBuilder::new();
    builder
        .emit_push_int(1)
        .emit_push_int(2)
        .emit_push_int(3)
        .emit_push_int(2)
        .emit(OpCode::XDROP) // drops the 1 -> 2 3
        .emit_push_int(2)
        .emit(OpCode::REVERSEN) // 3 2
        .emit(OpCode::RET);
    let engine = run(builder.to_script());

    assert_eq!(result_int(&engine, 0), BigInt::from(2));
    assert_eq!(result_int(&engine, 1), BigInt::from(3));
}

#[test]
fn test_negative_count_faults() {
    let mut builder = ScriptBuilder::new();
    builder
        .emit_push_int(1)
        .emit_push_int(-1)
        .emit(OpCode::PICK)
        .emit(OpCode::RET);
    assert_eq!(run(builder.to_script()).state(), VMState::FAULT);
}

// -- arithmetic ------------------------------------------------------------

#[test]
fn test_division_truncates_toward_zero() {
    let mut builder = ScriptBuilder::new();
    builder
        .emit_push_int(7)
        .emit_push_int(-2)
        .emit(OpCode::DIV)
        .emit_push_int(-7)
        .emit_push_int(3)
        .emit(OpCode::MOD)
        .emit(OpCode::RET);
    let engine = run(builder.to_script());

    assert_eq!(result_int(&engine, 0), BigInt::from(-1)); // -7 mod 3
    assert_eq!(result_int(&engine, 1), BigInt::from(-3)); // 7 / -2
}

#[test]
fn test_division_by_zero_faults() {
    let mut builder = ScriptBuilder::new();
    builder.emit_push_int(1).emit_push_int(0).emit(OpCode::DIV);
    assert_eq!(run(builder.to_script()).state(), VMState::FAULT);

    let mut builder = ScriptBuilder::new();
    builder.emit_push_int(1).emit_push_int(0).emit(OpCode::MOD);
    assert_eq!(run(builder.to_script()).state(), VMState::FAULT);
}

#[test]
fn test_shift_boundaries() {
    // a shift of 256 is legal
    let mut builder = ScriptBuilder::new();
    builder
        .emit_push_int(1)
        .emit_push_int(256)
        .emit(OpCode::SHR)
        .emit(OpCode::RET);
    let engine = run(builder.to_script());
    assert_eq!(engine.state(), VMState::HALT);
    assert_eq!(result_int(&engine, 0), BigInt::from(0));

    let mut builder = ScriptBuilder::new();
    builder
        .emit_push_int(0)
        .emit_push_int(256)
        .emit(OpCode::SHL)
        .emit(OpCode::RET);
    assert_eq!(run(builder.to_script()).state(), VMState::HALT);

    // 257 is out of range
    let mut builder = ScriptBuilder::new();
    builder
        .emit_push_int(0)
        .emit_push_int(257)
        .emit(OpCode::SHL)
        .emit(OpCode::RET);
    assert_eq!(run(builder.to_script()).state(), VMState::FAULT);
}

#[test]
fn test_shift_zero_keeps_value() {
    let mut builder = ScriptBuilder::new();
    builder
        .emit_push_int(5)
        .emit_push_int(0)
        .emit(OpCode::SHL)
        .emit(OpCode::RET);
    let engine = run(builder.to_script());
    assert_eq!(engine.result_stack().len(), 1);
    assert_eq!(result_int(&engine, 0), BigInt::from(5));
}

#[test]
fn test_integer_width_cap() {
    // (2^255 - 1) + 1 does not fit 32 signed bytes
    let mut builder = ScriptBuilder::new();
    builder
        .emit_push_int((BigInt::from(1) << 255) - 1)
        .emit(OpCode::INC)
        .emit(OpCode::RET);
    assert_eq!(run(builder.to_script()).state(), VMState::FAULT);

    let mut builder = ScriptBuilder::new();
    builder
        .emit_push_int((BigInt::from(1) << 255) - 1)
        .emit(OpCode::DEC)
        .emit(OpCode::RET);
    assert_eq!(run(builder.to_script()).state(), VMState::HALT);
}

#[test]
fn test_within_bounds() {
    for (x, expected) in [(0, false), (1, true), (5, true), (9, true), (10, false)] {
        let mut builder = ScriptBuilder::new();
        builder
            .emit_push_int(x)
            .emit_push_int(1)
            .emit_push_int(10)
            .emit(OpCode::WITHIN)
            .emit(OpCode::RET);
        let engine = run(builder.to_script());
        assert_eq!(
            engine.result_stack().peek(0).expect("result").as_bool(),
            expected,
            "WITHIN 1 <= {x} < 10"
        );
    }
}

#[test]
fn test_ordered_comparison_with_null_is_false() {
    let mut builder = ScriptBuilder::new();
    builder
        .emit(OpCode::PUSHNULL)
        .emit_push_int(1)
        .emit(OpCode::LT)
        .emit(OpCode::RET);
    let engine = run(builder.to_script());
    assert_eq!(engine.state(), VMState::HALT);
    assert!(!engine.result_stack().peek(0).expect("result").as_bool());
}

#[test]
fn test_modpow_inverse() {
    // 3^-1 mod 7 == 5
    let mut builder = ScriptBuilder::new();
    builder
        .emit_push_int(3)
        .emit_push_int(-1)
        .emit_push_int(7)
        .emit(OpCode::MODPOW)
        .emit(OpCode::RET);
    let engine = run(builder.to_script());
    assert_eq!(engine.state(), VMState::HALT);
    assert_eq!(result_int(&engine, 0), BigInt::from(5));
}

#[test]
fn test_sqrt_and_pow() {
    let mut builder = ScriptBuilder::new();
    builder
        .emit_push_int(2)
        .emit_push_int(10)
        .emit(OpCode::POW)
        .emit(OpCode::SQRT)
        .emit(OpCode::RET);
    let engine = run(builder.to_script());
    assert_eq!(result_int(&engine, 0), BigInt::from(32));

    let mut builder = ScriptBuilder::new();
    builder.emit_push_int(-4).emit(OpCode::SQRT).emit(OpCode::RET);
    assert_eq!(run(builder.to_script()).state(), VMState::FAULT);
}

// -- bitwise and equality --------------------------------------------------

#[test]
fn test_equal_uses_reference_identity_for_compounds() {
    // two separately built empty arrays are not EQUAL
    let mut builder = ScriptBuilder::new();
    builder
        .emit(OpCode::NEWARRAY0)
        .emit(OpCode::NEWARRAY0)
        .emit(OpCode::EQUAL)
        .emit(OpCode::RET);
    let engine = run(builder.to_script());
    assert!(!engine.result_stack().peek(0).expect("result").as_bool());

    // an array is EQUAL to itself
    let mut builder = ScriptBuilder::new();
    builder
        .emit(OpCode::NEWARRAY0)
        .emit(OpCode::DUP)
        .emit(OpCode::EQUAL)
        .emit(OpCode::RET);
    let engine = run(builder.to_script());
    assert!(engine.result_stack().peek(0).expect("result").as_bool());
}

#[test]
fn test_bitwise_ops() {
    let mut builder = ScriptBuilder::new();
    builder
        .emit_push_int(0b1100)
        .emit_push_int(0b1010)
        .emit(OpCode::AND)
        .emit_push_int(0b1100)
        .emit_push_int(0b1010)
        .emit(OpCode::XOR)
        .emit_push_int(-1)
        .emit(OpCode::INVERT)
        .emit(OpCode::RET);
    let engine = run(builder.to_script());
    assert_eq!(result_int(&engine, 0), BigInt::from(0)); // !(-1)
    assert_eq!(result_int(&engine, 1), BigInt::from(0b0110));
    assert_eq!(result_int(&engine, 2), BigInt::from(0b1000));
}

// -- splice ----------------------------------------------------------------

#[test]
fn test_newbuffer_and_size() {
    let mut builder = ScriptBuilder::new();
    builder
        .emit_push_int(4)
        .emit(OpCode::NEWBUFFER)
        .emit(OpCode::SIZE)
        .emit(OpCode::RET);
    let engine = run(builder.to_script());
    assert_eq!(result_int(&engine, 0), BigInt::from(4));
}

#[test]
fn test_memcpy_zero_count_is_noop() {
    let mut builder = ScriptBuilder::new();
    builder
        .emit_push_int(2)
        .emit(OpCode::NEWBUFFER)
        .emit(OpCode::DUP)
        .emit_push_int(0)
        .emit_push_data(&[0xAA])
        .emit_push_int(0)
        .emit_push_int(0)
        .emit(OpCode::MEMCPY)
        .emit(OpCode::RET);
    let engine = run(builder.to_script());
    assert_eq!(engine.state(), VMState::HALT);
    let buffer = engine.result_stack().peek(0).expect("buffer");
    assert_eq!(buffer.as_bytes().expect("bytes"), vec![0, 0]);
}

#[test]
fn test_memcpy_copies_range() {
    let mut builder = ScriptBuilder::new();
    builder
        .emit_push_int(2)
        .emit(OpCode::NEWBUFFER)
        .emit(OpCode::DUP)
        .emit_push_int(0) // dst_index
        .emit_push_data(&[0xAA, 0xBB]) // src
        .emit_push_int(1) // src_index
        .emit_push_int(1) // count
        .emit(OpCode::MEMCPY)
        .emit(OpCode::RET);
    let engine = run(builder.to_script());
    let buffer = engine.result_stack().peek(0).expect("buffer");
    assert_eq!(buffer.as_bytes().expect("bytes"), vec![0xBB, 0x00]);
}

#[test]
fn test_cat_substr_left_right() {
    let mut builder = ScriptBuilder::new();
    builder
        .emit_push_data(b"ab")
        .emit_push_data(b"cd")
        .emit(OpCode::CAT) // "abcd" as a buffer
        .emit_push_int(1)
        .emit_push_int(2)
        .emit(OpCode::SUBSTR) // "bc"
        .emit_push_int(1)
        .emit(OpCode::LEFT) // "b"
        .emit(OpCode::RET);
    let engine = run(builder.to_script());
    let item = engine.result_stack().peek(0).expect("result");
    assert_eq!(item.item_type(), StackItemType::Buffer);
    assert_eq!(item.as_bytes().expect("bytes"), b"b".to_vec());

    let mut builder = ScriptBuilder::new();
    builder
        .emit_push_data(b"ab")
        .emit_push_int(5)
        .emit(OpCode::RIGHT)
        .emit(OpCode::RET);
    assert_eq!(run(builder.to_script()).state(), VMState::FAULT);
}

// -- compound types --------------------------------------------------------

#[test]
fn test_pack_unpack_round_trip() {
    let mut builder = ScriptBuilder::new();
    builder
        .emit_push_int(1)
        .emit_push_int(2)
        .emit_push_int(3)
        .emit_push_int(3)
        .emit(OpCode::PACK)
        .emit(OpCode::UNPACK)
        .emit(OpCode::RET);
    let engine = run(builder.to_script());

    assert_eq!(engine.state(), VMState::HALT);
    assert_eq!(engine.result_stack().len(), 4);
    assert_eq!(result_int(&engine, 0), BigInt::from(3)); // count
    assert_eq!(result_int(&engine, 1), BigInt::from(3));
    assert_eq!(result_int(&engine, 2), BigInt::from(2));
    assert_eq!(result_int(&engine, 3), BigInt::from(1));
}

#[test]
fn test_newarray_t_defaults() {
    // Integer fill defaults to zero
    let mut builder = ScriptBuilder::new();
    builder
        .emit_push_int(2)
        .emit_with(OpCode::NEWARRAY_T, &[StackItemType::Integer as u8])
        .emit_push_int(0)
        .emit(OpCode::PICKITEM)
        .emit(OpCode::RET);
    let engine = run(builder.to_script());
    assert_eq!(result_int(&engine, 0), BigInt::from(0));

    // a defined non-primitive type fills with null
    let mut builder = ScriptBuilder::new();
    builder
        .emit_push_int(1)
        .emit_with(OpCode::NEWARRAY_T, &[StackItemType::Array as u8])
        .emit_push_int(0)
        .emit(OpCode::PICKITEM)
        .emit(OpCode::ISNULL)
        .emit(OpCode::RET);
    let engine = run(builder.to_script());
    assert!(engine.result_stack().peek(0).expect("result").as_bool());

    // an undefined type byte faults
    let mut builder = ScriptBuilder::new();
    builder
        .emit_push_int(1)
        .emit_with(OpCode::NEWARRAY_T, &[0x49])
        .emit(OpCode::RET);
    assert_eq!(run(builder.to_script()).state(), VMState::FAULT);
}

#[test]
fn test_reverseitems_twice_is_identity() {
    let mut builder = ScriptBuilder::new();
    builder
        .emit_push_int(1)
        .emit_push_int(2)
        .emit_push_int(3)
        .emit_push_int(3)
        .emit(OpCode::PACK)
        .emit(OpCode::DUP)
        .emit(OpCode::REVERSEITEMS)
        .emit(OpCode::DUP)
        .emit(OpCode::REVERSEITEMS)
        .emit_push_int(0)
        .emit(OpCode::PICKITEM)
        .emit(OpCode::RET);
    let engine = run(builder.to_script());
    // PACK put the former top (3) at index 0; double reversal preserves it
    assert_eq!(result_int(&engine, 0), BigInt::from(3));
}

#[test]
fn test_append_clones_structs() {
    let mut builder = ScriptBuilder::new();
    builder
        .emit_with(OpCode::INITSLOT, &[0x02, 0x00])
        .emit(OpCode::NEWARRAY0)
        .emit(OpCode::STLOC0)
        .emit(OpCode::NEWSTRUCT0)
        .emit(OpCode::STLOC1)
        // append the struct to the array (a clone is stored)
        .emit(OpCode::LDLOC0)
        .emit(OpCode::LDLOC1)
        .emit(OpCode::APPEND)
        // grow the original struct
        .emit(OpCode::LDLOC1)
        .emit_push_int(5)
        .emit(OpCode::APPEND)
        // the array's copy is still empty
        .emit(OpCode::LDLOC0)
        .emit_push_int(0)
        .emit(OpCode::PICKITEM)
        .emit(OpCode::SIZE)
        .emit(OpCode::RET);
    let engine = run(builder.to_script());
    assert_eq!(engine.state(), VMState::HALT);
    assert_eq!(result_int(&engine, 0), BigInt::from(0));
}

#[test]
fn test_array_aliasing_is_observable() {
    // the same array reached through two locals reflects mutation
    let mut builder = ScriptBuilder::new();
    builder
        .emit_with(OpCode::INITSLOT, &[0x02, 0x00])
        .emit(OpCode::NEWARRAY0)
        .emit(OpCode::DUP)
        .emit(OpCode::STLOC0)
        .emit(OpCode::STLOC1)
        .emit(OpCode::LDLOC0)
        .emit_push_int(7)
        .emit(OpCode::APPEND)
        .emit(OpCode::LDLOC1)
        .emit(OpCode::SIZE)
        .emit(OpCode::RET);
    let engine = run(builder.to_script());
    assert_eq!(result_int(&engine, 0), BigInt::from(1));
}

#[test]
fn test_values_clones_struct_children() {
    let mut builder = ScriptBuilder::new();
    builder
        .emit_with(OpCode::INITSLOT, &[0x01, 0x00])
        .emit(OpCode::NEWSTRUCT0)
        .emit(OpCode::STLOC0)
        .emit(OpCode::LDLOC0)
        .emit_push_int(7)
        .emit(OpCode::APPEND) // S = [7]
        .emit(OpCode::LDLOC0)
        .emit_push_int(1)
        .emit(OpCode::PACK) // A = [S]
        .emit(OpCode::VALUES) // [S'] with S' a copy
        .emit_push_int(0)
        .emit(OpCode::PICKITEM)
        .emit_push_int(8)
        .emit(OpCode::APPEND) // S' = [7, 8]
        .emit(OpCode::LDLOC0)
        .emit(OpCode::SIZE) // original S still has one element
        .emit(OpCode::RET);
    let engine = run(builder.to_script());
    assert_eq!(engine.state(), VMState::HALT);
    assert_eq!(result_int(&engine, 0), BigInt::from(1));
}

#[test]
fn test_map_operations() {
    let mut builder = ScriptBuilder::new();
    builder
        .emit(OpCode::NEWMAP)
        .emit(OpCode::DUP)
        .emit_push_int(1)
        .emit_push_int(5)
        .emit(OpCode::SETITEM) // m[1] = 5
        .emit(OpCode::DUP)
        .emit_push_int(1)
        .emit(OpCode::PICKITEM) // 5
        .emit(OpCode::SWAP)
        .emit_push_int(1)
        .emit(OpCode::HASKEY) // true
        .emit(OpCode::RET);
    let engine = run(builder.to_script());
    assert!(engine.result_stack().peek(0).expect("haskey").as_bool());
    assert_eq!(result_int(&engine, 1), BigInt::from(5));
}

#[test]
fn test_map_remove_ignores_absent_keys() {
    let mut builder = ScriptBuilder::new();
    builder
        .emit(OpCode::NEWMAP)
        .emit(OpCode::DUP)
        .emit_push_int(9)
        .emit(OpCode::REMOVE)
        .emit(OpCode::SIZE)
        .emit(OpCode::RET);
    let engine = run(builder.to_script());
    assert_eq!(engine.state(), VMState::HALT);
    assert_eq!(result_int(&engine, 0), BigInt::from(0));
}

#[test]
fn test_packmap_and_keys() {
    let mut builder = ScriptBuilder::new();
    builder
        .emit_push_int(10) // value
        .emit_push_int(1) // key
        .emit_push_int(1) // pair count
        .emit(OpCode::PACKMAP)
        .emit(OpCode::KEYS)
        .emit_push_int(0)
        .emit(OpCode::PICKITEM)
        .emit(OpCode::RET);
    let engine = run(builder.to_script());
    assert_eq!(result_int(&engine, 0), BigInt::from(1));
}

#[test]
fn test_popitem_and_clearitems() {
    let mut builder = ScriptBuilder::new();
    builder
        .emit_push_int(1)
        .emit_push_int(2)
        .emit_push_int(2)
        .emit(OpCode::PACK) // [2, 1]
        .emit(OpCode::DUP)
        .emit(OpCode::POPITEM) // pops index 1 -> 1
        .emit(OpCode::SWAP)
        .emit(OpCode::DUP)
        .emit(OpCode::CLEARITEMS)
        .emit(OpCode::SIZE)
        .emit(OpCode::RET);
    let engine = run(builder.to_script());
    assert_eq!(result_int(&engine, 0), BigInt::from(0)); // size after clear
    assert_eq!(result_int(&engine, 1), BigInt::from(1)); // popped item
}

#[test]
fn test_setitem_on_buffer_byte_range() {
    let mut builder = ScriptBuilder::new();
    builder
        .emit_push_int(1)
        .emit(OpCode::NEWBUFFER)
        .emit(OpCode::DUP)
        .emit_push_int(0)
        .emit_push_int(255)
        .emit(OpCode::SETITEM)
        .emit(OpCode::RET);
    let engine = run(builder.to_script());
    let buffer = engine.result_stack().peek(0).expect("buffer");
    assert_eq!(buffer.as_bytes().expect("bytes"), vec![0xFF]);

    let mut builder = ScriptBuilder::new();
    builder
        .emit_push_int(1)
        .emit(OpCode::NEWBUFFER)
        .emit_push_int(0)
        .emit_push_int(256)
        .emit(OpCode::SETITEM)
        .emit(OpCode::RET);
    assert_eq!(run(builder.to_script()).state(), VMState::FAULT);
}

// -- slots ------------------------------------------------------------------

#[test]
fn test_initslot_argument_order() {
    // arguments are popped in order: the top of stack becomes argument 0
    let mut builder = ScriptBuilder::new();
    builder
        .emit_push_int(10)
        .emit_push_int(20)
        .emit_with(OpCode::INITSLOT, &[0x00, 0x02])
        .emit(OpCode::LDARG0)
        .emit(OpCode::RET);
    let engine = run(builder.to_script());
    assert_eq!(result_int(&engine, 0), BigInt::from(20));
}

#[test]
fn test_locals_load_store() {
    let mut builder = ScriptBuilder::new();
    builder
        .emit_with(OpCode::INITSLOT, &[0x02, 0x00])
        .emit_push_int(42)
        .emit(OpCode::STLOC0)
        .emit(OpCode::LDLOC0)
        .emit(OpCode::LDLOC1) // never stored: null
        .emit(OpCode::ISNULL)
        .emit(OpCode::RET);
    let engine = run(builder.to_script());
    assert!(engine.result_stack().peek(0).expect("isnull").as_bool());
    assert_eq!(result_int(&engine, 1), BigInt::from(42));
}

#[test]
fn test_uninitialized_slot_access_faults() {
    let engine = run_bytes(vec![0x68, 0x40]); // LDLOC0 RET
    assert_eq!(engine.state(), VMState::FAULT);
}

#[test]
fn test_double_initslot_faults() {
    let mut builder = ScriptBuilder::new();
    builder
        .emit_with(OpCode::INITSLOT, &[0x01, 0x00])
        .emit_with(OpCode::INITSLOT, &[0x01, 0x00])
        .emit(OpCode::RET);
    assert_eq!(run(builder.to_script()).state(), VMState::FAULT);
}

#[test]
fn test_static_fields_shared_across_call() {
    let engine = run_bytes(vec![
        0x56, 0x01, // 0: INITSSLOT 1
        0x17, // 2: PUSH7
        0x60, // 3: STSFLD0
        0x34, 0x04, // 4: CALL +4 -> 8
        0x40, // 6: RET
        0x21, // 7: NOP
        0x58, // 8: LDSFLD0
        0x40, // 9: RET
    ]);
    assert_eq!(engine.state(), VMState::HALT);
    assert_eq!(result_int(&engine, 0), BigInt::from(7));
}

// -- type operations --------------------------------------------------------

#[test]
fn test_istype_and_isnull() {
    let mut builder = ScriptBuilder::new();
    builder
        .emit_push_int(1)
        .emit_with(OpCode::ISTYPE, &[StackItemType::Integer as u8])
        .emit(OpCode::PUSHNULL)
        .emit(OpCode::ISNULL)
        .emit(OpCode::RET);
    let engine = run(builder.to_script());
    assert!(engine.result_stack().peek(0).expect("isnull").as_bool());
    assert!(engine.result_stack().peek(1).expect("istype").as_bool());

    // ISTYPE with Any is rejected
    let mut builder = ScriptBuilder::new();
    builder
        .emit_push_int(1)
        .emit_with(OpCode::ISTYPE, &[StackItemType::Any as u8])
        .emit(OpCode::RET);
    assert_eq!(run(builder.to_script()).state(), VMState::FAULT);
}

#[test]
fn test_convert_round_trip() {
    let mut builder = ScriptBuilder::new();
    builder
        .emit_push_int(42)
        .emit_with(OpCode::CONVERT, &[StackItemType::ByteString as u8])
        .emit_with(OpCode::CONVERT, &[StackItemType::Integer as u8])
        .emit(OpCode::RET);
    let engine = run(builder.to_script());
    assert_eq!(result_int(&engine, 0), BigInt::from(42));

    // a map cannot become an integer
    let mut builder = ScriptBuilder::new();
    builder
        .emit(OpCode::NEWMAP)
        .emit_with(OpCode::CONVERT, &[StackItemType::Integer as u8])
        .emit(OpCode::RET);
    assert_eq!(run(builder.to_script()).state(), VMState::FAULT);
}

// -- limits ------------------------------------------------------------------

#[test]
fn test_newarray_at_stack_size_limit() {
    let mut builder = ScriptBuilder::new();
    builder
        .emit_push_int(2048)
        .emit(OpCode::NEWARRAY)
        .emit(OpCode::SIZE)
        .emit(OpCode::RET);
    let engine = run(builder.to_script());
    assert_eq!(engine.state(), VMState::HALT);
    assert_eq!(result_int(&engine, 0), BigInt::from(2048));

    let mut builder = ScriptBuilder::new();
    builder.emit_push_int(2049).emit(OpCode::NEWARRAY).emit(OpCode::RET);
    assert_eq!(run(builder.to_script()).state(), VMState::FAULT);
}

#[test]
fn test_reference_limit_bounds_stack_growth() {
    // 2049 pushed items exceed the live-reference bound
    let mut builder = ScriptBuilder::new();
    for _ in 0..2049 {
        builder.emit(OpCode::PUSH1);
    }
    builder.emit(OpCode::RET);
    assert_eq!(run(builder.to_script()).state(), VMState::FAULT);

    let mut builder = ScriptBuilder::new();
    for _ in 0..2048 {
        builder.emit(OpCode::PUSH1);
    }
    builder.emit(OpCode::RET);
    assert_eq!(run(builder.to_script()).state(), VMState::HALT);
}

#[test]
fn test_unbounded_recursion_faults() {
    // CALL +0 calls itself forever; the invocation depth limit trips
    let engine = run_bytes(vec![0x34, 0x00]);
    assert_eq!(engine.state(), VMState::FAULT);
}

#[test]
fn test_newbuffer_item_size_limit() {
    let mut builder = ScriptBuilder::new();
    builder
        .emit_push_int(1_048_576)
        .emit(OpCode::NEWBUFFER)
        .emit(OpCode::DROP)
        .emit(OpCode::RET);
    assert_eq!(run(builder.to_script()).state(), VMState::HALT);

    let mut builder = ScriptBuilder::new();
    builder
        .emit_push_int(1_048_577)
        .emit(OpCode::NEWBUFFER)
        .emit(OpCode::RET);
    assert_eq!(run(builder.to_script()).state(), VMState::FAULT);
}

// -- decode faults -----------------------------------------------------------

#[test]
fn test_unassigned_opcode_faults_at_dispatch() {
    let engine = run_bytes(vec![0x11, 0xFF, 0x40]);
    assert_eq!(engine.state(), VMState::FAULT);
}

#[test]
fn test_truncated_operand_faults() {
    // PUSHINT32 with a single operand byte
    let engine = run_bytes(vec![0x02, 0x01]);
    assert_eq!(engine.state(), VMState::FAULT);
}

// -- hooks -------------------------------------------------------------------

struct SyscallHost;

impl EngineHooks for SyscallHost {
    fn on_syscall(&mut self, engine: &mut ExecutionEngine, method: u32) -> VmResult<()> {
        match method {
            0x77 => engine.push_integer(BigInt::from(42)),
            other => Err(VmError::unsupported_syscall(other)),
        }
    }
}

#[test]
fn test_syscall_dispatches_to_hooks() {
    let mut builder = ScriptBuilder::new();
    builder.emit_syscall(0x77).emit(OpCode::RET);

    let mut engine = ExecutionEngine::new();
    engine.set_hooks(Box::new(SyscallHost));
    engine.load_script(builder.to_script(), 0).expect("load script");
    assert_eq!(engine.execute(), VMState::HALT);
    assert_eq!(result_int(&engine, 0), BigInt::from(42));
}

#[test]
fn test_syscall_without_host_faults() {
    let mut builder = ScriptBuilder::new();
    builder.emit_syscall(0x77).emit(OpCode::RET);
    assert_eq!(run(builder.to_script()).state(), VMState::FAULT);
}

#[test]
fn test_callt_without_host_faults() {
    let engine = run_bytes(vec![0x37, 0x01, 0x00, 0x40]);
    assert_eq!(engine.state(), VMState::FAULT);
}

struct StepLimiter {
    remaining: usize,
}

impl EngineHooks for StepLimiter {
    fn pre_execute_instruction(
        &mut self,
        _engine: &mut ExecutionEngine,
        _instruction: &Instruction,
    ) -> VmResult<()> {
        if self.remaining == 0 {
            return Err(VmError::invalid_operation("step budget exhausted"));
        }
        self.remaining -= 1;
        Ok(())
    }
}

#[test]
fn test_pre_step_hook_fault_is_not_catchable() {
    // even inside a try region, a pre-step error faults the engine
    let mut engine = ExecutionEngine::new();
    engine.set_hooks(Box::new(StepLimiter { remaining: 2 }));
    engine
        .load_script(
            Script::new(vec![0x3B, 0x04, 0x00, 0x21, 0x21, 0x21, 0x40]),
            0,
        )
        .expect("load script");
    assert_eq!(engine.execute(), VMState::FAULT);
}

#[derive(Clone, Default)]
struct Recorder {
    states: Rc<RefCell<Vec<VMState>>>,
    faults: Rc<RefCell<Vec<String>>>,
}

impl EngineHooks for Recorder {
    fn on_state_changed(&mut self, engine: &ExecutionEngine) {
        self.states.borrow_mut().push(engine.state());
    }

    fn on_fault(&mut self, _engine: &ExecutionEngine, error: &VmError) {
        self.faults.borrow_mut().push(error.to_string());
    }
}

#[test]
fn test_state_transitions_are_observable() {
    let recorder = Recorder::default();
    let mut engine = ExecutionEngine::new();
    engine.set_hooks(Box::new(recorder.clone()));
    engine
        .load_script(Script::new(vec![0x11, 0x40]), 0)
        .expect("load script");
    engine.execute();

    assert_eq!(*recorder.states.borrow(), vec![VMState::NONE, VMState::HALT]);
    assert!(recorder.faults.borrow().is_empty());
}

#[test]
fn test_fault_hook_receives_original_error() {
    let recorder = Recorder::default();
    let mut engine = ExecutionEngine::new();
    engine.set_hooks(Box::new(recorder.clone()));
    engine
        .load_script(Script::new(vec![0x11, 0x10, 0xA1, 0x40]), 0) // PUSH1 PUSH0 DIV
        .expect("load script");
    engine.execute();

    assert_eq!(engine.state(), VMState::FAULT);
    let faults = recorder.faults.borrow();
    assert_eq!(faults.len(), 1);
    assert!(faults[0].contains("Division by zero"));
}
