//! # Stack VM
//!
//! The execution core of a stack-based bytecode virtual machine for smart
//! contracts: a dispatch engine that advances a program counter through a
//! linear instruction stream, manipulates a typed operand stack, coordinates
//! nested call frames and implements structured try/catch/finally
//! unwinding. Every fault is deterministic, and a reference counter bounds
//! the live object graph after each step so adversarial scripts cannot
//! exhaust memory.
//!
//! The bytecode decoder, value representations and limits live in this
//! crate; syscall dispatch and token calls are delegated to an embedder via
//! [`EngineHooks`].
//!
//! ## Example
//!
//! ```
//! use stack_vm::{ExecutionEngine, OpCode, ScriptBuilder, VMState};
//!
//! let mut builder = ScriptBuilder::new();
//! builder
//!     .emit_push_int(2)
//!     .emit_push_int(3)
//!     .emit(OpCode::ADD)
//!     .emit(OpCode::RET);
//!
//! let mut engine = ExecutionEngine::new();
//! engine.load_script(builder.to_script(), 0).unwrap();
//! assert_eq!(engine.execute(), VMState::HALT);
//!
//! let result = engine.result_stack().peek(0).unwrap();
//! assert_eq!(result.as_int().unwrap(), 5.into());
//! ```

/// Error types and the crate-wide result alias.
pub mod error;
/// Per-frame operand stack.
pub mod evaluation_stack;
/// Try-frame records for structured exception handling.
pub mod exception_handling;
/// Call frames and their shared state.
pub mod execution_context;
/// The dispatch loop, unwinder and embedder hooks.
pub mod execution_engine;
/// Decoded instruction records.
pub mod instruction;
/// Instruction dispatch table and opcode handlers.
pub mod jump_table;
/// Engine resource limits.
pub mod limits;
/// Opcode definitions and operand layouts.
pub mod op_code;
/// Live-reference accounting.
pub mod reference_counter;
/// Immutable script bytes with instruction decoding.
pub mod script;
/// Programmatic bytecode assembly.
pub mod script_builder;
/// Slot storage for static fields, locals and arguments.
pub mod slot;
/// The stack item value model.
pub mod stack_item;
/// VM state flags.
pub mod vm_state;

pub use error::{VmError, VmResult};
pub use evaluation_stack::EvaluationStack;
pub use exception_handling::{ExceptionHandlingContext, ExceptionHandlingState};
pub use execution_context::ExecutionContext;
pub use execution_engine::{EngineHooks, ExecutionEngine};
pub use instruction::Instruction;
pub use jump_table::{InstructionHandler, JumpTable};
pub use limits::ExecutionEngineLimits;
pub use op_code::{OpCode, OperandSize};
pub use reference_counter::ReferenceCounter;
pub use script::Script;
pub use script_builder::ScriptBuilder;
pub use slot::Slot;
pub use stack_item::{InteropInterface, StackItem, StackItemType};
pub use vm_state::VMState;
