//! Programmatic bytecode assembly.

use num_bigint::BigInt;
use num_traits::Zero;

use crate::op_code::OpCode;
use crate::script::Script;

/// Builds VM scripts instruction by instruction. Offsets for jumps, calls
/// and try regions are the caller's responsibility.
#[derive(Debug, Default)]
pub struct ScriptBuilder {
    script: Vec<u8>,
}

impl ScriptBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of bytes emitted so far. Useful as a label for computing
    /// branch offsets.
    pub fn len(&self) -> usize {
        self.script.len()
    }

    /// Returns `true` when nothing was emitted yet.
    pub fn is_empty(&self) -> bool {
        self.script.is_empty()
    }

    /// Emits a bare opcode.
    pub fn emit(&mut self, opcode: OpCode) -> &mut Self {
        self.script.push(opcode as u8);
        self
    }

    /// Emits an opcode followed by raw operand bytes.
    pub fn emit_with(&mut self, opcode: OpCode, operand: &[u8]) -> &mut Self {
        self.script.push(opcode as u8);
        self.script.extend_from_slice(operand);
        self
    }

    /// Emits a raw byte. Handy for crafting deliberately malformed scripts
    /// in tests.
    pub fn emit_raw(&mut self, byte: u8) -> &mut Self {
        self.script.push(byte);
        self
    }

    /// Emits the shortest push for an integer: PUSHM1/PUSH0..PUSH16 when it
    /// fits, otherwise the narrowest PUSHINT⟨n⟩.
    pub fn emit_push_int<T: Into<BigInt>>(&mut self, value: T) -> &mut Self {
        let value = value.into();
        if value == BigInt::from(-1) {
            return self.emit(OpCode::PUSHM1);
        }
        if value >= BigInt::zero() && value <= BigInt::from(16) {
            let small: u8 = u8::try_from(&value).unwrap_or_default();
            self.script.push(OpCode::PUSH0 as u8 + small);
            return self;
        }

        let bytes = value.to_signed_bytes_le();
        let (opcode, width) = match bytes.len() {
            0..=1 => (OpCode::PUSHINT8, 1),
            2 => (OpCode::PUSHINT16, 2),
            3..=4 => (OpCode::PUSHINT32, 4),
            5..=8 => (OpCode::PUSHINT64, 8),
            9..=16 => (OpCode::PUSHINT128, 16),
            _ => (OpCode::PUSHINT256, 32),
        };
        let fill = if value.sign() == num_bigint::Sign::Minus {
            0xFF
        } else {
            0x00
        };
        let mut operand = bytes;
        operand.resize(width, fill);
        self.emit_with(opcode, &operand)
    }

    /// Emits PUSHT or PUSHF.
    pub fn emit_push_bool(&mut self, value: bool) -> &mut Self {
        self.emit(if value { OpCode::PUSHT } else { OpCode::PUSHF })
    }

    /// Emits the narrowest PUSHDATA form for `data`.
    pub fn emit_push_data(&mut self, data: &[u8]) -> &mut Self {
        let length = data.len();
        if length <= u8::MAX as usize {
            self.emit_with(OpCode::PUSHDATA1, &[length as u8]);
        } else if length <= u16::MAX as usize {
            self.script.push(OpCode::PUSHDATA2 as u8);
            self.script
                .extend_from_slice(&(length as u16).to_le_bytes());
        } else {
            self.script.push(OpCode::PUSHDATA4 as u8);
            self.script
                .extend_from_slice(&(length as u32).to_le_bytes());
        }
        self.script.extend_from_slice(data);
        self
    }

    /// Emits a short-form branch or call with a one-byte signed offset.
    pub fn emit_jump(&mut self, opcode: OpCode, offset: i8) -> &mut Self {
        self.emit_with(opcode, &[offset as u8])
    }

    /// Emits a long-form branch or call with a four-byte signed offset.
    pub fn emit_jump_l(&mut self, opcode: OpCode, offset: i32) -> &mut Self {
        self.emit_with(opcode, &offset.to_le_bytes())
    }

    /// Emits TRY with one-byte catch and finally offsets (zero for absent).
    pub fn emit_try(&mut self, catch_offset: i8, finally_offset: i8) -> &mut Self {
        self.emit_with(OpCode::TRY, &[catch_offset as u8, finally_offset as u8])
    }

    /// Emits ENDTRY with a one-byte offset to the end of the region.
    pub fn emit_endtry(&mut self, offset: i8) -> &mut Self {
        self.emit_with(OpCode::ENDTRY, &[offset as u8])
    }

    /// Emits a SYSCALL with its method identifier.
    pub fn emit_syscall(&mut self, method: u32) -> &mut Self {
        self.emit_with(OpCode::SYSCALL, &method.to_le_bytes())
    }

    /// The raw bytecode assembled so far.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.script.clone()
    }

    /// Finishes the build as a script.
    pub fn to_script(&self) -> Script {
        Script::new(self.script.clone())
    }
}
