//! Decoded instruction records.

use crate::error::{VmError, VmResult};
use crate::op_code::OpCode;

/// A single decoded instruction.
///
/// `operand` holds the payload bytes: for length-prefixed opcodes (the
/// PUSHDATA family) the prefix itself is not part of the operand but is
/// accounted for by [`Instruction::size`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pointer: usize,
    opcode: OpCode,
    operand: Vec<u8>,
    prefix_size: usize,
}

impl Instruction {
    /// Decodes the instruction starting at `position` in `script`.
    pub fn decode(script: &[u8], position: usize) -> VmResult<Self> {
        let byte = *script
            .get(position)
            .ok_or_else(|| VmError::decode(format!("position {position} past end of script")))?;
        let opcode = OpCode::from_byte(byte).ok_or_else(|| VmError::invalid_opcode(byte))?;

        let layout = opcode.operand_size();
        let operand_start = position + 1;

        if layout.is_prefixed() {
            let prefix_size = layout.prefix();
            let prefix = script
                .get(operand_start..operand_start + prefix_size)
                .ok_or_else(|| {
                    VmError::decode(format!("{opcode:?} is missing its length prefix"))
                })?;
            let mut length = 0usize;
            for (i, b) in prefix.iter().enumerate() {
                length |= (*b as usize) << (8 * i);
            }
            let data_start = operand_start + prefix_size;
            let operand = script.get(data_start..data_start + length).ok_or_else(|| {
                VmError::decode(format!(
                    "{opcode:?} declares {length} payload bytes past end of script"
                ))
            })?;
            Ok(Self {
                pointer: position,
                opcode,
                operand: operand.to_vec(),
                prefix_size,
            })
        } else {
            let size = layout.size();
            let operand = script
                .get(operand_start..operand_start + size)
                .ok_or_else(|| {
                    VmError::decode(format!("{opcode:?} operand extends past end of script"))
                })?;
            Ok(Self {
                pointer: position,
                opcode,
                operand: operand.to_vec(),
                prefix_size: 0,
            })
        }
    }

    /// The synthetic RET yielded when the instruction pointer runs off the
    /// end of a script.
    pub(crate) fn synthetic_ret(pointer: usize) -> Self {
        Self {
            pointer,
            opcode: OpCode::RET,
            operand: Vec::new(),
            prefix_size: 0,
        }
    }

    /// Builds an instruction directly. Intended for tests.
    pub fn new(opcode: OpCode, operand: Vec<u8>) -> Self {
        let prefix_size = opcode.operand_size().prefix();
        Self {
            pointer: 0,
            opcode,
            operand,
            prefix_size,
        }
    }

    /// The position of this instruction in its script.
    pub fn pointer(&self) -> usize {
        self.pointer
    }

    /// The instruction's opcode.
    pub fn opcode(&self) -> OpCode {
        self.opcode
    }

    /// The operand payload bytes.
    pub fn operand(&self) -> &[u8] {
        &self.operand
    }

    /// Total on-wire size: opcode byte, length prefix and operand.
    pub fn size(&self) -> usize {
        1 + self.prefix_size + self.operand.len()
    }

    fn operand_bytes(&self, start: usize, count: usize) -> VmResult<&[u8]> {
        self.operand.get(start..start + count).ok_or_else(|| {
            VmError::decode(format!(
                "{:?} operand too short: need {} bytes at offset {start}, have {}",
                self.opcode,
                count,
                self.operand.len()
            ))
        })
    }

    /// First operand byte as a signed value.
    pub fn token_i8(&self) -> VmResult<i8> {
        Ok(self.operand_bytes(0, 1)?[0] as i8)
    }

    /// Second operand byte as a signed value.
    pub fn token_i8_1(&self) -> VmResult<i8> {
        Ok(self.operand_bytes(1, 1)?[0] as i8)
    }

    /// First four operand bytes as a signed little-endian value.
    pub fn token_i32(&self) -> VmResult<i32> {
        let bytes = self.operand_bytes(0, 4)?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Operand bytes four through eight as a signed little-endian value.
    pub fn token_i32_1(&self) -> VmResult<i32> {
        let bytes = self.operand_bytes(4, 4)?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// First operand byte as an unsigned value.
    pub fn token_u8(&self) -> VmResult<u8> {
        Ok(self.operand_bytes(0, 1)?[0])
    }

    /// Second operand byte as an unsigned value.
    pub fn token_u8_1(&self) -> VmResult<u8> {
        Ok(self.operand_bytes(1, 1)?[0])
    }

    /// First two operand bytes as an unsigned little-endian value.
    pub fn token_u16(&self) -> VmResult<u16> {
        let bytes = self.operand_bytes(0, 2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    /// First four operand bytes as an unsigned little-endian value.
    pub fn token_u32(&self) -> VmResult<u32> {
        let bytes = self.operand_bytes(0, 4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_fixed_operand() {
        // PUSHINT16 0x2A 0x00
        let script = [0x01, 0x2A, 0x00];
        let instruction = Instruction::decode(&script, 0).expect("decode");
        assert_eq!(instruction.opcode(), OpCode::PUSHINT16);
        assert_eq!(instruction.operand(), &[0x2A, 0x00]);
        assert_eq!(instruction.size(), 3);
    }

    #[test]
    fn test_decode_pushdata() {
        let script = [0x0C, 0x03, 0xAA, 0xBB, 0xCC];
        let instruction = Instruction::decode(&script, 0).expect("decode");
        assert_eq!(instruction.opcode(), OpCode::PUSHDATA1);
        assert_eq!(instruction.operand(), &[0xAA, 0xBB, 0xCC]);
        assert_eq!(instruction.size(), 5);

        // PUSHDATA2 with a two-byte little-endian length
        let script = [0x0D, 0x02, 0x00, 0x01, 0x02];
        let instruction = Instruction::decode(&script, 0).expect("decode");
        assert_eq!(instruction.operand(), &[0x01, 0x02]);
        assert_eq!(instruction.size(), 5);
    }

    #[test]
    fn test_decode_truncated() {
        // PUSHINT32 with only two operand bytes
        assert!(Instruction::decode(&[0x02, 0x01, 0x02], 0).is_err());
        // PUSHDATA1 declaring more payload than present
        assert!(Instruction::decode(&[0x0C, 0x05, 0x01], 0).is_err());
        // unassigned opcode byte
        assert!(Instruction::decode(&[0xFF], 0).is_err());
    }

    #[test]
    fn test_tokens() {
        let try_op = Instruction::new(OpCode::TRY, vec![0x05, 0xFE]);
        assert_eq!(try_op.token_i8().expect("token"), 5);
        assert_eq!(try_op.token_i8_1().expect("token"), -2);

        let try_l = Instruction::new(
            OpCode::TRY_L,
            vec![0x01, 0x00, 0x00, 0x00, 0xFF, 0xFF, 0xFF, 0xFF],
        );
        assert_eq!(try_l.token_i32().expect("token"), 1);
        assert_eq!(try_l.token_i32_1().expect("token"), -1);

        let syscall = Instruction::new(OpCode::SYSCALL, vec![0x78, 0x56, 0x34, 0x12]);
        assert_eq!(syscall.token_u32().expect("token"), 0x1234_5678);

        let initslot = Instruction::new(OpCode::INITSLOT, vec![0x02, 0x03]);
        assert_eq!(initslot.token_u8().expect("token"), 2);
        assert_eq!(initslot.token_u8_1().expect("token"), 3);

        let callt = Instruction::new(OpCode::CALLT, vec![0x34, 0x12]);
        assert_eq!(callt.token_u16().expect("token"), 0x1234);

        assert!(Instruction::new(OpCode::JMP, vec![]).token_i8().is_err());
    }
}
