//! Growable bytecode buffer used while compiling, plus operand readers.

use std::rc::Rc;

use crate::backend::Bytecode;
use crate::bytecode::instruction::OpCode;

/// Largest code blob a jump target can address.
pub const MAX_CODE_LEN: usize = u16::MAX as usize;

/// Bytecode under construction.
#[derive(Debug, Clone, Default)]
pub struct CodeBuffer {
    /// The bytecode instructions.
    pub code: Vec<u8>,
}

impl CodeBuffer {
    pub fn new() -> Self {
        Self { code: Vec::new() }
    }

    /// Write an opcode.
    pub fn write_op(&mut self, op: OpCode) {
        self.code.push(op as u8);
    }

    /// Write a raw byte.
    pub fn write_byte(&mut self, byte: u8) {
        self.code.push(byte);
    }

    /// Write a 16-bit value (little-endian).
    pub fn write_u16(&mut self, value: u16) {
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    /// Write a 32-bit value (little-endian).
    pub fn write_u32(&mut self, value: u32) {
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_lit(&mut self, value: i32) {
        self.write_op(OpCode::Lit);
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a call to a word of the same unit by name. `shadowed` counts the
    /// later definitions of that name to skip when resolving. Returns the
    /// offset of the `shadowed` operand for patching.
    pub fn write_named_call(&mut self, shadowed: u16, name: &str) -> usize {
        self.write_op(OpCode::CallNamed);
        let at = self.current_offset();
        self.write_u16(shadowed);
        self.write_byte(name.len() as u8);
        self.code.extend_from_slice(name.as_bytes());
        at
    }

    /// Emit a jump-style instruction with a placeholder target and return
    /// the operand offset for [`CodeBuffer::patch_u16`].
    pub fn write_jump(&mut self, op: OpCode) -> usize {
        self.write_op(op);
        let at = self.current_offset();
        self.write_u16(0xFFFF);
        at
    }

    /// Get the current offset in the code.
    pub fn current_offset(&self) -> usize {
        self.code.len()
    }

    /// Patch a u16 value at the given offset.
    pub fn patch_u16(&mut self, offset: usize, value: u16) {
        self.code[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }

    /// Point the jump operand at `offset` to the current end of code.
    pub fn patch_to_here(&mut self, offset: usize) {
        let here = self.current_offset() as u16;
        self.patch_u16(offset, here);
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    /// Seal the buffer into shared bytecode.
    pub fn finish(self) -> Bytecode {
        Rc::from(self.code)
    }
}

/// Read a little-endian u16 operand.
pub fn read_u16(code: &[u8], offset: usize) -> Option<u16> {
    let bytes = code.get(offset..offset + 2)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}

/// Read a little-endian u32 operand.
pub fn read_u32(code: &[u8], offset: usize) -> Option<u32> {
    let bytes = code.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Read a little-endian i32 operand.
pub fn read_i32(code: &[u8], offset: usize) -> Option<i32> {
    read_u32(code, offset).map(|v| v as i32)
}

/// Read the operands of `CallNamed`: the shadow count and the name.
pub fn read_named_call(code: &[u8], offset: usize) -> Option<(u16, &str)> {
    let shadowed = read_u16(code, offset)?;
    let len = *code.get(offset + 2)? as usize;
    let bytes = code.get(offset + 3..offset + 3 + len)?;
    Some((shadowed, std::str::from_utf8(bytes).ok()?))
}

/// Bytes taken by the operands of a `CallNamed` for `name`.
pub fn named_call_len(name: &str) -> usize {
    3 + name.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_basics() {
        let mut buf = CodeBuffer::new();
        buf.write_lit(-2);
        buf.write_op(OpCode::Return);

        assert_eq!(buf.len(), 6);
        assert_eq!(buf.code[0], OpCode::Lit as u8);
        assert_eq!(read_i32(&buf.code, 1), Some(-2));
        assert_eq!(buf.code[5], OpCode::Return as u8);
    }

    #[test]
    fn test_jump_patching() {
        let mut buf = CodeBuffer::new();
        let jump = buf.write_jump(OpCode::JumpIfZero);
        buf.write_op(OpCode::Drop);
        buf.write_op(OpCode::Drop);
        buf.patch_to_here(jump);

        assert_eq!(read_u16(&buf.code, jump), Some(5));
    }

    #[test]
    fn test_truncated_operands() {
        let code = [OpCode::Call as u8, 1, 0];
        assert_eq!(read_u32(&code, 1), None);
        assert_eq!(read_named_call(&[0, 0, 3, b'A', b'B'], 0), None);
        assert_eq!(read_named_call(&[1, 0, 2, b'S', b'Q'], 0), Some((1, "SQ")));
    }

    #[test]
    fn test_named_call_patching() {
        let mut buf = CodeBuffer::new();
        let at = buf.write_named_call(0, "SQ");
        buf.patch_u16(at, 2);
        assert_eq!(buf.len(), 1 + named_call_len("SQ"));
        assert_eq!(read_named_call(&buf.code, 1), Some((2, "SQ")));
    }
}
