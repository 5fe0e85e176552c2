//! Bytecode disassembler for `.see` and debugging.

use std::fmt::Write;

use crate::backend::WordId;
use crate::bytecode::chunk::{named_call_len, read_i32, read_named_call, read_u16, read_u32};
use crate::bytecode::instruction::OpCode;

/// Disassemble a code blob, one instruction per line.
///
/// `name_of` resolves the target of `CALL <id>` so it can be shown by name.
pub fn disassemble_code<F>(code: &[u8], name_of: F) -> String
where
    F: Fn(WordId) -> Option<String>,
{
    let mut output = String::new();
    let mut offset = 0;

    while offset < code.len() {
        offset = disassemble_instruction(code, offset, &name_of, &mut output);
    }

    output
}

/// Disassemble a single instruction, returning the offset of the next one.
pub fn disassemble_instruction<F>(code: &[u8], offset: usize, name_of: &F, output: &mut String) -> usize
where
    F: Fn(WordId) -> Option<String>,
{
    let _ = write!(output, "{:04}  ", offset);

    let byte = code[offset];
    let opcode = match OpCode::from_u8(byte) {
        Some(op) => op,
        None => {
            let _ = writeln!(output, "??? {}", byte);
            return offset + 1;
        }
    };
    let operand = offset + 1;
    let mnemonic = opcode.mnemonic();

    match opcode {
        OpCode::Lit => match read_i32(code, operand) {
            Some(value) => {
                let _ = writeln!(output, "{:<8}{}", mnemonic, value);
            }
            None => return truncated(mnemonic, code.len(), output),
        },
        OpCode::Jump | OpCode::JumpIfZero | OpCode::Loop => match read_u16(code, operand) {
            Some(target) => {
                let _ = writeln!(output, "{:<8}-> {:04}", mnemonic, target);
            }
            None => return truncated(mnemonic, code.len(), output),
        },
        OpCode::Call => match read_u32(code, operand) {
            Some(id) => {
                let id = WordId(id);
                match name_of(id) {
                    Some(name) => {
                        let _ = writeln!(output, "{:<8}{} ({})", mnemonic, id, name);
                    }
                    None => {
                        let _ = writeln!(output, "{:<8}{}", mnemonic, id);
                    }
                }
            }
            None => return truncated(mnemonic, code.len(), output),
        },
        OpCode::CallNamed => match read_named_call(code, operand) {
            Some((0, name)) => {
                let _ = writeln!(output, "{:<8}{}", mnemonic, name);
                return operand + named_call_len(name);
            }
            Some((shadowed, name)) => {
                let _ = writeln!(output, "{:<8}{} (skip {})", mnemonic, name, shadowed);
                return operand + named_call_len(name);
            }
            None => return truncated(mnemonic, code.len(), output),
        },
        _ => {
            let _ = writeln!(output, "{}", mnemonic);
        }
    }

    operand + opcode.operand_size()
}

fn truncated(mnemonic: &str, end: usize, output: &mut String) -> usize {
    let _ = writeln!(output, "{:<8}<truncated>", mnemonic);
    end
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Compiler;
    use crate::bytecode::compiler::ForthCompiler;
    use pretty_assertions::assert_eq;

    fn no_names(_: WordId) -> Option<String> {
        None
    }

    #[test]
    fn test_disassemble_simple() {
        let unit = ForthCompiler::new().compile("2 3 +").unwrap();
        let text = disassemble_code(&unit.main.unwrap(), no_names);
        assert_eq!(
            text,
            "0000  LIT     2\n0005  LIT     3\n0010  +\n0011  RET\n"
        );
    }

    #[test]
    fn test_disassemble_branches_and_calls() {
        let mut compiler = ForthCompiler::new();
        compiler.register_word("SQ", WordId(0)).unwrap();
        let unit = compiler.compile("1 IF SQ THEN").unwrap();
        let text = disassemble_code(&unit.main.unwrap(), |id| {
            (id == WordId(0)).then(|| "SQ".to_string())
        });
        assert_eq!(
            text,
            "0000  LIT     1\n0005  JUMP0   -> 0013\n0008  CALL    0 (SQ)\n0013  RET\n"
        );
    }

    #[test]
    fn test_disassemble_named_call() {
        let unit = ForthCompiler::new().compile(": A 1 ; A").unwrap();
        let text = disassemble_code(&unit.main.unwrap(), no_names);
        assert_eq!(text, "0000  CALL    A\n0005  RET\n");
    }

    #[test]
    fn test_disassemble_shadowed_call() {
        let unit = ForthCompiler::new().compile(": A 1 ; A : A 2 ;").unwrap();
        let text = disassemble_code(&unit.main.unwrap(), no_names);
        assert_eq!(text, "0000  CALL    A (skip 1)\n0005  RET\n");
    }

    #[test]
    fn test_disassemble_garbage() {
        let text = disassemble_code(&[250, OpCode::Lit as u8, 1], no_names);
        assert_eq!(text, "0000  ??? 250\n0001  LIT     <truncated>\n");
    }
}
