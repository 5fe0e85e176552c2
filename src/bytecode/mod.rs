//! Reference Forth backend for the session engine.
//!
//! # Architecture
//!
//! - `instruction`: OpCode definitions for the bytecode instruction set
//! - `chunk`: Code buffer used while compiling and operand readers
//! - `compiler`: Transforms source text into compiled units
//! - `vm`: Stack-based virtual machine for executing bytecode
//! - `disassembler`: Debug output for bytecode inspection

pub mod chunk;
pub mod compiler;
pub mod disassembler;
pub mod instruction;
pub mod vm;

pub use chunk::CodeBuffer;
pub use compiler::ForthCompiler;
pub use disassembler::disassemble_code;
pub use instruction::OpCode;
pub use vm::{Vm, VmConfig};
