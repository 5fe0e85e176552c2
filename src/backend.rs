//! Contracts between the session engine and the compiler and virtual machine it drives.
//!
//! The engine never looks inside bytecode. It hands compiled units to a
//! [`Machine`] for registration and execution, and keeps the compiler's
//! [`Compiler`] context in step with the machine's dictionary.
//!
//! Both collaborators are driven from a single thread through `&mut self`.
//! Sharing one machine between threads behind the engine's back is undefined.

use std::fmt;
use std::rc::Rc;

use crate::error::{CompileError, ContextError, VmError};

/// The machine's value type.
pub type Cell = i32;

/// Shared, immutable bytecode.
///
/// A machine keeps a clone of this handle for every named word it registers,
/// so the code stays alive for as long as the dictionary refers to it.
pub type Bytecode = Rc<[u8]>;

/// Identifier returned by [`Machine::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WordId(pub u32);

impl WordId {
    /// Id handed out for anonymous code, which lives only until it is executed.
    pub const TRANSIENT: WordId = WordId(u32::MAX);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for WordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::TRANSIENT {
            write!(f, "<transient>")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// A named word produced by the compiler.
#[derive(Debug, Clone)]
pub struct WordDef {
    pub name: String,
    pub code: Bytecode,
}

/// Everything one compile call produced: named words plus optional top-level code.
#[derive(Debug, Clone, Default)]
pub struct CompiledUnit {
    pub words: Vec<WordDef>,
    pub main: Option<Bytecode>,
}

impl CompiledUnit {
    /// Whether the machine will hold on to this unit's bytecode after registration.
    pub fn has_definitions(&self) -> bool {
        !self.words.is_empty()
    }

    /// Top-level code, if there is any to run.
    pub fn main_code(&self) -> Option<&Bytecode> {
        self.main.as_ref().filter(|code| !code.is_empty())
    }

    /// Total bytecode held by this unit.
    pub fn code_bytes(&self) -> usize {
        let words: usize = self.words.iter().map(|w| w.code.len()).sum();
        words + self.main.as_ref().map_or(0, |m| m.len())
    }
}

/// The stack machine that registers and runs compiled code.
pub trait Machine {
    /// Register code under `name`, or as an anonymous unit when `name` is `None`.
    fn register(&mut self, name: Option<&str>, code: &Bytecode) -> Result<WordId, VmError>;

    /// Run a registered unit to completion.
    fn execute(&mut self, id: WordId) -> Result<(), VmError>;

    fn stack_depth(&self) -> usize;

    /// Data stack value `index` cells below the top.
    fn peek(&self, index: usize) -> Option<Cell>;

    fn clear_stack(&mut self);

    /// Clear both stacks and the dictionary.
    fn reset_full(&mut self);

    /// Clear the dictionary, keeping stack contents.
    fn reset_dictionary(&mut self);

    fn return_depth(&self) -> usize;

    fn peek_return(&self, index: usize) -> Option<Cell>;

    fn memory(&self) -> &[u8];

    fn word_count(&self) -> usize;

    fn word_code(&self, id: WordId) -> Option<Bytecode>;

    fn disassemble(&self, code: &[u8]) -> String;

    /// Drain text printed by executed code.
    fn take_output(&mut self) -> String;
}

/// A compiler together with its persistent context of known words.
pub trait Compiler {
    fn compile(&mut self, source: &str) -> Result<CompiledUnit, CompileError>;

    /// Record that `name` now refers to machine word `id`.
    fn register_word(&mut self, name: &str, id: WordId) -> Result<(), ContextError>;

    /// Forget every registered word.
    fn reset(&mut self);

    /// Registered words in definition order.
    fn words(&self) -> Vec<(String, WordId)>;

    fn lookup(&self, name: &str) -> Option<WordId>;
}
