//! Stack-based virtual machine for executing bytecode.

use crate::backend::{Bytecode, Cell, Machine, WordId};
use crate::bytecode::chunk::{named_call_len, read_i32, read_named_call, read_u16, read_u32};
use crate::bytecode::disassembler;
use crate::bytecode::instruction::OpCode;
use crate::error::VmError;

/// Result type for VM operations.
pub type VMResult<T> = Result<T, VmError>;

/// Forth truth value.
const TRUE: Cell = -1;
const FALSE: Cell = 0;

/// Sizes and limits of a VM instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmConfig {
    /// Bytes of addressable memory
    pub memory_size: usize,
    /// Maximum data stack depth in cells
    pub stack_depth: usize,
    /// Maximum return stack depth in cells
    pub return_depth: usize,
    /// Maximum nesting of word calls
    pub call_depth: usize,
    /// Maximum number of named words
    pub max_words: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            memory_size: 16 * 1024,
            stack_depth: 256,
            return_depth: 256,
            call_depth: 256,
            max_words: 1024,
        }
    }
}

/// A named dictionary entry.
#[derive(Debug, Clone)]
struct Entry {
    name: String,
    code: Bytecode,
}

/// Caller state saved across a word call.
#[derive(Debug)]
struct Frame {
    code: Bytecode,
    ip: usize,
    visible: usize,
}

/// The virtual machine.
#[derive(Debug)]
pub struct Vm {
    config: VmConfig,
    stack: Vec<Cell>,
    rstack: Vec<Cell>,
    memory: Vec<u8>,
    words: Vec<Entry>,
    /// Anonymous code waiting to be executed
    transient: Option<Bytecode>,
    output: String,
}

impl Vm {
    pub fn new() -> Self {
        Self::with_config(VmConfig::default())
    }

    pub fn with_config(config: VmConfig) -> Self {
        Self {
            config,
            stack: Vec::with_capacity(config.stack_depth),
            rstack: Vec::with_capacity(config.return_depth),
            memory: vec![0; config.memory_size],
            words: Vec::new(),
            transient: None,
            output: String::new(),
        }
    }

    /// Data stack, bottom first.
    pub fn stack(&self) -> &[Cell] {
        &self.stack
    }

    /// Name of a registered word.
    pub fn word_name(&self, id: WordId) -> Option<&str> {
        self.words.get(id.index()).map(|entry| entry.name.as_str())
    }

    /// Resolve a same-unit call among the first `visible` words, skipping
    /// the `shadowed` latest definitions of `name`.
    /// Returns the callee's code and the number of words it sees.
    fn resolve_named(
        &self,
        name: &str,
        shadowed: u16,
        visible: usize,
    ) -> Option<(Bytecode, usize)> {
        self.words[..visible.min(self.words.len())]
            .iter()
            .enumerate()
            .rev()
            .filter(|(_, entry)| entry.name == name)
            .nth(shadowed as usize)
            .map(|(index, entry)| (entry.code.clone(), index))
    }

    /// Run `entry`, which sees the first `visible` words of the dictionary.
    fn run(&mut self, entry: Bytecode, visible: usize) -> VMResult<()> {
        let mut frames: Vec<Frame> = Vec::new();
        let mut code = entry;
        let mut ip = 0usize;
        let mut visible = visible;

        loop {
            let byte = *code.get(ip).ok_or(VmError::TruncatedCode(ip))?;
            let opcode = OpCode::from_u8(byte).ok_or(VmError::InvalidOpcode(byte))?;
            ip += 1;

            match opcode {
                OpCode::Lit => {
                    let value = read_i32(&code, ip).ok_or(VmError::TruncatedCode(ip))?;
                    ip += 4;
                    self.push(value)?;
                }

                OpCode::Dup => {
                    let top = self.peek_at(0)?;
                    self.push(top)?;
                }
                OpCode::Drop => {
                    self.need(1)?;
                    self.stack.pop();
                }
                OpCode::Swap => {
                    self.need(2)?;
                    let len = self.stack.len();
                    self.stack.swap(len - 1, len - 2);
                }
                OpCode::Over => {
                    let second = self.peek_at(1)?;
                    self.push(second)?;
                }
                OpCode::Rot => {
                    self.need(3)?;
                    let third = self.stack.remove(self.stack.len() - 3);
                    self.stack.push(third);
                }
                OpCode::Nip => {
                    self.need(2)?;
                    self.stack.remove(self.stack.len() - 2);
                }
                OpCode::Tuck => {
                    let top = self.peek_at(0)?;
                    self.need(2)?;
                    self.room(1)?;
                    self.stack.insert(self.stack.len() - 2, top);
                }

                OpCode::Add => self.binary(|a, b| Ok(a.wrapping_add(b)))?,
                OpCode::Sub => self.binary(|a, b| Ok(a.wrapping_sub(b)))?,
                OpCode::Mul => self.binary(|a, b| Ok(a.wrapping_mul(b)))?,
                OpCode::Div => self.binary(|a, b| {
                    if b == 0 {
                        Err(VmError::DivisionByZero)
                    } else {
                        Ok(a.wrapping_div(b))
                    }
                })?,
                OpCode::Mod => self.binary(|a, b| {
                    if b == 0 {
                        Err(VmError::DivisionByZero)
                    } else {
                        Ok(a.wrapping_rem(b))
                    }
                })?,
                OpCode::Min => self.binary(|a, b| Ok(a.min(b)))?,
                OpCode::Max => self.binary(|a, b| Ok(a.max(b)))?,
                OpCode::And => self.binary(|a, b| Ok(a & b))?,
                OpCode::Or => self.binary(|a, b| Ok(a | b))?,
                OpCode::Xor => self.binary(|a, b| Ok(a ^ b))?,
                OpCode::Lshift => self.binary(|a, b| {
                    Ok((a as u32).checked_shl(b as u32).unwrap_or(0) as Cell)
                })?,
                OpCode::Rshift => self.binary(|a, b| {
                    Ok((a as u32).checked_shr(b as u32).unwrap_or(0) as Cell)
                })?,
                OpCode::Eq => self.binary(|a, b| Ok(flag(a == b)))?,
                OpCode::Ne => self.binary(|a, b| Ok(flag(a != b)))?,
                OpCode::Lt => self.binary(|a, b| Ok(flag(a < b)))?,
                OpCode::Gt => self.binary(|a, b| Ok(flag(a > b)))?,

                OpCode::Negate => self.unary(|a| a.wrapping_neg())?,
                OpCode::Abs => self.unary(|a| a.wrapping_abs())?,
                OpCode::Inc => self.unary(|a| a.wrapping_add(1))?,
                OpCode::Dec => self.unary(|a| a.wrapping_sub(1))?,
                OpCode::Invert => self.unary(|a| !a)?,
                OpCode::ZeroEq => self.unary(|a| flag(a == 0))?,
                OpCode::ZeroLt => self.unary(|a| flag(a < 0))?,
                OpCode::ZeroGt => self.unary(|a| flag(a > 0))?,

                OpCode::Fetch => {
                    let at = self.address(self.peek_at(0)?, 4)?;
                    let bytes = [
                        self.memory[at],
                        self.memory[at + 1],
                        self.memory[at + 2],
                        self.memory[at + 3],
                    ];
                    self.replace_top(Cell::from_le_bytes(bytes));
                }
                OpCode::Store => {
                    self.need(2)?;
                    let at = self.address(self.peek_at(0)?, 4)?;
                    let value = self.peek_at(1)?;
                    self.memory[at..at + 4].copy_from_slice(&value.to_le_bytes());
                    self.stack.truncate(self.stack.len() - 2);
                }
                OpCode::CFetch => {
                    let at = self.address(self.peek_at(0)?, 1)?;
                    let byte = self.memory[at];
                    self.replace_top(byte as Cell);
                }
                OpCode::CStore => {
                    self.need(2)?;
                    let at = self.address(self.peek_at(0)?, 1)?;
                    let byte = self.peek_at(1)? as u8;
                    self.memory[at] = byte;
                    self.stack.truncate(self.stack.len() - 2);
                }
                OpCode::PlusStore => {
                    self.need(2)?;
                    let at = self.address(self.peek_at(0)?, 4)?;
                    let delta = self.peek_at(1)?;
                    let mut bytes = [0u8; 4];
                    bytes.copy_from_slice(&self.memory[at..at + 4]);
                    let value = Cell::from_le_bytes(bytes).wrapping_add(delta);
                    self.memory[at..at + 4].copy_from_slice(&value.to_le_bytes());
                    self.stack.truncate(self.stack.len() - 2);
                }

                OpCode::ToR => {
                    let top = self.peek_at(0)?;
                    self.rpush(top)?;
                    self.stack.pop();
                }
                OpCode::RFrom => {
                    let top = *self.rstack.last().ok_or(VmError::ReturnStackUnderflow)?;
                    self.push(top)?;
                    self.rstack.pop();
                }
                OpCode::RFetch | OpCode::LoopIndex => {
                    let top = *self.rstack.last().ok_or(VmError::ReturnStackUnderflow)?;
                    self.push(top)?;
                }

                OpCode::Dot => {
                    let top = self.peek_at(0)?;
                    self.stack.pop();
                    self.output.push_str(&top.to_string());
                    self.output.push(' ');
                }
                OpCode::Emit => {
                    let top = self.peek_at(0)?;
                    self.stack.pop();
                    self.output.push(char::from_u32(top as u32).unwrap_or('?'));
                }
                OpCode::Cr => self.output.push('\n'),

                OpCode::Jump => {
                    ip = read_u16(&code, ip).ok_or(VmError::TruncatedCode(ip))? as usize;
                }
                OpCode::JumpIfZero => {
                    let target = read_u16(&code, ip).ok_or(VmError::TruncatedCode(ip))?;
                    let top = self.peek_at(0)?;
                    self.stack.pop();
                    ip = if top == 0 { target as usize } else { ip + 2 };
                }

                OpCode::Call => {
                    let id = read_u32(&code, ip).ok_or(VmError::TruncatedCode(ip))?;
                    let callee = self
                        .words
                        .get(id as usize)
                        .map(|entry| entry.code.clone())
                        .ok_or_else(|| VmError::UnknownWord(format!("#{}", id)))?;
                    let callee = (callee, id as usize);
                    self.enter(&mut frames, &mut code, &mut ip, &mut visible, callee, 4)?;
                }
                OpCode::CallNamed => {
                    let (shadowed, name) =
                        read_named_call(&code, ip).ok_or(VmError::TruncatedCode(ip))?;
                    let skip = named_call_len(name);
                    let callee = self
                        .resolve_named(name, shadowed, visible)
                        .ok_or_else(|| VmError::UnknownWord(name.to_string()))?;
                    self.enter(&mut frames, &mut code, &mut ip, &mut visible, callee, skip)?;
                }
                OpCode::Recurse => {
                    let callee = code.clone();
                    let callee = (callee, visible);
                    self.enter(&mut frames, &mut code, &mut ip, &mut visible, callee, 0)?;
                }
                OpCode::Exit | OpCode::Return => match frames.pop() {
                    Some(frame) => {
                        code = frame.code;
                        ip = frame.ip;
                        visible = frame.visible;
                    }
                    None => return Ok(()),
                },

                OpCode::Do => {
                    self.need(2)?;
                    if self.rstack.len() + 2 > self.config.return_depth {
                        return Err(VmError::ReturnStackOverflow);
                    }
                    let start = self.stack.pop().unwrap_or_default();
                    let limit = self.stack.pop().unwrap_or_default();
                    self.rstack.push(limit);
                    self.rstack.push(start);
                }
                OpCode::Loop => {
                    let target = read_u16(&code, ip).ok_or(VmError::TruncatedCode(ip))?;
                    let len = self.rstack.len();
                    if len < 2 {
                        return Err(VmError::ReturnStackUnderflow);
                    }
                    let index = self.rstack[len - 1].wrapping_add(1);
                    if index < self.rstack[len - 2] {
                        self.rstack[len - 1] = index;
                        ip = target as usize;
                    } else {
                        self.rstack.truncate(len - 2);
                        ip += 2;
                    }
                }
            }
        }
    }

    /// Save the caller (resuming `skip` bytes later) and switch to `callee`,
    /// given as its code and the number of words it sees.
    fn enter(
        &self,
        frames: &mut Vec<Frame>,
        code: &mut Bytecode,
        ip: &mut usize,
        visible: &mut usize,
        callee: (Bytecode, usize),
        skip: usize,
    ) -> VMResult<()> {
        if frames.len() >= self.config.call_depth {
            return Err(VmError::CallDepthExceeded);
        }
        let (callee_code, callee_visible) = callee;
        frames.push(Frame {
            code: std::mem::replace(code, callee_code),
            ip: *ip + skip,
            visible: std::mem::replace(visible, callee_visible),
        });
        *ip = 0;
        Ok(())
    }

    fn need(&self, count: usize) -> VMResult<()> {
        if self.stack.len() < count {
            Err(VmError::StackUnderflow)
        } else {
            Ok(())
        }
    }

    fn room(&self, count: usize) -> VMResult<()> {
        if self.stack.len() + count > self.config.stack_depth {
            Err(VmError::StackOverflow)
        } else {
            Ok(())
        }
    }

    fn push(&mut self, value: Cell) -> VMResult<()> {
        self.room(1)?;
        self.stack.push(value);
        Ok(())
    }

    fn rpush(&mut self, value: Cell) -> VMResult<()> {
        if self.rstack.len() >= self.config.return_depth {
            return Err(VmError::ReturnStackOverflow);
        }
        self.rstack.push(value);
        Ok(())
    }

    fn peek_at(&self, distance: usize) -> VMResult<Cell> {
        self.need(distance + 1)?;
        Ok(self.stack[self.stack.len() - 1 - distance])
    }

    fn replace_top(&mut self, value: Cell) {
        if let Some(top) = self.stack.last_mut() {
            *top = value;
        }
    }

    /// Validate an address for an access of `width` bytes.
    fn address(&self, raw: Cell, width: usize) -> VMResult<usize> {
        let at = usize::try_from(raw).map_err(|_| VmError::InvalidAddress(raw as i64))?;
        if at + width > self.memory.len() {
            return Err(VmError::InvalidAddress(raw as i64));
        }
        Ok(at)
    }

    /// Apply `( a b -- r )`, leaving the stack untouched on failure.
    fn binary<F>(&mut self, op: F) -> VMResult<()>
    where
        F: FnOnce(Cell, Cell) -> VMResult<Cell>,
    {
        let b = self.peek_at(0)?;
        let a = self.peek_at(1)?;
        let result = op(a, b)?;
        self.stack.pop();
        self.replace_top(result);
        Ok(())
    }

    fn unary<F>(&mut self, op: F) -> VMResult<()>
    where
        F: FnOnce(Cell) -> Cell,
    {
        let a = self.peek_at(0)?;
        self.replace_top(op(a));
        Ok(())
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

fn flag(value: bool) -> Cell {
    if value {
        TRUE
    } else {
        FALSE
    }
}

impl Machine for Vm {
    fn register(&mut self, name: Option<&str>, code: &Bytecode) -> Result<WordId, VmError> {
        if code.is_empty() {
            return Err(VmError::EmptyCode);
        }

        match name {
            None => {
                self.transient = Some(code.clone());
                Ok(WordId::TRANSIENT)
            }
            Some(name) => {
                if self.words.len() >= self.config.max_words {
                    return Err(VmError::DictionaryFull(self.config.max_words));
                }
                let id = WordId(self.words.len() as u32);
                self.words.push(Entry {
                    name: name.to_ascii_uppercase(),
                    code: code.clone(),
                });
                Ok(id)
            }
        }
    }

    fn execute(&mut self, id: WordId) -> Result<(), VmError> {
        // top-level code sees every word; a named word sees those before it
        let entry = if id == WordId::TRANSIENT {
            self.transient.take().map(|code| (code, self.words.len()))
        } else {
            self.words
                .get(id.index())
                .map(|entry| (entry.code.clone(), id.index()))
        };
        let (code, visible) = entry.ok_or_else(|| VmError::UnknownWord(format!("#{}", id)))?;
        self.run(code, visible)
    }

    fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    fn peek(&self, index: usize) -> Option<Cell> {
        self.stack.iter().rev().nth(index).copied()
    }

    fn clear_stack(&mut self) {
        self.stack.clear();
    }

    fn reset_full(&mut self) {
        self.stack.clear();
        self.rstack.clear();
        self.words.clear();
        self.transient = None;
        self.output.clear();
    }

    fn reset_dictionary(&mut self) {
        self.words.clear();
        self.transient = None;
    }

    fn return_depth(&self) -> usize {
        self.rstack.len()
    }

    fn peek_return(&self, index: usize) -> Option<Cell> {
        self.rstack.iter().rev().nth(index).copied()
    }

    fn memory(&self) -> &[u8] {
        &self.memory
    }

    fn word_count(&self) -> usize {
        self.words.len()
    }

    fn word_code(&self, id: WordId) -> Option<Bytecode> {
        self.words.get(id.index()).map(|entry| entry.code.clone())
    }

    fn disassemble(&self, code: &[u8]) -> String {
        disassembler::disassemble_code(code, |id| self.word_name(id).map(str::to_string))
    }

    fn take_output(&mut self) -> String {
        std::mem::take(&mut self.output)
    }
}
