//! Forth compiler: turns source text into a compiled unit of bytecode.

use std::collections::HashMap;

use crate::backend::{CompiledUnit, Compiler, WordDef, WordId};
use crate::bytecode::chunk::{CodeBuffer, MAX_CODE_LEN};
use crate::bytecode::instruction::OpCode;
use crate::error::{CompileError, CompileErrorKind, ContextError};

/// Result type for compilation.
pub type CompileResult<T> = Result<T, CompileError>;

/// Longest accepted word name.
pub const MAX_NAME_LEN: usize = 31;

/// Default number of words the context can hold.
pub const DEFAULT_CONTEXT_CAPACITY: usize = 1024;

/// A whitespace-delimited token with its 1-based position.
#[derive(Debug, Clone, Copy)]
struct Token<'a> {
    text: &'a str,
    line: usize,
    column: usize,
}

impl Token<'_> {
    fn error(&self, kind: CompileErrorKind) -> CompileError {
        CompileError::new(kind, self.line, self.column, self.text.chars().count())
    }
}

struct Lexer<'a> {
    source: &'a str,
    pos: usize,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    fn bump(&mut self, c: char) {
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
    }

    fn peek_char(&self) -> Option<char> {
        self.source[self.pos..].chars().next()
    }

    fn next_token(&mut self) -> Option<Token<'a>> {
        while let Some(c) = self.peek_char() {
            if !c.is_whitespace() {
                break;
            }
            self.bump(c);
        }

        let start = self.pos;
        let (line, column) = (self.line, self.column);
        while let Some(c) = self.peek_char() {
            if c.is_whitespace() {
                break;
            }
            self.bump(c);
        }

        if self.pos == start {
            None
        } else {
            Some(Token {
                text: &self.source[start..self.pos],
                line,
                column,
            })
        }
    }

    /// Skip the rest of the current line.
    fn skip_line(&mut self) {
        while let Some(c) = self.peek_char() {
            if c == '\n' {
                break;
            }
            self.bump(c);
        }
    }

    /// Skip past the next `)`. Returns false if the input ends first.
    fn skip_comment(&mut self) -> bool {
        while let Some(c) = self.peek_char() {
            self.bump(c);
            if c == ')' {
                return true;
            }
        }
        false
    }
}

/// An open control structure awaiting its closing word.
#[derive(Debug, Clone, Copy)]
enum Control {
    If(usize),
    Else(usize),
    Begin(usize),
    While { begin: usize, exit: usize },
    Do(usize),
}

/// A control structure together with the token that opened it.
#[derive(Debug, Clone, Copy)]
struct OpenControl<'a> {
    control: Control,
    token: Token<'a>,
}

/// Code being emitted: the top-level body or a definition.
#[derive(Default)]
struct Target<'a> {
    code: CodeBuffer,
    controls: Vec<OpenControl<'a>>,
}

struct Definition<'a> {
    name: String,
    colon: Token<'a>,
    target: Target<'a>,
}

/// A same-unit call in top-level code.
struct MainCall {
    /// Offset of the shadow operand
    at: usize,
    name: String,
    /// Unit words defined when the call was compiled
    defined: usize,
}

/// The Forth compiler and its context of registered words.
#[derive(Debug, Clone)]
pub struct ForthCompiler {
    /// Registered words in definition order
    words: Vec<(String, WordId)>,
    /// Latest id for each name
    index: HashMap<String, WordId>,
    capacity: usize,
}

impl ForthCompiler {
    /// Create a new compiler with an empty context.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CONTEXT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            words: Vec::new(),
            index: HashMap::new(),
            capacity,
        }
    }

    fn compile_source<'a>(&self, source: &'a str) -> CompileResult<CompiledUnit> {
        let mut lexer = Lexer::new(source);
        let mut main = Target::default();
        let mut current: Option<Definition<'a>> = None;
        let mut unit_words: Vec<WordDef> = Vec::new();
        let mut main_calls: Vec<MainCall> = Vec::new();

        while let Some(token) = lexer.next_token() {
            let word = token.text.to_ascii_uppercase();

            match word.as_str() {
                "\\" => {
                    lexer.skip_line();
                    continue;
                }
                "(" => {
                    if !lexer.skip_comment() {
                        return Err(token.error(CompileErrorKind::UnterminatedComment));
                    }
                    continue;
                }
                ":" => {
                    if current.is_some() {
                        return Err(token.error(CompileErrorKind::NestedDefinition));
                    }
                    let name_token = lexer
                        .next_token()
                        .ok_or_else(|| token.error(CompileErrorKind::MissingName))?;
                    let name = name_token.text.to_ascii_uppercase();
                    if name.chars().count() > MAX_NAME_LEN {
                        return Err(name_token.error(CompileErrorKind::NameTooLong(name)));
                    }
                    current = Some(Definition {
                        name,
                        colon: token,
                        target: Target::default(),
                    });
                    continue;
                }
                ";" => {
                    let Some(mut def) = current.take() else {
                        return Err(token.error(CompileErrorKind::UnexpectedSemicolon));
                    };
                    if let Some(open) = def.target.controls.last() {
                        return Err(open
                            .token
                            .error(CompileErrorKind::Unbalanced(open.token.text.to_string())));
                    }
                    def.target.code.write_op(OpCode::Return);
                    if def.target.code.len() > MAX_CODE_LEN {
                        return Err(def.colon.error(CompileErrorKind::CodeTooLarge));
                    }
                    unit_words.push(WordDef {
                        name: def.name,
                        code: def.target.code.finish(),
                    });
                    continue;
                }
                _ => {}
            }

            let in_definition = current.is_some();
            let target = match current.as_mut() {
                Some(def) => &mut def.target,
                None => &mut main,
            };

            if Self::compile_control(&word, token, target)? {
                continue;
            }

            match word.as_str() {
                "RECURSE" | "EXIT" => {
                    if !in_definition {
                        return Err(token.error(CompileErrorKind::OutsideDefinition(word)));
                    }
                    let op = if word == "RECURSE" {
                        OpCode::Recurse
                    } else {
                        OpCode::Exit
                    };
                    target.code.write_op(op);
                }
                "TRUE" => target.code.write_lit(-1),
                "FALSE" => target.code.write_lit(0),
                _ => {
                    let call = self.compile_word(&word, token, &unit_words, &mut target.code)?;
                    if let (Some(at), false) = (call, in_definition) {
                        main_calls.push(MainCall {
                            at,
                            name: word.clone(),
                            defined: unit_words.len(),
                        });
                    }
                }
            }
        }

        if let Some(def) = current {
            return Err(def
                .colon
                .error(CompileErrorKind::UnterminatedDefinition(def.name)));
        }
        if let Some(open) = main.controls.last() {
            return Err(open
                .token
                .error(CompileErrorKind::Unbalanced(open.token.text.to_string())));
        }

        // Top-level code runs after the whole unit is registered, so each
        // same-unit call skips the definitions that came after it.
        for call in &main_calls {
            let shadowed = unit_words[call.defined..]
                .iter()
                .filter(|w| w.name == call.name)
                .count();
            let shadowed = u16::try_from(shadowed)
                .map_err(|_| CompileError::new(CompileErrorKind::CodeTooLarge, 1, 1, 1))?;
            main.code.patch_u16(call.at, shadowed);
        }

        let main_code = if main.code.is_empty() {
            None
        } else {
            main.code.write_op(OpCode::Return);
            if main.code.len() > MAX_CODE_LEN {
                return Err(CompileError::new(CompileErrorKind::CodeTooLarge, 1, 1, 1));
            }
            Some(main.code.finish())
        };

        Ok(CompiledUnit {
            words: unit_words,
            main: main_code,
        })
    }

    /// Compile a control-flow word. Returns false if `word` is not one.
    fn compile_control<'a>(
        word: &str,
        token: Token<'a>,
        target: &mut Target<'a>,
    ) -> CompileResult<bool> {
        let unbalanced = || token.error(CompileErrorKind::Unbalanced(token.text.to_string()));
        let code = &mut target.code;
        let controls = &mut target.controls;

        match word {
            "IF" => {
                let at = code.write_jump(OpCode::JumpIfZero);
                controls.push(OpenControl {
                    control: Control::If(at),
                    token,
                });
            }
            "ELSE" => match controls.pop() {
                Some(OpenControl {
                    control: Control::If(at),
                    ..
                }) => {
                    let skip = code.write_jump(OpCode::Jump);
                    code.patch_to_here(at);
                    controls.push(OpenControl {
                        control: Control::Else(skip),
                        token,
                    });
                }
                _ => return Err(unbalanced()),
            },
            "THEN" => match controls.pop().map(|open| open.control) {
                Some(Control::If(at)) | Some(Control::Else(at)) => code.patch_to_here(at),
                _ => return Err(unbalanced()),
            },
            "BEGIN" => controls.push(OpenControl {
                control: Control::Begin(code.current_offset()),
                token,
            }),
            "UNTIL" | "AGAIN" => match controls.pop().map(|open| open.control) {
                Some(Control::Begin(start)) => {
                    let op = if word == "UNTIL" {
                        OpCode::JumpIfZero
                    } else {
                        OpCode::Jump
                    };
                    code.write_op(op);
                    code.write_u16(start as u16);
                }
                _ => return Err(unbalanced()),
            },
            "WHILE" => match controls.pop() {
                Some(OpenControl {
                    control: Control::Begin(begin),
                    token: opener,
                }) => {
                    let exit = code.write_jump(OpCode::JumpIfZero);
                    controls.push(OpenControl {
                        control: Control::While { begin, exit },
                        token: opener,
                    });
                }
                _ => return Err(unbalanced()),
            },
            "REPEAT" => match controls.pop().map(|open| open.control) {
                Some(Control::While { begin, exit }) => {
                    code.write_op(OpCode::Jump);
                    code.write_u16(begin as u16);
                    code.patch_to_here(exit);
                }
                _ => return Err(unbalanced()),
            },
            "DO" => {
                code.write_op(OpCode::Do);
                controls.push(OpenControl {
                    control: Control::Do(code.current_offset()),
                    token,
                });
            }
            "LOOP" => match controls.pop().map(|open| open.control) {
                Some(Control::Do(body)) => {
                    code.write_op(OpCode::Loop);
                    code.write_u16(body as u16);
                }
                _ => return Err(unbalanced()),
            },
            _ => return Ok(false),
        }

        Ok(true)
    }

    /// Compile a reference to a word or a number literal. Returns the
    /// shadow operand offset when a same-unit call was emitted.
    fn compile_word(
        &self,
        word: &str,
        token: Token<'_>,
        unit_words: &[WordDef],
        code: &mut CodeBuffer,
    ) -> CompileResult<Option<usize>> {
        // Words defined earlier in this unit are not registered yet, so
        // they are called by name.
        if unit_words.iter().any(|w| w.name == word) {
            return Ok(Some(code.write_named_call(0, word)));
        }

        if let Some(id) = self.index.get(word) {
            code.write_op(OpCode::Call);
            code.write_u32(id.0);
            return Ok(None);
        }

        if let Some(op) = OpCode::primitive(word) {
            code.write_op(op);
            return Ok(None);
        }

        match parse_number(word) {
            Some(value) => {
                code.write_lit(value);
                Ok(None)
            }
            None => Err(token.error(CompileErrorKind::UnknownWord(token.text.to_string()))),
        }
    }
}

impl Default for ForthCompiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler for ForthCompiler {
    fn compile(&mut self, source: &str) -> Result<CompiledUnit, CompileError> {
        self.compile_source(source)
    }

    fn register_word(&mut self, name: &str, id: WordId) -> Result<(), ContextError> {
        if name.is_empty() || name.chars().any(char::is_whitespace) {
            return Err(ContextError::InvalidName(name.to_string()));
        }
        if self.words.len() >= self.capacity {
            return Err(ContextError::Full(self.capacity));
        }
        let name = name.to_ascii_uppercase();
        self.index.insert(name.clone(), id);
        self.words.push((name, id));
        Ok(())
    }

    fn reset(&mut self) {
        self.words.clear();
        self.index.clear();
    }

    fn words(&self) -> Vec<(String, WordId)> {
        self.words.clone()
    }

    fn lookup(&self, name: &str) -> Option<WordId> {
        self.index.get(&name.to_ascii_uppercase()).copied()
    }
}

/// Parse a decimal or `0x` hexadecimal literal, wrapping to 32 bits.
pub fn parse_number(text: &str) -> Option<i32> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };

    let magnitude = match digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        Some(hex) if !hex.is_empty() => u32::from_str_radix(hex, 16).ok()?,
        Some(_) => return None,
        None if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) => {
            digits.parse::<u32>().ok()?
        }
        None => return None,
    };

    let value = magnitude as i32;
    Some(if negative { value.wrapping_neg() } else { value })
}
