//! Error types for every stage of a submission.

use std::collections::TryReserveError;
use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the virtual machine while registering or executing code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VmError {
    #[error("Stack underflow")]
    StackUnderflow,

    #[error("Stack overflow")]
    StackOverflow,

    #[error("Return stack underflow")]
    ReturnStackUnderflow,

    #[error("Return stack overflow")]
    ReturnStackOverflow,

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Invalid address {0:#010x}")]
    InvalidAddress(i64),

    #[error("Invalid opcode {0}")]
    InvalidOpcode(u8),

    #[error("Unknown word '{0}'")]
    UnknownWord(String),

    #[error("Call depth exceeded")]
    CallDepthExceeded,

    #[error("Dictionary full ({0} words)")]
    DictionaryFull(usize),

    #[error("Empty code")]
    EmptyCode,

    #[error("Truncated code at offset {0}")]
    TruncatedCode(usize),
}

impl VmError {
    /// Stable numeric code reported to the operator.
    pub fn code(&self) -> i32 {
        match self {
            Self::StackUnderflow => -1,
            Self::StackOverflow => -2,
            Self::ReturnStackUnderflow => -3,
            Self::ReturnStackOverflow => -4,
            Self::DivisionByZero => -5,
            Self::InvalidAddress(_) => -6,
            Self::InvalidOpcode(_) => -7,
            Self::UnknownWord(_) => -8,
            Self::CallDepthExceeded => -9,
            Self::DictionaryFull(_) => -10,
            Self::EmptyCode => -11,
            Self::TruncatedCode(_) => -12,
        }
    }
}

/// What went wrong while compiling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileErrorKind {
    UnknownWord(String),
    MissingName,
    NestedDefinition,
    UnexpectedSemicolon,
    UnterminatedDefinition(String),
    UnterminatedComment,
    Unbalanced(String),
    OutsideDefinition(String),
    NameTooLong(String),
    CodeTooLarge,
}

impl fmt::Display for CompileErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownWord(name) => write!(f, "Unknown word '{}'", name),
            Self::MissingName => write!(f, "Missing word name after ':'"),
            Self::NestedDefinition => write!(f, "Nested ':' inside a definition"),
            Self::UnexpectedSemicolon => write!(f, "';' without matching ':'"),
            Self::UnterminatedDefinition(name) => {
                write!(f, "Unterminated definition of '{}' (missing ';')", name)
            }
            Self::UnterminatedComment => write!(f, "Unterminated comment (missing ')')"),
            Self::Unbalanced(word) => write!(f, "Unbalanced control structure at '{}'", word),
            Self::OutsideDefinition(word) => {
                write!(f, "'{}' is only valid inside a definition", word)
            }
            Self::NameTooLong(name) => write!(f, "Word name too long: '{}'", name),
            Self::CodeTooLarge => write!(f, "Compiled code exceeds 65535 bytes"),
        }
    }
}

/// A compilation failure with the position of the offending token.
///
/// `line` and `column` are 1-based; `len` is the token length in characters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} at line {line}, column {column}")]
pub struct CompileError {
    pub kind: CompileErrorKind,
    pub line: usize,
    pub column: usize,
    pub len: usize,
}

impl CompileError {
    pub fn new(kind: CompileErrorKind, line: usize, column: usize, len: usize) -> Self {
        Self {
            kind,
            line,
            column,
            len,
        }
    }

    pub fn code(&self) -> i32 {
        match self.kind {
            CompileErrorKind::UnknownWord(_) => -101,
            CompileErrorKind::MissingName => -102,
            CompileErrorKind::NestedDefinition => -103,
            CompileErrorKind::UnexpectedSemicolon => -104,
            CompileErrorKind::UnterminatedDefinition(_) => -105,
            CompileErrorKind::UnterminatedComment => -106,
            CompileErrorKind::Unbalanced(_) => -107,
            CompileErrorKind::OutsideDefinition(_) => -108,
            CompileErrorKind::NameTooLong(_) => -109,
            CompileErrorKind::CodeTooLarge => -110,
        }
    }

    /// Render the error against the submitted source, marking the token.
    pub fn format(&self, source: &str) -> String {
        let mut out = format!("Error: {}", self);
        if let Some(text) = source.lines().nth(self.line.saturating_sub(1)) {
            let pad = self.column.saturating_sub(1);
            let marker_len = self.len.max(1);
            out.push_str("\n  ");
            out.push_str(text);
            out.push_str("\n  ");
            out.push_str(&" ".repeat(pad));
            out.push('^');
            out.push_str(&"~".repeat(marker_len - 1));
        }
        out
    }
}

/// Errors raised by the compiler context when recording a word.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("Compiler context full ({0} words)")]
    Full(usize),

    #[error("Invalid word name '{0}'")]
    InvalidName(String),
}

impl ContextError {
    pub fn code(&self) -> i32 {
        match self {
            Self::Full(_) => -201,
            Self::InvalidName(_) => -202,
        }
    }
}

/// A compiled unit could not be registered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    #[error("Failed to register word '{}': error {}", .name, .source.code())]
    Vm { name: String, source: VmError },

    #[error("Failed to register word '{}' to compiler: error {}", .name, .source.code())]
    Context { name: String, source: ContextError },

    #[error("Failed to register code: error {}", .0.code())]
    Main(VmError),
}

impl RegistrationError {
    pub fn code(&self) -> i32 {
        match self {
            Self::Vm { source, .. } => source.code(),
            Self::Context { source, .. } => source.code(),
            Self::Main(source) => source.code(),
        }
    }
}

/// Discriminant of a submission's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    CompileError,
    RegistrationError,
    RuntimeError,
    AllocationError,
    Interrupted,
}

/// Why a submission failed.
#[derive(Debug, Error)]
pub enum ReplError {
    #[error("{formatted}")]
    Compile {
        formatted: String,
        source: CompileError,
    },

    #[error(transparent)]
    Registration(#[from] RegistrationError),

    #[error("Execution failed: error {}: {}", .0.code(), .0)]
    Runtime(VmError),

    #[error("Out of memory {what}")]
    Allocation {
        what: &'static str,
        source: TryReserveError,
    },

    #[error("Interrupted")]
    Interrupted,
}

impl ReplError {
    pub fn allocation(what: &'static str, source: TryReserveError) -> Self {
        Self::Allocation { what, source }
    }

    pub fn kind(&self) -> Outcome {
        match self {
            Self::Compile { .. } => Outcome::CompileError,
            Self::Registration(_) => Outcome::RegistrationError,
            Self::Runtime(_) => Outcome::RuntimeError,
            Self::Allocation { .. } => Outcome::AllocationError,
            Self::Interrupted => Outcome::Interrupted,
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            Self::Compile { source, .. } => source.code(),
            Self::Registration(err) => err.code(),
            Self::Runtime(err) => err.code(),
            Self::Allocation { .. } => -1,
            Self::Interrupted => -1,
        }
    }
}

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .path.display(), .source)]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config file '{}': {}", .path.display(), .source)]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_compile_error_marks_token() {
        let err = CompileError::new(CompileErrorKind::UnknownWord("FOO".into()), 1, 5, 3);
        assert_eq!(
            err.format("2 3 FOO +"),
            "Error: Unknown word 'FOO' at line 1, column 5\n  2 3 FOO +\n      ^~~"
        );
    }

    #[test]
    fn test_compile_error_on_later_line() {
        let err = CompileError::new(CompileErrorKind::UnknownWord("BAR".into()), 2, 1, 3);
        let text = err.format(": SQ DUP * ;\nBAR\n");
        assert!(text.contains("line 2, column 1"));
        assert!(text.ends_with("\n  BAR\n  ^~~"));
    }

    #[test]
    fn test_registration_messages() {
        let err = RegistrationError::Vm {
            name: "SQ".into(),
            source: VmError::DictionaryFull(4),
        };
        assert_eq!(err.to_string(), "Failed to register word 'SQ': error -10");
        assert_eq!(err.code(), -10);

        let err = RegistrationError::Context {
            name: "SQ".into(),
            source: ContextError::Full(2),
        };
        assert_eq!(
            err.to_string(),
            "Failed to register word 'SQ' to compiler: error -201"
        );
    }

    #[test]
    fn test_runtime_message_carries_code() {
        let err = ReplError::Runtime(VmError::DivisionByZero);
        assert_eq!(err.to_string(), "Execution failed: error -5: Division by zero");
        assert_eq!(err.kind(), Outcome::RuntimeError);
        assert_eq!(err.code(), -5);
    }
}
