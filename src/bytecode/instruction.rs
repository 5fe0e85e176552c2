//! Bytecode instruction definitions for the Forth VM.

/// Opcodes for the bytecode virtual machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    // ============ Literals & Stack ============
    /// Push a literal: LIT <value:i32>
    Lit = 0,
    Dup,
    Drop,
    Swap,
    Over,
    Rot,
    Nip,
    Tuck,

    // ============ Arithmetic ============
    Add,
    Sub,
    Mul,
    /// Truncating division, fails on zero divisor
    Div,
    Mod,
    Negate,
    Abs,
    Min,
    Max,
    /// 1+
    Inc,
    /// 1-
    Dec,

    // ============ Bitwise ============
    And,
    Or,
    Xor,
    Invert,
    Lshift,
    Rshift,

    // ============ Comparison (true = -1) ============
    Eq,
    Ne,
    Lt,
    Gt,
    ZeroEq,
    ZeroLt,
    ZeroGt,

    // ============ Memory ============
    /// @ ( addr -- cell )
    Fetch,
    /// ! ( cell addr -- )
    Store,
    /// C@ ( addr -- byte )
    CFetch,
    /// C! ( byte addr -- )
    CStore,
    /// +! ( n addr -- )
    PlusStore,

    // ============ Return Stack ============
    ToR,
    RFrom,
    RFetch,

    // ============ Output ============
    /// . ( n -- ) print followed by a space
    Dot,
    Emit,
    Cr,

    // ============ Control Flow ============
    /// Unconditional jump: JUMP <target:u16>
    Jump,
    /// Pop and jump if zero: JUMP_IF_ZERO <target:u16>
    JumpIfZero,
    /// Call a registered word: CALL <id:u32>
    Call,
    /// Call a word of the same unit: CALL_NAMED <shadowed:u16> <len:u8> <name bytes>
    CallNamed,
    /// Re-enter the word being executed
    Recurse,
    /// Leave the current word
    Exit,
    /// ( limit start -- ) open a counted loop
    Do,
    /// Step the innermost loop, jumping back while it runs: LOOP <target:u16>
    Loop,
    /// I ( -- index )
    LoopIndex,
    /// End of code
    Return,
}

impl OpCode {
    /// Get the number of fixed operand bytes for this opcode.
    ///
    /// `CallNamed` carries a shadow count and a length byte followed by that
    /// many name bytes; only the first two operands are counted here.
    pub fn operand_size(self) -> usize {
        match self {
            OpCode::Lit | OpCode::Call => 4,
            OpCode::Jump | OpCode::JumpIfZero | OpCode::Loop => 2,
            OpCode::CallNamed => 3,
            _ => 0,
        }
    }

    /// Convert from u8 to OpCode.
    pub fn from_u8(byte: u8) -> Option<OpCode> {
        if byte <= OpCode::Return as u8 {
            Some(unsafe { std::mem::transmute::<u8, OpCode>(byte) })
        } else {
            None
        }
    }

    /// Forth spelling used by the disassembler.
    pub fn mnemonic(self) -> &'static str {
        match self {
            OpCode::Lit => "LIT",
            OpCode::Dup => "DUP",
            OpCode::Drop => "DROP",
            OpCode::Swap => "SWAP",
            OpCode::Over => "OVER",
            OpCode::Rot => "ROT",
            OpCode::Nip => "NIP",
            OpCode::Tuck => "TUCK",
            OpCode::Add => "+",
            OpCode::Sub => "-",
            OpCode::Mul => "*",
            OpCode::Div => "/",
            OpCode::Mod => "MOD",
            OpCode::Negate => "NEGATE",
            OpCode::Abs => "ABS",
            OpCode::Min => "MIN",
            OpCode::Max => "MAX",
            OpCode::Inc => "1+",
            OpCode::Dec => "1-",
            OpCode::And => "AND",
            OpCode::Or => "OR",
            OpCode::Xor => "XOR",
            OpCode::Invert => "INVERT",
            OpCode::Lshift => "LSHIFT",
            OpCode::Rshift => "RSHIFT",
            OpCode::Eq => "=",
            OpCode::Ne => "<>",
            OpCode::Lt => "<",
            OpCode::Gt => ">",
            OpCode::ZeroEq => "0=",
            OpCode::ZeroLt => "0<",
            OpCode::ZeroGt => "0>",
            OpCode::Fetch => "@",
            OpCode::Store => "!",
            OpCode::CFetch => "C@",
            OpCode::CStore => "C!",
            OpCode::PlusStore => "+!",
            OpCode::ToR => ">R",
            OpCode::RFrom => "R>",
            OpCode::RFetch => "R@",
            OpCode::Dot => ".",
            OpCode::Emit => "EMIT",
            OpCode::Cr => "CR",
            OpCode::Jump => "JUMP",
            OpCode::JumpIfZero => "JUMP0",
            OpCode::Call => "CALL",
            OpCode::CallNamed => "CALL",
            OpCode::Recurse => "RECURSE",
            OpCode::Exit => "EXIT",
            OpCode::Do => "DO",
            OpCode::Loop => "LOOP",
            OpCode::LoopIndex => "I",
            OpCode::Return => "RET",
        }
    }

    /// Look up a primitive word by its (upper-case) Forth name.
    pub fn primitive(name: &str) -> Option<OpCode> {
        let op = match name {
            "DUP" => OpCode::Dup,
            "DROP" => OpCode::Drop,
            "SWAP" => OpCode::Swap,
            "OVER" => OpCode::Over,
            "ROT" => OpCode::Rot,
            "NIP" => OpCode::Nip,
            "TUCK" => OpCode::Tuck,
            "+" => OpCode::Add,
            "-" => OpCode::Sub,
            "*" => OpCode::Mul,
            "/" => OpCode::Div,
            "MOD" => OpCode::Mod,
            "NEGATE" => OpCode::Negate,
            "ABS" => OpCode::Abs,
            "MIN" => OpCode::Min,
            "MAX" => OpCode::Max,
            "1+" => OpCode::Inc,
            "1-" => OpCode::Dec,
            "AND" => OpCode::And,
            "OR" => OpCode::Or,
            "XOR" => OpCode::Xor,
            "INVERT" => OpCode::Invert,
            "LSHIFT" => OpCode::Lshift,
            "RSHIFT" => OpCode::Rshift,
            "=" => OpCode::Eq,
            "<>" => OpCode::Ne,
            "<" => OpCode::Lt,
            ">" => OpCode::Gt,
            "0=" => OpCode::ZeroEq,
            "0<" => OpCode::ZeroLt,
            "0>" => OpCode::ZeroGt,
            "@" => OpCode::Fetch,
            "!" => OpCode::Store,
            "C@" => OpCode::CFetch,
            "C!" => OpCode::CStore,
            "+!" => OpCode::PlusStore,
            ">R" => OpCode::ToR,
            "R>" => OpCode::RFrom,
            "R@" => OpCode::RFetch,
            "." => OpCode::Dot,
            "EMIT" => OpCode::Emit,
            "CR" => OpCode::Cr,
            "I" => OpCode::LoopIndex,
            _ => return None,
        };
        Some(op)
    }
}

impl From<OpCode> for u8 {
    fn from(op: OpCode) -> u8 {
        op as u8
    }
}
