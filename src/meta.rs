//! Meta-commands: `.`-prefixed lines that inspect or reset the session
//! instead of being compiled.

use std::fmt::Write as _;
use std::io;

use crate::backend::{Compiler, Machine};
use crate::bytecode::compiler::parse_number;
use crate::console::OutputSink;
use crate::session::Session;

/// Marks a line as a meta-command.
pub const PREFIX: char = '.';

/// Bytes shown by `.dump` when no length is given.
pub const DEFAULT_DUMP_LEN: usize = 256;

const RULE: &str = "════════════════════════════════════════════════════════════════";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Words,
    Stack,
    ReturnStack,
    Dump,
    See,
    Reset,
    ResetDict,
    Memory,
    Help,
    Version,
}

/// An entry of the command table.
#[derive(Debug)]
pub struct MetaCommand {
    pub keyword: &'static str,
    pub usage: &'static str,
    pub summary: &'static str,
    pub command: Command,
}

pub const COMMANDS: &[MetaCommand] = &[
    MetaCommand {
        keyword: "words",
        usage: "",
        summary: "List all defined words",
        command: Command::Words,
    },
    MetaCommand {
        keyword: "stack",
        usage: "",
        summary: "Show data stack contents (decimal and hex)",
        command: Command::Stack,
    },
    MetaCommand {
        keyword: "rstack",
        usage: "",
        summary: "Show return stack contents",
        command: Command::ReturnStack,
    },
    MetaCommand {
        keyword: "dump",
        usage: "[addr] [len]",
        summary: "Hex dump of VM memory, continuing from the last dump",
        command: Command::Dump,
    },
    MetaCommand {
        keyword: "see",
        usage: "<word>",
        summary: "Disassemble a word",
        command: Command::See,
    },
    MetaCommand {
        keyword: "reset",
        usage: "",
        summary: "Reset VM and compiler context",
        command: Command::Reset,
    },
    MetaCommand {
        keyword: "reset-dict",
        usage: "",
        summary: "Forget all words, keep the stack",
        command: Command::ResetDict,
    },
    MetaCommand {
        keyword: "memory",
        usage: "",
        summary: "Show memory usage statistics",
        command: Command::Memory,
    },
    MetaCommand {
        keyword: "help",
        usage: "",
        summary: "Show this help message",
        command: Command::Help,
    },
    MetaCommand {
        keyword: "version",
        usage: "",
        summary: "Show version information",
        command: Command::Version,
    },
];

/// Look up a command by its exact keyword.
pub fn find(keyword: &str) -> Option<&'static MetaCommand> {
    COMMANDS.iter().find(|entry| entry.keyword == keyword)
}

/// Result of offering a line to the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// No prefix; the line is code.
    NotCommand,
    Handled,
}

/// Dispatcher state kept between commands.
#[derive(Debug, Default)]
pub struct MetaCommands {
    dump_cursor: usize,
}

impl MetaCommands {
    pub fn new() -> Self {
        Self::default()
    }

    /// Address the next argument-less `.dump` starts at.
    pub fn dump_cursor(&self) -> usize {
        self.dump_cursor
    }

    /// Handle `line` if it is a meta-command. A prefixed line is always
    /// handled, even when the keyword is unknown.
    pub fn dispatch<M: Machine, C: Compiler>(
        &mut self,
        line: &str,
        session: &mut Session<'_, M, C>,
        sink: &mut dyn OutputSink,
    ) -> io::Result<Dispatch> {
        let Some(rest) = line.trim().strip_prefix(PREFIX) else {
            return Ok(Dispatch::NotCommand);
        };

        let mut parts = rest.split_whitespace();
        let keyword = parts.next().unwrap_or("");
        let args: Vec<&str> = parts.collect();

        // A PASTE block that starts with a meta-command is neither run as
        // code nor cut down to its first line.
        if rest.contains('\n') {
            sink.err_line(&format!(
                "Meta-command {}{} must be on a line of its own; block not evaluated",
                PREFIX, keyword
            ))?;
            return Ok(Dispatch::Handled);
        }

        let Some(entry) = find(keyword) else {
            sink.out_line(&format!("Unknown meta-command: {}{}", PREFIX, keyword))?;
            sink.out_line("Type .help for available commands")?;
            return Ok(Dispatch::Handled);
        };

        if entry.usage.is_empty() && !args.is_empty() {
            sink.err_line(&format!("Usage: {}{}", PREFIX, entry.keyword))?;
            return Ok(Dispatch::Handled);
        }

        match entry.command {
            Command::Words => cmd_words(session, sink)?,
            Command::Stack => cmd_stack(session, sink)?,
            Command::ReturnStack => cmd_rstack(session, sink)?,
            Command::Dump => self.cmd_dump(&args, session, sink)?,
            Command::See => cmd_see(&args, session, sink)?,
            Command::Reset => {
                session.reset();
                sink.out_line("VM and compiler context reset.")?;
            }
            Command::ResetDict => {
                session.reset_dictionary();
                sink.out_line("Dictionary reset (stack preserved).")?;
            }
            Command::Memory => cmd_memory(session, sink)?,
            Command::Help => sink.out(&help_text())?,
            Command::Version => cmd_version(session, sink)?,
        }
        Ok(Dispatch::Handled)
    }

    fn cmd_dump<M: Machine, C: Compiler>(
        &mut self,
        args: &[&str],
        session: &Session<'_, M, C>,
        sink: &mut dyn OutputSink,
    ) -> io::Result<()> {
        let Some((addr, len)) = parse_dump_args(args, self.dump_cursor) else {
            return sink.err_line("Usage: .dump [address] [length]");
        };

        let memory = session.vm().memory();
        let start = addr & !3;
        if start >= memory.len() {
            return sink.err_line(&format!(
                "Address 0x{:08X} is outside VM memory ({} bytes)",
                start,
                memory.len()
            ));
        }

        let end = start.saturating_add(len).min(memory.len());
        sink.out(&hex_dump(&memory[start..end], start))?;
        self.dump_cursor = start.saturating_add(round_up_16(len));
        Ok(())
    }
}

fn cmd_words<M: Machine, C: Compiler>(
    session: &Session<'_, M, C>,
    sink: &mut dyn OutputSink,
) -> io::Result<()> {
    let words = session.compiler().words();
    if words.is_empty() {
        return sink.out_line("No words defined.");
    }

    sink.out_line(&format!("Defined words ({}):", words.len()))?;
    for (name, _) in &words {
        sink.out_line(&format!("  {}", name))?;
    }
    Ok(())
}

fn cmd_stack<M: Machine, C: Compiler>(
    session: &Session<'_, M, C>,
    sink: &mut dyn OutputSink,
) -> io::Result<()> {
    let vm = session.vm();
    let depth = vm.stack_depth();
    sink.out(&stack_listing("Data Stack", depth, |i| vm.peek(i)))
}

fn cmd_rstack<M: Machine, C: Compiler>(
    session: &Session<'_, M, C>,
    sink: &mut dyn OutputSink,
) -> io::Result<()> {
    let vm = session.vm();
    let depth = vm.return_depth();
    sink.out(&stack_listing("Return Stack", depth, |i| vm.peek_return(i)))
}

/// List a stack bottom (index 0) to top. `peek` takes a distance from the top.
fn stack_listing<F>(title: &str, depth: usize, peek: F) -> String
where
    F: Fn(usize) -> Option<i32>,
{
    let mut out = format!("{} (depth: {}):\n", title, depth);
    if depth == 0 {
        out.push_str("  <empty>\n");
        return out;
    }
    for i in 0..depth {
        if let Some(value) = peek(depth - 1 - i) {
            let _ = writeln!(out, "  [{}]: {} (0x{:08X})", i, value, value as u32);
        }
    }
    out
}

fn cmd_see<M: Machine, C: Compiler>(
    args: &[&str],
    session: &Session<'_, M, C>,
    sink: &mut dyn OutputSink,
) -> io::Result<()> {
    let [name] = args else {
        return sink.err_line("Usage: .see <word>");
    };

    let code = session
        .compiler()
        .lookup(name)
        .and_then(|id| session.vm().word_code(id));
    let Some(code) = code else {
        return sink.err_line(&format!("Unknown word: {}", name));
    };

    let mut out = format!(": {}\n", name.to_ascii_uppercase());
    for line in session.vm().disassemble(&code).lines() {
        let _ = writeln!(out, "  {}", line);
    }
    out.push_str(";\n");
    sink.out(&out)
}

fn cmd_memory<M: Machine, C: Compiler>(
    session: &Session<'_, M, C>,
    sink: &mut dyn OutputSink,
) -> io::Result<()> {
    let vm = session.vm();
    let store = session.store();

    let mut out = String::from("Memory usage information:\n");
    let _ = writeln!(out, "  VM memory size: {} bytes", vm.memory().len());
    let _ = writeln!(out, "  Data stack depth: {}", vm.stack_depth());
    let _ = writeln!(out, "  Return stack depth: {}", vm.return_depth());
    let _ = writeln!(out, "  Registered words: {}", vm.word_count());
    let _ = writeln!(
        out,
        "  Retained units: {} ({} bytes of bytecode)",
        store.len(),
        store.code_bytes()
    );
    sink.out(&out)
}

fn cmd_version<M: Machine, C: Compiler>(
    _session: &Session<'_, M, C>,
    sink: &mut dyn OutputSink,
) -> io::Result<()> {
    let mut out = format!("stackrepl v{}\n{}\n", crate::VERSION, RULE);
    let _ = writeln!(out, "Version code: 0x{:06X}", crate::version());
    out.push_str("Components:\n");
    let _ = writeln!(out, "  Compiler: {}", std::any::type_name::<C>());
    let _ = writeln!(out, "  VM:       {}", std::any::type_name::<M>());
    let _ = writeln!(out, "{}", RULE);
    sink.out(&out)
}

pub fn help_text() -> String {
    let mut out = format!("stackrepl help\n{}\n\nMeta-commands:\n", RULE);
    for entry in COMMANDS {
        let command = if entry.usage.is_empty() {
            format!(".{}", entry.keyword)
        } else {
            format!(".{} {}", entry.keyword, entry.usage)
        };
        let _ = writeln!(out, "  {:<20} - {}", command, entry.summary);
    }

    out.push_str("\nPASTE mode (multi-line input):\n");
    out.push_str("  <<<                  - Enter PASTE mode for multi-line definitions\n");
    out.push_str("  >>>                  - Exit PASTE mode and compile buffered input\n");

    out.push_str("\nControl:\n");
    out.push_str("  Ctrl+D               - Exit REPL\n");
    out.push_str("  Ctrl+C               - Interrupt execution\n");
    out.push_str("  bye / quit           - Exit REPL\n");

    out.push_str("\nBasic Forth:\n");
    out.push_str("  Numbers              - Push values to stack (e.g. '42', '0x2A')\n");
    out.push_str("  + - * / MOD          - Arithmetic operations\n");
    out.push_str("  DUP DROP SWAP OVER   - Stack manipulation\n");
    out.push_str("  @ ! C@ C!            - Memory access\n");
    out.push_str("  .                    - Print and pop top of stack\n");

    out.push_str("\nWord definitions:\n");
    out.push_str("  : NAME ... ;         - Define a new word\n");
    out.push_str("  Example: : SQUARE DUP * ;\n");
    let _ = writeln!(out, "\n{}", RULE);
    out
}

/// Parse `[addr] [len]`, falling back to `cursor` and [`DEFAULT_DUMP_LEN`].
fn parse_dump_args(args: &[&str], cursor: usize) -> Option<(usize, usize)> {
    let parse = |text: &str| {
        parse_number(text)
            .filter(|&n| n >= 0 || text.starts_with("0x") || text.starts_with("0X"))
            .map(|n| n as u32 as usize)
    };
    match args {
        [] => Some((cursor, DEFAULT_DUMP_LEN)),
        [addr] => Some((parse(addr)?, DEFAULT_DUMP_LEN)),
        [addr, len] => Some((parse(addr)?, parse(len)?)),
        _ => None,
    }
}

fn round_up_16(len: usize) -> usize {
    len.div_ceil(16).saturating_mul(16)
}

/// Format `bytes` (starting at address `base`) as 16-byte rows.
pub fn hex_dump(bytes: &[u8], base: usize) -> String {
    let mut out = String::new();
    for (row, chunk) in bytes.chunks(16).enumerate() {
        let _ = write!(out, "0x{:08X}:", base + row * 16);
        for i in 0..16 {
            match chunk.get(i) {
                Some(byte) => {
                    let _ = write!(out, " {:02x}", byte);
                }
                None => out.push_str("   "),
            }
        }
        out.push_str("  |");
        for &byte in chunk {
            out.push(if byte.is_ascii_graphic() || byte == b' ' {
                byte as char
            } else {
                '.'
            });
        }
        out.push_str("|\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{ForthCompiler, Vm, VmConfig};
    use crate::console::Capture;
    use pretty_assertions::assert_eq;

    fn run(meta: &mut MetaCommands, session: &mut Session<'_, Vm, ForthCompiler>, line: &str) -> Capture {
        let mut capture = Capture::new();
        let dispatch = meta.dispatch(line, session, &mut capture).unwrap();
        assert_eq!(dispatch, Dispatch::Handled, "line {:?}", line);
        capture
    }

    #[test]
    fn test_not_a_command() {
        let (mut vm, mut compiler) = (Vm::new(), ForthCompiler::new());
        let mut session = Session::create(&mut vm, &mut compiler, None).unwrap();
        let mut meta = MetaCommands::new();
        let mut capture = Capture::new();

        for line in ["2 3 +", "5 .", ""] {
            let dispatch = meta.dispatch(line, &mut session, &mut capture).unwrap();
            assert_eq!(dispatch, Dispatch::NotCommand);
        }
        assert!(capture.out.is_empty());
    }

    #[test]
    fn test_unknown_command_is_handled() {
        let (mut vm, mut compiler) = (Vm::new(), ForthCompiler::new());
        let mut session = Session::create(&mut vm, &mut compiler, None).unwrap();
        let mut meta = MetaCommands::new();

        let capture = run(&mut meta, &mut session, "  .frobnicate now");
        assert_eq!(
            capture.out,
            "Unknown meta-command: .frobnicate\nType .help for available commands\n"
        );
        // keywords are case-sensitive
        let capture = run(&mut meta, &mut session, ".WORDS");
        assert!(capture.out.starts_with("Unknown meta-command: .WORDS"));
    }

    #[test]
    fn test_extra_arguments_and_multi_line_input_are_rejected() {
        let (mut vm, mut compiler) = (Vm::new(), ForthCompiler::new());
        let mut session = Session::create(&mut vm, &mut compiler, None).unwrap();
        let mut meta = MetaCommands::new();

        session.process("1 2").unwrap();
        let capture = run(&mut meta, &mut session, ".reset now");
        assert_eq!(capture.err, "Usage: .reset\n");
        assert_eq!(session.stack_depth(), 2);

        let capture = run(&mut meta, &mut session, ".words\n: SQ DUP * ;\n3 SQ\n");
        assert_eq!(capture.out, "");
        assert_eq!(
            capture.err,
            "Meta-command .words must be on a line of its own; block not evaluated\n"
        );
        assert_eq!(session.stack_depth(), 2);
    }

    #[test]
    fn test_words() {
        let (mut vm, mut compiler) = (Vm::new(), ForthCompiler::new());
        let mut session = Session::create(&mut vm, &mut compiler, None).unwrap();
        let mut meta = MetaCommands::new();

        assert_eq!(run(&mut meta, &mut session, ".words").out, "No words defined.\n");
        session.process(": SQ DUP * ; : CUBE DUP SQ * ;").unwrap();
        assert_eq!(
            run(&mut meta, &mut session, ".words").out,
            "Defined words (2):\n  SQ\n  CUBE\n"
        );
    }

    #[test]
    fn test_stack_listing() {
        let (mut vm, mut compiler) = (Vm::new(), ForthCompiler::new());
        let mut session = Session::create(&mut vm, &mut compiler, None).unwrap();
        let mut meta = MetaCommands::new();

        assert_eq!(
            run(&mut meta, &mut session, ".stack").out,
            "Data Stack (depth: 0):\n  <empty>\n"
        );
        session.process("10 -1").unwrap();
        assert_eq!(
            run(&mut meta, &mut session, ".stack").out,
            "Data Stack (depth: 2):\n  [0]: 10 (0x0000000A)\n  [1]: -1 (0xFFFFFFFF)\n"
        );
        assert_eq!(
            run(&mut meta, &mut session, ".rstack").out,
            "Return Stack (depth: 0):\n  <empty>\n"
        );
    }

    #[test]
    fn test_dump_cursor_advances() {
        let (mut vm, mut compiler) = (Vm::new(), ForthCompiler::new());
        let mut session = Session::create(&mut vm, &mut compiler, None).unwrap();
        let mut meta = MetaCommands::new();
        session.process("0x64636261 0x10 !").unwrap();

        let out = run(&mut meta, &mut session, ".dump 0x13 20").out;
        let rows: Vec<&str> = out.lines().collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(
            rows[0],
            "0x00000010: 61 62 63 64 00 00 00 00 00 00 00 00 00 00 00 00  |abcd............|"
        );
        assert!(rows[1].starts_with("0x00000020: 00 00 00 00 "));
        // aligned 0x10 plus 20 rounded up to 32
        assert_eq!(meta.dump_cursor(), 0x30);

        let out = run(&mut meta, &mut session, ".dump").out;
        assert_eq!(out.lines().count(), DEFAULT_DUMP_LEN / 16);
        assert!(out.starts_with("0x00000030:"));
        assert_eq!(meta.dump_cursor(), 0x30 + DEFAULT_DUMP_LEN);
    }

    #[test]
    fn test_dump_bounds_and_usage() {
        let mut vm = Vm::with_config(VmConfig {
            memory_size: 64,
            ..VmConfig::default()
        });
        let mut compiler = ForthCompiler::new();
        let mut session = Session::create(&mut vm, &mut compiler, None).unwrap();
        let mut meta = MetaCommands::new();

        let capture = run(&mut meta, &mut session, ".dump 48");
        assert_eq!(capture.out.lines().count(), 1);

        let capture = run(&mut meta, &mut session, ".dump 64");
        assert_eq!(
            capture.err,
            "Address 0x00000040 is outside VM memory (64 bytes)\n"
        );
        assert_eq!(meta.dump_cursor(), 48 + DEFAULT_DUMP_LEN);

        let capture = run(&mut meta, &mut session, ".dump foo");
        assert_eq!(capture.err, "Usage: .dump [address] [length]\n");
        let capture = run(&mut meta, &mut session, ".dump 1 2 3");
        assert_eq!(capture.err, "Usage: .dump [address] [length]\n");
    }

    #[test]
    fn test_see() {
        let (mut vm, mut compiler) = (Vm::new(), ForthCompiler::new());
        let mut session = Session::create(&mut vm, &mut compiler, None).unwrap();
        let mut meta = MetaCommands::new();
        session.process(": SQ DUP * ;").unwrap();

        assert_eq!(
            run(&mut meta, &mut session, ".see sq").out,
            ": SQ\n  0000  DUP\n  0001  *\n  0002  RET\n;\n"
        );
        assert_eq!(
            run(&mut meta, &mut session, ".see NOPE").err,
            "Unknown word: NOPE\n"
        );
        assert_eq!(run(&mut meta, &mut session, ".see").err, "Usage: .see <word>\n");
    }

    #[test]
    fn test_resets() {
        let (mut vm, mut compiler) = (Vm::new(), ForthCompiler::new());
        let mut session = Session::create(&mut vm, &mut compiler, None).unwrap();
        let mut meta = MetaCommands::new();

        session.process(": SQ DUP * ; 1 2").unwrap();
        assert_eq!(
            run(&mut meta, &mut session, ".reset-dict").out,
            "Dictionary reset (stack preserved).\n"
        );
        assert_eq!(session.stack_depth(), 2);
        assert!(session.store().is_empty());
        assert!(session.process("SQ").is_err());

        session.process(": SQ DUP * ;").unwrap();
        assert_eq!(
            run(&mut meta, &mut session, ".reset").out,
            "VM and compiler context reset.\n"
        );
        assert_eq!(session.stack_depth(), 0);
        assert!(session.compiler().words().is_empty());
    }

    #[test]
    fn test_memory_report() {
        let (mut vm, mut compiler) = (Vm::new(), ForthCompiler::new());
        let mut session = Session::create(&mut vm, &mut compiler, None).unwrap();
        let mut meta = MetaCommands::new();
        session.process(": SQ DUP * ; 7").unwrap();

        let out = run(&mut meta, &mut session, ".memory").out;
        assert!(out.contains("VM memory size: 16384 bytes"));
        assert!(out.contains("Data stack depth: 1"));
        assert!(out.contains("Registered words: 1"));
        assert!(out.contains("Retained units: 1 (9 bytes of bytecode)"));
    }

    #[test]
    fn test_help_and_version() {
        let (mut vm, mut compiler) = (Vm::new(), ForthCompiler::new());
        let mut session = Session::create(&mut vm, &mut compiler, None).unwrap();
        let mut meta = MetaCommands::new();

        let help = run(&mut meta, &mut session, ".help").out;
        for entry in COMMANDS {
            assert!(help.contains(&format!(".{}", entry.keyword)));
        }
        assert!(help.contains("<<<"));
        assert!(help.contains("bye / quit"));

        let version = run(&mut meta, &mut session, ".version").out;
        assert!(version.starts_with(&format!("stackrepl v{}", crate::VERSION)));
        assert!(version.contains("Version code: 0x000400"));
    }

    #[test]
    fn test_hex_dump_short_row() {
        assert_eq!(
            hex_dump(b"Hi\x01", 0x20),
            format!("0x00000020: 48 69 01{}  |Hi.|\n", "   ".repeat(13))
        );
    }
}
