use std::rc::{Rc, Weak};

use pretty_assertions::assert_eq;

use super::*;
use crate::accumulator::{Feed, LineAccumulator};
use crate::backend::{Bytecode, Cell, CompiledUnit, WordId};
use crate::bytecode::{ForthCompiler, Vm};
use crate::error::{CompileError, ContextError, Outcome, RegistrationError, VmError};

/// Reference VM with failures injected on demand.
#[derive(Default)]
struct ScriptedMachine {
    inner: Vm,
    /// Reject registration of this word name
    reject: Option<&'static str>,
    /// Raise this flag while executing, as Ctrl+C would
    raise_on_execute: Option<InterruptFlag>,
    /// Reject anonymous top-level code
    reject_main: bool,
}

impl Machine for ScriptedMachine {
    fn register(&mut self, name: Option<&str>, code: &Bytecode) -> Result<WordId, VmError> {
        if name.is_some() && name == self.reject {
            return Err(VmError::DictionaryFull(0));
        }
        if name.is_none() && self.reject_main {
            return Err(VmError::EmptyCode);
        }
        self.inner.register(name, code)
    }

    fn execute(&mut self, id: WordId) -> Result<(), VmError> {
        let result = self.inner.execute(id);
        if let Some(flag) = &self.raise_on_execute {
            flag.raise();
        }
        result
    }

    fn stack_depth(&self) -> usize {
        self.inner.stack_depth()
    }

    fn peek(&self, index: usize) -> Option<Cell> {
        self.inner.peek(index)
    }

    fn clear_stack(&mut self) {
        self.inner.clear_stack()
    }

    fn reset_full(&mut self) {
        self.inner.reset_full()
    }

    fn reset_dictionary(&mut self) {
        self.inner.reset_dictionary()
    }

    fn return_depth(&self) -> usize {
        self.inner.return_depth()
    }

    fn peek_return(&self, index: usize) -> Option<Cell> {
        self.inner.peek_return(index)
    }

    fn memory(&self) -> &[u8] {
        self.inner.memory()
    }

    fn word_count(&self) -> usize {
        self.inner.word_count()
    }

    fn word_code(&self, id: WordId) -> Option<Bytecode> {
        self.inner.word_code(id)
    }

    fn disassemble(&self, code: &[u8]) -> String {
        self.inner.disassemble(code)
    }

    fn take_output(&mut self) -> String {
        self.inner.take_output()
    }
}

/// Forth compiler that keeps weak handles to everything it emits.
#[derive(Default)]
struct RecordingCompiler {
    inner: ForthCompiler,
    words: Vec<Weak<[u8]>>,
    mains: Vec<Weak<[u8]>>,
}

impl RecordingCompiler {
    fn live_words(&self) -> usize {
        self.words.iter().filter(|w| w.upgrade().is_some()).count()
    }

    fn live_mains(&self) -> usize {
        self.mains.iter().filter(|w| w.upgrade().is_some()).count()
    }
}

impl Compiler for RecordingCompiler {
    fn compile(&mut self, source: &str) -> Result<CompiledUnit, CompileError> {
        let unit = self.inner.compile(source)?;
        self.words
            .extend(unit.words.iter().map(|w| Rc::downgrade(&w.code)));
        self.mains.extend(unit.main.iter().map(Rc::downgrade));
        Ok(unit)
    }

    fn register_word(&mut self, name: &str, id: WordId) -> Result<(), ContextError> {
        self.inner.register_word(name, id)
    }

    fn reset(&mut self) {
        self.inner.reset()
    }

    fn words(&self) -> Vec<(String, WordId)> {
        self.inner.words()
    }

    fn lookup(&self, name: &str) -> Option<WordId> {
        self.inner.lookup(name)
    }
}

fn top<M: Machine, C: Compiler>(session: &Session<'_, M, C>) -> Option<Cell> {
    session.vm().peek(0)
}

#[test]
fn test_addition() {
    let (mut vm, mut compiler) = (Vm::new(), ForthCompiler::new());
    let mut session = Session::create(&mut vm, &mut compiler, None).unwrap();

    let evaluated = session.process("2 3 +").unwrap();
    assert!(evaluated.executed);
    assert_eq!(session.stack_depth(), 1);
    assert_eq!(top(&session), Some(5));
    assert_eq!(session.last_error(), None);
}

#[test]
fn test_definition_then_use() {
    let (mut vm, mut compiler) = (Vm::new(), ForthCompiler::new());
    let mut session = Session::create(&mut vm, &mut compiler, None).unwrap();

    let evaluated = session.process(": DOUBLE 2 * ;").unwrap();
    assert_eq!(
        evaluated,
        Evaluated {
            words_defined: 1,
            executed: false
        }
    );
    assert_eq!(session.stack_depth(), 0);

    session.process("5 DOUBLE").unwrap();
    assert_eq!(session.stack_depth(), 1);
    assert_eq!(top(&session), Some(10));
}

#[test]
fn test_paste_block_submission() {
    let (mut vm, mut compiler) = (Vm::new(), ForthCompiler::new());
    let mut session = Session::create(&mut vm, &mut compiler, None).unwrap();
    let mut acc = LineAccumulator::new();

    for line in ["<<<", ": SQ DUP * ;", "3 SQ"] {
        assert!(!matches!(acc.feed(line).unwrap(), Feed::Ready(_)));
    }
    match acc.feed(">>>").unwrap() {
        Feed::Ready(block) => {
            session.process(block).unwrap();
        }
        other => panic!("expected a submission, got {:?}", other),
    }
    assert_eq!(session.stack_depth(), 1);
    assert_eq!(top(&session), Some(9));
}

#[test]
fn test_redefinition_after_paste_keeps_pasted_callers() {
    let (mut vm, mut compiler) = (Vm::new(), ForthCompiler::new());
    let mut session = Session::create(&mut vm, &mut compiler, None).unwrap();
    let mut acc = LineAccumulator::new();

    for line in ["<<<", ": A 1 ;", ": B A ;"] {
        acc.feed(line).unwrap();
    }
    match acc.feed(">>>").unwrap() {
        Feed::Ready(block) => {
            session.process(block).unwrap();
        }
        other => panic!("expected a submission, got {:?}", other),
    }
    session.process(": C A ;").unwrap();
    session.process(": A 2 ;").unwrap();

    session.process("B C A").unwrap();
    assert_eq!(session.format_stack(), " ok [3]: 1 1 2");
}

#[test]
fn test_unknown_word_is_compile_error() {
    let (mut vm, mut compiler) = (Vm::new(), ForthCompiler::new());
    let mut session = Session::create(&mut vm, &mut compiler, None).unwrap();

    let err = session.process("UNKNOWN_WORD").unwrap_err();
    assert_eq!(err.kind(), Outcome::CompileError);
    assert_eq!(session.stack_depth(), 0);
    assert_eq!(
        session.last_error(),
        Some("Error: Unknown word 'UNKNOWN_WORD' at line 1, column 1\n  UNKNOWN_WORD\n  ^~~~~~~~~~~~")
    );
}

#[test]
fn test_blank_submission_touches_nothing() {
    let (mut vm, mut compiler) = (Vm::new(), ForthCompiler::new());
    let mut session = Session::create(&mut vm, &mut compiler, None).unwrap();
    session.process("7").unwrap();

    assert_eq!(session.process("").unwrap(), Evaluated::default());
    assert_eq!(session.process("  \t ").unwrap(), Evaluated::default());
    assert_eq!(session.stack_depth(), 1);
}

#[test]
fn test_runtime_error_leaves_stack() {
    let (mut vm, mut compiler) = (Vm::new(), ForthCompiler::new());
    let mut session = Session::create(&mut vm, &mut compiler, None).unwrap();

    let err = session.process("1 2 0 /").unwrap_err();
    assert!(matches!(err, ReplError::Runtime(VmError::DivisionByZero)));
    assert_eq!(session.format_stack(), " ok [3]: 1 2 0");
    assert_eq!(
        session.last_error(),
        Some("Execution failed: error -5: Division by zero")
    );

    // a following success clears the message
    session.process("DROP").unwrap();
    assert_eq!(session.last_error(), None);
}

#[test]
fn test_definitions_persist_across_submissions() {
    let (mut vm, mut compiler) = (Vm::new(), ForthCompiler::new());
    let mut session = Session::create(&mut vm, &mut compiler, None).unwrap();

    session.process(": ONE 1 ;").unwrap();
    session.process(": TWO ONE ONE + ;").unwrap();
    session.process(": FOUR TWO TWO + ;").unwrap();
    session.process("ONE TWO FOUR").unwrap();
    assert_eq!(session.format_stack(), " ok [3]: 1 2 4");
}

#[test]
fn test_full_reset_forgets_words_and_stack() {
    let (mut vm, mut compiler) = (Vm::new(), ForthCompiler::new());
    let mut session = Session::create(&mut vm, &mut compiler, None).unwrap();

    session.process(": SQ DUP * ; 4 SQ").unwrap();
    assert_eq!(session.store().len(), 1);

    session.reset();
    assert_eq!(session.stack_depth(), 0);
    assert!(session.store().is_empty());

    let err = session.process("3 SQ").unwrap_err();
    assert_eq!(err.kind(), Outcome::CompileError);
    assert_eq!(session.stack_depth(), 0);
}

#[test]
fn test_dictionary_reset_keeps_stack() {
    let (mut vm, mut compiler) = (Vm::new(), ForthCompiler::new());
    let mut session = Session::create(&mut vm, &mut compiler, None).unwrap();

    session.process(": SQ DUP * ; 1 2 3").unwrap();
    session.reset_dictionary();
    assert_eq!(session.stack_depth(), 3);
    assert!(session.store().is_empty());
    assert_eq!(session.vm().word_count(), 0);

    assert!(session.process("SQ").is_err());
    assert_eq!(session.stack_depth(), 3);
}

#[test]
fn test_resets_keep_last_error_until_next_submission() {
    let (mut vm, mut compiler) = (Vm::new(), ForthCompiler::new());
    let mut session = Session::create(&mut vm, &mut compiler, None).unwrap();

    assert!(session.process("DROP").is_err());
    session.reset_dictionary();
    assert_eq!(session.last_error(), Some("Execution failed: error -1: Stack underflow"));
    session.reset();
    assert_eq!(session.last_error(), Some("Execution failed: error -1: Stack underflow"));

    session.process("1").unwrap();
    assert_eq!(session.last_error(), None);
}

#[test]
fn test_units_with_words_stay_retained() {
    let mut vm = Vm::new();
    let mut compiler = RecordingCompiler::default();
    let mut session = Session::create(&mut vm, &mut compiler, None).unwrap();

    for i in 0..60 {
        session.process(&format!(": W{} {} ;", i, i)).unwrap();
        session.process(&format!("W{} DROP", i)).unwrap();
        // failures in between must not disturb earlier units
        assert!(session.process("NOPE").is_err());
        assert!(session.process("DROP").is_err());
    }
    assert_eq!(session.store().len(), 60);

    let all: Vec<String> = (0..60).map(|i| format!("W{}", i)).collect();
    session.process(&all.join(" ")).unwrap();
    assert_eq!(session.stack_depth(), 60);
    for i in 0..60 {
        assert_eq!(session.vm().peek(59 - i), Some(i as Cell));
    }

    drop(session);
    // the machine still refers to every word's bytecode
    assert_eq!(compiler.live_words(), 60);
    assert_eq!(compiler.live_mains(), 0);

    let mut session = Session::create(&mut vm, &mut compiler, None).unwrap();
    session.reset();
    drop(session);
    assert_eq!(compiler.live_words(), 0);
}

#[test]
fn test_top_level_code_is_released_after_running() {
    let mut vm = Vm::new();
    let mut compiler = RecordingCompiler::default();
    {
        let mut session = Session::create(&mut vm, &mut compiler, None).unwrap();
        session.process("1 2 +").unwrap();
        assert!(session.process("1 0 /").is_err());
        assert!(session.store().is_empty());
    }
    assert_eq!(compiler.mains.len(), 2);
    assert_eq!(compiler.live_mains(), 0);
}

/// Words registered before a failing one in the same unit are not rolled
/// back. Later submissions may keep using them.
#[test]
fn test_partial_registration_is_kept() {
    let mut vm = ScriptedMachine {
        reject: Some("B"),
        ..ScriptedMachine::default()
    };
    let mut compiler = ForthCompiler::new();
    let mut session = Session::create(&mut vm, &mut compiler, None).unwrap();

    let err = session.process(": A 1 ; : B 2 ; : C 3 ; A").unwrap_err();
    match err {
        ReplError::Registration(RegistrationError::Vm { ref name, .. }) => assert_eq!(name, "B"),
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(
        session.last_error(),
        Some("Failed to register word 'B': error -10")
    );
    assert_eq!(session.stack_depth(), 0);
    assert!(session.store().is_empty());

    session.process("A").unwrap();
    assert_eq!(top(&session), Some(1));
    assert_eq!(session.process("C").unwrap_err().kind(), Outcome::CompileError);
}

#[test]
fn test_rejected_top_level_code_keeps_unit_retained() {
    let mut vm = ScriptedMachine {
        reject_main: true,
        ..ScriptedMachine::default()
    };
    let mut compiler = RecordingCompiler::default();
    {
        let mut session = Session::create(&mut vm, &mut compiler, None).unwrap();

        let err = session.process(": A 1 ; A A").unwrap_err();
        assert!(matches!(
            err,
            ReplError::Registration(RegistrationError::Main(VmError::EmptyCode))
        ));
        assert_eq!(err.kind(), Outcome::RegistrationError);
        assert_eq!(
            session.last_error(),
            Some(format!("Failed to register code: error {}", VmError::EmptyCode.code()).as_str())
        );
        assert_eq!(session.stack_depth(), 0);
        assert_eq!(session.store().len(), 1);
        assert_eq!(session.vm().word_count(), 1);
        assert!(session.compiler().lookup("A").is_some());
    }
    assert_eq!(compiler.live_words(), 1);
    assert_eq!(compiler.live_mains(), 0);
}

#[test]
fn test_compiler_context_rejection() {
    let mut vm = Vm::new();
    let mut compiler = ForthCompiler::with_capacity(1);
    let mut session = Session::create(&mut vm, &mut compiler, None).unwrap();

    let err = session.process(": A 1 ; : B 2 ;").unwrap_err();
    assert_eq!(err.kind(), Outcome::RegistrationError);
    assert_eq!(err.code(), -201);
    assert_eq!(
        err.to_string(),
        "Failed to register word 'B' to compiler: error -201"
    );
}

#[test]
fn test_interrupt_before_compile() {
    let (mut vm, mut compiler) = (Vm::new(), ForthCompiler::new());
    let mut session = Session::create(&mut vm, &mut compiler, None).unwrap();
    session.process("5 6").unwrap();

    session.interrupt_flag().raise();
    let err = session.process("1 2 +").unwrap_err();
    assert_eq!(err.kind(), Outcome::Interrupted);
    assert_eq!(session.stack_depth(), 0);
    assert!(!session.interrupt_flag().is_raised());

    session.process("1 2 +").unwrap();
    assert_eq!(top(&session), Some(3));
}

#[test]
fn test_interrupt_during_execution() {
    let flag = InterruptFlag::new();
    let mut vm = ScriptedMachine {
        raise_on_execute: Some(flag.clone()),
        ..ScriptedMachine::default()
    };
    let mut compiler = ForthCompiler::new();
    let mut session = Session::create(&mut vm, &mut compiler, None)
        .unwrap()
        .with_interrupt(flag.clone());

    let err = session.process(": SQ DUP * ; 3 SQ").unwrap_err();
    assert!(matches!(err, ReplError::Interrupted));
    assert_eq!(session.stack_depth(), 0);
    assert!(!flag.is_raised());
    // the definition made it in before the interrupt
    assert_eq!(session.store().len(), 1);
    assert_eq!(session.last_error(), Some("Interrupted"));
}

#[test]
fn test_last_error_is_bounded() {
    let (mut vm, mut compiler) = (Vm::new(), ForthCompiler::new());
    let mut session = Session::create(&mut vm, &mut compiler, Some(16)).unwrap();

    assert!(session.process("1 0 /").is_err());
    assert_eq!(session.last_error(), Some("Execution failed"));
}

#[test]
fn test_format_stack() {
    let (mut vm, mut compiler) = (Vm::new(), ForthCompiler::new());
    let mut session = Session::create(&mut vm, &mut compiler, Some(0)).unwrap();
    assert_eq!(session.format_stack(), " ok");

    session.process("1 -2 3").unwrap();
    assert_eq!(session.format_stack(), " ok [3]: 1 -2 3");

    let mut out = Vec::new();
    session.print_stack(&mut out).unwrap();
    assert_eq!(String::from_utf8(out).unwrap(), " ok [3]: 1 -2 3\n");
}

#[test]
fn test_output_is_collected() {
    let (mut vm, mut compiler) = (Vm::new(), ForthCompiler::new());
    let mut session = Session::create(&mut vm, &mut compiler, None).unwrap();

    session.process("42 . 10 0 DO 42 EMIT LOOP").unwrap();
    assert_eq!(session.take_output(), "42 **********");
    assert_eq!(session.stack_depth(), 0);
}
