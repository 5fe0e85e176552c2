//! Evaluation pipeline: compile, register words, retain, run.

use tracing::{debug, warn};

use crate::backend::{Bytecode, CompiledUnit, Compiler, Machine};
use crate::error::{Outcome, RegistrationError, ReplError};

use super::Session;

/// What a successful submission did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Evaluated {
    /// Named words added to the dictionary
    pub words_defined: usize,
    /// Whether top-level code was executed
    pub executed: bool,
}

impl<M: Machine, C: Compiler> Session<'_, M, C> {
    /// Compile and run one submission.
    ///
    /// Every failure is returned to the caller and also kept as
    /// [`Session::last_error`] until the next submission. The session stays
    /// usable whatever the outcome.
    pub fn process(&mut self, source: &str) -> Result<Evaluated, ReplError> {
        self.last_error.clear();

        let result = self.evaluate(source);
        match &result {
            Ok(evaluated) => debug!(
                len = source.len(),
                outcome = ?Outcome::Success,
                words = evaluated.words_defined,
                executed = evaluated.executed,
                "submission processed"
            ),
            Err(err) => {
                self.record_error(err);
                debug!(len = source.len(), outcome = ?err.kind(), code = err.code(), "submission failed");
            }
        }
        result
    }

    fn evaluate(&mut self, source: &str) -> Result<Evaluated, ReplError> {
        if source.trim().is_empty() {
            return Ok(Evaluated::default());
        }

        if self.interrupt.is_raised() {
            return Err(self.interrupted());
        }

        let unit = self.compiler.compile(source).map_err(|err| ReplError::Compile {
            formatted: err.format(source),
            source: err,
        })?;

        // A failure here drops the unit; words registered before the failing
        // one stay in the dictionary.
        self.register_words(&unit)?;

        let mut evaluated = Evaluated {
            words_defined: unit.words.len(),
            executed: false,
        };
        let main = unit.main_code().cloned();

        // The machine now calls into this unit's word bytecode.
        let unretained = if unit.has_definitions() {
            self.store.retain(unit).inspect_err(|err| {
                warn!(error = %err, "could not retain compiled unit");
            })?;
            None
        } else {
            Some(unit)
        };

        if let Some(code) = main {
            self.run_main(&code)?;
            evaluated.executed = true;
        }

        drop(unretained);
        Ok(evaluated)
    }

    fn register_words(&mut self, unit: &CompiledUnit) -> Result<(), ReplError> {
        for word in &unit.words {
            let id = self
                .vm
                .register(Some(&word.name), &word.code)
                .map_err(|source| {
                    warn!(name = %word.name, error = %source, "machine rejected word");
                    RegistrationError::Vm {
                        name: word.name.clone(),
                        source,
                    }
                })?;

            self.compiler
                .register_word(&word.name, id)
                .map_err(|source| {
                    warn!(name = %word.name, error = %source, "compiler context rejected word");
                    RegistrationError::Context {
                        name: word.name.clone(),
                        source,
                    }
                })?;

            debug!(name = %word.name, %id, bytes = word.code.len(), "registered word");
        }
        Ok(())
    }

    fn run_main(&mut self, code: &Bytecode) -> Result<(), ReplError> {
        let id = self.vm.register(None, code).map_err(|source| {
            warn!(error = %source, "machine rejected top-level code");
            RegistrationError::Main(source)
        })?;

        let executed = self.vm.execute(id);

        if self.interrupt.is_raised() {
            return Err(self.interrupted());
        }
        executed.map_err(ReplError::Runtime)
    }

    /// Drop whatever was in flight and start over from an empty stack.
    fn interrupted(&mut self) -> ReplError {
        self.vm.clear_stack();
        self.interrupt.clear();
        debug!("submission interrupted");
        ReplError::Interrupted
    }
}
