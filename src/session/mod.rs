//! The session: one machine, one compiler context, and the compiled units
//! kept alive on their behalf.
//!
//! A session borrows its machine and compiler exclusively for its whole
//! lifetime, so it can never outlive them and nothing else can drive them
//! while it exists. Dropping the session releases every retained unit.

mod eval;

#[cfg(test)]
mod tests;

use std::fmt::Write as _;
use std::io;

use tracing::debug;

use crate::backend::{Compiler, Machine};
use crate::error::ReplError;
use crate::interrupt::InterruptFlag;
use crate::store::UnitStore;

pub use eval::Evaluated;

/// Size of the last-error buffer when none is given.
pub const DEFAULT_LINE_BUFFER_SIZE: usize = 512;

pub struct Session<'a, M: Machine, C: Compiler> {
    vm: &'a mut M,
    compiler: &'a mut C,
    store: UnitStore,
    /// Message of the last failed submission; empty after a success
    last_error: String,
    error_limit: usize,
    interrupt: InterruptFlag,
}

impl<'a, M: Machine, C: Compiler> Session<'a, M, C> {
    /// Create a session over `vm` and `compiler`.
    ///
    /// `line_buffer_size` bounds the stored last-error message and defaults
    /// to [`DEFAULT_LINE_BUFFER_SIZE`]. Fails only if that buffer cannot be
    /// allocated.
    pub fn create(
        vm: &'a mut M,
        compiler: &'a mut C,
        line_buffer_size: Option<usize>,
    ) -> Result<Self, ReplError> {
        let error_limit = line_buffer_size
            .filter(|&size| size > 0)
            .unwrap_or(DEFAULT_LINE_BUFFER_SIZE);

        let mut last_error = String::new();
        last_error
            .try_reserve_exact(error_limit)
            .map_err(|e| ReplError::allocation("creating session", e))?;

        debug!(error_limit, "session created");
        Ok(Self {
            vm,
            compiler,
            store: UnitStore::new(),
            last_error,
            error_limit,
            interrupt: InterruptFlag::new(),
        })
    }

    /// Poll `flag` for cancellation instead of the session's own flag.
    pub fn with_interrupt(mut self, flag: InterruptFlag) -> Self {
        self.interrupt = flag;
        self
    }

    pub fn interrupt_flag(&self) -> &InterruptFlag {
        &self.interrupt
    }

    /// Message of the last failed submission, valid until the next one.
    pub fn last_error(&self) -> Option<&str> {
        if self.last_error.is_empty() {
            None
        } else {
            Some(&self.last_error)
        }
    }

    pub fn stack_depth(&self) -> usize {
        self.vm.stack_depth()
    }

    /// ` ok` for an empty stack, otherwise ` ok [depth]: v1 v2 ...` bottom to top.
    pub fn format_stack(&self) -> String {
        let depth = self.vm.stack_depth();
        if depth == 0 {
            return " ok".to_string();
        }

        let mut out = format!(" ok [{}]:", depth);
        for index in (0..depth).rev() {
            if let Some(value) = self.vm.peek(index) {
                let _ = write!(out, " {}", value);
            }
        }
        out
    }

    pub fn print_stack<W: io::Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "{}", self.format_stack())
    }

    /// Clear both stacks, the dictionary and the compiler context, then
    /// release every retained unit.
    pub fn reset(&mut self) {
        self.vm.reset_full();
        self.compiler.reset();
        self.store.release_all();
        debug!("session reset");
    }

    /// Like [`Session::reset`] but the data stack is preserved.
    pub fn reset_dictionary(&mut self) {
        self.vm.reset_dictionary();
        self.compiler.reset();
        self.store.release_all();
        debug!(depth = self.vm.stack_depth(), "dictionary reset");
    }

    /// Text printed by code executed since the last call.
    pub fn take_output(&mut self) -> String {
        self.vm.take_output()
    }

    pub fn vm(&self) -> &M {
        &*self.vm
    }

    pub fn compiler(&self) -> &C {
        &*self.compiler
    }

    pub fn store(&self) -> &UnitStore {
        &self.store
    }

    /// Store the message of a failed submission, cut to the buffer size.
    fn record_error(&mut self, err: &ReplError) {
        self.last_error.clear();
        let _ = write!(self.last_error, "{}", err);
        if self.last_error.len() > self.error_limit {
            let mut end = self.error_limit;
            while !self.last_error.is_char_boundary(end) {
                end -= 1;
            }
            self.last_error.truncate(end);
        }
    }
}
