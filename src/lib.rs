//! stackrepl: an interactive read-compile-execute loop for a small Forth
//! stack machine.
//!
//! The engine talks to its backend only through the [`backend::Machine`]
//! and [`backend::Compiler`] traits. The crate ships a reference backend in
//! [`bytecode`].

#![allow(clippy::new_without_default)]
#![allow(clippy::result_large_err)]
#![allow(clippy::collapsible_if)]
#![allow(clippy::collapsible_else_if)]
#![allow(clippy::len_zero)]

pub mod accumulator;
pub mod backend;
pub mod bytecode;
pub mod config;
pub mod console;
pub mod error;
pub mod interrupt;
pub mod meta;
pub mod repl;
pub mod session;
pub mod store;

pub use backend::{Bytecode, Cell, CompiledUnit, Compiler, Machine, WordDef, WordId};
pub use config::ReplConfig;
pub use error::{Outcome, ReplError};
pub use interrupt::InterruptFlag;
pub use repl::{LineStatus, Repl, RunSummary};
pub use session::Session;

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Version packed as `0xMMNNPP`.
pub fn version() -> u32 {
    let mut parts = VERSION
        .split('.')
        .map(|part| part.parse::<u32>().unwrap_or(0));
    let major = parts.next().unwrap_or(0);
    let minor = parts.next().unwrap_or(0);
    let patch = parts.next().unwrap_or(0);
    ((major & 0xFF) << 16) | ((minor & 0xFF) << 8) | (patch & 0xFF)
}
