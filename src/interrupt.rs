//! Cooperative cancellation raised by Ctrl+C.
//!
//! The evaluation pipeline polls the flag right before compiling and right
//! after executing; running code is never preempted.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct InterruptFlag(Arc<AtomicBool>);

impl InterruptFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    /// Clear the flag, returning whether it was raised.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}

#[cfg(unix)]
mod signal {
    use std::io;
    use std::sync::OnceLock;

    use nix::libc::c_int;
    use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
    use tracing::debug;

    use super::InterruptFlag;

    static SIGINT_FLAG: OnceLock<InterruptFlag> = OnceLock::new();

    extern "C" fn on_sigint(_: c_int) {
        if let Some(flag) = SIGINT_FLAG.get() {
            flag.raise();
        }
    }

    pub fn install(flag: &InterruptFlag) -> io::Result<()> {
        if SIGINT_FLAG.set(flag.clone()).is_err() {
            debug!("SIGINT handler already installed");
            return Ok(());
        }

        // SA_RESTART keeps a pending read going; the engine notices the flag
        // once the line arrives.
        let action = SigAction::new(
            SigHandler::Handler(on_sigint),
            SaFlags::SA_RESTART,
            SigSet::empty(),
        );
        unsafe { sigaction(Signal::SIGINT, &action) }.map_err(io::Error::from)?;
        debug!("SIGINT handler installed");
        Ok(())
    }
}

/// Route SIGINT to `flag` for the rest of the process.
///
/// Only the first call installs a handler. On platforms without signals this
/// does nothing and Ctrl+C keeps its default behaviour.
pub fn install_sigint_handler(flag: &InterruptFlag) -> io::Result<()> {
    #[cfg(unix)]
    {
        signal::install(flag)
    }
    #[cfg(not(unix))]
    {
        let _ = flag;
        tracing::debug!("asynchronous interrupts are not supported on this platform");
        Ok(())
    }
}
