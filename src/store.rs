//! Retention of compiled units whose bytecode the machine still refers to.
//!
//! Once a unit that defines words has been registered, the machine calls into
//! its bytecode for as long as those words stay in the dictionary. The store
//! keeps such units until the dictionary is cleared.

use tracing::debug;

use crate::backend::CompiledUnit;
use crate::error::ReplError;

/// Number of units the store makes room for on first use.
pub const INITIAL_CAPACITY: usize = 16;

/// Ordered collection of retained compiled units.
#[derive(Debug, Default)]
pub struct UnitStore {
    units: Vec<CompiledUnit>,
    bytes: usize,
}

impl UnitStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of `unit` until the next [`UnitStore::release_all`].
    ///
    /// Capacity doubles when full. If growing fails the unit is dropped and
    /// the units already retained are left untouched.
    pub fn retain(&mut self, unit: CompiledUnit) -> Result<(), ReplError> {
        if self.units.len() == self.units.capacity() {
            let additional = self.units.capacity().max(INITIAL_CAPACITY);
            self.units
                .try_reserve_exact(additional)
                .map_err(|e| ReplError::allocation("tracking word definitions", e))?;
        }

        self.bytes += unit.code_bytes();
        self.units.push(unit);
        debug!(
            units = self.units.len(),
            bytes = self.bytes,
            "retained compiled unit"
        );
        Ok(())
    }

    /// Drop every retained unit.
    pub fn release_all(&mut self) {
        if self.units.is_empty() {
            return;
        }
        debug!(
            units = self.units.len(),
            bytes = self.bytes,
            "releasing retained units"
        );
        self.units.clear();
        self.bytes = 0;
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.units.capacity()
    }

    /// Bytecode bytes held by retained units.
    pub fn code_bytes(&self) -> usize {
        self.bytes
    }
}

impl Drop for UnitStore {
    fn drop(&mut self) {
        self.release_all();
    }
}
