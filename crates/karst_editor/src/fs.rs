// SPDX-License-Identifier: MIT OR Apache-2.0
//! File-system collaborator interface.
//!
//! Resource IO is asynchronous and lives outside the core. The two
//! points where the editor must observe it (saving a prefab, loading
//! a project) call [`AsyncFileSystem::await_idle`] to drain pending
//! transactions instead of spinning on a raw work flag.

/// Asynchronous file-system services the editor core depends on.
pub trait AsyncFileSystem {
    /// Whether asynchronous transactions are still pending.
    fn has_work(&self) -> bool;

    /// Pump pending transactions once.
    fn update_async_transactions(&self);

    /// Block until no transaction is pending.
    fn await_idle(&self) {
        while self.has_work() {
            self.update_async_transactions();
        }
    }
}

/// Synchronous stand-in for headless runs and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullFileSystem;

impl AsyncFileSystem for NullFileSystem {
    fn has_work(&self) -> bool {
        false
    }

    fn update_async_transactions(&self) {}
}
