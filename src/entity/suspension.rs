//! Insert suspension.
//!
//! Constructing an entity instance normally inserts its row. While a
//! [`InsertSuspension`] guard is alive on the current thread, construction
//! builds the instance in memory only. Row materialization and local
//! re-application of updated fields run under a guard. The flag is per
//! thread, so one thread reading rows never suppresses another thread's
//! insert.

use std::cell::Cell;
use std::marker::PhantomData;

thread_local! {
    static SUSPENDED: Cell<u32> = const { Cell::new(0) };
}

/// Scope guard; inserts resume when the last guard on this thread drops.
#[must_use = "inserts resume as soon as the guard is dropped"]
pub struct InsertSuspension {
    // Tied to the thread whose counter it incremented
    _not_send: PhantomData<*const ()>,
}

/// Suspend constructor inserts on this thread until the guard drops.
pub fn suspend_inserts() -> InsertSuspension {
    SUSPENDED.with(|s| s.set(s.get() + 1));
    InsertSuspension {
        _not_send: PhantomData,
    }
}

/// Whether constructor inserts are suspended on this thread.
pub fn inserts_suspended() -> bool {
    SUSPENDED.with(|s| s.get() > 0)
}

impl Drop for InsertSuspension {
    fn drop(&mut self) {
        SUSPENDED.with(|s| s.set(s.get().saturating_sub(1)));
    }
}
