// Gates
//
// Mutual-exclusion policies injected into list-backed containers. A gate is
// entered before list links are touched and left afterwards; the list only
// hands out its unlocked primitives while a gate is held.
//
// Correctness and safety notes:
// - `NullGate` is for containers confined to one thread. It is `!Sync`, so a
//   list guarded by it cannot be shared, and it asserts against re-entry so
//   two live guards can never alias the same list
// - `SpinGate` wraps `spin::Mutex<()>`; entering it twice from one thread
//   deadlocks instead of aliasing

use core::cell::Cell;

use spin::Mutex;

/// Lock/critical-section abstraction.
///
/// # Safety
///
/// Between a return from `enter` and the matching `leave`, no other call to
/// `enter` on the same gate may return.
pub unsafe trait Gate: Send {
    fn enter(&self);

    /// # Safety
    ///
    /// The caller must hold the gate through a preceding `enter`.
    unsafe fn leave(&self);
}

/// No-op gate for single-threaded containers
#[derive(Debug, Default)]
pub struct NullGate {
    entered: Cell<bool>,
}

unsafe impl Gate for NullGate {
    fn enter(&self) {
        assert!(!self.entered.replace(true), "NullGate entered while already held");
    }

    unsafe fn leave(&self) {
        self.entered.set(false);
    }
}

/// Spinlock gate shared between threads
#[derive(Debug, Default)]
pub struct SpinGate {
    lock: Mutex<()>,
}

unsafe impl Gate for SpinGate {
    fn enter(&self) {
        core::mem::forget(self.lock.lock());
    }

    unsafe fn leave(&self) {
        self.lock.force_unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spin_gate_excludes() {
        let gate = SpinGate::default();
        gate.enter();
        assert!(gate.lock.try_lock().is_none());
        unsafe { gate.leave() };
        assert!(gate.lock.try_lock().is_some());
    }

    #[test]
    #[should_panic(expected = "already held")]
    fn test_null_gate_detects_reentry() {
        let gate = NullGate::default();
        gate.enter();
        gate.enter();
    }
}
