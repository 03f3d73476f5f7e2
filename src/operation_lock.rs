//! Operation Lock
//!
//! Process-wide gate around every phase that writes the clipboard or emits
//! synthetic key events. Acquisition never waits: a second trigger while the
//! gate is held is dropped. The guard returned on success releases the gate on
//! every exit path, and `run_guarded` turns faults into an emergency reset
//! before that release happens.

use crate::error::SynthesisError;
use log::{debug, error, warn};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, TryLockError};

/// Whatever must run when a guarded phase fails.
pub trait FaultRecovery: Send + Sync {
    fn recover(&self) -> Result<(), SynthesisError>;
}

#[derive(Debug, Default)]
pub struct OperationLock {
    blocked: AtomicBool,
    serial: Mutex<()>,
}

/// Held for the duration of one guarded phase. Dropping it clears the flag.
pub struct OperationGuard<'a> {
    lock: &'a OperationLock,
    operation: String,
    _serial: MutexGuard<'a, ()>,
}

impl std::fmt::Debug for OperationGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationGuard")
            .field("operation", &self.operation)
            .finish()
    }
}

impl OperationLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked.load(Ordering::SeqCst)
    }

    /// Tries to take the gate for `operation`, returning immediately either way.
    pub fn try_acquire(&self, operation: &str) -> Result<OperationGuard<'_>, SynthesisError> {
        if self
            .blocked
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!(
                "Operation '{}' ignored: keyboard already locked by another operation",
                operation
            );
            return Err(SynthesisError::LockContention(operation.to_string()));
        }

        // The flag can be force-cleared while a stale phase still runs; the
        // mutex keeps that phase and a new one from overlapping.
        let serial = match self.serial.try_lock() {
            Ok(g) => g,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                self.blocked.store(false, Ordering::SeqCst);
                warn!(
                    "Operation '{}' ignored: previous operation still unwinding",
                    operation
                );
                return Err(SynthesisError::LockContention(operation.to_string()));
            }
        };

        debug!("Keyboard lock acquired for '{}'", operation);
        Ok(OperationGuard {
            lock: self,
            operation: operation.to_string(),
            _serial: serial,
        })
    }

    /// Clears the flag regardless of who holds it. Used by the emergency reset.
    pub fn force_clear(&self) {
        if self.blocked.swap(false, Ordering::SeqCst) {
            warn!("Keyboard lock force-released");
        }
    }

    /// Runs `phase` under the gate.
    ///
    /// An `Err` or a panic from `phase` triggers `recovery` while the gate is
    /// still held; the gate is released afterwards in every case.
    pub fn run_guarded<T, F>(
        &self,
        operation: &str,
        recovery: &dyn FaultRecovery,
        phase: F,
    ) -> Result<T, SynthesisError>
    where
        F: FnOnce() -> Result<T, SynthesisError>,
    {
        let guard = self.try_acquire(operation)?;

        let result = match panic::catch_unwind(AssertUnwindSafe(phase)) {
            Ok(result) => result,
            Err(payload) => Err(SynthesisError::InputFault {
                operation: operation.to_string(),
                message: format!("panicked: {}", panic_message(payload.as_ref())),
            }),
        };

        let result = match result {
            Ok(value) => Ok(value),
            Err(fault) => {
                error!("Error in {}: {}", operation, fault);
                match recovery.recover() {
                    Ok(()) => Err(fault),
                    Err(recovery_fault) => Err(recovery_fault),
                }
            }
        };

        drop(guard);
        result
    }
}

impl Drop for OperationGuard<'_> {
    fn drop(&mut self) {
        self.lock.blocked.store(false, Ordering::SeqCst);
        debug!("Keyboard lock released for '{}'", self.operation);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
