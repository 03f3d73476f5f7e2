//! Emergency Reset
//!
//! Brings the input subsystem back to a known state: every hotkey unbound,
//! every modifier key up, the keyboard lock cleared. Bindings are left
//! unbound; whoever triggered the reset decides whether to restore them.

use crate::error::SynthesisError;
use crate::feedback::{FeedbackKind, FeedbackSink};
use crate::input::KeyInjector;
use crate::managers::key_listener::HotkeyRegistry;
use crate::operation_lock::{FaultRecovery, OperationLock};
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;

pub struct EmergencyReset {
    lock: Arc<OperationLock>,
    registry: Arc<dyn HotkeyRegistry>,
    injector: Arc<dyn KeyInjector>,
    feedback: Arc<dyn FeedbackSink>,
    settle: Duration,
}

impl EmergencyReset {
    pub fn new(
        lock: Arc<OperationLock>,
        registry: Arc<dyn HotkeyRegistry>,
        injector: Arc<dyn KeyInjector>,
        feedback: Arc<dyn FeedbackSink>,
        settle: Duration,
    ) -> Self {
        Self {
            lock,
            registry,
            injector,
            feedback,
            settle,
        }
    }

    pub fn execute(&self) -> Result<(), SynthesisError> {
        warn!("EMERGENCY: Forced keyboard reset activated!");
        self.feedback.signal(FeedbackKind::Emergency);

        let mut failures = Vec::new();

        if let Err(e) = self.registry.unregister_all() {
            failures.push(format!("unregister hotkeys: {}", e));
        }

        if let Err(e) = self.injector.release_modifiers() {
            failures.push(format!("release modifiers: {}", e));
        }

        std::thread::sleep(self.settle);

        // Cleared even when an earlier step failed
        self.lock.force_clear();

        if failures.is_empty() {
            info!("Keyboard successfully reset!");
            Ok(())
        } else {
            let message = failures.join("; ");
            error!("Error during emergency reset: {}", message);
            Err(SynthesisError::RecoveryFault(message))
        }
    }
}

impl FaultRecovery for EmergencyReset {
    fn recover(&self) -> Result<(), SynthesisError> {
        self.execute()
    }
}
