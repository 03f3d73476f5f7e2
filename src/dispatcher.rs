//! Hotkey Dispatcher
//!
//! Single consumer of everything that can happen at runtime: shortcut
//! transitions from the key listener, completion notices from operation
//! workers, listener failure and shutdown requests. Per-operation state lives
//! here and is only touched on the dispatcher thread.

use crate::actions::{SynthesisEngine, ACTION_MAP};
use crate::managers::key_listener::{HotkeyRegistry, ShortcutEvent};
use crate::settings::{AppSettings, EMERGENCY_RESET_BINDING};
use crate::shortcut;
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::ops::ControlFlow;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchMessage {
    Shortcut(ShortcutEvent),
    /// A worker thread finished the operation bound to `binding_id`.
    Finished {
        binding_id: String,
        needed_recovery: bool,
    },
    /// The OS keyboard hook died; no further shortcuts will arrive.
    ListenerFailed(String),
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OperationState {
    #[default]
    Idle,
    Running,
    Recovering,
}

pub struct HotkeyDispatcher {
    engine: Arc<SynthesisEngine>,
    registry: Arc<dyn HotkeyRegistry>,
    settings: AppSettings,
    sender: Sender<DispatchMessage>,
    receiver: Receiver<DispatchMessage>,
    states: HashMap<String, OperationState>,
}

impl HotkeyDispatcher {
    /// `sender` must feed `receiver`; workers report completion through it.
    pub fn new(
        engine: Arc<SynthesisEngine>,
        registry: Arc<dyn HotkeyRegistry>,
        settings: AppSettings,
        sender: Sender<DispatchMessage>,
        receiver: Receiver<DispatchMessage>,
    ) -> Self {
        Self {
            engine,
            registry,
            settings,
            sender,
            receiver,
            states: HashMap::new(),
        }
    }

    pub fn state(&self, binding_id: &str) -> OperationState {
        self.states.get(binding_id).copied().unwrap_or_default()
    }

    fn set_state(&mut self, binding_id: &str, state: OperationState) {
        debug!("Operation '{}' -> {:?}", binding_id, state);
        self.states.insert(binding_id.to_string(), state);
    }

    /// Processes messages until shutdown or listener failure.
    pub fn run(mut self) -> Result<(), String> {
        info!("Waiting for hotkeys...");
        loop {
            let message = match self.receiver.recv() {
                Ok(message) => message,
                Err(_) => {
                    self.cleanup();
                    return Ok(());
                }
            };
            if let ControlFlow::Break(result) = self.handle(message) {
                return result;
            }
        }
    }

    pub fn handle(&mut self, message: DispatchMessage) -> ControlFlow<Result<(), String>> {
        match message {
            DispatchMessage::Shortcut(event) => {
                self.on_shortcut(event);
                ControlFlow::Continue(())
            }
            DispatchMessage::Finished {
                binding_id,
                needed_recovery,
            } => {
                self.finish(&binding_id, needed_recovery);
                ControlFlow::Continue(())
            }
            DispatchMessage::ListenerFailed(message) => {
                error!("Keyboard listener stopped: {}", message);
                self.cleanup();
                ControlFlow::Break(Err(format!("Keyboard listener stopped: {}", message)))
            }
            DispatchMessage::Shutdown => {
                info!("Interrupt received. Cleaning up...");
                self.cleanup();
                ControlFlow::Break(Ok(()))
            }
        }
    }

    fn on_shortcut(&mut self, event: ShortcutEvent) {
        // Every operation fires on press
        if !event.pressed {
            return;
        }

        let Some(action) = ACTION_MAP.get(&event.id).cloned() else {
            warn!(
                "No action defined in ACTION_MAP for shortcut ID '{}'. Shortcut: '{}'",
                event.id, event.binding
            );
            return;
        };

        if !action.is_lock_guarded() {
            self.set_state(&event.id, OperationState::Running);
            let result = action.start(&self.engine, &event.id, &event.binding);
            // An explicit reset leaves every hotkey unbound
            let needed_recovery = event.id == EMERGENCY_RESET_BINDING
                || matches!(&result, Err(e) if e.needed_recovery());
            self.finish(&event.id, needed_recovery);
            return;
        }

        if self.state(&event.id) != OperationState::Idle {
            info!("'{}' is already running, trigger ignored", event.id);
            return;
        }
        self.set_state(&event.id, OperationState::Running);

        let engine = self.engine.clone();
        let sender = self.sender.clone();
        let binding_id = event.id.clone();
        let shortcut_str = event.binding;

        let spawned = std::thread::Builder::new()
            .name(format!("synte-{}", event.id))
            .spawn(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    action.start(&engine, &binding_id, &shortcut_str)
                }));
                let needed_recovery = match outcome {
                    Ok(Err(e)) => e.needed_recovery(),
                    Ok(Ok(())) => false,
                    Err(_) => {
                        error!("Operation '{}' panicked", binding_id);
                        false
                    }
                };
                let _ = sender.send(DispatchMessage::Finished {
                    binding_id,
                    needed_recovery,
                });
            });

        if let Err(e) = spawned {
            error!("Failed to start '{}': {}", event.id, e);
            self.set_state(&event.id, OperationState::Idle);
        }
    }

    fn finish(&mut self, binding_id: &str, needed_recovery: bool) {
        if needed_recovery {
            self.set_state(binding_id, OperationState::Recovering);
            self.restore_bindings();
        }
        self.set_state(binding_id, OperationState::Idle);
    }

    fn restore_bindings(&self) {
        if let Err(e) = self.registry.unregister_all() {
            warn!("Failed to clear hotkeys before re-registering: {}", e);
        }
        match shortcut::init_shortcuts(self.registry.as_ref(), &self.settings) {
            Ok(()) => info!("Hotkeys re-registered"),
            Err(e) => error!("Failed to re-register hotkeys: {}", e),
        }
    }

    fn cleanup(&self) {
        if let Err(e) = self.engine.shutdown() {
            error!("Cleanup incomplete: {}", e);
        }
    }
}
