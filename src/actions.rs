use crate::active_app;
use crate::cancellation::AiCancellation;
use crate::clipboard::{paste_via_clipboard, ClipboardAccess, ClipboardTransaction, RestoreScheduler};
use crate::emergency::EmergencyReset;
use crate::error::SynthesisError;
use crate::feedback::{FeedbackKind, FeedbackSink};
use crate::input::KeyInjector;
use crate::managers::invocation::AiInvoker;
use crate::operation_lock::OperationLock;
use crate::settings::{
    AppSettings, PasteMethod, SynthesisMode, CANCEL_BINDING, EMERGENCY_RESET_BINDING,
    SYNTHESIZE_BINDING, UNDO_BINDING,
};
use crate::undo::{UndoBuffer, UndoLookup};
use log::{debug, error, info, warn};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Clipboard text shorter than this after trimming is not worth a model call.
pub const MIN_INPUT_CHARS: usize = 2;

const PREVIEW_CHARS: usize = 50;

/// Checks the clipboard content and hands back the text to synthesize.
pub fn validate_input(text: Option<&str>) -> Result<&str, SynthesisError> {
    let text = text.unwrap_or_default();
    let length = text.trim().chars().count();
    if length == 0 {
        return Err(SynthesisError::InvalidInput("clipboard is empty".into()));
    }
    if length < MIN_INPUT_CHARS {
        return Err(SynthesisError::InvalidInput(format!(
            "text too short ({} character)",
            length
        )));
    }
    Ok(text)
}

fn preview(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

/// What the pipelines need from the settings, fixed at startup.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub mode: SynthesisMode,
    pub append_separator: String,
    pub paste_method: PasteMethod,
    pub restore_delay: Duration,
    pub undo_window: Duration,
    /// Shown in the "copy first" instruction.
    pub synthesize_hotkey: String,
}

impl EngineOptions {
    pub fn from_settings(settings: &AppSettings) -> Self {
        Self {
            mode: settings.mode,
            append_separator: settings.append_separator.clone(),
            paste_method: settings.paste_method,
            restore_delay: settings.restore_delay(),
            undo_window: settings.undo_window(),
            synthesize_hotkey: settings
                .binding(SYNTHESIZE_BINDING)
                .map(|b| b.current_binding.clone())
                .unwrap_or_default(),
        }
    }
}

/// Shared collaborators the engine is assembled from.
pub struct EngineParts {
    pub clipboard: Arc<dyn ClipboardAccess>,
    pub injector: Arc<dyn KeyInjector>,
    pub feedback: Arc<dyn FeedbackSink>,
    pub lock: Arc<OperationLock>,
    pub cancellation: Arc<AiCancellation>,
    pub invoker: AiInvoker,
    pub emergency: Arc<EmergencyReset>,
}

/// Runs synthesis and undo end to end.
///
/// Every trigger ends in exactly one feedback signal, except lock contention,
/// which is silent. Faults inside a guarded phase are handed to the emergency
/// reset, which plays its own tone.
pub struct SynthesisEngine {
    clipboard: Arc<dyn ClipboardAccess>,
    injector: Arc<dyn KeyInjector>,
    feedback: Arc<dyn FeedbackSink>,
    lock: Arc<OperationLock>,
    cancellation: Arc<AiCancellation>,
    invoker: AiInvoker,
    emergency: Arc<EmergencyReset>,
    undo: UndoBuffer,
    restore: RestoreScheduler,
    options: EngineOptions,
}

impl SynthesisEngine {
    pub fn new(parts: EngineParts, options: EngineOptions) -> Self {
        let restore = RestoreScheduler::new(parts.clipboard.clone(), parts.lock.clone());
        Self {
            clipboard: parts.clipboard,
            injector: parts.injector,
            feedback: parts.feedback,
            lock: parts.lock,
            cancellation: parts.cancellation,
            invoker: parts.invoker,
            emergency: parts.emergency,
            undo: UndoBuffer::new(options.undo_window),
            restore,
            options,
        }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn invoker(&self) -> &AiInvoker {
        &self.invoker
    }

    pub fn trigger_synthesis(&self) -> Result<String, SynthesisError> {
        info!("Hotkey {} detected!", self.options.synthesize_hotkey);
        let result = self.synthesize();
        self.report("synthesis", &result);
        result
    }

    fn synthesize(&self) -> Result<String, SynthesisError> {
        // A restore still waiting from the previous run lands before we read
        self.restore.flush_pending();

        let original = self.clipboard.read_text().unwrap_or_else(|e| {
            warn!("{}", e);
            None
        });
        let text = validate_input(original.as_deref()).map_err(|e| {
            error!("NO VALID TEXT IN CLIPBOARD!");
            info!(
                "Before pressing {}, MANUALLY COPY the text with Ctrl+C",
                self.options.synthesize_hotkey
            );
            e
        })?;

        if let Some(app) = active_app::get_frontmost_app_name() {
            debug!("Active window: '{}'", app);
        }
        info!(
            "Text from clipboard ({} characters): '{}'",
            text.chars().count(),
            preview(text, PREVIEW_CHARS)
        );

        let result = self.invoker.invoke(text).into_result()?;

        let payload = match self.options.mode {
            SynthesisMode::Replace => result.clone(),
            SynthesisMode::Append => {
                format!("{}{}{}", text, self.options.append_separator, result)
            }
        };

        let mut transaction = ClipboardTransaction::begin(original.clone());
        let pasted = self
            .lock
            .run_guarded("synthesis", self.emergency.as_ref(), || {
                self.undo.record(original.clone());
                transaction
                    .paste(
                        self.clipboard.as_ref(),
                        self.injector.as_ref(),
                        &payload,
                        self.options.paste_method,
                    )
                    .map_err(|message| SynthesisError::InputFault {
                        operation: "synthesis".into(),
                        message,
                    })
            });

        // Also after a failed paste; the restore only fires if our write is still there
        transaction.commit(&self.restore, self.options.restore_delay);
        pasted?;

        info!("Pasted result: '{}'", preview(&result, PREVIEW_CHARS));
        Ok(result)
    }

    pub fn trigger_undo(&self) -> Result<(), SynthesisError> {
        let result = self.undo_last();
        self.report("undo", &result);
        result
    }

    fn undo_last(&self) -> Result<(), SynthesisError> {
        let restored = self
            .lock
            .run_guarded("undo", self.emergency.as_ref(), || {
                let record = match self.undo.lookup(Instant::now()) {
                    UndoLookup::Fresh(record) => record,
                    UndoLookup::Expired | UndoLookup::Empty => return Ok(false),
                };

                info!("UNDO activated! Restoring original text...");
                // The original goes back right now
                self.restore.cancel_pending();

                let original = record.original_text.unwrap_or_default();
                paste_via_clipboard(
                    self.clipboard.as_ref(),
                    self.injector.as_ref(),
                    &original,
                    self.options.paste_method,
                )
                .map_err(|message| SynthesisError::InputFault {
                    operation: "undo".into(),
                    message,
                })?;

                self.undo.clear();
                Ok(true)
            })?;

        if restored {
            info!("Original text restored");
            Ok(())
        } else {
            let window = self.undo.window();
            warn!(
                "Undo not available (older than {} seconds)",
                window.as_secs()
            );
            Err(SynthesisError::UndoUnavailable(window))
        }
    }

    /// Asks the in-flight AI call to stop. The synthesis it belongs to plays
    /// the cancel tone once it has unwound; with nothing running the tone is
    /// played here. Returns whether a call was in flight.
    pub fn cancel(&self) -> bool {
        let in_flight = self.invoker.is_in_flight();
        self.cancellation.cancel();
        if in_flight {
            info!("Cancelling AI processing...");
        } else {
            info!("Nothing to cancel");
            self.feedback.signal(FeedbackKind::Cancel);
        }
        in_flight
    }

    pub fn emergency_reset(&self) -> Result<(), SynthesisError> {
        self.emergency.execute()
    }

    /// Final cleanup before exit: stop the AI call, put the user's clipboard
    /// back, reset the keyboard.
    pub fn shutdown(&self) -> Result<(), SynthesisError> {
        self.cancellation.cancel();
        self.restore.flush_pending();
        self.emergency.execute()
    }

    fn report<T>(&self, operation: &str, result: &Result<T, SynthesisError>) {
        match result {
            Ok(_) => self.feedback.signal(FeedbackKind::Success),
            Err(e) => {
                match e {
                    SynthesisError::Cancelled => {
                        info!("Skipping paste phase due to cancelled processing")
                    }
                    _ => debug!("{} ended: {}", operation, e),
                }
                if let Some(kind) = e.feedback() {
                    self.feedback.signal(kind);
                }
            }
        }
    }
}

// Shortcut Action Trait
pub trait ShortcutAction: Send + Sync {
    /// Runs on key press and returns once the operation has finished.
    fn start(
        &self,
        engine: &SynthesisEngine,
        binding_id: &str,
        shortcut_str: &str,
    ) -> Result<(), SynthesisError>;

    /// Guarded actions go through the keyboard lock and may block for a long
    /// time, so the dispatcher runs them off its own thread.
    fn is_lock_guarded(&self) -> bool {
        false
    }
}

struct SynthesizeAction;

impl ShortcutAction for SynthesizeAction {
    fn start(
        &self,
        engine: &SynthesisEngine,
        _binding_id: &str,
        _shortcut_str: &str,
    ) -> Result<(), SynthesisError> {
        engine.trigger_synthesis().map(|_| ())
    }

    fn is_lock_guarded(&self) -> bool {
        true
    }
}

struct UndoAction;

impl ShortcutAction for UndoAction {
    fn start(
        &self,
        engine: &SynthesisEngine,
        _binding_id: &str,
        shortcut_str: &str,
    ) -> Result<(), SynthesisError> {
        debug!("Undo hotkey {} pressed", shortcut_str);
        engine.trigger_undo()
    }

    fn is_lock_guarded(&self) -> bool {
        true
    }
}

struct CancelAction;

impl ShortcutAction for CancelAction {
    fn start(
        &self,
        engine: &SynthesisEngine,
        _binding_id: &str,
        _shortcut_str: &str,
    ) -> Result<(), SynthesisError> {
        engine.cancel();
        Ok(())
    }
}

struct EmergencyResetAction;

impl ShortcutAction for EmergencyResetAction {
    fn start(
        &self,
        engine: &SynthesisEngine,
        _binding_id: &str,
        _shortcut_str: &str,
    ) -> Result<(), SynthesisError> {
        engine.emergency_reset()
    }
}

// Static Action Map
pub static ACTION_MAP: Lazy<HashMap<String, Arc<dyn ShortcutAction>>> = Lazy::new(|| {
    let mut map = HashMap::new();
    map.insert(
        SYNTHESIZE_BINDING.to_string(),
        Arc::new(SynthesizeAction) as Arc<dyn ShortcutAction>,
    );
    map.insert(
        UNDO_BINDING.to_string(),
        Arc::new(UndoAction) as Arc<dyn ShortcutAction>,
    );
    map.insert(
        CANCEL_BINDING.to_string(),
        Arc::new(CancelAction) as Arc<dyn ShortcutAction>,
    );
    map.insert(
        EMERGENCY_RESET_BINDING.to_string(),
        Arc::new(EmergencyResetAction) as Arc<dyn ShortcutAction>,
    );
    map
});

#[cfg(test)]
mod tests {
    use super::*;
    use crate::managers::invocation::TRUNCATION_MARKER;
    use crate::managers::key_listener::HotkeyRegistry;
    use crate::test_support::{
        engine_harness, EngineHarness, EngineKnobs as Knobs, FakeClipboard, Script,
    };

    const REPORT_REQUEST: &str = "My website visits have plummeted. Prepare a report.";
    const REPORT_COMMAND: &str =
        "task:analyze_data topic:website_traffic task:create_report target:team";

    fn fixture(clipboard: Arc<FakeClipboard>, script: Script, knobs: Knobs) -> EngineHarness {
        engine_harness(clipboard, script, knobs)
    }

    fn reply(text: &str) -> Script {
        Script::Reply(text.into())
    }

    #[test]
    fn test_validate_input() {
        assert!(validate_input(None).is_err());
        assert!(validate_input(Some("   \n")).is_err());
        assert!(validate_input(Some(" a ")).is_err());
        assert_eq!(validate_input(Some(" ab ")).unwrap(), " ab ");
        assert_eq!(validate_input(Some("日本")).unwrap(), "日本");
    }

    #[test]
    fn test_preview_marks_cut() {
        assert_eq!(preview("short", 50), "short");
        assert_eq!(preview(&"x".repeat(60), 50), format!("{}...", "x".repeat(50)));
    }

    #[test]
    fn test_short_input_never_reaches_model() {
        for content in ["", " ", "a", " b\n"] {
            let f = fixture(FakeClipboard::with_text(content), reply("task:x"), Knobs::default());

            let err = f.engine.trigger_synthesis().unwrap_err();

            assert!(matches!(err, SynthesisError::InvalidInput(_)));
            assert_eq!(f.transformer.calls(), 0);
            assert_eq!(f.feedback.signals(), vec![FeedbackKind::Error]);
            assert_eq!(f.clipboard.current().as_deref(), Some(content));
            assert!(f.injector.pastes().is_empty());
        }
    }

    #[test]
    fn test_empty_clipboard_is_invalid_input() {
        let f = fixture(FakeClipboard::empty(), reply("task:x"), Knobs::default());
        assert!(matches!(
            f.engine.trigger_synthesis(),
            Err(SynthesisError::InvalidInput(_))
        ));
        assert_eq!(f.transformer.calls(), 0);
    }

    #[test]
    fn test_replace_pastes_result_and_restores_clipboard() {
        let f = fixture(
            FakeClipboard::with_text(REPORT_REQUEST),
            reply(REPORT_COMMAND),
            Knobs::default(),
        );

        let result = f.engine.trigger_synthesis().unwrap();

        assert_eq!(result, REPORT_COMMAND);
        assert_eq!(f.injector.pasted_texts(), vec![Some(REPORT_COMMAND.to_string())]);
        assert_eq!(f.injector.lock_held_at_paste(), vec![true]);
        assert_eq!(f.feedback.signals(), vec![FeedbackKind::Success]);
        assert!(!f.lock.is_blocked());
        assert_eq!(
            f.engine.undo.peek().unwrap().original_text.as_deref(),
            Some(REPORT_REQUEST)
        );

        f.engine.restore.wait_idle();
        assert_eq!(f.clipboard.current().as_deref(), Some(REPORT_REQUEST));
    }

    #[test]
    fn test_quarterly_meeting_prep() {
        let f = fixture(
            FakeClipboard::with_text("quarterly meeting prep"),
            reply("task:create_presentation topic:quarterly_meeting"),
            Knobs::default(),
        );

        f.engine.trigger_synthesis().unwrap();
        assert_eq!(
            f.injector.pasted_texts(),
            vec![Some("task:create_presentation topic:quarterly_meeting".to_string())]
        );

        f.engine.restore.wait_idle();
        assert_eq!(f.clipboard.current().as_deref(), Some("quarterly meeting prep"));
    }

    #[test]
    fn test_append_mode_keeps_original_before_result() {
        let f = fixture(
            FakeClipboard::with_text("Write python code that connects to a database"),
            reply("task:code lang:python action:connect_database"),
            Knobs {
                mode: SynthesisMode::Append,
                ..Knobs::default()
            },
        );

        f.engine.trigger_synthesis().unwrap();

        assert_eq!(
            f.injector.pasted_texts(),
            vec![Some(
                "Write python code that connects to a database\n--- Synt-E: task:code lang:python action:connect_database"
                    .to_string()
            )]
        );
    }

    #[test]
    fn test_long_input_is_truncated_before_the_call() {
        let f = fixture(
            FakeClipboard::with_text(&"y".repeat(40)),
            reply("task:summarize"),
            Knobs {
                max_chars: 20,
                ..Knobs::default()
            },
        );

        f.engine.trigger_synthesis().unwrap();

        let sent = f.transformer.last_request().unwrap().user_text;
        assert_eq!(sent, format!("{}{}", "y".repeat(20), TRUNCATION_MARKER));
    }

    #[test]
    fn test_cancel_wins_over_pending_call() {
        let f = fixture(
            FakeClipboard::with_text(REPORT_REQUEST),
            Script::Hang,
            Knobs {
                timeout: Duration::from_secs(60),
                ..Knobs::default()
            },
        );

        let worker = {
            let engine = f.engine.clone();
            std::thread::spawn(move || engine.trigger_synthesis())
        };
        while !f.engine.invoker().is_in_flight() {
            std::thread::sleep(Duration::from_millis(5));
        }
        let started = Instant::now();
        ACTION_MAP[CANCEL_BINDING]
            .start(&f.engine, CANCEL_BINDING, "ctrl+alt+c")
            .unwrap();

        assert_eq!(worker.join().unwrap(), Err(SynthesisError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(f.feedback.signals(), vec![FeedbackKind::Cancel]);
        assert!(f.injector.pastes().is_empty());
        assert_eq!(f.clipboard.current().as_deref(), Some(REPORT_REQUEST));
        assert!(f.engine.undo.peek().is_none());
    }

    #[test]
    fn test_timeout_leaves_clipboard_and_undo_alone() {
        let f = fixture(
            FakeClipboard::with_text(REPORT_REQUEST),
            Script::Hang,
            Knobs {
                timeout: Duration::from_millis(100),
                ..Knobs::default()
            },
        );

        let err = f.engine.trigger_synthesis().unwrap_err();

        assert_eq!(err, SynthesisError::Timeout(Duration::from_millis(100)));
        assert_eq!(f.feedback.signals(), vec![FeedbackKind::Error]);
        assert_eq!(f.clipboard.current().as_deref(), Some(REPORT_REQUEST));
        assert!(f.clipboard.writes().is_empty());
        assert!(f.engine.undo.peek().is_none());
    }

    #[test]
    fn test_service_fault_plays_error() {
        let f = fixture(
            FakeClipboard::with_text(REPORT_REQUEST),
            Script::Fail("model 'gpt-oss:20b' not found".into()),
            Knobs::default(),
        );

        assert_eq!(
            f.engine.trigger_synthesis(),
            Err(SynthesisError::ServiceFault("model 'gpt-oss:20b' not found".into()))
        );
        assert_eq!(f.feedback.signals(), vec![FeedbackKind::Error]);
    }

    #[test]
    fn test_held_lock_drops_paste_silently() {
        let f = fixture(
            FakeClipboard::with_text(REPORT_REQUEST),
            reply(REPORT_COMMAND),
            Knobs::default(),
        );
        let held = f.lock.try_acquire("undo").unwrap();

        let err = f.engine.trigger_synthesis().unwrap_err();

        assert!(matches!(err, SynthesisError::LockContention(_)));
        assert!(f.injector.pastes().is_empty());
        assert!(f.feedback.signals().is_empty());
        assert!(f.engine.undo.peek().is_none());
        assert!(f.lock.is_blocked());
        drop(held);
        assert!(!f.lock.is_blocked());
    }

    #[test]
    fn test_undo_within_window_pastes_original() {
        let f = fixture(
            FakeClipboard::with_text(REPORT_REQUEST),
            reply(REPORT_COMMAND),
            Knobs {
                restore_delay: Duration::from_secs(30),
                ..Knobs::default()
            },
        );
        f.engine.trigger_synthesis().unwrap();

        f.engine.trigger_undo().unwrap();

        assert_eq!(
            f.injector.pasted_texts(),
            vec![
                Some(REPORT_COMMAND.to_string()),
                Some(REPORT_REQUEST.to_string())
            ]
        );
        assert!(f.engine.undo.peek().is_none());
        assert_eq!(
            f.feedback.signals(),
            vec![FeedbackKind::Success, FeedbackKind::Success]
        );
        // The superseded restore is gone
        assert!(!f.engine.restore.cancel_pending());

        // Second undo finds nothing
        assert!(matches!(
            f.engine.trigger_undo(),
            Err(SynthesisError::UndoUnavailable(_))
        ));
    }

    #[test]
    fn test_undo_after_window_takes_no_action() {
        let f = fixture(
            FakeClipboard::with_text(REPORT_REQUEST),
            reply(REPORT_COMMAND),
            Knobs {
                undo_window: Duration::from_millis(50),
                restore_delay: Duration::from_millis(10),
                ..Knobs::default()
            },
        );
        f.engine.trigger_synthesis().unwrap();
        f.engine.restore.wait_idle();
        std::thread::sleep(Duration::from_millis(80));
        let writes_before = f.clipboard.writes().len();

        let err = f.engine.trigger_undo().unwrap_err();

        assert_eq!(err, SynthesisError::UndoUnavailable(Duration::from_millis(50)));
        assert_eq!(f.injector.pastes().len(), 1);
        assert_eq!(f.clipboard.writes().len(), writes_before);
        assert_eq!(
            f.feedback.signals(),
            vec![FeedbackKind::Success, FeedbackKind::Error]
        );
        assert!(!f.lock.is_blocked());
    }

    #[test]
    fn test_undo_without_record_is_unavailable() {
        let f = fixture(FakeClipboard::with_text("x"), reply("task:x"), Knobs::default());
        assert!(matches!(
            f.engine.trigger_undo(),
            Err(SynthesisError::UndoUnavailable(_))
        ));
        assert_eq!(f.feedback.signals(), vec![FeedbackKind::Error]);
    }

    #[test]
    fn test_paste_error_runs_emergency_reset() {
        let f = fixture(
            FakeClipboard::with_text(REPORT_REQUEST),
            reply(REPORT_COMMAND),
            Knobs::default(),
        );
        f.registry.register(SYNTHESIZE_BINDING, "ctrl+alt+s").unwrap();
        f.injector.fail_paste(true);

        let err = f.engine.trigger_synthesis().unwrap_err();

        assert!(matches!(err, SynthesisError::InputFault { .. }));
        assert!(err.needed_recovery());
        assert!(!f.lock.is_blocked());
        assert_eq!(f.injector.modifier_releases(), 1);
        assert!(f.registry.registered_ids().is_empty());
        assert_eq!(f.feedback.signals(), vec![FeedbackKind::Emergency]);

        // The written payload is still rolled back
        f.engine.restore.wait_idle();
        assert_eq!(f.clipboard.current().as_deref(), Some(REPORT_REQUEST));
    }

    #[test]
    fn test_panicking_injector_still_releases_lock() {
        let f = fixture(
            FakeClipboard::with_text(REPORT_REQUEST),
            reply(REPORT_COMMAND),
            Knobs::default(),
        );
        f.injector.panic_on_paste(true);

        let err = f.engine.trigger_synthesis().unwrap_err();

        assert!(matches!(err, SynthesisError::InputFault { .. }));
        assert!(!f.lock.is_blocked());
        assert_eq!(f.registry.unregister_calls(), 1);

        f.injector.panic_on_paste(false);
        f.engine.trigger_synthesis().unwrap();
    }

    #[test]
    fn test_clipboard_write_failure_during_undo_recovers() {
        let f = fixture(
            FakeClipboard::with_text(REPORT_REQUEST),
            reply(REPORT_COMMAND),
            Knobs::default(),
        );
        f.engine.trigger_synthesis().unwrap();
        f.clipboard.fail_writes(true);

        let err = f.engine.trigger_undo().unwrap_err();

        assert!(matches!(err, SynthesisError::InputFault { ref operation, .. } if operation == "undo"));
        assert!(!f.lock.is_blocked());
        // The record survives so the user can retry
        assert!(f.engine.undo.peek().is_some());
    }

    #[test]
    fn test_failed_recovery_is_reported() {
        let f = fixture(
            FakeClipboard::with_text(REPORT_REQUEST),
            reply(REPORT_COMMAND),
            Knobs::default(),
        );
        f.injector.fail_paste(true);
        f.injector.fail_modifier_release(true);

        let err = f.engine.trigger_synthesis().unwrap_err();

        assert!(matches!(err, SynthesisError::RecoveryFault(_)));
        assert!(!f.lock.is_blocked());
        assert_eq!(f.feedback.signals(), vec![FeedbackKind::Emergency]);
    }

    #[test]
    fn test_next_synthesis_reads_restored_clipboard() {
        let f = fixture(
            FakeClipboard::with_text(REPORT_REQUEST),
            reply(REPORT_COMMAND),
            Knobs {
                restore_delay: Duration::from_secs(30),
                ..Knobs::default()
            },
        );
        f.engine.trigger_synthesis().unwrap();
        assert_eq!(f.clipboard.current().as_deref(), Some(REPORT_COMMAND));

        f.engine.trigger_synthesis().unwrap();

        assert_eq!(f.transformer.last_request().unwrap().user_text, REPORT_REQUEST);
    }

    #[test]
    fn test_cancel_with_nothing_in_flight_still_acknowledges() {
        let f = fixture(FakeClipboard::with_text("x"), reply("task:x"), Knobs::default());
        assert!(!f.engine.cancel());
        assert_eq!(f.feedback.signals(), vec![FeedbackKind::Cancel]);
    }

    #[test]
    fn test_action_map_covers_every_binding() {
        for id in [SYNTHESIZE_BINDING, UNDO_BINDING] {
            assert!(ACTION_MAP[id].is_lock_guarded());
        }
        for id in [CANCEL_BINDING, EMERGENCY_RESET_BINDING] {
            assert!(!ACTION_MAP[id].is_lock_guarded());
        }
        assert_eq!(ACTION_MAP.len(), 4);
    }

    #[test]
    fn test_emergency_action_clears_stuck_lock() {
        let f = fixture(FakeClipboard::with_text("x"), reply("task:x"), Knobs::default());
        let stuck = f.lock.try_acquire("synthesis").unwrap();

        ACTION_MAP[EMERGENCY_RESET_BINDING]
            .start(&f.engine, EMERGENCY_RESET_BINDING, "ctrl+alt+q")
            .unwrap();

        assert!(!f.lock.is_blocked());
        assert_eq!(f.feedback.signals(), vec![FeedbackKind::Emergency]);
        drop(stuck);
    }
}
