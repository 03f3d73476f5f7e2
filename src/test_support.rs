//! In-memory stand-ins for the clipboard, keyboard, speaker, hotkey table and
//! AI endpoint, shared by the unit tests.

use crate::actions::{EngineOptions, EngineParts, SynthesisEngine};
use crate::cancellation::AiCancellation;
use crate::clipboard::ClipboardAccess;
use crate::emergency::EmergencyReset;
use crate::feedback::{FeedbackKind, FeedbackSink};
use crate::input::KeyInjector;
use crate::llm_client::{TextTransformer, TransformRequest};
use crate::managers::invocation::{AiInvoker, InvocationConfig};
use crate::managers::key_listener::HotkeyRegistry;
use crate::operation_lock::OperationLock;
use crate::settings::{PasteMethod, SynthesisMode};
use futures_util::future::{BoxFuture, FutureExt};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub struct FakeClipboard {
    text: Mutex<Option<String>>,
    writes: Mutex<Vec<String>>,
    fail_writes: AtomicBool,
}

impl FakeClipboard {
    pub fn with_text(text: &str) -> Arc<Self> {
        Arc::new(Self {
            text: Mutex::new(Some(text.to_string())),
            writes: Mutex::new(Vec::new()),
            fail_writes: AtomicBool::new(false),
        })
    }

    pub fn empty() -> Arc<Self> {
        Arc::new(Self {
            text: Mutex::new(None),
            writes: Mutex::new(Vec::new()),
            fail_writes: AtomicBool::new(false),
        })
    }

    pub fn current(&self) -> Option<String> {
        self.text.lock().unwrap().clone()
    }

    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl ClipboardAccess for FakeClipboard {
    fn read_text(&self) -> Result<Option<String>, String> {
        Ok(self.current())
    }

    fn write_text(&self, text: &str) -> Result<(), String> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err("clipboard is owned by another process".into());
        }
        self.writes.lock().unwrap().push(text.to_string());
        *self.text.lock().unwrap() = Some(text.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<(), String> {
        *self.text.lock().unwrap() = None;
        Ok(())
    }
}

/// Records paste combos and modifier releases. When built with `observing`,
/// each paste also captures the clipboard text and whether the keyboard lock
/// was held at that moment.
pub struct RecordingInjector {
    pastes: Mutex<Vec<PasteMethod>>,
    pasted_texts: Mutex<Vec<Option<String>>>,
    lock_held: Mutex<Vec<bool>>,
    releases: AtomicUsize,
    fail_paste: AtomicBool,
    panic_on_paste: AtomicBool,
    fail_release: AtomicBool,
    clipboard: Option<Arc<FakeClipboard>>,
    lock: Option<Arc<OperationLock>>,
}

impl RecordingInjector {
    pub fn new() -> Self {
        Self {
            pastes: Mutex::new(Vec::new()),
            pasted_texts: Mutex::new(Vec::new()),
            lock_held: Mutex::new(Vec::new()),
            releases: AtomicUsize::new(0),
            fail_paste: AtomicBool::new(false),
            panic_on_paste: AtomicBool::new(false),
            fail_release: AtomicBool::new(false),
            clipboard: None,
            lock: None,
        }
    }

    pub fn observing(clipboard: Arc<FakeClipboard>, lock: Arc<OperationLock>) -> Self {
        Self {
            clipboard: Some(clipboard),
            lock: Some(lock),
            ..Self::new()
        }
    }

    pub fn pastes(&self) -> Vec<PasteMethod> {
        self.pastes.lock().unwrap().clone()
    }

    pub fn pasted_texts(&self) -> Vec<Option<String>> {
        self.pasted_texts.lock().unwrap().clone()
    }

    pub fn lock_held_at_paste(&self) -> Vec<bool> {
        self.lock_held.lock().unwrap().clone()
    }

    pub fn modifier_releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn fail_paste(&self, fail: bool) {
        self.fail_paste.store(fail, Ordering::SeqCst);
    }

    pub fn panic_on_paste(&self, panic: bool) {
        self.panic_on_paste.store(panic, Ordering::SeqCst);
    }

    pub fn fail_modifier_release(&self, fail: bool) {
        self.fail_release.store(fail, Ordering::SeqCst);
    }
}

impl KeyInjector for RecordingInjector {
    fn send_paste(&self, method: PasteMethod) -> Result<(), String> {
        if self.panic_on_paste.load(Ordering::SeqCst) {
            panic!("synthetic key event rejected");
        }
        if self.fail_paste.load(Ordering::SeqCst) {
            return Err("input injection denied".into());
        }
        self.pastes.lock().unwrap().push(method);
        if let Some(clipboard) = &self.clipboard {
            self.pasted_texts.lock().unwrap().push(clipboard.current());
        }
        if let Some(lock) = &self.lock {
            self.lock_held.lock().unwrap().push(lock.is_blocked());
        }
        Ok(())
    }

    fn release_modifiers(&self) -> Result<(), String> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        if self.fail_release.load(Ordering::SeqCst) {
            Err("Failed to release 1 modifier(s): Control".into())
        } else {
            Ok(())
        }
    }
}

pub struct RecordingFeedback {
    signals: Mutex<Vec<FeedbackKind>>,
}

impl RecordingFeedback {
    pub fn new() -> Self {
        Self {
            signals: Mutex::new(Vec::new()),
        }
    }

    pub fn signals(&self) -> Vec<FeedbackKind> {
        self.signals.lock().unwrap().clone()
    }
}

impl FeedbackSink for RecordingFeedback {
    fn signal(&self, kind: FeedbackKind) {
        self.signals.lock().unwrap().push(kind);
    }
}

/// How a `ScriptedTransformer` answers every request.
#[derive(Clone)]
pub enum Script {
    Reply(String),
    Fail(String),
    /// Never completes.
    Hang,
    /// Replies after the given delay.
    Delayed(Duration, String),
    /// Requests cancellation, then replies at once.
    CancelThenReply(Arc<AiCancellation>, String),
}

pub struct ScriptedTransformer {
    script: Script,
    calls: AtomicUsize,
    last: Mutex<Option<TransformRequest>>,
}

impl ScriptedTransformer {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            calls: AtomicUsize::new(0),
            last: Mutex::new(None),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<TransformRequest> {
        self.last.lock().unwrap().clone()
    }
}

impl TextTransformer for ScriptedTransformer {
    fn transform(&self, request: TransformRequest) -> BoxFuture<'static, Result<String, String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().unwrap() = Some(request);

        match self.script.clone() {
            Script::Reply(text) => async move { Ok(text) }.boxed(),
            Script::Fail(message) => async move { Err(message) }.boxed(),
            Script::Hang => futures_util::future::pending::<Result<String, String>>().boxed(),
            Script::Delayed(delay, text) => async move {
                tokio::time::sleep(delay).await;
                Ok(text)
            }
            .boxed(),
            Script::CancelThenReply(cancellation, text) => {
                cancellation.cancel();
                async move { Ok(text) }.boxed()
            }
        }
    }
}

/// Hotkey table that remembers every registration in order.
pub struct RecordingRegistry {
    active: Mutex<Vec<(String, String)>>,
    history: Mutex<Vec<String>>,
    rejected: Mutex<HashSet<String>>,
    unregister_calls: AtomicUsize,
}

impl RecordingRegistry {
    pub fn new() -> Self {
        Self {
            active: Mutex::new(Vec::new()),
            history: Mutex::new(Vec::new()),
            rejected: Mutex::new(HashSet::new()),
            unregister_calls: AtomicUsize::new(0),
        }
    }

    /// Makes every future registration of `id` fail.
    pub fn reject(&self, id: &str) {
        self.rejected.lock().unwrap().insert(id.to_string());
    }

    pub fn registration_order(&self) -> Vec<String> {
        self.history.lock().unwrap().clone()
    }

    pub fn unregister_calls(&self) -> usize {
        self.unregister_calls.load(Ordering::SeqCst)
    }
}

impl HotkeyRegistry for RecordingRegistry {
    fn register(&self, id: &str, binding: &str) -> Result<(), String> {
        if self.rejected.lock().unwrap().contains(id) {
            return Err(format!("'{}' is grabbed by another application", binding));
        }
        let mut active = self.active.lock().unwrap();
        active.retain(|(existing, _)| existing != id);
        active.push((id.to_string(), binding.to_string()));
        self.history.lock().unwrap().push(id.to_string());
        Ok(())
    }

    fn unregister_all(&self) -> Result<(), String> {
        self.unregister_calls.fetch_add(1, Ordering::SeqCst);
        self.active.lock().unwrap().clear();
        Ok(())
    }

    fn registered_ids(&self) -> Vec<String> {
        self.active
            .lock()
            .unwrap()
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }
}

/// Tunables for `engine_harness`, defaulting to fast test timings.
pub struct EngineKnobs {
    pub mode: SynthesisMode,
    pub max_chars: usize,
    pub timeout: Duration,
    pub undo_window: Duration,
    pub restore_delay: Duration,
}

impl Default for EngineKnobs {
    fn default() -> Self {
        Self {
            mode: SynthesisMode::Replace,
            max_chars: 5000,
            timeout: Duration::from_secs(5),
            undo_window: Duration::from_secs(10),
            restore_delay: Duration::from_millis(50),
        }
    }
}

/// A fully wired engine over fakes, with handles to every fake.
pub struct EngineHarness {
    pub clipboard: Arc<FakeClipboard>,
    pub injector: Arc<RecordingInjector>,
    pub feedback: Arc<RecordingFeedback>,
    pub registry: Arc<RecordingRegistry>,
    pub lock: Arc<OperationLock>,
    pub transformer: Arc<ScriptedTransformer>,
    pub engine: Arc<SynthesisEngine>,
}

pub fn engine_harness(
    clipboard: Arc<FakeClipboard>,
    script: Script,
    knobs: EngineKnobs,
) -> EngineHarness {
    let lock = Arc::new(OperationLock::new());
    let injector = Arc::new(RecordingInjector::observing(clipboard.clone(), lock.clone()));
    let feedback = Arc::new(RecordingFeedback::new());
    let registry = Arc::new(RecordingRegistry::new());
    let cancellation = Arc::new(AiCancellation::new());
    let transformer = Arc::new(ScriptedTransformer::new(script));

    let invoker = AiInvoker::new(
        transformer.clone(),
        cancellation.clone(),
        InvocationConfig {
            model: "gpt-oss:20b".into(),
            system_prompt: "compile".into(),
            max_chars: knobs.max_chars,
            timeout: knobs.timeout,
        },
    )
    .unwrap();
    let emergency = Arc::new(EmergencyReset::new(
        lock.clone(),
        registry.clone(),
        injector.clone(),
        feedback.clone(),
        Duration::from_millis(1),
    ));

    let engine = SynthesisEngine::new(
        EngineParts {
            clipboard: clipboard.clone(),
            injector: injector.clone(),
            feedback: feedback.clone(),
            lock: lock.clone(),
            cancellation,
            invoker,
            emergency,
        },
        EngineOptions {
            mode: knobs.mode,
            append_separator: "\n--- Synt-E: ".into(),
            paste_method: PasteMethod::CtrlV,
            restore_delay: knobs.restore_delay,
            undo_window: knobs.undo_window,
            synthesize_hotkey: "ctrl+alt+s".into(),
        },
    );

    EngineHarness {
        clipboard,
        injector,
        feedback,
        registry,
        lock,
        transformer,
        engine: Arc::new(engine),
    }
}
