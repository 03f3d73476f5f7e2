use crate::input::KeyInjector;
use crate::operation_lock::OperationLock;
use crate::settings::PasteMethod;
use arboard::Clipboard;
use log::{debug, info, warn};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Time for the clipboard owner change to propagate before the paste combo.
const WRITE_SETTLE: Duration = Duration::from_millis(50);

/// Plain-text access to the shared system clipboard.
pub trait ClipboardAccess: Send + Sync {
    /// Current text, or `None` when the clipboard holds no text.
    fn read_text(&self) -> Result<Option<String>, String>;
    fn write_text(&self, text: &str) -> Result<(), String>;
    fn clear(&self) -> Result<(), String>;
}

/// arboard-backed clipboard. The handle lives as long as the process so the
/// content we set stays served on X11.
pub struct SystemClipboard {
    inner: Mutex<Clipboard>,
}

impl SystemClipboard {
    pub fn new() -> Result<Self, String> {
        let clipboard =
            Clipboard::new().map_err(|e| format!("Failed to open clipboard: {}", e))?;
        Ok(Self {
            inner: Mutex::new(clipboard),
        })
    }
}

impl ClipboardAccess for SystemClipboard {
    fn read_text(&self) -> Result<Option<String>, String> {
        let mut clipboard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match clipboard.get_text() {
            Ok(text) => Ok(Some(text)),
            Err(arboard::Error::ContentNotAvailable) => Ok(None),
            Err(e) => Err(format!("Failed to read clipboard: {}", e)),
        }
    }

    fn write_text(&self, text: &str) -> Result<(), String> {
        let mut clipboard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        clipboard
            .set_text(text.to_owned())
            .map_err(|e| format!("Failed to write to clipboard: {}", e))
    }

    fn clear(&self) -> Result<(), String> {
        let mut clipboard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        clipboard
            .clear()
            .map_err(|e| format!("Failed to clear clipboard: {}", e))
    }
}

/// Writes `text` to the clipboard and sends the paste keystroke.
pub fn paste_via_clipboard(
    clipboard: &dyn ClipboardAccess,
    injector: &dyn KeyInjector,
    text: &str,
    paste_method: PasteMethod,
) -> Result<(), String> {
    clipboard.write_text(text)?;
    std::thread::sleep(WRITE_SETTLE);
    injector.send_paste(paste_method)
}

/// Save/restore bracket around one clipboard-mutating operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipboardTransaction {
    original: Option<String>,
    written: Option<String>,
}

impl ClipboardTransaction {
    /// Starts a transaction over clipboard content captured by the caller.
    pub fn begin(original: Option<String>) -> Self {
        Self {
            original,
            written: None,
        }
    }

    pub fn original(&self) -> Option<&str> {
        self.original.as_deref()
    }

    pub fn paste(
        &mut self,
        clipboard: &dyn ClipboardAccess,
        injector: &dyn KeyInjector,
        text: &str,
        paste_method: PasteMethod,
    ) -> Result<(), String> {
        self.written = Some(text.to_string());
        paste_via_clipboard(clipboard, injector, text, paste_method)
    }

    /// Hands the restoration of the original content to `scheduler`.
    /// Nothing is scheduled when the transaction never wrote.
    pub fn commit(self, scheduler: &RestoreScheduler, delay: Duration) {
        if let Some(written) = self.written {
            scheduler.schedule(self.original, written, delay);
        }
    }
}

enum RestoreSignal {
    Now,
    Cancel,
}

struct PendingRestore {
    signal: mpsc::Sender<RestoreSignal>,
    handle: JoinHandle<()>,
}

/// Runs deferred clipboard restorations off the triggering thread.
///
/// At most one restoration is pending. It is skipped when the clipboard no
/// longer holds what we pasted. The next operation either runs it early
/// (`flush_pending`) or drops it (`cancel_pending`).
pub struct RestoreScheduler {
    clipboard: Arc<dyn ClipboardAccess>,
    lock: Arc<OperationLock>,
    pending: Mutex<Option<PendingRestore>>,
}

impl RestoreScheduler {
    pub fn new(clipboard: Arc<dyn ClipboardAccess>, lock: Arc<OperationLock>) -> Self {
        Self {
            clipboard,
            lock,
            pending: Mutex::new(None),
        }
    }

    pub fn schedule(&self, original: Option<String>, written: String, delay: Duration) {
        self.cancel_pending();

        let (signal_tx, signal_rx) = mpsc::channel::<RestoreSignal>();
        let clipboard = self.clipboard.clone();
        let lock = self.lock.clone();

        let spawned = std::thread::Builder::new()
            .name("synte-restore".into())
            .spawn(move || match signal_rx.recv_timeout(delay) {
                Err(RecvTimeoutError::Timeout) | Ok(RestoreSignal::Now) => {
                    restore_if_unchanged(clipboard.as_ref(), &lock, original, &written)
                }
                Ok(RestoreSignal::Cancel) | Err(RecvTimeoutError::Disconnected) => {
                    debug!("Clipboard restore cancelled")
                }
            });

        match spawned {
            Ok(handle) => {
                let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
                *pending = Some(PendingRestore {
                    signal: signal_tx,
                    handle,
                });
            }
            Err(e) => warn!("Failed to schedule clipboard restore: {}", e),
        }
    }

    /// Drops the pending restoration, if any, and waits for its thread.
    pub fn cancel_pending(&self) -> bool {
        self.finish_pending(RestoreSignal::Cancel)
    }

    /// Runs the pending restoration now instead of after its delay.
    pub fn flush_pending(&self) -> bool {
        self.finish_pending(RestoreSignal::Now)
    }

    fn finish_pending(&self, signal: RestoreSignal) -> bool {
        let pending = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();

        match pending {
            Some(p) => {
                let _ = p.signal.send(signal);
                let _ = p.handle.join();
                true
            }
            None => false,
        }
    }

    /// Blocks until the pending restoration has run or been cancelled.
    pub fn wait_idle(&self) {
        let pending = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(p) = pending {
            // Keep the sender alive so the wait runs to its timeout
            let _ = p.handle.join();
            drop(p.signal);
        }
    }
}

fn restore_if_unchanged(
    clipboard: &dyn ClipboardAccess,
    lock: &OperationLock,
    original: Option<String>,
    written: &str,
) {
    let _guard = match lock.try_acquire("clipboard restore") {
        Ok(guard) => guard,
        Err(_) => {
            warn!("Clipboard restore skipped: another operation holds the keyboard");
            return;
        }
    };

    match clipboard.read_text() {
        Ok(Some(current)) if current == written => {}
        Ok(_) => {
            info!("Clipboard changed since paste, leaving it alone");
            return;
        }
        Err(e) => {
            warn!("Clipboard restore skipped: {}", e);
            return;
        }
    }

    let restored = match &original {
        Some(text) => clipboard.write_text(text),
        None => clipboard.clear(),
    };
    match restored {
        Ok(()) => debug!("Original clipboard content restored"),
        Err(e) => warn!("Failed to restore clipboard: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeClipboard, RecordingInjector};
    use std::time::Instant;

    fn scheduler(clipboard: &Arc<FakeClipboard>) -> (RestoreScheduler, Arc<OperationLock>) {
        let lock = Arc::new(OperationLock::new());
        (RestoreScheduler::new(clipboard.clone(), lock.clone()), lock)
    }

    #[test]
    fn test_paste_writes_then_sends_combo() {
        let clipboard = FakeClipboard::with_text("before");
        let injector = RecordingInjector::new();
        let mut tx = ClipboardTransaction::begin(Some("before".into()));

        tx.paste(clipboard.as_ref(), &injector, "after", PasteMethod::CtrlV)
            .unwrap();

        assert_eq!(clipboard.current(), Some("after".into()));
        assert_eq!(injector.pastes(), vec![PasteMethod::CtrlV]);
        assert_eq!(tx.original(), Some("before"));
    }

    #[test]
    fn test_restore_after_delay() {
        let clipboard = FakeClipboard::with_text("after");
        let (scheduler, _) = scheduler(&clipboard);

        let started = Instant::now();
        scheduler.schedule(Some("before".into()), "after".into(), Duration::from_millis(50));
        assert_eq!(clipboard.current(), Some("after".into()));

        scheduler.wait_idle();
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(clipboard.current(), Some("before".into()));
    }

    #[test]
    fn test_restore_of_empty_original_clears() {
        let clipboard = FakeClipboard::with_text("after");
        let (scheduler, _) = scheduler(&clipboard);

        scheduler.schedule(None, "after".into(), Duration::from_millis(10));
        scheduler.wait_idle();
        assert_eq!(clipboard.current(), None);
    }

    #[test]
    fn test_restore_skipped_when_user_copied_meanwhile() {
        let clipboard = FakeClipboard::with_text("after");
        let (scheduler, _) = scheduler(&clipboard);

        scheduler.schedule(Some("before".into()), "after".into(), Duration::from_millis(50));
        clipboard.write_text("copied by user").unwrap();
        scheduler.wait_idle();

        assert_eq!(clipboard.current(), Some("copied by user".into()));
    }

    #[test]
    fn test_cancelled_restore_never_runs() {
        let clipboard = FakeClipboard::with_text("after");
        let (scheduler, _) = scheduler(&clipboard);

        scheduler.schedule(Some("before".into()), "after".into(), Duration::from_secs(30));
        let started = Instant::now();
        assert!(scheduler.cancel_pending());
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(clipboard.current(), Some("after".into()));
        assert!(!scheduler.cancel_pending());
    }

    #[test]
    fn test_flush_restores_immediately() {
        let clipboard = FakeClipboard::with_text("after");
        let (scheduler, _) = scheduler(&clipboard);

        scheduler.schedule(Some("before".into()), "after".into(), Duration::from_secs(30));
        let started = Instant::now();
        assert!(scheduler.flush_pending());
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(clipboard.current(), Some("before".into()));
    }

    #[test]
    fn test_restore_respects_operation_lock() {
        let clipboard = FakeClipboard::with_text("after");
        let (scheduler, lock) = scheduler(&clipboard);

        let _held = lock.try_acquire("undo").unwrap();
        scheduler.schedule(Some("before".into()), "after".into(), Duration::from_millis(10));
        scheduler.wait_idle();

        assert_eq!(clipboard.current(), Some("after".into()));
    }

    #[test]
    fn test_commit_without_write_schedules_nothing() {
        let clipboard = FakeClipboard::with_text("x");
        let (scheduler, _) = scheduler(&clipboard);
        ClipboardTransaction::begin(Some("x".into())).commit(&scheduler, Duration::from_millis(1));
        assert!(!scheduler.cancel_pending());
    }
}
