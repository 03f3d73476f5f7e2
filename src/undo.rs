//! One-slot, time-bounded undo record for the last completed synthesis.

use log::debug;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoRecord {
    /// Clipboard text before the synthesis. `None` when the clipboard held no text.
    pub original_text: Option<String>,
    pub created_at: Instant,
}

impl UndoRecord {
    pub fn is_fresh(&self, window: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) < window
    }
}

/// What `lookup` found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UndoLookup {
    Fresh(UndoRecord),
    Expired,
    Empty,
}

pub struct UndoBuffer {
    window: Duration,
    slot: Mutex<Option<UndoRecord>>,
}

impl UndoBuffer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            slot: Mutex::new(None),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn record(&self, original_text: Option<String>) {
        self.record_at(original_text, Instant::now());
    }

    pub fn record_at(&self, original_text: Option<String>, created_at: Instant) {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(UndoRecord {
            original_text,
            created_at,
        });
        debug!("Undo record saved");
    }

    pub fn peek(&self) -> Option<UndoRecord> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Looks the record up against `now` without consuming it.
    pub fn lookup(&self, now: Instant) -> UndoLookup {
        match self.peek() {
            Some(record) if record.is_fresh(self.window, now) => UndoLookup::Fresh(record),
            Some(_) => UndoLookup::Expired,
            None => UndoLookup::Empty,
        }
    }

    pub fn clear(&self) {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        *slot = None;
    }
}
