use crate::dispatcher::DispatchMessage;
use log::{debug, error, info};
use rdev::{EventType, Key};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};

/// State for tracking active key modifiers (Ctrl, Shift, Alt, Win)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModifierState {
    pub ctrl: bool,
    pub shift: bool,
    pub alt: bool,
    pub win: bool,
}

impl ModifierState {
    /// Update modifier state based on key event
    pub fn update(&mut self, key: Key, pressed: bool) {
        match key {
            Key::ControlLeft | Key::ControlRight => self.ctrl = pressed,
            Key::ShiftLeft | Key::ShiftRight => self.shift = pressed,
            Key::Alt | Key::AltGr => self.alt = pressed,
            Key::MetaLeft | Key::MetaRight => self.win = pressed,
            _ => {}
        }
    }
}

/// A registered shortcut with its trigger key and required modifiers.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisteredShortcut {
    pub key: Key,
    pub modifiers: ModifierState,
    pub original_binding: String,
}

/// Shortcut transition delivered to the dispatcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShortcutEvent {
    pub id: String,
    pub binding: String,
    pub pressed: bool,
}

/// Binds and unbinds global key combinations.
pub trait HotkeyRegistry: Send + Sync {
    fn register(&self, id: &str, binding: &str) -> Result<(), String>;
    fn unregister_all(&self) -> Result<(), String>;
    fn registered_ids(&self) -> Vec<String>;
}

/// Turns raw key events into shortcut press/release transitions.
#[derive(Debug, Default)]
pub struct ShortcutMatcher {
    modifiers: ModifierState,
    shortcuts: HashMap<String, RegisteredShortcut>,
    /// Shortcuts currently held down, so key repeat fires only once
    active: HashMap<String, bool>,
}

impl ShortcutMatcher {
    pub fn insert(&mut self, id: &str, shortcut: RegisteredShortcut) {
        self.shortcuts.insert(id.to_string(), shortcut);
    }

    pub fn clear(&mut self) {
        self.shortcuts.clear();
        self.active.clear();
    }

    pub fn ids(&self) -> Vec<String> {
        self.shortcuts.keys().cloned().collect()
    }

    pub fn handle(&mut self, event: &EventType) -> Vec<ShortcutEvent> {
        match *event {
            EventType::KeyPress(key) => self.on_press(key),
            EventType::KeyRelease(key) => self.on_release(key),
            _ => Vec::new(),
        }
    }

    fn on_press(&mut self, key: Key) -> Vec<ShortcutEvent> {
        self.modifiers.update(key, true);
        let current = self.modifiers;

        let mut fired = Vec::new();
        for (id, shortcut) in &self.shortcuts {
            let matches = shortcut.key == key && current == shortcut.modifiers;

            if matches && !self.active.get(id).copied().unwrap_or(false) {
                self.active.insert(id.clone(), true);
                debug!("Shortcut pressed: {} ({})", id, shortcut.original_binding);
                fired.push(ShortcutEvent {
                    id: id.clone(),
                    binding: shortcut.original_binding.clone(),
                    pressed: true,
                });
            }
        }
        fired
    }

    fn on_release(&mut self, key: Key) -> Vec<ShortcutEvent> {
        self.modifiers.update(key, false);
        let current = self.modifiers;

        let mut fired = Vec::new();
        for (id, shortcut) in &self.shortcuts {
            let key_released = shortcut.key == key;
            let modifier_released = current != shortcut.modifiers;

            if (key_released || modifier_released) && self.active.get(id).copied().unwrap_or(false)
            {
                self.active.insert(id.clone(), false);
                debug!("Shortcut released: {} ({})", id, shortcut.original_binding);
                fired.push(ShortcutEvent {
                    id: id.clone(),
                    binding: shortcut.original_binding.clone(),
                    pressed: false,
                });
            }
        }
        fired
    }
}

/// Global key listener backed by `rdev::listen`.
///
/// The hook cannot be removed once installed, so unregistering only empties
/// the shortcut table; events keep flowing but match nothing.
pub struct KeyListenerManager {
    running: Arc<AtomicBool>,
    matcher: Arc<Mutex<ShortcutMatcher>>,
    sender: Sender<DispatchMessage>,
}

impl KeyListenerManager {
    pub fn new(sender: Sender<DispatchMessage>) -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            matcher: Arc::new(Mutex::new(ShortcutMatcher::default())),
            sender,
        }
    }

    /// Start listening for keyboard events on a dedicated thread
    pub fn start(&self) -> Result<(), String> {
        if self.running.swap(true, Ordering::SeqCst) {
            info!("Key listener already running");
            return Ok(());
        }

        info!("Starting key listener");

        let running = self.running.clone();
        let matcher = self.matcher.clone();
        let sender = self.sender.clone();

        std::thread::Builder::new()
            .name("synte-keys".into())
            .spawn(move || {
                let hook_sender = sender.clone();
                let hook_running = running.clone();
                if let Err(e) = rdev::listen(move |event| {
                    if !hook_running.load(Ordering::Relaxed) {
                        return;
                    }
                    // Never block the OS hook; a contended event is dropped
                    let Ok(mut matcher) = matcher.try_lock() else {
                        return;
                    };
                    for shortcut in matcher.handle(&event.event_type) {
                        let _ = hook_sender.send(DispatchMessage::Shortcut(shortcut));
                    }
                }) {
                    error!("Failed to start key listener: {:?}", e);
                    running.store(false, Ordering::SeqCst);
                    let _ = sender.send(DispatchMessage::ListenerFailed(format!("{:?}", e)));
                }
            })
            .map_err(|e| format!("Failed to spawn key listener thread: {}", e))?;

        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl HotkeyRegistry for KeyListenerManager {
    /// Register a shortcut from a string like "ctrl+alt+s" or "caps lock"
    fn register(&self, id: &str, binding: &str) -> Result<(), String> {
        let (key, modifiers) = parse_shortcut_string(binding)?;

        let mut matcher = self.matcher.lock().map_err(|e| e.to_string())?;
        matcher.insert(
            id,
            RegisteredShortcut {
                key,
                modifiers,
                original_binding: binding.to_string(),
            },
        );
        info!("Registered shortcut '{}': {}", id, binding);
        Ok(())
    }

    fn unregister_all(&self) -> Result<(), String> {
        let mut matcher = self.matcher.lock().unwrap_or_else(|e| e.into_inner());
        matcher.clear();
        info!("All shortcuts unregistered");
        Ok(())
    }

    fn registered_ids(&self) -> Vec<String> {
        self.matcher
            .lock()
            .map(|g| g.ids())
            .unwrap_or_default()
    }
}

/// Parse a shortcut string like "ctrl+alt+s" or "caps lock" into key and modifiers.
/// Every shortcut needs exactly one non-modifier key.
pub fn parse_shortcut_string(binding: &str) -> Result<(Key, ModifierState), String> {
    let binding = binding.trim().to_lowercase();

    let mut modifiers = ModifierState::default();
    let mut main_key: Option<Key> = None;

    for part in binding.split('+').map(str::trim) {
        match part {
            "ctrl" | "control" => modifiers.ctrl = true,
            "shift" => modifiers.shift = true,
            "alt" | "option" => modifiers.alt = true,
            "win" | "super" | "meta" | "cmd" | "command" => modifiers.win = true,
            key_str => {
                if main_key.is_some() {
                    return Err(format!(
                        "Multiple main keys in shortcut: already have a key, found '{}'",
                        key_str
                    ));
                }
                main_key = Some(string_to_rdev_key(key_str)?);
            }
        }
    }

    let key = main_key.ok_or_else(|| {
        format!("Shortcut '{}' must contain at least one non-modifier key", binding)
    })?;

    Ok((key, modifiers))
}

const LETTER_KEYS: [Key; 26] = [
    Key::KeyA, Key::KeyB, Key::KeyC, Key::KeyD, Key::KeyE, Key::KeyF, Key::KeyG,
    Key::KeyH, Key::KeyI, Key::KeyJ, Key::KeyK, Key::KeyL, Key::KeyM, Key::KeyN,
    Key::KeyO, Key::KeyP, Key::KeyQ, Key::KeyR, Key::KeyS, Key::KeyT, Key::KeyU,
    Key::KeyV, Key::KeyW, Key::KeyX, Key::KeyY, Key::KeyZ,
];

const DIGIT_KEYS: [Key; 10] = [
    Key::Num0, Key::Num1, Key::Num2, Key::Num3, Key::Num4,
    Key::Num5, Key::Num6, Key::Num7, Key::Num8, Key::Num9,
];

const FUNCTION_KEYS: [Key; 12] = [
    Key::F1, Key::F2, Key::F3, Key::F4, Key::F5, Key::F6,
    Key::F7, Key::F8, Key::F9, Key::F10, Key::F11, Key::F12,
];

/// Convert a key name to an rdev::Key
fn string_to_rdev_key(s: &str) -> Result<Key, String> {
    let mut chars = s.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        if c.is_ascii_lowercase() {
            return Ok(LETTER_KEYS[(c as u8 - b'a') as usize]);
        }
        if c.is_ascii_digit() {
            return Ok(DIGIT_KEYS[(c as u8 - b'0') as usize]);
        }
    }

    if let Some(n) = s.strip_prefix('f').and_then(|n| n.parse::<usize>().ok()) {
        if (1..=FUNCTION_KEYS.len()).contains(&n) {
            return Ok(FUNCTION_KEYS[n - 1]);
        }
    }

    match s {
        "caps lock" | "capslock" | "caps" => Ok(Key::CapsLock),
        "space" | "spacebar" => Ok(Key::Space),
        "enter" | "return" => Ok(Key::Return),
        "tab" => Ok(Key::Tab),
        "backspace" | "back" => Ok(Key::Backspace),
        "escape" | "esc" => Ok(Key::Escape),
        "delete" | "del" => Ok(Key::Delete),
        "insert" | "ins" => Ok(Key::Insert),
        "home" => Ok(Key::Home),
        "end" => Ok(Key::End),
        "pageup" | "page up" | "pgup" => Ok(Key::PageUp),
        "pagedown" | "page down" | "pgdn" => Ok(Key::PageDown),
        "up" | "arrowup" => Ok(Key::UpArrow),
        "down" | "arrowdown" => Ok(Key::DownArrow),
        "left" | "arrowleft" => Ok(Key::LeftArrow),
        "right" | "arrowright" => Ok(Key::RightArrow),
        "`" | "backquote" | "grave" => Ok(Key::BackQuote),
        "-" | "minus" => Ok(Key::Minus),
        "=" | "equal" | "equals" => Ok(Key::Equal),
        "[" | "bracketleft" => Ok(Key::LeftBracket),
        "]" | "bracketright" => Ok(Key::RightBracket),
        "\\" | "backslash" => Ok(Key::BackSlash),
        ";" | "semicolon" => Ok(Key::SemiColon),
        "'" | "quote" | "apostrophe" => Ok(Key::Quote),
        "," | "comma" => Ok(Key::Comma),
        "." | "period" => Ok(Key::Dot),
        "/" | "slash" => Ok(Key::Slash),
        "printscreen" | "print" | "prtsc" => Ok(Key::PrintScreen),
        "scrolllock" | "scroll" => Ok(Key::ScrollLock),
        "pause" | "break" => Ok(Key::Pause),
        _ => Err(format!("Unknown key: '{}'", s)),
    }
}
