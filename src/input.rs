//! Synthetic keyboard input: the paste combination and forced modifier release.

use crate::settings::PasteMethod;
use enigo::{Direction, Enigo, Key, Keyboard, Settings};
use log::{debug, info, warn};
use std::sync::Mutex;
use std::time::Duration;

#[cfg(target_os = "linux")]
use once_cell::sync::Lazy;
#[cfg(target_os = "linux")]
use std::process::Command;

/// Delay between pressing modifiers and the key, and after the combo.
const KEY_SETTLE: Duration = Duration::from_millis(50);

#[cfg(target_os = "macos")]
const PASTE_MODIFIER: Key = Key::Meta;
#[cfg(not(target_os = "macos"))]
const PASTE_MODIFIER: Key = Key::Control;

/// Platform codes for the left and right modifier keys, released individually
/// on top of the generic ones because a stuck side-specific key is what
/// actually survives a crashed paste.
#[cfg(target_os = "windows")]
const SIDED_MODIFIER_CODES: &[u32] = &[
    0x10, 0x11, 0x12, // VK_SHIFT, VK_CONTROL, VK_MENU
    0xA0, 0xA1, // VK_LSHIFT, VK_RSHIFT
    0xA2, 0xA3, // VK_LCONTROL, VK_RCONTROL
    0xA4, 0xA5, // VK_LMENU, VK_RMENU
    0x5B, 0x5C, // VK_LWIN, VK_RWIN
];
#[cfg(all(unix, not(target_os = "macos")))]
const SIDED_MODIFIER_CODES: &[u32] = &[
    0xffe1, 0xffe2, // Shift_L, Shift_R
    0xffe3, 0xffe4, // Control_L, Control_R
    0xffe9, 0xffea, // Alt_L, Alt_R
    0xffeb, 0xffec, // Super_L, Super_R
];
#[cfg(target_os = "macos")]
const SIDED_MODIFIER_CODES: &[u32] = &[
    56, 60, // shift, right shift
    59, 62, // control, right control
    58, 61, // option, right option
    55, 54, // command, right command
];

/// Sends synthetic key events on behalf of the guarded phases.
pub trait KeyInjector: Send + Sync {
    fn send_paste(&self, method: PasteMethod) -> Result<(), String>;

    /// Forces key-up for every modifier, left and right.
    fn release_modifiers(&self) -> Result<(), String>;
}

pub struct EnigoInjector {
    enigo: Mutex<Enigo>,
}

impl EnigoInjector {
    pub fn new() -> Result<Self, String> {
        let enigo = Enigo::new(&Settings::default())
            .map_err(|e| format!("Failed to initialize input injection: {}", e))?;
        Ok(Self {
            enigo: Mutex::new(enigo),
        })
    }

    fn with_enigo<T>(&self, f: impl FnOnce(&mut Enigo) -> Result<T, String>) -> Result<T, String> {
        let mut enigo = self.enigo.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut enigo)
    }
}

fn send_combo(enigo: &mut Enigo, modifiers: &[Key], key: Key) -> Result<(), String> {
    for m in modifiers {
        enigo
            .key(*m, Direction::Press)
            .map_err(|e| format!("Failed to press modifier: {}", e))?;
    }
    std::thread::sleep(KEY_SETTLE);

    let clicked = enigo
        .key(key, Direction::Click)
        .map_err(|e| format!("Failed to click key: {}", e));

    // Modifiers go up even when the click failed
    for m in modifiers.iter().rev() {
        if let Err(e) = enigo.key(*m, Direction::Release) {
            warn!("Failed to release modifier after paste: {}", e);
        }
    }
    clicked
}

impl KeyInjector for EnigoInjector {
    fn send_paste(&self, method: PasteMethod) -> Result<(), String> {
        #[cfg(target_os = "linux")]
        if try_send_key_combo_linux(method)? {
            std::thread::sleep(KEY_SETTLE);
            return Ok(());
        }

        self.with_enigo(|enigo| match method {
            PasteMethod::CtrlV => send_combo(enigo, &[PASTE_MODIFIER], Key::Unicode('v')),
            PasteMethod::CtrlShiftV => {
                send_combo(enigo, &[PASTE_MODIFIER, Key::Shift], Key::Unicode('v'))
            }
            #[cfg(not(target_os = "macos"))]
            PasteMethod::ShiftInsert => send_combo(enigo, &[Key::Shift], Key::Insert),
            #[cfg(target_os = "macos")]
            PasteMethod::ShiftInsert => {
                debug!("Shift+Insert has no macOS equivalent, using Cmd+V");
                send_combo(enigo, &[PASTE_MODIFIER], Key::Unicode('v'))
            }
        })?;

        std::thread::sleep(KEY_SETTLE);
        Ok(())
    }

    fn release_modifiers(&self) -> Result<(), String> {
        self.with_enigo(|enigo| {
            let generic = [Key::Shift, Key::Control, Key::Alt, Key::Meta];
            let sided = SIDED_MODIFIER_CODES.iter().map(|code| Key::Other(*code));

            let mut failures = Vec::new();
            for key in generic.into_iter().chain(sided) {
                if let Err(e) = enigo.key(key, Direction::Release) {
                    failures.push(format!("{:?}: {}", key, e));
                }
            }

            if failures.is_empty() {
                debug!("All modifier keys released");
                Ok(())
            } else {
                Err(format!(
                    "Failed to release {} modifier(s): {}",
                    failures.len(),
                    failures.join(", ")
                ))
            }
        })
    }
}

#[cfg(target_os = "linux")]
pub fn is_wayland() -> bool {
    std::env::var("WAYLAND_DISPLAY").is_ok()
        || std::env::var("XDG_SESSION_TYPE")
            .map(|v| v.to_lowercase() == "wayland")
            .unwrap_or(false)
}

/// External tools that inject key combos more reliably than enigo on Linux.
#[cfg(target_os = "linux")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinuxKeyTool {
    Wtype,
    Dotool,
    Ydotool,
    Xdotool,
}

#[cfg(target_os = "linux")]
fn is_tool_available(name: &str) -> bool {
    Command::new("which")
        .arg(name)
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

/// Resolved once; the session type does not change while we run.
#[cfg(target_os = "linux")]
static LINUX_KEY_TOOL: Lazy<Option<LinuxKeyTool>> = Lazy::new(|| {
    let candidates: &[(LinuxKeyTool, &str)] = if is_wayland() {
        // Wayland: prefer wtype, then dotool, then ydotool
        &[
            (LinuxKeyTool::Wtype, "wtype"),
            (LinuxKeyTool::Dotool, "dotool"),
            (LinuxKeyTool::Ydotool, "ydotool"),
        ]
    } else {
        // X11: prefer xdotool, then ydotool
        &[
            (LinuxKeyTool::Xdotool, "xdotool"),
            (LinuxKeyTool::Ydotool, "ydotool"),
        ]
    };

    let found = candidates
        .iter()
        .find(|(_, name)| is_tool_available(name))
        .map(|(tool, _)| *tool);
    match found {
        Some(tool) => info!("Using {:?} for key combos", tool),
        None => info!("No native key tool found, using enigo for key combos"),
    }
    found
});

/// Returns `Ok(true)` if a native tool handled it, `Ok(false)` to fall back to enigo.
#[cfg(target_os = "linux")]
fn try_send_key_combo_linux(method: PasteMethod) -> Result<bool, String> {
    let Some(tool) = *LINUX_KEY_TOOL else {
        return Ok(false);
    };

    let (program, args): (&str, Vec<&str>) = match tool {
        LinuxKeyTool::Wtype => (
            "wtype",
            match method {
                PasteMethod::CtrlV => vec!["-M", "ctrl", "-k", "v"],
                PasteMethod::ShiftInsert => vec!["-M", "shift", "-k", "Insert"],
                PasteMethod::CtrlShiftV => vec!["-M", "ctrl", "-M", "shift", "-k", "v"],
            },
        ),
        LinuxKeyTool::Dotool => (
            "sh",
            match method {
                PasteMethod::CtrlV => vec!["-c", "echo key ctrl+v | dotool"],
                PasteMethod::ShiftInsert => vec!["-c", "echo key shift+insert | dotool"],
                PasteMethod::CtrlShiftV => vec!["-c", "echo key ctrl+shift+v | dotool"],
            },
        ),
        // ydotool takes input event keycodes: ctrl=29, shift=42, v=47, insert=110
        LinuxKeyTool::Ydotool => (
            "ydotool",
            match method {
                PasteMethod::CtrlV => vec!["key", "29:1", "47:1", "47:0", "29:0"],
                PasteMethod::ShiftInsert => vec!["key", "42:1", "110:1", "110:0", "42:0"],
                PasteMethod::CtrlShiftV => {
                    vec!["key", "29:1", "42:1", "47:1", "47:0", "42:0", "29:0"]
                }
            },
        ),
        LinuxKeyTool::Xdotool => (
            "xdotool",
            match method {
                PasteMethod::CtrlV => vec!["key", "--clearmodifiers", "ctrl+v"],
                PasteMethod::CtrlShiftV => vec!["key", "--clearmodifiers", "ctrl+shift+v"],
                PasteMethod::ShiftInsert => vec!["key", "--clearmodifiers", "shift+Insert"],
            },
        ),
    };

    let output = Command::new(program)
        .args(&args)
        .output()
        .map_err(|e| format!("Failed to execute {:?}: {}", tool, e))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!("{:?} failed: {}", tool, stderr));
    }

    Ok(true)
}
