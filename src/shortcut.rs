use log::{error, info, warn};
use std::collections::HashSet;

use crate::managers::key_listener::HotkeyRegistry;
use crate::settings::{
    AppSettings, ShortcutBinding, CANCEL_BINDING, EMERGENCY_RESET_BINDING, SYNTHESIZE_BINDING,
    UNDO_BINDING,
};

/// Bindings that must exist before anything can lock the keyboard.
pub const ESCAPE_HATCH_BINDINGS: [&str; 2] = [EMERGENCY_RESET_BINDING, CANCEL_BINDING];

/// Bindings whose registration failure is fatal.
pub const MAIN_BINDINGS: [&str; 2] = [SYNTHESIZE_BINDING, UNDO_BINDING];

/// Registers every binding, escape hatches first.
///
/// A failing escape hatch is logged and skipped. A failing main binding aborts
/// with the error; the caller is expected to clean up and exit.
pub fn init_shortcuts(registry: &dyn HotkeyRegistry, settings: &AppSettings) -> Result<(), String> {
    let mut in_use = HashSet::new();

    for id in ESCAPE_HATCH_BINDINGS {
        match lookup(settings, id) {
            Ok(binding) => {
                if let Err(e) = register_shortcut(registry, binding, &mut in_use) {
                    error!("Error setting up {} hotkey: {}", binding.name, e);
                }
            }
            Err(e) => error!("{}", e),
        }
    }

    for id in MAIN_BINDINGS {
        let binding = lookup(settings, id)?;
        register_shortcut(registry, binding, &mut in_use).map_err(|e| {
            error!("Failed to register shortcut {} during init: {}", id, e);
            format!("Failed to register '{}' hotkey: {}", binding.name, e)
        })?;
    }

    info!("{} hotkeys active", registry.registered_ids().len());
    Ok(())
}

fn lookup<'a>(settings: &'a AppSettings, id: &str) -> Result<&'a ShortcutBinding, String> {
    settings
        .binding(id)
        .ok_or_else(|| format!("Binding with id '{}' not found", id))
}

pub fn register_shortcut(
    registry: &dyn HotkeyRegistry,
    binding: &ShortcutBinding,
    in_use: &mut HashSet<String>,
) -> Result<(), String> {
    // Validate human-level rules first
    if let Err(e) = validate_shortcut_string(&binding.current_binding) {
        warn!(
            "register_shortcut validation error for binding '{}': {}",
            binding.current_binding, e
        );
        return Err(e);
    }

    // Prevent duplicate registrations that would silently shadow one another
    let normalized = normalize(&binding.current_binding);
    if in_use.contains(&normalized) {
        let error_msg = format!("Shortcut '{}' is already in use", binding.current_binding);
        warn!("register_shortcut duplicate error: {}", error_msg);
        return Err(error_msg);
    }

    registry.register(&binding.id, &binding.current_binding)?;
    in_use.insert(normalized);
    Ok(())
}

fn validate_shortcut_string(raw: &str) -> Result<(), String> {
    let modifiers = [
        "ctrl", "control", "shift", "alt", "option", "meta", "command", "cmd", "super", "win",
    ];
    let has_non_modifier = raw
        .split('+')
        .any(|part| !modifiers.contains(&part.trim().to_lowercase().as_str()));
    if has_non_modifier {
        Ok(())
    } else {
        Err("Shortcut must contain at least one non-modifier key".into())
    }
}

/// Canonical form so "Alt+Ctrl+S" and "ctrl+alt+s" compare equal.
fn normalize(raw: &str) -> String {
    let mut parts: Vec<String> = raw
        .split('+')
        .map(|p| match p.trim().to_lowercase().as_str() {
            "control" => "ctrl".to_string(),
            "option" => "alt".to_string(),
            "meta" | "cmd" | "command" | "super" => "win".to_string(),
            other => other.to_string(),
        })
        .collect();
    parts.sort();
    parts.join("+")
}
