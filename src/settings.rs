use crate::cli::CliArgs;
use log::{debug, info, warn};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const SETTINGS_DIR_NAME: &str = "synte";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const API_KEY_ENV: &str = "SYNTE_API_KEY";

pub const SYNTHESIZE_BINDING: &str = "synthesize";
pub const UNDO_BINDING: &str = "undo";
pub const CANCEL_BINDING: &str = "cancel";
pub const EMERGENCY_RESET_BINDING: &str = "emergency_reset";

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

// Accepts both the numeric format (1-5) and the string format ("trace", "debug", etc.)
impl<'de> Deserialize<'de> for LogLevel {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct LogLevelVisitor;

        impl<'de> Visitor<'de> for LogLevelVisitor {
            type Value = LogLevel;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("a string or integer representing log level")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<LogLevel, E> {
                match value.to_lowercase().as_str() {
                    "trace" => Ok(LogLevel::Trace),
                    "debug" => Ok(LogLevel::Debug),
                    "info" => Ok(LogLevel::Info),
                    "warn" => Ok(LogLevel::Warn),
                    "error" => Ok(LogLevel::Error),
                    _ => Err(E::unknown_variant(
                        value,
                        &["trace", "debug", "info", "warn", "error"],
                    )),
                }
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<LogLevel, E> {
                match value {
                    1 => Ok(LogLevel::Trace),
                    2 => Ok(LogLevel::Debug),
                    3 => Ok(LogLevel::Info),
                    4 => Ok(LogLevel::Warn),
                    5 => Ok(LogLevel::Error),
                    _ => Err(E::invalid_value(de::Unexpected::Unsigned(value), &"1-5")),
                }
            }
        }

        deserializer.deserialize_any(LogLevelVisitor)
    }
}

impl From<LogLevel> for log::LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => log::LevelFilter::Trace,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Error => log::LevelFilter::Error,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ShortcutBinding {
    pub id: String,
    pub name: String,
    pub description: String,
    pub default_binding: String,
    pub current_binding: String,
}

/// How the AI result lands in the target application.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisMode {
    /// The result replaces the selection.
    #[default]
    Replace,
    /// The result is pasted after the original text, behind a separator.
    Append,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PasteMethod {
    #[default]
    CtrlV,
    CtrlShiftV,
    ShiftInsert,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AppSettings {
    #[serde(default)]
    pub bindings: HashMap<String, ShortcutBinding>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Only needed for hosted endpoints. `SYNTE_API_KEY` takes precedence when set.
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default)]
    pub mode: SynthesisMode,
    #[serde(default = "default_append_separator")]
    pub append_separator: String,
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_ai_timeout_secs")]
    pub ai_timeout_secs: u64,
    #[serde(default = "default_undo_window_secs")]
    pub undo_window_secs: u64,
    #[serde(default = "default_restore_delay_ms")]
    pub restore_delay_ms: u64,
    #[serde(default = "default_emergency_settle_ms")]
    pub emergency_settle_ms: u64,
    #[serde(default)]
    pub paste_method: PasteMethod,
    #[serde(default = "default_true")]
    pub audio_feedback: bool,
    #[serde(default = "default_audio_feedback_volume")]
    pub audio_feedback_volume: f32,
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,
}

fn default_model() -> String {
    "gpt-oss:20b".to_string()
}

fn default_base_url() -> String {
    "http://localhost:11434/v1".to_string()
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.trim().to_string()
}

fn default_append_separator() -> String {
    "\n--- Synt-E: ".to_string()
}

fn default_max_chars() -> usize {
    5000
}

fn default_ai_timeout_secs() -> u64 {
    120
}

fn default_undo_window_secs() -> u64 {
    10
}

fn default_restore_delay_ms() -> u64 {
    1000
}

fn default_emergency_settle_ms() -> u64 {
    500
}

fn default_true() -> bool {
    true
}

fn default_audio_feedback_volume() -> f32 {
    1.0
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

const DEFAULT_SYSTEM_PROMPT: &str = r#"
CRITICAL ROLE: You are a Synt-E compiler. Translate user requests into token-efficient, single-line commands using ONLY the official ontology.

--- OUTPUT RULES (STRICT) ---
1.  **FORMAT:** `key1:value1 key2:value2` (space-separated, NO commas/brackets)
2.  **REQUIRED KEYS:** task (ALWAYS first), then other relevant keys
3.  **OFFICIAL ONTOLOGY:** task, topic, target, format, lang, style, action, filter, exclude, quantity, details, os, platform, product, theme, event, audience, content
4.  **KEY PRIORITY:**
    - Use SPECIFIC keys first (task, lang, format)
    - Use `details:` ONLY for uncategorizable info
    - NEVER invent new keys
5.  **VALUES:** snake_case, lowercase, NO quotes/brackets
6.  **NO EXPLANATIONS:** Output ONLY the final command string

--- CRITICAL EXAMPLES ---
User: "I want an image of a red dragon with golden wings"
AI: task:generate_image topic:red_dragon details:golden_wings

User: "Write python code that connects to a database on port 5432"
AI: task:code lang:python action:connect_database details:port_5432

User: "My website visits have plummeted. Prepare a report."
AI: task:analyze_data topic:website_traffic task:create_report target:team

User: "Create a markdown table with 3 columns: name, age, city"
AI: task:create_table format:markdown details:columns_name_age_city quantity:3
"#;

fn binding(id: &str, name: &str, description: &str, default_binding: &str) -> ShortcutBinding {
    ShortcutBinding {
        id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        default_binding: default_binding.to_string(),
        current_binding: default_binding.to_string(),
    }
}

pub fn get_default_settings() -> AppSettings {
    let mut bindings = HashMap::new();
    for b in [
        binding(
            SYNTHESIZE_BINDING,
            "Synthesize",
            "Replaces the copied text with its Synt-E command.",
            "ctrl+alt+s",
        ),
        binding(
            UNDO_BINDING,
            "Undo",
            "Pastes the original text back shortly after a synthesis.",
            "ctrl+alt+u",
        ),
        binding(
            CANCEL_BINDING,
            "Cancel",
            "Interrupts a running AI call.",
            "ctrl+alt+c",
        ),
        binding(
            EMERGENCY_RESET_BINDING,
            "Emergency Reset",
            "Unbinds all hotkeys and releases stuck modifier keys.",
            "ctrl+alt+q",
        ),
    ] {
        bindings.insert(b.id.clone(), b);
    }

    AppSettings {
        bindings,
        model: default_model(),
        base_url: default_base_url(),
        api_key: String::new(),
        system_prompt: default_system_prompt(),
        mode: SynthesisMode::default(),
        append_separator: default_append_separator(),
        max_chars: default_max_chars(),
        ai_timeout_secs: default_ai_timeout_secs(),
        undo_window_secs: default_undo_window_secs(),
        restore_delay_ms: default_restore_delay_ms(),
        emergency_settle_ms: default_emergency_settle_ms(),
        paste_method: PasteMethod::default(),
        audio_feedback: true,
        audio_feedback_volume: default_audio_feedback_volume(),
        log_level: default_log_level(),
    }
}

impl AppSettings {
    pub fn binding(&self, id: &str) -> Option<&ShortcutBinding> {
        self.bindings.get(id)
    }

    fn set_binding(&mut self, id: &str, combo: &str) {
        if let Some(b) = self.bindings.get_mut(id) {
            b.current_binding = combo.to_string();
        }
    }

    pub fn ai_timeout(&self) -> Duration {
        Duration::from_secs(self.ai_timeout_secs)
    }

    pub fn undo_window(&self) -> Duration {
        Duration::from_secs(self.undo_window_secs)
    }

    pub fn restore_delay(&self) -> Duration {
        Duration::from_millis(self.restore_delay_ms)
    }

    pub fn emergency_settle(&self) -> Duration {
        Duration::from_millis(self.emergency_settle_ms)
    }

    /// The key from the environment wins over the one in the file.
    pub fn resolved_api_key(&self) -> String {
        std::env::var(API_KEY_ENV)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .unwrap_or_else(|| self.api_key.clone())
    }

    /// Applies command-line overrides on top of the file values.
    pub fn apply_cli(&mut self, args: &CliArgs) {
        if let Some(combo) = &args.hotkey {
            self.set_binding(SYNTHESIZE_BINDING, combo);
        }
        if let Some(combo) = &args.undo_hotkey {
            self.set_binding(UNDO_BINDING, combo);
        }
        if let Some(combo) = &args.cancel_hotkey {
            self.set_binding(CANCEL_BINDING, combo);
        }
        if let Some(combo) = &args.emergency_hotkey {
            self.set_binding(EMERGENCY_RESET_BINDING, combo);
        }
        if args.append {
            self.mode = SynthesisMode::Append;
        }
        if let Some(model) = &args.model {
            self.model = model.clone();
        }
        if let Some(max_chars) = args.max_chars {
            self.max_chars = max_chars;
        }
        if let Some(secs) = args.timeout_secs {
            self.ai_timeout_secs = secs;
        }
        if let Some(secs) = args.undo_window_secs {
            self.undo_window_secs = secs;
        }
        if let Some(url) = &args.base_url {
            self.base_url = url.clone();
        }
        if args.no_sound {
            self.audio_feedback = false;
        }
        if args.verbose {
            self.log_level = LogLevel::Debug;
        }
    }
}

pub fn default_settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(SETTINGS_DIR_NAME).join(SETTINGS_FILE_NAME))
}

/// Reads the settings file, creating it with defaults when missing.
///
/// A file that fails to parse is left untouched and the defaults are used,
/// so a typo never costs the user their configuration.
pub fn load_or_create_app_settings(path: &Path) -> AppSettings {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let default_settings = get_default_settings();
            match write_settings(path, &default_settings) {
                Ok(()) => info!("Created default settings at {}", path.display()),
                Err(e) => warn!("Could not write default settings: {}", e),
            }
            return default_settings;
        }
        Err(e) => {
            warn!("Failed to read settings from {}: {}", path.display(), e);
            return get_default_settings();
        }
    };

    match serde_json::from_str::<AppSettings>(&contents) {
        Ok(mut settings) => {
            debug!("Found existing settings at {}", path.display());
            let mut updated = false;

            // Merge default bindings into existing settings
            for (key, value) in get_default_settings().bindings {
                if !settings.bindings.contains_key(&key) {
                    debug!("Adding missing binding: {}", key);
                    settings.bindings.insert(key, value);
                    updated = true;
                }
            }

            if updated {
                if let Err(e) = write_settings(path, &settings) {
                    warn!("Could not update settings file: {}", e);
                }
            }
            settings
        }
        Err(e) => {
            warn!("Failed to parse settings: {}", e);
            get_default_settings()
        }
    }
}

pub fn write_settings(path: &Path, settings: &AppSettings) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create {}: {}", parent.display(), e))?;
    }
    let json = serde_json::to_string_pretty(settings)
        .map_err(|e| format!("Failed to serialize settings: {}", e))?;
    std::fs::write(path, json).map_err(|e| format!("Failed to write {}: {}", path.display(), e))
}
