use clap::Parser;
use std::path::PathBuf;

/// Command-line overrides. Anything left unset falls back to the settings file.
#[derive(Debug, Parser, Clone, Default)]
#[command(name = "synte", about = "Synt-E hotkey tool", author, version)]
pub struct CliArgs {
    /// Hotkey combination for synthesis (default ctrl+alt+s)
    #[arg(long)]
    pub hotkey: Option<String>,

    /// Hotkey combination for undo (default ctrl+alt+u)
    #[arg(long = "undo-hotkey")]
    pub undo_hotkey: Option<String>,

    /// Hotkey combination that interrupts a running AI call (default ctrl+alt+c)
    #[arg(long = "cancel-hotkey")]
    pub cancel_hotkey: Option<String>,

    /// Hotkey combination that resets a stuck keyboard (default ctrl+alt+q)
    #[arg(long = "emergency-hotkey")]
    pub emergency_hotkey: Option<String>,

    /// Append the synthesis after the original text instead of replacing it
    #[arg(long, default_value_t = false)]
    pub append: bool,

    /// Show detailed logs
    #[arg(long, default_value_t = false)]
    pub verbose: bool,

    /// Model to use
    #[arg(long)]
    pub model: Option<String>,

    /// Maximum length of text to process, in characters
    #[arg(long = "max-chars")]
    pub max_chars: Option<usize>,

    /// Maximum time to wait for the AI, in seconds
    #[arg(long = "timeout-secs")]
    pub timeout_secs: Option<u64>,

    /// How long an undo stays available after a synthesis, in seconds
    #[arg(long = "undo-window-secs")]
    pub undo_window_secs: Option<u64>,

    /// Base URL of the OpenAI-compatible endpoint
    #[arg(long = "base-url")]
    pub base_url: Option<String>,

    /// Settings file to use instead of the one in the config directory
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Disable audible feedback
    #[arg(long = "no-sound", default_value_t = false)]
    pub no_sound: bool,

    /// Check that the AI endpoint is reachable, then exit
    #[arg(long, default_value_t = false)]
    pub check: bool,
}
