//! Console logging: `HH:MM:SS | message` lines on stderr.

use chrono::Local;
use env_filter::Builder as EnvFilterBuilder;
use log::{LevelFilter, Log, Metadata, Record};
use std::sync::atomic::{AtomicBool, Ordering};

/// Dependencies that are noisy below warn.
const QUIET_MODULES: &[&str] = &["reqwest", "hyper", "hyper_util", "rodio", "cpal"];

/// Builds the console filter.
///
/// `rust_log` (the `RUST_LOG` value) wins when it parses; otherwise `fallback`
/// applies. The second value is a warning to emit once logging is up.
pub fn build_console_filter(
    rust_log: Option<&str>,
    fallback: LevelFilter,
) -> (env_filter::Filter, Option<String>) {
    let mut builder = EnvFilterBuilder::new();
    for module in QUIET_MODULES {
        builder.filter_module(module, LevelFilter::Warn);
    }

    let mut warning = None;
    match rust_log {
        Some(filters) if !filters.trim().is_empty() => {
            if let Err(err) = builder.try_parse(filters) {
                warning = Some(format!("Ignoring invalid RUST_LOG value '{}': {}", filters, err));
                builder.filter_level(fallback);
            }
        }
        _ => {
            builder.filter_level(fallback);
        }
    }

    (builder.build(), warning)
}

pub fn format_line(record: &Record) -> String {
    format!("{} | {}", Local::now().format("%H:%M:%S"), record.args())
}

struct ConsoleLogger {
    filter: env_filter::Filter,
}

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.filter.enabled(metadata)
    }

    fn log(&self, record: &Record) {
        if self.filter.matches(record) {
            eprintln!("{}", format_line(record));
        }
    }

    fn flush(&self) {}
}

/// Set when `RUST_LOG` or `--verbose` chose the level; the settings file cannot override it.
static LEVEL_PINNED: AtomicBool = AtomicBool::new(false);

/// Installs the console logger before the settings are read, at info level
/// unless `RUST_LOG` or `verbose` say otherwise.
pub fn init(verbose: bool) -> Result<(), log::SetLoggerError> {
    let rust_log = if verbose {
        None
    } else {
        std::env::var("RUST_LOG").ok()
    };

    // The filter admits everything; the global max level does the gating.
    let (filter, warning) = build_console_filter(rust_log.as_deref(), LevelFilter::Trace);
    let from_env = rust_log.is_some_and(|filters| !filters.trim().is_empty()) && warning.is_none();
    let max_level = if verbose {
        LevelFilter::Debug
    } else if from_env {
        filter.filter()
    } else {
        LevelFilter::Info
    };
    LEVEL_PINNED.store(verbose || from_env, Ordering::SeqCst);

    log::set_boxed_logger(Box::new(ConsoleLogger { filter }))?;
    log::set_max_level(max_level);

    if let Some(warning) = warning {
        log::warn!("{}", warning);
    }
    Ok(())
}

/// Applies the level from the settings file unless the environment pinned one.
pub fn apply_configured_level(level: LevelFilter) {
    if !LEVEL_PINNED.load(Ordering::SeqCst) {
        log::set_max_level(level);
    }
}
