pub mod actions;
pub mod active_app;
pub mod cancellation;
pub mod cli;
pub mod clipboard;
pub mod dispatcher;
pub mod emergency;
pub mod error;
pub mod feedback;
pub mod input;
pub mod llm_client;
pub mod logging;
pub mod managers;
pub mod operation_lock;
pub mod settings;
pub mod shortcut;
pub mod undo;

#[cfg(test)]
mod test_support;

use actions::{EngineOptions, EngineParts, SynthesisEngine};
use anyhow::{anyhow, Context};
use cancellation::AiCancellation;
use cli::CliArgs;
use clipboard::SystemClipboard;
use dispatcher::{DispatchMessage, HotkeyDispatcher};
use emergency::EmergencyReset;
use feedback::TonePlayer;
use input::EnigoInjector;
use llm_client::LlmTransformer;
use log::{debug, error, info, warn};
use managers::invocation::{AiInvoker, InvocationConfig};
use managers::key_listener::KeyListenerManager;
use operation_lock::OperationLock;
use settings::{
    AppSettings, SynthesisMode, CANCEL_BINDING, EMERGENCY_RESET_BINDING, SYNTHESIZE_BINDING,
    UNDO_BINDING,
};
use std::path::Path;
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::time::Duration;

/// How long the startup check waits for the model list.
const REACHABILITY_TIMEOUT: Duration = Duration::from_secs(10);

pub fn run(args: CliArgs) -> anyhow::Result<()> {
    logging::init(args.verbose).context("Failed to initialize logging")?;

    let settings_path = match &args.config {
        Some(path) => path.clone(),
        None => settings::default_settings_path()
            .context("Could not determine the configuration directory")?,
    };
    let mut app_settings = settings::load_or_create_app_settings(&settings_path);
    app_settings.apply_cli(&args);
    logging::apply_configured_level(app_settings.log_level.into());

    let transformer = Arc::new(
        LlmTransformer::new(&app_settings.base_url, &app_settings.resolved_api_key())
            .map_err(anyhow::Error::msg)?,
    );
    let cancellation = Arc::new(AiCancellation::new());
    let invoker = AiInvoker::new(
        transformer.clone(),
        cancellation.clone(),
        InvocationConfig {
            model: app_settings.model.clone(),
            system_prompt: app_settings.system_prompt.clone(),
            max_chars: app_settings.max_chars,
            timeout: app_settings.ai_timeout(),
        },
    )
    .context("Failed to start the AI runtime")?;

    if args.check {
        return check_endpoint(&invoker, &transformer, &app_settings);
    }

    let clipboard = Arc::new(SystemClipboard::new().map_err(anyhow::Error::msg)?);
    let injector = Arc::new(EnigoInjector::new().map_err(anyhow::Error::msg)?);
    let feedback = Arc::new(TonePlayer::new(
        app_settings.audio_feedback,
        app_settings.audio_feedback_volume,
    ));
    let lock = Arc::new(OperationLock::new());

    let (sender, receiver) = mpsc::channel();
    let listener = Arc::new(KeyListenerManager::new(sender.clone()));
    let emergency = Arc::new(EmergencyReset::new(
        lock.clone(),
        listener.clone(),
        injector.clone(),
        feedback.clone(),
        app_settings.emergency_settle(),
    ));

    let engine = Arc::new(SynthesisEngine::new(
        EngineParts {
            clipboard,
            injector,
            feedback,
            lock,
            cancellation,
            invoker,
            emergency,
        },
        EngineOptions::from_settings(&app_settings),
    ));

    // Every fatal exit from here on runs the exit cleanup first
    if let Err(e) = check_endpoint(engine.invoker(), &transformer, &app_settings) {
        return Err(abort_startup(&engine, e));
    }

    print_banner(&app_settings, &settings_path);

    if let Err(e) = shortcut::init_shortcuts(listener.as_ref(), &app_settings) {
        return Err(abort_startup(&engine, anyhow!(e)));
    }
    if let Err(e) = listener.start() {
        return Err(abort_startup(&engine, anyhow!(e)));
    }
    if let Err(e) = install_signal_handler(sender.clone()) {
        return Err(abort_startup(&engine, e));
    }

    HotkeyDispatcher::new(engine, listener, app_settings, sender, receiver)
        .run()
        .map_err(anyhow::Error::msg)
}

/// Runs the exit cleanup for a fatal startup error and hands the error back.
fn abort_startup(engine: &SynthesisEngine, err: anyhow::Error) -> anyhow::Error {
    if let Err(cleanup) = engine.shutdown() {
        error!("Cleanup incomplete: {}", cleanup);
    }
    err
}

fn check_endpoint(
    invoker: &AiInvoker,
    transformer: &LlmTransformer,
    settings: &AppSettings,
) -> anyhow::Result<()> {
    debug!("Checking connection to {}...", settings.base_url);

    let models = invoker.block_on(async {
        tokio::time::timeout(
            REACHABILITY_TIMEOUT,
            llm_client::fetch_models(transformer.client(), transformer.base_url()),
        )
        .await
    });

    let reason = match models {
        Ok(Ok(models)) => {
            info!("AI server at {} is active and reachable.", settings.base_url);
            if !models.is_empty() && !models.iter().any(|m| m == &settings.model) {
                warn!(
                    "Model '{}' is not in the server's model list: {}",
                    settings.model,
                    models.join(", ")
                );
            }
            return Ok(());
        }
        Ok(Err(e)) => e,
        Err(_) => format!("no answer within {} seconds", REACHABILITY_TIMEOUT.as_secs()),
    };

    error!("AI server not reachable at {}: {}", settings.base_url, reason);
    error!("Make sure the server is running (for Ollama: 'ollama serve')");
    Err(anyhow!("AI server not reachable at {}: {}", settings.base_url, reason))
}

fn hotkey<'a>(settings: &'a AppSettings, id: &str) -> &'a str {
    settings
        .binding(id)
        .map(|b| b.current_binding.as_str())
        .unwrap_or("<unbound>")
}

fn print_banner(settings: &AppSettings, settings_path: &Path) {
    let rule = "=".repeat(60);
    info!("{}", rule);
    info!("SYNT-E v{}", env!("CARGO_PKG_VERSION"));
    info!("Model: {} at {}", settings.model, settings.base_url);
    info!(
        "Mode: {}",
        match settings.mode {
            SynthesisMode::Replace => "replace the copied text",
            SynthesisMode::Append => "append after the copied text",
        }
    );
    info!(
        "Max length: {} characters | AI timeout: {}s | Undo window: {}s",
        settings.max_chars, settings.ai_timeout_secs, settings.undo_window_secs
    );
    info!("Settings: {}", settings_path.display());
    info!("{}", "-".repeat(60));
    info!("HOW TO USE:");
    info!("  1. Select the text in any application");
    info!("  2. COPY it with Ctrl+C");
    info!("  3. Press {} to synthesize", hotkey(settings, SYNTHESIZE_BINDING));
    info!(
        "  4. Press {} within {} seconds to undo",
        hotkey(settings, UNDO_BINDING),
        settings.undo_window_secs
    );
    info!(
        "  {} cancels a running AI call",
        hotkey(settings, CANCEL_BINDING)
    );
    info!(
        "  {} resets a stuck keyboard",
        hotkey(settings, EMERGENCY_RESET_BINDING)
    );
    info!("  Ctrl+C in this window exits");
    info!("{}", rule);
}

#[cfg(unix)]
fn install_signal_handler(sender: Sender<DispatchMessage>) -> anyhow::Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals =
        Signals::new([SIGINT, SIGTERM]).context("Failed to install signal handlers")?;
    std::thread::Builder::new()
        .name("synte-signals".into())
        .spawn(move || {
            if let Some(signal) = signals.forever().next() {
                debug!("Received signal {}", signal);
                let _ = sender.send(DispatchMessage::Shutdown);
            }
        })
        .context("Failed to spawn signal thread")?;
    Ok(())
}

/// Ctrl+C, Ctrl+Break, closing the console window and logoff/shutdown all
/// end in the same cleanup.
#[cfg(windows)]
fn install_signal_handler(sender: Sender<DispatchMessage>) -> anyhow::Result<()> {
    use tokio::signal::windows::{ctrl_break, ctrl_c, ctrl_close, ctrl_logoff, ctrl_shutdown};

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build signal runtime")?;
    let (mut interrupt, mut brk, mut close, mut logoff, mut shutdown) = runtime
        .block_on(async {
            Ok::<_, std::io::Error>((
                ctrl_c()?,
                ctrl_break()?,
                ctrl_close()?,
                ctrl_logoff()?,
                ctrl_shutdown()?,
            ))
        })
        .context("Failed to install console handlers")?;

    std::thread::Builder::new()
        .name("synte-signals".into())
        .spawn(move || {
            let event = runtime.block_on(async {
                tokio::select! {
                    _ = interrupt.recv() => "Ctrl+C",
                    _ = brk.recv() => "Ctrl+Break",
                    _ = close.recv() => "console close",
                    _ = logoff.recv() => "logoff",
                    _ = shutdown.recv() => "system shutdown",
                }
            });
            debug!("Received {}", event);
            let _ = sender.send(DispatchMessage::Shutdown);
        })
        .context("Failed to spawn signal thread")?;
    Ok(())
}
