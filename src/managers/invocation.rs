//! AI Invocation Task
//!
//! Runs the transformation call on a single-worker background runtime and
//! waits for whichever comes first: cancellation, the hard deadline, or the
//! call's completion. Every invocation ends in exactly one terminal status and
//! nothing is raised past this boundary.

use crate::cancellation::AiCancellation;
use crate::error::SynthesisError;
use crate::llm_client::{TextTransformer, TransformRequest};
use log::{debug, error, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub const TRUNCATION_MARKER: &str = "... [truncated]";

/// Chatty models sometimes announce the answer before giving it.
pub const BOILERPLATE_PREFIX: &str = "Here is the Synt-E:";

static CODE_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*```[A-Za-z0-9_+-]*[ \t]*$").expect("code fence pattern should compile")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationStatus {
    Running,
    Completed,
    Cancelled,
    TimedOut,
    Failed,
}

/// Record of one AI call. Created when a request begins, never resumed.
#[derive(Debug, Clone)]
pub struct AiInvocation {
    pub input_text: String,
    pub truncated: bool,
    pub started_at: Instant,
    pub deadline: Instant,
    pub status: InvocationStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationOutcome {
    Completed(String),
    Cancelled,
    TimedOut(Duration),
    Failed(String),
}

impl InvocationOutcome {
    pub fn status(&self) -> InvocationStatus {
        match self {
            InvocationOutcome::Completed(_) => InvocationStatus::Completed,
            InvocationOutcome::Cancelled => InvocationStatus::Cancelled,
            InvocationOutcome::TimedOut(_) => InvocationStatus::TimedOut,
            InvocationOutcome::Failed(_) => InvocationStatus::Failed,
        }
    }

    pub fn into_result(self) -> Result<String, SynthesisError> {
        match self {
            InvocationOutcome::Completed(text) => Ok(text),
            InvocationOutcome::Cancelled => Err(SynthesisError::Cancelled),
            InvocationOutcome::TimedOut(limit) => Err(SynthesisError::Timeout(limit)),
            InvocationOutcome::Failed(msg) => Err(SynthesisError::ServiceFault(msg)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InvocationConfig {
    pub model: String,
    pub system_prompt: String,
    pub max_chars: usize,
    pub timeout: Duration,
}

/// Caps `text` at `max_chars` characters, appending the truncation marker.
pub fn prepare_payload(text: &str, max_chars: usize) -> (String, bool) {
    let len = text.chars().count();
    if len <= max_chars {
        return (text.to_string(), false);
    }

    let mut capped: String = text.chars().take(max_chars).collect();
    capped.push_str(TRUNCATION_MARKER);
    (capped, true)
}

/// Cosmetic cleanup of model chattiness; the payload itself stays opaque.
pub fn clean_model_output(raw: &str) -> String {
    let without_fences = CODE_FENCE.replace_all(raw, "");
    let without_ticks = without_fences.replace('`', "");
    let trimmed = without_ticks.trim();
    trimmed
        .strip_prefix(BOILERPLATE_PREFIX)
        .unwrap_or(trimmed)
        .trim()
        .to_string()
}

pub struct AiInvoker {
    runtime: tokio::runtime::Runtime,
    transformer: Arc<dyn TextTransformer>,
    cancellation: Arc<AiCancellation>,
    config: InvocationConfig,
    in_flight: AtomicBool,
    last: Mutex<Option<AiInvocation>>,
}

impl AiInvoker {
    pub fn new(
        transformer: Arc<dyn TextTransformer>,
        cancellation: Arc<AiCancellation>,
        config: InvocationConfig,
    ) -> anyhow::Result<Self> {
        // One worker: a second call can never run alongside the first
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("synte-ai")
            .enable_all()
            .build()?;

        Ok(Self {
            runtime,
            transformer,
            cancellation,
            config,
            in_flight: AtomicBool::new(false),
            last: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &InvocationConfig {
        &self.config
    }

    /// Runs a future on the background runtime from a non-runtime thread.
    pub fn block_on<F: std::future::Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn last_invocation(&self) -> Option<AiInvocation> {
        self.last.lock().ok().and_then(|g| g.clone())
    }

    /// Transforms `text`, blocking the calling thread until a terminal status.
    pub fn invoke(&self, text: &str) -> InvocationOutcome {
        let token = self.cancellation.reset();

        let (payload, truncated) = prepare_payload(text, self.config.max_chars);
        if truncated {
            warn!(
                "Text too long ({} > {} characters). Truncated.",
                text.chars().count(),
                self.config.max_chars
            );
        }

        info!("Sending to {}...", self.config.model);
        debug!(
            "Starting AI processing (text: {} characters)...",
            payload.chars().count()
        );

        let started_at = Instant::now();
        let limit = self.config.timeout;
        self.set_last(AiInvocation {
            input_text: payload.clone(),
            truncated,
            started_at,
            deadline: started_at + limit,
            status: InvocationStatus::Running,
        });
        self.in_flight.store(true, Ordering::SeqCst);

        let request = TransformRequest {
            model: self.config.model.clone(),
            system_instructions: self.config.system_prompt.clone(),
            user_text: payload,
        };
        let call = self.runtime.spawn(self.transformer.transform(request));
        let abort = call.abort_handle();

        let outcome = self.runtime.block_on(async {
            tokio::select! {
                // Cancellation is checked first on every wake-up
                biased;

                _ = token.cancelled() => {
                    // Abandon the call without waiting for it to unwind
                    abort.abort();
                    warn!("AI PROCESSING CANCELLED BY USER!");
                    InvocationOutcome::Cancelled
                }
                joined = tokio::time::timeout(limit, call) => match joined {
                    Err(_) => {
                        abort.abort();
                        error!("AI processing timeout ({} seconds)", limit.as_secs());
                        InvocationOutcome::TimedOut(limit)
                    }
                    Ok(Err(join_err)) => InvocationOutcome::Failed(format!("AI task failed: {}", join_err)),
                    Ok(Ok(Err(msg))) => InvocationOutcome::Failed(msg),
                    Ok(Ok(Ok(raw))) => InvocationOutcome::Completed(raw),
                }
            }
        });

        // A cancel that lands between completion and this check still wins
        let cancelled = token.is_cancelled();
        if !cancelled && matches!(outcome, InvocationOutcome::Completed(_)) {
            info!(
                "AI processed in {:.1} seconds",
                started_at.elapsed().as_secs_f32()
            );
        }
        let outcome = settle(outcome, cancelled);

        self.in_flight.store(false, Ordering::SeqCst);
        if let Ok(mut last) = self.last.lock() {
            if let Some(record) = last.as_mut() {
                record.status = outcome.status();
            }
        }

        outcome
    }

    fn set_last(&self, record: AiInvocation) {
        if let Ok(mut last) = self.last.lock() {
            *last = Some(record);
        }
    }
}

/// Final status of an invocation once the wait is over. A completed call is
/// discarded if cancellation was observed by then.
fn settle(outcome: InvocationOutcome, cancelled: bool) -> InvocationOutcome {
    match outcome {
        InvocationOutcome::Completed(_) if cancelled => {
            warn!("Processing completed but cancellation was requested. Ignoring result.");
            InvocationOutcome::Cancelled
        }
        InvocationOutcome::Completed(raw) => {
            let cleaned = clean_model_output(&raw);
            if cleaned.is_empty() {
                InvocationOutcome::Failed("model returned an empty response".to_string())
            } else {
                InvocationOutcome::Completed(cleaned)
            }
        }
        InvocationOutcome::Failed(msg) => {
            error!("AI call failed: {}", msg);
            InvocationOutcome::Failed(msg)
        }
        other => other,
    }
}
