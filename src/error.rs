//! Outcome taxonomy for the synthesis pipeline.
//!
//! Every hotkey-triggered operation ends either in a success value or in one of
//! these variants. None of them terminate the dispatcher; the dispatcher only
//! decides which status line and tone to emit.

use crate::feedback::FeedbackKind;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SynthesisError {
    /// Clipboard empty or too short. The user just has to copy again.
    #[error("no valid text in clipboard: {0}")]
    InvalidInput(String),

    /// User pressed the cancel hotkey while the AI call was outstanding.
    #[error("processing cancelled")]
    Cancelled,

    /// The AI call exceeded its deadline.
    #[error("AI processing timed out after {} seconds", .0.as_secs())]
    Timeout(Duration),

    /// The transformation call itself failed; message is passed through verbatim.
    #[error("{0}")]
    ServiceFault(String),

    /// Another lock-guarded operation was already injecting input.
    #[error("operation '{0}' ignored: keyboard already locked by another operation")]
    LockContention(String),

    /// Clipboard write or keystroke injection failed inside a guarded phase.
    #[error("input fault during '{operation}': {message}")]
    InputFault { operation: String, message: String },

    /// Undo requested without a fresh undo record.
    #[error("undo not available (older than {} seconds)", .0.as_secs())]
    UndoUnavailable(Duration),

    /// The emergency reset itself failed.
    #[error("emergency reset failed: {0}")]
    RecoveryFault(String),
}

impl SynthesisError {
    /// Tone to play for this outcome, if any.
    pub fn feedback(&self) -> Option<FeedbackKind> {
        match self {
            SynthesisError::Cancelled => Some(FeedbackKind::Cancel),
            SynthesisError::LockContention(_) => None,
            // The reset already played the emergency tone.
            SynthesisError::InputFault { .. } | SynthesisError::RecoveryFault(_) => None,
            SynthesisError::InvalidInput(_)
            | SynthesisError::Timeout(_)
            | SynthesisError::ServiceFault(_)
            | SynthesisError::UndoUnavailable(_) => Some(FeedbackKind::Error),
        }
    }

    /// Whether the fault left the input subsystem in a state that needed recovery.
    pub fn needed_recovery(&self) -> bool {
        matches!(
            self,
            SynthesisError::InputFault { .. } | SynthesisError::RecoveryFault(_)
        )
    }
}
