//! Error Taxonomy
//!
//! Transports classify failures as [`FailureClass::Fatal`] or
//! [`FailureClass::Retriable`]; the orchestrator adds
//! [`ErrorClass::LocalValidation`] for problems caught before any network call.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::messages::TransportKind;

/// Classification reported by a transport driver
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureClass {
    /// Non-retriable protocol or server error; ends the conversation
    Fatal,
    /// Transient condition; the caller may resubmit
    Retriable,
}

/// Classification of any error surfaced to the caller
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Conversation ended; input stays locked
    Fatal,
    /// Transient; input is unlocked for resubmission
    Retriable,
    /// Rejected before reaching any transport
    LocalValidation,
}

impl From<FailureClass> for ErrorClass {
    fn from(class: FailureClass) -> Self {
        match class {
            FailureClass::Fatal => Self::Fatal,
            FailureClass::Retriable => Self::Retriable,
        }
    }
}

/// Errors returned by the orchestrator
#[derive(Debug, Clone, Error)]
pub enum BuilderError {
    /// No workflow selection has been bound yet
    #[error("No workflow selected: choose a gallery before starting a conversation")]
    MissingWorkflow,

    /// A field failed local validation
    #[error("Invalid {field}: {message}")]
    Validation {
        /// Offending field
        field: &'static str,
        /// What is wrong with it
        message: String,
    },

    /// A reply is still pending on the duplex channel
    #[error("Input locked: waiting for the builder to reply")]
    InputLocked,

    /// The conversation already failed fatally
    #[error("Conversation has failed and cannot accept more turns")]
    ConversationFailed,

    /// A transport reported a classified failure
    #[error("{transport} transport failed on turn {turn} ({class:?}): {message}")]
    Transport {
        /// Fatal or retriable
        class: FailureClass,
        /// Which transport failed
        transport: TransportKind,
        /// Submission number (1-based) the failure belongs to
        turn: u64,
        /// Failure description
        message: String,
    },
}

impl BuilderError {
    /// Overall classification
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::MissingWorkflow | Self::Validation { .. } | Self::InputLocked => {
                ErrorClass::LocalValidation
            }
            Self::ConversationFailed => ErrorClass::Fatal,
            Self::Transport { class, .. } => (*class).into(),
        }
    }

    /// Whether the caller may resubmit
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        self.class() == ErrorClass::Retriable
    }

    /// Transport involved, if any
    #[must_use]
    pub fn transport(&self) -> Option<TransportKind> {
        match self {
            Self::Transport { transport, .. } => Some(*transport),
            _ => None,
        }
    }
}
