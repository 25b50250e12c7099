//! Builder Messages
//!
//! Shared vocabulary between the conversation core and presentation
//! collaborators: turn identity, roles, conversation states, and the push
//! notifications the orchestrator emits.
//!
//! # Design Philosophy
//!
//! Presentation layers (forms, chat panes, headless scripts) hold no protocol
//! logic. They render what arrives as a [`BuilderMessage`] and call back into
//! the orchestrator with `submit_turn` / `cancel`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ErrorClass;
use crate::transport::duplex::ConnectionState;

/// Turn identifier
///
/// Server-assigned for streamed frames that carry an `id`, generated locally
/// otherwise. Unique within one [`ConversationLog`](crate::ConversationLog).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TurnId(pub String);

impl TurnId {
    /// Generate a fresh, locally unique turn ID
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("turn_{}", uuid::Uuid::new_v4().simple()))
    }
}

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TurnId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Who produced a turn
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TurnRole {
    /// The person building the agent
    User,
    /// The remote builder agent
    Agent,
    /// Server-side system notice
    System,
}

impl TurnRole {
    /// Parse a wire role name, case-insensitively
    ///
    /// `assistant` is accepted as an alias for [`TurnRole::Agent`].
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "user" => Some(Self::User),
            "agent" | "assistant" => Some(Self::Agent),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

/// One entry of the conversation log
///
/// Fields are private so a turn cannot change once it has been appended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    id: TurnId,
    role: TurnRole,
    content: String,
}

impl ConversationTurn {
    /// Create a turn
    pub fn new(id: TurnId, role: TurnRole, content: impl Into<String>) -> Self {
        Self {
            id,
            role,
            content: content.into(),
        }
    }

    /// Turn identity
    #[must_use]
    pub fn id(&self) -> &TurnId {
        &self.id
    }

    /// Who produced the turn
    #[must_use]
    pub fn role(&self) -> TurnRole {
        self.role
    }

    /// Turn text
    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }
}

/// Lifecycle of one logical conversation
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConversationState {
    /// No conversation yet, or the last opening request failed retriably
    #[default]
    Idle,
    /// First turn in flight over the event stream
    Streaming,
    /// Duplex turn sent, waiting for the `user_input` control frame
    DuplexWaitingReply,
    /// Ready for the next user turn
    DuplexAcceptingInput,
    /// Conversation cannot continue
    Fatal,
}

impl ConversationState {
    /// Whether a `submit_turn` call would be accepted in this state
    ///
    /// `Streaming` accepts input: a new submission replaces the in-flight
    /// opening request.
    #[must_use]
    pub fn accepts_input(&self) -> bool {
        matches!(
            self,
            Self::Idle | Self::Streaming | Self::DuplexAcceptingInput
        )
    }

    /// Whether the duplex phase has been reached
    #[must_use]
    pub fn is_duplex(&self) -> bool {
        matches!(self, Self::DuplexWaitingReply | Self::DuplexAcceptingInput)
    }

    /// Human-readable description
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Streaming => "Planning...",
            Self::DuplexWaitingReply => "Waiting for reply...",
            Self::DuplexAcceptingInput => "Ready",
            Self::Fatal => "Failed",
        }
    }
}

/// Which transport an event or failure belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportKind {
    /// The one-shot opening event stream
    Stream,
    /// The persistent duplex channel
    Duplex,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stream => write!(f, "stream"),
            Self::Duplex => write!(f, "duplex"),
        }
    }
}

/// Notification levels
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotifyLevel {
    /// Informational
    Info,
    /// Warning
    Warning,
}

/// Messages from the orchestrator to presentation collaborators
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum BuilderMessage {
    /// Conversation state changed
    State {
        /// The new state
        state: ConversationState,
    },

    /// A turn was appended to the log
    TurnAppended {
        /// Position in the log (0-based)
        index: usize,
        /// The appended turn
        turn: ConversationTurn,
    },

    /// Duplex channel state changed
    Channel {
        /// The new channel state
        state: ConnectionState,
    },

    /// A failure the caller may want to show or act on
    Error {
        /// Fatal, retriable, or local validation
        class: ErrorClass,
        /// Transport involved, if any
        transport: Option<TransportKind>,
        /// Error description
        message: String,
    },

    /// Non-error notice (e.g. a frame was dropped)
    Notice {
        /// Severity
        level: NotifyLevel,
        /// Notice text
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_id_unique() {
        let id1 = TurnId::generate();
        let id2 = TurnId::generate();
        assert_ne!(id1, id2);
        assert!(id1.0.starts_with("turn_"));
    }

    #[test]
    fn test_role_parse() {
        assert_eq!(TurnRole::parse("AGENT"), Some(TurnRole::Agent));
        assert_eq!(TurnRole::parse("assistant"), Some(TurnRole::Agent));
        assert_eq!(TurnRole::parse(" user "), Some(TurnRole::User));
        assert_eq!(TurnRole::parse("System"), Some(TurnRole::System));
        assert_eq!(TurnRole::parse("tool"), None);
    }

    #[test]
    fn test_role_wire_format() {
        let json = serde_json::to_string(&TurnRole::Agent).unwrap();
        assert_eq!(json, "\"AGENT\"");
    }

    #[test]
    fn test_state_accepts_input() {
        assert!(ConversationState::Idle.accepts_input());
        assert!(ConversationState::Streaming.accepts_input());
        assert!(ConversationState::DuplexAcceptingInput.accepts_input());
        assert!(!ConversationState::DuplexWaitingReply.accepts_input());
        assert!(!ConversationState::Fatal.accepts_input());
    }

    #[test]
    fn test_state_description() {
        assert_eq!(ConversationState::DuplexAcceptingInput.description(), "Ready");
        assert_eq!(ConversationState::Fatal.description(), "Failed");
    }
}
