//! Protocol State Machine
//!
//! Pure, IO-free rendition of the two-phase conversation protocol. Every
//! input is a method call; every side effect the caller must perform comes
//! back as an [`Effect`]. The orchestrator executes effects in order.
//!
//! # States
//!
//! ```text
//!              submit                    stream completed
//!   Idle ───────────────► Streaming ─────────────────────► DuplexAcceptingInput
//!    ▲                     │  │ ▲                              │      ▲
//!    │  retriable / cancel │  │ └─ submit (restart)     submit │      │ user_input
//!    └─────────────────────┘  │                                ▼      │ or channel closed
//!                             │ fatal                   DuplexWaitingReply
//!                             ▼
//!                           Fatal (terminal)
//! ```
//!
//! The conversation log only ever receives turns decoded from transport
//! frames; submitted text is not echoed into it.

use std::fmt;

use serde_json::Value;

use crate::conversation::ConversationLog;
use crate::error::{BuilderError, FailureClass};
use crate::messages::{ConversationState, ConversationTurn, TurnId, TurnRole};
use crate::transport::duplex::{ConnectionState, DuplexInbound};
use crate::transport::stream::{StreamError, StreamEvent, StreamOutcome};
use crate::workflow::WorkflowBinding;

/// Payload keys tried, in order, for a turn's text
const CONTENT_KEYS: [&str; 3] = ["text", "content", "message"];

/// Side effect requested by the state machine
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    /// Start the opening stream for this binding
    OpenStream(WorkflowBinding),
    /// Cancel the in-flight opening stream
    CancelStream,
    /// Create and connect the duplex channel
    OpenDuplex,
    /// Reconnect the existing duplex channel
    ReconnectDuplex,
    /// Send a turn over the duplex channel
    SendDuplex(String),
    /// Close the duplex channel
    CloseDuplex,
}

/// Duplex channel bookkeeping
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DuplexStatus {
    /// Last known channel state
    pub channel: ConnectionState,
    /// Set when the channel closed mid-conversation; the next submit
    /// reconnects before sending
    pub retry_on_next_submit: bool,
}

impl Default for DuplexStatus {
    fn default() -> Self {
        Self {
            channel: ConnectionState::Closed,
            retry_on_next_submit: false,
        }
    }
}

/// Why an inbound frame did not reach the log
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DropReason {
    /// Stream event arrived outside `Streaming`
    NotStreaming,
    /// Duplex frame arrived outside the duplex phase
    NotDuplex,
    /// Payload carried no usable text
    Undecodable,
    /// Turn id already in the log
    Duplicate(TurnId),
    /// `user_input` arrived while input was already unlocked
    AlreadyAccepting,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStreaming => write!(f, "stream event outside the streaming phase"),
            Self::NotDuplex => write!(f, "duplex frame outside the duplex phase"),
            Self::Undecodable => write!(f, "frame carried no turn text"),
            Self::Duplicate(id) => write!(f, "turn {id} already received"),
            Self::AlreadyAccepting => write!(f, "input already unlocked"),
        }
    }
}

/// Result of feeding one inbound frame
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Turn appended at this log index
    Appended(usize),
    /// Control frame unlocked input
    Unlocked,
    /// The duplex channel closed
    ChannelClosed,
    /// Frame dropped
    Ignored(DropReason),
}

/// The protocol state machine
#[derive(Clone, Debug, Default)]
pub struct ProtocolMachine {
    state: ConversationState,
    log: ConversationLog,
    duplex: DuplexStatus,
}

impl ProtocolMachine {
    /// Fresh machine in `Idle` with an empty log
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current conversation state
    #[must_use]
    pub fn state(&self) -> ConversationState {
        self.state
    }

    /// Conversation log
    #[must_use]
    pub fn log(&self) -> &ConversationLog {
        &self.log
    }

    /// Duplex bookkeeping
    #[must_use]
    pub fn duplex_status(&self) -> DuplexStatus {
        self.duplex
    }

    /// User submitted a turn
    ///
    /// # Errors
    ///
    /// [`BuilderError::InputLocked`] while a duplex reply is pending;
    /// [`BuilderError::ConversationFailed`] once the conversation is `Fatal`.
    pub fn submit(&mut self, binding: WorkflowBinding) -> Result<Vec<Effect>, BuilderError> {
        match self.state {
            ConversationState::Idle => {
                self.state = ConversationState::Streaming;
                Ok(vec![Effect::OpenStream(binding)])
            }
            ConversationState::Streaming => {
                // Only one opening request may be live
                Ok(vec![Effect::CancelStream, Effect::OpenStream(binding)])
            }
            ConversationState::DuplexAcceptingInput => {
                let mut effects = Vec::with_capacity(2);
                if self.duplex.retry_on_next_submit || self.duplex.channel != ConnectionState::Open
                {
                    self.duplex.channel = ConnectionState::Connecting;
                    self.duplex.retry_on_next_submit = false;
                    effects.push(Effect::ReconnectDuplex);
                }
                effects.push(Effect::SendDuplex(binding.prompt_text().to_string()));
                self.state = ConversationState::DuplexWaitingReply;
                Ok(effects)
            }
            ConversationState::DuplexWaitingReply => Err(BuilderError::InputLocked),
            ConversationState::Fatal => Err(BuilderError::ConversationFailed),
        }
    }

    /// An event arrived on the opening stream
    pub fn stream_event(&mut self, event: &StreamEvent) -> FrameOutcome {
        if self.state != ConversationState::Streaming {
            return FrameOutcome::Ignored(DropReason::NotStreaming);
        }
        match decode_turn(&event.event_id, &event.payload) {
            Some(turn) => self.append(turn),
            None => FrameOutcome::Ignored(DropReason::Undecodable),
        }
    }

    /// The opening stream ended
    ///
    /// Results arriving outside `Streaming` belong to a cancelled request and
    /// are ignored.
    pub fn stream_finished(
        &mut self,
        result: &Result<StreamOutcome, StreamError>,
    ) -> Vec<Effect> {
        if self.state != ConversationState::Streaming {
            return Vec::new();
        }

        match result {
            Ok(StreamOutcome::Completed) => {
                self.state = ConversationState::DuplexAcceptingInput;
                if self.duplex.channel == ConnectionState::Open {
                    Vec::new()
                } else {
                    self.duplex.channel = ConnectionState::Connecting;
                    vec![Effect::OpenDuplex]
                }
            }
            Ok(StreamOutcome::Cancelled) => {
                self.state = ConversationState::Idle;
                Vec::new()
            }
            Err(err) => {
                self.state = match err.class() {
                    FailureClass::Fatal => ConversationState::Fatal,
                    FailureClass::Retriable => ConversationState::Idle,
                };
                Vec::new()
            }
        }
    }

    /// User cancelled; only the opening stream is cancellable
    pub fn cancel(&mut self) -> Vec<Effect> {
        if self.state == ConversationState::Streaming {
            self.state = ConversationState::Idle;
            vec![Effect::CancelStream]
        } else {
            Vec::new()
        }
    }

    /// Duplex channel reached `Open`
    pub fn channel_opened(&mut self) {
        self.duplex.channel = ConnectionState::Open;
        self.duplex.retry_on_next_submit = false;
    }

    /// Duplex channel closed or failed to open
    pub fn channel_closed(&mut self) {
        self.duplex.channel = ConnectionState::Closed;
        if self.state.is_duplex() {
            self.duplex.retry_on_next_submit = true;
        }
        if self.state == ConversationState::DuplexWaitingReply {
            // Reply will never arrive on this link; let the user resubmit
            self.state = ConversationState::DuplexAcceptingInput;
        }
    }

    /// Sending a turn over the duplex channel failed
    pub fn send_failed(&mut self) {
        self.channel_closed();
    }

    /// A frame arrived on the duplex channel
    pub fn duplex_frame(&mut self, frame: &DuplexInbound) -> FrameOutcome {
        match frame {
            DuplexInbound::Closed { .. } => {
                self.channel_closed();
                FrameOutcome::ChannelClosed
            }
            DuplexInbound::ControlUserInput => match self.state {
                ConversationState::DuplexWaitingReply => {
                    self.state = ConversationState::DuplexAcceptingInput;
                    FrameOutcome::Unlocked
                }
                ConversationState::DuplexAcceptingInput => {
                    FrameOutcome::Ignored(DropReason::AlreadyAccepting)
                }
                _ => FrameOutcome::Ignored(DropReason::NotDuplex),
            },
            DuplexInbound::Text(text) => {
                if !self.state.is_duplex() {
                    return FrameOutcome::Ignored(DropReason::NotDuplex);
                }
                match decode_duplex_frame(text) {
                    Some(turn) => self.append(turn),
                    None => FrameOutcome::Ignored(DropReason::Undecodable),
                }
            }
        }
    }

    /// A transport-independent fatal condition (e.g. unusable endpoint)
    pub fn fail(&mut self) -> Vec<Effect> {
        let effects = self.release();
        self.state = ConversationState::Fatal;
        effects
    }

    /// Conversation is being shut down
    ///
    /// The log survives; a later submit starts a new opening stream.
    pub fn teardown(&mut self) -> Vec<Effect> {
        let effects = self.release();
        if self.state != ConversationState::Fatal {
            self.state = ConversationState::Idle;
        }
        effects
    }

    fn release(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.state == ConversationState::Streaming {
            effects.push(Effect::CancelStream);
        }
        if self.duplex.channel != ConnectionState::Closed || self.state.is_duplex() {
            effects.push(Effect::CloseDuplex);
        }
        self.duplex = DuplexStatus::default();
        effects
    }

    fn append(&mut self, turn: ConversationTurn) -> FrameOutcome {
        match self.log.append(turn) {
            Ok(_) => FrameOutcome::Appended(self.log.len() - 1),
            Err(dup) => FrameOutcome::Ignored(DropReason::Duplicate(dup.0)),
        }
    }
}

/// Decode a streamed event payload into a turn
///
/// Object payloads read `role` (default Agent) and the first of
/// `text`/`content`/`message`; string payloads become Agent turns.
#[must_use]
pub fn decode_turn(event_id: &str, payload: &Value) -> Option<ConversationTurn> {
    let (role, content) = match payload {
        Value::String(text) => (TurnRole::Agent, text.as_str()),
        Value::Object(map) => {
            let role = map
                .get("role")
                .and_then(Value::as_str)
                .and_then(TurnRole::parse)
                .unwrap_or(TurnRole::Agent);
            let content = CONTENT_KEYS
                .iter()
                .find_map(|key| map.get(*key).and_then(Value::as_str))?;
            (role, content)
        }
        _ => return None,
    };

    if content.trim().is_empty() {
        return None;
    }
    Some(ConversationTurn::new(TurnId::from(event_id), role, content))
}

/// Decode a duplex text frame into a turn
///
/// JSON objects may carry their own `id`; anything that is not a JSON object
/// or string is taken verbatim as Agent text.
#[must_use]
pub fn decode_duplex_frame(text: &str) -> Option<ConversationTurn> {
    match serde_json::from_str::<Value>(text) {
        Ok(payload @ Value::Object(_)) => {
            let id = match payload.get("id") {
                Some(Value::String(id)) if !id.is_empty() => TurnId(id.clone()),
                Some(Value::Number(n)) => TurnId(n.to_string()),
                _ => TurnId::generate(),
            };
            decode_turn(&id.0, &payload)
        }
        Ok(payload @ Value::String(_)) => decode_turn(&TurnId::generate().0, &payload),
        _ => {
            if text.trim().is_empty() {
                return None;
            }
            Some(ConversationTurn::new(TurnId::generate(), TurnRole::Agent, text))
        }
    }
}
