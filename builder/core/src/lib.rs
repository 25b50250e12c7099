//! Builder Core - Headless Conversation Engine for the Agent Builder
//!
//! This crate drives the conversational agent-builder protocol: the first
//! prompt opens a server-sent event stream, every later turn travels over a
//! persistent WebSocket. It has no presentation dependencies; a CLI, TUI or
//! test harness renders what it emits.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                  Presentation collaborators                   │
//! │        (agent-builder CLI, chat panes, scripted tests)        │
//! └──────────────┬──────────────────────────────▲────────────────┘
//!                │ submit_turn / cancel         │ BuilderMessage
//! ┌──────────────┼──────────────────────────────┼────────────────┐
//! │              ▼        BUILDER CORE          │                 │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │                     Orchestrator                        │  │
//! │  │   ┌───────────────────┐     ┌────────────────────────┐  │  │
//! │  │   │  ProtocolMachine  │     │   ConversationLog      │  │  │
//! │  │   │  (pure, effects)  │────►│   (append-only)        │  │  │
//! │  │   └───────────────────┘     └────────────────────────┘  │  │
//! │  └───────────┬──────────────────────────────┬─────────────┘  │
//! │              ▼                              ▼                │
//! │   ┌─────────────────────┐       ┌───────────────────────┐    │
//! │   │ HttpStreamDriver    │       │ DuplexChannel         │    │
//! │   │ POST /teams/plan    │       │ ws(s)://…/teams/ws/id │    │
//! │   │ (reqwest + SSE)     │       │ (tokio-tungstenite)   │    │
//! │   └─────────────────────┘       └───────────────────────┘    │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`Orchestrator`]: the controller presentation layers talk to
//! - [`ProtocolMachine`]: IO-free state machine returning [`Effect`]s
//! - [`ConversationLog`]: ordered, append-only record of received turns
//! - [`BuilderMessage`]: notifications pushed to presentation layers
//! - [`BuilderError`]: failures classified Fatal / Retriable / LocalValidation
//!
//! # Quick Start
//!
//! ```ignore
//! use builder_core::{
//!     load_config, HttpStreamDriver, Orchestrator, WorkflowSelection, WsConnector,
//! };
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config()?;
//!     let stream = HttpStreamDriver::new(&config.server.base_url, &config.stream)?;
//!     let (tx, mut rx) = mpsc::channel(100);
//!
//!     let mut orchestrator = Orchestrator::new(stream, WsConnector, config, tx);
//!     orchestrator.select_workflow(WorkflowSelection::new(7, 3));
//!     orchestrator.submit_turn("create an agent that triages support tickets").await?;
//!     orchestrator.wait_for_input().await?;
//!
//!     while let Ok(msg) = rx.try_recv() {
//!         // Render message
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`messages`]: turn identity, roles, states and notifications
//! - [`conversation`]: the conversation log
//! - [`workflow`]: workflow selection and per-request binding
//! - [`transport`]: SSE decoding, the streaming driver, the duplex channel
//! - [`protocol`]: the protocol state machine
//! - [`orchestrator`]: the external-facing controller
//! - [`config`]: TOML / environment configuration
//! - [`error`]: the error taxonomy

#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod conversation;
pub mod error;
pub mod messages;
pub mod orchestrator;
pub mod protocol;
pub mod transport;
pub mod workflow;

// Re-exports for convenience
pub use conversation::{ConversationLog, DuplicateTurn};
pub use error::{BuilderError, ErrorClass, FailureClass};
pub use messages::{
    BuilderMessage, ConversationState, ConversationTurn, NotifyLevel, TransportKind, TurnId,
    TurnRole,
};
pub use orchestrator::{Orchestrator, OrchestratorStats};
pub use protocol::{
    decode_duplex_frame, decode_turn, DropReason, DuplexStatus, Effect, FrameOutcome,
    ProtocolMachine,
};
pub use workflow::{validate_prompt, WorkflowBinding, WorkflowSelection};

// Transport exports
#[cfg(feature = "websocket")]
pub use transport::WsConnector;
pub use transport::{
    duplex_endpoint, ConnectionState, DuplexChannel, DuplexConnector, DuplexError, DuplexInbound,
    DuplexLink, DuplexSink, EndpointError, HttpStreamDriver, SseDecoder, SseFrame, StreamError,
    StreamEvent, StreamOutcome, StreamTransport,
};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, BuilderConfig, BuilderToml,
    ConfigError, ConfigOverrides, ConfigSource, DuplexConfig, ServerConfig, StreamConfig,
};
