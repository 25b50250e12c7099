//! Orchestrator
//!
//! Binds a workflow selection to turn submission and drives the protocol
//! machine against real (or test) transports. Presentation layers talk to
//! this type only: they call [`Orchestrator::submit_turn`] /
//! [`Orchestrator::cancel`], pump events with [`Orchestrator::next_event`],
//! and render the [`BuilderMessage`]s it pushes.
//!
//! # Concurrency
//!
//! The opening stream runs on its own task and delivers events through a
//! bounded channel; duplex frames arrive on the channel's own receiver.
//! Either way, events are applied one at a time on the caller's task, so the
//! log and state never see interleaved updates.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::config::BuilderConfig;
use crate::conversation::ConversationLog;
use crate::error::{BuilderError, ErrorClass, FailureClass};
use crate::messages::{BuilderMessage, ConversationState, NotifyLevel, TransportKind};
use crate::protocol::{DropReason, Effect, FrameOutcome, ProtocolMachine};
use crate::transport::duplex::{
    duplex_endpoint, ConnectionState, DuplexChannel, DuplexConnector, DuplexError, DuplexInbound,
};
use crate::transport::stream::{StreamError, StreamEvent, StreamOutcome, StreamTransport};
use crate::workflow::{WorkflowBinding, WorkflowSelection};

type StreamResult = Result<StreamOutcome, StreamError>;

/// Counters exposed for callers that want their own retry policy
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OrchestratorStats {
    /// Opening streams started
    pub streams_opened: u64,
    /// Opening streams cancelled (explicitly or by a restart)
    pub streams_cancelled: u64,
    /// Duplex reconnect attempts
    pub reconnects: u64,
    /// Retriable failures since the last success
    pub consecutive_retriable: u32,
    /// Inbound frames that did not reach the log
    pub frames_dropped: u64,
}

/// Handle to the in-flight opening stream
struct StreamHandle {
    token: CancellationToken,
    events: mpsc::Receiver<StreamEvent>,
    done: oneshot::Receiver<StreamResult>,
    turn: u64,
}

enum StreamSignal {
    Event(StreamEvent),
    Finished(StreamResult),
}

impl StreamHandle {
    /// Cancel and release; consuming `self` makes a second cancel impossible
    fn cancel(self) {
        self.token.cancel();
    }

    async fn next(&mut self) -> StreamSignal {
        if let Some(event) = self.events.recv().await {
            return StreamSignal::Event(event);
        }
        // Sender dropped: the driver returned, its result is (or will be) ready
        let result = (&mut self.done).await.unwrap_or_else(|_| {
            Err(StreamError::Interrupted("stream task ended unexpectedly".to_string()))
        });
        StreamSignal::Finished(result)
    }

    fn try_next(&mut self) -> Option<StreamSignal> {
        match self.events.try_recv() {
            Ok(event) => Some(StreamSignal::Event(event)),
            Err(mpsc::error::TryRecvError::Empty) => None,
            Err(mpsc::error::TryRecvError::Disconnected) => match self.done.try_recv() {
                Ok(result) => Some(StreamSignal::Finished(result)),
                Err(oneshot::error::TryRecvError::Empty) => None,
                Err(oneshot::error::TryRecvError::Closed) => {
                    Some(StreamSignal::Finished(Err(StreamError::Interrupted(
                        "stream task ended unexpectedly".to_string(),
                    ))))
                }
            },
        }
    }
}

/// At most one transport is active at a time
enum ActiveTransport<C> {
    None,
    Stream(StreamHandle),
    Duplex(DuplexChannel<C>),
}

enum Signal {
    Stream(StreamSignal),
    Duplex(DuplexInbound),
}

/// The external-facing conversation controller
pub struct Orchestrator<S: StreamTransport, C: DuplexConnector> {
    /// Configuration
    config: BuilderConfig,
    /// Opening stream driver
    stream: Arc<S>,
    /// Duplex link factory
    connector: Arc<C>,
    /// Protocol state and conversation log
    machine: ProtocolMachine,
    /// The one live transport handle
    active: ActiveTransport<C>,
    /// Workflow supplied by the configuration provider
    selection: Option<WorkflowSelection>,
    /// Builder id the conversation's duplex path is bound to
    bound_builder: Option<i64>,
    /// Accepted submissions so far (1-based turn numbers)
    submissions: u64,
    /// Counters
    stats: OrchestratorStats,
    /// Channel to presentation collaborators
    tx: mpsc::Sender<BuilderMessage>,
}

impl<S, C> Orchestrator<S, C>
where
    S: StreamTransport + 'static,
    C: DuplexConnector + 'static,
{
    /// Create an orchestrator with the given transports
    pub fn new(
        stream: S,
        connector: C,
        config: BuilderConfig,
        tx: mpsc::Sender<BuilderMessage>,
    ) -> Self {
        Self {
            config,
            stream: Arc::new(stream),
            connector: Arc::new(connector),
            machine: ProtocolMachine::new(),
            active: ActiveTransport::None,
            selection: None,
            bound_builder: None,
            submissions: 0,
            stats: OrchestratorStats::default(),
            tx,
        }
    }

    /// Bind the workflow used by subsequent submissions
    pub fn select_workflow(&mut self, selection: WorkflowSelection) {
        tracing::info!(
            builder_id = selection.builder_id,
            gallery_id = selection.gallery_id,
            "Workflow selected"
        );
        self.selection = Some(selection);
    }

    /// Forget the workflow; submissions fail until a new one is selected
    pub fn clear_workflow(&mut self) {
        self.selection = None;
    }

    /// Current workflow selection
    #[must_use]
    pub fn workflow(&self) -> Option<&WorkflowSelection> {
        self.selection.as_ref()
    }

    /// Current conversation state
    #[must_use]
    pub fn state(&self) -> ConversationState {
        self.machine.state()
    }

    /// Read-only conversation log
    #[must_use]
    pub fn log(&self) -> &ConversationLog {
        self.machine.log()
    }

    /// Duplex channel state, if a channel exists
    #[must_use]
    pub fn channel_state(&self) -> Option<ConnectionState> {
        match &self.active {
            ActiveTransport::Duplex(channel) => Some(channel.state()),
            _ => None,
        }
    }

    /// Counters
    #[must_use]
    pub fn stats(&self) -> OrchestratorStats {
        self.stats
    }

    /// Submit a user turn
    ///
    /// From `Idle` this opens the event stream; from `Streaming` it replaces
    /// the in-flight request; in the duplex phase it sends over the channel,
    /// reconnecting first if the channel dropped.
    ///
    /// # Errors
    ///
    /// - [`BuilderError::MissingWorkflow`] / [`BuilderError::Validation`]
    ///   before any network call
    /// - [`BuilderError::InputLocked`] while a reply is pending
    /// - [`BuilderError::ConversationFailed`] after a fatal error
    /// - [`BuilderError::Transport`] if the duplex reconnect or send fails
    pub async fn submit_turn(&mut self, text: &str) -> Result<(), BuilderError> {
        let binding = match self.bind(text) {
            Ok(binding) => binding,
            Err(err) => return self.reject(err).await,
        };

        // Apply what already arrived so a queued close is seen before sending
        if let Err(e) = self.poll_transport().await {
            tracing::debug!(error = %e, "Queued transport failure applied before submit");
        }

        let before = self.machine.state();
        let effects = match self.machine.submit(binding) {
            Ok(effects) => effects,
            Err(err) => return self.reject(err).await,
        };

        self.submissions += 1;
        tracing::debug!(turn = self.submissions, state = ?before, "Turn accepted");
        self.sync_state(before).await;
        self.apply_effects(effects).await
    }

    /// Cancel the opening stream; a no-op in any other state
    pub async fn cancel(&mut self) {
        let before = self.machine.state();
        let effects = self.machine.cancel();
        self.sync_state(before).await;
        if let Err(e) = self.apply_effects(effects).await {
            tracing::warn!(error = %e, "Cancel produced an error");
        }
    }

    /// Tear the conversation down, releasing every transport
    pub async fn shutdown(&mut self) {
        let before = self.machine.state();
        let effects = self.machine.teardown();
        self.sync_state(before).await;
        if let Err(e) = self.apply_effects(effects).await {
            tracing::warn!(error = %e, "Shutdown produced an error");
        }
        self.active = ActiveTransport::None;
        self.bound_builder = None;
        tracing::info!("Conversation shut down");
    }

    /// Wait for and apply one transport event
    ///
    /// Returns `Ok(false)` when no transport is active, or when the duplex
    /// channel is closed and nothing from it is still queued.
    ///
    /// # Errors
    ///
    /// Returns [`BuilderError::Transport`] when the event was a failure.
    pub async fn next_event(&mut self) -> Result<bool, BuilderError> {
        let signal = match &mut self.active {
            ActiveTransport::None => return Ok(false),
            ActiveTransport::Stream(handle) => Signal::Stream(handle.next().await),
            ActiveTransport::Duplex(channel) => {
                // A closed channel produces nothing new until the next submit reconnects
                let inbound = if channel.state() == ConnectionState::Closed {
                    channel.try_recv()
                } else {
                    channel.recv().await
                };
                match inbound {
                    Some(inbound) => Signal::Duplex(inbound),
                    None => return Ok(false),
                }
            }
        };
        self.apply_signal(signal).await?;
        Ok(true)
    }

    /// Apply every event already available without waiting
    ///
    /// Returns the number of events applied.
    ///
    /// # Errors
    ///
    /// Stops at, and returns, the first transport failure.
    pub async fn poll_transport(&mut self) -> Result<usize, BuilderError> {
        let mut applied = 0;
        loop {
            let signal = match &mut self.active {
                ActiveTransport::None => None,
                ActiveTransport::Stream(handle) => handle.try_next().map(Signal::Stream),
                ActiveTransport::Duplex(channel) => channel.try_recv().map(Signal::Duplex),
            };
            let Some(signal) = signal else {
                return Ok(applied);
            };
            self.apply_signal(signal).await?;
            applied += 1;
        }
    }

    /// Pump events until input is accepted again or the conversation ends
    ///
    /// # Errors
    ///
    /// Returns the first transport failure encountered.
    pub async fn wait_for_input(&mut self) -> Result<ConversationState, BuilderError> {
        loop {
            let state = self.machine.state();
            if matches!(
                state,
                ConversationState::Idle
                    | ConversationState::DuplexAcceptingInput
                    | ConversationState::Fatal
            ) {
                return Ok(state);
            }
            if !self.next_event().await? {
                return Ok(self.machine.state());
            }
        }
    }

    fn bind(&self, text: &str) -> Result<WorkflowBinding, BuilderError> {
        let selection = self.selection.as_ref().ok_or(BuilderError::MissingWorkflow)?;
        selection.bind(text)
    }

    async fn apply_signal(&mut self, signal: Signal) -> Result<(), BuilderError> {
        match signal {
            Signal::Stream(StreamSignal::Event(event)) => {
                let outcome = self.machine.stream_event(&event);
                self.publish_frame(outcome, TransportKind::Stream).await;
                Ok(())
            }
            Signal::Stream(StreamSignal::Finished(result)) => self.finish_stream(result).await,
            Signal::Duplex(inbound) => {
                let before = self.machine.state();
                let outcome = self.machine.duplex_frame(&inbound);
                if let DuplexInbound::Closed { ref reason } = inbound {
                    tracing::warn!(
                        reason = ?reason,
                        "Duplex channel closed, reconnecting on next turn"
                    );
                    self.send(BuilderMessage::Channel {
                        state: ConnectionState::Closed,
                    })
                    .await;
                }
                self.publish_frame(outcome, TransportKind::Duplex).await;
                self.sync_state(before).await;
                Ok(())
            }
        }
    }

    async fn finish_stream(&mut self, result: StreamResult) -> Result<(), BuilderError> {
        let turn = match std::mem::replace(&mut self.active, ActiveTransport::None) {
            ActiveTransport::Stream(handle) => handle.turn,
            other => {
                self.active = other;
                self.submissions
            }
        };

        let before = self.machine.state();
        let effects = self.machine.stream_finished(&result);
        self.sync_state(before).await;

        match result {
            Ok(outcome) => {
                tracing::info!(outcome = ?outcome, turn, "Planning stream finished");
                self.stats.consecutive_retriable = 0;
                self.apply_effects(effects).await
            }
            Err(err) => {
                let class = err.class();
                let error = BuilderError::Transport {
                    class,
                    transport: TransportKind::Stream,
                    turn,
                    message: err.to_string(),
                };
                self.record_failure(&error).await;
                Err(error)
            }
        }
    }

    async fn apply_effects(&mut self, effects: Vec<Effect>) -> Result<(), BuilderError> {
        for effect in effects {
            match effect {
                Effect::CancelStream => self.cancel_stream(),
                Effect::OpenStream(binding) => self.open_stream(binding),
                Effect::OpenDuplex => self.open_duplex().await?,
                Effect::ReconnectDuplex => self.reconnect_duplex().await?,
                Effect::SendDuplex(text) => self.send_duplex(&text).await?,
                Effect::CloseDuplex => self.close_duplex().await,
            }
        }
        Ok(())
    }

    fn open_stream(&mut self, binding: WorkflowBinding) {
        let token = CancellationToken::new();
        let (event_tx, events) = mpsc::channel(self.config.stream.event_buffer.max(1));
        let (done_tx, done) = oneshot::channel();

        self.bound_builder = Some(binding.builder_id());
        let transport = Arc::clone(&self.stream);
        let driver_token = token.clone();
        tokio::spawn(async move {
            let result = transport.open(&binding, driver_token, event_tx).await;
            let _ = done_tx.send(result);
        });

        self.active = ActiveTransport::Stream(StreamHandle {
            token,
            events,
            done,
            turn: self.submissions,
        });
        self.stats.streams_opened += 1;
        tracing::debug!(turn = self.submissions, "Opening stream started");
    }

    fn cancel_stream(&mut self) {
        match std::mem::replace(&mut self.active, ActiveTransport::None) {
            ActiveTransport::Stream(handle) => {
                tracing::info!(turn = handle.turn, "Cancelling opening stream");
                handle.cancel();
                self.stats.streams_cancelled += 1;
            }
            other => self.active = other,
        }
    }

    async fn open_duplex(&mut self) -> Result<(), BuilderError> {
        let Some(builder_id) = self.bound_builder else {
            return self.fatal_duplex("no builder session bound".to_string()).await;
        };
        let endpoint = match duplex_endpoint(&self.config.server.base_url, builder_id) {
            Ok(endpoint) => endpoint,
            Err(e) => return self.fatal_duplex(e.to_string()).await,
        };

        let channel =
            DuplexChannel::new(Arc::clone(&self.connector), endpoint, &self.config.duplex);
        self.active = ActiveTransport::Duplex(channel);
        self.connect_duplex().await
    }

    async fn reconnect_duplex(&mut self) -> Result<(), BuilderError> {
        if !matches!(self.active, ActiveTransport::Duplex(_)) {
            return self.open_duplex().await;
        }
        self.stats.reconnects += 1;
        tracing::info!(attempt = self.stats.reconnects, "Reconnecting duplex channel");
        self.connect_duplex().await
    }

    async fn connect_duplex(&mut self) -> Result<(), BuilderError> {
        self.send(BuilderMessage::Channel {
            state: ConnectionState::Connecting,
        })
        .await;

        let result = match &mut self.active {
            ActiveTransport::Duplex(channel) => channel.connect().await,
            _ => return Ok(()),
        };

        match result {
            Ok(()) => {
                self.machine.channel_opened();
                self.send(BuilderMessage::Channel {
                    state: ConnectionState::Open,
                })
                .await;
                Ok(())
            }
            Err(e) => {
                let before = self.machine.state();
                self.machine.channel_closed();
                self.send(BuilderMessage::Channel {
                    state: ConnectionState::Closed,
                })
                .await;
                self.sync_state(before).await;
                let error = self.duplex_error(FailureClass::Retriable, e.to_string());
                self.record_failure(&error).await;
                Err(error)
            }
        }
    }

    async fn send_duplex(&mut self, text: &str) -> Result<(), BuilderError> {
        let result = match &mut self.active {
            ActiveTransport::Duplex(channel) => channel.send(text).await,
            _ => Err(DuplexError::NotOpen(ConnectionState::Closed)),
        };

        match result {
            Ok(()) => {
                tracing::debug!(turn = self.submissions, "Turn sent over duplex channel");
                self.stats.consecutive_retriable = 0;
                Ok(())
            }
            Err(e) => {
                let before = self.machine.state();
                self.machine.send_failed();
                self.send(BuilderMessage::Channel {
                    state: ConnectionState::Closed,
                })
                .await;
                self.sync_state(before).await;
                let error = self.duplex_error(FailureClass::Retriable, e.to_string());
                self.record_failure(&error).await;
                Err(error)
            }
        }
    }

    async fn close_duplex(&mut self) {
        match std::mem::replace(&mut self.active, ActiveTransport::None) {
            ActiveTransport::Duplex(mut channel) => {
                channel.close().await;
                self.send(BuilderMessage::Channel {
                    state: ConnectionState::Closed,
                })
                .await;
            }
            other => self.active = other,
        }
    }

    async fn fatal_duplex(&mut self, message: String) -> Result<(), BuilderError> {
        let before = self.machine.state();
        let effects = self.machine.fail();
        self.sync_state(before).await;
        for effect in effects {
            match effect {
                Effect::CancelStream => self.cancel_stream(),
                Effect::CloseDuplex => self.close_duplex().await,
                _ => {}
            }
        }
        let error = self.duplex_error(FailureClass::Fatal, message);
        self.record_failure(&error).await;
        Err(error)
    }

    fn duplex_error(&self, class: FailureClass, message: String) -> BuilderError {
        BuilderError::Transport {
            class,
            transport: TransportKind::Duplex,
            turn: self.submissions,
            message,
        }
    }

    /// Log, count and surface a transport failure
    async fn record_failure(&mut self, error: &BuilderError) {
        match error.class() {
            ErrorClass::Fatal => {
                tracing::error!(error = %error, "Conversation failed");
            }
            ErrorClass::Retriable => {
                self.stats.consecutive_retriable += 1;
                tracing::warn!(
                    error = %error,
                    consecutive = self.stats.consecutive_retriable,
                    "Retriable failure, input unlocked"
                );
            }
            ErrorClass::LocalValidation => {}
        }
        self.send_error(error).await;
    }

    async fn reject(&self, error: BuilderError) -> Result<(), BuilderError> {
        tracing::debug!(error = %error, "Submission rejected");
        self.send_error(&error).await;
        Err(error)
    }

    async fn publish_frame(&mut self, outcome: FrameOutcome, transport: TransportKind) {
        match outcome {
            FrameOutcome::Appended(index) => {
                if let Some(turn) = self.machine.log().turns().get(index).cloned() {
                    tracing::debug!(index, id = %turn.id(), %transport, "Turn appended");
                    self.send(BuilderMessage::TurnAppended { index, turn }).await;
                }
            }
            FrameOutcome::Unlocked => {
                tracing::debug!("Input unlocked by control frame");
            }
            FrameOutcome::ChannelClosed => {}
            FrameOutcome::Ignored(DropReason::AlreadyAccepting) => {
                tracing::debug!("Repeated user_input control frame");
            }
            FrameOutcome::Ignored(reason) => {
                self.stats.frames_dropped += 1;
                tracing::warn!(%reason, %transport, "Dropped inbound frame");
                self.notify(NotifyLevel::Warning, &format!("Dropped {transport} frame: {reason}"))
                    .await;
            }
        }
    }

    /// Emit a state notification if the machine moved
    async fn sync_state(&self, before: ConversationState) {
        let state = self.machine.state();
        if state != before {
            tracing::info!(from = ?before, to = ?state, "Conversation state changed");
            self.send(BuilderMessage::State { state }).await;
        }
    }

    async fn send_error(&self, error: &BuilderError) {
        self.send(BuilderMessage::Error {
            class: error.class(),
            transport: error.transport(),
            message: error.to_string(),
        })
        .await;
    }

    async fn notify(&self, level: NotifyLevel, message: &str) {
        self.send(BuilderMessage::Notice {
            level,
            message: message.to_string(),
        })
        .await;
    }

    /// Send a message to the presentation layer
    async fn send(&self, msg: BuilderMessage) {
        if let Err(e) = self.tx.send(msg).await {
            tracing::warn!("Failed to send message to presentation layer: {}", e);
        }
    }
}

impl<S: StreamTransport, C: DuplexConnector> Drop for Orchestrator<S, C> {
    fn drop(&mut self) {
        if let ActiveTransport::Stream(handle) = &self.active {
            handle.token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use url::Url;

    use super::*;
    use crate::transport::duplex::{DuplexLink, DuplexSink};

    /// Stream that sends one turn and completes
    struct OneTurnStream;

    #[async_trait]
    impl StreamTransport for OneTurnStream {
        async fn open(
            &self,
            _binding: &WorkflowBinding,
            _cancel: CancellationToken,
            sink: mpsc::Sender<StreamEvent>,
        ) -> Result<StreamOutcome, StreamError> {
            let _ = sink
                .send(StreamEvent {
                    event_id: "1".to_string(),
                    event: "message".to_string(),
                    payload: serde_json::json!({"role": "AGENT", "text": "On it"}),
                })
                .await;
            Ok(StreamOutcome::Completed)
        }
    }

    /// Connector that always succeeds and records outbound frames
    #[derive(Default)]
    struct EchoConnector {
        sent: Arc<Mutex<Vec<String>>>,
    }

    struct EchoLink {
        sent: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl DuplexConnector for EchoConnector {
        async fn connect(
            &self,
            _endpoint: &Url,
            _sink: DuplexSink,
        ) -> Result<Box<dyn DuplexLink>, DuplexError> {
            Ok(Box::new(EchoLink {
                sent: Arc::clone(&self.sent),
            }))
        }
    }

    #[async_trait]
    impl DuplexLink for EchoLink {
        async fn send_text(&mut self, text: String) -> Result<(), DuplexError> {
            self.sent.lock().unwrap().push(text);
            Ok(())
        }

        async fn close(&mut self) {}
    }

    fn orchestrator() -> (
        Orchestrator<OneTurnStream, EchoConnector>,
        mpsc::Receiver<BuilderMessage>,
    ) {
        let (tx, rx) = mpsc::channel(100);
        let orchestrator = Orchestrator::new(
            OneTurnStream,
            EchoConnector::default(),
            BuilderConfig::default(),
            tx,
        );
        (orchestrator, rx)
    }

    #[tokio::test]
    async fn test_orchestrator_creation() {
        let (orchestrator, _rx) = orchestrator();
        assert_eq!(orchestrator.state(), ConversationState::Idle);
        assert!(orchestrator.log().is_empty());
        assert!(orchestrator.channel_state().is_none());
        assert!(orchestrator.workflow().is_none());
    }

    #[tokio::test]
    async fn test_submit_without_workflow_is_local_validation() {
        let (mut orchestrator, mut rx) = orchestrator();
        let err = orchestrator.submit_turn("hello").await.unwrap_err();
        assert!(matches!(err, BuilderError::MissingWorkflow));
        assert_eq!(orchestrator.state(), ConversationState::Idle);
        assert_eq!(orchestrator.stats().streams_opened, 0);

        let msg = rx.recv().await.unwrap();
        assert!(matches!(
            msg,
            BuilderMessage::Error {
                class: ErrorClass::LocalValidation,
                transport: None,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_first_turn_reaches_duplex() {
        let (mut orchestrator, _rx) = orchestrator();
        orchestrator.select_workflow(WorkflowSelection::new(7, 3));
        orchestrator.submit_turn("create an agent").await.unwrap();
        assert_eq!(orchestrator.state(), ConversationState::Streaming);

        let state = orchestrator.wait_for_input().await.unwrap();
        assert_eq!(state, ConversationState::DuplexAcceptingInput);
        assert_eq!(orchestrator.log().len(), 1);
        assert_eq!(orchestrator.channel_state(), Some(ConnectionState::Open));
    }

    #[tokio::test]
    async fn test_clear_workflow() {
        let (mut orchestrator, _rx) = orchestrator();
        orchestrator.select_workflow(WorkflowSelection::new(1, 1));
        orchestrator.clear_workflow();
        assert!(matches!(
            orchestrator.submit_turn("x").await,
            Err(BuilderError::MissingWorkflow)
        ));
    }

    #[tokio::test]
    async fn test_shutdown_closes_channel() {
        let (mut orchestrator, _rx) = orchestrator();
        orchestrator.select_workflow(WorkflowSelection::new(7, 3));
        orchestrator.submit_turn("create an agent").await.unwrap();
        orchestrator.wait_for_input().await.unwrap();

        orchestrator.shutdown().await;
        assert_eq!(orchestrator.state(), ConversationState::Idle);
        assert!(orchestrator.channel_state().is_none());
        assert_eq!(orchestrator.log().len(), 1);
    }
}
