//! Duplex Channel
//!
//! Persistent bidirectional channel used for every turn after the opening
//! stream. Outbound turns are JSON `{"message": "..."}`; inbound frames are
//! either reply turns or the literal control frame `user_input`, which
//! re-enables input.
//!
//! # Architecture
//!
//! ```text
//! DuplexChannel ──connect──► DuplexConnector ──► DuplexLink (outbound)
//!       ▲                          │
//!       └──── DuplexEvent ◄── DuplexSink (inbound, tagged by generation)
//! ```
//!
//! Every connect attempt gets a new generation number. Events from an older
//! link are dropped, so a late close from a replaced socket can never close
//! the current one.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use url::Url;

use super::{join_segments, EndpointError};
use crate::config::DuplexConfig;

/// Control frame that unlocks input
pub const CONTROL_USER_INPUT: &str = "user_input";

/// Connection state of the duplex channel
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Handshake in progress
    Connecting,
    /// Ready to send and receive
    Open,
    /// Closed by either side, or never established
    Closed,
}

/// Derive the duplex endpoint for a builder session
///
/// `http` maps to `ws`, `https` to `wss`; the path becomes
/// `<base path>/teams/ws/<builder_id>`.
///
/// # Errors
///
/// Returns [`EndpointError`] for schemes other than http(s)/ws(s) or for
/// URLs that cannot carry a path.
pub fn duplex_endpoint(base_url: &Url, builder_id: i64) -> Result<Url, EndpointError> {
    let scheme = match base_url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(EndpointError::UnsupportedScheme {
                url: base_url.to_string(),
                scheme: other.to_string(),
            })
        }
    };

    let id = builder_id.to_string();
    let mut url = join_segments(base_url, &["teams", "ws", &id])?;
    url.set_scheme(scheme)
        .map_err(|()| EndpointError::UnsupportedScheme {
            url: base_url.to_string(),
            scheme: scheme.to_string(),
        })?;
    Ok(url)
}

/// Duplex channel errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DuplexError {
    /// Send attempted while the channel is not open
    #[error("Duplex channel is not open (state: {0:?})")]
    NotOpen(ConnectionState),

    /// Handshake failed or timed out
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Writing to the open link failed
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Outbound message could not be encoded
    #[error("Encoding failed: {0}")]
    Encode(String),
}

/// What a link reported
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DuplexEventKind {
    /// A text frame
    Text(String),
    /// The link closed
    Closed {
        /// Close reason, if the peer gave one
        reason: Option<String>,
    },
}

/// Event reported by a link, tagged with the connect attempt it belongs to
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DuplexEvent {
    /// Connect attempt number
    pub generation: u64,
    /// Event payload
    pub kind: DuplexEventKind,
}

/// Handle a link uses to report inbound frames and closure
#[derive(Clone, Debug)]
pub struct DuplexSink {
    generation: u64,
    tx: mpsc::Sender<DuplexEvent>,
}

impl DuplexSink {
    /// Create a sink tagging events with `generation`
    #[must_use]
    pub fn new(generation: u64, tx: mpsc::Sender<DuplexEvent>) -> Self {
        Self { generation, tx }
    }

    /// Report a text frame; `false` if the channel is gone
    pub async fn text(&self, text: String) -> bool {
        self.tx
            .send(DuplexEvent {
                generation: self.generation,
                kind: DuplexEventKind::Text(text),
            })
            .await
            .is_ok()
    }

    /// Report that the link closed
    pub async fn closed(&self, reason: Option<String>) {
        let _ = self
            .tx
            .send(DuplexEvent {
                generation: self.generation,
                kind: DuplexEventKind::Closed { reason },
            })
            .await;
    }
}

/// Establishes duplex links
#[async_trait]
pub trait DuplexConnector: Send + Sync {
    /// Connect to `endpoint`; inbound traffic is reported through `sink`
    ///
    /// # Errors
    ///
    /// Returns [`DuplexError::ConnectionFailed`] when the handshake fails.
    async fn connect(
        &self,
        endpoint: &Url,
        sink: DuplexSink,
    ) -> Result<Box<dyn DuplexLink>, DuplexError>;
}

/// Outbound half of an established link
#[async_trait]
pub trait DuplexLink: Send {
    /// Write one text frame
    ///
    /// # Errors
    ///
    /// Returns [`DuplexError::SendFailed`] if the link is broken.
    async fn send_text(&mut self, text: String) -> Result<(), DuplexError>;

    /// Close the link
    async fn close(&mut self);
}

/// Inbound frame after control-frame detection
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DuplexInbound {
    /// The `user_input` control frame
    ControlUserInput,
    /// A reply frame
    Text(String),
    /// The channel closed
    Closed {
        /// Close reason, if any
        reason: Option<String>,
    },
}

#[derive(Serialize)]
struct OutboundMessage<'a> {
    message: &'a str,
}

/// Encode an outbound turn
///
/// # Errors
///
/// Returns [`DuplexError::Encode`] if serialization fails.
pub fn encode_outbound(message: &str) -> Result<String, DuplexError> {
    serde_json::to_string(&OutboundMessage { message }).map_err(|e| DuplexError::Encode(e.to_string()))
}

/// The persistent duplex channel for one conversation
pub struct DuplexChannel<C> {
    connector: Arc<C>,
    endpoint: Url,
    state: ConnectionState,
    link: Option<Box<dyn DuplexLink>>,
    generation: u64,
    events_tx: mpsc::Sender<DuplexEvent>,
    events_rx: mpsc::Receiver<DuplexEvent>,
    connect_timeout: Duration,
}

impl<C: DuplexConnector> DuplexChannel<C> {
    /// Create a channel for `endpoint`; call [`connect`](Self::connect) next
    #[must_use]
    pub fn new(connector: Arc<C>, endpoint: Url, config: &DuplexConfig) -> Self {
        let (events_tx, events_rx) = mpsc::channel(config.event_buffer.max(1));
        Self {
            connector,
            endpoint,
            state: ConnectionState::Connecting,
            link: None,
            generation: 0,
            events_tx,
            events_rx,
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
        }
    }

    /// Current connection state
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Endpoint this channel connects to
    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Open (or reopen) the link
    ///
    /// A no-op when already open. Any previous link is dropped first and its
    /// late events are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`DuplexError::ConnectionFailed`]; the channel is then `Closed`.
    pub async fn connect(&mut self) -> Result<(), DuplexError> {
        if self.state == ConnectionState::Open {
            return Ok(());
        }
        if let Some(mut stale) = self.link.take() {
            stale.close().await;
        }

        self.generation += 1;
        self.state = ConnectionState::Connecting;
        let sink = DuplexSink::new(self.generation, self.events_tx.clone());

        tracing::debug!(endpoint = %self.endpoint, generation = self.generation, "Connecting duplex channel");

        let result = tokio::time::timeout(
            self.connect_timeout,
            self.connector.connect(&self.endpoint, sink),
        )
        .await;

        match result {
            Ok(Ok(link)) => {
                self.link = Some(link);
                self.state = ConnectionState::Open;
                tracing::info!(endpoint = %self.endpoint, "Duplex channel open");
                Ok(())
            }
            Ok(Err(e)) => {
                self.state = ConnectionState::Closed;
                tracing::warn!(endpoint = %self.endpoint, error = %e, "Duplex connect failed");
                Err(e)
            }
            Err(_) => {
                self.state = ConnectionState::Closed;
                tracing::warn!(endpoint = %self.endpoint, "Duplex connect timed out");
                Err(DuplexError::ConnectionFailed(format!(
                    "timed out after {}ms",
                    self.connect_timeout.as_millis()
                )))
            }
        }
    }

    /// Send one turn as `{"message": ...}`
    ///
    /// # Errors
    ///
    /// [`DuplexError::NotOpen`] if the channel is not open; a failed write
    /// closes the channel and returns [`DuplexError::SendFailed`].
    pub async fn send(&mut self, message: &str) -> Result<(), DuplexError> {
        if self.state != ConnectionState::Open {
            return Err(DuplexError::NotOpen(self.state));
        }
        let payload = encode_outbound(message)?;
        let Some(link) = self.link.as_mut() else {
            return Err(DuplexError::NotOpen(self.state));
        };

        if let Err(e) = link.send_text(payload).await {
            tracing::warn!(error = %e, "Duplex send failed, closing channel");
            self.mark_closed();
            return Err(e);
        }
        Ok(())
    }

    /// Wait for the next inbound frame from the current link
    pub async fn recv(&mut self) -> Option<DuplexInbound> {
        loop {
            let event = self.events_rx.recv().await?;
            if let Some(inbound) = self.accept(event) {
                return Some(inbound);
            }
        }
    }

    /// Take the next inbound frame without waiting
    pub fn try_recv(&mut self) -> Option<DuplexInbound> {
        loop {
            let event = self.events_rx.try_recv().ok()?;
            if let Some(inbound) = self.accept(event) {
                return Some(inbound);
            }
        }
    }

    /// Close the channel; idempotent
    pub async fn close(&mut self) {
        if let Some(mut link) = self.link.take() {
            link.close().await;
        }
        if self.state != ConnectionState::Closed {
            tracing::info!(endpoint = %self.endpoint, "Duplex channel closed");
        }
        self.mark_closed();
    }

    fn mark_closed(&mut self) {
        self.link = None;
        self.state = ConnectionState::Closed;
        // Anything still queued from this link is now stale
        self.generation += 1;
    }

    fn accept(&mut self, event: DuplexEvent) -> Option<DuplexInbound> {
        if event.generation != self.generation {
            tracing::debug!(
                generation = event.generation,
                current = self.generation,
                "Dropping event from stale duplex link"
            );
            return None;
        }

        match event.kind {
            DuplexEventKind::Text(text) if text.trim() == CONTROL_USER_INPUT => {
                Some(DuplexInbound::ControlUserInput)
            }
            DuplexEventKind::Text(text) => Some(DuplexInbound::Text(text)),
            DuplexEventKind::Closed { reason } => {
                tracing::info!(reason = ?reason, "Duplex channel closed by peer");
                self.mark_closed();
                Some(DuplexInbound::Closed { reason })
            }
        }
    }
}

impl<C> std::fmt::Debug for DuplexChannel<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuplexChannel")
            .field("endpoint", &self.endpoint.as_str())
            .field("state", &self.state)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

#[cfg(feature = "websocket")]
pub use ws::WsConnector;

#[cfg(feature = "websocket")]
mod ws {
    use async_trait::async_trait;
    use futures::stream::SplitSink;
    use futures::{SinkExt, StreamExt};
    use tokio::net::TcpStream;
    use tokio::task::JoinHandle;
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
    use url::Url;

    use super::{DuplexConnector, DuplexError, DuplexLink, DuplexSink};

    type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

    /// WebSocket connector (tokio-tungstenite)
    #[derive(Clone, Copy, Debug, Default)]
    pub struct WsConnector;

    #[async_trait]
    impl DuplexConnector for WsConnector {
        async fn connect(
            &self,
            endpoint: &Url,
            sink: DuplexSink,
        ) -> Result<Box<dyn DuplexLink>, DuplexError> {
            let (stream, _response) = connect_async(endpoint.as_str())
                .await
                .map_err(|e| DuplexError::ConnectionFailed(e.to_string()))?;
            let (writer, mut reader) = stream.split();

            let reader_task = tokio::spawn(async move {
                let reason = loop {
                    match reader.next().await {
                        Some(Ok(Message::Text(text))) => {
                            if !sink.text(text).await {
                                return;
                            }
                        }
                        Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                            Ok(text) => {
                                if !sink.text(text).await {
                                    return;
                                }
                            }
                            Err(_) => tracing::warn!("Dropping non-UTF-8 binary frame"),
                        },
                        Some(Ok(Message::Close(frame))) => {
                            break frame.map(|f| f.reason.to_string()).filter(|r| !r.is_empty());
                        }
                        // Ping/pong are answered by tungstenite
                        Some(Ok(_)) => {}
                        Some(Err(e)) => break Some(e.to_string()),
                        None => break None,
                    }
                };
                sink.closed(reason).await;
            });

            Ok(Box::new(WsLink {
                writer,
                reader_task,
            }))
        }
    }

    struct WsLink {
        writer: SplitSink<WsStream, Message>,
        reader_task: JoinHandle<()>,
    }

    #[async_trait]
    impl DuplexLink for WsLink {
        async fn send_text(&mut self, text: String) -> Result<(), DuplexError> {
            self.writer
                .send(Message::Text(text))
                .await
                .map_err(|e| DuplexError::SendFailed(e.to_string()))
        }

        async fn close(&mut self) {
            if let Err(e) = self.writer.close().await {
                tracing::debug!(error = %e, "WebSocket close handshake failed");
            }
            self.reader_task.abort();
        }
    }

    impl Drop for WsLink {
        fn drop(&mut self) {
            self.reader_task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use pretty_assertions::assert_eq;

    /// Connector whose links record sends and expose their sink
    #[derive(Default)]
    struct RecordingConnector {
        sent: Arc<Mutex<Vec<String>>>,
        sinks: Mutex<Vec<DuplexSink>>,
        refuse: Mutex<bool>,
    }

    struct RecordingLink {
        sent: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl DuplexConnector for RecordingConnector {
        async fn connect(
            &self,
            _endpoint: &Url,
            sink: DuplexSink,
        ) -> Result<Box<dyn DuplexLink>, DuplexError> {
            if *self.refuse.lock().unwrap() {
                return Err(DuplexError::ConnectionFailed("refused".to_string()));
            }
            self.sinks.lock().unwrap().push(sink);
            Ok(Box::new(RecordingLink {
                sent: Arc::clone(&self.sent),
            }))
        }
    }

    #[async_trait]
    impl DuplexLink for RecordingLink {
        async fn send_text(&mut self, text: String) -> Result<(), DuplexError> {
            self.sent.lock().unwrap().push(text);
            Ok(())
        }

        async fn close(&mut self) {}
    }

    fn channel(connector: &Arc<RecordingConnector>) -> DuplexChannel<RecordingConnector> {
        let endpoint = Url::parse("ws://localhost:8081/api/teams/ws/7").unwrap();
        DuplexChannel::new(Arc::clone(connector), endpoint, &DuplexConfig::default())
    }

    fn sink(connector: &RecordingConnector, index: usize) -> DuplexSink {
        connector.sinks.lock().unwrap()[index].clone()
    }

    #[test]
    fn test_endpoint_derivation() {
        let http = Url::parse("http://localhost:8081/api").unwrap();
        assert_eq!(
            duplex_endpoint(&http, 7).unwrap().as_str(),
            "ws://localhost:8081/api/teams/ws/7"
        );

        let https = Url::parse("https://studio.example.com/").unwrap();
        assert_eq!(
            duplex_endpoint(&https, 42).unwrap().as_str(),
            "wss://studio.example.com/teams/ws/42"
        );

        let ftp = Url::parse("ftp://example.com/").unwrap();
        assert!(matches!(
            duplex_endpoint(&ftp, 1),
            Err(EndpointError::UnsupportedScheme { .. })
        ));
    }

    #[test]
    fn test_outbound_encoding() {
        assert_eq!(
            encode_outbound("add a search tool").unwrap(),
            r#"{"message":"add a search tool"}"#
        );
    }

    #[tokio::test]
    async fn test_send_before_open_is_an_error() {
        let connector = Arc::new(RecordingConnector::default());
        let mut channel = channel(&connector);
        assert_eq!(channel.state(), ConnectionState::Connecting);

        let err = channel.send("hi").await.unwrap_err();
        assert_eq!(err, DuplexError::NotOpen(ConnectionState::Connecting));
        assert!(connector.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_connect_send_and_control_frame() {
        let connector = Arc::new(RecordingConnector::default());
        let mut channel = channel(&connector);
        channel.connect().await.unwrap();
        assert_eq!(channel.state(), ConnectionState::Open);

        channel.send("add a search tool").await.unwrap();
        assert_eq!(
            connector.sent.lock().unwrap().clone(),
            vec![r#"{"message":"add a search tool"}"#.to_string()]
        );

        let link_sink = sink(&connector, 0);
        assert!(link_sink.text("Added.".to_string()).await);
        assert!(link_sink.text("user_input".to_string()).await);

        assert_eq!(channel.recv().await, Some(DuplexInbound::Text("Added.".to_string())));
        assert_eq!(channel.recv().await, Some(DuplexInbound::ControlUserInput));
    }

    #[tokio::test]
    async fn test_peer_close_marks_channel_closed() {
        let connector = Arc::new(RecordingConnector::default());
        let mut channel = channel(&connector);
        channel.connect().await.unwrap();

        sink(&connector, 0).closed(Some("going away".to_string())).await;
        assert_eq!(
            channel.recv().await,
            Some(DuplexInbound::Closed {
                reason: Some("going away".to_string())
            })
        );
        assert_eq!(channel.state(), ConnectionState::Closed);
        assert!(matches!(
            channel.send("again").await,
            Err(DuplexError::NotOpen(ConnectionState::Closed))
        ));
    }

    #[tokio::test]
    async fn test_stale_link_events_are_ignored() {
        let connector = Arc::new(RecordingConnector::default());
        let mut channel = channel(&connector);
        channel.connect().await.unwrap();
        channel.close().await;
        channel.connect().await.unwrap();

        // Old link reports late; new link reports a reply
        sink(&connector, 0).closed(None).await;
        sink(&connector, 1).text("fresh".to_string()).await;

        assert_eq!(channel.recv().await, Some(DuplexInbound::Text("fresh".to_string())));
        assert_eq!(channel.state(), ConnectionState::Open);
        assert!(channel.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_failed_connect_leaves_channel_closed() {
        let connector = Arc::new(RecordingConnector::default());
        *connector.refuse.lock().unwrap() = true;
        let mut channel = channel(&connector);

        let err = channel.connect().await.unwrap_err();
        assert!(matches!(err, DuplexError::ConnectionFailed(_)));
        assert_eq!(channel.state(), ConnectionState::Closed);
    }
}
