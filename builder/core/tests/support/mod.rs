//! Transport doubles and loopback helpers shared by the integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

use builder_core::{
    BuilderMessage, DuplexConnector, DuplexError, DuplexLink, DuplexSink, StreamError,
    StreamEvent, StreamOutcome, StreamTransport, WorkflowBinding,
};

/// A `message` event carrying one turn
pub fn turn_event(id: &str, role: &str, text: &str) -> StreamEvent {
    StreamEvent {
        event_id: id.to_string(),
        event: "message".to_string(),
        payload: serde_json::json!({ "role": role, "text": text }),
    }
}

/// Everything currently queued on the notification channel
pub fn drain(rx: &mut mpsc::Receiver<BuilderMessage>) -> Vec<BuilderMessage> {
    let mut messages = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        messages.push(msg);
    }
    messages
}

/// Poll `check` until it holds or a second passes
pub async fn eventually(check: impl Fn() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

// =============================================================================
// Loopback HTTP
// =============================================================================

/// Read one request (headers plus Content-Length body) as text
pub async fn read_request(socket: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0_u8; 1024];
    loop {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        let text = String::from_utf8_lossy(&buf).to_string();
        if let Some(end) = text.find("\r\n\r\n") {
            let length = text[..end]
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            if buf.len() >= end + 4 + length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).to_string()
}

// =============================================================================
// Streaming double
// =============================================================================

/// How a scripted stream ends
pub enum StreamEnd {
    /// Normal end of body
    Complete,
    /// Classified failure after the events
    Fail(StreamError),
    /// Stay open until cancelled
    WaitForCancel,
}

/// One scripted opening request
pub struct StreamScript {
    pub events: Vec<StreamEvent>,
    pub end: StreamEnd,
}

impl StreamScript {
    pub fn completing(events: Vec<StreamEvent>) -> Self {
        Self {
            events,
            end: StreamEnd::Complete,
        }
    }

    pub fn failing(events: Vec<StreamEvent>, err: StreamError) -> Self {
        Self {
            events,
            end: StreamEnd::Fail(err),
        }
    }

    pub fn hanging(events: Vec<StreamEvent>) -> Self {
        Self {
            events,
            end: StreamEnd::WaitForCancel,
        }
    }
}

#[derive(Default)]
struct StreamState {
    scripts: Mutex<VecDeque<StreamScript>>,
    bindings: Mutex<Vec<WorkflowBinding>>,
    cancelled: AtomicUsize,
}

/// Stream transport replaying queued scripts, one per request
#[derive(Clone, Default)]
pub struct ScriptedStream {
    inner: Arc<StreamState>,
}

impl ScriptedStream {
    pub fn push(&self, script: StreamScript) {
        self.inner.scripts.lock().unwrap().push_back(script);
    }

    /// Bindings of every request opened so far
    pub fn bindings(&self) -> Vec<WorkflowBinding> {
        self.inner.bindings.lock().unwrap().clone()
    }

    /// Requests that observed their cancellation token
    pub fn cancellations(&self) -> usize {
        self.inner.cancelled.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StreamTransport for ScriptedStream {
    async fn open(
        &self,
        binding: &WorkflowBinding,
        cancel: CancellationToken,
        sink: mpsc::Sender<StreamEvent>,
    ) -> Result<StreamOutcome, StreamError> {
        self.inner.bindings.lock().unwrap().push(binding.clone());
        let script = self
            .inner
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| StreamScript::completing(Vec::new()));

        for event in script.events {
            if cancel.is_cancelled() || sink.send(event).await.is_err() {
                self.inner.cancelled.fetch_add(1, Ordering::SeqCst);
                return Ok(StreamOutcome::Cancelled);
            }
        }

        match script.end {
            StreamEnd::Complete => Ok(StreamOutcome::Completed),
            StreamEnd::Fail(err) => Err(err),
            StreamEnd::WaitForCancel => {
                cancel.cancelled().await;
                self.inner.cancelled.fetch_add(1, Ordering::SeqCst);
                Ok(StreamOutcome::Cancelled)
            }
        }
    }
}

// =============================================================================
// Duplex double
// =============================================================================

#[derive(Default)]
struct ConnectorState {
    endpoints: Mutex<Vec<Url>>,
    sinks: Mutex<Vec<DuplexSink>>,
    sent: Mutex<Vec<String>>,
    refuse_next: AtomicUsize,
    fail_sends: AtomicBool,
}

/// Duplex connector whose links are driven by the test
#[derive(Clone, Default)]
pub struct ScriptedConnector {
    inner: Arc<ConnectorState>,
}

struct ScriptedLink {
    state: Arc<ConnectorState>,
}

impl ScriptedConnector {
    /// Endpoints of every connect attempt that succeeded
    pub fn endpoints(&self) -> Vec<Url> {
        self.inner.endpoints.lock().unwrap().clone()
    }

    /// Number of successful connects
    pub fn connects(&self) -> usize {
        self.inner.endpoints.lock().unwrap().len()
    }

    /// Raw outbound frames
    pub fn sent(&self) -> Vec<String> {
        self.inner.sent.lock().unwrap().clone()
    }

    /// `message` field of every outbound frame
    pub fn sent_messages(&self) -> Vec<String> {
        self.sent()
            .iter()
            .map(|raw| {
                let value: serde_json::Value = serde_json::from_str(raw).unwrap();
                value["message"].as_str().unwrap().to_string()
            })
            .collect()
    }

    /// Refuse the next `n` connect attempts
    pub fn refuse_next(&self, n: usize) {
        self.inner.refuse_next.store(n, Ordering::SeqCst);
    }

    /// Make every send fail until reset
    pub fn fail_sends(&self, fail: bool) {
        self.inner.fail_sends.store(fail, Ordering::SeqCst);
    }

    fn current_sink(&self) -> DuplexSink {
        self.inner.sinks.lock().unwrap().last().cloned().unwrap()
    }

    /// Server pushes a text frame on the current link
    pub async fn reply(&self, text: &str) {
        let sink = self.current_sink();
        assert!(sink.text(text.to_string()).await);
    }

    /// Server closes the current link
    pub async fn close_current(&self, reason: Option<&str>) {
        let sink = self.current_sink();
        sink.closed(reason.map(str::to_string)).await;
    }
}

#[async_trait]
impl DuplexConnector for ScriptedConnector {
    async fn connect(
        &self,
        endpoint: &Url,
        sink: DuplexSink,
    ) -> Result<Box<dyn DuplexLink>, DuplexError> {
        let refuse = self
            .inner
            .refuse_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refuse {
            return Err(DuplexError::ConnectionFailed("connection refused".to_string()));
        }

        self.inner.endpoints.lock().unwrap().push(endpoint.clone());
        self.inner.sinks.lock().unwrap().push(sink);
        Ok(Box::new(ScriptedLink {
            state: Arc::clone(&self.inner),
        }))
    }
}

#[async_trait]
impl DuplexLink for ScriptedLink {
    async fn send_text(&mut self, text: String) -> Result<(), DuplexError> {
        if self.state.fail_sends.load(Ordering::SeqCst) {
            return Err(DuplexError::SendFailed("broken pipe".to_string()));
        }
        self.state.sent.lock().unwrap().push(text);
        Ok(())
    }

    async fn close(&mut self) {}
}
