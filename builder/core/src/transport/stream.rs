//! Streaming Request Driver
//!
//! Opens a conversation with one form-encoded POST to `<base>/teams/plan`
//! and reads the `text/event-stream` response until it ends.
//!
//! # Failure classification
//!
//! | Condition                              | Class     |
//! |----------------------------------------|-----------|
//! | HTTP 4xx (except 429)                  | Fatal     |
//! | HTTP 5xx, HTTP 429                     | Retriable |
//! | Success with a non-SSE content type    | Retriable |
//! | Network failure mid-stream             | Retriable |
//! | `close` / `error` event frame          | Retriable |
//! | `FatalError` event frame               | Fatal     |
//!
//! Cancellation is not a failure: a cancelled request resolves to
//! [`StreamOutcome::Cancelled`] and delivers nothing after the token fires.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::sse::{SseDecoder, SseFrame};
use super::{join_segments, EndpointError};
use crate::config::StreamConfig;
use crate::error::FailureClass;
use crate::messages::TurnId;
use crate::workflow::WorkflowBinding;

/// Path of the planning endpoint, relative to the base URL
pub const PLAN_PATH: [&str; 2] = ["teams", "plan"];

/// Event name the server uses to abort a conversation
pub const FATAL_EVENT: &str = "FatalError";

const CLOSE_EVENT: &str = "close";
const ERROR_EVENT: &str = "error";
const EVENT_STREAM: &str = "text/event-stream";

/// One decoded event from the opening stream
#[derive(Clone, Debug, PartialEq)]
pub struct StreamEvent {
    /// Server-assigned id, or a generated one when the frame carried none
    pub event_id: String,
    /// Event name (`message` unless the frame said otherwise)
    pub event: String,
    /// Parsed JSON payload; non-JSON data is kept as a string value
    pub payload: Value,
}

impl StreamEvent {
    /// Build an event from a decoded SSE frame
    #[must_use]
    pub fn from_frame(frame: SseFrame) -> Self {
        let payload =
            serde_json::from_str(&frame.data).unwrap_or_else(|_| Value::String(frame.data.clone()));
        let event = frame.event_name().to_string();
        let event_id = frame
            .id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| TurnId::generate().0);
        Self {
            event_id,
            event,
            payload,
        }
    }
}

/// How a stream ended without failing
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamOutcome {
    /// Server ended the response normally
    Completed,
    /// Cancellation token fired, or the event receiver went away
    Cancelled,
}

/// Classified streaming failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    /// Server rejected the request (HTTP 4xx other than 429)
    #[error("Request rejected with HTTP {status}: {detail}")]
    Rejected {
        /// HTTP status code
        status: u16,
        /// Response body or reason phrase
        detail: String,
    },

    /// Server sent a `FatalError` event
    #[error("Server reported a fatal error: {detail}")]
    ServerFatal {
        /// Event payload
        detail: String,
    },

    /// Server temporarily unavailable (HTTP 5xx or 429)
    #[error("Server unavailable (HTTP {status}): {detail}")]
    Unavailable {
        /// HTTP status code
        status: u16,
        /// Response body or reason phrase
        detail: String,
    },

    /// Success status but the body is not an event stream
    #[error("Unexpected content type: {0}")]
    UnexpectedContentType(String),

    /// Network failure or read timeout after the stream started
    #[error("Stream interrupted: {0}")]
    Interrupted(String),

    /// Could not reach the server
    #[error("Connection failed: {0}")]
    Connect(String),

    /// Server closed the stream with a `close` or `error` event
    #[error("Server closed the stream: {0}")]
    ServerClosed(String),
}

impl StreamError {
    /// Fatal or retriable
    #[must_use]
    pub fn class(&self) -> FailureClass {
        match self {
            Self::Rejected { .. } | Self::ServerFatal { .. } => FailureClass::Fatal,
            Self::Unavailable { .. }
            | Self::UnexpectedContentType(_)
            | Self::Interrupted(_)
            | Self::Connect(_)
            | Self::ServerClosed(_) => FailureClass::Retriable,
        }
    }

    /// Error for a non-success status; anything not Fatal is Retriable
    fn from_status(status: u16, detail: String) -> Self {
        match classify_status(status) {
            Some(FailureClass::Fatal) => Self::Rejected { status, detail },
            _ => Self::Unavailable { status, detail },
        }
    }
}

/// Classify an HTTP status; `None` means the stream may proceed
#[must_use]
pub fn classify_status(status: u16) -> Option<FailureClass> {
    match status {
        200..=299 => None,
        429 => Some(FailureClass::Retriable),
        400..=499 => Some(FailureClass::Fatal),
        _ => Some(FailureClass::Retriable),
    }
}

/// Opens the conversation-initiating event stream
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Issue the planning request and deliver decoded events to `sink`
    ///
    /// Events are delivered in arrival order. Nothing is delivered after
    /// `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns a classified [`StreamError`]; `FatalError` frames are never
    /// delivered to `sink`.
    async fn open(
        &self,
        binding: &WorkflowBinding,
        cancel: CancellationToken,
        sink: mpsc::Sender<StreamEvent>,
    ) -> Result<StreamOutcome, StreamError>;
}

/// Streaming driver backed by reqwest
#[derive(Clone, Debug)]
pub struct HttpStreamDriver {
    /// Fully resolved planning endpoint
    endpoint: Url,
    /// HTTP client
    http_client: reqwest::Client,
    /// Longest allowed gap between body chunks
    read_timeout: Option<Duration>,
}

impl HttpStreamDriver {
    /// Create a driver for the given base URL
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError`] if the base URL cannot carry a path or the
    /// HTTP client cannot be built.
    pub fn new(base_url: &Url, config: &StreamConfig) -> Result<Self, EndpointError> {
        let endpoint = join_segments(base_url, &PLAN_PATH)?;
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .build()
            .map_err(|e| EndpointError::Client(e.to_string()))?;
        let read_timeout =
            (config.read_timeout_ms > 0).then(|| Duration::from_millis(config.read_timeout_ms));

        Ok(Self {
            endpoint,
            http_client,
            read_timeout,
        })
    }

    /// Planning endpoint this driver posts to
    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Route one frame; `Some` ends the stream early
    async fn dispatch(
        frame: SseFrame,
        sink: &mpsc::Sender<StreamEvent>,
        cancel: &CancellationToken,
    ) -> Result<Option<StreamOutcome>, StreamError> {
        let name = frame.event_name().to_string();
        match name.as_str() {
            FATAL_EVENT => Err(StreamError::ServerFatal { detail: frame.data }),
            CLOSE_EVENT | ERROR_EVENT => Err(StreamError::ServerClosed(format!(
                "{name} event: {}",
                frame.data
            ))),
            _ => {
                if cancel.is_cancelled() {
                    return Ok(Some(StreamOutcome::Cancelled));
                }
                let event = StreamEvent::from_frame(frame);
                tracing::debug!(event_id = %event.event_id, event = %event.event, "Stream event");
                if sink.send(event).await.is_err() {
                    // Receiver dropped, stop streaming
                    return Ok(Some(StreamOutcome::Cancelled));
                }
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl StreamTransport for HttpStreamDriver {
    async fn open(
        &self,
        binding: &WorkflowBinding,
        cancel: CancellationToken,
        sink: mpsc::Sender<StreamEvent>,
    ) -> Result<StreamOutcome, StreamError> {
        if cancel.is_cancelled() {
            return Ok(StreamOutcome::Cancelled);
        }

        tracing::info!(
            endpoint = %self.endpoint,
            builder_id = binding.builder_id(),
            gallery_id = binding.gallery_id(),
            "Opening planning stream"
        );

        let request = self
            .http_client
            .post(self.endpoint.clone())
            .header(ACCEPT, EVENT_STREAM)
            .form(&binding.form_fields());

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(StreamOutcome::Cancelled),
            result = request.send() => result.map_err(|e| StreamError::Connect(e.to_string()))?,
        };

        let status = response.status();
        if !status.is_success() {
            let body = tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(StreamOutcome::Cancelled),
                body = response.text() => body.unwrap_or_default(),
            };
            let detail = if body.trim().is_empty() {
                status.canonical_reason().unwrap_or("no reason").to_string()
            } else {
                body
            };
            let err = StreamError::from_status(status.as_u16(), detail);
            tracing::warn!(status = status.as_u16(), class = ?err.class(), "Planning request failed");
            return Err(err);
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !content_type.to_ascii_lowercase().starts_with(EVENT_STREAM) {
            let shown = if content_type.is_empty() {
                "<missing>".to_string()
            } else {
                content_type
            };
            return Err(StreamError::UnexpectedContentType(shown));
        }

        let mut body = response.bytes_stream();
        let mut decoder = SseDecoder::new();

        loop {
            let next = async {
                match self.read_timeout {
                    Some(limit) => tokio::time::timeout(limit, body.next()).await.map_err(|_| {
                        StreamError::Interrupted(format!(
                            "no data received for {}ms",
                            limit.as_millis()
                        ))
                    }),
                    None => Ok(body.next().await),
                }
            };

            let chunk = tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(StreamOutcome::Cancelled),
                chunk = next => chunk?,
            };

            match chunk {
                Some(Ok(bytes)) => {
                    for frame in decoder.feed(&bytes) {
                        if let Some(outcome) = Self::dispatch(frame, &sink, &cancel).await? {
                            return Ok(outcome);
                        }
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Planning stream interrupted");
                    return Err(StreamError::Interrupted(e.to_string()));
                }
                None => break,
            }
        }

        if let Some(frame) = decoder.finish() {
            if let Some(outcome) = Self::dispatch(frame, &sink, &cancel).await? {
                return Ok(outcome);
            }
        }

        tracing::debug!("Planning stream completed");
        Ok(StreamOutcome::Completed)
    }
}
