//! Transport Layer
//!
//! Two transports carry one logical conversation:
//! - [`stream`]: the one-shot SSE request that opens the conversation
//! - [`duplex`]: the persistent WebSocket channel for every later turn
//!
//! # Design Philosophy
//!
//! Drivers classify and report; they never retry on their own and never
//! touch the conversation log. Each driver sits behind a trait so the
//! protocol state machine and orchestrator can be exercised with in-memory
//! doubles.

pub mod duplex;
pub mod sse;
pub mod stream;

use thiserror::Error;
use url::Url;

pub use duplex::{
    duplex_endpoint, ConnectionState, DuplexChannel, DuplexConnector, DuplexError, DuplexEvent,
    DuplexEventKind, DuplexInbound, DuplexLink, DuplexSink, CONTROL_USER_INPUT,
};
#[cfg(feature = "websocket")]
pub use duplex::WsConnector;
pub use sse::{SseDecoder, SseFrame};
pub use stream::{
    classify_status, HttpStreamDriver, StreamError, StreamEvent, StreamOutcome, StreamTransport,
    FATAL_EVENT,
};

/// Errors deriving an endpoint from the configured base address
#[derive(Debug, Error)]
pub enum EndpointError {
    /// Scheme has no streaming/duplex equivalent
    #[error("Unsupported scheme '{scheme}' in {url}")]
    UnsupportedScheme {
        /// The offending URL
        url: String,
        /// Its scheme
        scheme: String,
    },

    /// URL cannot carry path segments (e.g. `mailto:`)
    #[error("Base URL cannot carry a path: {0}")]
    CannotBeABase(String),

    /// HTTP client could not be constructed
    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}

/// Append path segments to a base URL, keeping its existing path
///
/// `http://host/api` + `["teams", "plan"]` → `http://host/api/teams/plan`.
pub(crate) fn join_segments(base: &Url, segments: &[&str]) -> Result<Url, EndpointError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| EndpointError::CannotBeABase(base.to_string()))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_segments_keeps_base_path() {
        let base = Url::parse("http://localhost:8081/api").unwrap();
        let url = join_segments(&base, &["teams", "plan"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:8081/api/teams/plan");
    }

    #[test]
    fn test_join_segments_trailing_slash() {
        let base = Url::parse("https://studio.example.com/api/").unwrap();
        let url = join_segments(&base, &["teams", "plan"]).unwrap();
        assert_eq!(url.as_str(), "https://studio.example.com/api/teams/plan");
    }

    #[test]
    fn test_join_segments_rejects_opaque_url() {
        let base = Url::parse("mailto:someone@example.com").unwrap();
        assert!(matches!(
            join_segments(&base, &["teams"]),
            Err(EndpointError::CannotBeABase(_))
        ));
    }
}
