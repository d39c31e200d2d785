// Transport seams between the protocol core and the concrete connection.
// The server wires these to a WebSocket; tests use in-memory channels.

use async_trait::async_trait;

use crate::errors::TransportError;
use crate::protocol::{CloseCode, ServerFeedback};

/// Receive half of a session connection. Yields raw text payloads in arrival
/// order; `None` once the peer has disconnected.
#[async_trait]
pub trait InboundSource: Send {
    async fn recv(&mut self) -> Option<String>;
}

/// Send half of a session connection.
#[async_trait]
pub trait FeedbackSink: Send {
    async fn send(&mut self, feedback: &ServerFeedback) -> Result<(), TransportError>;

    /// Closes the connection with a protocol close code. Best effort; errors
    /// on an already-gone peer are swallowed.
    async fn close(&mut self, code: CloseCode, reason: &str);
}
