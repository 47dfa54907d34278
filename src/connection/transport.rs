//! WebSocket Transport Layer
//!
//! Single responsibility: Connect to a WebSocket and send/receive binary frames.
//! No knowledge of the messaging protocol, authentication, or session management.

use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use std::time::Duration;
use tokio_tungstenite::{
    connect_async_with_config,
    tungstenite::{client::IntoClientRequest, protocol::Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::debug;

use crate::error::{ClientError, Result};

/// Type alias for the WebSocket send half
pub type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>, Message>;

/// Type alias for the WebSocket receive half
pub type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// A connected WebSocket transport.
///
/// Only used whole during the handshake; afterwards it is split so the
/// reader and writer tasks each own one half.
pub struct Transport {
    sink: WsSink,
    stream: WsStream,
}

impl Transport {
    /// Connect to a WebSocket endpoint.
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self> {
        debug!(url = %url, "Connecting to WebSocket");

        let request = url
            .into_client_request()
            .map_err(|e| ClientError::Transport(format!("Invalid endpoint {}: {}", url, e)))?;

        let (ws, _) = tokio::time::timeout(timeout, connect_async_with_config(request, None, false))
            .await
            .map_err(|_| ClientError::Transport(format!("Connect to {} timed out", url)))?
            .map_err(|e| ClientError::Transport(format!("WebSocket connect failed: {}", e)))?;

        let (sink, stream) = ws.split();

        debug!(url = %url, "WebSocket connected");
        Ok(Self { sink, stream })
    }

    /// Send a binary frame.
    pub async fn send(&mut self, data: Vec<u8>) -> Result<()> {
        self.sink
            .send(Message::Binary(data))
            .await
            .map_err(|e| ClientError::Transport(format!("Failed to send: {}", e)))
    }

    /// Receive the next binary frame.
    ///
    /// Returns None if the connection is closed.
    /// Skips non-binary messages (ping/pong handled automatically).
    pub async fn recv(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Binary(data))) => return Ok(Some(data)),
                Some(Ok(Message::Close(_))) => return Ok(None),
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    return Err(ClientError::Transport(format!("WebSocket error: {}", e)))
                }
                None => return Ok(None),
            }
        }
    }

    /// Split into separate sink and stream for concurrent send/receive.
    pub fn split(self) -> (WsSink, WsStream) {
        (self.sink, self.stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_endpoint() {
        let result = Transport::connect("not a url", Duration::from_millis(100)).await;
        assert!(matches!(result, Err(ClientError::Transport(_))));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Bind then drop to get a port nobody listens on
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let url = format!("ws://127.0.0.1:{}", port);
        let result = Transport::connect(&url, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(ClientError::Transport(_))));
    }
}
