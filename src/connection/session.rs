//! Messaging Session
//!
//! Single responsibility: An authenticated connection and the two tasks that
//! drive it.
//!
//! # The Key Abstraction
//!
//! A `Session` can ONLY be created via `Session::establish()`, which:
//! 1. Connects the WebSocket
//! 2. Runs the AUTH exchange
//! 3. Only THEN starts the reader and writer tasks and returns
//!
//! If you have a `Session`, its socket is authenticated and both tasks were
//! running when it was handed to you.
//!
//! # Tasks
//!
//! ```text
//!              ┌──────────── reader ────────────┐
//!   socket ──► │ Header → Frame                  │──► direct table (ACK/ERR/ACL)
//!              │ MSG: cid → nested table / inbox │──► nested table | inbox
//!              └─────────────────────────────────┘
//!              ┌──────────── writer ────────────┐
//!   queue  ──► │ close request → close frame     │──► socket
//!              │ request → write, report outcome │
//!              │ keep-alive tick → ping          │
//!              └─────────────────────────────────┘
//! ```
//!
//! Whichever task stops first reports a `Disconnect` through `finished()`.
//! Sessions do NOT reconnect themselves; the client's supervisor decides.

use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant};
use tokio_tungstenite::tungstenite::protocol::{
    frame::coding::CloseCode, CloseFrame, Message as WsMessage,
};
use tracing::{debug, info, warn};

use super::auth::authenticate;
use super::protocol::{Frame, Message};
use super::reconnect::Disconnect;
use super::transport::{Transport, WsSink, WsStream};
use crate::config::ClientConfig;
use crate::correlation::CorrelationCache;
use crate::error::{ClientError, Result};
use crate::identity::Identity;
use crate::jws;
use crate::signer::TokenSigner;

/// How long the reader may keep draining after a local close
const CLOSE_GRACE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authenticating,
    Open,
    Closing,
    Closed,
}

/// A serialized frame waiting for the writer.
pub struct OutboundRequest {
    pub id: String,
    pub data: Vec<u8>,
    /// Write outcome only; the response arrives through correlation
    pub written: oneshot::Sender<Result<()>>,
}

/// State shared by the client and every session it creates.
///
/// The correlation tables, the inbox and the outbound queue outlive any one
/// session, so requests queued during a reconnect are written by the next
/// session's writer.
#[derive(Clone)]
pub struct SessionContext {
    pub endpoint: String,
    pub identity: Arc<Identity>,
    pub signer: TokenSigner,
    pub config: ClientConfig,
    pub correlation: CorrelationCache,
    pub inbox: mpsc::Sender<Message>,
    pub outbound: Arc<Mutex<mpsc::Receiver<OutboundRequest>>>,
    pub closed: Arc<AtomicBool>,
    pub state: Arc<watch::Sender<SessionState>>,
}

impl SessionContext {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn set_state(&self, state: SessionState) {
        self.state.send_replace(state);
    }
}

/// An authenticated session with running reader and writer tasks.
pub struct Session {
    close_tx: mpsc::Sender<()>,
    ended: mpsc::Receiver<Disconnect>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Session {
    /// Establish a new authenticated session.
    ///
    /// # Errors
    /// - WebSocket connection fails
    /// - The server rejects the token (`ClientError::Auth`)
    /// - The reply to AUTH is not a notification (`ClientError::Protocol`)
    pub async fn establish(ctx: &SessionContext) -> Result<Self> {
        let deadline = ctx.config.read_deadline;
        info!(endpoint = %ctx.endpoint, self_id = %ctx.identity.self_id(), "Establishing session");

        ctx.set_state(SessionState::Connecting);
        let mut transport = Transport::connect(&ctx.endpoint, deadline).await?;

        ctx.set_state(SessionState::Authenticating);
        authenticate(&mut transport, &ctx.signer, ctx.identity.device_id(), deadline).await?;

        let (sink, stream) = transport.split();
        let (ended_tx, ended) = mpsc::channel(2);
        let (close_tx, close_rx) = mpsc::channel(1);

        ctx.closed.store(false, Ordering::SeqCst);
        ctx.set_state(SessionState::Open);

        let reader = tokio::spawn({
            let ctx = ctx.clone();
            let ended_tx = ended_tx.clone();
            async move {
                let reason = read_loop(stream, &ctx).await;
                debug!(reason = %reason, "Reader stopped");
                let _ = ended_tx.send(reason).await;
            }
        });

        let writer = tokio::spawn({
            let ctx = ctx.clone();
            async move {
                let reason = write_loop(sink, &ctx, close_rx).await;
                debug!(reason = %reason, "Writer stopped");
                let _ = ended_tx.send(reason).await;
            }
        });

        info!(endpoint = %ctx.endpoint, "Session established");

        Ok(Self {
            close_tx,
            ended,
            reader,
            writer,
        })
    }

    /// Wait until the reader or the writer stops, and say why.
    pub async fn finished(&mut self) -> Disconnect {
        self.ended.recv().await.unwrap_or(Disconnect::Requested)
    }

    /// Ask the writer to send a close frame and stop.
    pub fn request_close(&self) {
        let _ = self.close_tx.try_send(());
    }

    /// Close the socket and stop both tasks.
    ///
    /// The writer gets to send its close frame; the reader gets a short
    /// grace period to see the peer's reply before it is aborted.
    pub async fn shutdown(&mut self) {
        self.request_close();
        let _ = (&mut self.writer).await;
        let _ = timeout(CLOSE_GRACE, &mut self.reader).await;
        self.reader.abort();
        debug!("Session shut down");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

/// Reader loop - runs in a spawned task.
///
/// Frames are handled strictly in arrival order. A frame that does not
/// decode is dropped; it never ends the session.
async fn read_loop(mut stream: WsStream, ctx: &SessionContext) -> Disconnect {
    let deadline = ctx.config.read_deadline;

    loop {
        if ctx.is_closed() {
            return Disconnect::Requested;
        }

        let next = match timeout(deadline, stream.next()).await {
            Ok(next) => next,
            Err(_) => return Disconnect::TimedOut,
        };

        match next {
            Some(Ok(WsMessage::Binary(data))) => route(ctx, &data).await,
            Some(Ok(WsMessage::Close(frame))) => {
                return Disconnect::from_close_frame(frame.as_ref());
            }
            // Ping replies are queued by tungstenite and flushed with our next write
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Disconnect::from_ws_error(&e),
            None => return Disconnect::Abnormal("stream ended".into()),
        }
    }
}

/// Deliver one inbound frame.
async fn route(ctx: &SessionContext, data: &[u8]) {
    let frame = match Frame::decode(data) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(error = %e, len = data.len(), "Dropping undecodable frame");
            return;
        }
    };

    match frame {
        Frame::Message(message) => {
            let cid = jws::correlation_id(&message.ciphertext);
            let message = if cid.is_empty() {
                message
            } else {
                match ctx.correlation.nested.resolve(&cid, message).await {
                    Ok(()) => {
                        debug!(cid = %cid, "Delivered correlated message");
                        return;
                    }
                    Err(message) => message,
                }
            };

            debug!(id = %message.id, sender = %message.sender, "Queueing inbound message");
            // Blocks while the inbox is full: a slow consumer throttles the reader
            if ctx.inbox.send(message).await.is_err() {
                debug!("Inbox closed, dropping message");
            }
        }
        response => {
            let id = response.id().to_string();
            match ctx.correlation.direct.resolve(&id, response).await {
                Ok(()) => debug!(id = %id, "Delivered response"),
                Err(_) => debug!(id = %id, "No pending request for response"),
            }
        }
    }
}

/// Writer loop - runs in a spawned task.
async fn write_loop(
    mut sink: WsSink,
    ctx: &SessionContext,
    mut close_rx: mpsc::Receiver<()>,
) -> Disconnect {
    let deadline = ctx.config.read_deadline;
    let period = ctx.config.ping_interval().max(Duration::from_millis(1));
    let mut keepalive = interval_at(Instant::now() + period, period);
    let mut outbound = ctx.outbound.lock().await;

    loop {
        if ctx.is_closed() {
            send_close(&mut sink, deadline).await;
            return Disconnect::Requested;
        }

        tokio::select! {
            _ = close_rx.recv() => {
                send_close(&mut sink, deadline).await;
                return Disconnect::Requested;
            }
            request = outbound.recv() => {
                let Some(request) = request else {
                    send_close(&mut sink, deadline).await;
                    return Disconnect::Requested;
                };

                match write(&mut sink, WsMessage::Binary(request.data), deadline).await {
                    Ok(()) => {
                        debug!(id = %request.id, "Request written");
                        let _ = request.written.send(Ok(()));
                    }
                    Err(reason) => {
                        let _ = request
                            .written
                            .send(Err(ClientError::Transport(reason.to_string())));
                        return reason;
                    }
                }
            }
            _ = keepalive.tick() => {
                if let Err(reason) = write(&mut sink, WsMessage::Ping(Vec::new()), deadline).await {
                    return reason;
                }
            }
        }
    }
}

async fn write(
    sink: &mut WsSink,
    message: WsMessage,
    deadline: Duration,
) -> std::result::Result<(), Disconnect> {
    match timeout(deadline, sink.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(Disconnect::from_ws_error(&e)),
        Err(_) => Err(Disconnect::TimedOut),
    }
}

async fn send_close(sink: &mut WsSink, deadline: Duration) {
    let frame = CloseFrame {
        code: CloseCode::Normal,
        reason: "".into(),
    };
    if let Err(reason) = write(sink, WsMessage::Close(Some(frame)), deadline).await {
        debug!(reason = %reason, "Close frame not sent");
    }
}
