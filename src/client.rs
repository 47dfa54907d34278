//! Messaging Client with Supervised Reconnection
//!
//! Single responsibility: Expose the public operations and keep one live
//! session behind them.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                        Client                           │
//! │  - send / receive / ACL / JWS request-response          │
//! │  - registers ids, enqueues frames, awaits correlation   │
//! └────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌────────────────────────────────────────────────────────┐
//! │                  Supervisor task                        │
//! │  - waits for the session to end                         │
//! │  - applies ReconnectPolicy, swaps in a new Session      │
//! │  - publishes SessionState, fails waiters on final close │
//! └────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌────────────────────────────────────────────────────────┐
//! │                      Session                            │
//! │  - reader task + writer task on one socket              │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! Reconnect delays run on the supervisor task, so `is_closed()` and every
//! caller stay responsive while a reconnect is in progress.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{info, warn};
use uuid::Uuid;

use crate::acl::{AclRule, ANY_SENDER};
use crate::config::ClientConfig;
use crate::connection::protocol::encode;
use crate::connection::{
    AccessControlList, AclCommand, Disconnect, Frame, Message, MsgType, OutboundRequest,
    ReconnectPolicy, Session, SessionContext, SessionState,
};
use crate::correlation::{CorrelationCache, Waiter};
use crate::error::{ClientError, Result};
use crate::identity::Identity;
use crate::signer::TokenSigner;

/// How often a blocked `receive()` re-checks whether the client closed
pub const RECEIVE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// A connected messaging client.
///
/// # Guarantees
///
/// - `connect()` only returns once the first session is authenticated
/// - Every request gets at most one response: the one correlated by its id
/// - While closed or reconnecting, operations fail with `ClientError::Closed`
///
/// # Non-Guarantees
///
/// - Requests from concurrent callers are written in queue order, not call order
/// - A request in flight when the connection drops is not retried
pub struct Client {
    ctx: SessionContext,
    outbound: mpsc::Sender<OutboundRequest>,
    inbox: Mutex<mpsc::Receiver<Message>>,
    state: watch::Receiver<SessionState>,
    shutdown: mpsc::Sender<()>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl Client {
    /// Connect and authenticate.
    ///
    /// # Errors
    /// - The endpoint cannot be reached (`ClientError::Transport`)
    /// - The server rejects our token (`ClientError::Auth`)
    /// - The server replies with something other than ACK/ERR (`ClientError::Protocol`)
    pub async fn connect(
        endpoint: impl Into<String>,
        identity: Identity,
        config: ClientConfig,
    ) -> Result<Self> {
        let endpoint = endpoint.into();
        let identity = Arc::new(identity);

        info!(
            endpoint = %endpoint,
            self_id = %identity.self_id(),
            device_id = %identity.device_id(),
            "Creating messaging client"
        );

        let (outbound, outbound_rx) = mpsc::channel(config.send_buffer.max(1));
        let (inbox_tx, inbox_rx) = mpsc::channel(config.receive_buffer.max(1));
        let (state_tx, state) = watch::channel(SessionState::Connecting);
        let (shutdown, shutdown_rx) = mpsc::channel(1);

        let ctx = SessionContext {
            endpoint,
            signer: TokenSigner::new(Arc::clone(&identity), Arc::clone(&config.clock)),
            identity,
            config,
            correlation: CorrelationCache::new(),
            inbox: inbox_tx,
            outbound: Arc::new(Mutex::new(outbound_rx)),
            closed: Arc::new(AtomicBool::new(true)),
            state: Arc::new(state_tx),
        };

        let session = match Session::establish(&ctx).await {
            Ok(session) => session,
            Err(e) => {
                ctx.set_state(SessionState::Closed);
                return Err(e);
            }
        };

        let supervisor = tokio::spawn(supervise(ctx.clone(), session, shutdown_rx));

        Ok(Self {
            ctx,
            outbound,
            inbox: Mutex::new(inbox_rx),
            state,
            shutdown,
            supervisor: Mutex::new(Some(supervisor)),
        })
    }

    /// Send a message and wait for the server to acknowledge it.
    ///
    /// A message with an empty id is sent under a fresh one.
    pub async fn send(&self, message: &Message) -> Result<()> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }

        let assigned;
        let message = if message.id.is_empty() {
            assigned = Message {
                id: Uuid::new_v4().to_string(),
                ..message.clone()
            };
            &assigned
        } else {
            message
        };

        match self.request(&message.id, message).await? {
            Frame::Notification(n) if n.kind == MsgType::Err => Err(ClientError::Server(n.error)),
            // ACK, or any other correlated reply, counts as delivered
            _ => Ok(()),
        }
    }

    /// Wait for the next unsolicited message.
    ///
    /// Messages already queued are still returned while the client is closed
    /// or reconnecting; once the inbox is empty it fails within
    /// `RECEIVE_POLL_INTERVAL`.
    pub async fn receive(&self) -> Result<Message> {
        let mut inbox = self.inbox.lock().await;

        loop {
            match timeout(RECEIVE_POLL_INTERVAL, inbox.recv()).await {
                Ok(Some(message)) => return Ok(message),
                Ok(None) => return Err(ClientError::Closed),
                Err(_) => {
                    if self.is_closed() {
                        return Err(ClientError::Closed);
                    }
                }
            }
        }
    }

    /// Direct access to the inbox, for callers running their own select loop.
    ///
    /// `receive()` waits while the guard is held.
    pub async fn receiver(&self) -> MutexGuard<'_, mpsc::Receiver<Message>> {
        self.inbox.lock().await
    }

    /// Permit messages from every identity.
    pub async fn permit_all(&self) -> Result<()> {
        self.acl(AclCommand::Permit, ANY_SENDER, None).await
    }

    /// Permit messages from `source` until `expires`.
    pub async fn permit_sender(&self, source: &str, expires: DateTime<Utc>) -> Result<()> {
        self.acl(AclCommand::Permit, source, Some(expires)).await
    }

    /// Revoke permission for `source`.
    pub async fn block_sender(&self, source: &str) -> Result<()> {
        self.acl(AclCommand::Revoke, source, None).await
    }

    /// All active ACL rules for our identity.
    pub async fn list_acl_rules(&self) -> Result<Vec<AclRule>> {
        let request = AccessControlList::new(AclCommand::List, Vec::new());

        match self.request(&request.id, &request).await? {
            Frame::AccessControlList(reply) => Ok(serde_json::from_slice(&reply.payload)?),
            Frame::Notification(n) => Err(ClientError::Server(n.error)),
            Frame::Message(_) => Err(ClientError::Protocol(
                "Received a message in reply to an ACL list request".into(),
            )),
        }
    }

    /// Register for the reply correlated by `id`, then send `message`.
    ///
    /// The reply is any inbound message whose JWS payload carries
    /// `"cid": id`. Await it with the returned waiter or `jws_response`.
    pub async fn jws_request(&self, id: &str, message: &Message) -> Result<Waiter<Message>> {
        let waiter = self.ctx.correlation.nested.register(id).await;

        if let Err(e) = self.send(message).await {
            self.ctx.correlation.nested.cancel(id).await;
            return Err(e);
        }

        Ok(waiter)
    }

    /// Wait for the message correlated by `id`.
    pub async fn jws_response(&self, id: &str, timeout: Duration) -> Result<Message> {
        self.ctx.correlation.nested.wait(id, timeout).await
    }

    /// Register for a correlated message without sending anything.
    pub async fn jws_register(&self, id: &str) -> Waiter<Message> {
        self.ctx.correlation.nested.register(id).await
    }

    /// Close the connection for good. Safe to call more than once.
    pub async fn close(&self) {
        self.ctx.closed.store(true, Ordering::SeqCst);
        let _ = self.shutdown.try_send(());

        let supervisor = self.supervisor.lock().await.take();
        if let Some(supervisor) = supervisor {
            let _ = supervisor.await;
        }
    }

    /// True while there is no open session, including during a reconnect.
    pub fn is_closed(&self) -> bool {
        self.ctx.is_closed()
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Subscribe to session state transitions.
    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    pub fn identity(&self) -> &Identity {
        &self.ctx.identity
    }

    /// Send a frame that expects a correlated response.
    async fn request<T: Serialize>(&self, id: &str, frame: &T) -> Result<Frame> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }

        let data = encode(frame)?;
        let waiter = self.ctx.correlation.direct.register(id).await;

        let (written, write_outcome) = oneshot::channel();
        let request = OutboundRequest {
            id: id.to_string(),
            data,
            written,
        };

        if self.outbound.send(request).await.is_err() {
            self.ctx.correlation.direct.cancel(id).await;
            return Err(ClientError::Closed);
        }

        // The writer may be torn down mid-request; never outwait the request timeout
        let written = match timeout(self.ctx.config.request_timeout, write_outcome).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(ClientError::Closed),
            Err(_) => Err(ClientError::RequestTimeout(id.to_string())),
        };
        if let Err(e) = written {
            self.ctx.correlation.direct.cancel(id).await;
            return Err(e);
        }

        waiter.wait(self.ctx.config.request_timeout).await
    }

    async fn acl(
        &self,
        command: AclCommand,
        source: &str,
        expires: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mandate = self.ctx.signer.acl_mandate(source, expires)?;
        let request = AccessControlList::new(command, mandate.into_bytes());

        match self.request(&request.id, &request).await? {
            Frame::Notification(n) => match n.kind {
                MsgType::Ack => Ok(()),
                MsgType::Err => Err(ClientError::Server(n.error)),
                other => Err(ClientError::Protocol(format!(
                    "Unknown {:?} response from server",
                    other
                ))),
            },
            _ => Err(ClientError::Protocol(
                "Received invalid response from server".into(),
            )),
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.ctx.closed.store(true, Ordering::SeqCst);
        let _ = self.shutdown.try_send(());
    }
}

/// Supervisor loop - one per client, runs until the client is closed for good.
async fn supervise(ctx: SessionContext, mut session: Session, mut shutdown: mpsc::Receiver<()>) {
    let policy = ReconnectPolicy::from_config(&ctx.config);

    loop {
        let reason = tokio::select! {
            reason = session.finished() => reason,
            _ = shutdown.recv() => Disconnect::Requested,
        };

        ctx.closed.store(true, Ordering::SeqCst);
        ctx.set_state(SessionState::Closing);
        session.shutdown().await;

        if reason == Disconnect::Requested {
            info!(endpoint = %ctx.endpoint, "Session closed");
            break;
        }

        if !policy.should_retry(&reason) {
            warn!(endpoint = %ctx.endpoint, reason = %reason, "Session ended");
            break;
        }

        warn!(endpoint = %ctx.endpoint, reason = %reason, "Session lost, reconnecting");

        let next = tokio::select! {
            next = policy.run(|_| Session::establish(&ctx)) => next,
            _ = shutdown.recv() => None,
        };

        match next {
            Some(next) => session = next,
            None => break,
        }
    }

    finish(&ctx).await;
}

/// Mark the client closed and fail everything still waiting on it.
async fn finish(ctx: &SessionContext) {
    ctx.closed.store(true, Ordering::SeqCst);
    ctx.set_state(SessionState::Closed);

    ctx.correlation.drain().await;

    let mut outbound = ctx.outbound.lock().await;
    outbound.close();
    while outbound.try_recv().is_ok() {}
}
