//! In-process messaging server for integration tests.
//!
//! Verifies the AUTH token against the client's public key, ACKs every
//! request unless told otherwise, records every frame it receives, and can
//! push scripted frames to connected clients.

#![allow(dead_code)]

use ed25519_dalek::VerifyingKey;
use futures_util::{SinkExt, StreamExt};
use messaging_client::connection::protocol::{decode, encode, Auth, Header};
use messaging_client::signer::AuthClaims;
use messaging_client::{
    generate_private_key, ClientConfig, Identity, JwsEnvelope, Message, Notification,
};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;

/// Builds the reply to one request frame; `None` means stay silent.
pub type Responder = Arc<dyn Fn(&Header, &[u8]) -> Option<Vec<u8>> + Send + Sync>;

#[derive(Clone, Default)]
pub struct ServerOptions {
    /// Reject every AUTH with this text
    pub auth_error: Option<String>,
    /// Replaces the default ACK-everything responder
    pub responder: Option<Responder>,
    /// Stop reading (and answering pings) right after the first handshake
    pub stall_first: bool,
    /// Drop the first connection's TCP socket, without a close frame, right after the handshake
    pub drop_first: bool,
    /// Close the listener after the first connection
    pub accept_once: bool,
}

impl ServerOptions {
    pub fn responder<F>(f: F) -> Self
    where
        F: Fn(&Header, &[u8]) -> Option<Vec<u8>> + Send + Sync + 'static,
    {
        Self {
            responder: Some(Arc::new(f)),
            ..Default::default()
        }
    }
}

pub struct TestServer {
    pub url: String,
    handshakes: Arc<AtomicUsize>,
    frames: mpsc::UnboundedReceiver<Vec<u8>>,
    push: broadcast::Sender<Vec<u8>>,
    task: JoinHandle<()>,
}

impl TestServer {
    pub async fn start(identity: &Identity, options: ServerOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());

        let handshakes = Arc::new(AtomicUsize::new(0));
        let (frames_tx, frames) = mpsc::unbounded_channel();
        let (push, _) = broadcast::channel(64);

        let shared = Shared {
            issuer: identity.self_id().to_string(),
            key: identity.verifying_key(),
            options: options.clone(),
            handshakes: Arc::clone(&handshakes),
            frames: frames_tx,
            push: push.clone(),
        };

        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(handle_connection(stream, shared.clone()));
                if shared.options.accept_once {
                    break;
                }
            }
        });

        Self {
            url,
            handshakes,
            frames,
            push,
            task,
        }
    }

    /// Successful AUTH exchanges so far
    pub fn handshakes(&self) -> usize {
        self.handshakes.load(Ordering::SeqCst)
    }

    /// Next frame a client sent after authenticating.
    pub async fn next_frame(&mut self) -> Vec<u8> {
        tokio::time::timeout(Duration::from_secs(5), self.frames.recv())
            .await
            .expect("no frame received")
            .expect("server stopped")
    }

    pub fn push<T: Serialize>(&self, frame: &T) {
        self.push_raw(encode(frame).unwrap());
    }

    pub fn push_raw(&self, data: Vec<u8>) {
        self.push.send(data).unwrap();
    }

    /// Wait until `n` handshakes completed.
    pub async fn wait_for_handshakes(&self, n: usize, within: Duration) {
        tokio::time::timeout(within, async {
            while self.handshakes() < n {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("expected {} handshakes, saw {}", n, self.handshakes()));
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[derive(Clone)]
struct Shared {
    issuer: String,
    key: VerifyingKey,
    options: ServerOptions,
    handshakes: Arc<AtomicUsize>,
    frames: mpsc::UnboundedSender<Vec<u8>>,
    push: broadcast::Sender<Vec<u8>>,
}

async fn handle_connection(stream: TcpStream, shared: Shared) {
    let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };
    let (mut tx, mut rx) = ws.split();
    let mut pushed = shared.push.subscribe();

    // AUTH exchange
    let Some(Ok(WsMessage::Binary(data))) = rx.next().await else {
        return;
    };
    let auth: Auth = decode(&data).unwrap();
    assert_eq!(auth.device, "1", "unexpected device id");

    let claims: AuthClaims = {
        let payload = JwsEnvelope::from_compact(&auth.token)
            .unwrap()
            .verify(&shared.key)
            .expect("auth token signature");
        serde_json::from_slice(&payload).unwrap()
    };
    assert_eq!(claims.iss, shared.issuer);

    if let Some(error) = &shared.options.auth_error {
        let reply = Notification::err(auth.id, error.clone());
        let _ = tx.send(WsMessage::Binary(encode(&reply).unwrap())).await;
        return;
    }

    let _ = tx
        .send(WsMessage::Binary(encode(&Notification::ack(auth.id)).unwrap()))
        .await;
    let n = shared.handshakes.fetch_add(1, Ordering::SeqCst) + 1;

    if shared.options.drop_first && n == 1 {
        // Shut the TCP socket down directly: the peer sees EOF, not a close frame
        if let Ok(mut ws) = tx.reunite(rx) {
            let _ = ws.get_mut().shutdown().await;
        }
        return;
    }

    if shared.options.stall_first && n == 1 {
        // Hold the socket without reading so pings go unanswered
        tokio::time::sleep(Duration::from_secs(3600)).await;
        drop((tx, rx));
        return;
    }

    loop {
        tokio::select! {
            inbound = rx.next() => {
                let data = match inbound {
                    Some(Ok(WsMessage::Binary(data))) => data,
                    Some(Ok(WsMessage::Close(_))) | None | Some(Err(_)) => return,
                    Some(Ok(_)) => continue,
                };
                let _ = shared.frames.send(data.clone());

                let Ok(header) = decode::<Header>(&data) else {
                    continue;
                };
                let reply = match &shared.options.responder {
                    Some(responder) => responder(&header, &data),
                    None => Some(encode(&Notification::ack(header.id.clone())).unwrap()),
                };
                if let Some(reply) = reply {
                    if tx.send(WsMessage::Binary(reply)).await.is_err() {
                        return;
                    }
                }
            }
            scripted = pushed.recv() => {
                let Ok(data) = scripted else { return };
                if tx.send(WsMessage::Binary(data)).await.is_err() {
                    return;
                }
            }
        }
    }
}

pub fn identity(self_id: &str) -> Identity {
    Identity::new(self_id, "1", &generate_private_key()).unwrap()
}

/// Short timeouts so failure paths finish quickly.
pub fn test_config() -> ClientConfig {
    ClientConfig {
        request_timeout: Duration::from_secs(2),
        retry_delay: Duration::from_millis(50),
        max_retries: 3,
        ..Default::default()
    }
}

/// An inbound MSG as the server would deliver it.
pub fn inbound(sender: &str, ciphertext: impl Into<Vec<u8>>) -> Message {
    Message {
        sender: sender.to_string(),
        recipient: "alice".to_string(),
        ..Message::new("alice", ciphertext)
    }
}
