//! Messaging Client - persistent authenticated messaging over WebSocket
//!
//! Holds one long-lived WebSocket session to a messaging server and exposes
//! request/response style operations on top of it.
//!
//! ## Architecture
//!
//! - **Session**: connect, AUTH with a signed token, then a reader task and a
//!   writer task share the socket
//! - **Correlation**: responses find their caller by request id (ACK/ERR/ACL)
//!   or by the `cid` claim inside a signed message payload (JWS replies)
//! - **Supervisor**: one task per client decides whether a lost session is
//!   rebuilt
//!
//! ## Wire Format
//!
//! | Frame | Fields |
//! |-------|--------|
//! | AUTH  | id, type, token, device |
//! | MSG   | id, type, sender, recipient, ciphertext |
//! | ACK / ERR | id, type, error |
//! | ACL   | id, type, command, payload |
//!
//! Every frame is a MessagePack map sent as one binary WebSocket message.
//!
//! ## Example
//!
//! ```no_run
//! use messaging_client::{Client, ClientConfig, Identity, Message};
//!
//! # async fn run() -> messaging_client::Result<()> {
//! let identity = Identity::new("alice", "1", "<base64 seed>")?;
//! let client = Client::connect("wss://msg.example.com", identity, ClientConfig::default()).await?;
//!
//! client.send(&Message::new("bob", b"hello".to_vec())).await?;
//! let reply = client.receive().await?;
//! println!("{} says {:?}", reply.sender, reply.ciphertext);
//!
//! client.close().await;
//! # Ok(())
//! # }
//! ```

pub mod acl;
pub mod client;
pub mod clock;
pub mod config;
pub mod connection;
pub mod correlation;
pub mod error;
pub mod identity;
pub mod jws;
pub mod signer;

// Re-exports
pub use acl::{AclRule, ANY_SENDER};
pub use client::Client;
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::ClientConfig;
pub use connection::{AclCommand, Frame, Message, MsgType, Notification, SessionState};
pub use correlation::Waiter;
pub use error::{ClientError, Result};
pub use identity::{generate_private_key, Identity};
pub use jws::JwsEnvelope;
pub use signer::TokenSigner;
