//! Messaging Service Connection Module
//!
//! This module owns everything that happens on the one socket a client holds.
//!
//! # Architecture
//!
//! The module is organized by concern, with each submodule having a single responsibility:
//!
//! | Module      | Responsibility                                      |
//! |-------------|-----------------------------------------------------|
//! | `transport` | WebSocket connect/send/receive                      |
//! | `protocol`  | MessagePack frames, two-pass header/body decoding   |
//! | `auth`      | The AUTH exchange on a fresh connection             |
//! | `session`   | An authenticated connection plus reader/writer tasks|
//! | `reconnect` | Which disconnects are retried, and how often        |
//!
//! # Key Design Principles
//!
//! ## 1. Make Invalid States Unrepresentable
//!
//! - `Session` can only be created via `Session::establish()`
//! - `establish()` returns only after the server ACKed our token
//! - The reader and writer never see an unauthenticated socket
//!
//! ## 2. One Owner Per Half
//!
//! - The reader task owns the receive half, the writer task the send half
//! - Callers never touch the socket; they enqueue requests for the writer
//!
//! ## 3. Reconnection Is Not The Session's Job
//!
//! - A session reports why it ended and stops
//! - The client's supervisor task decides whether to build a new one

mod auth;
mod reconnect;
mod session;
mod transport;

pub mod protocol;

pub use protocol::{
    AccessControlList, AclCommand, Auth, Frame, Header, Message, MsgType, Notification,
};
pub use reconnect::{Disconnect, ReconnectPolicy};
pub use session::{OutboundRequest, Session, SessionContext, SessionState};
