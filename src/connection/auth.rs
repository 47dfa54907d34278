//! Connection Authentication
//!
//! Single responsibility: Run the AUTH exchange on a freshly connected transport.
//!
//! # Authentication Flow
//!
//! 1. Mint a short-lived token signed with the identity key
//! 2. Send one AUTH frame `{id, type: AUTH, token, device}`
//! 3. Read exactly one reply frame:
//!    - ACK: the connection is authenticated
//!    - ERR: rejected, with the server's reason
//!    - anything else: protocol violation
//!
//! Nothing else is read or written until this completes; the reader and
//! writer tasks only start afterwards.

use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

use super::protocol::{decode, encode, Auth, MsgType, Notification};
use super::transport::Transport;
use crate::error::{ClientError, Result};
use crate::signer::TokenSigner;

/// Authenticate a transport connection.
pub async fn authenticate(
    transport: &mut Transport,
    signer: &TokenSigner,
    device_id: &str,
    reply_timeout: Duration,
) -> Result<()> {
    let auth = Auth::new(signer.auth_token()?, device_id.to_string());
    debug!(id = %auth.id, device = %device_id, "Authenticating connection");

    transport.send(encode(&auth)?).await?;

    let reply = timeout(reply_timeout, transport.recv())
        .await
        .map_err(|_| ClientError::Transport("Authentication reply timed out".into()))??
        .ok_or_else(|| ClientError::Transport("Connection closed during authentication".into()))?;

    let notification: Notification = decode(&reply)
        .map_err(|e| ClientError::Protocol(format!("Invalid authentication reply: {}", e)))?;

    interpret_reply(notification)
}

fn interpret_reply(reply: Notification) -> Result<()> {
    match reply.kind {
        MsgType::Ack => {
            debug!("Authentication successful");
            Ok(())
        }
        MsgType::Err => Err(ClientError::Auth(reply.error)),
        other => Err(ClientError::Protocol(format!(
            "Unexpected {:?} reply to authentication",
            other
        ))),
    }
}
