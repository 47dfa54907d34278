//! Messaging Wire Protocol
//!
//! Single responsibility: Encode and decode frames.
//!
//! # Wire Format
//!
//! Every frame is one binary WebSocket message holding a MessagePack map.
//! All frames share the `id` and `type` keys:
//!
//! ```text
//! AUTH  { id, type: "AUTH", token, device }
//! MSG   { id, type: "MSG",  sender, recipient, ciphertext }
//! ACK   { id, type: "ACK",  error: "" }
//! ERR   { id, type: "ERR",  error }
//! ACL   { id, type: "ACL",  command: "PERMIT" | "REVOKE" | "LIST", payload }
//! ```
//!
//! Decoding is two-pass: the bytes are first read as a `Header` (unknown
//! keys are ignored), then read again as the concrete body for that type.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ClientError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MsgType {
    Msg,
    Auth,
    Ack,
    Err,
    Acl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AclCommand {
    Permit,
    Revoke,
    List,
}

/// The prefix shared by every frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MsgType,
}

/// Sent once, before anything else, to authenticate the connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Auth {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MsgType,
    pub token: String,
    pub device: String,
}

impl Auth {
    pub fn new(token: String, device: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind: MsgType::Auth,
            token,
            device,
        }
    }
}

/// An identity-addressed message. The ciphertext is opaque here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MsgType,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub recipient: String,
    #[serde(default, with = "serde_bytes")]
    pub ciphertext: Vec<u8>,
}

impl Message {
    /// A MSG frame with a fresh id.
    pub fn new(recipient: impl Into<String>, ciphertext: impl Into<Vec<u8>>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind: MsgType::Msg,
            sender: String::new(),
            recipient: recipient.into(),
            ciphertext: ciphertext.into(),
        }
    }
}

/// Success or failure reply to a non-data request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MsgType,
    #[serde(default)]
    pub error: String,
}

impl Notification {
    pub fn ack(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: MsgType::Ack,
            error: String::new(),
        }
    }

    pub fn err(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: MsgType::Err,
            error: error.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessControlList {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MsgType,
    pub command: AclCommand,
    #[serde(default, with = "serde_bytes")]
    pub payload: Vec<u8>,
}

impl AccessControlList {
    pub fn new(command: AclCommand, payload: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind: MsgType::Acl,
            command,
            payload,
        }
    }
}

/// Any frame the server may send after authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Message(Message),
    Notification(Notification),
    AccessControlList(AccessControlList),
}

impl Frame {
    /// Decode a frame: header first, then the body its type calls for.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let header: Header = decode(data)?;

        match header.kind {
            MsgType::Msg => decode(data).map(Frame::Message),
            MsgType::Ack | MsgType::Err => decode(data).map(Frame::Notification),
            MsgType::Acl => decode(data).map(Frame::AccessControlList),
            MsgType::Auth => Err(ClientError::Codec(format!(
                "Unexpected AUTH frame {}",
                header.id
            ))),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Frame::Message(m) => &m.id,
            Frame::Notification(n) => &n.id,
            Frame::AccessControlList(a) => &a.id,
        }
    }

    pub fn kind(&self) -> MsgType {
        match self {
            Frame::Message(m) => m.kind,
            Frame::Notification(n) => n.kind,
            Frame::AccessControlList(a) => a.kind,
        }
    }
}

/// Encode any frame body as a named MessagePack map.
pub fn encode<T: Serialize>(frame: &T) -> Result<Vec<u8>> {
    rmp_serde::to_vec_named(frame)
        .map_err(|e| ClientError::Codec(format!("Failed to encode frame: {}", e)))
}

/// Decode bytes as a specific frame body.
pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    rmp_serde::from_slice(data)
        .map_err(|e| ClientError::Codec(format!("Failed to decode frame: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_reads_any_frame() {
        let msg = Message::new("bob", b"hello".to_vec());
        let header: Header = decode(&encode(&msg).unwrap()).unwrap();
        assert_eq!(header.id, msg.id);
        assert_eq!(header.kind, MsgType::Msg);
    }

    #[test]
    fn test_decode_dispatches_on_type() {
        let err = Notification::err("n1", "bad pattern");
        match Frame::decode(&encode(&err).unwrap()).unwrap() {
            Frame::Notification(n) => {
                assert_eq!(n.kind, MsgType::Err);
                assert_eq!(n.error, "bad pattern");
            }
            other => panic!("unexpected frame {:?}", other),
        }

        let acl = AccessControlList::new(AclCommand::List, b"[]".to_vec());
        let frame = Frame::decode(&encode(&acl).unwrap()).unwrap();
        assert_eq!(frame.kind(), MsgType::Acl);
        assert_eq!(frame.id(), acl.id);
    }

    #[test]
    fn test_type_tags_are_uppercase_strings() {
        #[derive(Deserialize)]
        struct Loose {
            #[serde(rename = "type")]
            kind: String,
            command: String,
        }

        let acl = AccessControlList::new(AclCommand::Permit, Vec::new());
        let loose: Loose = decode(&encode(&acl).unwrap()).unwrap();
        assert_eq!(loose.kind, "ACL");
        assert_eq!(loose.command, "PERMIT");
    }

    #[test]
    fn test_unknown_type_rejected() {
        #[derive(Serialize)]
        struct Bogus {
            id: &'static str,
            #[serde(rename = "type")]
            kind: &'static str,
        }

        let data = encode(&Bogus { id: "x", kind: "BOGUS" }).unwrap();
        assert!(Frame::decode(&data).is_err());
        assert!(Frame::decode(b"\xc1garbage").is_err());
    }

    #[test]
    fn test_ciphertext_is_msgpack_bin() {
        let msg = Message::new("bob", vec![1u8, 2, 3]);
        let data = encode(&msg).unwrap();
        assert!(data.windows(5).any(|w| w == [0xc4, 3, 1, 2, 3]));
    }

    #[test]
    fn test_auth_frame_not_accepted_inbound() {
        let auth = Auth::new("token".into(), "1".into());
        assert!(Frame::decode(&encode(&auth).unwrap()).is_err());
    }

    #[test]
    fn test_notification_without_error_field() {
        #[derive(Serialize)]
        struct BareAck {
            id: &'static str,
            #[serde(rename = "type")]
            kind: MsgType,
        }

        let data = encode(&BareAck { id: "m1", kind: MsgType::Ack }).unwrap();
        assert_eq!(
            Frame::decode(&data).unwrap(),
            Frame::Notification(Notification::ack("m1"))
        );
    }
}
