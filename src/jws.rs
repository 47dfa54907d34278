//! JSON Web Signature envelopes (EdDSA only).
//!
//! Auth tokens travel in compact form (`header.payload.signature`), ACL
//! mandates in the flattened JSON form. Inbound message ciphertext may itself
//! be a JWS whose payload carries a `cid` claim used for nested correlation.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ClientError, Result};

/// Protected header for every envelope we produce
const EDDSA_HEADER: &str = r#"{"alg":"EdDSA"}"#;

/// A signed envelope with base64url segments kept as they travel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwsEnvelope {
    #[serde(default)]
    pub protected: String,
    pub payload: String,
    #[serde(default)]
    pub signature: String,
}

impl JwsEnvelope {
    /// Sign `payload` with an Ed25519 key.
    pub fn sign(key: &SigningKey, payload: &[u8]) -> Self {
        let protected = URL_SAFE_NO_PAD.encode(EDDSA_HEADER);
        let payload = URL_SAFE_NO_PAD.encode(payload);
        let signature = key.sign(signing_input(&protected, &payload).as_bytes());

        Self {
            protected,
            payload,
            signature: URL_SAFE_NO_PAD.encode(signature.to_bytes()),
        }
    }

    /// Parse `header.payload.signature`.
    pub fn from_compact(token: &str) -> Result<Self> {
        let mut parts = token.trim().split('.');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(protected), Some(payload), Some(signature), None) => Ok(Self {
                protected: protected.to_string(),
                payload: payload.to_string(),
                signature: signature.to_string(),
            }),
            _ => Err(ClientError::Signing("Compact JWS must have three segments".into())),
        }
    }

    /// Parse either the flattened JSON or the compact serialization.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if let Ok(envelope) = serde_json::from_slice::<JwsEnvelope>(data) {
            return Ok(envelope);
        }

        let text = std::str::from_utf8(data)
            .map_err(|e| ClientError::Signing(format!("JWS is not valid UTF-8: {}", e)))?;
        Self::from_compact(text)
    }

    pub fn to_compact(&self) -> String {
        format!("{}.{}.{}", self.protected, self.payload, self.signature)
    }

    /// Flattened JSON serialization.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// The decoded payload bytes, without checking the signature.
    pub fn payload_bytes(&self) -> Result<Vec<u8>> {
        URL_SAFE_NO_PAD
            .decode(&self.payload)
            .map_err(|e| ClientError::Signing(format!("Invalid payload encoding: {}", e)))
    }

    /// Verify the signature and return the decoded payload.
    pub fn verify(&self, key: &VerifyingKey) -> Result<Vec<u8>> {
        let raw = URL_SAFE_NO_PAD
            .decode(&self.signature)
            .map_err(|e| ClientError::Signing(format!("Invalid signature encoding: {}", e)))?;
        let signature = Signature::from_slice(&raw)
            .map_err(|e| ClientError::Signing(format!("Malformed signature: {}", e)))?;

        key.verify(signing_input(&self.protected, &self.payload).as_bytes(), &signature)
            .map_err(|e| ClientError::Signing(format!("Signature verification failed: {}", e)))?;

        self.payload_bytes()
    }
}

fn signing_input(protected: &str, payload: &str) -> String {
    format!("{}.{}", protected, payload)
}

/// Extract the `cid` claim from a ciphertext that is a JWS.
///
/// Returns an empty string when the ciphertext is not a JWS, the payload
/// does not decode, or there is no `cid`.
pub fn correlation_id(ciphertext: &[u8]) -> String {
    let Ok(envelope) = JwsEnvelope::parse(ciphertext) else {
        return String::new();
    };
    if envelope.payload.is_empty() {
        return String::new();
    }
    let Ok(payload) = envelope.payload_bytes() else {
        return String::new();
    };

    match serde_json::from_slice::<Value>(&payload) {
        Ok(Value::Object(claims)) => match claims.get("cid") {
            Some(Value::String(cid)) => cid.clone(),
            Some(Value::Number(cid)) => cid.to_string(),
            _ => String::new(),
        },
        _ => String::new(),
    }
}
