//! Client identity: who we are and the key we sign with.

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use ed25519_dalek::{SigningKey, VerifyingKey, SECRET_KEY_LENGTH};
use rand::rngs::OsRng;
use std::fmt;

use crate::error::{ClientError, Result};

/// Immutable for the lifetime of a client.
#[derive(Clone)]
pub struct Identity {
    self_id: String,
    device_id: String,
    key: SigningKey,
}

impl Identity {
    /// Build an identity from a base64 (standard alphabet, unpadded) Ed25519 seed.
    pub fn new(
        self_id: impl Into<String>,
        device_id: impl Into<String>,
        private_key: &str,
    ) -> Result<Self> {
        let seed = STANDARD_NO_PAD
            .decode(private_key.trim().trim_end_matches('='))
            .map_err(|e| ClientError::Signing(format!("Private key is not valid base64: {}", e)))?;

        let seed: [u8; SECRET_KEY_LENGTH] = seed.try_into().map_err(|v: Vec<u8>| {
            ClientError::Signing(format!(
                "Private key seed must be {} bytes, got {}",
                SECRET_KEY_LENGTH,
                v.len()
            ))
        })?;

        Ok(Self::from_signing_key(self_id, device_id, SigningKey::from_bytes(&seed)))
    }

    pub fn from_signing_key(
        self_id: impl Into<String>,
        device_id: impl Into<String>,
        key: SigningKey,
    ) -> Self {
        Self {
            self_id: self_id.into(),
            device_id: device_id.into(),
            key,
        }
    }

    pub fn self_id(&self) -> &str {
        &self.self_id
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.key
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("self_id", &self.self_id)
            .field("device_id", &self.device_id)
            .finish_non_exhaustive()
    }
}

/// Generate a fresh seed in the encoding `Identity::new` expects.
pub fn generate_private_key() -> String {
    let key = SigningKey::generate(&mut OsRng);
    STANDARD_NO_PAD.encode(key.to_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_key_round_trips() {
        let encoded = generate_private_key();
        let a = Identity::new("alice", "1", &encoded).unwrap();
        let b = Identity::new("alice", "1", &encoded).unwrap();
        assert_eq!(a.verifying_key(), b.verifying_key());
        assert_eq!(a.self_id(), "alice");
        assert_eq!(a.device_id(), "1");
    }

    #[test]
    fn test_malformed_key_material() {
        assert!(matches!(
            Identity::new("alice", "1", "not base64 at all!"),
            Err(ClientError::Signing(_))
        ));
        // valid base64, wrong length
        assert!(matches!(
            Identity::new("alice", "1", "AAAA"),
            Err(ClientError::Signing(_))
        ));
    }

    #[test]
    fn test_debug_hides_key() {
        let identity = Identity::new("alice", "1", &generate_private_key()).unwrap();
        let printed = format!("{:?}", identity);
        assert!(printed.contains("alice"));
        assert!(!printed.contains("key"));
    }
}
