//! Token and mandate signing.
//!
//! Pure function of identity, claims and clock: nothing here touches the
//! network.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::acl::{rfc3339, MandateClaims};
use crate::clock::Clock;
use crate::error::Result;
use crate::identity::Identity;
use crate::jws::JwsEnvelope;

/// Lifetime of auth tokens and ACL mandates, in seconds
pub const TOKEN_LIFETIME_SECS: i64 = 60;

/// Claims carried by the auth token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthClaims {
    pub jti: String,
    pub iss: String,
    /// Unix seconds
    pub exp: i64,
}

#[derive(Debug, Clone)]
pub struct TokenSigner {
    identity: Arc<Identity>,
    clock: Arc<dyn Clock>,
}

impl TokenSigner {
    pub fn new(identity: Arc<Identity>, clock: Arc<dyn Clock>) -> Self {
        Self { identity, clock }
    }

    fn expiry(&self) -> DateTime<Utc> {
        self.clock.now() + Duration::seconds(TOKEN_LIFETIME_SECS)
    }

    /// Compact JWS presented in the AUTH frame.
    pub fn auth_token(&self) -> Result<String> {
        let claims = AuthClaims {
            jti: Uuid::new_v4().to_string(),
            iss: self.identity.self_id().to_string(),
            exp: self.expiry().timestamp(),
        };

        let payload = serde_json::to_vec(&claims)?;
        Ok(JwsEnvelope::sign(self.identity.signing_key(), &payload).to_compact())
    }

    /// Flattened JSON JWS granting or revoking `source`.
    pub fn acl_mandate(&self, source: &str, expires: Option<DateTime<Utc>>) -> Result<String> {
        let claims = MandateClaims {
            iss: self.identity.self_id().to_string(),
            jti: Uuid::new_v4().to_string(),
            exp: rfc3339(self.expiry()),
            acl_source: source.to_string(),
            acl_exp: expires.map(rfc3339),
        };

        let payload = serde_json::to_vec(&claims)?;
        JwsEnvelope::sign(self.identity.signing_key(), &payload).to_json()
    }
}
