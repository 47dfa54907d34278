//! Access control list types.
//!
//! A mandate is a signed statement permitting (or revoking) an identity
//! pattern's right to message us. `"*"` matches every sender.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Pattern matching all senders
pub const ANY_SENDER: &str = "*";

/// An active rule, as returned by a LIST request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclRule {
    #[serde(rename = "acl_source")]
    pub source: String,
    #[serde(rename = "acl_exp", default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,
}

/// Claims signed into a PERMIT/REVOKE mandate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MandateClaims {
    pub iss: String,
    pub jti: String,
    pub exp: String,
    pub acl_source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acl_exp: Option<String>,
}

/// RFC 3339 with whole seconds and a `Z` suffix.
pub fn rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_rule_list_decodes() {
        let payload = br#"[
            {"acl_source": "*", "acl_exp": "2030-01-01T00:00:00Z"},
            {"acl_source": "peer123"}
        ]"#;

        let rules: Vec<AclRule> = serde_json::from_slice(payload).unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].source, ANY_SENDER);
        assert_eq!(
            rules[0].expires,
            Some(Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(rules[1].source, "peer123");
        assert_eq!(rules[1].expires, None);
    }

    #[test]
    fn test_mandate_omits_missing_expiry() {
        let claims = MandateClaims {
            iss: "alice".into(),
            jti: "j1".into(),
            exp: "2024-05-01T12:01:00Z".into(),
            acl_source: ANY_SENDER.into(),
            acl_exp: None,
        };

        let json = serde_json::to_value(&claims).unwrap();
        assert!(json.get("acl_exp").is_none());
        assert_eq!(json["acl_source"], "*");
    }

    #[test]
    fn test_rfc3339_format() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        assert_eq!(rfc3339(at), "2024-05-01T12:00:00Z");
    }
}
