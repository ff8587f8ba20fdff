//! Access credential decoding.
//!
//! The access credential is a JWT-shaped `header.payload.signature` string.
//! Only the payload is read here. The signature is verified by the API.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("malformed credential: {0}")]
    Malformed(String),
    #[error("credential has no usable `exp` claim")]
    MissingExpiry,
    #[error("credential expired at {0}")]
    Expired(DateTime<Utc>),
}

/// Decoded claims of the current access credential.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    /// `sub`, falling back to `id` / `_id`.
    pub subject: Option<String>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub is_admin: bool,
    /// Editing permission (`canEdit`).
    pub can_edit: bool,
    pub expires_at: DateTime<Utc>,
    claims: Map<String, Value>,
}

impl Identity {
    /// Raw claim lookup for anything the typed fields do not cover.
    pub fn claim(&self, key: &str) -> Option<&Value> {
        self.claims.get(key)
    }

    pub fn claims(&self) -> &Map<String, Value> {
        &self.claims
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Lifetime left at `now`; negative once expired.
    pub fn remaining_at(&self, now: DateTime<Utc>) -> chrono::Duration {
        self.expires_at - now
    }
}

/// Decode a credential into an [`Identity`] without checking expiry.
pub fn decode_identity(token: &str) -> Result<Identity, TokenError> {
    let claims = decode_claims(token)?;

    let expires_at = claims
        .get("exp")
        .and_then(numeric_secs)
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        .ok_or(TokenError::MissingExpiry)?;

    let subject = ["sub", "id", "_id"]
        .iter()
        .find_map(|key| claims.get(*key).and_then(scalar_string));
    let email = claims.get("email").and_then(scalar_string);
    let role = claims.get("role").and_then(scalar_string);
    let is_admin = flag(&claims, &["isAdmin", "is_admin"])
        || role.as_deref().is_some_and(|r| r.eq_ignore_ascii_case("admin"));
    let can_edit = flag(&claims, &["canEdit", "can_edit"]);

    Ok(Identity {
        subject,
        email,
        role,
        is_admin,
        can_edit,
        expires_at,
        claims,
    })
}

/// Decode and reject credentials whose `exp` is at or before `now`.
pub fn decode_live_identity(token: &str, now: DateTime<Utc>) -> Result<Identity, TokenError> {
    let identity = decode_identity(token)?;
    if identity.is_expired_at(now) {
        return Err(TokenError::Expired(identity.expires_at));
    }
    Ok(identity)
}

fn decode_claims(token: &str) -> Result<Map<String, Value>, TokenError> {
    let parts: Vec<&str> = token.trim().split('.').collect();
    if parts.len() != 3 {
        return Err(TokenError::Malformed(format!(
            "expected 3 segments, got {}",
            parts.len()
        )));
    }

    // Some issuers pad the segments; the no-pad engine refuses '='.
    let payload = parts[1].trim_end_matches('=');
    if payload.is_empty() {
        return Err(TokenError::Malformed("empty payload".into()));
    }
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| TokenError::Malformed(format!("payload is not base64url: {e}")))?;

    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(TokenError::Malformed("payload is not a JSON object".into())),
        Err(e) => Err(TokenError::Malformed(format!("payload is not JSON: {e}"))),
    }
}

fn numeric_secs(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn flag(claims: &Map<String, Value>, keys: &[&str]) -> bool {
    keys.iter()
        .any(|key| claims.get(*key).and_then(Value::as_bool).unwrap_or(false))
}

/// Build an unsigned credential carrying `claims`, for tests.
#[cfg(test)]
pub(crate) fn encode_test_token(claims: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.signature")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_typed_claims() {
        let token = encode_test_token(&json!({
            "sub": "u-42",
            "email": "staff@example.org",
            "role": "editor",
            "canEdit": true,
            "exp": 4_102_444_800i64,
        }));

        let identity = decode_identity(&token).unwrap();
        assert_eq!(identity.subject.as_deref(), Some("u-42"));
        assert_eq!(identity.email.as_deref(), Some("staff@example.org"));
        assert!(identity.can_edit);
        assert!(!identity.is_admin);
        assert_eq!(identity.expires_at.timestamp(), 4_102_444_800);
        assert_eq!(identity.claim("role"), Some(&json!("editor")));
    }

    #[test]
    fn subject_falls_back_to_id() {
        let token = encode_test_token(&json!({ "id": 7, "exp": 4_102_444_800i64 }));
        assert_eq!(decode_identity(&token).unwrap().subject.as_deref(), Some("7"));
    }

    #[test]
    fn admin_role_implies_admin_flag_but_not_edit() {
        let token = encode_test_token(&json!({ "role": "Admin", "exp": 4_102_444_800i64 }));
        let identity = decode_identity(&token).unwrap();
        assert!(identity.is_admin);
        assert!(!identity.can_edit);
    }

    #[test]
    fn padded_payload_is_accepted() {
        let token = encode_test_token(&json!({ "exp": 4_102_444_800i64, "a": 1 }));
        let parts: Vec<&str> = token.split('.').collect();
        let padded = format!("{}.{}==.{}", parts[0], parts[1], parts[2]);
        assert!(decode_identity(&padded).is_ok());
    }

    #[test]
    fn rejects_wrong_segment_count() {
        assert!(matches!(
            decode_identity("not-a-token"),
            Err(TokenError::Malformed(_))
        ));
    }

    #[test]
    fn rejects_non_json_payload() {
        let token = format!("h.{}.s", URL_SAFE_NO_PAD.encode("plain text"));
        assert!(matches!(decode_identity(&token), Err(TokenError::Malformed(_))));
    }

    #[test]
    fn requires_exp() {
        let token = encode_test_token(&json!({ "sub": "u-1" }));
        assert_eq!(decode_identity(&token), Err(TokenError::MissingExpiry));
    }

    #[test]
    fn live_decode_rejects_exp_equal_to_now() {
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let token = encode_test_token(&json!({ "exp": 1_700_000_000i64 }));
        assert!(matches!(
            decode_live_identity(&token, now),
            Err(TokenError::Expired(_))
        ));

        let later = encode_test_token(&json!({ "exp": 1_700_000_001i64 }));
        assert!(decode_live_identity(&later, now).is_ok());
    }
}
