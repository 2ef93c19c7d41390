// Access token claims decoding

use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{Result, SessionError};

/// The only token type accepted as an access token
const ACCESS_TOKEN_TYPE: &str = "access";

/// Claims carried by an access token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub token_type: String,
    /// Expiry, unix seconds
    pub exp: i64,
    /// Issued at, unix seconds
    pub iat: i64,
    pub jti: String,
    pub user_id: i64,
}

impl AccessClaims {
    /// True once `exp` is at or before `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.exp <= now.timestamp()
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.exp, 0).single()
    }
}

/// Decode the payload of an access token and check it against the claims schema.
///
/// The signature is not verified. Expiry is not enforced either: an expired
/// token still decodes, and callers check `exp` themselves.
pub fn decode_access_token(token: &str) -> Result<AccessClaims> {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims = HashSet::from(["exp".to_string()]);

    let data = decode::<AccessClaims>(token, &DecodingKey::from_secret(&[]), &validation)
        .map_err(|e| SessionError::MalformedToken(e.to_string()))?;

    let claims = data.claims;
    if claims.token_type != ACCESS_TOKEN_TYPE {
        return Err(SessionError::MalformedToken(format!(
            "expected token_type '{}', got '{}'",
            ACCESS_TOKEN_TYPE, claims.token_type
        )));
    }
    if claims.iat > claims.exp {
        return Err(SessionError::MalformedToken(
            "token issued after it expires".to_string(),
        ));
    }

    Ok(claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    fn mint(payload: serde_json::Value) -> String {
        encode(
            &Header::default(),
            &payload,
            &EncodingKey::from_secret(b"server-side-secret"),
        )
        .unwrap()
    }

    #[test]
    fn test_decode_valid_access_token() {
        let now = Utc::now().timestamp();
        let token = mint(json!({
            "token_type": "access",
            "exp": now + 300,
            "iat": now,
            "jti": "abc123",
            "user_id": 42
        }));

        let claims = decode_access_token(&token).unwrap();
        assert_eq!(claims.user_id, 42);
        assert_eq!(claims.jti, "abc123");
        assert!(!claims.is_expired());
    }

    #[test]
    fn test_expired_token_still_decodes() {
        let now = Utc::now().timestamp();
        let token = mint(json!({
            "token_type": "access",
            "exp": now - 60,
            "iat": now - 3600,
            "jti": "old",
            "user_id": 1
        }));

        let claims = decode_access_token(&token).unwrap();
        assert!(claims.is_expired());
    }

    #[test]
    fn test_refresh_token_type_is_rejected() {
        let now = Utc::now().timestamp();
        let token = mint(json!({
            "token_type": "refresh",
            "exp": now + 300,
            "iat": now,
            "jti": "r",
            "user_id": 1
        }));

        let err = decode_access_token(&token).unwrap_err();
        assert!(matches!(err, SessionError::MalformedToken(_)));
    }

    #[test]
    fn test_missing_claim_is_rejected() {
        let now = Utc::now().timestamp();
        let token = mint(json!({
            "token_type": "access",
            "exp": now + 300,
            "iat": now,
            "user_id": 1
        }));

        assert!(matches!(
            decode_access_token(&token),
            Err(SessionError::MalformedToken(_))
        ));
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(decode_access_token("A").is_err());
        assert!(decode_access_token("").is_err());
        assert!(decode_access_token("a.b.c").is_err());
    }

    #[test]
    fn test_expiry_boundary() {
        let now = Utc::now();
        let claims = AccessClaims {
            token_type: "access".to_string(),
            exp: now.timestamp(),
            iat: now.timestamp() - 10,
            jti: "j".to_string(),
            user_id: 1,
        };
        assert!(claims.is_expired_at(now));
        assert!(!claims.is_expired_at(now - Duration::seconds(1)));
        assert_eq!(claims.expires_at().unwrap().timestamp(), now.timestamp());
    }
}
