//! Connection Tokens
//!
//! HMAC-SHA256 signed tokens: `base64url(claims).base64url(signature)`.
//! Clients present them as `?token=` on the websocket URL or as a
//! `Authorization: Bearer` header.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD as BASE64_URL, Engine as _};
use chrono::{Duration as ChronoDuration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Default token lifetime (one week)
pub const DEFAULT_TTL_HOURS: i64 = 168;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TokenError {
    #[error("authentication token required")]
    Missing,
    #[error("malformed token: {0}")]
    Malformed(String),
    #[error("invalid token signature")]
    BadSignature,
    #[error("token expired")]
    Expired,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: String,
    pub email: String,
    /// Expiry as unix seconds
    pub exp: i64,
}

pub struct TokenSigner {
    secret: Vec<u8>,
    ttl: ChronoDuration,
}

impl TokenSigner {
    pub fn new(secret: impl AsRef<[u8]>, ttl_hours: i64) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
            ttl: ChronoDuration::hours(ttl_hours),
        }
    }

    fn mac(&self, payload: &[u8]) -> Result<HmacSha256, TokenError> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| TokenError::Malformed(format!("invalid key: {}", e)))?;
        mac.update(payload);
        Ok(mac)
    }

    pub fn issue(&self, user_id: &str, email: &str) -> Result<String, TokenError> {
        self.sign(&Claims {
            user_id: user_id.to_string(),
            email: email.to_string(),
            exp: (Utc::now() + self.ttl).timestamp(),
        })
    }

    pub fn sign(&self, claims: &Claims) -> Result<String, TokenError> {
        let payload = serde_json::to_vec(claims).map_err(|e| TokenError::Malformed(e.to_string()))?;
        let signature = self.mac(&payload)?.finalize().into_bytes();
        Ok(format!("{}.{}", BASE64_URL.encode(&payload), BASE64_URL.encode(signature)))
    }

    /// Check signature and expiry; returns the claims on success
    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(TokenError::Missing);
        }

        let (payload_b64, signature_b64) = token
            .split_once('.')
            .ok_or_else(|| TokenError::Malformed("missing signature".into()))?;

        let payload = BASE64_URL
            .decode(payload_b64)
            .map_err(|e| TokenError::Malformed(format!("payload: {}", e)))?;
        let signature = BASE64_URL
            .decode(signature_b64)
            .map_err(|e| TokenError::Malformed(format!("signature: {}", e)))?;

        self.mac(&payload)?
            .verify_slice(&signature)
            .map_err(|_| TokenError::BadSignature)?;

        let claims: Claims = serde_json::from_slice(&payload)
            .map_err(|e| TokenError::Malformed(format!("claims: {}", e)))?;

        if claims.exp <= Utc::now().timestamp() {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }
}

/// Pick the token from the query string, falling back to a bearer header
pub fn extract_token<'a>(query: Option<&'a str>, authorization: Option<&'a str>) -> Result<&'a str, TokenError> {
    if let Some(token) = query.filter(|t| !t.is_empty()) {
        return Ok(token);
    }
    authorization
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(TokenError::Missing)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> TokenSigner {
        TokenSigner::new("test-secret", DEFAULT_TTL_HOURS)
    }

    #[test]
    fn test_issue_then_verify() {
        let token = signer().issue("u1", "u1@example.com").unwrap();
        let claims = signer().verify(&token).unwrap();
        assert_eq!(claims.user_id, "u1");
        assert_eq!(claims.email, "u1@example.com");
    }

    #[test]
    fn test_other_secret_rejected() {
        let token = signer().issue("u1", "u1@example.com").unwrap();
        let other = TokenSigner::new("different", DEFAULT_TTL_HOURS);
        assert_eq!(other.verify(&token), Err(TokenError::BadSignature));
    }

    #[test]
    fn test_tampered_claims_rejected() {
        let token = signer().issue("u1", "u1@example.com").unwrap();
        let (_, signature) = token.split_once('.').unwrap();
        let forged = Claims {
            user_id: "admin".into(),
            email: "u1@example.com".into(),
            exp: Utc::now().timestamp() + 3600,
        };
        let forged_payload = BASE64_URL.encode(serde_json::to_vec(&forged).unwrap());
        let forged_token = format!("{}.{}", forged_payload, signature);
        assert_eq!(signer().verify(&forged_token), Err(TokenError::BadSignature));
    }

    #[test]
    fn test_expired_token() {
        let claims = Claims {
            user_id: "u1".into(),
            email: "e".into(),
            exp: Utc::now().timestamp() - 10,
        };
        let token = signer().sign(&claims).unwrap();
        assert_eq!(signer().verify(&token), Err(TokenError::Expired));
    }

    #[test]
    fn test_malformed_tokens() {
        assert_eq!(signer().verify(""), Err(TokenError::Missing));
        assert!(matches!(signer().verify("no-dot"), Err(TokenError::Malformed(_))));
        assert!(matches!(signer().verify("!!.??"), Err(TokenError::Malformed(_))));
    }

    #[test]
    fn test_extract_token_sources() {
        assert_eq!(extract_token(Some("abc"), Some("Bearer xyz")), Ok("abc"));
        assert_eq!(extract_token(None, Some("Bearer xyz")), Ok("xyz"));
        assert_eq!(extract_token(Some(""), Some("Basic xyz")), Err(TokenError::Missing));
        assert_eq!(extract_token(None, None), Err(TokenError::Missing));
    }
}
