use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{self, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::Role;

/// Claims carried by every bearer token.
///
/// `sub` is the user id for admins and parents, and the child id for child
/// (access-code) sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    pub sub: String,
    pub jti: String,
    pub exp: i64,
    pub role: Role,
    pub child_id: Option<String>,
}

#[derive(Debug, Error)]
pub enum JwtError {
    #[error("invalid token: {0}")]
    Decode(String),
    #[error("encoding failed: {0}")]
    Encode(String),
}

/// Reads the claims without checking the signature. Clients use this to learn
/// their own role; the server always goes through [`decode_and_verify`].
pub fn decode_unverified(token: &str) -> Result<JwtClaims, JwtError> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() < 2 {
        return Err(JwtError::Decode("invalid JWT format".into()));
    }
    let payload_b64 = parts[1];
    let payload_bytes = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|e| JwtError::Decode(format!("invalid base64 payload: {e}")))?;
    serde_json::from_slice::<JwtClaims>(&payload_bytes)
        .map_err(|e| JwtError::Decode(format!("invalid json payload: {e}")))
}

pub fn decode_and_verify(token: &str, secret: &[u8]) -> Result<JwtClaims, JwtError> {
    let key = DecodingKey::from_secret(secret);
    let validation = Validation::new(Algorithm::HS256);
    jsonwebtoken::decode::<JwtClaims>(token, &key, &validation)
        .map(|data| data.claims)
        .map_err(|e| JwtError::Decode(e.to_string()))
}

pub fn encode(token: &JwtClaims, secret: &[u8]) -> Result<String, JwtError> {
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        token,
        &EncodingKey::from_secret(secret),
    )
    .map_err(|e| JwtError::Encode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims() -> JwtClaims {
        JwtClaims {
            sub: "kid-1".into(),
            jti: "j1".into(),
            exp: 4_102_444_800,
            role: Role::Child,
            child_id: Some("kid-1".into()),
        }
    }

    #[test]
    fn verified_decode_rejects_wrong_secret() {
        let token = encode(&claims(), b"right").unwrap();
        assert!(decode_and_verify(&token, b"right").is_ok());
        assert!(decode_and_verify(&token, b"wrong").is_err());
    }

    #[test]
    fn unverified_decode_reads_role() {
        let token = encode(&claims(), b"s").unwrap();
        let c = decode_unverified(&token).unwrap();
        assert_eq!(c.role, Role::Child);
        assert_eq!(c.child_id.as_deref(), Some("kid-1"));
        assert!(decode_unverified("garbage").is_err());
    }
}
