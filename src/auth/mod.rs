//! Auth boundary for the REST and S3-wire surfaces.
//!
//! JWT/JWKS *verification* (signature checking against rotating keys) is an external
//! collaborator per spec §1 — only the claim contract is modeled here. A [`JwtVerifier`]
//! is the seam: the default impl checks the HS256 signature against a tenant's own secret
//! (the one case this crate must do itself, since each tenant owns its secret), everything
//! more elaborate (JWKS rotation) plugs in behind the same trait.

use serde::{Deserialize, Serialize};

use crate::error::{Result, StorageError};

/// The claims this system reads off a Bearer JWT (spec §6: "a Bearer JWT with a `sub` (owner)
/// claim and optionally a `role` claim").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub role: Option<String>,
    pub exp: i64,
}

pub trait JwtVerifier: Send + Sync + std::fmt::Debug + 'static {
    fn verify(&self, token: &str, secret: &str) -> Result<Claims>;
}

#[derive(Debug, Default)]
pub struct Hs256Verifier;

impl JwtVerifier for Hs256Verifier {
    fn verify(&self, token: &str, secret: &str) -> Result<Claims> {
        use jsonwebtoken::{decode, DecodingKey, Validation};

        let key = DecodingKey::from_secret(secret.as_bytes());
        let data = decode::<Claims>(token, &key, &Validation::new(jsonwebtoken::Algorithm::HS256)).map_err(|e| {
            use jsonwebtoken::errors::ErrorKind;
            match e.kind() {
                ErrorKind::ExpiredSignature => StorageError::ExpiredToken,
                _ => StorageError::InvalidJwt,
            }
        })?;
        Ok(data.claims)
    }
}

/// Caller identity attached to a request after auth succeeds, threaded through to the metadata
/// store so row-level policies apply (spec §4.2).
#[derive(Debug, Clone)]
pub struct Identity {
    pub tenant_id: String,
    pub owner: String,
    pub role: Option<String>,
}

/// Admin API key check (spec §6: "Admin API (API-key header `apikey` matched against a
/// configured set)").
pub fn check_admin_api_key(configured: &[String], provided: Option<&str>) -> Result<()> {
    match provided {
        Some(key) if configured.iter().any(|k| constant_time_eq(k.as_bytes(), key.as_bytes())) => Ok(()),
        _ => Err(StorageError::AccessDenied),
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_secret_round_trips_claims() {
        use jsonwebtoken::{encode, EncodingKey, Header};
        let secret = "tenant-secret";
        let claims = Claims {
            sub: "user-1".into(),
            role: Some("authenticated".into()),
            exp: (time::OffsetDateTime::now_utc() + time::Duration::hours(1)).unix_timestamp(),
        };
        let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap();
        let verifier = Hs256Verifier;
        let decoded = verifier.verify(&token, secret).expect("verify");
        assert_eq!(decoded.sub, "user-1");
        assert_eq!(decoded.role.as_deref(), Some("authenticated"));
    }

    #[test]
    fn admin_key_must_match_exactly() {
        let configured = vec!["key-a".to_owned(), "key-b".to_owned()];
        assert!(check_admin_api_key(&configured, Some("key-b")).is_ok());
        assert!(check_admin_api_key(&configured, Some("key-c")).is_err());
        assert!(check_admin_api_key(&configured, None).is_err());
    }
}
