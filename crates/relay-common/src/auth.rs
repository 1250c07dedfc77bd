//! Identity verification and signing helpers.
//!
//! The core only ever *verifies* a bearer token and derives an
//! [`IdentityContext`]; issuing tokens is the external registration
//! collaborator's job (kept here only so `relay-admin-api`, which plays that
//! role in this workspace, has somewhere to put it).

use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// JWT claims. `org_id`/`roles`/`permissions` are what §4.5's identity
/// extraction step needs beyond the bare subject.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub org_id: Uuid,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    pub exp: usize,
    pub iat: usize,
}

/// `(organization_id, user_id, roles, permissions)` derived from a verified
/// token — the only thing the rest of the core knows about who is asking.
#[derive(Debug, Clone)]
pub struct IdentityContext {
    pub org_id: Uuid,
    pub user_id: String,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}

impl IdentityContext {
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }
}

pub fn create_jwt(
    user_id: &str,
    org_id: Uuid,
    roles: Vec<String>,
    permissions: Vec<String>,
    secret: &str,
    expires_in_seconds: i64,
) -> Result<String> {
    let now = Utc::now();
    let expiration = now + Duration::seconds(expires_in_seconds);

    let claims = Claims {
        sub: user_id.to_string(),
        org_id,
        roles,
        permissions,
        exp: expiration.timestamp() as usize,
        iat: now.timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

/// Verify a bearer token and produce the identity context the rest of the
/// pipeline operates on. Any failure here is `Unauthenticated`, never a
/// bare JWT error, so callers don't need to know the verification mechanism.
pub fn verify_jwt(token: &str, secret: &str) -> Result<IdentityContext> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| Error::Unauthenticated {
        reason: e.to_string(),
    })?;

    let claims = token_data.claims;
    Ok(IdentityContext {
        org_id: claims.org_id,
        user_id: claims.sub,
        roles: claims.roles,
        permissions: claims.permissions,
    })
}

pub fn hash_password(password: &str) -> Result<String> {
    Ok(bcrypt::hash(password, 12)?)
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    Ok(bcrypt::verify(password, hash)?)
}

/// HMAC-SHA256 over `payload`, hex-encoded. `payload` must already be the
/// exact canonical bytes being signed — this function does no canonicalizing
/// of its own.
pub fn sign_hmac(payload: &str, secret: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts a key of any size");
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-length, constant-time-ish comparison against a freshly computed
/// signature.
pub fn verify_hmac(payload: &str, signature_hex: &str, secret: &str) -> bool {
    let computed = sign_hmac(payload, secret);
    computed.as_bytes().len() == signature_hex.as_bytes().len()
        && computed
            .as_bytes()
            .iter()
            .zip(signature_hex.as_bytes())
            .all(|(a, b)| a == b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jwt_round_trip_carries_org_and_roles() {
        let secret = "test_secret_key_minimum_32_characters_long_123456";
        let org_id = Uuid::new_v4();
        let token = create_jwt(
            "user-1",
            org_id,
            vec!["admin".into()],
            vec!["events:publish".into()],
            secret,
            3600,
        )
        .unwrap();

        let ctx = verify_jwt(&token, secret).unwrap();
        assert_eq!(ctx.user_id, "user-1");
        assert_eq!(ctx.org_id, org_id);
        assert!(ctx.has_permission("events:publish"));
    }

    #[test]
    fn jwt_wrong_secret_is_unauthenticated() {
        let org_id = Uuid::new_v4();
        let token = create_jwt(
            "user-1",
            org_id,
            vec![],
            vec![],
            "test_secret_key_minimum_32_characters_long_123456",
            3600,
        )
        .unwrap();

        let err = verify_jwt(&token, "wrong_secret_minimum_32_characters_long_0000000").unwrap_err();
        assert!(matches!(err, Error::Unauthenticated { .. }));
    }

    #[test]
    fn password_hash_round_trip() {
        let hash = hash_password("correct horse battery staple").unwrap();
        assert!(verify_password("correct horse battery staple", &hash).unwrap());
        assert!(!verify_password("wrong", &hash).unwrap());
    }

    #[test]
    fn hmac_sign_and_verify() {
        let payload = r#"{"eventType":"msg"}"#;
        let secret = "webhook_secret";
        let sig = sign_hmac(payload, secret);
        assert_eq!(sig.len(), 64);
        assert!(verify_hmac(payload, &sig, secret));
        assert!(!verify_hmac("different_payload", &sig, secret));
    }
}
