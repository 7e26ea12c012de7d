use std::time::Duration;

use axum::extract::FromRef;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

use crate::{config::JwtConfig, error::ApiError, state::AppState};

/// Identity claims carried by a session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,     // user ID
    pub email: String, // login email at issuance time
    pub iat: usize,    // issued at (unix timestamp)
    pub exp: usize,    // expires at (unix timestamp)
    pub iss: String,   // issuer
    pub aud: String,   // audience
}

/// Holds JWT signing and verification keys with config data.
#[derive(Clone)]
pub struct JwtKeys {
    pub encoding: EncodingKey,
    pub decoding: DecodingKey,
    pub issuer: String,
    pub audience: String,
    pub ttl: Duration,
}

impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        let JwtConfig {
            secret,
            issuer,
            audience,
            ttl_minutes,
        } = state.config.jwt.clone();
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            issuer,
            audience,
            ttl: Duration::from_secs(ttl_minutes.unsigned_abs() * 60),
        }
    }
}

impl JwtKeys {
    /// Sign a session token for the given identity. Every call embeds a fresh
    /// issued-at and absolute expiry.
    pub fn sign(&self, user_id: Uuid, email: &str) -> Result<String, ApiError> {
        let now = OffsetDateTime::now_utc();
        let exp = now + TimeDuration::seconds(self.ttl.as_secs() as i64);
        let claims = Claims {
            sub: user_id,
            email: email.to_string(),
            iat: now.unix_timestamp() as usize,
            exp: exp.unix_timestamp() as usize,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };
        let token = encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        debug!(user_id = %user_id, "jwt signed");
        Ok(token)
    }

    /// Verify a session token and return its claims.
    ///
    /// The signature is checked before any claim is trusted, so a token with a
    /// forged expiry or identity never gets past this point. Expiry failures
    /// are reported separately from structural/signature failures.
    pub fn verify(&self, token: &str) -> Result<Claims, ApiError> {
        let mut validation = Validation::default();
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        let data = decode::<Claims>(token, &self.decoding, &validation).map_err(|e| {
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => ApiError::ExpiredToken,
                _ => ApiError::InvalidToken,
            }
        })?;
        debug!(user_id = %data.claims.sub, "jwt verified");
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_keys() -> JwtKeys {
        JwtKeys::from_ref(&AppState::fake())
    }

    #[tokio::test]
    async fn sign_and_verify_roundtrip() {
        let keys = make_keys();
        let user_id = Uuid::new_v4();
        let token = keys.sign(user_id, "ana@example.com").expect("sign");
        let claims = keys.verify(&token).expect("verify");
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.email, "ana@example.com");
        assert_eq!(claims.iss, "test-issuer");
        assert_eq!(claims.aud, "test-aud");
        assert!(claims.exp > claims.iat);
    }

    #[tokio::test]
    async fn fresh_expiry_on_every_issuance() {
        let keys = make_keys();
        let user_id = Uuid::new_v4();
        let t1 = keys.sign(user_id, "a@example.com").expect("sign t1");
        let t2 = keys.sign(user_id, "a@example.com").expect("sign t2");
        // Both verify to the same identity even if the tokens differ.
        let c1 = keys.verify(&t1).expect("verify t1");
        let c2 = keys.verify(&t2).expect("verify t2");
        assert_eq!(c1.sub, c2.sub);
        assert_eq!(c1.email, c2.email);
    }

    #[tokio::test]
    async fn verify_rejects_expired_token() {
        let keys = make_keys();
        // Hand-craft claims whose expiry is well past the default leeway.
        let now = OffsetDateTime::now_utc();
        let claims = Claims {
            sub: Uuid::new_v4(),
            email: "old@example.com".into(),
            iat: (now - TimeDuration::hours(3)).unix_timestamp() as usize,
            exp: (now - TimeDuration::hours(1)).unix_timestamp() as usize,
            iss: keys.issuer.clone(),
            aud: keys.audience.clone(),
        };
        let token = encode(&Header::default(), &claims, &keys.encoding).expect("encode");
        match keys.verify(&token) {
            Err(ApiError::ExpiredToken) => {}
            other => panic!("expected ExpiredToken, got {:?}", other.map(|c| c.sub)),
        }
    }

    #[tokio::test]
    async fn verify_rejects_tampered_token() {
        let keys = make_keys();
        let token = keys.sign(Uuid::new_v4(), "ana@example.com").expect("sign");
        // Flip one character anywhere in the token; every mutation must fail
        // closed as InvalidToken.
        let bytes = token.as_bytes();
        for idx in [5, token.len() / 2, token.len() - 1] {
            let mut tampered = bytes.to_vec();
            tampered[idx] = if tampered[idx] == b'A' { b'B' } else { b'A' };
            let tampered = String::from_utf8(tampered).expect("ascii token");
            // Signature is checked before any claim, so every mutation fails
            // closed as InvalidToken.
            match keys.verify(&tampered) {
                Err(ApiError::InvalidToken) => {}
                Ok(_) => panic!("tampered token at {idx} verified"),
                Err(e) => panic!("unexpected error kind: {e}"),
            }
        }
    }

    #[tokio::test]
    async fn verify_rejects_garbage() {
        let keys = make_keys();
        assert!(matches!(keys.verify(""), Err(ApiError::InvalidToken)));
        assert!(matches!(
            keys.verify("not.a.jwt"),
            Err(ApiError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn verify_rejects_wrong_secret() {
        let keys = make_keys();
        let token = keys.sign(Uuid::new_v4(), "ana@example.com").expect("sign");
        let mut other = make_keys();
        other.decoding = DecodingKey::from_secret(b"a-different-secret");
        assert!(matches!(other.verify(&token), Err(ApiError::InvalidToken)));
    }
}
