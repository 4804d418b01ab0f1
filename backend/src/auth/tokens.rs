//! Signed session tokens.
//!
//! A session token is an RS256 JWT. `sub` is the user id and `jti` is the session id. Only the
//! API process holds the private key. Anything holding the public key can verify a session token
//! without touching the store.

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: String,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}

/// Identity proven by a valid session token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionIdentity {
    pub user_id: String,
    pub session_id: String,
}

pub struct SessionSigner {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey<'static>,
}

impl SessionSigner {
    /// Build a signer from PEM encoded RSA keys.
    pub fn from_pem(
        private_key_pem: &[u8],
        public_key_pem: &[u8],
    ) -> Result<Self, jsonwebtoken::errors::Error> {
        Ok(Self {
            encoding_key: EncodingKey::from_rsa_pem(private_key_pem)?,
            decoding_key: DecodingKey::from_rsa_pem(public_key_pem)?.into_static(),
        })
    }

    pub fn from_pem_files(private_key_path: &str, public_key_path: &str) -> anyhow::Result<Self> {
        let private_key_pem = std::fs::read(private_key_path)
            .map_err(|e| anyhow::anyhow!("read {}: {}", private_key_path, e))?;
        let public_key_pem = std::fs::read(public_key_path)
            .map_err(|e| anyhow::anyhow!("read {}: {}", public_key_path, e))?;
        Ok(Self::from_pem(&private_key_pem, &public_key_pem)?)
    }

    pub fn sign(
        &self,
        user_id: &str,
        session_id: &str,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let claims = SessionClaims {
            sub: user_id.to_string(),
            jti: session_id.to_string(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
        };
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
    }

    /// Verify signature, algorithm and expiry. Returns `None` for any invalid token.
    pub fn verify(&self, token: &str) -> Option<SessionIdentity> {
        let validation = Validation::new(Algorithm::RS256);
        let data =
            jsonwebtoken::decode::<SessionClaims>(token, &self.decoding_key, &validation).ok()?;
        if data.claims.sub.is_empty() {
            return None;
        }
        Some(SessionIdentity {
            user_id: data.claims.sub,
            session_id: data.claims.jti,
        })
    }
}
