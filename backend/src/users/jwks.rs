//! Validation of ID tokens issued by the Cognito hosted UI after a federated (Google, Apple)
//! sign-in. Tokens are RS256 JWTs signed with one of the keys published in the user pool's JWKS.

use std::collections::HashMap;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

/// How long a fetched key set is trusted.
const CACHE_TTL_HOURS: i64 = 24;

/// A token with an unknown `kid` triggers a refetch, at most this often.
const MIN_REFETCH_SECONDS: i64 = 60;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Jwk {
    pub kid: String,
    pub kty: String,
    #[serde(default)]
    pub n: String,
    #[serde(default)]
    pub e: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

#[derive(Debug, Error)]
pub enum JwksError {
    #[error("fetch jwks: {0}")]
    Fetch(String),

    #[error("invalid id token: {0}")]
    InvalidToken(String),
}

fn invalid(reason: impl ToString) -> JwksError {
    JwksError::InvalidToken(reason.to_string())
}

/// The identity asserted by a valid ID token.
#[derive(Clone, Debug, PartialEq)]
pub struct IdTokenIdentity {
    pub sub: String,
    pub email: String,
}

#[derive(Debug, Deserialize)]
struct IdTokenClaims {
    sub: String,
    #[serde(default)]
    email: String,
    // Required, so a token without an expiry fails to decode.
    #[allow(dead_code)]
    exp: i64,
}

pub fn cognito_issuer(region: &str, user_pool_id: &str) -> String {
    format!("https://cognito-idp.{}.amazonaws.com/{}", region, user_pool_id)
}

pub fn cognito_jwks_url(region: &str, user_pool_id: &str) -> String {
    format!(
        "{}/.well-known/jwks.json",
        cognito_issuer(region, user_pool_id)
    )
}

#[async_trait]
pub trait JwksFetcher: Send + Sync {
    async fn fetch(&self) -> Result<JwkSet, JwksError>;
}

pub struct HttpJwksFetcher {
    client: reqwest::Client,
    url: String,
}

impl HttpJwksFetcher {
    pub fn new(url: &str, timeout: StdDuration) -> Result<Self, JwksError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| JwksError::Fetch(e.to_string()))?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl JwksFetcher for HttpJwksFetcher {
    async fn fetch(&self) -> Result<JwkSet, JwksError> {
        let response = self
            .client
            .get(self.url.as_str())
            .send()
            .await
            .map_err(|e| JwksError::Fetch(e.to_string()))?;
        if !response.status().is_success() {
            return Err(JwksError::Fetch(format!(
                "{} returned {}",
                self.url,
                response.status()
            )));
        }
        response
            .json::<JwkSet>()
            .await
            .map_err(|e| JwksError::Fetch(e.to_string()))
    }
}

#[derive(Clone, Debug)]
struct RsaComponents {
    n: String,
    e: String,
}

struct CachedKeys {
    keys: HashMap<String, RsaComponents>,
    fetched_at: DateTime<Utc>,
}

impl CachedKeys {
    /// Keep RSA keys only; anything else can't verify an RS256 signature.
    fn from_set(set: JwkSet, fetched_at: DateTime<Utc>) -> Self {
        let keys = set
            .keys
            .into_iter()
            .filter(|jwk| jwk.kty == "RSA" && !jwk.kid.is_empty() && !jwk.n.is_empty())
            .map(|jwk| (jwk.kid, RsaComponents { n: jwk.n, e: jwk.e }))
            .collect();
        Self { keys, fetched_at }
    }
}

/// Verifies ID tokens against a cached copy of the user pool's key set.
pub struct JwksCache {
    fetcher: Box<dyn JwksFetcher>,
    issuer: String,
    client_id: String,
    cached: Mutex<Option<CachedKeys>>,
}

impl JwksCache {
    pub fn new(fetcher: Box<dyn JwksFetcher>, issuer: &str, client_id: &str) -> Self {
        Self {
            fetcher,
            issuer: issuer.to_string(),
            client_id: client_id.to_string(),
            cached: Mutex::new(None),
        }
    }

    async fn key_for(&self, kid: &str) -> Result<RsaComponents, JwksError> {
        let mut cached = self.cached.lock().await;
        let now = Utc::now();
        let stale = match cached.as_ref() {
            None => true,
            Some(entry) => {
                let age = now - entry.fetched_at;
                age >= Duration::hours(CACHE_TTL_HOURS)
                    || (!entry.keys.contains_key(kid)
                        && age >= Duration::seconds(MIN_REFETCH_SECONDS))
            }
        };
        if stale {
            let set = self.fetcher.fetch().await?;
            *cached = Some(CachedKeys::from_set(set, now));
        }
        cached
            .as_ref()
            .and_then(|entry| entry.keys.get(kid))
            .cloned()
            .ok_or_else(|| invalid("unknown kid"))
    }

    /// Check signature, issuer, audience and expiry of an ID token.
    pub async fn validate_id_token(&self, token: &str) -> Result<IdTokenIdentity, JwksError> {
        let header = jsonwebtoken::decode_header(token).map_err(invalid)?;
        if header.alg != Algorithm::RS256 {
            return Err(invalid("unexpected signing algorithm"));
        }
        let kid = header
            .kid
            .filter(|kid| !kid.is_empty())
            .ok_or_else(|| invalid("missing kid"))?;
        let key = self.key_for(&kid).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.iss = Some(self.issuer.clone());
        validation.set_audience(&[self.client_id.as_str()]);
        let data = jsonwebtoken::decode::<IdTokenClaims>(
            token,
            &DecodingKey::from_rsa_components(&key.n, &key.e),
            &validation,
        )
        .map_err(invalid)?;
        if data.claims.sub.is_empty() {
            return Err(invalid("missing sub"));
        }
        Ok(IdTokenIdentity {
            sub: data.claims.sub,
            email: data.claims.email,
        })
    }
}
