use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::activity::ActivityStore;
use crate::auth::pkce;
use crate::auth::store::{
    AuthCodeRecord, ClientPolicy, CredentialStore, RefreshRecord, SessionRecord,
};
use crate::auth::tokens::{SessionIdentity, SessionSigner};
use crate::error::{invalid_input, AppError};
use crate::ids::{Id, IdType};
use crate::utils::time::date_time_iso_str;

/// How long an authorization code stays exchangeable.
pub const AUTH_CODE_TTL_SECONDS: i64 = 5 * 60;

/// Credentials returned by code exchange and refresh.
#[derive(Clone, Debug, Serialize)]
pub struct TokenPair {
    pub session_token: String,
    pub refresh_token: String,
    pub expires_at: String,
    /// Seconds until the session token expires.
    pub expires_in: i64,
    /// Seconds until the refresh token expires. Also the refresh cookie's max-age.
    pub refresh_expires_in: i64,
}

#[derive(Clone, Debug, Serialize)]
pub struct AuthCodeGrant {
    pub authorization_code: String,
    pub expires_in: i64,
}

/// Issues, rotates and revokes session credentials.
///
/// The flow is Authorization Code + PKCE: a login produces a short-lived one-time code bound to
/// a client and a code challenge, and the client exchanges the code plus its code verifier for a
/// session token and a refresh token. Each refresh consumes the refresh token and issues a new
/// pair.
pub struct AuthService {
    credentials: CredentialStore,
    signer: Arc<SessionSigner>,
    activity: ActivityStore,
}

impl AuthService {
    pub fn new(
        credentials: CredentialStore,
        signer: Arc<SessionSigner>,
        activity: ActivityStore,
    ) -> Self {
        Self {
            credentials,
            signer,
            activity,
        }
    }

    pub async fn ensure_clients(&self, policies: &[ClientPolicy]) -> Result<usize, AppError> {
        Ok(self.credentials.ensure_clients(policies).await?)
    }

    pub async fn get_client(&self, client_id: &str) -> Result<Option<ClientPolicy>, AppError> {
        if client_id.is_empty() {
            return Ok(None);
        }
        Ok(self.credentials.get_client(client_id).await?)
    }

    pub async fn create_auth_code(
        &self,
        user_id: &str,
        client_id: &str,
        code_challenge: &str,
        code_challenge_method: &str,
    ) -> Result<AuthCodeGrant, AppError> {
        if client_id.is_empty() || code_challenge.is_empty() {
            return Err(invalid_input("client_id and code_challenge required"));
        }
        if !pkce::is_supported_method(code_challenge_method) {
            return Err(invalid_input("code_challenge_method must be S256"));
        }
        let code = Id::new(IdType::AuthCode).into_string();
        self.credentials
            .put_auth_code(&AuthCodeRecord {
                code: code.clone(),
                code_challenge: code_challenge.to_string(),
                code_challenge_method: pkce::METHOD_S256.to_string(),
                user_id: user_id.to_string(),
                client_id: client_id.to_string(),
                expires_at: Utc::now() + Duration::seconds(AUTH_CODE_TTL_SECONDS),
            })
            .await?;
        Ok(AuthCodeGrant {
            authorization_code: code,
            expires_in: AUTH_CODE_TTL_SECONDS,
        })
    }

    /// Exchange an authorization code and its PKCE verifier for a new session.
    ///
    /// The code is consumed before anything else is checked, so a code presented with the wrong
    /// verifier or client cannot be retried.
    pub async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        client_id: &str,
    ) -> Result<TokenPair, AppError> {
        if Id::parse_as(code, IdType::AuthCode).is_none() {
            return Err(AppError::AuthCodeInvalid);
        }
        let record = self
            .credentials
            .consume_auth_code(code, Utc::now())
            .await?
            .ok_or(AppError::AuthCodeInvalid)?;
        if record.client_id != client_id {
            return Err(AppError::AuthCodeInvalid);
        }
        if !pkce::verify_code_verifier(
            code_verifier,
            &record.code_challenge,
            &record.code_challenge_method,
        ) {
            return Err(AppError::AuthCodeInvalid);
        }
        let policy = self
            .get_client(client_id)
            .await?
            .ok_or(AppError::AuthCodeInvalid)?;
        self.new_session(&record.user_id, &policy).await
    }

    /// Create a session and refresh token pair using the client's TTLs.
    pub async fn new_session(
        &self,
        user_id: &str,
        policy: &ClientPolicy,
    ) -> Result<TokenPair, AppError> {
        let now = Utc::now();
        let session_id = Id::new(IdType::Session).into_string();
        let refresh_id = Id::new(IdType::Refresh).into_string();
        let expires_at = now + Duration::seconds(policy.session_ttl_seconds);
        let refresh_expires_at = now + Duration::seconds(policy.refresh_ttl_seconds);

        self.credentials
            .create_session(
                &SessionRecord {
                    id: session_id.clone(),
                    user_id: user_id.to_string(),
                    refresh_id: refresh_id.clone(),
                    expires_at,
                },
                &RefreshRecord {
                    id: refresh_id.clone(),
                    user_id: user_id.to_string(),
                    session_id: session_id.clone(),
                    expires_at: refresh_expires_at,
                },
            )
            .await?;

        let session_token = self
            .signer
            .sign(user_id, &session_id, now, expires_at)
            .map_err(|e| AppError::Unavailable(format!("sign session token: {}", e)))?;

        self.record_activity(user_id, now).await;

        Ok(TokenPair {
            session_token,
            refresh_token: refresh_id,
            expires_at: date_time_iso_str(&expires_at),
            expires_in: policy.session_ttl_seconds,
            refresh_expires_in: policy.refresh_ttl_seconds,
        })
    }

    /// Rotate a refresh token. The presented token and its session are revoked before the new
    /// pair is issued. Of several concurrent refreshes with the same token, at most one succeeds.
    ///
    /// An expired token is rejected and its rows are left for the table's TTL to remove.
    pub async fn refresh(&self, refresh_id: &str, client_id: &str) -> Result<TokenPair, AppError> {
        let policy = self
            .get_client(client_id)
            .await?
            .ok_or(AppError::UnknownClient)?;
        if Id::parse_as(refresh_id, IdType::Refresh).is_none() {
            return Err(AppError::InvalidRefreshToken);
        }
        let refresh = self
            .credentials
            .get_refresh(refresh_id)
            .await?
            .ok_or(AppError::InvalidRefreshToken)?;
        if refresh.user_id.is_empty() || refresh.expires_at <= Utc::now() {
            return Err(AppError::InvalidRefreshToken);
        }
        if !self.credentials.revoke_refresh(refresh_id).await? {
            return Err(AppError::InvalidRefreshToken);
        }
        // The old pair is gone now, so a failure here signs the user out.
        self.new_session(&refresh.user_id, &policy)
            .await
            .map_err(|e| {
                log::warn!(
                    "Revoked a refresh token of {} but failed to issue its replacement: {}",
                    refresh.user_id,
                    e
                );
                e
            })
    }

    /// Revoke the session and its linked refresh token.
    pub async fn logout(&self, session_id: &str) -> Result<(), AppError> {
        self.credentials.revoke_session(session_id).await?;
        Ok(())
    }

    pub async fn revoke_all_sessions_for_user(&self, user_id: &str) -> Result<usize, AppError> {
        Ok(self.credentials.revoke_all_for_user(user_id).await?)
    }

    pub fn verify_session_token(&self, token: &str) -> Option<SessionIdentity> {
        self.signer.verify(token)
    }

    async fn record_activity(&self, user_id: &str, now: DateTime<Utc>) {
        match self.activity.record_if_new(user_id, now).await {
            Ok(true) => log::debug!("First activity this month for {}", user_id),
            Ok(false) => {}
            Err(e) => log::warn!("Failed to record activity for {}: {}", user_id, e),
        }
    }
}
