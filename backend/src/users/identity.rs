//! The managed identity provider holding user passwords. Users are registered with their email as
//! username; the provider's stable subject id is what links a provider user to our user row.

use std::collections::HashMap;

use async_trait::async_trait;
use hmac::{Hmac, Mac, NewMac};
use rusoto_cognito_idp::{
    AdminCreateUserError, AdminCreateUserRequest, AdminDeleteUserError, AdminDeleteUserRequest,
    AdminGetUserRequest, AdminInitiateAuthError, AdminInitiateAuthRequest,
    AdminSetUserPasswordError, AdminSetUserPasswordRequest, AttributeType,
    CognitoIdentityProvider, CognitoIdentityProviderClient,
};
use rusoto_core::RusotoError;
use sha2::Sha256;
use thiserror::Error;

use crate::error::AppError;

#[derive(Debug, Error)]
pub enum IdpError {
    #[error("username already exists")]
    UsernameExists,

    #[error("password does not meet requirements")]
    InvalidPassword,

    #[error("not authorized")]
    NotAuthorized,

    #[error("identity provider error: {0}")]
    Other(String),
}

impl From<IdpError> for AppError {
    fn from(e: IdpError) -> Self {
        AppError::Unavailable(e.to_string())
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Register a confirmed user with a permanent password. Returns the new subject id.
    async fn sign_up(&self, email: &str, password: &str) -> Result<String, IdpError>;

    /// Check a user's password. Returns the user's subject id.
    async fn initiate_auth(&self, email: &str, password: &str) -> Result<String, IdpError>;

    /// Delete a user. An empty email or an already deleted user is not an error.
    async fn admin_delete_user(&self, email: &str) -> Result<(), IdpError>;
}

/// `IdentityProvider` backed by an AWS Cognito user pool, using the admin APIs so that no
/// confirmation emails are sent and the user is usable right away.
pub struct CognitoIdp {
    client: CognitoIdentityProviderClient,
    user_pool_id: String,
    client_id: String,
    client_secret: Option<String>,
}

impl CognitoIdp {
    pub fn new(
        region_name: &str,
        user_pool_id: &str,
        client_id: &str,
        client_secret: Option<&str>,
    ) -> anyhow::Result<Self> {
        if user_pool_id.is_empty() || client_id.is_empty() {
            anyhow::bail!("cognito user pool id and client id are required");
        }
        let request_dispatcher = rusoto_core::request::HttpClient::new()?;
        let credentials_provider = rusoto_credential::DefaultCredentialsProvider::new()?;
        let region = region_name.parse::<rusoto_core::Region>()?;
        Ok(Self {
            client: CognitoIdentityProviderClient::new_with(
                request_dispatcher,
                credentials_provider,
                region,
            ),
            user_pool_id: user_pool_id.to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret
                .filter(|secret| !secret.is_empty())
                .map(str::to_string),
        })
    }

    async fn get_sub(&self, username: &str) -> Result<String, IdpError> {
        let response = self
            .client
            .admin_get_user(AdminGetUserRequest {
                user_pool_id: self.user_pool_id.clone(),
                username: username.to_string(),
            })
            .await
            .map_err(|e| IdpError::Other(e.to_string()))?;
        response
            .user_attributes
            .as_deref()
            .and_then(find_sub)
            .ok_or_else(|| IdpError::Other("sub not found for user".to_string()))
    }
}

fn find_sub(attributes: &[AttributeType]) -> Option<String> {
    attributes
        .iter()
        .find(|attribute| attribute.name == "sub")
        .and_then(|attribute| attribute.value.clone())
        .filter(|sub| !sub.is_empty())
}

fn attribute(name: &str, value: &str) -> AttributeType {
    AttributeType {
        name: name.to_string(),
        value: Some(value.to_string()),
    }
}

/// `SECRET_HASH` parameter, required by app clients that have a secret.
fn secret_hash(client_secret: &str, username: &str, client_id: &str) -> Option<String> {
    let mut mac = Hmac::<Sha256>::new_varkey(client_secret.as_bytes()).ok()?;
    mac.update(username.as_bytes());
    mac.update(client_id.as_bytes());
    Some(base64::encode(mac.finalize().into_bytes()))
}

#[async_trait]
impl IdentityProvider for CognitoIdp {
    async fn sign_up(&self, email: &str, password: &str) -> Result<String, IdpError> {
        let created = self
            .client
            .admin_create_user(AdminCreateUserRequest {
                user_pool_id: self.user_pool_id.clone(),
                username: email.to_string(),
                user_attributes: Some(vec![
                    attribute("email", email),
                    attribute("email_verified", "true"),
                ]),
                message_action: Some("SUPPRESS".to_string()),
                ..Default::default()
            })
            .await
            .map_err(|e| match e {
                RusotoError::Service(AdminCreateUserError::UsernameExists(_)) => {
                    IdpError::UsernameExists
                }
                RusotoError::Service(AdminCreateUserError::InvalidPassword(_)) => {
                    IdpError::InvalidPassword
                }
                e => IdpError::Other(e.to_string()),
            })?;

        let set_password = self
            .client
            .admin_set_user_password(AdminSetUserPasswordRequest {
                user_pool_id: self.user_pool_id.clone(),
                username: email.to_string(),
                password: password.to_string(),
                permanent: Some(true),
            })
            .await;
        if let Err(e) = set_password {
            // A user without a password can never sign in.
            if let Err(e) = self.admin_delete_user(email).await {
                log::warn!("Failed to delete half created user: {}", e);
            }
            return Err(match e {
                RusotoError::Service(AdminSetUserPasswordError::InvalidPassword(_)) => {
                    IdpError::InvalidPassword
                }
                e => IdpError::Other(e.to_string()),
            });
        }

        let created_sub = created
            .user
            .and_then(|user| user.attributes)
            .as_deref()
            .and_then(find_sub);
        match created_sub {
            Some(sub) => Ok(sub),
            None => self.get_sub(email).await,
        }
    }

    async fn initiate_auth(&self, email: &str, password: &str) -> Result<String, IdpError> {
        let mut auth_parameters = HashMap::new();
        auth_parameters.insert("USERNAME".to_string(), email.to_string());
        auth_parameters.insert("PASSWORD".to_string(), password.to_string());
        if let Some(hash) = self
            .client_secret
            .as_deref()
            .and_then(|secret| secret_hash(secret, email, &self.client_id))
        {
            auth_parameters.insert("SECRET_HASH".to_string(), hash);
        }
        self.client
            .admin_initiate_auth(AdminInitiateAuthRequest {
                auth_flow: "ADMIN_USER_PASSWORD_AUTH".to_string(),
                auth_parameters: Some(auth_parameters),
                client_id: self.client_id.clone(),
                user_pool_id: self.user_pool_id.clone(),
                ..Default::default()
            })
            .await
            .map_err(|e| match e {
                RusotoError::Service(AdminInitiateAuthError::NotAuthorized(_))
                | RusotoError::Service(AdminInitiateAuthError::UserNotFound(_)) => {
                    IdpError::NotAuthorized
                }
                e => IdpError::Other(e.to_string()),
            })?;
        self.get_sub(email).await
    }

    async fn admin_delete_user(&self, email: &str) -> Result<(), IdpError> {
        if email.is_empty() {
            return Ok(());
        }
        let result = self
            .client
            .admin_delete_user(AdminDeleteUserRequest {
                user_pool_id: self.user_pool_id.clone(),
                username: email.to_string(),
            })
            .await;
        match result {
            Ok(()) | Err(RusotoError::Service(AdminDeleteUserError::UserNotFound(_))) => Ok(()),
            Err(e) => Err(IdpError::Other(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_sub() {
        let attributes = vec![
            attribute("email", "a@example.com"),
            attribute("sub", "0b1c-22"),
        ];
        assert_eq!(find_sub(&attributes), Some("0b1c-22".to_string()));
        assert_eq!(find_sub(&attributes[..1]), None);
        assert_eq!(find_sub(&[attribute("sub", "")]), None);
    }

    #[test]
    fn test_secret_hash_is_stable() {
        let a = secret_hash("secret", "a@example.com", "client").unwrap();
        assert_eq!(Some(a.clone()), secret_hash("secret", "a@example.com", "client"));
        assert_ne!(Some(a.clone()), secret_hash("secret", "b@example.com", "client"));
        // base64 of a 32 byte digest
        assert_eq!(a.len(), 44);
    }
}
