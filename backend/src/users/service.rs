use std::sync::Arc;

use chrono::Utc;

use crate::error::{invalid_input, AppError};
use crate::ids::{Id, IdType};
use crate::store::{KvStore, StoreError};
use crate::users::identity::{IdentityProvider, IdpError};
use crate::users::store::{normalize_email, User, UserStore};
use crate::utils::time::date_time_iso_str;

pub const MIN_PASSWORD_CHARS: usize = 8;

pub struct UserService {
    users: UserStore,
    idp: Arc<dyn IdentityProvider>,
}

impl UserService {
    pub fn new(store: Arc<dyn KvStore>, idp: Arc<dyn IdentityProvider>) -> Self {
        Self {
            users: UserStore::new(store),
            idp,
        }
    }

    /// Register a user with the identity provider and store it. Returns the new user id.
    ///
    /// A taken email fails with the same `SignupFailed` as any other rejected signup, so this
    /// can't be used to find out who has an account.
    pub async fn signup(&self, email: &str, password: &str) -> Result<String, AppError> {
        let email = normalize_email(email);
        if email.is_empty() || password.chars().count() < MIN_PASSWORD_CHARS {
            return Err(invalid_input(
                "email and password (min 8 chars) required",
            ));
        }
        if self.users.get_id_by_email(&email).await?.is_some() {
            return Err(AppError::SignupFailed);
        }

        let sub = match self.idp.sign_up(&email, password).await {
            Ok(sub) => sub,
            Err(IdpError::UsernameExists) => return Err(AppError::SignupFailed),
            Err(IdpError::InvalidPassword) => {
                return Err(invalid_input("password does not meet requirements"))
            }
            Err(e) => return Err(e.into()),
        };

        let user = User {
            id: Id::new(IdType::User).into_string(),
            email,
            cognito_sub: sub,
            created_at: date_time_iso_str(&Utc::now()),
        };
        match self.users.put_user(&user).await {
            Ok(()) => {
                log::info!("Created user {}", user.id);
                Ok(user.id)
            }
            Err(StoreError::PreconditionFailed) => {
                // Lost a race for the email. The provider user is ours, so drop it.
                if let Err(e) = self.idp.admin_delete_user(&user.email).await {
                    log::warn!("Failed to delete provider user after signup race: {}", e);
                }
                Err(AppError::SignupFailed)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Check a password with the identity provider. Returns the user id.
    pub async fn login(&self, email: &str, password: &str) -> Result<String, AppError> {
        let email = normalize_email(email);
        if email.is_empty() || password.is_empty() {
            return Err(AppError::InvalidCredentials);
        }
        let sub = match self.idp.initiate_auth(&email, password).await {
            Ok(sub) => sub,
            Err(IdpError::NotAuthorized) => return Err(AppError::InvalidCredentials),
            Err(e) => return Err(e.into()),
        };
        self.users
            .get_id_by_sub(&sub)
            .await?
            .ok_or(AppError::InvalidCredentials)
    }

    pub async fn get_by_id(&self, user_id: &str) -> Result<User, AppError> {
        self.users
            .get_by_id(user_id)
            .await?
            .ok_or(AppError::NotFound)
    }

    /// Delete the provider user, then every row of the user. Sessions are revoked by the caller
    /// beforehand. Safe to retry after a partial failure.
    pub async fn delete_account(&self, user_id: &str) -> Result<(), AppError> {
        let user = self.get_by_id(user_id).await?;
        self.idp.admin_delete_user(&user.email).await?;
        match self.users.delete_user(&user).await {
            Ok(()) => {
                log::info!("Deleted user {}", user.id);
                Ok(())
            }
            // Deleted concurrently.
            Err(StoreError::PreconditionFailed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Link a federated identity to an existing user, so that it can sign in as that user.
    /// Linking the same identity to the same user again is a no-op.
    pub async fn link_cognito_sub(&self, user_id: &str, sub: &str) -> Result<(), AppError> {
        if user_id.is_empty() || sub.is_empty() {
            return Err(invalid_input("user_id and sub required"));
        }
        self.get_by_id(user_id).await?;
        if let Some(owner) = self.users.get_id_by_sub(sub).await? {
            return linked_to(&owner, user_id);
        }
        match self.users.add_linked_sub(user_id, sub).await {
            Ok(()) => Ok(()),
            Err(StoreError::PreconditionFailed) => match self.users.get_id_by_sub(sub).await? {
                Some(owner) => linked_to(&owner, user_id),
                None => Err(AppError::Unavailable("sub lookup row vanished".to_string())),
            },
            Err(e) => Err(e.into()),
        }
    }

    /// Resolve the user for a federated sign-in, creating it on first sign-in.
    ///
    /// An email that already belongs to another account is not merged into it: that user has to
    /// sign in with their password and link the identity explicitly.
    pub async fn ensure_user_for_cognito(&self, email: &str, sub: &str) -> Result<String, AppError> {
        if sub.is_empty() {
            return Err(invalid_input("sub required"));
        }
        if let Some(user_id) = self.users.get_id_by_sub(sub).await? {
            return Ok(user_id);
        }
        let email = normalize_email(email);
        if email.is_empty() {
            return Err(invalid_input("email required"));
        }
        if self.users.get_id_by_email(&email).await?.is_some() {
            return Err(AppError::AccountExistsWithPassword);
        }

        let user = User {
            id: Id::new(IdType::User).into_string(),
            email,
            cognito_sub: sub.to_string(),
            created_at: date_time_iso_str(&Utc::now()),
        };
        match self.users.put_user(&user).await {
            Ok(()) => {
                log::info!("Created user {} from federated sign-in", user.id);
                Ok(user.id)
            }
            Err(StoreError::PreconditionFailed) => self
                .users
                .get_id_by_sub(sub)
                .await?
                .ok_or(AppError::AccountExistsWithPassword),
            Err(e) => Err(e.into()),
        }
    }
}

fn linked_to(owner: &str, user_id: &str) -> Result<(), AppError> {
    if owner == user_id {
        Ok(())
    } else {
        Err(AppError::SubLinkedToOtherAccount)
    }
}
