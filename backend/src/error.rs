use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;

use crate::store::StoreError;

/// Errors returned by the services. Each maps to one HTTP status.
///
/// Bodies are plain text. Anything that maps to 500 gets a generic body, and the detail goes to
/// the log instead.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found")]
    NotFound,

    #[error("forbidden")]
    Forbidden,

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    Unauthenticated(String),

    #[error("invalid or expired authorization code")]
    AuthCodeInvalid,

    #[error("invalid or expired refresh token")]
    InvalidRefreshToken,

    #[error("unknown client")]
    UnknownClient,

    #[error("cannot remove the artist owner")]
    CannotRemoveOwner,

    #[error("cannot change the owner's roles")]
    OwnerRolesImmutable,

    #[error("signup failed")]
    SignupFailed,

    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("this sign-in is already linked to another account")]
    SubLinkedToOtherAccount,

    #[error("an account with this email already exists; sign in with email and password")]
    AccountExistsWithPassword,

    #[error("{0}")]
    NotImplemented(String),

    #[error("dependency unavailable: {0}")]
    Unavailable(String),
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        AppError::Unavailable(e.to_string())
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::Conflict(_) | AppError::AccountExistsWithPassword => StatusCode::CONFLICT,
            AppError::InvalidInput(_)
            | AppError::SignupFailed
            | AppError::CannotRemoveOwner
            | AppError::OwnerRolesImmutable => StatusCode::BAD_REQUEST,
            AppError::Unauthenticated(_)
            | AppError::AuthCodeInvalid
            | AppError::InvalidRefreshToken
            | AppError::UnknownClient
            | AppError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AppError::SubLinkedToOtherAccount => StatusCode::CONFLICT,
            AppError::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
            AppError::Unavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let body = if status == StatusCode::INTERNAL_SERVER_ERROR {
            log::error!("{}", self);
            "internal error".to_string()
        } else {
            self.to_string()
        };
        HttpResponse::build(status)
            .content_type("text/plain; charset=utf-8")
            .body(body)
    }
}

pub fn invalid_input(message: &str) -> AppError {
    AppError::InvalidInput(message.to_string())
}

pub fn unauthenticated(message: &str) -> AppError {
    AppError::Unauthenticated(message.to_string())
}
