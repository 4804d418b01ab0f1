pub mod artists;
pub mod auth;
pub mod federated;
pub mod feed;
pub mod follows;
pub mod monitoring;
pub mod users;

use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;

use crate::auth::cookies::session_token_from_request;
use crate::error::{unauthenticated, AppError};
use crate::BackendService;

pub struct SessionUser {
    pub user_id: String,
    pub session_id: String,
}

/// The user behind the request's session token, from the `session_token` cookie or an
/// `Authorization: Bearer` header. Only the token's signature and expiry are checked.
pub fn get_session_user(
    request: &HttpRequest,
    service: &BackendService,
) -> Result<SessionUser, AppError> {
    let token = session_token_from_request(request)
        .ok_or_else(|| unauthenticated("missing session token"))?;
    let identity = service
        .auth
        .verify_session_token(&token)
        .ok_or_else(|| unauthenticated("invalid or expired session token"))?;
    Ok(SessionUser {
        user_id: identity.user_id,
        session_id: identity.session_id,
    })
}

/// `limit` and `cursor` query parameters. A `limit` that is not a number is ignored.
#[derive(Debug, Default, Deserialize)]
pub struct PageParams {
    pub limit: Option<String>,
    pub cursor: Option<String>,
}

impl PageParams {
    pub fn limit(&self) -> Option<usize> {
        self.limit.as_deref().and_then(|s| s.trim().parse().ok())
    }

    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref().filter(|c| !c.is_empty())
    }
}

pub fn no_content() -> HttpResponse {
    HttpResponse::NoContent().finish()
}

/// Every route under `/v1`, and `/metrics` for scrapers.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(monitoring::metrics);
    cfg.service(
        web::scope("/v1")
            .service(auth::signup)
            .service(auth::login)
            .service(auth::token)
            .service(auth::refresh)
            .service(auth::logout)
            .service(federated::google)
            .service(federated::apple)
            .service(federated::link_google)
            .service(federated::link_apple)
            .service(federated::callback)
            .service(users::me)
            .service(users::delete_account)
            .service(follows::list_following)
            .service(follows::follow)
            .service(follows::unfollow)
            .service(follows::is_following)
            .service(feed::my_feed)
            // Before the `{handle}` routes, which would otherwise match "me".
            .service(artists::list_mine)
            .service(artists::create)
            .service(artists::get)
            .service(artists::update)
            .service(artists::delete)
            .service(artists::list_members)
            .service(artists::add_member)
            .service(artists::update_member)
            .service(artists::remove_member)
            .service(follows::list_followers)
            .service(feed::create_post)
            .service(feed::list_posts)
            .service(feed::get_post)
            .service(feed::update_post)
            .service(feed::delete_post),
    );
}
