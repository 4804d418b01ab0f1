use actix_web::{delete, get, web, HttpRequest, HttpResponse};

use crate::auth::cookies::cleared_cookies;
use crate::http;
use crate::BackendService;

#[get("/users/me")]
pub async fn me(
    request: HttpRequest,
    service: web::Data<BackendService>,
) -> actix_web::Result<HttpResponse> {
    let user = http::get_session_user(&request, &service)?;
    let user = service.users.get_by_id(&user.user_id).await?;
    Ok(HttpResponse::Ok().json(&user))
}

/// Delete the caller's account. Every session is revoked first, so a failure part way leaves the
/// user signed out and free to retry.
#[delete("/account")]
pub async fn delete_account(
    request: HttpRequest,
    service: web::Data<BackendService>,
) -> actix_web::Result<HttpResponse> {
    let user = http::get_session_user(&request, &service)?;
    let revoked = service
        .auth
        .revoke_all_sessions_for_user(&user.user_id)
        .await?;
    log::info!("Revoked {} sessions of {} before deletion", revoked, user.user_id);
    service.users.delete_account(&user.user_id).await?;
    let mut response = HttpResponse::NoContent();
    for cookie in cleared_cookies(service.cookie_secure) {
        response.cookie(cookie);
    }
    Ok(response.finish())
}
