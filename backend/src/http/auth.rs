use actix_web::{post, web, HttpRequest, HttpResponse};
use serde::Deserialize;

use crate::auth::cookies::{cleared_cookies, refresh_token_from_request, token_pair_cookies};
use crate::auth::pkce;
use crate::auth::TokenPair;
use crate::error::invalid_input;
use crate::http;
use crate::BackendService;

const CLIENT_ID_HEADER: &str = "X-Client-ID";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CredentialsRequest {
    pub email: String,
    pub password: String,
    pub client_id: String,
    pub code_challenge: String,
    pub code_challenge_method: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TokenRequest {
    pub grant_type: String,
    pub client_id: String,
    pub code: String,
    pub code_verifier: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Check the PKCE parameters of a login before touching the identity provider. Returns the
/// challenge method, which defaults to S256.
async fn checked_challenge_method(
    service: &BackendService,
    client_id: &str,
    code_challenge: &str,
    code_challenge_method: &str,
) -> actix_web::Result<String> {
    if client_id.is_empty() || code_challenge.is_empty() {
        return Err(invalid_input("client_id and code_challenge required").into());
    }
    let method = match code_challenge_method.trim() {
        "" => pkce::METHOD_S256,
        method => method,
    };
    if !pkce::is_supported_method(method) {
        return Err(invalid_input("code_challenge_method must be S256").into());
    }
    if service.auth.get_client(client_id).await?.is_none() {
        return Err(invalid_input("unknown client_id").into());
    }
    Ok(method.to_string())
}

fn token_pair_response(pair: &TokenPair, cookie_secure: bool) -> HttpResponse {
    let mut response = HttpResponse::Ok();
    for cookie in token_pair_cookies(pair, cookie_secure) {
        response.cookie(cookie);
    }
    response.json(pair)
}

#[post("/auth/signup")]
pub async fn signup(
    body: web::Json<CredentialsRequest>,
    service: web::Data<BackendService>,
) -> actix_web::Result<HttpResponse> {
    let method = checked_challenge_method(
        &service,
        &body.client_id,
        &body.code_challenge,
        &body.code_challenge_method,
    )
    .await?;
    let user_id = service.users.signup(&body.email, &body.password).await?;
    let grant = service
        .auth
        .create_auth_code(&user_id, &body.client_id, &body.code_challenge, &method)
        .await?;
    Ok(HttpResponse::Created().json(&grant))
}

#[post("/auth/login")]
pub async fn login(
    body: web::Json<CredentialsRequest>,
    service: web::Data<BackendService>,
) -> actix_web::Result<HttpResponse> {
    let method = checked_challenge_method(
        &service,
        &body.client_id,
        &body.code_challenge,
        &body.code_challenge_method,
    )
    .await?;
    let user_id = service.users.login(&body.email, &body.password).await?;
    let grant = service
        .auth
        .create_auth_code(&user_id, &body.client_id, &body.code_challenge, &method)
        .await?;
    Ok(HttpResponse::Ok().json(&grant))
}

#[post("/auth/token")]
pub async fn token(
    body: web::Json<TokenRequest>,
    service: web::Data<BackendService>,
) -> actix_web::Result<HttpResponse> {
    if body.grant_type != "authorization_code"
        || body.client_id.is_empty()
        || body.code.is_empty()
        || body.code_verifier.is_empty()
    {
        return Err(
            invalid_input("grant_type, client_id, code, and code_verifier required").into(),
        );
    }
    let pair = service
        .auth
        .exchange_code(&body.code, &body.code_verifier, &body.client_id)
        .await?;
    Ok(token_pair_response(&pair, service.cookie_secure))
}

/// Rotate the refresh token from the cookie, or from the body when there is no cookie.
#[post("/auth/refresh")]
pub async fn refresh(
    request: HttpRequest,
    body: Option<web::Json<RefreshRequest>>,
    service: web::Data<BackendService>,
) -> actix_web::Result<HttpResponse> {
    let refresh_token = refresh_token_from_request(&request)
        .or_else(|| {
            body.map(|body| body.into_inner().refresh_token)
                .filter(|refresh_token| !refresh_token.is_empty())
        })
        .ok_or_else(|| invalid_input("refresh_token required"))?;
    let client_id = request
        .headers()
        .get(CLIENT_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| invalid_input("X-Client-ID required"))?;
    let pair = service.auth.refresh(&refresh_token, client_id).await?;
    Ok(token_pair_response(&pair, service.cookie_secure))
}

#[post("/auth/logout")]
pub async fn logout(
    request: HttpRequest,
    service: web::Data<BackendService>,
) -> actix_web::Result<HttpResponse> {
    let user = http::get_session_user(&request, &service)?;
    service.auth.logout(&user.session_id).await?;
    let mut response = HttpResponse::NoContent();
    for cookie in cleared_cookies(service.cookie_secure) {
        response.cookie(cookie);
    }
    Ok(response.finish())
}
