//! Google and Apple sign-in through the Cognito hosted UI.
//!
//! The hosted UI only echoes back `code` and `state`, so everything the callback needs is carried
//! in short-lived cookies: the client's PKCE parameters, an HMAC-signed CSRF state and, when
//! linking an identity to a signed-in user, an HMAC-signed user id. The callback ends by issuing
//! one of our own authorization codes, which the client exchanges at `/auth/token` as after a
//! password login.

use std::sync::Arc;

use actix_web::cookie::{Cookie, SameSite};
use actix_web::http::header;
use actix_web::{get, web, HttpMessage, HttpRequest, HttpResponse};
use hmac::{Hmac, Mac, NewMac};
use rand::RngCore;
use reqwest::Url;
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;

use crate::auth::pkce;
use crate::error::{invalid_input, unauthenticated, AppError};
use crate::http;
use crate::users::hosted_ui::{HostedUi, HostedUiError};
use crate::users::JwksCache;
use crate::BackendService;

pub const STATE_COOKIE: &str = "oauth_state";
pub const PKCE_COOKIE: &str = "oauth_pkce";
pub const LINK_COOKIE: &str = "oauth_link_user";

const OAUTH_COOKIE_MAX_AGE_SECONDS: i64 = 10 * 60;

pub struct FederatedConfig {
    pub hosted_ui: Arc<dyn HostedUi>,
    pub jwks: JwksCache,
    /// Where the callback sends the browser. Without one the callback answers with JSON.
    pub frontend_redirect_uri: Option<String>,
    /// Key for the state and link cookies. Required for linking.
    pub state_secret: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StartParams {
    pub client_id: String,
    pub code_challenge: String,
    pub code_challenge_method: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CallbackParams {
    pub code: String,
    pub state: String,
}

fn federated_config(service: &BackendService) -> Result<&FederatedConfig, AppError> {
    service
        .federated
        .as_ref()
        .ok_or_else(|| AppError::NotImplemented("federated login not configured".to_string()))
}

fn oauth_cookie(name: &'static str, value: String, secure: bool) -> Cookie<'static> {
    Cookie::build(name, value)
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::seconds(OAUTH_COOKIE_MAX_AGE_SECONDS))
        .finish()
}

fn cleared_oauth_cookie(name: &'static str, secure: bool) -> Cookie<'static> {
    let mut cookie = oauth_cookie(name, String::new(), secure);
    cookie.set_max_age(time::Duration::seconds(0));
    cookie.set_expires(time::OffsetDateTime::unix_epoch());
    cookie
}

fn hmac_hex(secret: &str, value: &str) -> Option<String> {
    let mut mac = Hmac::<Sha256>::new_varkey(secret.as_bytes()).ok()?;
    mac.update(value.as_bytes());
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// `value.hex(hmac(value))`
fn sign_value(secret: &str, value: &str) -> Result<String, AppError> {
    let signature =
        hmac_hex(secret, value).ok_or_else(|| AppError::Unavailable("hmac key".to_string()))?;
    Ok(format!("{}.{}", value, signature))
}

/// The value of a cookie written by `sign_value`, if its signature checks out.
fn verify_signed_value(secret: &str, signed: &str) -> Option<String> {
    let mut parts = signed.splitn(2, '.');
    let value = parts.next()?;
    let signature = hex::decode(parts.next()?).ok()?;
    let mut mac = Hmac::<Sha256>::new_varkey(secret.as_bytes()).ok()?;
    mac.update(value.as_bytes());
    mac.verify(&signature).ok()?;
    Some(value.to_string())
}

fn random_state() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::encode_config(&bytes, base64::URL_SAFE_NO_PAD)
}

fn encode_pkce(client_id: &str, code_challenge: &str, method: &str) -> String {
    base64::encode_config(
        format!("{}\n{}\n{}", client_id, code_challenge, method),
        base64::URL_SAFE,
    )
}

/// `(client_id, code_challenge, code_challenge_method)` from the PKCE cookie.
fn decode_pkce(value: &str) -> Option<(String, String, String)> {
    let decoded = String::from_utf8(base64::decode_config(value, base64::URL_SAFE).ok()?).ok()?;
    let mut parts = decoded.splitn(3, '\n').map(|part| part.trim().to_string());
    let client_id = parts.next().filter(|s| !s.is_empty())?;
    let code_challenge = parts.next().filter(|s| !s.is_empty())?;
    let method = parts
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| pkce::METHOD_S256.to_string());
    Some((client_id, code_challenge, method))
}

fn redirect(location: &str, cookies: Vec<Cookie<'static>>) -> HttpResponse {
    let mut response = HttpResponse::Found();
    response.header(header::LOCATION, location);
    for cookie in cookies {
        response.cookie(cookie);
    }
    response.finish()
}

fn hosted_ui_url(
    config: &FederatedConfig,
    identity_provider: &str,
    state: Option<&str>,
) -> Result<Url, AppError> {
    config
        .hosted_ui
        .authorize_url(identity_provider, state)
        .map_err(|e| AppError::Unavailable(e.to_string()))
}

/// Send the browser to the frontend with `key=value` added to its query, or answer with
/// `{key: value}` when there is no frontend to go to.
fn finish_at_frontend(
    config: &FederatedConfig,
    key: &str,
    value: &str,
    cookies: Vec<Cookie<'static>>,
) -> Result<HttpResponse, AppError> {
    match &config.frontend_redirect_uri {
        Some(frontend) => {
            let mut url = Url::parse(frontend)
                .map_err(|e| AppError::Unavailable(format!("frontend redirect uri: {}", e)))?;
            url.query_pairs_mut().append_pair(key, value);
            Ok(redirect(url.as_str(), cookies))
        }
        None => {
            let mut response = HttpResponse::Ok();
            for cookie in cookies {
                response.cookie(cookie);
            }
            Ok(response.json(json!({ key: value })))
        }
    }
}

fn start_sign_in(
    service: &BackendService,
    params: &StartParams,
    identity_provider: &str,
) -> actix_web::Result<HttpResponse> {
    let config = federated_config(service)?;
    let client_id = params.client_id.trim();
    let code_challenge = params.code_challenge.trim();
    if client_id.is_empty() || code_challenge.is_empty() {
        return Err(
            invalid_input("client_id and code_challenge required for federated login").into(),
        );
    }
    let method = match params.code_challenge_method.trim() {
        "" => pkce::METHOD_S256,
        method => method,
    };
    if !pkce::is_supported_method(method) {
        return Err(invalid_input("code_challenge_method must be S256").into());
    }

    let mut cookies = vec![oauth_cookie(
        PKCE_COOKIE,
        encode_pkce(client_id, code_challenge, method),
        service.cookie_secure,
    )];
    let state = match &config.state_secret {
        Some(secret) => {
            let state = random_state();
            cookies.push(oauth_cookie(
                STATE_COOKIE,
                sign_value(secret, &state)?,
                service.cookie_secure,
            ));
            Some(state)
        }
        None => None,
    };
    let url = hosted_ui_url(config, identity_provider, state.as_deref())?;
    Ok(redirect(url.as_str(), cookies))
}

fn start_link(
    request: &HttpRequest,
    service: &BackendService,
    identity_provider: &str,
) -> actix_web::Result<HttpResponse> {
    let config = federated_config(service)?;
    let user = http::get_session_user(request, service)?;
    let secret = config.state_secret.as_deref().ok_or_else(|| {
        AppError::NotImplemented("account linking requires oauth_state_secret".to_string())
    })?;

    let state = random_state();
    let link_value = base64::encode_config(&user.user_id, base64::URL_SAFE_NO_PAD);
    let cookies = vec![
        oauth_cookie(STATE_COOKIE, sign_value(secret, &state)?, service.cookie_secure),
        oauth_cookie(
            LINK_COOKIE,
            sign_value(secret, &link_value)?,
            service.cookie_secure,
        ),
    ];
    let url = hosted_ui_url(config, identity_provider, Some(&state))?;
    Ok(redirect(url.as_str(), cookies))
}

#[get("/auth/google")]
pub async fn google(
    params: web::Query<StartParams>,
    service: web::Data<BackendService>,
) -> actix_web::Result<HttpResponse> {
    start_sign_in(&service, &params, "Google")
}

#[get("/auth/apple")]
pub async fn apple(
    params: web::Query<StartParams>,
    service: web::Data<BackendService>,
) -> actix_web::Result<HttpResponse> {
    start_sign_in(&service, &params, "SignInWithApple")
}

#[get("/auth/link/google")]
pub async fn link_google(
    request: HttpRequest,
    service: web::Data<BackendService>,
) -> actix_web::Result<HttpResponse> {
    start_link(&request, &service, "Google")
}

#[get("/auth/link/apple")]
pub async fn link_apple(
    request: HttpRequest,
    service: web::Data<BackendService>,
) -> actix_web::Result<HttpResponse> {
    start_link(&request, &service, "SignInWithApple")
}

fn check_state(request: &HttpRequest, secret: &str, query_state: &str) -> Result<(), AppError> {
    let cookie = request
        .cookie(STATE_COOKIE)
        .filter(|cookie| !cookie.value().is_empty())
        .ok_or_else(|| invalid_input("missing or invalid state"))?;
    let state = verify_signed_value(secret, cookie.value())
        .ok_or_else(|| invalid_input("invalid state"))?;
    if state != query_state {
        return Err(invalid_input("state mismatch"));
    }
    Ok(())
}

/// The user id in a valid link cookie.
fn link_user_id(request: &HttpRequest, secret: Option<&str>) -> Option<String> {
    let secret = secret?;
    let cookie = request.cookie(LINK_COOKIE)?;
    let value = verify_signed_value(secret, cookie.value())?;
    let user_id = base64::decode_config(&value, base64::URL_SAFE_NO_PAD).ok()?;
    String::from_utf8(user_id).ok().filter(|id| !id.is_empty())
}

#[get("/auth/callback")]
pub async fn callback(
    request: HttpRequest,
    params: web::Query<CallbackParams>,
    service: web::Data<BackendService>,
) -> actix_web::Result<HttpResponse> {
    let config = federated_config(&service)?;
    let secure = service.cookie_secure;
    let mut cookies = vec![];
    if let Some(secret) = config.state_secret.as_deref() {
        check_state(&request, secret, &params.state)?;
        cookies.push(cleared_oauth_cookie(STATE_COOKIE, secure));
    }
    if params.code.is_empty() {
        return Err(invalid_input("missing code").into());
    }

    let id_token = match config.hosted_ui.exchange_code(&params.code).await {
        Ok(id_token) => id_token,
        Err(HostedUiError::Rejected(e)) => {
            log::warn!("Hosted UI code exchange rejected: {}", e);
            return Err(unauthenticated("federated token exchange failed").into());
        }
        Err(e) => return Err(AppError::Unavailable(e.to_string()).into()),
    };
    let identity = match config.jwks.validate_id_token(&id_token).await {
        Ok(identity) => identity,
        Err(e) => {
            log::warn!("Rejected federated id token: {}", e);
            return Err(unauthenticated("invalid id_token").into());
        }
    };

    if let Some(user_id) = link_user_id(&request, config.state_secret.as_deref()) {
        cookies.push(cleared_oauth_cookie(LINK_COOKIE, secure));
        return match service.users.link_cognito_sub(&user_id, &identity.sub).await {
            Ok(()) => {
                log::info!("Linked a federated identity to {}", user_id);
                Ok(finish_at_frontend(config, "linked", "1", cookies)?)
            }
            Err(AppError::SubLinkedToOtherAccount) => {
                Ok(finish_at_frontend(config, "error", "already_linked", cookies)?)
            }
            Err(e) => Err(e.into()),
        };
    }

    let user_id = service
        .users
        .ensure_user_for_cognito(&identity.email, &identity.sub)
        .await?;
    let (client_id, code_challenge, method) = request
        .cookie(PKCE_COOKIE)
        .and_then(|cookie| decode_pkce(cookie.value()))
        .ok_or_else(|| {
            invalid_input(
                "client_id and code_challenge required (start federated login with query params)",
            )
        })?;
    cookies.push(cleared_oauth_cookie(PKCE_COOKIE, secure));
    let grant = service
        .auth
        .create_auth_code(&user_id, &client_id, &code_challenge, &method)
        .await?;

    let key = if config.frontend_redirect_uri.is_some() {
        "code"
    } else {
        "authorization_code"
    };
    Ok(finish_at_frontend(
        config,
        key,
        &grant.authorization_code,
        cookies,
    )?)
}
