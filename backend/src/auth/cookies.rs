//! Session and refresh token cookies.
//!
//! Both cookies are HttpOnly and SameSite=Strict, scoped to the whole site. `Secure` is
//! configurable so that local development over plain HTTP still works.

use actix_web::cookie::{Cookie, SameSite};
use actix_web::{HttpMessage, HttpRequest};

use crate::auth::service::TokenPair;

pub const SESSION_COOKIE: &str = "session_token";
pub const REFRESH_COOKIE: &str = "refresh_token";

fn token_cookie(
    name: &'static str,
    value: String,
    max_age_seconds: i64,
    secure: bool,
) -> Cookie<'static> {
    Cookie::build(name, value)
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Strict)
        .max_age(time::Duration::seconds(max_age_seconds))
        .finish()
}

/// Cookies carrying a freshly issued token pair. Each lives as long as its token.
pub fn token_pair_cookies(pair: &TokenPair, secure: bool) -> Vec<Cookie<'static>> {
    vec![
        token_cookie(
            SESSION_COOKIE,
            pair.session_token.clone(),
            pair.expires_in,
            secure,
        ),
        token_cookie(
            REFRESH_COOKIE,
            pair.refresh_token.clone(),
            pair.refresh_expires_in,
            secure,
        ),
    ]
}

/// Cookies that make the browser forget both tokens.
pub fn cleared_cookies(secure: bool) -> Vec<Cookie<'static>> {
    [SESSION_COOKIE, REFRESH_COOKIE]
        .iter()
        .map(|name| {
            let mut cookie = token_cookie(*name, String::new(), 0, secure);
            cookie.set_expires(time::OffsetDateTime::unix_epoch());
            cookie
        })
        .collect()
}

/// The session token from the `session_token` cookie, else from `Authorization: Bearer`.
pub fn session_token_from_request(request: &HttpRequest) -> Option<String> {
    if let Some(cookie) = request.cookie(SESSION_COOKIE) {
        if !cookie.value().is_empty() {
            return Some(cookie.value().to_string());
        }
    }
    let header = request
        .headers()
        .get(actix_web::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?;
    let token = header.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

pub fn refresh_token_from_request(request: &HttpRequest) -> Option<String> {
    request
        .cookie(REFRESH_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    use actix_web::test::TestRequest;

    fn pair() -> TokenPair {
        TokenPair {
            session_token: "jwt".to_string(),
            refresh_token: "r_abc".to_string(),
            expires_at: "2024-01-01T00:00:00.000Z".to_string(),
            expires_in: 900,
            refresh_expires_in: 604800,
        }
    }

    #[test]
    fn test_token_pair_cookies() {
        let cookies = token_pair_cookies(&pair(), true);
        assert_eq!(cookies.len(), 2);
        let session = &cookies[0];
        assert_eq!(session.name(), SESSION_COOKIE);
        assert_eq!(session.value(), "jwt");
        assert_eq!(session.http_only(), Some(true));
        assert_eq!(session.secure(), Some(true));
        assert_eq!(session.same_site(), Some(SameSite::Strict));
        assert_eq!(session.path(), Some("/"));
        assert_eq!(session.max_age(), Some(time::Duration::seconds(900)));
        assert_eq!(cookies[1].max_age(), Some(time::Duration::seconds(604800)));
    }

    #[test]
    fn test_cleared_cookies() {
        for cookie in cleared_cookies(false) {
            assert_eq!(cookie.value(), "");
            assert_eq!(cookie.max_age(), Some(time::Duration::seconds(0)));
            assert_eq!(cookie.secure(), Some(false));
        }
    }

    #[test]
    fn test_session_token_sources() {
        let request = TestRequest::default()
            .cookie(Cookie::new(SESSION_COOKIE, "from-cookie"))
            .header("Authorization", "Bearer from-header")
            .to_http_request();
        assert_eq!(session_token_from_request(&request).as_deref(), Some("from-cookie"));

        let request = TestRequest::default()
            .header("Authorization", "Bearer from-header")
            .to_http_request();
        assert_eq!(session_token_from_request(&request).as_deref(), Some("from-header"));

        let request = TestRequest::default()
            .header("Authorization", "Basic dXNlcjpwYXNz")
            .to_http_request();
        assert_eq!(session_token_from_request(&request), None);
    }
}
