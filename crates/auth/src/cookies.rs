//! Session cookies
//!
//! Every cookie is `Secure; HttpOnly; SameSite=Lax; Path=/`. Clearing writes an
//! empty value with an expiry in the past.

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use time::{Duration, OffsetDateTime};

use crate::claims::TokenType;

pub const AUTH_COOKIE: &str = "auth-token";
pub const REFRESH_COOKIE: &str = "refresh-token";
pub const EMAIL_RESEND_COOKIE: &str = "email-resend-token";
pub const RESET_EMAIL_COOKIE: &str = "reset-email-token";

/// Access + refresh credentials handed to the browser
#[derive(Debug, Clone, PartialEq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

fn build(name: &'static str, value: String, max_age: Duration) -> Cookie<'static> {
    Cookie::build((name, value))
        .path("/")
        .secure(true)
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(max_age)
        .build()
}

fn ttl_of(token_type: TokenType) -> Duration {
    Duration::seconds(token_type.ttl().num_seconds())
}

/// Cookie holding a token of `token_type`, living as long as the token
pub fn token_cookie(name: &'static str, value: String, token_type: TokenType) -> Cookie<'static> {
    build(name, value, ttl_of(token_type))
}

fn expired(name: &'static str) -> Cookie<'static> {
    Cookie::build((name, ""))
        .path("/")
        .secure(true)
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(Duration::ZERO)
        .expires(OffsetDateTime::UNIX_EPOCH)
        .build()
}

/// Add the access and refresh cookies for `tokens`
pub fn set_session_cookies(jar: CookieJar, tokens: &TokenPair) -> CookieJar {
    jar.add(token_cookie(
        AUTH_COOKIE,
        tokens.access_token.clone(),
        TokenType::Auth,
    ))
    .add(token_cookie(
        REFRESH_COOKIE,
        tokens.refresh_token.clone(),
        TokenType::Refresh,
    ))
}

/// Expire the access, refresh and email-resend cookies
pub fn clear_session_cookies(jar: CookieJar) -> CookieJar {
    jar.add(expired(AUTH_COOKIE))
        .add(expired(REFRESH_COOKIE))
        .add(expired(EMAIL_RESEND_COOKIE))
}

/// Expire a single cookie
pub fn clear_cookie(jar: CookieJar, name: &'static str) -> CookieJar {
    jar.add(expired(name))
}

/// Non-empty value of cookie `name`
pub fn cookie_value(jar: &CookieJar, name: &str) -> Option<String> {
    jar.get(name)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
}
