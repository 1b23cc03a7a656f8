//! Tenant re-scoping middleware
//!
//! Applied as a `route_layer` on routes carrying a `{slug}` parameter. When the
//! provider access token is scoped to a different organization than the team
//! addressed by the route, the refresh cookie is exchanged for a token scoped
//! to that team's organization. The request is then served with the new
//! cookies, which are also returned to the browser. A failed exchange answers
//! `team_not_found`, whether the team is missing or the caller is not a member.
//! Requests presenting an API key are never re-scoped; the key wins over any
//! cookie sent alongside it.

use std::collections::HashMap;

use axum::{
    extract::{Path, Request, State},
    http::{header::COOKIE, HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use jsonwebtoken::Algorithm;
use tenantry_common::ClientContext;
use tenantry_workos::ClientHints;

use crate::backend::{AuthBackend, API_KEY_HEADER};
use crate::context::AuthContext;
use crate::cookies::{cookie_value, set_session_cookies, TokenPair, AUTH_COOKIE, REFRESH_COOKIE};
use crate::error::AuthError;
use crate::jwt::token_algorithm;

enum Scope {
    /// Nothing to do; the handler's extractor reports any credential problem
    PassThrough,
    /// Token already scoped to the team
    Current(AuthContext),
    /// Exchanged for new tokens
    Rescoped(TokenPair),
}

pub async fn team_scope(
    State(backend): State<AuthBackend>,
    Path(params): Path<HashMap<String, String>>,
    client: ClientContext,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(slug) = params.get("slug") else {
        return next.run(request).await;
    };

    let scope = resolve_scope(&backend, slug, request.headers(), &jar, &client).await;
    match scope {
        Ok(Scope::PassThrough) => next.run(request).await,
        Ok(Scope::Current(ctx)) => {
            request.extensions_mut().insert(ctx);
            next.run(request).await
        }
        Ok(Scope::Rescoped(tokens)) => {
            rewrite_cookie_header(request.headers_mut(), &jar, &tokens);
            let response = next.run(request).await;
            (set_session_cookies(CookieJar::new(), &tokens), response).into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// Access cookie eligible for re-scoping
fn scoped_cookie(headers: &HeaderMap, jar: &CookieJar) -> Option<String> {
    if headers.contains_key(API_KEY_HEADER) {
        return None;
    }
    cookie_value(jar, AUTH_COOKIE)
}

async fn resolve_scope(
    backend: &AuthBackend,
    slug: &str,
    headers: &HeaderMap,
    jar: &CookieJar,
    client: &ClientContext,
) -> Result<Scope, AuthError> {
    let Some(token) = scoped_cookie(headers, jar) else {
        return Ok(Scope::PassThrough);
    };
    // Internal tokens carry no organization
    if token_algorithm(&token).ok() != Some(Algorithm::RS256) {
        return Ok(Scope::PassThrough);
    }
    let Ok((ctx, claims)) = backend.authenticate_provider(&token).await else {
        return Ok(Scope::PassThrough);
    };
    let Some(organization_id) = backend.team_organization(slug).await? else {
        return Ok(Scope::Current(ctx));
    };
    if claims.org_id.as_deref() == Some(organization_id.as_str()) {
        return Ok(Scope::Current(ctx));
    }

    let refresh_token = cookie_value(jar, REFRESH_COOKIE).ok_or(AuthError::TeamNotFound)?;
    let hints = ClientHints {
        ip_address: client.ip.clone(),
        user_agent: client.device.clone(),
    };
    let exchanged = backend
        .identity()
        .authenticate_with_refresh_token(&refresh_token, Some(&organization_id), &hints)
        .await
        .map_err(|e| {
            tracing::info!(
                error = %e,
                user_id = %ctx.user.id,
                team = %slug,
                "Re-scoping exchange refused"
            );
            AuthError::TeamNotFound
        })?;

    let new_claims = backend.jwks().verify(&exchanged.access_token).await?;
    backend.rebind_session(ctx.session.id, &new_claims.sid).await?;
    tracing::debug!(
        user_id = %ctx.user.id,
        organization_id = %organization_id,
        "Session re-scoped to team organization"
    );

    Ok(Scope::Rescoped(TokenPair {
        access_token: exchanged.access_token,
        refresh_token: exchanged.refresh_token,
    }))
}

/// Replace the auth cookies in the inbound `Cookie` header
fn rewrite_cookie_header(headers: &mut HeaderMap, jar: &CookieJar, tokens: &TokenPair) {
    let jar = jar
        .clone()
        .add(Cookie::new(AUTH_COOKIE, tokens.access_token.clone()))
        .add(Cookie::new(REFRESH_COOKIE, tokens.refresh_token.clone()));
    let value = jar
        .iter()
        .map(|c| format!("{}={}", c.name(), c.value()))
        .collect::<Vec<_>>()
        .join("; ");

    headers.remove(COOKIE);
    match HeaderValue::from_str(&value) {
        Ok(v) => {
            headers.insert(COOKIE, v);
        }
        Err(e) => tracing::warn!(error = %e, "Re-scoped cookie header is not representable"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewrite_cookie_header_replaces_tokens() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("auth-token=old; refresh-token=oldr; theme=dark"),
        );
        let jar = CookieJar::from_headers(&headers);

        rewrite_cookie_header(
            &mut headers,
            &jar,
            &TokenPair {
                access_token: "new".to_string(),
                refresh_token: "newr".to_string(),
            },
        );

        let rewritten = CookieJar::from_headers(&headers);
        assert_eq!(rewritten.get(AUTH_COOKIE).unwrap().value(), "new");
        assert_eq!(rewritten.get(REFRESH_COOKIE).unwrap().value(), "newr");
        assert_eq!(rewritten.get("theme").unwrap().value(), "dark");
        assert_eq!(headers.get_all(COOKIE).iter().count(), 1);
    }

    #[test]
    fn test_api_key_request_is_not_rescoped() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("auth-token=provider.jwt"));
        let jar = CookieJar::from_headers(&headers);
        assert_eq!(scoped_cookie(&headers, &jar).as_deref(), Some("provider.jwt"));

        headers.insert(API_KEY_HEADER, HeaderValue::from_static("sk_live_0123456789abcdef"));
        assert_eq!(scoped_cookie(&headers, &jar), None);
    }
}
