//! Axum extractors for authentication
//!
//! Generic over any state `S` where `AuthBackend: FromRef<S>`.
//! This is axum's idiomatic nested-state pattern.

use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use axum_extra::extract::cookie::CookieJar;

use crate::backend::AuthBackend;
use crate::context::AuthContext;
use crate::error::AuthError;

/// Authenticated caller: API key or access cookie, fence applied
#[derive(Debug, Clone)]
pub struct AuthUser(pub AuthContext);

impl<S> FromRequestParts<S> for AuthUser
where
    AuthBackend: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        if let Some(ctx) = parts.extensions.get::<AuthContext>() {
            return Ok(AuthUser(ctx.clone()));
        }

        let backend = AuthBackend::from_ref(state);
        let jar = CookieJar::from_headers(&parts.headers);
        let ctx = backend.authenticate(&parts.headers, &jar).await?;

        parts.extensions.insert(ctx.clone());
        Ok(AuthUser(ctx))
    }
}

/// Authenticated caller holding a real session (cookie auth only)
#[derive(Debug, Clone)]
pub struct SessionUser(pub AuthContext);

impl<S> FromRequestParts<S> for SessionUser
where
    AuthBackend: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        let AuthUser(ctx) = AuthUser::from_request_parts(parts, state).await?;
        if ctx.session_id().is_none() {
            return Err(AuthError::Forbidden);
        }
        Ok(SessionUser(ctx))
    }
}

/// Caller context when present; never rejects
#[derive(Debug, Clone)]
pub struct MaybeAuthUser(pub Option<AuthContext>);

impl<S> FromRequestParts<S> for MaybeAuthUser
where
    AuthBackend: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        Ok(MaybeAuthUser(
            AuthUser::from_request_parts(parts, state)
                .await
                .ok()
                .map(|AuthUser(ctx)| ctx),
        ))
    }
}
