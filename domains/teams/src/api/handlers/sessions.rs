//! Session handlers: identity, refresh and revocation

use axum::{
    extract::{Path, State},
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;
use chrono::Utc;
use serde::Serialize;
use tenantry_auth::cookies::{
    clear_session_cookies, cookie_value, set_session_cookies, REFRESH_COOKIE,
};
use tenantry_auth::{jwt, AuthError, AuthMethod, AuthUser, SessionUser, TokenPair, TokenType};
use tenantry_common::{ApiResponse, ClientContext, ErrorCode, Result};
use uuid::Uuid;

use crate::api::middleware::TeamsState;
use crate::api::session::{hints, load_user, provider_error, revoke_provider_sessions};
use crate::domain::entities::{Session, User};
use crate::repository::transactions::{bump_security_version_tx, revoke_user_sessions_tx};

#[derive(Debug, Serialize)]
pub struct IdentityResponse {
    pub user: User,
    pub session_id: Option<Uuid>,
    pub method: AuthMethod,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    #[serde(flatten)]
    pub session: Session,
    pub current: bool,
}

/// Current user and session
///
/// **GET /auth/identity**
pub async fn identity(
    State(state): State<TeamsState>,
    AuthUser(ctx): AuthUser,
) -> Result<ApiResponse<IdentityResponse>> {
    let user = load_user(&state, ctx.user_id()).await?;
    Ok(ApiResponse::data(IdentityResponse {
        user,
        session_id: ctx.session_id(),
        method: ctx.method,
    }))
}

struct Refreshed {
    user: User,
    session: Session,
    tokens: TokenPair,
    method: AuthMethod,
}

/// Exchange the refresh cookie for a new token pair
///
/// **GET /auth/refresh**
///
/// Internal refresh tokens are HS256 JWTs; anything else is treated as an
/// identity provider refresh token. Concurrent refreshes each succeed; the
/// session row keeps the last writer's audit fields. A fenced or revoked
/// session answers `session_expired` and clears the cookies.
pub async fn refresh(
    State(state): State<TeamsState>,
    client: ClientContext,
    jar: CookieJar,
) -> Response {
    let Some(refresh_token) = cookie_value(&jar, REFRESH_COOKIE) else {
        return AuthError::MissingToken.into_response();
    };

    let refreshed = if jwt::token_algorithm(&refresh_token).is_ok() {
        refresh_internal(&state, &client, &refresh_token).await
    } else {
        refresh_provider(&state, &client, &refresh_token).await
    };

    match refreshed {
        Ok(refreshed) => {
            tracing::debug!(
                user_id = %refreshed.user.id,
                session_id = %refreshed.session.id,
                "Session refreshed"
            );
            (
                set_session_cookies(jar, &refreshed.tokens),
                ApiResponse::data(IdentityResponse {
                    user: refreshed.user,
                    session_id: Some(refreshed.session.id),
                    method: refreshed.method,
                }),
            )
                .into_response()
        }
        Err(e) if e.code() == ErrorCode::SessionExpired => {
            (clear_session_cookies(jar), e).into_response()
        }
        Err(e) => e.into_response(),
    }
}

async fn refresh_internal(
    state: &TeamsState,
    client: &ClientContext,
    refresh_token: &str,
) -> Result<Refreshed> {
    let claims = jwt::validate_token(refresh_token, state.auth.config(), TokenType::Refresh)?;
    let session_id = claims.session_id.ok_or(AuthError::InvalidToken)?;

    let user = load_user(state, claims.user_id).await?;
    if user.is_deleted() {
        return Err(AuthError::UserDeleted.into());
    }

    let session = state
        .repos
        .sessions
        .get_by_id(session_id)
        .await?
        .filter(|s| s.user_id == user.id)
        .ok_or(AuthError::Unauthorized)?;

    let now = Utc::now();
    if claims.version < user.security_version_millis() || !session.is_active(&user, now) {
        return Err(AuthError::SessionExpired.into());
    }

    let session = state
        .repos
        .sessions
        .record_refresh(session.id, None, now, client)
        .await?
        .ok_or(AuthError::SessionExpired)?;

    let tokens = jwt::issue_session_tokens(state.auth.config(), user.id, session.id, now)?;

    Ok(Refreshed {
        user,
        session,
        tokens,
        method: AuthMethod::Internal,
    })
}

async fn refresh_provider(
    state: &TeamsState,
    client: &ClientContext,
    refresh_token: &str,
) -> Result<Refreshed> {
    let authenticated = state
        .auth
        .identity()
        .authenticate_with_refresh_token(refresh_token, None, &hints(client))
        .await
        .map_err(|e| provider_error("authenticate_with_refresh_token", e))?;

    let claims = state.auth.jwks().verify(&authenticated.access_token).await?;

    let user = state
        .repos
        .users
        .find_by_external_id(&claims.sub)
        .await?
        .ok_or(AuthError::Unauthorized)?;
    if user.is_deleted() {
        return Err(AuthError::UserDeleted.into());
    }

    let session = state
        .repos
        .sessions
        .find_by_external_id(&claims.sid)
        .await?
        .filter(|s| s.user_id == user.id)
        .ok_or(AuthError::Unauthorized)?;

    let now = Utc::now();
    if !session.is_active(&user, now) {
        return Err(AuthError::SessionExpired.into());
    }

    let session = state
        .repos
        .sessions
        .record_refresh(session.id, Some(&claims.sid), now, client)
        .await?
        .ok_or(AuthError::SessionExpired)?;

    Ok(Refreshed {
        user,
        session,
        tokens: TokenPair {
            access_token: authenticated.access_token,
            refresh_token: authenticated.refresh_token,
        },
        method: AuthMethod::Provider,
    })
}

/// The caller's live sessions
///
/// **GET /auth/sessions**
pub async fn list_sessions(
    State(state): State<TeamsState>,
    AuthUser(ctx): AuthUser,
) -> Result<ApiResponse<Vec<SessionResponse>>> {
    let current = ctx.session_id();
    let sessions = state.repos.sessions.list_for_user(ctx.user_id()).await?;

    Ok(ApiResponse::data(
        sessions
            .into_iter()
            .map(|session| SessionResponse {
                current: Some(session.id) == current,
                session,
            })
            .collect(),
    ))
}

/// Sign out everywhere
///
/// **DELETE /auth/sessions**
///
/// Moves the security version forward, so every outstanding token is fenced
/// even before its TTL, and revokes each provider session.
pub async fn revoke_all_sessions(
    State(state): State<TeamsState>,
    SessionUser(ctx): SessionUser,
    jar: CookieJar,
) -> Result<(CookieJar, ApiResponse<()>)> {
    let mut transaction = state.repos.begin().await?;
    bump_security_version_tx(&mut transaction, ctx.user_id(), Utc::now()).await?;
    let external_sessions = revoke_user_sessions_tx(&mut transaction, ctx.user_id()).await?;
    transaction.commit().await?;

    revoke_provider_sessions(&state, &external_sessions).await;

    tracing::info!(user_id = %ctx.user_id(), "All sessions revoked");
    Ok((
        clear_session_cookies(jar),
        ApiResponse::message("All sessions revoked"),
    ))
}

/// Revoke one session
///
/// **DELETE /auth/sessions/{id}**
pub async fn revoke_session(
    State(state): State<TeamsState>,
    SessionUser(ctx): SessionUser,
    Path(session_id): Path<Uuid>,
    jar: CookieJar,
) -> Result<(CookieJar, ApiResponse<()>)> {
    let revoked = state
        .repos
        .sessions
        .revoke(ctx.user_id(), session_id)
        .await?
        .ok_or(ErrorCode::NotFound)?;

    if let Some(external) = revoked.external_session_id {
        revoke_provider_sessions(&state, &[external]).await;
    }

    let jar = if ctx.session_id() == Some(session_id) {
        clear_session_cookies(jar)
    } else {
        jar
    };

    Ok((jar, ApiResponse::message("Session revoked")))
}
