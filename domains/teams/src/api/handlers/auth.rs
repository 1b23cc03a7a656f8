//! Sign-up, sign-in and account recovery handlers
//!
//! Password accounts are verified locally and receive internal HS256 session
//! tokens. OAuth and magic-auth sign-ins go through the identity provider and
//! keep the provider's token pair as the session cookies.

use axum::{
    extract::{Path, Query, State},
    response::Redirect as HttpRedirect,
};
use axum_extra::extract::cookie::CookieJar;
use chrono::Utc;
use serde::Deserialize;
use tenantry_auth::cookies::{
    clear_session_cookies, cookie_value, set_session_cookies, token_cookie, EMAIL_RESEND_COOKIE,
};
use tenantry_auth::{jwt, AuthError, MaybeAuthUser, TokenType};
use tenantry_common::{
    crypto, db::is_unique_violation, ApiResponse, ClientContext, Error, ErrorCode, Redirect,
    Result, ValidatedJson,
};
use tenantry_workos::{AuthenticationResponse, IdentityError, UpdateUser};
use validator::Validate;

use crate::api::middleware::TeamsState;
use crate::api::session::{
    check_login_password, confirm_email_url, hints, landing_url, provider_error, random_delay,
    revoke_provider_sessions, start_internal_session, start_provider_session,
    RESET_MISS_DELAY_MS,
};
use crate::domain::entities::User;
use crate::domain::validation::{is_valid_email, normalize_email, validate_password};
use crate::repository::transactions::{revoke_user_sessions_tx, set_password_tx};

#[derive(Debug, Deserialize, Validate)]
pub struct SignupRequest {
    #[validate(length(min = 1, max = 320))]
    pub email: String,
    pub password: String,
    #[validate(length(max = 100))]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, max = 320))]
    pub email: String,
    #[validate(length(min = 1))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ForgotPasswordRequest {
    #[validate(length(min = 1, max = 320))]
    pub email: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ResetPasswordRequest {
    #[validate(length(min = 1))]
    pub token: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyQuery {
    pub code: String,
    pub email: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct AuthorizeQuery {
    pub state: Option<String>,
}

/// Email a fresh confirmation link; send failures are logged only
async fn send_confirmation(state: &TeamsState, user: &User) -> Result<()> {
    let token = jwt::issue_token(
        state.auth.config(),
        user.id,
        None,
        TokenType::EmailConfirmation,
        Utc::now(),
    )?;
    let link = state
        .config
        .api_link(&format!("/auth/confirm?token={token}"));

    if let Err(e) = state.email.send_email_confirmation(&user.email, &link).await {
        tracing::warn!(error = %e, user_id = %user.id, "Failed to send confirmation email");
    }
    Ok(())
}

fn resend_cookie(state: &TeamsState, jar: CookieJar, user: &User) -> Result<CookieJar> {
    let token = jwt::issue_token(
        state.auth.config(),
        user.id,
        None,
        TokenType::EmailResend,
        Utc::now(),
    )?;
    Ok(jar.add(token_cookie(EMAIL_RESEND_COOKIE, token, TokenType::EmailResend)))
}

/// Create a password account
///
/// **POST /auth/signup**
pub async fn signup(
    State(state): State<TeamsState>,
    client: ClientContext,
    jar: CookieJar,
    ValidatedJson(request): ValidatedJson<SignupRequest>,
) -> Result<(CookieJar, ApiResponse<Redirect>)> {
    let email = normalize_email(&request.email);
    if !is_valid_email(&email) {
        return Err(Error::api(ErrorCode::InvalidRequest, "Invalid email address"));
    }
    validate_password(&request.password)?;

    if state.repos.users.find_by_email(&email).await?.is_some() {
        return Err(ErrorCode::EmailTaken.into());
    }

    let name = request
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty());

    let identity_user = state
        .auth
        .identity()
        .create_user(&email, Some(&request.password), name)
        .await
        .map_err(|e| match e {
            IdentityError::Response { status: 409 | 422, .. } => ErrorCode::EmailTaken.into(),
            other => provider_error("create_user", other),
        })?;

    let password_hash = crypto::hash_password(&request.password)
        .map_err(|e| Error::Unexpected(anyhow::anyhow!("failed to hash password: {e}")))?;

    let user = state
        .repos
        .users
        .create(&email, name, Some(&password_hash), Some(&identity_user.id), false)
        .await
        .map_err(|e| match e {
            Error::Database(ref db) if is_unique_violation(db) => ErrorCode::EmailTaken.into(),
            other => other,
        })?;

    let (_, tokens) = start_internal_session(&state, &user, &client).await?;
    send_confirmation(&state, &user).await?;

    let jar = resend_cookie(&state, set_session_cookies(jar, &tokens), &user)?;

    tracing::info!(user_id = %user.id, "User signed up");
    Ok((jar, Redirect::to(confirm_email_url(&state.config, &user.email))))
}

/// Password sign-in
///
/// **POST /auth/login**
///
/// Unknown emails and accounts without a local password wait a random
/// 50-90 ms and fail exactly like a wrong password.
/// A deleted account inside its restore window is restored by signing in.
pub async fn login(
    State(state): State<TeamsState>,
    client: ClientContext,
    jar: CookieJar,
    ValidatedJson(request): ValidatedJson<LoginRequest>,
) -> Result<(CookieJar, ApiResponse<Redirect>)> {
    let email = normalize_email(&request.email);

    let found = state.repos.users.find_by_email(&email).await?;
    if !check_login_password(found.as_ref(), &request.password).await {
        return Err(ErrorCode::InvalidCredentials.into());
    }
    let Some(mut user) = found else {
        return Err(ErrorCode::InvalidCredentials.into());
    };

    if user.is_deleted() {
        if !user.is_restorable(Utc::now()) {
            return Err(ErrorCode::UserDeleted.into());
        }
        user = state.repos.users.restore(user.id).await?;
        tracing::info!(user_id = %user.id, "Deleted account restored on login");
    }

    let (_, tokens) = start_internal_session(&state, &user, &client).await?;

    Ok((
        set_session_cookies(jar, &tokens),
        Redirect::to(landing_url(&state.config, &user)),
    ))
}

/// Revoke the current session and clear cookies
///
/// **POST /auth/logout**
pub async fn logout(
    State(state): State<TeamsState>,
    MaybeAuthUser(auth): MaybeAuthUser,
    jar: CookieJar,
) -> Result<(CookieJar, ApiResponse<()>)> {
    if let Some(ctx) = auth {
        if let Some(session_id) = ctx.session_id() {
            let revoked = state.repos.sessions.revoke(ctx.user_id(), session_id).await?;
            if let Some(external) = revoked.and_then(|s| s.external_session_id) {
                revoke_provider_sessions(&state, &[external]).await;
            }
        }
    }

    Ok((clear_session_cookies(jar), ApiResponse::message("Logged out")))
}

/// Confirm an email address from the emailed link
///
/// **GET /auth/confirm?token=**
pub async fn confirm_email(
    State(state): State<TeamsState>,
    Query(query): Query<TokenQuery>,
) -> Result<HttpRedirect> {
    let claims = jwt::validate_token(
        &query.token,
        state.auth.config(),
        TokenType::EmailConfirmation,
    )?;

    let mut user = state
        .repos
        .users
        .get_by_id(claims.user_id)
        .await?
        .ok_or(AuthError::InvalidToken)?;

    if user.is_email_confirmed() {
        return Err(ErrorCode::EmailAlreadyConfirmed.into());
    }

    state.repos.users.confirm_email(user.id).await?;
    user.email_confirmed_at = Some(Utc::now());

    if let Some(external_id) = user.external_id.as_deref() {
        let update = UpdateUser {
            email_verified: Some(true),
            ..Default::default()
        };
        if let Err(e) = state.auth.identity().update_user(external_id, update).await {
            tracing::warn!(error = %e, user_id = %user.id, "Failed to mirror email verification");
        }
    }

    tracing::info!(user_id = %user.id, "Email confirmed");
    Ok(HttpRedirect::to(&landing_url(&state.config, &user)))
}

/// Local user for a provider identity: by external id, then by email, else new
async fn upsert_provider_user(
    state: &TeamsState,
    authenticated: &AuthenticationResponse,
) -> Result<User> {
    let identity = &authenticated.user;
    let users = &state.repos.users;

    let existing = match users.find_by_external_id(&identity.id).await? {
        Some(user) => Some(user),
        None => match users.find_by_email(&identity.email).await? {
            Some(user) => Some(users.link_external_id(user.id, &identity.id).await?),
            None => None,
        },
    };

    let mut user = match existing {
        Some(user) => user,
        None => {
            let name = match (&identity.first_name, &identity.last_name) {
                (Some(first), Some(last)) => Some(format!("{first} {last}")),
                (Some(first), None) => Some(first.clone()),
                (None, Some(last)) => Some(last.clone()),
                (None, None) => None,
            };
            let created = users
                .create(
                    &normalize_email(&identity.email),
                    name.as_deref(),
                    None,
                    Some(&identity.id),
                    identity.email_verified,
                )
                .await?;
            tracing::info!(user_id = %created.id, "User created from identity provider");
            created
        }
    };

    if user.is_deleted() {
        if !user.is_restorable(Utc::now()) {
            return Err(ErrorCode::UserDeleted.into());
        }
        user = users.restore(user.id).await?;
    }

    if identity.email_verified && !user.is_email_confirmed() {
        users.confirm_email(user.id).await?;
        user.email_confirmed_at = Some(Utc::now());
    }

    Ok(user)
}

async fn complete_provider_login(
    state: &TeamsState,
    client: &ClientContext,
    jar: CookieJar,
    authenticated: AuthenticationResponse,
) -> Result<(CookieJar, HttpRedirect)> {
    let user = upsert_provider_user(state, &authenticated).await?;
    let (_, tokens) = start_provider_session(state, &user, authenticated, client).await?;

    Ok((
        set_session_cookies(jar, &tokens),
        HttpRedirect::to(&landing_url(&state.config, &user)),
    ))
}

/// OAuth redirect target
///
/// **GET /auth/callback?code=**
///
/// A user in several organizations is scoped to the first one offered; the
/// team re-scoping middleware moves the session when another team is opened.
pub async fn callback(
    State(state): State<TeamsState>,
    client: ClientContext,
    jar: CookieJar,
    Query(query): Query<CallbackQuery>,
) -> Result<(CookieJar, HttpRedirect)> {
    let identity = state.auth.identity();

    let authenticated = match identity
        .authenticate_with_code(&query.code, &hints(&client))
        .await
    {
        Ok(authenticated) => authenticated,
        Err(IdentityError::OrganizationSelectionRequired {
            pending_authentication_token,
            organizations,
        }) => {
            let organization = organizations
                .first()
                .ok_or_else(|| Error::api(ErrorCode::Unauthorized, "No organization available"))?;
            identity
                .authenticate_with_organization_selection(
                    &pending_authentication_token,
                    &organization.id,
                )
                .await
                .map_err(|e| provider_error("authenticate_with_organization_selection", e))?
        }
        Err(e) => return Err(provider_error("authenticate_with_code", e)),
    };

    complete_provider_login(&state, &client, jar, authenticated).await
}

/// Magic-auth code sign-in
///
/// **GET /auth/verify?code=&email=**
pub async fn verify(
    State(state): State<TeamsState>,
    client: ClientContext,
    jar: CookieJar,
    Query(query): Query<VerifyQuery>,
) -> Result<(CookieJar, HttpRedirect)> {
    let authenticated = state
        .auth
        .identity()
        .authenticate_with_magic_auth(&query.code, query.email.trim(), &hints(&client))
        .await
        .map_err(|e| provider_error("authenticate_with_magic_auth", e))?;

    complete_provider_login(&state, &client, jar, authenticated).await
}

/// Re-send the confirmation email
///
/// **GET /auth/verify-email**
///
/// Identified by the `email-resend-token` cookie set at signup.
pub async fn resend_confirmation(
    State(state): State<TeamsState>,
    jar: CookieJar,
) -> Result<ApiResponse<()>> {
    let token = cookie_value(&jar, EMAIL_RESEND_COOKIE).ok_or(AuthError::MissingToken)?;
    let claims = jwt::validate_token(&token, state.auth.config(), TokenType::EmailResend)?;

    let user = state
        .repos
        .users
        .get_by_id(claims.user_id)
        .await?
        .ok_or(AuthError::InvalidToken)?;

    if user.is_email_confirmed() {
        return Err(ErrorCode::EmailAlreadyConfirmed.into());
    }

    send_confirmation(&state, &user).await?;
    Ok(ApiResponse::message("Confirmation email sent"))
}

/// Start an OAuth sign-in
///
/// **GET /auth/authorize/{provider}**
pub async fn authorize(
    State(state): State<TeamsState>,
    Path(provider): Path<String>,
    Query(query): Query<AuthorizeQuery>,
) -> HttpRedirect {
    let url = state.auth.identity().authorization_url(
        &provider,
        &state.config.api_link("/auth/callback"),
        query.state.as_deref(),
    );
    HttpRedirect::to(&url)
}

const RESET_REQUESTED: &str = "If an account exists for that email, a reset link has been sent";

/// Request a password reset link
///
/// **POST /auth/forgot-password**
///
/// Known and unknown emails get the same answer; unknown ones wait 300-700 ms.
pub async fn forgot_password(
    State(state): State<TeamsState>,
    ValidatedJson(request): ValidatedJson<ForgotPasswordRequest>,
) -> Result<ApiResponse<()>> {
    let email = normalize_email(&request.email);

    let user = state
        .repos
        .users
        .find_by_email(&email)
        .await?
        .filter(|u| !u.is_deleted());

    let Some(user) = user else {
        random_delay(RESET_MISS_DELAY_MS).await;
        return Ok(ApiResponse::message(RESET_REQUESTED));
    };

    let token = jwt::issue_token(
        state.auth.config(),
        user.id,
        None,
        TokenType::ResetPassword,
        Utc::now(),
    )?;
    let link = state
        .config
        .app_link(&format!("/auth/reset-password?token={token}"));

    if let Err(e) = state.email.send_password_reset(&user.email, &link).await {
        tracing::warn!(error = %e, user_id = %user.id, "Failed to send password reset email");
    }

    Ok(ApiResponse::message(RESET_REQUESTED))
}

/// Complete a password reset
///
/// **POST /auth/reset-password**
///
/// The link is single use: setting the password moves the security version
/// past the token's version and signs out every session.
pub async fn reset_password(
    State(state): State<TeamsState>,
    jar: CookieJar,
    ValidatedJson(request): ValidatedJson<ResetPasswordRequest>,
) -> Result<(CookieJar, ApiResponse<()>)> {
    let claims =
        jwt::validate_token(&request.token, state.auth.config(), TokenType::ResetPassword)?;

    let user = state
        .repos
        .users
        .get_by_id(claims.user_id)
        .await?
        .ok_or(AuthError::InvalidToken)?;

    if user.is_deleted() {
        return Err(ErrorCode::UserDeleted.into());
    }
    if claims.version < user.security_version_millis() {
        return Err(AuthError::InvalidToken.into());
    }

    validate_password(&request.password)?;
    if user.verify_password(&request.password) {
        return Err(ErrorCode::PasswordUnchanged.into());
    }

    let password_hash = crypto::hash_password(&request.password)
        .map_err(|e| Error::Unexpected(anyhow::anyhow!("failed to hash password: {e}")))?;

    let mut transaction = state.repos.begin().await?;
    set_password_tx(&mut transaction, user.id, &password_hash, Utc::now()).await?;
    let external_sessions = revoke_user_sessions_tx(&mut transaction, user.id).await?;
    transaction.commit().await?;

    revoke_provider_sessions(&state, &external_sessions).await;

    if let Some(external_id) = user.external_id.as_deref() {
        let update = UpdateUser {
            password: Some(request.password.clone()),
            ..Default::default()
        };
        if let Err(e) = state.auth.identity().update_user(external_id, update).await {
            tracing::warn!(error = %e, user_id = %user.id, "Failed to mirror password reset");
        }
    }

    tracing::info!(user_id = %user.id, "Password reset");
    Ok((clear_session_cookies(jar), ApiResponse::message("Password updated")))
}
