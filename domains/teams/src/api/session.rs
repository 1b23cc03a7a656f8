//! Helpers shared by the session-issuing handlers
//!
//! Starting a session, classifying identity provider failures, best-effort
//! upstream revocation and the post-login landing page.

use std::ops::RangeInclusive;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tenantry_auth::{jwt, TokenPair};
use tenantry_common::{ClientContext, Error, ErrorCode, Result};
use tenantry_workos::{AuthenticationResponse, ClientHints, IdentityError};

use crate::api::middleware::{TeamsConfig, TeamsState};
use crate::domain::entities::{Session, User};
use crate::repository::NewSession;

/// Delay applied on unknown-email login
pub const LOGIN_MISS_DELAY_MS: RangeInclusive<u64> = 50..=90;

/// Delay applied on unknown-email password reset requests
pub const RESET_MISS_DELAY_MS: RangeInclusive<u64> = 300..=700;

pub(crate) fn hints(client: &ClientContext) -> ClientHints {
    ClientHints {
        ip_address: client.ip.clone(),
        user_agent: client.device.clone(),
    }
}

/// Classify an identity provider failure at the route boundary.
pub(crate) fn provider_error(operation: &'static str, err: IdentityError) -> Error {
    match err {
        IdentityError::InvalidGrant(detail) => {
            tracing::info!(operation, detail = %detail, "Identity provider rejected grant");
            ErrorCode::InvalidToken.into()
        }
        IdentityError::NotFound(detail) => {
            tracing::info!(operation, detail = %detail, "Identity provider resource missing");
            ErrorCode::NotFound.into()
        }
        IdentityError::InvalidSignature => ErrorCode::InvalidSignature.into(),
        IdentityError::InvalidPayload(detail) => Error::api(ErrorCode::InvalidPayload, detail),
        other => {
            tracing::error!(operation, error = %other, "Identity provider call failed");
            Error::Unexpected(anyhow::anyhow!("{operation}: {other}"))
        }
    }
}

/// Sleep a uniformly random number of milliseconds from `range`
pub(crate) async fn random_delay(range: RangeInclusive<u64>) {
    let millis = rand::thread_rng().gen_range(range);
    tokio::time::sleep(Duration::from_millis(millis)).await;
}

/// Check a sign-in password.
///
/// Refusals that cost no bcrypt work, an unknown email or an account without
/// a local password, wait out `LOGIN_MISS_DELAY_MS` instead.
pub(crate) async fn check_login_password(user: Option<&User>, candidate: &str) -> bool {
    match user {
        Some(user) if user.password_hash.is_some() => user.verify_password(candidate),
        _ => {
            random_delay(LOGIN_MISS_DELAY_MS).await;
            false
        }
    }
}

/// Percent-encode a query value, leaving `@` readable
pub fn encode_query_value(value: &str) -> String {
    urlencoding::encode(value).replace("%40", "@")
}

/// Page telling a new user to check their inbox
pub fn confirm_email_url(config: &TeamsConfig, email: &str) -> String {
    config.app_link(&format!(
        "/auth/confirm-email?email={}",
        encode_query_value(email)
    ))
}

/// Where the SPA should land after signing in
pub fn landing_url(config: &TeamsConfig, user: &User) -> String {
    if !user.is_email_confirmed() {
        return confirm_email_url(config, &user.email);
    }
    match user.default_team_slug.as_deref() {
        Some(slug) => config.app_link(&format!("/teams/{slug}")),
        None => config.app_link("/onboarding"),
    }
}

/// Create a session row and issue internal HS256 tokens bound to it.
pub(crate) async fn start_internal_session(
    state: &TeamsState,
    user: &User,
    client: &ClientContext,
) -> Result<(Session, TokenPair)> {
    let session = state
        .repos
        .sessions
        .create(&NewSession {
            user_id: user.id,
            external_session_id: None,
            version: Utc::now(),
            client: client.clone(),
        })
        .await?;

    let tokens =
        jwt::issue_session_tokens(state.auth.config(), user.id, session.id, session.version)?;

    tracing::info!(user_id = %user.id, session_id = %session.id, "Session started");
    Ok((session, tokens))
}

/// Create a session row for a provider-issued token pair.
///
/// The provider access token is verified first; its `sid` becomes the
/// session's external id so later requests and webhooks can find the row.
pub(crate) async fn start_provider_session(
    state: &TeamsState,
    user: &User,
    authenticated: AuthenticationResponse,
    client: &ClientContext,
) -> Result<(Session, TokenPair)> {
    let claims = state.auth.jwks().verify(&authenticated.access_token).await?;

    let session = state
        .repos
        .sessions
        .create(&NewSession {
            user_id: user.id,
            external_session_id: Some(claims.sid),
            version: Utc::now(),
            client: client.clone(),
        })
        .await?;

    tracing::info!(
        user_id = %user.id,
        session_id = %session.id,
        organization_id = ?authenticated.organization_id,
        "Provider session started"
    );

    Ok((
        session,
        TokenPair {
            access_token: authenticated.access_token,
            refresh_token: authenticated.refresh_token,
        },
    ))
}

/// Revoke provider sessions; failures are logged and skipped.
pub(crate) async fn revoke_provider_sessions(state: &TeamsState, session_ids: &[String]) {
    for session_id in session_ids {
        if let Err(e) = state.auth.identity().revoke_session(session_id).await {
            tracing::warn!(error = %e, external_session_id = %session_id, "Provider session revoke failed");
        }
    }
}

/// Full user row for an authenticated caller
pub(crate) async fn load_user(state: &TeamsState, user_id: uuid::Uuid) -> Result<User> {
    state
        .repos
        .users
        .get_by_id(user_id)
        .await?
        .ok_or_else(|| ErrorCode::Unauthorized.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn config() -> TeamsConfig {
        TeamsConfig {
            app_url: "https://app.test".to_string(),
            api_url: "https://api.test".to_string(),
            app_name: "Tenantry".to_string(),
        }
    }

    fn user(confirmed: bool, default_team_slug: Option<&str>) -> User {
        User {
            id: Uuid::new_v4(),
            external_id: None,
            email: "a+b@example.com".to_string(),
            name: None,
            password_hash: None,
            terms_accepted_at: None,
            team_created_or_joined_at: None,
            teammates_invited_at: None,
            onboarding_completed_at: None,
            email_confirmed_at: confirmed.then(Utc::now),
            security_version: None,
            default_team_id: None,
            default_team_slug: default_team_slug.map(String::from),
            deleted_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_landing_url() {
        let cases = [
            (
                user(false, Some("acme")),
                "https://app.test/auth/confirm-email?email=a%2Bb@example.com",
            ),
            (user(true, Some("acme")), "https://app.test/teams/acme"),
            (user(true, None), "https://app.test/onboarding"),
        ];
        for (user, expected) in cases {
            assert_eq!(landing_url(&config(), &user), expected);
        }
    }

    #[test]
    fn test_provider_error_classification() {
        let cases = [
            (
                IdentityError::InvalidGrant("bad code".to_string()),
                ErrorCode::InvalidToken,
            ),
            (
                IdentityError::NotFound("user".to_string()),
                ErrorCode::NotFound,
            ),
            (IdentityError::InvalidSignature, ErrorCode::InvalidSignature),
            (
                IdentityError::Request("timeout".to_string()),
                ErrorCode::InternalServerError,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(provider_error("test", err).code(), expected);
        }
    }

    #[tokio::test]
    async fn test_passwordless_login_waits_like_unknown_email() {
        let provider_only = user(true, None);

        let started = std::time::Instant::now();
        assert!(!check_login_password(Some(&provider_only), "Correct-Horse-9").await);
        assert!(started.elapsed() >= Duration::from_millis(*LOGIN_MISS_DELAY_MS.start()));

        let started = std::time::Instant::now();
        assert!(!check_login_password(None, "Correct-Horse-9").await);
        assert!(started.elapsed() >= Duration::from_millis(*LOGIN_MISS_DELAY_MS.start()));
    }

    #[tokio::test]
    async fn test_login_password_checked_against_hash() {
        let mut account = user(true, None);
        account.password_hash = Some(tenantry_common::crypto::hash_password("Correct-Horse-9").unwrap());
        assert!(check_login_password(Some(&account), "Correct-Horse-9").await);
        assert!(!check_login_password(Some(&account), "Wrong-Horse-9").await);
    }

    #[tokio::test]
    async fn test_random_delay_stays_in_range() {
        let started = std::time::Instant::now();
        random_delay(5..=10).await;
        assert!(started.elapsed() >= Duration::from_millis(5));
    }
}
