//! Account handlers: profile update, password change, terms, deletion

use axum::extract::State;
use axum_extra::extract::cookie::CookieJar;
use chrono::Utc;
use serde::Deserialize;
use tenantry_auth::cookies::{clear_session_cookies, set_session_cookies};
use tenantry_auth::{AuthUser, SessionUser};
use tenantry_common::{crypto, ApiResponse, ClientContext, Error, ErrorCode, Result, ValidatedJson};
use tenantry_workos::UpdateUser;
use validator::Validate;

use crate::api::middleware::TeamsState;
use crate::api::session::{load_user, revoke_provider_sessions, start_internal_session};
use crate::domain::entities::User;
use crate::domain::validation::validate_password;
use crate::repository::transactions::{
    revoke_user_sessions_tx, set_password_tx, soft_delete_user_tx, sole_owned_teams_tx,
};

#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateUserRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,
    pub current_password: Option<String>,
    pub new_password: Option<String>,
    pub confirm_password: Option<String>,
}

impl UpdateUserRequest {
    fn changes_password(&self) -> bool {
        self.current_password.is_some()
            || self.new_password.is_some()
            || self.confirm_password.is_some()
    }
}

/// Validate a password change against the stored credentials.
///
/// Returns the new password. Accounts without a local hash (provider-only
/// sign-in) may set a first password without presenting one.
fn check_password_change<'a>(user: &User, request: &'a UpdateUserRequest) -> Result<&'a str> {
    let new_password = request
        .new_password
        .as_deref()
        .filter(|p| !p.is_empty())
        .ok_or(ErrorCode::MissingNewPassword)?;

    if request.confirm_password.as_deref() != Some(new_password) {
        return Err(ErrorCode::NewPasswordMismatch.into());
    }

    if user.password_hash.is_some() {
        let current = request.current_password.as_deref().unwrap_or_default();
        if !user.verify_password(current) {
            return Err(ErrorCode::InvalidCredentials.into());
        }
        if current == new_password {
            return Err(ErrorCode::PasswordUnchanged.into());
        }
    }

    validate_password(new_password)?;
    Ok(new_password)
}

/// Update the caller's name and/or password
///
/// **PATCH /users**
///
/// A password change moves the security version forward and revokes every
/// session, then signs the caller back in on a fresh session.
pub async fn update_user(
    State(state): State<TeamsState>,
    SessionUser(ctx): SessionUser,
    client: ClientContext,
    jar: CookieJar,
    ValidatedJson(request): ValidatedJson<UpdateUserRequest>,
) -> Result<(CookieJar, ApiResponse<User>)> {
    let mut user = load_user(&state, ctx.user_id()).await?;

    let new_password = if request.changes_password() {
        Some(check_password_change(&user, &request)?)
    } else {
        None
    };

    if let Some(name) = request.name.as_deref().map(str::trim) {
        if name.is_empty() {
            return Err(Error::api(ErrorCode::InvalidRequest, "Name cannot be blank"));
        }
        user = state
            .repos
            .users
            .update_name(user.id, name)
            .await?
            .ok_or(ErrorCode::Unauthorized)?;
    }

    let Some(new_password) = new_password else {
        return Ok((jar, ApiResponse::data(user)));
    };

    let password_hash = crypto::hash_password(new_password)
        .map_err(|e| Error::Unexpected(anyhow::anyhow!("failed to hash password: {e}")))?;

    let mut transaction = state.repos.begin().await?;
    let user = set_password_tx(&mut transaction, user.id, &password_hash, Utc::now()).await?;
    let external_sessions = revoke_user_sessions_tx(&mut transaction, user.id).await?;
    transaction.commit().await?;

    revoke_provider_sessions(&state, &external_sessions).await;

    if let Some(external_id) = user.external_id.as_deref() {
        let update = UpdateUser {
            password: Some(new_password.to_string()),
            ..Default::default()
        };
        if let Err(e) = state.auth.identity().update_user(external_id, update).await {
            tracing::warn!(error = %e, user_id = %user.id, "Failed to mirror password change");
        }
    }

    let (_, tokens) = start_internal_session(&state, &user, &client).await?;

    tracing::info!(user_id = %user.id, "Password changed");
    Ok((
        set_session_cookies(jar, &tokens),
        ApiResponse::data(user).with_message("Password updated"),
    ))
}

/// **POST /users/accept-terms**
pub async fn accept_terms(
    State(state): State<TeamsState>,
    AuthUser(ctx): AuthUser,
) -> Result<ApiResponse<User>> {
    let user = state
        .repos
        .users
        .accept_terms(ctx.user_id())
        .await?
        .ok_or(ErrorCode::Unauthorized)?;
    Ok(ApiResponse::data(user))
}

/// Soft-delete the caller's account
///
/// **DELETE /users**
///
/// Refused while the caller is the only owner of a team that still has other
/// active members. Logging in within the grace window restores the account.
pub async fn delete_user(
    State(state): State<TeamsState>,
    SessionUser(ctx): SessionUser,
    jar: CookieJar,
) -> Result<(CookieJar, ApiResponse<()>)> {
    let mut transaction = state.repos.begin_serializable().await?;

    let sole_owned = sole_owned_teams_tx(&mut transaction, ctx.user_id()).await?;
    if !sole_owned.is_empty() {
        tracing::info!(
            user_id = %ctx.user_id(),
            teams = sole_owned.len(),
            "Account deletion blocked by sole ownership"
        );
        return Err(Error::api(
            ErrorCode::NoTeamOwner,
            "Transfer ownership of your teams before deleting your account",
        ));
    }

    soft_delete_user_tx(&mut transaction, ctx.user_id(), Utc::now()).await?;
    let external_sessions = revoke_user_sessions_tx(&mut transaction, ctx.user_id()).await?;
    transaction.commit().await?;

    revoke_provider_sessions(&state, &external_sessions).await;

    tracing::info!(user_id = %ctx.user_id(), "Account deleted");
    Ok((clear_session_cookies(jar), ApiResponse::message("Account deleted")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn user_with_password(password: Option<&str>) -> User {
        User {
            id: Uuid::new_v4(),
            external_id: None,
            email: "u@example.com".to_string(),
            name: None,
            password_hash: password.map(|p| crypto::hash_password(p).unwrap()),
            terms_accepted_at: None,
            team_created_or_joined_at: None,
            teammates_invited_at: None,
            onboarding_completed_at: None,
            email_confirmed_at: Some(Utc::now()),
            security_version: None,
            default_team_id: None,
            default_team_slug: None,
            deleted_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn change(current: Option<&str>, new: Option<&str>, confirm: Option<&str>) -> UpdateUserRequest {
        UpdateUserRequest {
            name: None,
            current_password: current.map(String::from),
            new_password: new.map(String::from),
            confirm_password: confirm.map(String::from),
        }
    }

    #[test]
    fn test_password_change_error_codes() {
        let user = user_with_password(Some("Abcdef1!"));
        let cases = [
            (change(Some("Abcdef1!"), None, None), ErrorCode::MissingNewPassword),
            (change(Some("Abcdef1!"), Some(""), Some("")), ErrorCode::MissingNewPassword),
            (
                change(Some("Abcdef1!"), Some("Newpass1!"), Some("Newpass2!")),
                ErrorCode::NewPasswordMismatch,
            ),
            (
                change(Some("wrong"), Some("Newpass1!"), Some("Newpass1!")),
                ErrorCode::InvalidCredentials,
            ),
            (
                change(Some("Abcdef1!"), Some("Abcdef1!"), Some("Abcdef1!")),
                ErrorCode::PasswordUnchanged,
            ),
            (
                change(Some("Abcdef1!"), Some("weak"), Some("weak")),
                ErrorCode::WeakPassword,
            ),
        ];
        for (request, expected) in cases {
            let err = check_password_change(&user, &request).unwrap_err();
            assert_eq!(err.code(), expected);
        }
    }

    #[test]
    fn test_password_change_accepts_strong_new_password() {
        let user = user_with_password(Some("Abcdef1!"));
        let request = change(Some("Abcdef1!"), Some("Newpass1!"), Some("Newpass1!"));
        assert_eq!(check_password_change(&user, &request).unwrap(), "Newpass1!");
    }

    #[test]
    fn test_provider_only_account_sets_first_password() {
        let user = user_with_password(None);
        let request = change(None, Some("Newpass1!"), Some("Newpass1!"));
        assert!(check_password_change(&user, &request).is_ok());
    }

    #[test]
    fn test_name_only_update_does_not_touch_password() {
        let request = UpdateUserRequest {
            name: Some("Ada".to_string()),
            ..Default::default()
        };
        assert!(!request.changes_password());
    }
}
