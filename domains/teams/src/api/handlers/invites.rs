//! Invite handlers: single-use email invites, the shared invite link, joining
//!
//! Single invites are created through the identity provider, bound to a
//! pending member row and consumed once. The shared link is a team-wide token
//! that stays usable until regenerated. Acceptance is idempotent: a caller who
//! already belongs to the team gets the same redirect without a second row.

use std::collections::HashSet;

use axum::{
    extract::{Path, State},
    http::StatusCode,
};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tenantry_auth::AuthUser;
use tenantry_common::{
    crypto, ApiResponse, Error, ErrorCode, Redirect, RepositoryError, Result, ValidatedJson,
};
use tenantry_workos::{InvitationState, SendInvitation};
use uuid::Uuid;
use validator::Validate;

use crate::api::handlers::teams::team_membership;
use crate::api::middleware::{TeamsConfig, TeamsState};
use crate::api::session::{load_user, provider_error};
use crate::domain::entities::{
    InviteType, MemberRole, MemberStatus, NewInvite, Team, TeamInvite, TeamMember,
    User, MAX_INVITES_PER_REQUEST, SINGLE_INVITE_TTL_DAYS,
};
use crate::domain::validation::{is_valid_email, normalize_email};
use crate::repository::transactions::{
    activate_member_tx, cancel_invite_tx, cancel_invites_for_member_tx, expire_invite_tx,
    find_member_by_email_tx, find_member_by_user_tx, get_member_tx, increment_invite_use_tx,
    insert_invite_tx, insert_member_tx, lock_invite_by_token_tx, lock_team_tx,
    mark_invite_accepted_tx, record_team_joined_tx, reset_member_pending_tx,
    set_current_invite_tx, set_member_status_tx,
};

#[derive(Debug, Deserialize, Validate)]
pub struct InviteRequest {
    #[validate(length(min = 1))]
    pub emails: Vec<String>,
    #[serde(default)]
    pub role: MemberRole,
}

#[derive(Debug, Serialize)]
pub struct InviteLinkResponse {
    pub url: String,
    pub invite: TeamInvite,
}

/// What a visitor sees before joining
#[derive(Debug, Serialize)]
pub struct JoinPreview {
    pub team_name: String,
    pub team_slug: String,
    pub invite_type: InviteType,
    pub role: MemberRole,
    /// Set for email-scoped invites
    pub email: Option<String>,
}

pub fn join_url(config: &TeamsConfig, slug: &str, token: &str) -> String {
    config.app_link(&format!("/teams/{slug}/join/{token}"))
}

fn team_url(config: &TeamsConfig, slug: &str) -> String {
    config.app_link(&format!("/teams/{slug}"))
}

/// Validate and normalize an invite batch.
///
/// Checks count, shape, self-invites and in-batch duplicates, in that order.
pub fn validate_invite_emails(emails: &[String], inviter_email: &str) -> Result<Vec<String>> {
    if emails.is_empty() {
        return Err(Error::api(ErrorCode::InvalidRequest, "At least one email is required"));
    }
    if emails.len() > MAX_INVITES_PER_REQUEST {
        return Err(ErrorCode::TooManyInvites.into());
    }

    let inviter = normalize_email(inviter_email);
    let mut seen = HashSet::with_capacity(emails.len());
    let mut normalized = Vec::with_capacity(emails.len());

    for email in emails {
        if !is_valid_email(email) {
            return Err(Error::api(
                ErrorCode::InvalidRequest,
                format!("Invalid email address: {}", email.trim()),
            ));
        }
        let email = normalize_email(email);
        if email == inviter {
            return Err(ErrorCode::InvalidSelfInvite.into());
        }
        if !seen.insert(email.clone()) {
            return Err(ErrorCode::DuplicateEmails.into());
        }
        normalized.push(email);
    }

    Ok(normalized)
}

/// Classify an invite that failed its guarded update inside a transaction
fn consumed_invite_error(invite: &TeamInvite) -> Error {
    match invite.usability(Utc::now()) {
        Err(code) => code.into(),
        Ok(()) => ErrorCode::InvalidInviteLink.into(),
    }
}

/// Persist one single-use invite and its pending member row
async fn persist_single_invite(
    state: &TeamsState,
    team: &Team,
    inviter: &User,
    email: &str,
    role: MemberRole,
    token: String,
    external_invite_id: Option<String>,
) -> Result<TeamInvite> {
    let mut transaction = state.repos.begin().await?;

    let member = match find_member_by_email_tx(&mut transaction, team.id, email).await? {
        Some(member) if member.is_active() => {
            return Err(ErrorCode::TeamMembersAlreadyExist.into());
        }
        Some(member) => reset_member_pending_tx(&mut transaction, member.id, role).await?,
        None => {
            insert_member_tx(
                &mut transaction,
                team.id,
                None,
                email,
                role,
                MemberStatus::Pending,
                None,
            )
            .await?
        }
    };

    let invite = insert_invite_tx(
        &mut transaction,
        &NewInvite {
            team_id: team.id,
            email: email.to_string(),
            token,
            invite_type: InviteType::Single,
            role,
            invited_by: Some(inviter.id),
            max_uses: 1,
            expires_at: Some(Utc::now() + Duration::days(SINGLE_INVITE_TTL_DAYS)),
            external_invite_id,
            team_member_id: Some(member.id),
        },
    )
    .await?;

    transaction.commit().await?;
    Ok(invite)
}

/// Invite people by email
///
/// **POST /teams/{slug}/invite**
///
/// The whole batch is checked before anything is created. Delivery failures
/// are logged; the invite stays valid and can be re-sent by inviting again
/// after cancelling.
pub async fn invite_members(
    State(state): State<TeamsState>,
    AuthUser(ctx): AuthUser,
    Path(slug): Path<String>,
    ValidatedJson(request): ValidatedJson<InviteRequest>,
) -> Result<(StatusCode, ApiResponse<Vec<TeamInvite>>)> {
    let (team, actor) = team_membership(&state, &slug, ctx.user_id()).await?;
    if !actor.can_grant(request.role) {
        return Err(ErrorCode::Forbidden.into());
    }

    let inviter = load_user(&state, ctx.user_id()).await?;
    let emails = validate_invite_emails(&request.emails, &inviter.email)?;

    for email in &emails {
        if state.repos.invites.pending_email_exists(team.id, email).await? {
            return Err(Error::api(
                ErrorCode::AlreadyInvited,
                format!("{email} has already been invited"),
            ));
        }
        if state.repos.members.active_email_exists(team.id, email).await? {
            return Err(Error::api(
                ErrorCode::TeamMembersAlreadyExist,
                format!("{email} is already a member"),
            ));
        }
    }

    let inviter_name = inviter.name.clone().unwrap_or_else(|| inviter.email.clone());
    let mut created = Vec::with_capacity(emails.len());

    for email in &emails {
        let (token, external_invite_id) = match team.external_org_id.as_deref() {
            Some(organization_id) => {
                let invitation = state
                    .auth
                    .identity()
                    .send_invitation(SendInvitation {
                        email,
                        organization_id,
                        inviter_user_id: inviter.external_id.as_deref(),
                        role_slug: request.role.provider_slug(),
                        expires_in_days: SINGLE_INVITE_TTL_DAYS as u32,
                    })
                    .await
                    .map_err(|e| provider_error("send_invitation", e))?;
                (invitation.token, Some(invitation.id))
            }
            None => (hex::encode(crypto::random_bytes::<16>()), None),
        };

        let invite = persist_single_invite(
            &state,
            &team,
            &inviter,
            email,
            request.role,
            token,
            external_invite_id,
        )
        .await?;

        let url = join_url(&state.config, &team.slug, &invite.token);
        if let Err(e) = state
            .email
            .send_team_invite(email, &team.name, &inviter_name, &request.role.to_string(), &url)
            .await
        {
            tracing::warn!(error = %e, invite_id = %invite.id, "Failed to deliver invite email");
        }

        created.push(invite);
    }

    state.repos.users.mark_teammates_invited(inviter.id).await?;

    tracing::info!(
        team_id = %team.id,
        inviter_id = %inviter.id,
        count = created.len(),
        "Invites sent"
    );
    Ok((StatusCode::CREATED, ApiResponse::data(created)))
}

/// **GET /teams/{slug}/invites**
pub async fn list_invites(
    State(state): State<TeamsState>,
    AuthUser(ctx): AuthUser,
    Path(slug): Path<String>,
) -> Result<ApiResponse<Vec<TeamInvite>>> {
    let (team, _) = team_membership(&state, &slug, ctx.user_id()).await?;
    let invites = state.repos.invites.list_pending(team.id).await?;
    Ok(ApiResponse::data(invites))
}

/// Cancel a pending invite
///
/// **DELETE /teams/{slug}/invites/{invite_id}**
///
/// Allowed for the inviter and for admins and owners. The pending member row
/// the invite was created for is revoked with it.
pub async fn cancel_invite(
    State(state): State<TeamsState>,
    AuthUser(ctx): AuthUser,
    Path((slug, invite_id)): Path<(String, Uuid)>,
) -> Result<ApiResponse<TeamInvite>> {
    let (team, actor) = team_membership(&state, &slug, ctx.user_id()).await?;

    let invite = state
        .repos
        .invites
        .get(team.id, invite_id)
        .await?
        .ok_or(ErrorCode::NotFound)?;

    if !actor.role.is_admin_or_above() && invite.invited_by != Some(ctx.user_id()) {
        return Err(ErrorCode::Forbidden.into());
    }
    invite
        .check_cancel()
        .map_err(|e| Error::api(ErrorCode::InvalidRequest, e.to_string()))?;

    let mut transaction = state.repos.begin().await?;
    let canceled = cancel_invite_tx(&mut transaction, team.id, invite.id)
        .await?
        .ok_or_else(|| Error::api(ErrorCode::InvalidRequest, "Invite is no longer pending"))?;

    if let Some(member_id) = canceled.team_member_id {
        let pending = get_member_tx(&mut transaction, team.id, member_id)
            .await?
            .filter(|m| m.status == MemberStatus::Pending);
        if let Some(member) = pending {
            set_member_status_tx(&mut transaction, member.id, MemberStatus::Revoked).await?;
        }
    }
    transaction.commit().await?;

    if let Some(invitation_id) = canceled.external_invite_id.as_deref() {
        if let Err(e) = state.auth.identity().revoke_invitation(invitation_id).await {
            tracing::warn!(error = %e, invite_id = %canceled.id, "Failed to revoke provider invitation");
        }
    }

    tracing::info!(team_id = %team.id, invite_id = %canceled.id, "Invite canceled");
    Ok(ApiResponse::data(canceled))
}

/// Replace the team's shared link, softly expiring the old one.
///
/// The team row lock keeps at most one live shared invite per team.
async fn rotate_shared_invite(
    state: &TeamsState,
    team_id: Uuid,
    invited_by: Uuid,
) -> Result<TeamInvite> {
    let mut transaction = state.repos.begin().await?;
    let team = lock_team_tx(&mut transaction, team_id).await?;

    if let Some(current) = team.current_team_invite_id {
        expire_invite_tx(&mut transaction, current).await?;
    }
    let invite = insert_invite_tx(
        &mut transaction,
        &TeamInvite::new_shared(team.id, Some(invited_by)),
    )
    .await?;
    set_current_invite_tx(&mut transaction, team.id, invite.id).await?;

    transaction.commit().await?;
    Ok(invite)
}

/// The team's current shared link
///
/// **GET /teams/{slug}/invite-link**
///
/// A team whose link has been expired or lost gets a fresh one.
pub async fn get_invite_link(
    State(state): State<TeamsState>,
    AuthUser(ctx): AuthUser,
    Path(slug): Path<String>,
) -> Result<ApiResponse<InviteLinkResponse>> {
    let (team, _) = team_membership(&state, &slug, ctx.user_id()).await?;

    let current = match team.current_team_invite_id {
        Some(id) => state.repos.invites.get_by_id(id).await?,
        None => None,
    };
    let invite = match current {
        Some(invite) if invite.usability(Utc::now()).is_ok() => invite,
        _ => rotate_shared_invite(&state, team.id, ctx.user_id()).await?,
    };

    Ok(ApiResponse::data(InviteLinkResponse {
        url: join_url(&state.config, &team.slug, &invite.token),
        invite,
    }))
}

/// Regenerate the shared link
///
/// **POST /teams/{slug}/invite-link**
pub async fn regenerate_invite_link(
    State(state): State<TeamsState>,
    AuthUser(ctx): AuthUser,
    Path(slug): Path<String>,
) -> Result<ApiResponse<InviteLinkResponse>> {
    let (team, actor) = team_membership(&state, &slug, ctx.user_id()).await?;
    if !actor.role.is_admin_or_above() {
        return Err(ErrorCode::Forbidden.into());
    }

    let invite = rotate_shared_invite(&state, team.id, ctx.user_id()).await?;
    tracing::info!(team_id = %team.id, invite_id = %invite.id, "Shared invite link regenerated");

    Ok(ApiResponse::data(InviteLinkResponse {
        url: join_url(&state.config, &team.slug, &invite.token),
        invite,
    }))
}

/// Check an invite before joining
///
/// **GET /teams/{slug}/join/{token}**
pub async fn preview_invite(
    State(state): State<TeamsState>,
    Path((slug, token)): Path<(String, String)>,
) -> Result<ApiResponse<JoinPreview>> {
    let team = state
        .repos
        .teams
        .get_by_slug(&slug)
        .await?
        .ok_or(ErrorCode::TeamNotFound)?;
    let invite = state
        .repos
        .invites
        .find_by_token(team.id, &token)
        .await?
        .ok_or(ErrorCode::InvalidInviteLink)?;

    invite.usability(Utc::now())?;

    Ok(ApiResponse::data(JoinPreview {
        team_name: team.name,
        team_slug: team.slug,
        invite_type: invite.invite_type,
        role: invite.role,
        email: invite.is_email_scoped().then(|| invite.email.clone()),
    }))
}

enum Joined {
    /// The caller was already an active member
    Already,
    Now(TeamMember),
}

async fn accept_single_tx(
    state: &TeamsState,
    team: &Team,
    user: &User,
    token: &str,
) -> Result<Joined> {
    let mut transaction = state.repos.begin().await?;

    let invite = lock_invite_by_token_tx(&mut transaction, team.id, token)
        .await?
        .ok_or(ErrorCode::InvalidInviteLink)?;
    if let Some(member) = find_member_by_user_tx(&mut transaction, team.id, user.id).await? {
        if member.is_active() {
            return Ok(Joined::Already);
        }
    }

    let member_id = invite.team_member_id.ok_or(ErrorCode::InvalidInviteLink)?;
    let member = get_member_tx(&mut transaction, team.id, member_id)
        .await?
        .ok_or(ErrorCode::InvalidInviteLink)?;

    mark_invite_accepted_tx(&mut transaction, invite.id, member.id)
        .await
        .map_err(|e| match e {
            RepositoryError::NotFound => consumed_invite_error(&invite),
            other => other.into(),
        })?;
    let member = activate_member_tx(&mut transaction, member.id, user.id, member.role, None).await?;
    record_team_joined_tx(&mut transaction, user.id, team, true).await?;

    transaction.commit().await?;
    Ok(Joined::Now(member))
}

async fn accept_shared_tx(
    state: &TeamsState,
    team: &Team,
    user: &User,
    token: &str,
    external_membership_id: Option<&str>,
) -> Result<Joined> {
    let mut transaction = state.repos.begin().await?;

    let invite = lock_invite_by_token_tx(&mut transaction, team.id, token)
        .await?
        .ok_or(ErrorCode::InvalidInviteLink)?;

    let existing = match find_member_by_user_tx(&mut transaction, team.id, user.id).await? {
        Some(member) if member.is_active() => return Ok(Joined::Already),
        Some(member) => Some(member),
        None => find_member_by_email_tx(&mut transaction, team.id, &user.email).await?,
    };

    increment_invite_use_tx(&mut transaction, invite.id)
        .await
        .map_err(|e| match e {
            RepositoryError::NotFound => consumed_invite_error(&invite),
            other => other.into(),
        })?;

    let member = match existing {
        Some(member) => {
            // A pending email invite is superseded by joining through the link
            cancel_invites_for_member_tx(&mut transaction, member.id).await?;
            activate_member_tx(
                &mut transaction,
                member.id,
                user.id,
                invite.role,
                external_membership_id,
            )
            .await?
        }
        None => {
            insert_member_tx(
                &mut transaction,
                team.id,
                Some(user.id),
                &user.email,
                invite.role,
                MemberStatus::Active,
                external_membership_id,
            )
            .await?
        }
    };
    record_team_joined_tx(&mut transaction, user.id, team, true).await?;

    transaction.commit().await?;
    Ok(Joined::Now(member))
}

/// Accept an invite as the signed-in user
///
/// **POST /team/{slug}/join/{token}**
///
/// Re-accepting an invite the caller already used answers with the same
/// redirect and creates nothing.
pub async fn accept_invite(
    State(state): State<TeamsState>,
    AuthUser(ctx): AuthUser,
    Path((slug, token)): Path<(String, String)>,
) -> Result<ApiResponse<Redirect>> {
    let team = state
        .repos
        .teams
        .get_by_slug(&slug)
        .await?
        .ok_or(ErrorCode::TeamNotFound)?;
    let invite = state
        .repos
        .invites
        .find_by_token(team.id, &token)
        .await?
        .ok_or(ErrorCode::InvalidInviteLink)?;
    let user = load_user(&state, ctx.user_id()).await?;
    let redirect = team_url(&state.config, &team.slug);

    if state.repos.members.find_active(team.id, user.id).await?.is_some() {
        tracing::debug!(team_id = %team.id, user_id = %user.id, "Invite re-accepted");
        return Ok(Redirect::to(redirect));
    }

    invite.usability(Utc::now())?;
    if !invite.admits_email(&user.email) {
        return Err(Error::api(
            ErrorCode::InvalidInviteLink,
            "This invite was sent to a different email address",
        ));
    }

    let joined = match invite.invite_type {
        InviteType::Single => {
            if let Some(invitation_id) = invite.external_invite_id.as_deref() {
                let invitation = state
                    .auth
                    .identity()
                    .accept_invitation(invitation_id)
                    .await
                    .map_err(|e| provider_error("accept_invitation", e))?;
                match invitation.state {
                    InvitationState::Accepted => {}
                    InvitationState::Expired => return Err(ErrorCode::InviteExpired.into()),
                    InvitationState::Pending | InvitationState::Revoked => {
                        return Err(ErrorCode::InvalidInviteLink.into());
                    }
                }
            }
            accept_single_tx(&state, &team, &user, &token).await?
        }
        InviteType::Shared => {
            let external_membership_id =
                match (team.external_org_id.as_deref(), user.external_id.as_deref()) {
                    (Some(organization_id), Some(external_user_id)) => state
                        .auth
                        .identity()
                        .create_organization_membership(
                            organization_id,
                            external_user_id,
                            invite.role.provider_slug(),
                        )
                        .await
                        .map_err(|e| {
                            tracing::warn!(error = %e, team_id = %team.id, "Provider membership not created");
                        })
                        .ok()
                        .map(|membership| membership.id),
                    _ => None,
                };
            accept_shared_tx(&state, &team, &user, &token, external_membership_id.as_deref())
                .await?
        }
    };

    match joined {
        Joined::Now(member) => tracing::info!(
            team_id = %team.id,
            user_id = %user.id,
            member_id = %member.id,
            invite_type = ?invite.invite_type,
            "Invite accepted"
        ),
        Joined::Already => {
            tracing::debug!(team_id = %team.id, user_id = %user.id, "Invite re-accepted")
        }
    }

    Ok(Redirect::to(redirect))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::InviteState;

    fn emails(list: &[&str]) -> Vec<String> {
        list.iter().map(|e| e.to_string()).collect()
    }

    #[test]
    fn test_invite_batch_validation_codes() {
        let too_many: Vec<String> = (0..=MAX_INVITES_PER_REQUEST)
            .map(|i| format!("user{i}@example.com"))
            .collect();
        let cases = [
            (emails(&[]), ErrorCode::InvalidRequest),
            (too_many, ErrorCode::TooManyInvites),
            (emails(&["not-an-email"]), ErrorCode::InvalidRequest),
            (emails(&["Owner@Example.com"]), ErrorCode::InvalidSelfInvite),
            (
                emails(&["a@example.com", " A@example.com "]),
                ErrorCode::DuplicateEmails,
            ),
        ];
        for (batch, expected) in cases {
            let err = validate_invite_emails(&batch, "owner@example.com").unwrap_err();
            assert_eq!(err.code(), expected);
        }
    }

    #[test]
    fn test_invite_batch_is_normalized() {
        let batch = emails(&[" Alice@Example.com", "bob@example.com"]);
        assert_eq!(
            validate_invite_emails(&batch, "owner@example.com").unwrap(),
            vec!["alice@example.com", "bob@example.com"]
        );
    }

    #[test]
    fn test_batch_at_limit_is_accepted() {
        let batch: Vec<String> = (0..MAX_INVITES_PER_REQUEST)
            .map(|i| format!("user{i}@example.com"))
            .collect();
        assert!(validate_invite_emails(&batch, "owner@example.com").is_ok());
    }

    #[test]
    fn test_join_url() {
        let config = TeamsConfig {
            app_url: "https://app.test/".to_string(),
            api_url: "https://api.test".to_string(),
            app_name: "Tenantry".to_string(),
        };
        assert_eq!(
            join_url(&config, "acme", "abc123"),
            "https://app.test/teams/acme/join/abc123"
        );
    }

    #[test]
    fn test_consumed_invite_error_prefers_expiry() {
        let mut invite = TeamInvite {
            id: Uuid::new_v4(),
            team_id: Uuid::new_v4(),
            email: String::new(),
            token: "t".to_string(),
            state: InviteState::Pending,
            invite_type: InviteType::Shared,
            role: MemberRole::Member,
            invited_by: None,
            max_uses: 2,
            used_times: 2,
            expires_at: None,
            canceled_at: None,
            accepted_at: None,
            external_invite_id: None,
            team_member_id: None,
            created_at: Utc::now(),
        };
        assert_eq!(consumed_invite_error(&invite).code(), ErrorCode::InviteExpired);

        invite.used_times = 0;
        invite.state = InviteState::Canceled;
        assert_eq!(
            consumed_invite_error(&invite).code(),
            ErrorCode::InvalidInviteLink
        );
    }
}
