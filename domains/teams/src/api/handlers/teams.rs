//! Team handlers: create, list, read, onboarding

use axum::{
    extract::{Path, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use tenantry_auth::AuthUser;
use tenantry_common::{db::is_unique_violation, ApiResponse, Error, ErrorCode, Result, ValidatedJson};
use uuid::Uuid;
use validator::Validate;

use crate::api::middleware::TeamsState;
use crate::api::session::{load_user, provider_error};
use crate::domain::entities::{MemberRole, MemberStatus, Team, TeamInvite, TeamMember};
use crate::domain::validation::{generate_slug, is_reserved_slug, slug_candidate, validate_team_name};
use crate::repository::transactions::{
    create_team_tx, insert_invite_tx, insert_member_tx, record_team_joined_tx,
    set_current_invite_tx,
};
use crate::repository::TeamWithRole;

/// Suffixes tried before giving up on a slug
const MAX_SLUG_ATTEMPTS: u32 = 100;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateTeamRequest {
    #[validate(length(min = 1, max = 256))]
    pub name: String,
}

/// A team together with the caller's membership
#[derive(Debug, Serialize)]
pub struct TeamDetail {
    pub team: Team,
    pub member: TeamMember,
}

/// Resolve `slug` to a team the user actively belongs to.
///
/// Missing teams and teams the user is not in both answer `team_not_found`.
pub(crate) async fn team_membership(
    state: &TeamsState,
    slug: &str,
    user_id: Uuid,
) -> Result<(Team, TeamMember)> {
    let team = state
        .repos
        .teams
        .get_by_slug(slug)
        .await?
        .ok_or(ErrorCode::TeamNotFound)?;
    let member = state
        .repos
        .members
        .find_active(team.id, user_id)
        .await?
        .ok_or(ErrorCode::TeamNotFound)?;
    Ok((team, member))
}

/// First free, non-reserved slug at or after `attempt`
async fn next_free_slug(state: &TeamsState, base: &str, mut attempt: u32) -> Result<(String, u32)> {
    while attempt < MAX_SLUG_ATTEMPTS {
        let candidate = slug_candidate(base, attempt);
        if !is_reserved_slug(&candidate) && !state.repos.teams.slug_exists(&candidate).await? {
            return Ok((candidate, attempt));
        }
        attempt += 1;
    }
    Err(Error::Unexpected(anyhow::anyhow!(
        "no free slug for {base} after {MAX_SLUG_ATTEMPTS} attempts"
    )))
}

/// **GET /teams**
pub async fn list_teams(
    State(state): State<TeamsState>,
    AuthUser(ctx): AuthUser,
) -> Result<ApiResponse<Vec<TeamWithRole>>> {
    let teams = state.repos.teams.list_for_user(ctx.user_id()).await?;
    Ok(ApiResponse::data(teams))
}

/// Create a team owned by the caller
///
/// **POST /teams**
///
/// Creates the identity provider organization and owner membership first,
/// then persists the team, the owner row and the initial shared invite link
/// in one transaction.
pub async fn create_team(
    State(state): State<TeamsState>,
    AuthUser(ctx): AuthUser,
    ValidatedJson(request): ValidatedJson<CreateTeamRequest>,
) -> Result<(StatusCode, ApiResponse<TeamDetail>)> {
    let name = validate_team_name(&request.name)?;
    let user = load_user(&state, ctx.user_id()).await?;
    let base = generate_slug(&name);

    let identity = state.auth.identity();
    let organization = identity
        .create_organization(&name)
        .await
        .map_err(|e| provider_error("create_organization", e))?;

    let external_membership_id = match user.external_id.as_deref() {
        Some(external_user_id) => Some(
            identity
                .create_organization_membership(
                    &organization.id,
                    external_user_id,
                    MemberRole::Owner.provider_slug(),
                )
                .await
                .map_err(|e| provider_error("create_organization_membership", e))?
                .id,
        ),
        None => None,
    };

    let mut attempt = 0;
    let (team, member) = loop {
        let (slug, found_at) = next_free_slug(&state, &base, attempt).await?;

        let mut transaction = state.repos.begin().await?;
        let team = match create_team_tx(
            &mut transaction,
            &name,
            &slug,
            Some(&organization.id),
            user.id,
        )
        .await
        {
            Ok(team) => team,
            // Lost a race for the slug; try the next suffix
            Err(e) if is_unique_violation(&e) => {
                attempt = found_at + 1;
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let member = insert_member_tx(
            &mut transaction,
            team.id,
            Some(user.id),
            &user.email,
            MemberRole::Owner,
            MemberStatus::Active,
            external_membership_id.as_deref(),
        )
        .await?;

        let shared = insert_invite_tx(
            &mut transaction,
            &TeamInvite::new_shared(team.id, Some(user.id)),
        )
        .await?;
        set_current_invite_tx(&mut transaction, team.id, shared.id).await?;
        record_team_joined_tx(&mut transaction, user.id, &team, false).await?;

        transaction.commit().await?;
        break (team, member);
    };

    tracing::info!(
        team_id = %team.id,
        slug = %team.slug,
        user_id = %user.id,
        "Team created"
    );

    Ok((
        StatusCode::CREATED,
        ApiResponse::data(TeamDetail { team, member }),
    ))
}

/// **GET /teams/{slug}**
pub async fn get_team(
    State(state): State<TeamsState>,
    AuthUser(ctx): AuthUser,
    Path(slug): Path<String>,
) -> Result<ApiResponse<TeamDetail>> {
    let (team, member) = team_membership(&state, &slug, ctx.user_id()).await?;
    Ok(ApiResponse::data(TeamDetail { team, member }))
}

/// The caller's own membership row
///
/// **GET /teams/{slug}/member**
pub async fn get_member(
    State(state): State<TeamsState>,
    AuthUser(ctx): AuthUser,
    Path(slug): Path<String>,
) -> Result<ApiResponse<TeamMember>> {
    let (_, member) = team_membership(&state, &slug, ctx.user_id()).await?;
    Ok(ApiResponse::data(member))
}

/// Finish onboarding for the caller in this team
///
/// **POST /teams/{slug}/onboarding**
///
/// Marks the member onboarded and the user's onboarding complete. An owner
/// finishing onboarding also completes it for the team.
pub async fn complete_onboarding(
    State(state): State<TeamsState>,
    AuthUser(ctx): AuthUser,
    Path(slug): Path<String>,
) -> Result<ApiResponse<TeamDetail>> {
    let (team, member) = team_membership(&state, &slug, ctx.user_id()).await?;

    state.repos.members.mark_onboarded(member.id).await?;
    state.repos.users.complete_onboarding(ctx.user_id()).await?;
    if member.role.is_owner() {
        state.repos.teams.complete_onboarding(team.id).await?;
    }

    let (team, member) = team_membership(&state, &slug, ctx.user_id()).await?;
    tracing::info!(team_id = %team.id, user_id = %ctx.user_id(), "Onboarding completed");
    Ok(ApiResponse::data(TeamDetail { team, member }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::validation::is_valid_slug;

    #[test]
    fn test_reserved_name_never_takes_bare_slug() {
        let base = generate_slug("Admin");
        assert_eq!(base, "admin");
        let first_free = (0..MAX_SLUG_ATTEMPTS)
            .map(|attempt| slug_candidate(&base, attempt))
            .find(|candidate| !is_reserved_slug(candidate))
            .unwrap();
        assert_eq!(first_free, "admin-1");
        assert!(is_valid_slug(&first_free));
    }

    #[test]
    fn test_create_request_validation() {
        let blank = CreateTeamRequest {
            name: String::new(),
        };
        assert!(blank.validate().is_err());
        let ok = CreateTeamRequest {
            name: "Acme".to_string(),
        };
        assert!(ok.validate().is_ok());
    }
}
