//! Team membership handlers: list, role change, removal, leave
//!
//! Every mutation that can reduce the number of active owners runs in a
//! SERIALIZABLE transaction that reads the owner count and writes in the same
//! commit, retried on conflict.

use axum::extract::{Path, State};
use serde::Deserialize;
use tenantry_auth::AuthUser;
use tenantry_common::{
    db::retry_serializable, ApiResponse, Error, ErrorCode, Result, ValidatedJson,
};
use uuid::Uuid;
use validator::Validate;

use crate::api::handlers::teams::team_membership;
use crate::api::middleware::TeamsState;
use crate::domain::entities::{MemberRole, MemberStatus, Team, TeamInvite, TeamMember};
use crate::repository::transactions::{
    cancel_invites_by_inviter_tx, cancel_invites_for_member_tx, count_active_owners_tx,
    get_member_tx, set_member_status_tx, update_role_tx,
};
use crate::repository::MemberWithUser;

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateMemberRoleRequest {
    pub role: MemberRole,
}

/// Outcome of taking a member out of a team
struct Departure {
    member: TeamMember,
    canceled_invites: Vec<TeamInvite>,
}

/// Would this change leave the team without an active owner?
fn drops_last_owner(target: &TeamMember, new_role: Option<MemberRole>, active_owners: i64) -> bool {
    let loses_owner = target.is_active()
        && target.role.is_owner()
        && new_role.is_none_or(|role| !role.is_owner());
    loses_owner && active_owners <= 1
}

/// Re-check the actor inside the transaction; the pre-check may be stale.
async fn lock_actor(
    transaction: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    team_id: Uuid,
    actor_id: Uuid,
) -> Result<TeamMember> {
    get_member_tx(transaction, team_id, actor_id)
        .await?
        .filter(TeamMember::is_active)
        .ok_or_else(|| ErrorCode::TeamNotFound.into())
}

async fn change_role_tx(
    state: &TeamsState,
    team_id: Uuid,
    actor_id: Uuid,
    target_id: Uuid,
    role: MemberRole,
) -> Result<TeamMember> {
    let mut transaction = state.repos.begin_serializable().await?;

    let actor = lock_actor(&mut transaction, team_id, actor_id).await?;
    let target = get_member_tx(&mut transaction, team_id, target_id)
        .await?
        .filter(|m| matches!(m.status, MemberStatus::Active | MemberStatus::Pending))
        .ok_or(ErrorCode::NotFound)?;

    if !actor.can_manage(&target) || !actor.can_grant(role) {
        return Err(ErrorCode::Forbidden.into());
    }
    if target.role == role {
        return Ok(target);
    }

    let owners = count_active_owners_tx(&mut transaction, team_id).await?;
    if drops_last_owner(&target, Some(role), owners) {
        return Err(ErrorCode::NoTeamOwner.into());
    }

    let updated = update_role_tx(&mut transaction, target.id, role).await?;
    transaction.commit().await?;
    Ok(updated)
}

/// Take `target_id` out of the team with `status`.
///
/// `actor_id == target_id` is a voluntary leave and skips the rank check.
async fn depart_tx(
    state: &TeamsState,
    team_id: Uuid,
    actor_id: Uuid,
    target_id: Uuid,
    status: MemberStatus,
) -> Result<Departure> {
    let mut transaction = state.repos.begin_serializable().await?;

    let actor = lock_actor(&mut transaction, team_id, actor_id).await?;
    let target = if actor_id == target_id {
        actor.clone()
    } else {
        get_member_tx(&mut transaction, team_id, target_id)
            .await?
            .filter(|m| matches!(m.status, MemberStatus::Active | MemberStatus::Pending))
            .ok_or(ErrorCode::NotFound)?
    };

    if actor_id != target_id && !actor.can_manage(&target) {
        return Err(ErrorCode::Forbidden.into());
    }

    let owners = count_active_owners_tx(&mut transaction, team_id).await?;
    if drops_last_owner(&target, None, owners) {
        return Err(ErrorCode::NoTeamOwner.into());
    }

    // A pending row never joined; withdrawing it revokes the invite
    let status = if target.status == MemberStatus::Pending {
        MemberStatus::Revoked
    } else {
        status
    };
    let member = set_member_status_tx(&mut transaction, target.id, status).await?;

    let mut canceled_invites = cancel_invites_for_member_tx(&mut transaction, target.id).await?;
    if let Some(user_id) = target.user_id {
        canceled_invites.extend(cancel_invites_by_inviter_tx(&mut transaction, team_id, user_id).await?);
    }

    transaction.commit().await?;
    Ok(Departure {
        member,
        canceled_invites,
    })
}

/// Mirror a departure at the identity provider; failures are logged.
async fn sync_departure(state: &TeamsState, team: &Team, departure: &Departure) {
    let identity = state.auth.identity();

    if let Some(membership_id) = departure.member.external_membership_id.as_deref() {
        if let Err(e) = identity.deactivate_organization_membership(membership_id).await {
            tracing::warn!(
                error = %e,
                team_id = %team.id,
                member_id = %departure.member.id,
                "Failed to deactivate provider membership"
            );
        }
    }

    for invite in &departure.canceled_invites {
        if let Some(invitation_id) = invite.external_invite_id.as_deref() {
            if let Err(e) = identity.revoke_invitation(invitation_id).await {
                tracing::warn!(
                    error = %e,
                    invite_id = %invite.id,
                    "Failed to revoke provider invitation"
                );
            }
        }
    }

    if let Some(user_id) = departure.member.user_id {
        if let Err(e) = state.repos.users.reset_default_team(user_id, team.id).await {
            tracing::warn!(error = %e, user_id = %user_id, "Failed to reset default team");
        }
    }
}

/// **GET /teams/{slug}/members**
pub async fn list_members(
    State(state): State<TeamsState>,
    AuthUser(ctx): AuthUser,
    Path(slug): Path<String>,
) -> Result<ApiResponse<Vec<MemberWithUser>>> {
    let (team, _) = team_membership(&state, &slug, ctx.user_id()).await?;
    let members = state.repos.members.list_for_team(team.id).await?;
    Ok(ApiResponse::data(members))
}

/// Change a member's role
///
/// **PATCH /teams/{slug}/members/{member_id}**
pub async fn update_member_role(
    State(state): State<TeamsState>,
    AuthUser(ctx): AuthUser,
    Path((slug, member_id)): Path<(String, Uuid)>,
    ValidatedJson(request): ValidatedJson<UpdateMemberRoleRequest>,
) -> Result<ApiResponse<TeamMember>> {
    let (team, actor) = team_membership(&state, &slug, ctx.user_id()).await?;

    let state_ref = &state;
    let updated = retry_serializable(|| {
        change_role_tx(state_ref, team.id, actor.id, member_id, request.role)
    })
    .await?;

    if let Some(membership_id) = updated.external_membership_id.as_deref() {
        if let Err(e) = state
            .auth
            .identity()
            .update_organization_membership(membership_id, updated.role.provider_slug())
            .await
        {
            tracing::warn!(error = %e, member_id = %updated.id, "Failed to mirror role change");
        }
    }

    tracing::info!(
        team_id = %team.id,
        member_id = %updated.id,
        role = %updated.role,
        actor_id = %actor.id,
        "Member role updated"
    );
    Ok(ApiResponse::data(updated))
}

/// Remove another member
///
/// **DELETE /teams/{slug}/members/{member_id}**
pub async fn remove_member(
    State(state): State<TeamsState>,
    AuthUser(ctx): AuthUser,
    Path((slug, member_id)): Path<(String, Uuid)>,
) -> Result<ApiResponse<TeamMember>> {
    let (team, actor) = team_membership(&state, &slug, ctx.user_id()).await?;
    if actor.id == member_id {
        return Err(Error::api(
            ErrorCode::InvalidRequest,
            "Use leave to remove yourself from a team",
        ));
    }

    let state_ref = &state;
    let departure = retry_serializable(|| {
        depart_tx(state_ref, team.id, actor.id, member_id, MemberStatus::Removed)
    })
    .await?;

    sync_departure(&state, &team, &departure).await;

    tracing::info!(
        team_id = %team.id,
        member_id = %departure.member.id,
        actor_id = %actor.id,
        canceled_invites = departure.canceled_invites.len(),
        "Member removed"
    );
    Ok(ApiResponse::data(departure.member))
}

/// Leave a team
///
/// **POST /teams/{slug}/leave**
///
/// The last active owner cannot leave; ownership has to be handed over first.
pub async fn leave_team(
    State(state): State<TeamsState>,
    AuthUser(ctx): AuthUser,
    Path(slug): Path<String>,
) -> Result<ApiResponse<()>> {
    let (team, actor) = team_membership(&state, &slug, ctx.user_id()).await?;

    let state_ref = &state;
    let departure = retry_serializable(|| {
        depart_tx(state_ref, team.id, actor.id, actor.id, MemberStatus::Left)
    })
    .await?;

    sync_departure(&state, &team, &departure).await;

    tracing::info!(
        team_id = %team.id,
        user_id = %ctx.user_id(),
        canceled_invites = departure.canceled_invites.len(),
        "Member left team"
    );
    Ok(ApiResponse::message("Left team"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn member(role: MemberRole, status: MemberStatus) -> TeamMember {
        TeamMember {
            id: Uuid::new_v4(),
            team_id: Uuid::new_v4(),
            user_id: Some(Uuid::new_v4()),
            email: "m@example.com".to_string(),
            role,
            status,
            external_membership_id: None,
            joined_at: Some(Utc::now()),
            left_at: None,
            removed_at: None,
            onboarded_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_sole_owner_cannot_leave_or_be_demoted() {
        let owner = member(MemberRole::Owner, MemberStatus::Active);
        assert!(drops_last_owner(&owner, None, 1));
        assert!(drops_last_owner(&owner, Some(MemberRole::Admin), 1));
        assert!(!drops_last_owner(&owner, Some(MemberRole::Owner), 1));
    }

    #[test]
    fn test_co_owned_team_allows_owner_exit() {
        let owner = member(MemberRole::Owner, MemberStatus::Active);
        assert!(!drops_last_owner(&owner, None, 2));
        assert!(!drops_last_owner(&owner, Some(MemberRole::Member), 2));
    }

    #[test]
    fn test_non_owner_exits_never_drop_owners() {
        let admin = member(MemberRole::Admin, MemberStatus::Active);
        assert!(!drops_last_owner(&admin, None, 1));

        let pending_owner = member(MemberRole::Owner, MemberStatus::Pending);
        assert!(!drops_last_owner(&pending_owner, None, 1));
    }
}
