//! Transactional free functions for the Teams domain
//!
//! Every function takes an open transaction so that handlers can compose
//! multi-row invariants (last owner, bounded invite usage, one live shared
//! link) inside a single commit.

use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction};
use tenantry_common::RepositoryError;
use uuid::Uuid;

use crate::domain::entities::{
    MemberRole, MemberStatus, NewInvite, Team, TeamInvite, TeamMember, User,
};
use crate::repository::{INVITE_COLUMNS, MEMBER_COLUMNS, TEAM_COLUMNS, USER_COLUMNS};

type TxResult<T> = std::result::Result<T, sqlx::Error>;

// ============================================================================
// Users
// ============================================================================

/// Store a new password hash and move the security version forward.
pub async fn set_password_tx(
    transaction: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    password_hash: &str,
    version: DateTime<Utc>,
) -> TxResult<User> {
    sqlx::query_as::<_, User>(&format!(
        r#"
        UPDATE users SET password_hash = $2, security_version = $3, updated_at = NOW()
        WHERE id = $1
        RETURNING {USER_COLUMNS}
        "#
    ))
    .bind(user_id)
    .bind(password_hash)
    .bind(version)
    .fetch_one(&mut **transaction)
    .await
}

/// Fence every credential issued before `version`.
pub async fn bump_security_version_tx(
    transaction: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    version: DateTime<Utc>,
) -> TxResult<()> {
    sqlx::query("UPDATE users SET security_version = $2, updated_at = NOW() WHERE id = $1")
        .bind(user_id)
        .bind(version)
        .execute(&mut **transaction)
        .await?;
    Ok(())
}

/// Soft delete; a no-op on already deleted accounts apart from the fence.
pub async fn soft_delete_user_tx(
    transaction: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    version: DateTime<Utc>,
) -> TxResult<()> {
    sqlx::query(
        r#"
        UPDATE users SET deleted_at = COALESCE(deleted_at, NOW()),
                         security_version = $2,
                         updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(user_id)
    .bind(version)
    .execute(&mut **transaction)
    .await?;
    Ok(())
}

/// Revoke all live sessions of a user.
///
/// Returns the identity provider session ids that still need revoking upstream.
pub async fn revoke_user_sessions_tx(
    transaction: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
) -> TxResult<Vec<String>> {
    let rows: Vec<(Option<String>,)> = sqlx::query_as(
        r#"
        UPDATE sessions SET revoked_at = NOW()
        WHERE user_id = $1 AND revoked_at IS NULL
        RETURNING external_session_id
        "#,
    )
    .bind(user_id)
    .fetch_all(&mut **transaction)
    .await?;

    Ok(rows.into_iter().filter_map(|(id,)| id).collect())
}

/// Record that the user created or joined a team.
///
/// Each field is only filled when unset. `skip_invite_step` also marks the
/// "invite teammates" onboarding step done, used when joining someone else's team.
pub async fn record_team_joined_tx(
    transaction: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    team: &Team,
    skip_invite_step: bool,
) -> TxResult<User> {
    sqlx::query_as::<_, User>(&format!(
        r#"
        UPDATE users SET
            team_created_or_joined_at = COALESCE(team_created_or_joined_at, NOW()),
            default_team_id = COALESCE(default_team_id, $2),
            default_team_slug = COALESCE(default_team_slug, $3),
            teammates_invited_at = CASE WHEN $4 THEN COALESCE(teammates_invited_at, NOW())
                                        ELSE teammates_invited_at END,
            updated_at = NOW()
        WHERE id = $1
        RETURNING {USER_COLUMNS}
        "#
    ))
    .bind(user_id)
    .bind(team.id)
    .bind(&team.slug)
    .bind(skip_invite_step)
    .fetch_one(&mut **transaction)
    .await
}

// ============================================================================
// Teams
// ============================================================================

pub async fn create_team_tx(
    transaction: &mut Transaction<'_, Postgres>,
    name: &str,
    slug: &str,
    external_org_id: Option<&str>,
    created_by: Uuid,
) -> TxResult<Team> {
    sqlx::query_as::<_, Team>(&format!(
        r#"
        INSERT INTO teams (name, slug, external_org_id, created_by)
        VALUES ($1, $2, $3, $4)
        RETURNING {TEAM_COLUMNS}
        "#
    ))
    .bind(name)
    .bind(slug)
    .bind(external_org_id)
    .bind(created_by)
    .fetch_one(&mut **transaction)
    .await
}

/// Lock the team row; serializes shared-link regeneration.
pub async fn lock_team_tx(
    transaction: &mut Transaction<'_, Postgres>,
    team_id: Uuid,
) -> TxResult<Team> {
    sqlx::query_as::<_, Team>(&format!(
        "SELECT {TEAM_COLUMNS} FROM teams WHERE id = $1 FOR UPDATE"
    ))
    .bind(team_id)
    .fetch_one(&mut **transaction)
    .await
}

pub async fn set_current_invite_tx(
    transaction: &mut Transaction<'_, Postgres>,
    team_id: Uuid,
    invite_id: Uuid,
) -> TxResult<()> {
    sqlx::query("UPDATE teams SET current_team_invite_id = $2, updated_at = NOW() WHERE id = $1")
        .bind(team_id)
        .bind(invite_id)
        .execute(&mut **transaction)
        .await?;
    Ok(())
}

// ============================================================================
// Members
// ============================================================================

/// Insert a member row. Active members get `joined_at = NOW()`.
pub async fn insert_member_tx(
    transaction: &mut Transaction<'_, Postgres>,
    team_id: Uuid,
    user_id: Option<Uuid>,
    email: &str,
    role: MemberRole,
    status: MemberStatus,
    external_membership_id: Option<&str>,
) -> TxResult<TeamMember> {
    sqlx::query_as::<_, TeamMember>(&format!(
        r#"
        INSERT INTO team_members
            (team_id, user_id, email, role, status, external_membership_id, joined_at)
        VALUES ($1, $2, $3, $4, $5, $6, CASE WHEN $5 = 'active'::member_status THEN NOW() END)
        RETURNING {MEMBER_COLUMNS}
        "#
    ))
    .bind(team_id)
    .bind(user_id)
    .bind(email)
    .bind(role)
    .bind(status)
    .bind(external_membership_id)
    .fetch_one(&mut **transaction)
    .await
}

/// Lock a member row by id.
pub async fn get_member_tx(
    transaction: &mut Transaction<'_, Postgres>,
    team_id: Uuid,
    member_id: Uuid,
) -> TxResult<Option<TeamMember>> {
    sqlx::query_as::<_, TeamMember>(&format!(
        "SELECT {MEMBER_COLUMNS} FROM team_members WHERE team_id = $1 AND id = $2 FOR UPDATE"
    ))
    .bind(team_id)
    .bind(member_id)
    .fetch_optional(&mut **transaction)
    .await
}

/// Most relevant row for an email: active first, then the newest.
pub async fn find_member_by_email_tx(
    transaction: &mut Transaction<'_, Postgres>,
    team_id: Uuid,
    email: &str,
) -> TxResult<Option<TeamMember>> {
    sqlx::query_as::<_, TeamMember>(&format!(
        r#"
        SELECT {MEMBER_COLUMNS} FROM team_members
        WHERE team_id = $1 AND LOWER(email) = LOWER($2)
        ORDER BY (status = 'active') DESC, created_at DESC
        LIMIT 1
        FOR UPDATE
        "#
    ))
    .bind(team_id)
    .bind(email)
    .fetch_optional(&mut **transaction)
    .await
}

/// Most relevant row for a user: active first, then the newest.
pub async fn find_member_by_user_tx(
    transaction: &mut Transaction<'_, Postgres>,
    team_id: Uuid,
    user_id: Uuid,
) -> TxResult<Option<TeamMember>> {
    sqlx::query_as::<_, TeamMember>(&format!(
        r#"
        SELECT {MEMBER_COLUMNS} FROM team_members
        WHERE team_id = $1 AND user_id = $2
        ORDER BY (status = 'active') DESC, created_at DESC
        LIMIT 1
        FOR UPDATE
        "#
    ))
    .bind(team_id)
    .bind(user_id)
    .fetch_optional(&mut **transaction)
    .await
}

pub async fn count_active_owners_tx(
    transaction: &mut Transaction<'_, Postgres>,
    team_id: Uuid,
) -> TxResult<i64> {
    let row: (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*) FROM team_members
        WHERE team_id = $1 AND role = 'owner' AND status = 'active'
        "#,
    )
    .bind(team_id)
    .fetch_one(&mut **transaction)
    .await?;
    Ok(row.0)
}

pub async fn count_active_members_tx(
    transaction: &mut Transaction<'_, Postgres>,
    team_id: Uuid,
) -> TxResult<i64> {
    let row: (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM team_members WHERE team_id = $1 AND status = 'active'")
            .bind(team_id)
            .fetch_one(&mut **transaction)
            .await?;
    Ok(row.0)
}

/// Teams where the user is the only active owner while others remain active.
pub async fn sole_owned_teams_tx(
    transaction: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
) -> TxResult<Vec<Uuid>> {
    let rows: Vec<(Uuid,)> = sqlx::query_as(
        r#"
        SELECT m.team_id FROM team_members m
        WHERE m.user_id = $1 AND m.role = 'owner' AND m.status = 'active'
          AND NOT EXISTS (
              SELECT 1 FROM team_members o
              WHERE o.team_id = m.team_id AND o.role = 'owner' AND o.status = 'active'
                AND o.id <> m.id
          )
          AND EXISTS (
              SELECT 1 FROM team_members x
              WHERE x.team_id = m.team_id AND x.status = 'active' AND x.id <> m.id
          )
        "#,
    )
    .bind(user_id)
    .fetch_all(&mut **transaction)
    .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

pub async fn update_role_tx(
    transaction: &mut Transaction<'_, Postgres>,
    member_id: Uuid,
    role: MemberRole,
) -> TxResult<TeamMember> {
    sqlx::query_as::<_, TeamMember>(&format!(
        r#"
        UPDATE team_members SET role = $2, updated_at = NOW()
        WHERE id = $1
        RETURNING {MEMBER_COLUMNS}
        "#
    ))
    .bind(member_id)
    .bind(role)
    .fetch_one(&mut **transaction)
    .await
}

/// Move a member out of the team, stamping `left_at` or `removed_at`.
///
/// Only `Left`, `Removed` and `Revoked` are accepted; anything else is `InvalidData`.
pub async fn set_member_status_tx(
    transaction: &mut Transaction<'_, Postgres>,
    member_id: Uuid,
    status: MemberStatus,
) -> std::result::Result<TeamMember, RepositoryError> {
    let stamp = match status {
        MemberStatus::Left => "left_at = NOW()",
        MemberStatus::Removed | MemberStatus::Revoked => "removed_at = NOW()",
        other => {
            return Err(RepositoryError::InvalidData(format!(
                "{other:?} is not an exit status"
            )))
        }
    };

    let member = sqlx::query_as::<_, TeamMember>(&format!(
        r#"
        UPDATE team_members SET status = $2, {stamp}, updated_at = NOW()
        WHERE id = $1
        RETURNING {MEMBER_COLUMNS}
        "#
    ))
    .bind(member_id)
    .bind(status)
    .fetch_optional(&mut **transaction)
    .await?;

    member.ok_or(RepositoryError::NotFound)
}

/// Put a former member back into `pending` for a fresh invite.
pub async fn reset_member_pending_tx(
    transaction: &mut Transaction<'_, Postgres>,
    member_id: Uuid,
    role: MemberRole,
) -> TxResult<TeamMember> {
    sqlx::query_as::<_, TeamMember>(&format!(
        r#"
        UPDATE team_members SET status = 'pending', role = $2,
                                left_at = NULL, removed_at = NULL, updated_at = NOW()
        WHERE id = $1
        RETURNING {MEMBER_COLUMNS}
        "#
    ))
    .bind(member_id)
    .bind(role)
    .fetch_one(&mut **transaction)
    .await
}

/// Bind a member row to a user and make it active.
pub async fn activate_member_tx(
    transaction: &mut Transaction<'_, Postgres>,
    member_id: Uuid,
    user_id: Uuid,
    role: MemberRole,
    external_membership_id: Option<&str>,
) -> TxResult<TeamMember> {
    sqlx::query_as::<_, TeamMember>(&format!(
        r#"
        UPDATE team_members SET
            user_id = $2,
            role = $3,
            status = 'active',
            external_membership_id = COALESCE($4, external_membership_id),
            joined_at = NOW(),
            left_at = NULL,
            removed_at = NULL,
            updated_at = NOW()
        WHERE id = $1
        RETURNING {MEMBER_COLUMNS}
        "#
    ))
    .bind(member_id)
    .bind(user_id)
    .bind(role)
    .bind(external_membership_id)
    .fetch_one(&mut **transaction)
    .await
}

/// Remove the member an identity provider membership belongs to, if still active.
pub async fn remove_member_by_external_id_tx(
    transaction: &mut Transaction<'_, Postgres>,
    external_membership_id: &str,
) -> TxResult<Option<TeamMember>> {
    sqlx::query_as::<_, TeamMember>(&format!(
        r#"
        UPDATE team_members SET status = 'removed', removed_at = NOW(), updated_at = NOW()
        WHERE external_membership_id = $1 AND status IN ('active', 'pending')
        RETURNING {MEMBER_COLUMNS}
        "#
    ))
    .bind(external_membership_id)
    .fetch_optional(&mut **transaction)
    .await
}

// ============================================================================
// Invites
// ============================================================================

pub async fn insert_invite_tx(
    transaction: &mut Transaction<'_, Postgres>,
    invite: &NewInvite,
) -> TxResult<TeamInvite> {
    sqlx::query_as::<_, TeamInvite>(&format!(
        r#"
        INSERT INTO team_invites
            (team_id, email, token, invite_type, role, invited_by, max_uses, expires_at,
             external_invite_id, team_member_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING {INVITE_COLUMNS}
        "#
    ))
    .bind(invite.team_id)
    .bind(&invite.email)
    .bind(&invite.token)
    .bind(invite.invite_type)
    .bind(invite.role)
    .bind(invite.invited_by)
    .bind(invite.max_uses)
    .bind(invite.expires_at)
    .bind(&invite.external_invite_id)
    .bind(invite.team_member_id)
    .fetch_one(&mut **transaction)
    .await
}

/// Lock an invite by its token for the rest of the transaction.
pub async fn lock_invite_by_token_tx(
    transaction: &mut Transaction<'_, Postgres>,
    team_id: Uuid,
    token: &str,
) -> TxResult<Option<TeamInvite>> {
    sqlx::query_as::<_, TeamInvite>(&format!(
        r#"
        SELECT {INVITE_COLUMNS} FROM team_invites
        WHERE team_id = $1 AND token = $2
        FOR UPDATE
        "#
    ))
    .bind(team_id)
    .bind(token)
    .fetch_optional(&mut **transaction)
    .await
}

/// Accept a single-use invite, binding it to `member_id`.
///
/// Returns `RepositoryError::NotFound` when the invite is no longer pending,
/// has expired, or has no uses left.
pub async fn mark_invite_accepted_tx(
    transaction: &mut Transaction<'_, Postgres>,
    invite_id: Uuid,
    member_id: Uuid,
) -> std::result::Result<TeamInvite, RepositoryError> {
    let invite = sqlx::query_as::<_, TeamInvite>(&format!(
        r#"
        UPDATE team_invites SET
            state = 'accepted',
            accepted_at = NOW(),
            used_times = used_times + 1,
            team_member_id = $2
        WHERE id = $1 AND state = 'pending'
          AND (expires_at IS NULL OR expires_at > NOW())
          AND (max_uses = 0 OR used_times < max_uses)
        RETURNING {INVITE_COLUMNS}
        "#
    ))
    .bind(invite_id)
    .bind(member_id)
    .fetch_optional(&mut **transaction)
    .await?;

    invite.ok_or(RepositoryError::NotFound)
}

/// Consume one use of a shared invite.
///
/// Returns `RepositoryError::NotFound` when the invite cannot be used anymore.
pub async fn increment_invite_use_tx(
    transaction: &mut Transaction<'_, Postgres>,
    invite_id: Uuid,
) -> std::result::Result<TeamInvite, RepositoryError> {
    let invite = sqlx::query_as::<_, TeamInvite>(&format!(
        r#"
        UPDATE team_invites SET used_times = used_times + 1
        WHERE id = $1 AND state IN ('pending', 'accepted')
          AND (expires_at IS NULL OR expires_at > NOW())
          AND (max_uses = 0 OR used_times < max_uses)
        RETURNING {INVITE_COLUMNS}
        "#
    ))
    .bind(invite_id)
    .fetch_optional(&mut **transaction)
    .await?;

    invite.ok_or(RepositoryError::NotFound)
}

/// Softly expire an invite: `expires_at = NOW()`, state untouched.
pub async fn expire_invite_tx(
    transaction: &mut Transaction<'_, Postgres>,
    invite_id: Uuid,
) -> TxResult<()> {
    sqlx::query(
        r#"
        UPDATE team_invites SET expires_at = NOW()
        WHERE id = $1 AND (expires_at IS NULL OR expires_at > NOW())
        "#,
    )
    .bind(invite_id)
    .execute(&mut **transaction)
    .await?;
    Ok(())
}

/// Cancel a pending invite. `None` when it does not exist or is already terminal.
pub async fn cancel_invite_tx(
    transaction: &mut Transaction<'_, Postgres>,
    team_id: Uuid,
    invite_id: Uuid,
) -> TxResult<Option<TeamInvite>> {
    sqlx::query_as::<_, TeamInvite>(&format!(
        r#"
        UPDATE team_invites SET state = 'canceled', canceled_at = NOW(), expires_at = NOW()
        WHERE team_id = $1 AND id = $2 AND state = 'pending'
        RETURNING {INVITE_COLUMNS}
        "#
    ))
    .bind(team_id)
    .bind(invite_id)
    .fetch_optional(&mut **transaction)
    .await
}

/// Cancel every pending invite a user sent in a team.
pub async fn cancel_invites_by_inviter_tx(
    transaction: &mut Transaction<'_, Postgres>,
    team_id: Uuid,
    invited_by: Uuid,
) -> TxResult<Vec<TeamInvite>> {
    sqlx::query_as::<_, TeamInvite>(&format!(
        r#"
        UPDATE team_invites SET state = 'canceled', canceled_at = NOW(), expires_at = NOW()
        WHERE team_id = $1 AND invited_by = $2 AND state = 'pending'
        RETURNING {INVITE_COLUMNS}
        "#
    ))
    .bind(team_id)
    .bind(invited_by)
    .fetch_all(&mut **transaction)
    .await
}

/// Cancel pending single invites that target a member row.
pub async fn cancel_invites_for_member_tx(
    transaction: &mut Transaction<'_, Postgres>,
    member_id: Uuid,
) -> TxResult<Vec<TeamInvite>> {
    sqlx::query_as::<_, TeamInvite>(&format!(
        r#"
        UPDATE team_invites SET state = 'canceled', canceled_at = NOW(), expires_at = NOW()
        WHERE team_member_id = $1 AND state = 'pending'
        RETURNING {INVITE_COLUMNS}
        "#
    ))
    .bind(member_id)
    .fetch_all(&mut **transaction)
    .await
}
