//! Team invite repository

use sqlx::PgPool;
use tenantry_common::Result;
use uuid::Uuid;

use crate::domain::entities::TeamInvite;
use crate::repository::INVITE_COLUMNS;

#[derive(Clone)]
pub struct InviteRepository {
    pool: PgPool,
}

impl InviteRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, team_id: Uuid, invite_id: Uuid) -> Result<Option<TeamInvite>> {
        let invite = sqlx::query_as::<_, TeamInvite>(&format!(
            "SELECT {INVITE_COLUMNS} FROM team_invites WHERE team_id = $1 AND id = $2"
        ))
        .bind(team_id)
        .bind(invite_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(invite)
    }

    pub async fn get_by_id(&self, invite_id: Uuid) -> Result<Option<TeamInvite>> {
        let invite = sqlx::query_as::<_, TeamInvite>(&format!(
            "SELECT {INVITE_COLUMNS} FROM team_invites WHERE id = $1"
        ))
        .bind(invite_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(invite)
    }

    pub async fn find_by_token(&self, team_id: Uuid, token: &str) -> Result<Option<TeamInvite>> {
        let invite = sqlx::query_as::<_, TeamInvite>(&format!(
            "SELECT {INVITE_COLUMNS} FROM team_invites WHERE team_id = $1 AND token = $2"
        ))
        .bind(team_id)
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        Ok(invite)
    }

    /// Outstanding single-use invites, newest first
    pub async fn list_pending(&self, team_id: Uuid) -> Result<Vec<TeamInvite>> {
        let invites = sqlx::query_as::<_, TeamInvite>(&format!(
            r#"
            SELECT {INVITE_COLUMNS} FROM team_invites
            WHERE team_id = $1 AND invite_type = 'single' AND state = 'pending'
              AND (expires_at IS NULL OR expires_at > NOW())
            ORDER BY created_at DESC
            "#
        ))
        .bind(team_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(invites)
    }

    /// True when a live single invite already targets this email
    pub async fn pending_email_exists(&self, team_id: Uuid, email: &str) -> Result<bool> {
        let row: (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM team_invites
                WHERE team_id = $1 AND LOWER(email) = LOWER($2)
                  AND invite_type = 'single' AND state = 'pending'
                  AND (expires_at IS NULL OR expires_at > NOW())
            )
            "#,
        )
        .bind(team_id)
        .bind(email)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    /// Mark a pending invite expired once the provider reports it so
    pub async fn mark_expired(&self, invite_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE team_invites SET state = 'expired', expires_at = COALESCE(expires_at, NOW())
            WHERE id = $1 AND state = 'pending'
            "#,
        )
        .bind(invite_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
