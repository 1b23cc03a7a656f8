//! Team member repository

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use tenantry_common::Result;
use uuid::Uuid;

use crate::domain::entities::{MemberRole, MemberStatus, TeamMember};
use crate::repository::MEMBER_COLUMNS;

/// Member row enriched with the bound user's profile
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct MemberWithUser {
    pub id: Uuid,
    pub team_id: Uuid,
    pub user_id: Option<Uuid>,
    pub email: String,
    pub role: MemberRole,
    pub status: MemberStatus,
    pub joined_at: Option<DateTime<Utc>>,
    pub onboarded_at: Option<DateTime<Utc>>,
    pub user_name: Option<String>,
}

#[derive(Clone)]
pub struct MemberRepository {
    pool: PgPool,
}

impl MemberRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The user's active membership in a team
    pub async fn find_active(&self, team_id: Uuid, user_id: Uuid) -> Result<Option<TeamMember>> {
        let member = sqlx::query_as::<_, TeamMember>(&format!(
            r#"
            SELECT {MEMBER_COLUMNS} FROM team_members
            WHERE team_id = $1 AND user_id = $2 AND status = 'active'
            "#
        ))
        .bind(team_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(member)
    }

    pub async fn get(&self, team_id: Uuid, member_id: Uuid) -> Result<Option<TeamMember>> {
        let member = sqlx::query_as::<_, TeamMember>(&format!(
            "SELECT {MEMBER_COLUMNS} FROM team_members WHERE team_id = $1 AND id = $2"
        ))
        .bind(team_id)
        .bind(member_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(member)
    }

    /// Active and pending members, owners first
    pub async fn list_for_team(&self, team_id: Uuid) -> Result<Vec<MemberWithUser>> {
        let members = sqlx::query_as::<_, MemberWithUser>(
            r#"
            SELECT m.id, m.team_id, m.user_id, m.email, m.role, m.status,
                   m.joined_at, m.onboarded_at, u.name AS user_name
            FROM team_members m
            LEFT JOIN users u ON u.id = m.user_id
            WHERE m.team_id = $1 AND m.status IN ('active', 'pending')
            ORDER BY m.role, m.email
            "#,
        )
        .bind(team_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(members)
    }

    /// Active owners of a team (used when addressing billing prompts)
    pub async fn list_active_owners(&self, team_id: Uuid) -> Result<Vec<TeamMember>> {
        let members = sqlx::query_as::<_, TeamMember>(&format!(
            r#"
            SELECT {MEMBER_COLUMNS} FROM team_members
            WHERE team_id = $1 AND role = 'owner' AND status = 'active' AND user_id IS NOT NULL
            "#
        ))
        .bind(team_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(members)
    }

    /// True when an active member with this email exists
    pub async fn active_email_exists(&self, team_id: Uuid, email: &str) -> Result<bool> {
        let row: (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM team_members m
                LEFT JOIN users u ON u.id = m.user_id
                WHERE m.team_id = $1 AND m.status = 'active'
                  AND (LOWER(m.email) = LOWER($2) OR LOWER(u.email) = LOWER($2))
            )
            "#,
        )
        .bind(team_id)
        .bind(email)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    pub async fn mark_onboarded(&self, member_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE team_members SET onboarded_at = COALESCE(onboarded_at, NOW()), updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(member_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
