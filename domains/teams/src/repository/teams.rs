//! Team repository

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use tenantry_common::Result;
use uuid::Uuid;

use crate::domain::entities::{MemberRole, Team};
use crate::repository::TEAM_COLUMNS;

/// A team the caller belongs to, with the caller's role
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct TeamWithRole {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub role: MemberRole,
    pub joined_at: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct TeamRepository {
    pool: PgPool,
}

impl TeamRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Live (not deleted) team by slug
    pub async fn get_by_slug(&self, slug: &str) -> Result<Option<Team>> {
        let team = sqlx::query_as::<_, Team>(&format!(
            "SELECT {TEAM_COLUMNS} FROM teams WHERE slug = $1 AND deleted_at IS NULL"
        ))
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;

        Ok(team)
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<Team>> {
        let team = sqlx::query_as::<_, Team>(&format!(
            "SELECT {TEAM_COLUMNS} FROM teams WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(team)
    }

    pub async fn find_by_stripe_customer(&self, customer_id: &str) -> Result<Option<Team>> {
        let team = sqlx::query_as::<_, Team>(&format!(
            "SELECT {TEAM_COLUMNS} FROM teams WHERE stripe_customer_id = $1"
        ))
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(team)
    }

    /// Slugs are unique across live and deleted teams
    pub async fn slug_exists(&self, slug: &str) -> Result<bool> {
        let row: (bool,) = sqlx::query_as("SELECT EXISTS (SELECT 1 FROM teams WHERE slug = $1)")
            .bind(slug)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }

    /// Teams where the user is an active member
    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<TeamWithRole>> {
        let teams = sqlx::query_as::<_, TeamWithRole>(
            r#"
            SELECT t.id, t.name, t.slug, m.role, m.joined_at
            FROM teams t
            JOIN team_members m ON m.team_id = t.id
            WHERE m.user_id = $1 AND m.status = 'active' AND t.deleted_at IS NULL
            ORDER BY t.name
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(teams)
    }

    pub async fn complete_onboarding(&self, team_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE teams SET onboarding_completed_at = COALESCE(onboarding_completed_at, NOW()),
                             updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(team_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record the payment provider customer, keeping any existing one
    pub async fn set_stripe_customer_id(&self, team_id: Uuid, customer_id: &str) -> Result<Team> {
        let team = sqlx::query_as::<_, Team>(&format!(
            r#"
            UPDATE teams SET stripe_customer_id = COALESCE(stripe_customer_id, $2),
                             updated_at = NOW()
            WHERE id = $1
            RETURNING {TEAM_COLUMNS}
            "#
        ))
        .bind(team_id)
        .bind(customer_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(team)
    }
}
