//! User repository

use crate::domain::entities::User;
use crate::repository::USER_COLUMNS;
use tenantry_common::Result;
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Clone)]
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get user by ID
    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    /// Find user by email, case-insensitively
    pub async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE LOWER(email) = LOWER($1)"
        ))
        .bind(email.trim())
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    pub async fn find_by_external_id(&self, external_id: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE external_id = $1"
        ))
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    /// Insert a new user
    pub async fn create(
        &self,
        email: &str,
        name: Option<&str>,
        password_hash: Option<&str>,
        external_id: Option<&str>,
        email_confirmed: bool,
    ) -> Result<User> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (email, name, password_hash, external_id, email_confirmed_at)
            VALUES ($1, $2, $3, $4, CASE WHEN $5 THEN NOW() ELSE NULL END)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(email.trim())
        .bind(name)
        .bind(password_hash)
        .bind(external_id)
        .bind(email_confirmed)
        .fetch_one(&self.pool)
        .await?;

        Ok(user)
    }

    /// Attach the identity provider's user id to an existing account
    pub async fn link_external_id(&self, id: Uuid, external_id: &str) -> Result<User> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users SET external_id = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(external_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(user)
    }

    pub async fn confirm_email(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE users SET email_confirmed_at = COALESCE(email_confirmed_at, NOW()),
                             updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_name(&self, id: Uuid, name: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users SET name = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    pub async fn accept_terms(&self, id: Uuid) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users SET terms_accepted_at = COALESCE(terms_accepted_at, NOW()),
                             updated_at = NOW()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    pub async fn complete_onboarding(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE users SET onboarding_completed_at = COALESCE(onboarding_completed_at, NOW()),
                             updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_teammates_invited(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE users SET teammates_invited_at = COALESCE(teammates_invited_at, NOW()),
                             updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Point the user's default team somewhere else
    pub async fn set_default_team(&self, id: Uuid, team_id: Uuid, slug: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE users SET default_team_id = $2, default_team_slug = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(team_id)
        .bind(slug)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Repoint the default team after leaving `team_id`: another active team, else none
    pub async fn reset_default_team(&self, id: Uuid, team_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE users u SET
                default_team_id = next.id,
                default_team_slug = next.slug,
                updated_at = NOW()
            FROM (
                SELECT (
                    SELECT t.id FROM teams t
                    JOIN team_members m ON m.team_id = t.id
                    WHERE m.user_id = $1 AND m.status = 'active'
                      AND t.deleted_at IS NULL AND t.id <> $2
                    ORDER BY m.joined_at DESC NULLS LAST
                    LIMIT 1
                ) AS id
            ) picked
            LEFT JOIN teams next ON next.id = picked.id
            WHERE u.id = $1 AND u.default_team_id = $2
            "#,
        )
        .bind(id)
        .bind(team_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Clear `deleted_at` on an account inside its restore window
    pub async fn restore(&self, id: Uuid) -> Result<User> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users SET deleted_at = NULL, updated_at = NOW()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        Ok(user)
    }
}
