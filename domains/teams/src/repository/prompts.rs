//! Prompt repository

use sqlx::PgPool;
use tenantry_common::Result;
use uuid::Uuid;

use crate::domain::entities::{NewPrompt, Prompt, PromptType};
use crate::repository::PROMPT_COLUMNS;

#[derive(Clone)]
pub struct PromptRepository {
    pool: PgPool,
}

impl PromptRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, user_id: Uuid, id: Uuid) -> Result<Option<Prompt>> {
        let prompt = sqlx::query_as::<_, Prompt>(&format!(
            "SELECT {PROMPT_COLUMNS} FROM prompts WHERE id = $1 AND user_id = $2"
        ))
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(prompt)
    }

    /// Undismissed prompts of `prompt_type` for a user in a team, inside their window
    pub async fn list_visible(
        &self,
        user_id: Uuid,
        team_id: Uuid,
        prompt_type: PromptType,
    ) -> Result<Vec<Prompt>> {
        let prompts = sqlx::query_as::<_, Prompt>(&format!(
            r#"
            SELECT {PROMPT_COLUMNS} FROM prompts
            WHERE user_id = $1 AND team_id = $2 AND prompt_type = $3
              AND dismissed_at IS NULL
              AND (starts_at IS NULL OR starts_at <= NOW())
              AND (ends_at IS NULL OR ends_at > NOW())
            ORDER BY priority DESC, created_at DESC
            "#
        ))
        .bind(user_id)
        .bind(team_id)
        .bind(prompt_type)
        .fetch_all(&self.pool)
        .await?;

        Ok(prompts)
    }

    /// Insert unless an undismissed prompt with the same title already exists.
    ///
    /// Returns `None` when the prompt was already present.
    pub async fn create_if_absent(&self, prompt: &NewPrompt) -> Result<Option<Prompt>> {
        let created = sqlx::query_as::<_, Prompt>(&format!(
            r#"
            INSERT INTO prompts
                (user_id, team_id, prompt_type, title, body, action_label, action_url,
                 priority, dismissible)
            SELECT $1, $2, $3, $4, $5, $6, $7, $8, $9
            WHERE NOT EXISTS (
                SELECT 1 FROM prompts
                WHERE user_id = $1 AND team_id IS NOT DISTINCT FROM $2
                  AND title = $4 AND dismissed_at IS NULL
            )
            RETURNING {PROMPT_COLUMNS}
            "#
        ))
        .bind(prompt.user_id)
        .bind(prompt.team_id)
        .bind(prompt.prompt_type)
        .bind(&prompt.title)
        .bind(&prompt.body)
        .bind(&prompt.action_label)
        .bind(&prompt.action_url)
        .bind(prompt.priority)
        .bind(prompt.dismissible)
        .fetch_optional(&self.pool)
        .await?;

        Ok(created)
    }

    /// Set `dismissed_at` on a dismissible prompt; already dismissed stays as is
    pub async fn dismiss(&self, user_id: Uuid, id: Uuid) -> Result<Option<Prompt>> {
        let prompt = sqlx::query_as::<_, Prompt>(&format!(
            r#"
            UPDATE prompts SET dismissed_at = COALESCE(dismissed_at, NOW())
            WHERE id = $1 AND user_id = $2 AND dismissible
            RETURNING {PROMPT_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(prompt)
    }
}
