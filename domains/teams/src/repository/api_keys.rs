//! API key repository

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tenantry_common::Result;
use uuid::Uuid;

use crate::domain::entities::ApiKey;
use crate::repository::API_KEY_COLUMNS;

#[derive(Clone)]
pub struct ApiKeyRepository {
    pool: PgPool,
}

impl ApiKeyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Unrevoked keys of a user, newest first
    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<ApiKey>> {
        let keys = sqlx::query_as::<_, ApiKey>(&format!(
            r#"
            SELECT {API_KEY_COLUMNS} FROM api_keys
            WHERE user_id = $1 AND revoked_at IS NULL
            ORDER BY created_at DESC
            "#
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(keys)
    }

    pub async fn create(
        &self,
        user_id: Uuid,
        name: &str,
        key_prefix: &str,
        key_hash: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<ApiKey> {
        let key = sqlx::query_as::<_, ApiKey>(&format!(
            r#"
            INSERT INTO api_keys (user_id, name, key_prefix, key_hash, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {API_KEY_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(name)
        .bind(key_prefix)
        .bind(key_hash)
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(key)
    }

    /// Revoke a key owned by `user_id`; `None` when no such key exists
    pub async fn revoke(&self, user_id: Uuid, id: Uuid) -> Result<Option<ApiKey>> {
        let key = sqlx::query_as::<_, ApiKey>(&format!(
            r#"
            UPDATE api_keys SET revoked_at = COALESCE(revoked_at, NOW())
            WHERE id = $1 AND user_id = $2
            RETURNING {API_KEY_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(key)
    }
}
