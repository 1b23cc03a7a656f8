//! Session repository

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tenantry_common::{ClientContext, Result};
use uuid::Uuid;

use crate::domain::entities::Session;
use crate::repository::SESSION_COLUMNS;

/// Insert payload for `sessions`
#[derive(Debug, Clone)]
pub struct NewSession {
    pub user_id: Uuid,
    pub external_session_id: Option<String>,
    pub version: DateTime<Utc>,
    pub client: ClientContext,
}

#[derive(Clone)]
pub struct SessionRepository {
    pool: PgPool,
}

impl SessionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a session; sign-in, last-seen and version all start at `version`
    pub async fn create(&self, session: &NewSession) -> Result<Session> {
        let created = sqlx::query_as::<_, Session>(&format!(
            r#"
            INSERT INTO sessions
                (user_id, external_session_id, signed_in_at, last_seen_at, version,
                 device, ip, location)
            VALUES ($1, $2, $3, $3, $3, $4, $5, $6)
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(session.user_id)
        .bind(&session.external_session_id)
        .bind(session.version)
        .bind(&session.client.device)
        .bind(&session.client.ip)
        .bind(&session.client.location)
        .fetch_one(&self.pool)
        .await?;

        Ok(created)
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<Session>> {
        let session = sqlx::query_as::<_, Session>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(session)
    }

    pub async fn find_by_external_id(&self, external_session_id: &str) -> Result<Option<Session>> {
        let session = sqlx::query_as::<_, Session>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE external_session_id = $1"
        ))
        .bind(external_session_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(session)
    }

    /// Unrevoked sessions, most recently seen first
    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Session>> {
        let sessions = sqlx::query_as::<_, Session>(&format!(
            r#"
            SELECT {SESSION_COLUMNS} FROM sessions
            WHERE user_id = $1 AND revoked_at IS NULL
            ORDER BY last_seen_at DESC
            "#
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(sessions)
    }

    /// Record a refresh: version, client audit fields and last-seen move to `version`.
    ///
    /// Last write wins under concurrent refreshes. Returns `None` once revoked.
    pub async fn record_refresh(
        &self,
        id: Uuid,
        external_session_id: Option<&str>,
        version: DateTime<Utc>,
        client: &ClientContext,
    ) -> Result<Option<Session>> {
        let session = sqlx::query_as::<_, Session>(&format!(
            r#"
            UPDATE sessions SET
                version = $2,
                last_seen_at = $2,
                external_session_id = COALESCE($3, external_session_id),
                device = COALESCE($4, device),
                ip = COALESCE($5, ip),
                location = COALESCE($6, location)
            WHERE id = $1 AND revoked_at IS NULL
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(version)
        .bind(external_session_id)
        .bind(&client.device)
        .bind(&client.ip)
        .bind(&client.location)
        .fetch_optional(&self.pool)
        .await?;

        Ok(session)
    }

    /// Revoke one of the user's sessions
    pub async fn revoke(&self, user_id: Uuid, id: Uuid) -> Result<Option<Session>> {
        let session = sqlx::query_as::<_, Session>(&format!(
            r#"
            UPDATE sessions SET revoked_at = COALESCE(revoked_at, NOW())
            WHERE id = $1 AND user_id = $2
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(session)
    }

    /// Provider-initiated revocation; returns rows changed
    pub async fn revoke_by_external_id(&self, external_session_id: &str) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE sessions SET revoked_at = NOW()
            WHERE external_session_id = $1 AND revoked_at IS NULL
            "#,
        )
        .bind(external_session_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
