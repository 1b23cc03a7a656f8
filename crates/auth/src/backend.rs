//! Concrete authentication backend
//!
//! Wraps `PgPool` + `AuthConfig` + the identity provider handle and owns the
//! auth-specific SQL. Uses runtime `sqlx::query_as` against the user, session
//! and api key rows owned by the teams domain.

use std::sync::Arc;

use axum::http::HeaderMap;
use axum_extra::extract::cookie::CookieJar;
use chrono::{DateTime, Utc};
use jsonwebtoken::Algorithm;
use sqlx::PgPool;
use tenantry_common::crypto::verify_key_hash;
use tenantry_workos::{AccessTokenClaims, IdentityProvider};
use uuid::Uuid;

use crate::claims::TokenType;
use crate::config::AuthConfig;
use crate::context::AuthContext;
use crate::cookies::{cookie_value, AUTH_COOKIE};
use crate::error::AuthError;
use crate::jwks::JwksCache;
use crate::jwt::{token_algorithm, validate_token, version_millis};
use crate::types::{AuthIdentity, AuthMethod, AuthSession};

/// Header carrying an API key
pub const API_KEY_HEADER: &str = "x-api-key";

/// Every issued API key starts with this
pub const API_KEY_PREFIX: &str = "tnt_";

/// Leading characters of a raw key stored in clear for lookup
pub const API_KEY_LOOKUP_LEN: usize = 12;

const USER_COLUMNS: &str =
    "id, external_id, email, name, security_version, default_team_slug, deleted_at";

const SESSION_COLUMNS: &str =
    "id, user_id, external_session_id, version, expires_at, revoked_at";

#[derive(sqlx::FromRow)]
struct ApiKeyRow {
    id: Uuid,
    user_id: Uuid,
    key_hash: String,
}

/// Concrete authentication backend.
///
/// Domain states expose this via `FromRef`:
/// ```ignore
/// impl FromRef<MyDomainState> for AuthBackend {
///     fn from_ref(state: &MyDomainState) -> Self {
///         state.auth.clone()
///     }
/// }
/// ```
#[derive(Clone)]
pub struct AuthBackend {
    pool: PgPool,
    config: AuthConfig,
    identity: Arc<dyn IdentityProvider>,
    jwks: JwksCache,
}

impl AuthBackend {
    pub fn new(pool: PgPool, config: AuthConfig, identity: Arc<dyn IdentityProvider>) -> Self {
        Self {
            pool,
            config,
            jwks: JwksCache::new(identity.clone()),
            identity,
        }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn identity(&self) -> &Arc<dyn IdentityProvider> {
        &self.identity
    }

    pub fn jwks(&self) -> &JwksCache {
        &self.jwks
    }

    pub async fn find_user(&self, id: Uuid) -> Result<Option<AuthIdentity>, AuthError> {
        let user = sqlx::query_as::<_, AuthIdentity>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, user_id = %id, "Failed to load user");
            AuthError::from(e)
        })?;
        Ok(user)
    }

    pub async fn find_user_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<AuthIdentity>, AuthError> {
        let user = sqlx::query_as::<_, AuthIdentity>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE external_id = $1"
        ))
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, external_id = %external_id, "Failed to load user");
            AuthError::from(e)
        })?;
        Ok(user)
    }

    pub async fn find_session(&self, id: Uuid) -> Result<Option<AuthSession>, AuthError> {
        let session = sqlx::query_as::<_, AuthSession>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(session)
    }

    pub async fn find_session_by_external_id(
        &self,
        external_session_id: &str,
    ) -> Result<Option<AuthSession>, AuthError> {
        let session = sqlx::query_as::<_, AuthSession>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE external_session_id = $1"
        ))
        .bind(external_session_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(session)
    }

    /// External organization id of the live team with `slug`
    pub async fn team_organization(&self, slug: &str) -> Result<Option<String>, AuthError> {
        let row: Option<(Option<String>,)> = sqlx::query_as(
            "SELECT external_org_id FROM teams WHERE slug = $1 AND deleted_at IS NULL",
        )
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.and_then(|(org,)| org))
    }

    /// Point a session at the provider session minted by a re-scoping exchange
    pub async fn rebind_session(
        &self,
        session_id: Uuid,
        external_session_id: &str,
    ) -> Result<(), AuthError> {
        sqlx::query(
            r#"
            UPDATE sessions
            SET external_session_id = $2, last_seen_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(session_id)
        .bind(external_session_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn check_user(user: &AuthIdentity) -> Result<(), AuthError> {
        if user.deleted_at.is_some() {
            return Err(AuthError::UserDeleted);
        }
        Ok(())
    }

    /// Apply the security-version fence to a resolved session
    pub fn check_fence(
        user: &AuthIdentity,
        session: &AuthSession,
        credential_version: i64,
        now: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        if user.is_fenced(credential_version) || !session.is_active(user, now) {
            tracing::info!(
                user_id = %user.id,
                session_id = %session.id,
                "Credential predates security version or session inactive"
            );
            return Err(AuthError::SessionExpired);
        }
        Ok(())
    }

    /// Resolve a raw API key
    pub async fn authenticate_api_key(&self, candidate: &str) -> Result<AuthContext, AuthError> {
        if !candidate.starts_with(API_KEY_PREFIX) || candidate.len() <= API_KEY_LOOKUP_LEN {
            return Err(AuthError::InvalidToken);
        }

        let rows: Vec<ApiKeyRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, key_hash
            FROM api_keys
            WHERE key_prefix = $1 AND revoked_at IS NULL
              AND (expires_at IS NULL OR expires_at > NOW())
            "#,
        )
        .bind(&candidate[..API_KEY_LOOKUP_LEN])
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to query API keys");
            AuthError::from(e)
        })?;

        let row = rows
            .into_iter()
            .find(|row| verify_key_hash(candidate, &row.key_hash))
            .ok_or(AuthError::InvalidToken)?;

        // Best-effort touch
        if let Err(e) = sqlx::query("UPDATE api_keys SET last_used_at = NOW() WHERE id = $1")
            .bind(row.id)
            .execute(&self.pool)
            .await
        {
            tracing::warn!(error = %e, api_key_id = %row.id, "Failed to update api_key last_used_at");
        }

        let user = self
            .find_user(row.user_id)
            .await?
            .ok_or(AuthError::Unauthorized)?;
        Self::check_user(&user)?;

        let session = AuthSession::anonymous(&user);
        Ok(AuthContext::new(user, session, AuthMethod::ApiKey))
    }

    /// Resolve an HS256 access token issued by this service
    pub async fn authenticate_internal(&self, token: &str) -> Result<AuthContext, AuthError> {
        let claims = validate_token(token, &self.config, TokenType::Auth)?;
        let session_id = claims.session_id.ok_or(AuthError::InvalidToken)?;

        let user = self
            .find_user(claims.user_id)
            .await?
            .ok_or(AuthError::Unauthorized)?;
        Self::check_user(&user)?;

        let session = self
            .find_session(session_id)
            .await?
            .filter(|s| s.user_id == user.id)
            .ok_or(AuthError::Unauthorized)?;

        Self::check_fence(&user, &session, claims.version, Utc::now())?;
        Ok(AuthContext::new(user, session, AuthMethod::Internal))
    }

    /// Resolve an RS256 provider access token, returning its claims too
    pub async fn authenticate_provider(
        &self,
        token: &str,
    ) -> Result<(AuthContext, AccessTokenClaims), AuthError> {
        let claims = self.jwks.verify(token).await?;

        let user = self
            .find_user_by_external_id(&claims.sub)
            .await?
            .ok_or(AuthError::Unauthorized)?;
        Self::check_user(&user)?;

        let session = self
            .find_session_by_external_id(&claims.sid)
            .await?
            .filter(|s| s.user_id == user.id)
            .ok_or(AuthError::Unauthorized)?;

        Self::check_fence(&user, &session, version_millis(session.version), Utc::now())?;

        let ctx = AuthContext::new(user, session, AuthMethod::Provider).with_scope(
            claims.org_id.clone(),
            claims.role.clone(),
            claims.permissions.clone(),
        );
        Ok((ctx, claims))
    }

    /// Resolve an access token of either signing scheme
    pub async fn authenticate_access_token(&self, token: &str) -> Result<AuthContext, AuthError> {
        match token_algorithm(token)? {
            Algorithm::HS256 => self.authenticate_internal(token).await,
            Algorithm::RS256 => self.authenticate_provider(token).await.map(|(ctx, _)| ctx),
            _ => Err(AuthError::InvalidToken),
        }
    }

    /// Credential resolution: API key header first, then the access cookie
    pub async fn authenticate(
        &self,
        headers: &HeaderMap,
        jar: &CookieJar,
    ) -> Result<AuthContext, AuthError> {
        if let Some(key) = headers.get(API_KEY_HEADER) {
            let key = key.to_str().map_err(|_| AuthError::InvalidToken)?;
            return self.authenticate_api_key(key.trim()).await;
        }

        let token = cookie_value(jar, AUTH_COOKIE).ok_or(AuthError::MissingToken)?;
        self.authenticate_access_token(&token).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tenantry_workos::mock::MockIdentityProvider;

    fn backend() -> AuthBackend {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unused")
            .unwrap();
        AuthBackend::new(
            pool,
            AuthConfig {
                jwt_secret: "test_secret".to_string(),
                app_url: "http://localhost:3000".to_string(),
            },
            Arc::new(MockIdentityProvider::new()),
        )
    }

    fn identity(security_version: Option<DateTime<Utc>>) -> AuthIdentity {
        AuthIdentity {
            id: Uuid::new_v4(),
            external_id: None,
            email: "a@b.com".to_string(),
            name: None,
            security_version,
            default_team_slug: None,
            deleted_at: None,
        }
    }

    #[test]
    fn test_fence_rejects_older_credential() {
        let now = Utc::now();
        let user = identity(Some(now));
        let session = AuthSession {
            id: Uuid::new_v4(),
            user_id: user.id,
            external_session_id: None,
            version: now,
            expires_at: None,
            revoked_at: None,
        };
        let stale = (now - Duration::minutes(1)).timestamp_millis();
        assert_eq!(
            AuthBackend::check_fence(&user, &session, stale, now),
            Err(AuthError::SessionExpired)
        );
        assert!(AuthBackend::check_fence(&user, &session, now.timestamp_millis(), now).is_ok());
    }

    #[test]
    fn test_deleted_user_rejected() {
        let mut user = identity(None);
        user.deleted_at = Some(Utc::now());
        assert_eq!(AuthBackend::check_user(&user), Err(AuthError::UserDeleted));
    }

    #[tokio::test]
    async fn test_missing_credentials() {
        let result = backend()
            .authenticate(&HeaderMap::new(), &CookieJar::new())
            .await;
        assert_eq!(result.unwrap_err(), AuthError::MissingToken);
    }

    #[tokio::test]
    async fn test_malformed_api_key_rejected_before_store() {
        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, "sk_live_abc".parse().unwrap());
        let result = backend().authenticate(&headers, &CookieJar::new()).await;
        assert_eq!(result.unwrap_err(), AuthError::InvalidToken);
    }

    #[tokio::test]
    async fn test_garbage_cookie_rejected_before_store() {
        let jar = CookieJar::new().add(axum_extra::extract::cookie::Cookie::new(
            AUTH_COOKIE,
            "not-a-jwt",
        ));
        let result = backend().authenticate(&HeaderMap::new(), &jar).await;
        assert_eq!(result.unwrap_err(), AuthError::InvalidToken);
    }
}
