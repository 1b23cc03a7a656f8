//! Auth CQRS read-model types
//!
//! Lightweight views of the user and session rows owned by the teams domain,
//! carrying only what credential resolution and the fence need.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::jwt::version_millis;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AuthIdentity {
    pub id: Uuid,
    pub external_id: Option<String>,
    pub email: String,
    pub name: Option<String>,
    pub security_version: Option<DateTime<Utc>>,
    pub default_team_slug: Option<String>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl AuthIdentity {
    /// Security version in milliseconds; `i64::MIN` when never bumped
    pub fn security_version_millis(&self) -> i64 {
        self.security_version.map(version_millis).unwrap_or(i64::MIN)
    }

    /// True when a credential stamped with `version` predates the fence
    pub fn is_fenced(&self, version: i64) -> bool {
        version < self.security_version_millis()
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AuthSession {
    pub id: Uuid,
    pub user_id: Uuid,
    pub external_session_id: Option<String>,
    pub version: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl AuthSession {
    /// Stand-in for API key requests, which carry no session row
    pub fn anonymous(user: &AuthIdentity) -> Self {
        Self {
            id: Uuid::nil(),
            user_id: user.id,
            external_session_id: None,
            version: user.security_version.unwrap_or_else(Utc::now),
            expires_at: None,
            revoked_at: None,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.id.is_nil()
    }

    /// Not revoked, not fenced and not past its expiry
    pub fn is_active(&self, user: &AuthIdentity, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none()
            && !user.is_fenced(version_millis(self.version))
            && self.expires_at.map_or(true, |exp| exp > now)
    }
}

/// How the request proved its identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    ApiKey,
    /// HS256 token issued by this service
    Internal,
    /// RS256 token issued by the identity provider
    Provider,
}
