//! Authorization context for authenticated requests

use uuid::Uuid;

use crate::types::{AuthIdentity, AuthMethod, AuthSession};

/// Resolved `(User, Session, AuthMethod)` for a request
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user: AuthIdentity,
    pub session: AuthSession,
    pub method: AuthMethod,
    /// Organization the provider token is scoped to
    pub organization_id: Option<String>,
    pub role: Option<String>,
    pub permissions: Vec<String>,
}

impl AuthContext {
    pub fn new(user: AuthIdentity, session: AuthSession, method: AuthMethod) -> Self {
        Self {
            user,
            session,
            method,
            organization_id: None,
            role: None,
            permissions: Vec::new(),
        }
    }

    pub fn with_scope(
        mut self,
        organization_id: Option<String>,
        role: Option<String>,
        permissions: Vec<String>,
    ) -> Self {
        self.organization_id = organization_id;
        self.role = role;
        self.permissions = permissions;
        self
    }

    pub fn user_id(&self) -> Uuid {
        self.user.id
    }

    /// Session row id; `None` for API key requests
    pub fn session_id(&self) -> Option<Uuid> {
        if self.session.is_anonymous() {
            None
        } else {
            Some(self.session.id)
        }
    }

    pub fn is_api_key(&self) -> bool {
        self.method == AuthMethod::ApiKey
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }
}
