//! Teams domain state and auth backend integration

use std::sync::Arc;

use axum::extract::FromRef;
use tenantry_auth::AuthBackend;
use tenantry_common::Config;
use tenantry_email::EmailService;

use crate::repository::TeamsRepositories;

/// URLs and branding used when building links and redirects
#[derive(Debug, Clone)]
pub struct TeamsConfig {
    /// SPA origin
    pub app_url: String,
    /// Public origin of this API
    pub api_url: String,
    pub app_name: String,
}

impl TeamsConfig {
    pub fn app_link(&self, path: &str) -> String {
        format!("{}{}", self.app_url.trim_end_matches('/'), path)
    }

    pub fn api_link(&self, path: &str) -> String {
        format!("{}{}", self.api_url.trim_end_matches('/'), path)
    }
}

impl From<&Config> for TeamsConfig {
    fn from(config: &Config) -> Self {
        Self {
            app_url: config.app_url.clone(),
            api_url: config.api_url.clone(),
            app_name: config.app_name.clone(),
        }
    }
}

/// Application state for the Teams domain
#[derive(Clone)]
pub struct TeamsState {
    pub repos: TeamsRepositories,
    pub auth: AuthBackend,
    pub email: Arc<dyn EmailService>,
    pub config: TeamsConfig,
}

impl FromRef<TeamsState> for AuthBackend {
    fn from_ref(state: &TeamsState) -> Self {
        state.auth.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_links_join_without_double_slash() {
        let config = TeamsConfig {
            app_url: "https://app.tenantry.test/".to_string(),
            api_url: "https://api.tenantry.test".to_string(),
            app_name: "Tenantry".to_string(),
        };
        assert_eq!(
            config.app_link("/teams/acme"),
            "https://app.tenantry.test/teams/acme"
        );
        assert_eq!(
            config.api_link("/auth/callback"),
            "https://api.tenantry.test/auth/callback"
        );
    }
}
