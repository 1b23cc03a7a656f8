//! Authentication configuration

use tenantry_common::Config;

/// Authentication configuration
#[derive(Clone)]
pub struct AuthConfig {
    /// HS256 secret for internally issued tokens
    pub jwt_secret: String,
    /// SPA origin used for post-auth redirects
    pub app_url: String,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &"[REDACTED]")
            .field("app_url", &self.app_url)
            .finish()
    }
}

impl From<&Config> for AuthConfig {
    fn from(config: &Config) -> Self {
        Self {
            jwt_secret: config.jwt_secret.clone(),
            app_url: config.app_url.clone(),
        }
    }
}
