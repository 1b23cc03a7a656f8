//! Tenantry identity provider integration
//!
//! Provides the identity-provider surface the core consumes:
//! - Organizations and organization memberships
//! - Invitations (send, accept, revoke)
//! - Authentication grants (code, magic auth, refresh, organization selection)
//! - Session revocation and the RSA key set used to verify access tokens
//! - Signed webhook verification
//!
//! A real HTTP client lives in [`client`]; [`mock`] keeps everything in memory.

pub mod client;
pub mod mock;
pub mod types;
pub mod webhook;

use std::sync::Arc;

use jsonwebtoken::jwk::JwkSet;
use thiserror::Error;

pub use types::*;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum IdentityError {
    #[error("Identity provider configuration error: {0}")]
    Configuration(String),

    #[error("Identity provider request error: {0}")]
    Request(String),

    #[error("Identity provider returned {status}: {message}")]
    Response { status: u16, message: String },

    /// Code, refresh token or credentials rejected
    #[error("Invalid grant: {0}")]
    InvalidGrant(String),

    #[error("Identity provider resource not found: {0}")]
    NotFound(String),

    /// The user belongs to several organizations and must pick one
    #[error("Organization selection required")]
    OrganizationSelectionRequired {
        pending_authentication_token: String,
        organizations: Vec<Organization>,
    },

    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Invalid webhook payload: {0}")]
    InvalidPayload(String),
}

/// Identity provider configuration.
#[derive(Clone)]
pub struct IdentityConfig {
    /// `workos` or `mock`
    pub provider: String,
    pub api_key: String,
    pub client_id: String,
    pub webhook_secret: String,
    pub base_url: String,
}

impl std::fmt::Debug for IdentityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityConfig")
            .field("provider", &self.provider)
            .field("api_key", &"[REDACTED]")
            .field("client_id", &self.client_id)
            .field("webhook_secret", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl IdentityConfig {
    pub const DEFAULT_BASE_URL: &'static str = "https://api.workos.com";

    /// Create identity config from environment variables.
    pub fn from_env() -> Result<Self, IdentityError> {
        let provider = std::env::var("IDENTITY_PROVIDER").unwrap_or_else(|_| "workos".to_string());
        let api_key = std::env::var("WORKOS_API_KEY").unwrap_or_default();
        let client_id = std::env::var("WORKOS_CLIENT_ID").unwrap_or_default();
        let webhook_secret = std::env::var("WORKOS_WEBHOOK_SECRET").unwrap_or_default();
        let base_url = std::env::var("WORKOS_BASE_URL")
            .unwrap_or_else(|_| Self::DEFAULT_BASE_URL.to_string());

        if provider != "mock" && (api_key.is_empty() || client_id.is_empty()) {
            return Err(IdentityError::Configuration(
                "WORKOS_API_KEY and WORKOS_CLIENT_ID are required".to_string(),
            ));
        }

        Ok(Self {
            provider,
            api_key,
            client_id,
            webhook_secret,
            base_url,
        })
    }
}

/// Identity provider operations used by the core.
#[async_trait::async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Hosted sign-in URL for an OAuth connection (`GoogleOAuth`, `authkit`, ...)
    fn authorization_url(&self, provider: &str, redirect_uri: &str, state: Option<&str>) -> String;

    async fn create_user(
        &self,
        email: &str,
        password: Option<&str>,
        name: Option<&str>,
    ) -> Result<IdentityUser, IdentityError>;

    async fn update_user(
        &self,
        user_id: &str,
        update: UpdateUser,
    ) -> Result<IdentityUser, IdentityError>;

    async fn authenticate_with_code(
        &self,
        code: &str,
        hints: &ClientHints,
    ) -> Result<AuthenticationResponse, IdentityError>;

    async fn authenticate_with_magic_auth(
        &self,
        code: &str,
        email: &str,
        hints: &ClientHints,
    ) -> Result<AuthenticationResponse, IdentityError>;

    /// Exchange a refresh token, optionally re-scoping to another organization
    async fn authenticate_with_refresh_token(
        &self,
        refresh_token: &str,
        organization_id: Option<&str>,
        hints: &ClientHints,
    ) -> Result<AuthenticationResponse, IdentityError>;

    async fn authenticate_with_organization_selection(
        &self,
        pending_authentication_token: &str,
        organization_id: &str,
    ) -> Result<AuthenticationResponse, IdentityError>;

    async fn revoke_session(&self, session_id: &str) -> Result<(), IdentityError>;

    async fn create_organization(&self, name: &str) -> Result<Organization, IdentityError>;

    async fn create_organization_membership(
        &self,
        organization_id: &str,
        user_id: &str,
        role_slug: &str,
    ) -> Result<OrganizationMembership, IdentityError>;

    async fn update_organization_membership(
        &self,
        membership_id: &str,
        role_slug: &str,
    ) -> Result<OrganizationMembership, IdentityError>;

    async fn deactivate_organization_membership(
        &self,
        membership_id: &str,
    ) -> Result<OrganizationMembership, IdentityError>;

    async fn send_invitation(
        &self,
        invitation: SendInvitation<'_>,
    ) -> Result<Invitation, IdentityError>;

    async fn accept_invitation(&self, invitation_id: &str) -> Result<Invitation, IdentityError>;

    async fn revoke_invitation(&self, invitation_id: &str) -> Result<Invitation, IdentityError>;

    /// RSA public keys for access-token verification
    async fn jwks(&self) -> Result<JwkSet, IdentityError>;

    /// Verify a webhook delivery and decode its envelope
    fn verify_webhook(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<webhook::WebhookEvent, IdentityError>;
}

/// Factory for creating IdentityProvider implementations.
pub struct IdentityProviderFactory;

impl IdentityProviderFactory {
    pub fn create(config: IdentityConfig) -> Result<Arc<dyn IdentityProvider>, IdentityError> {
        match config.provider.as_str() {
            "workos" => {
                tracing::info!("Creating WorkOS identity provider");
                Ok(Arc::new(client::WorkosClient::new(config)?))
            }
            "mock" => {
                tracing::info!("Creating mock identity provider");
                Ok(Arc::new(mock::MockIdentityProvider::with_webhook_secret(
                    &config.webhook_secret,
                )))
            }
            provider => Err(IdentityError::Configuration(format!(
                "Unknown identity provider: {}. Supported providers: workos, mock",
                provider
            ))),
        }
    }
}
