//! WorkOS HTTP Client Implementation
//!
//! JSON over HTTPS with bearer API-key authentication.

use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::jwk::JwkSet;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

use crate::webhook::{self, WebhookEvent};
use crate::{
    AuthenticationResponse, ClientHints, IdentityConfig, IdentityError, IdentityProvider,
    IdentityUser, Invitation, Organization, OrganizationMembership, SendInvitation, UpdateUser,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Error body returned by the provider
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    pending_authentication_token: Option<String>,
    #[serde(default)]
    organizations: Vec<Organization>,
}

impl ErrorBody {
    fn describe(&self) -> String {
        self.message
            .clone()
            .or_else(|| self.error_description.clone())
            .or_else(|| self.code.clone())
            .or_else(|| self.error.clone())
            .unwrap_or_else(|| "unknown error".to_string())
    }
}

/// Real WorkOS client.
pub struct WorkosClient {
    http: reqwest::Client,
    config: IdentityConfig,
}

impl WorkosClient {
    pub fn new(config: IdentityConfig) -> Result<Self, IdentityError> {
        if config.api_key.is_empty() || config.client_id.is_empty() {
            return Err(IdentityError::Configuration(
                "WORKOS_API_KEY and WORKOS_CLIENT_ID are required".to_string(),
            ));
        }
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| IdentityError::Configuration(e.to_string()))?;
        Ok(Self { http, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, self.url(path))
            .bearer_auth(&self.config.api_key)
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, IdentityError> {
        let response = builder
            .send()
            .await
            .map_err(|e| IdentityError::Request(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| IdentityError::Request(format!("Failed to decode response: {}", e)));
        }

        let body: ErrorBody = response.json().await.unwrap_or(ErrorBody {
            code: None,
            error: None,
            message: None,
            error_description: None,
            pending_authentication_token: None,
            organizations: Vec::new(),
        });
        Err(classify_error(status, body))
    }

    async fn authenticate(
        &self,
        grant: serde_json::Value,
        hints: &ClientHints,
    ) -> Result<AuthenticationResponse, IdentityError> {
        let mut body = json!({
            "client_id": self.config.client_id,
            "client_secret": self.config.api_key,
        });
        if let (Some(target), Some(grant)) = (body.as_object_mut(), grant.as_object()) {
            target.extend(grant.clone());
            if let Some(ip) = &hints.ip_address {
                target.insert("ip_address".to_string(), json!(ip));
            }
            if let Some(ua) = &hints.user_agent {
                target.insert("user_agent".to_string(), json!(ua));
            }
        }
        self.send(
            self.http
                .post(self.url("/user_management/authenticate"))
                .json(&body),
        )
        .await
    }
}

fn classify_error(status: StatusCode, body: ErrorBody) -> IdentityError {
    if body.code.as_deref() == Some("organization_selection_required") {
        if let Some(token) = body.pending_authentication_token {
            return IdentityError::OrganizationSelectionRequired {
                pending_authentication_token: token,
                organizations: body.organizations,
            };
        }
    }
    match status {
        StatusCode::NOT_FOUND => IdentityError::NotFound(body.describe()),
        StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED
            if body.error.as_deref() == Some("invalid_grant")
                || body.code.as_deref() == Some("invalid_grant") =>
        {
            IdentityError::InvalidGrant(body.describe())
        }
        _ => IdentityError::Response {
            status: status.as_u16(),
            message: body.describe(),
        },
    }
}

#[async_trait::async_trait]
impl IdentityProvider for WorkosClient {
    fn authorization_url(&self, provider: &str, redirect_uri: &str, state: Option<&str>) -> String {
        let mut url = match reqwest::Url::parse(&self.url("/user_management/authorize")) {
            Ok(url) => url,
            Err(_) => return self.url("/user_management/authorize"),
        };
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("client_id", &self.config.client_id)
                .append_pair("redirect_uri", redirect_uri)
                .append_pair("response_type", "code")
                .append_pair("provider", provider);
            if let Some(state) = state {
                query.append_pair("state", state);
            }
        }
        url.to_string()
    }

    async fn create_user(
        &self,
        email: &str,
        password: Option<&str>,
        name: Option<&str>,
    ) -> Result<IdentityUser, IdentityError> {
        let (first_name, last_name) = match name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(n) => match n.split_once(' ') {
                Some((first, last)) => (Some(first), Some(last)),
                None => (Some(n), None),
            },
            None => (None, None),
        };
        self.send(
            self.request(Method::POST, "/user_management/users")
                .json(&json!({
                    "email": email,
                    "password": password,
                    "first_name": first_name,
                    "last_name": last_name,
                })),
        )
        .await
    }

    async fn update_user(
        &self,
        user_id: &str,
        update: UpdateUser,
    ) -> Result<IdentityUser, IdentityError> {
        self.send(
            self.request(Method::PUT, &format!("/user_management/users/{}", user_id))
                .json(&update),
        )
        .await
    }

    async fn authenticate_with_code(
        &self,
        code: &str,
        hints: &ClientHints,
    ) -> Result<AuthenticationResponse, IdentityError> {
        self.authenticate(
            json!({ "grant_type": "authorization_code", "code": code }),
            hints,
        )
        .await
    }

    async fn authenticate_with_magic_auth(
        &self,
        code: &str,
        email: &str,
        hints: &ClientHints,
    ) -> Result<AuthenticationResponse, IdentityError> {
        self.authenticate(
            json!({
                "grant_type": "urn:workos:oauth:grant-type:magic-auth:code",
                "code": code,
                "email": email,
            }),
            hints,
        )
        .await
    }

    async fn authenticate_with_refresh_token(
        &self,
        refresh_token: &str,
        organization_id: Option<&str>,
        hints: &ClientHints,
    ) -> Result<AuthenticationResponse, IdentityError> {
        let mut grant = json!({
            "grant_type": "refresh_token",
            "refresh_token": refresh_token,
        });
        if let (Some(org), Some(obj)) = (organization_id, grant.as_object_mut()) {
            obj.insert("organization_id".to_string(), json!(org));
        }
        self.authenticate(grant, hints).await
    }

    async fn authenticate_with_organization_selection(
        &self,
        pending_authentication_token: &str,
        organization_id: &str,
    ) -> Result<AuthenticationResponse, IdentityError> {
        self.authenticate(
            json!({
                "grant_type": "urn:workos:oauth:grant-type:organization-selection",
                "pending_authentication_token": pending_authentication_token,
                "organization_id": organization_id,
            }),
            &ClientHints::default(),
        )
        .await
    }

    async fn revoke_session(&self, session_id: &str) -> Result<(), IdentityError> {
        let _: serde_json::Value = self
            .send(
                self.request(Method::POST, "/user_management/sessions/revoke")
                    .json(&json!({ "session_id": session_id })),
            )
            .await?;
        Ok(())
    }

    async fn create_organization(&self, name: &str) -> Result<Organization, IdentityError> {
        self.send(
            self.request(Method::POST, "/organizations")
                .json(&json!({ "name": name })),
        )
        .await
    }

    async fn create_organization_membership(
        &self,
        organization_id: &str,
        user_id: &str,
        role_slug: &str,
    ) -> Result<OrganizationMembership, IdentityError> {
        self.send(
            self.request(Method::POST, "/user_management/organization_memberships")
                .json(&json!({
                    "organization_id": organization_id,
                    "user_id": user_id,
                    "role_slug": role_slug,
                })),
        )
        .await
    }

    async fn update_organization_membership(
        &self,
        membership_id: &str,
        role_slug: &str,
    ) -> Result<OrganizationMembership, IdentityError> {
        self.send(
            self.request(
                Method::PUT,
                &format!("/user_management/organization_memberships/{}", membership_id),
            )
            .json(&json!({ "role_slug": role_slug })),
        )
        .await
    }

    async fn deactivate_organization_membership(
        &self,
        membership_id: &str,
    ) -> Result<OrganizationMembership, IdentityError> {
        self.send(self.request(
            Method::PUT,
            &format!(
                "/user_management/organization_memberships/{}/deactivate",
                membership_id
            ),
        ))
        .await
    }

    async fn send_invitation(
        &self,
        invitation: SendInvitation<'_>,
    ) -> Result<Invitation, IdentityError> {
        self.send(
            self.request(Method::POST, "/user_management/invitations")
                .json(&invitation),
        )
        .await
    }

    async fn accept_invitation(&self, invitation_id: &str) -> Result<Invitation, IdentityError> {
        self.send(self.request(
            Method::POST,
            &format!("/user_management/invitations/{}/accept", invitation_id),
        ))
        .await
    }

    async fn revoke_invitation(&self, invitation_id: &str) -> Result<Invitation, IdentityError> {
        self.send(self.request(
            Method::POST,
            &format!("/user_management/invitations/{}/revoke", invitation_id),
        ))
        .await
    }

    async fn jwks(&self) -> Result<JwkSet, IdentityError> {
        self.send(
            self.http
                .get(self.url(&format!("/sso/jwks/{}", self.config.client_id))),
        )
        .await
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<WebhookEvent, IdentityError> {
        webhook::verify(
            payload,
            signature_header,
            &self.config.webhook_secret,
            Utc::now(),
        )
    }
}
