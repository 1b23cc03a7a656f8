//! Mock identity provider
//!
//! Keeps users, organizations, memberships, invitations and sessions in memory.
//! Access tokens are real RS256 JWTs signed with a fixture key whose public
//! half is served from [`IdentityProvider::jwks`], so token verification runs
//! the same code path as production.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{Duration, Utc};
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use uuid::Uuid;

use crate::webhook::{self, WebhookEvent};
use crate::{
    AccessTokenClaims, AuthenticationResponse, ClientHints, IdentityError, IdentityProvider,
    IdentityUser, Invitation, InvitationState, MembershipStatus, Organization,
    OrganizationMembership, RoleRef, SendInvitation, UpdateUser,
};

pub const MOCK_KEY_ID: &str = "mock-key";

const MOCK_SIGNING_KEY: &[u8] = include_bytes!("mock_signing_key.pem");

const MOCK_MODULUS: &str = "y6b3yzEPDAozTZIktX5Ep0DJ2yA6jOt09ncnsZZj4wqapiZFEaSwu4Opr4CPvudUN5Ll0RdaN9d9JjrUPYbT41930iW2t9JhsdVSS5UdGllvmPDptLFaVN2uGeNtkmBvY1JfASbNPyx2RImZAY9eBCSplJgxk3tlieF4cQyOaxTZMkcdU6avmADmUeI-uFmWLaeADSk2AIF3tH6KFE5paxoOPjh7POkEgnbyNzCwf-NRYXHelbkkAA2ugi342uZAsZfP2qVAbRFQqfuAUOWCTM5zV0YIvqrFzQduTv2X7QmV6pBTam2GEwsGDJQu_8qP0yldfzzPd6BRkHubWvFn0Q";

const ACCESS_TOKEN_TTL_MINUTES: i64 = 5;

#[derive(Debug, Clone)]
struct RefreshGrant {
    user_id: String,
    session_id: String,
}

#[derive(Debug, Default)]
struct MockState {
    users: HashMap<String, IdentityUser>,
    passwords: HashMap<String, String>,
    codes: HashMap<String, String>,
    magic_codes: HashMap<String, String>,
    refresh_tokens: HashMap<String, RefreshGrant>,
    organizations: Vec<Organization>,
    memberships: HashMap<String, OrganizationMembership>,
    invitations: HashMap<String, Invitation>,
    revoked_sessions: Vec<String>,
    accept_outcome: Option<InvitationState>,
}

/// Mock identity provider for tests and local development.
#[derive(Debug, Clone)]
pub struct MockIdentityProvider {
    state: Arc<Mutex<MockState>>,
    webhook_secret: String,
}

impl Default for MockIdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockIdentityProvider {
    pub fn new() -> Self {
        Self::with_webhook_secret("mock_webhook_secret")
    }

    pub fn with_webhook_secret(secret: &str) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            webhook_secret: secret.to_string(),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, MockState>, IdentityError> {
        self.state
            .lock()
            .map_err(|e| IdentityError::Request(format!("mock state lock poisoned: {e}")))
    }

    fn snapshot(&self) -> MutexGuard<'_, MockState> {
        self.state
            .lock()
            .expect("mock state lock poisoned: prior test panicked")
    }

    pub fn webhook_secret(&self) -> &str {
        &self.webhook_secret
    }

    /// Register a user and return it
    pub fn add_user(&self, email: &str) -> IdentityUser {
        let user = IdentityUser {
            id: format!("user_{}", Uuid::new_v4().simple()),
            email: email.to_string(),
            first_name: None,
            last_name: None,
            email_verified: true,
        };
        self.snapshot().users.insert(user.id.clone(), user.clone());
        user
    }

    /// One-time authorization code for `user_id`
    pub fn issue_code(&self, user_id: &str) -> String {
        let code = format!("code_{}", Uuid::new_v4().simple());
        self.snapshot()
            .codes
            .insert(code.clone(), user_id.to_string());
        code
    }

    /// One-time magic-auth code for `user_id`
    pub fn issue_magic_code(&self, user_id: &str) -> String {
        let code = format!("{:06}", Uuid::new_v4().as_u128() % 1_000_000);
        self.snapshot()
            .magic_codes
            .insert(code.clone(), user_id.to_string());
        code
    }

    /// Force the state returned by the next `accept_invitation` calls
    pub fn set_accept_outcome(&self, outcome: InvitationState) {
        self.snapshot().accept_outcome = Some(outcome);
    }

    pub fn organizations(&self) -> Vec<Organization> {
        self.snapshot().organizations.clone()
    }

    pub fn memberships(&self) -> Vec<OrganizationMembership> {
        self.snapshot().memberships.values().cloned().collect()
    }

    pub fn invitations(&self) -> Vec<Invitation> {
        self.snapshot().invitations.values().cloned().collect()
    }

    pub fn revoked_sessions(&self) -> Vec<String> {
        self.snapshot().revoked_sessions.clone()
    }

    pub fn user(&self, user_id: &str) -> Option<IdentityUser> {
        self.snapshot().users.get(user_id).cloned()
    }

    /// Sign a webhook body the way the provider does
    pub fn sign_webhook(&self, payload: &[u8]) -> String {
        webhook::sign(payload, &self.webhook_secret, Utc::now().timestamp_millis())
    }

    /// Mint tokens for a fresh session of `user_id`, optionally scoped to `org_id`
    pub fn issue_tokens(
        &self,
        user_id: &str,
        org_id: Option<&str>,
    ) -> Result<AuthenticationResponse, IdentityError> {
        let session_id = format!("session_{}", Uuid::new_v4().simple());
        let mut state = self.lock()?;
        mint(&mut state, user_id, &session_id, org_id)
    }
}

fn role_in(state: &MockState, user_id: &str, org_id: &str) -> Option<String> {
    state
        .memberships
        .values()
        .find(|m| {
            m.user_id == user_id
                && m.organization_id == org_id
                && m.status == MembershipStatus::Active
        })
        .map(|m| m.role.slug.clone())
}

fn mint(
    state: &mut MockState,
    user_id: &str,
    session_id: &str,
    org_id: Option<&str>,
) -> Result<AuthenticationResponse, IdentityError> {
    let user = state
        .users
        .get(user_id)
        .cloned()
        .ok_or_else(|| IdentityError::NotFound(format!("user {}", user_id)))?;

    let claims = AccessTokenClaims {
        sub: user_id.to_string(),
        sid: session_id.to_string(),
        org_id: org_id.map(String::from),
        role: org_id.and_then(|org| role_in(state, user_id, org)),
        permissions: Vec::new(),
        exp: (Utc::now() + Duration::minutes(ACCESS_TOKEN_TTL_MINUTES)).timestamp(),
    };

    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(MOCK_KEY_ID.to_string());
    let key = EncodingKey::from_rsa_pem(MOCK_SIGNING_KEY)
        .map_err(|e| IdentityError::Configuration(e.to_string()))?;
    let access_token = jsonwebtoken::encode(&header, &claims, &key)
        .map_err(|e| IdentityError::Configuration(e.to_string()))?;

    let refresh_token = format!("refresh_{}", Uuid::new_v4().simple());
    state.refresh_tokens.insert(
        refresh_token.clone(),
        RefreshGrant {
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
        },
    );

    Ok(AuthenticationResponse {
        user,
        organization_id: org_id.map(String::from),
        access_token,
        refresh_token,
    })
}

#[async_trait::async_trait]
impl IdentityProvider for MockIdentityProvider {
    fn authorization_url(&self, provider: &str, redirect_uri: &str, state: Option<&str>) -> String {
        format!(
            "https://auth.mock.test/authorize?provider={}&redirect_uri={}&state={}",
            provider,
            redirect_uri,
            state.unwrap_or_default()
        )
    }

    async fn create_user(
        &self,
        email: &str,
        password: Option<&str>,
        name: Option<&str>,
    ) -> Result<IdentityUser, IdentityError> {
        let mut state = self.lock()?;
        if state.users.values().any(|u| u.email == email) {
            return Err(IdentityError::Response {
                status: 422,
                message: "email already in use".to_string(),
            });
        }
        let user = IdentityUser {
            id: format!("user_{}", Uuid::new_v4().simple()),
            email: email.to_string(),
            first_name: name.map(String::from),
            last_name: None,
            email_verified: false,
        };
        if let Some(password) = password {
            state.passwords.insert(user.id.clone(), password.to_string());
        }
        state.users.insert(user.id.clone(), user.clone());
        Ok(user)
    }

    async fn update_user(
        &self,
        user_id: &str,
        update: UpdateUser,
    ) -> Result<IdentityUser, IdentityError> {
        let mut state = self.lock()?;
        if let Some(password) = &update.password {
            state
                .passwords
                .insert(user_id.to_string(), password.clone());
        }
        let user = state
            .users
            .get_mut(user_id)
            .ok_or_else(|| IdentityError::NotFound(format!("user {}", user_id)))?;
        if let Some(first) = update.first_name {
            user.first_name = Some(first);
        }
        if let Some(last) = update.last_name {
            user.last_name = Some(last);
        }
        if let Some(verified) = update.email_verified {
            user.email_verified = verified;
        }
        Ok(user.clone())
    }

    async fn authenticate_with_code(
        &self,
        code: &str,
        _hints: &ClientHints,
    ) -> Result<AuthenticationResponse, IdentityError> {
        let mut state = self.lock()?;
        let user_id = state
            .codes
            .remove(code)
            .ok_or_else(|| IdentityError::InvalidGrant("unknown code".to_string()))?;
        let session_id = format!("session_{}", Uuid::new_v4().simple());
        mint(&mut state, &user_id, &session_id, None)
    }

    async fn authenticate_with_magic_auth(
        &self,
        code: &str,
        email: &str,
        _hints: &ClientHints,
    ) -> Result<AuthenticationResponse, IdentityError> {
        let mut state = self.lock()?;
        let user_id = state
            .magic_codes
            .get(code)
            .cloned()
            .ok_or_else(|| IdentityError::InvalidGrant("unknown code".to_string()))?;
        let matches = state
            .users
            .get(&user_id)
            .is_some_and(|u| u.email.eq_ignore_ascii_case(email));
        if !matches {
            return Err(IdentityError::InvalidGrant("email mismatch".to_string()));
        }
        state.magic_codes.remove(code);
        let session_id = format!("session_{}", Uuid::new_v4().simple());
        mint(&mut state, &user_id, &session_id, None)
    }

    async fn authenticate_with_refresh_token(
        &self,
        refresh_token: &str,
        organization_id: Option<&str>,
        _hints: &ClientHints,
    ) -> Result<AuthenticationResponse, IdentityError> {
        let mut state = self.lock()?;
        let grant = state
            .refresh_tokens
            .get(refresh_token)
            .cloned()
            .ok_or_else(|| IdentityError::InvalidGrant("unknown refresh token".to_string()))?;
        if state.revoked_sessions.contains(&grant.session_id) {
            return Err(IdentityError::InvalidGrant("session revoked".to_string()));
        }
        if let Some(org) = organization_id {
            if role_in(&state, &grant.user_id, org).is_none() {
                return Err(IdentityError::InvalidGrant(
                    "user is not a member of the organization".to_string(),
                ));
            }
        }
        mint(&mut state, &grant.user_id, &grant.session_id, organization_id)
    }

    async fn authenticate_with_organization_selection(
        &self,
        pending_authentication_token: &str,
        organization_id: &str,
    ) -> Result<AuthenticationResponse, IdentityError> {
        let mut state = self.lock()?;
        let user_id = state
            .codes
            .remove(pending_authentication_token)
            .ok_or_else(|| IdentityError::InvalidGrant("unknown pending token".to_string()))?;
        let session_id = format!("session_{}", Uuid::new_v4().simple());
        mint(&mut state, &user_id, &session_id, Some(organization_id))
    }

    async fn revoke_session(&self, session_id: &str) -> Result<(), IdentityError> {
        let mut state = self.lock()?;
        if !state.revoked_sessions.iter().any(|s| s == session_id) {
            state.revoked_sessions.push(session_id.to_string());
        }
        Ok(())
    }

    async fn create_organization(&self, name: &str) -> Result<Organization, IdentityError> {
        let org = Organization {
            id: format!("org_{}", Uuid::new_v4().simple()),
            name: name.to_string(),
        };
        self.lock()?.organizations.push(org.clone());
        Ok(org)
    }

    async fn create_organization_membership(
        &self,
        organization_id: &str,
        user_id: &str,
        role_slug: &str,
    ) -> Result<OrganizationMembership, IdentityError> {
        let membership = OrganizationMembership {
            id: format!("om_{}", Uuid::new_v4().simple()),
            user_id: user_id.to_string(),
            organization_id: organization_id.to_string(),
            role: RoleRef {
                slug: role_slug.to_string(),
            },
            status: MembershipStatus::Active,
        };
        self.lock()?
            .memberships
            .insert(membership.id.clone(), membership.clone());
        Ok(membership)
    }

    async fn update_organization_membership(
        &self,
        membership_id: &str,
        role_slug: &str,
    ) -> Result<OrganizationMembership, IdentityError> {
        let mut state = self.lock()?;
        let membership = state
            .memberships
            .get_mut(membership_id)
            .ok_or_else(|| IdentityError::NotFound(format!("membership {}", membership_id)))?;
        membership.role.slug = role_slug.to_string();
        Ok(membership.clone())
    }

    async fn deactivate_organization_membership(
        &self,
        membership_id: &str,
    ) -> Result<OrganizationMembership, IdentityError> {
        let mut state = self.lock()?;
        let membership = state
            .memberships
            .get_mut(membership_id)
            .ok_or_else(|| IdentityError::NotFound(format!("membership {}", membership_id)))?;
        membership.status = MembershipStatus::Inactive;
        Ok(membership.clone())
    }

    async fn send_invitation(
        &self,
        invitation: SendInvitation<'_>,
    ) -> Result<Invitation, IdentityError> {
        let invite = Invitation {
            id: format!("invitation_{}", Uuid::new_v4().simple()),
            email: invitation.email.to_string(),
            state: InvitationState::Pending,
            token: Uuid::new_v4().simple().to_string(),
            accept_invitation_url: None,
            organization_id: Some(invitation.organization_id.to_string()),
            expires_at: Utc::now() + Duration::days(i64::from(invitation.expires_in_days)),
        };
        self.lock()?
            .invitations
            .insert(invite.id.clone(), invite.clone());
        Ok(invite)
    }

    async fn accept_invitation(&self, invitation_id: &str) -> Result<Invitation, IdentityError> {
        let mut state = self.lock()?;
        let outcome = state.accept_outcome;
        let invite = state
            .invitations
            .get_mut(invitation_id)
            .ok_or_else(|| IdentityError::NotFound(format!("invitation {}", invitation_id)))?;
        invite.state = match (outcome, invite.state) {
            (Some(forced), _) => forced,
            (None, InvitationState::Pending) => InvitationState::Accepted,
            (None, current) => current,
        };
        Ok(invite.clone())
    }

    async fn revoke_invitation(&self, invitation_id: &str) -> Result<Invitation, IdentityError> {
        let mut state = self.lock()?;
        let invite = state
            .invitations
            .get_mut(invitation_id)
            .ok_or_else(|| IdentityError::NotFound(format!("invitation {}", invitation_id)))?;
        if invite.state == InvitationState::Pending {
            invite.state = InvitationState::Revoked;
        }
        Ok(invite.clone())
    }

    async fn jwks(&self) -> Result<JwkSet, IdentityError> {
        serde_json::from_value(serde_json::json!({
            "keys": [{
                "kty": "RSA",
                "kid": MOCK_KEY_ID,
                "use": "sig",
                "alg": "RS256",
                "n": MOCK_MODULUS,
                "e": "AQAB"
            }]
        }))
        .map_err(|e| IdentityError::Configuration(e.to_string()))
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<WebhookEvent, IdentityError> {
        webhook::verify(payload, signature_header, &self.webhook_secret, Utc::now())
    }
}
