//! Wire types exchanged with the identity provider

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityUser {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
}

impl IdentityUser {
    /// `first last`, whichever parts are present
    pub fn full_name(&self) -> Option<String> {
        let parts: Vec<&str> = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .filter(|p| !p.is_empty())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" "))
        }
    }
}

/// Result of any `authenticate_with_*` grant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticationResponse {
    pub user: IdentityUser,
    #[serde(default)]
    pub organization_id: Option<String>,
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipStatus {
    Active,
    Inactive,
    Pending,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleRef {
    pub slug: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganizationMembership {
    pub id: String,
    pub user_id: String,
    pub organization_id: String,
    pub role: RoleRef,
    pub status: MembershipStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvitationState {
    Pending,
    Accepted,
    Expired,
    Revoked,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invitation {
    pub id: String,
    pub email: String,
    pub state: InvitationState,
    pub token: String,
    #[serde(default)]
    pub accept_invitation_url: Option<String>,
    #[serde(default)]
    pub organization_id: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// Invitation request
#[derive(Debug, Clone, Serialize)]
pub struct SendInvitation<'a> {
    pub email: &'a str,
    pub organization_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inviter_user_id: Option<&'a str>,
    pub role_slug: &'a str,
    pub expires_in_days: u32,
}

/// Partial user update; `None` fields are left unchanged
#[derive(Debug, Clone, Default, Serialize)]
pub struct UpdateUser {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// Request metadata forwarded on authentication grants
#[derive(Debug, Clone, Default)]
pub struct ClientHints {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Claims inside a provider-issued RS256 access token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Provider user id
    pub sub: String,
    /// Provider session id
    pub sid: String,
    #[serde(default)]
    pub org_id: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    pub exp: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_name() {
        let mut user = IdentityUser {
            id: "user_1".to_string(),
            email: "a@b.com".to_string(),
            first_name: Some("Ada".to_string()),
            last_name: Some("Lovelace".to_string()),
            email_verified: true,
        };
        assert_eq!(user.full_name().as_deref(), Some("Ada Lovelace"));

        user.last_name = None;
        assert_eq!(user.full_name().as_deref(), Some("Ada"));

        user.first_name = Some(String::new());
        assert_eq!(user.full_name(), None);
    }

    #[test]
    fn test_authentication_response_deserializes_without_org() {
        let json = serde_json::json!({
            "user": { "id": "user_1", "email": "a@b.com" },
            "access_token": "at",
            "refresh_token": "rt"
        });
        let resp: AuthenticationResponse = serde_json::from_value(json).unwrap();
        assert_eq!(resp.organization_id, None);
        assert!(!resp.user.email_verified);
    }

    #[test]
    fn test_update_user_skips_unset_fields() {
        let update = UpdateUser {
            email_verified: Some(true),
            ..UpdateUser::default()
        };
        let json = serde_json::to_value(update).unwrap();
        assert_eq!(json, serde_json::json!({ "email_verified": true }));
    }
}
