//! Identity provider webhook verification
//!
//! Header format: `WorkOS-Signature: t=<unix millis>, v1=<hex hmac>` where the
//! HMAC-SHA256 covers `"{t}.{raw body}"`.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tenantry_common::crypto::{hmac_sha256_hex, SignatureHeader};

use crate::IdentityError;

/// Deliveries older (or newer) than this are rejected
pub const TOLERANCE_SECONDS: i64 = 300;

pub const SIGNATURE_HEADER: &str = "workos-signature";

/// Raw webhook envelope
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    pub event: String,
    pub data: serde_json::Value,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Events the core reacts to
#[derive(Debug, Clone, PartialEq)]
pub enum IdentityEvent {
    OrganizationMembershipDeleted {
        membership_id: String,
        organization_id: String,
        user_id: String,
    },
    UserDeleted {
        user_id: String,
    },
    SessionRevoked {
        session_id: String,
        user_id: Option<String>,
    },
    Ignored(String),
}

#[derive(Deserialize)]
struct MembershipData {
    id: String,
    organization_id: String,
    user_id: String,
}

#[derive(Deserialize)]
struct IdData {
    id: String,
    #[serde(default)]
    user_id: Option<String>,
}

impl WebhookEvent {
    /// Decode `data` for the event kinds the core handles
    pub fn classify(&self) -> Result<IdentityEvent, IdentityError> {
        let decode_err = |e: serde_json::Error| IdentityError::InvalidPayload(e.to_string());
        Ok(match self.event.as_str() {
            "organization_membership.deleted" => {
                let data: MembershipData =
                    serde_json::from_value(self.data.clone()).map_err(decode_err)?;
                IdentityEvent::OrganizationMembershipDeleted {
                    membership_id: data.id,
                    organization_id: data.organization_id,
                    user_id: data.user_id,
                }
            }
            "user.deleted" => {
                let data: IdData = serde_json::from_value(self.data.clone()).map_err(decode_err)?;
                IdentityEvent::UserDeleted { user_id: data.id }
            }
            "session.revoked" => {
                let data: IdData = serde_json::from_value(self.data.clone()).map_err(decode_err)?;
                IdentityEvent::SessionRevoked {
                    session_id: data.id,
                    user_id: data.user_id,
                }
            }
            other => IdentityEvent::Ignored(other.to_string()),
        })
    }
}

/// Header value for `payload` signed at `timestamp_ms`
pub fn sign(payload: &[u8], secret: &str, timestamp_ms: i64) -> String {
    let signed = [timestamp_ms.to_string().as_bytes(), b".", payload].concat();
    format!(
        "t={}, v1={}",
        timestamp_ms,
        hmac_sha256_hex(secret.as_bytes(), &signed)
    )
}

/// Verify signature and freshness, then decode the envelope
pub fn verify(
    payload: &[u8],
    signature_header: &str,
    secret: &str,
    now: DateTime<Utc>,
) -> Result<WebhookEvent, IdentityError> {
    let header = SignatureHeader::parse(signature_header).ok_or(IdentityError::InvalidSignature)?;

    let age_ms = now.timestamp_millis() - header.timestamp;
    if age_ms.abs() > TOLERANCE_SECONDS * 1000 {
        tracing::warn!(age_ms, "Identity webhook outside tolerance window");
        return Err(IdentityError::InvalidSignature);
    }

    let signed = [header.timestamp.to_string().as_bytes(), b".", payload].concat();
    let expected = hmac_sha256_hex(secret.as_bytes(), &signed);
    if !header.matches(&expected) {
        return Err(IdentityError::InvalidSignature);
    }

    serde_json::from_slice(payload).map_err(|e| IdentityError::InvalidPayload(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    const SECRET: &str = "workos_webhook_secret";

    fn body() -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "id": "event_01",
            "event": "organization_membership.deleted",
            "data": {
                "id": "om_1",
                "organization_id": "org_1",
                "user_id": "user_1"
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_verify_accepts_valid_signature() {
        let now = Utc::now();
        let payload = body();
        let header = sign(&payload, SECRET, now.timestamp_millis());

        let event = verify(&payload, &header, SECRET, now).unwrap();
        assert_eq!(event.id, "event_01");
        assert_eq!(
            event.classify().unwrap(),
            IdentityEvent::OrganizationMembershipDeleted {
                membership_id: "om_1".to_string(),
                organization_id: "org_1".to_string(),
                user_id: "user_1".to_string(),
            }
        );
    }

    #[test]
    fn test_verify_rejects_tampered_body() {
        let now = Utc::now();
        let payload = body();
        let header = sign(&payload, SECRET, now.timestamp_millis());

        let mut tampered = payload.clone();
        tampered.push(b' ');
        assert_eq!(
            verify(&tampered, &header, SECRET, now).unwrap_err(),
            IdentityError::InvalidSignature
        );
    }

    #[test]
    fn test_verify_rejects_wrong_secret() {
        let now = Utc::now();
        let payload = body();
        let header = sign(&payload, "other", now.timestamp_millis());
        assert!(verify(&payload, &header, SECRET, now).is_err());
    }

    #[test]
    fn test_verify_rejects_stale_timestamp() {
        let now = Utc::now();
        let payload = body();
        let stale = now - Duration::seconds(TOLERANCE_SECONDS + 1);
        let header = sign(&payload, SECRET, stale.timestamp_millis());
        assert_eq!(
            verify(&payload, &header, SECRET, now).unwrap_err(),
            IdentityError::InvalidSignature
        );
    }

    #[test]
    fn test_verify_rejects_malformed_header() {
        assert!(verify(&body(), "garbage", SECRET, Utc::now()).is_err());
    }

    #[test]
    fn test_classify_ignores_unknown_events() {
        let event = WebhookEvent {
            id: "event_02".to_string(),
            event: "dsync.user.created".to_string(),
            data: serde_json::json!({}),
            created_at: None,
        };
        assert_eq!(
            event.classify().unwrap(),
            IdentityEvent::Ignored("dsync.user.created".to_string())
        );
    }

    #[test]
    fn test_classify_rejects_malformed_data() {
        let event = WebhookEvent {
            id: "event_03".to_string(),
            event: "user.deleted".to_string(),
            data: serde_json::json!({ "email": "no-id@b.com" }),
            created_at: None,
        };
        assert!(matches!(
            event.classify(),
            Err(IdentityError::InvalidPayload(_))
        ));
    }
}
