//! Identity provider webhook handler
//!
//! Deliveries are at-least-once. Every event is applied as an idempotent
//! update, so replays are harmless. Events that pass the signature check but
//! cannot be decoded are acknowledged and logged; a retry would not help.

use axum::{body::Bytes, extract::State, http::HeaderMap};
use chrono::Utc;
use tenantry_common::{ApiResponse, ErrorCode, Result};
use tenantry_workos::webhook::{IdentityEvent, SIGNATURE_HEADER};
use tenantry_workos::IdentityError;

use crate::api::middleware::TeamsState;
use crate::api::session::provider_error;
use crate::repository::transactions::{
    cancel_invites_by_inviter_tx, cancel_invites_for_member_tx, remove_member_by_external_id_tx,
    revoke_user_sessions_tx, soft_delete_user_tx,
};

/// **POST /webhooks/workos**
pub async fn workos_webhook(
    State(state): State<TeamsState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<ApiResponse<()>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(ErrorCode::InvalidSignature)?;

    let event = match state.auth.identity().verify_webhook(&body, signature) {
        Ok(event) => event,
        Err(IdentityError::InvalidPayload(detail)) => {
            tracing::warn!(detail = %detail, "Unparseable identity webhook acknowledged");
            return Ok(ApiResponse::message("Ignored"));
        }
        Err(e) => return Err(provider_error("verify_webhook", e)),
    };

    let classified = match event.classify() {
        Ok(classified) => classified,
        Err(e) => {
            tracing::warn!(
                error = %e,
                event_id = %event.id,
                event = %event.event,
                "Identity webhook payload not understood"
            );
            return Ok(ApiResponse::message("Ignored"));
        }
    };

    apply_event(&state, classified).await?;
    tracing::debug!(event_id = %event.id, event = %event.event, "Identity webhook applied");
    Ok(ApiResponse::message("OK"))
}

async fn apply_event(state: &TeamsState, event: IdentityEvent) -> Result<()> {
    match event {
        IdentityEvent::OrganizationMembershipDeleted {
            membership_id,
            organization_id,
            ..
        } => {
            let mut transaction = state.repos.begin().await?;
            let removed = remove_member_by_external_id_tx(&mut transaction, &membership_id).await?;
            if let Some(member) = &removed {
                cancel_invites_for_member_tx(&mut transaction, member.id).await?;
                if let Some(user_id) = member.user_id {
                    cancel_invites_by_inviter_tx(&mut transaction, member.team_id, user_id).await?;
                }
            }
            transaction.commit().await?;

            match removed {
                Some(member) => tracing::info!(
                    team_id = %member.team_id,
                    member_id = %member.id,
                    organization_id = %organization_id,
                    "Member removed by identity provider"
                ),
                None => tracing::debug!(membership_id = %membership_id, "Membership already gone"),
            }
        }
        IdentityEvent::UserDeleted { user_id } => {
            let Some(user) = state.repos.users.find_by_external_id(&user_id).await? else {
                tracing::debug!(external_user_id = %user_id, "Deleted provider user unknown locally");
                return Ok(());
            };
            let mut transaction = state.repos.begin().await?;
            soft_delete_user_tx(&mut transaction, user.id, Utc::now()).await?;
            revoke_user_sessions_tx(&mut transaction, user.id).await?;
            transaction.commit().await?;
            tracing::info!(user_id = %user.id, "User deleted by identity provider");
        }
        IdentityEvent::SessionRevoked { session_id, .. } => {
            let revoked = state.repos.sessions.revoke_by_external_id(&session_id).await?;
            tracing::info!(external_session_id = %session_id, revoked, "Session revoked by identity provider");
        }
        IdentityEvent::Ignored(kind) => {
            tracing::debug!(event = %kind, "Identity webhook ignored");
        }
    }
    Ok(())
}
