//! Helpers shared by the billing handlers

use tenantry_common::{Error, ErrorCode, Result};
use tenantry_stripe::PaymentError;
use tenantry_teams::{Team, TeamMember};
use uuid::Uuid;

use crate::api::middleware::BillingState;
use crate::domain::projection::TEAM_ID_METADATA_KEY;

/// Resolve `slug` to a team the user actively belongs to.
pub(crate) async fn billing_team(
    state: &BillingState,
    slug: &str,
    user_id: Uuid,
) -> Result<(Team, TeamMember)> {
    let team = state
        .repos
        .teams
        .get_by_slug(slug)
        .await?
        .ok_or(ErrorCode::TeamNotFound)?;
    let member = state
        .repos
        .members
        .find_active(team.id, user_id)
        .await?
        .ok_or(ErrorCode::TeamNotFound)?;
    Ok((team, member))
}

/// Classify a payment provider failure at the route boundary.
pub(crate) fn payment_error(operation: &'static str, err: PaymentError) -> Error {
    match err {
        PaymentError::InvalidSignature => ErrorCode::InvalidSignature.into(),
        PaymentError::InvalidPayload(detail) => Error::api(ErrorCode::InvalidPayload, detail),
        PaymentError::NotFound(detail) => {
            tracing::info!(operation, detail = %detail, "Payment provider resource missing");
            ErrorCode::NotFound.into()
        }
        other => {
            tracing::error!(operation, error = %other, "Payment provider call failed");
            Error::Unexpected(anyhow::anyhow!("{operation}: {other}"))
        }
    }
}

/// The team's payment provider customer, created on first use.
///
/// The customer carries the team id in its metadata so webhook events can be
/// traced back to the team.
pub(crate) async fn ensure_customer(state: &BillingState, team: &Team, user_id: Uuid) -> Result<String> {
    if let Some(customer_id) = team.stripe_customer_id.clone() {
        return Ok(customer_id);
    }

    let user = state
        .repos
        .users
        .get_by_id(user_id)
        .await?
        .ok_or(ErrorCode::Unauthorized)?;

    let team_id = team.id.to_string();
    let customer = state
        .payments
        .create_customer(&user.email, &team.name, &[(TEAM_ID_METADATA_KEY, team_id.as_str())])
        .await
        .map_err(|e| payment_error("create_customer", e))?;

    let team = state
        .repos
        .teams
        .set_stripe_customer_id(team.id, &customer.id)
        .await?;

    match team.stripe_customer_id {
        Some(stored) if stored == customer.id => {
            tracing::info!(team_id = %team.id, customer_id = %stored, "Payment customer created");
            Ok(stored)
        }
        Some(stored) => {
            tracing::warn!(
                team_id = %team.id,
                orphaned_customer_id = %customer.id,
                "Concurrent customer creation; keeping the stored customer"
            );
            Ok(stored)
        }
        None => Err(Error::Unexpected(anyhow::anyhow!(
            "customer id not stored for team {}",
            team.id
        ))),
    }
}
