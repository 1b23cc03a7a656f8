//! Checkout and billing portal flows
//!
//! - POST  /teams/{slug}/billing/checkout     - Start a subscription checkout
//! - POST  /teams/{slug}/billing/portal       - Open the billing portal
//! - PATCH /teams/{slug}/billing/subscription - Switch billing interval

use axum::extract::{Path, State};
use serde::{Deserialize, Serialize};
use tenantry_auth::AuthUser;
use tenantry_common::{ApiResponse, Error, ErrorCode, Result, ValidatedJson};
use tenantry_stripe::{CheckoutRequest, PortalFlow, PortalRequest};
use tenantry_teams::Team;
use validator::Validate;

use crate::api::middleware::BillingState;
use crate::api::support::{billing_team, ensure_customer, payment_error};
use crate::domain::entities::{BillingInterval, TeamSubscription};
use crate::domain::plans::alternate_lookup_key;
use crate::domain::projection::TEAM_ID_METADATA_KEY;

/// Trial offered to teams that never trialed
pub const TRIAL_PERIOD_DAYS: u32 = 14;

#[derive(Debug, Deserialize, Validate)]
pub struct StartCheckoutRequest {
    #[validate(length(min = 1, max = 64))]
    pub lookup_key: String,
}

/// Portal flow the user lands in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortalTarget {
    CancelSubscription,
    UpdateSubscription,
    UpdatePaymentMethod,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct OpenPortalRequest {
    #[serde(default)]
    pub flow: Option<PortalTarget>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SwitchIntervalRequest {
    pub interval: BillingInterval,
}

/// Provider-hosted page to send the browser to
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RedirectUrl {
    pub url: String,
}

fn trial_days_for(team: &Team) -> Option<u32> {
    (!team.has_trialed()).then_some(TRIAL_PERIOD_DAYS)
}

/// A subscription that can still be changed
fn changeable(subscription: Option<TeamSubscription>) -> Result<TeamSubscription> {
    let subscription = subscription.ok_or(ErrorCode::SubscriptionNotFound)?;
    if subscription.is_canceled() {
        return Err(ErrorCode::SubscriptionAlreadyCanceled.into());
    }
    Ok(subscription)
}

/// Lookup key of the same plan at `interval`
fn switched_lookup_key(subscription: &TeamSubscription, interval: BillingInterval) -> Result<String> {
    if subscription.billing_interval == interval {
        return Err(ErrorCode::IntervalUnchanged.into());
    }
    subscription
        .lookup_key
        .as_deref()
        .and_then(alternate_lookup_key)
        .ok_or_else(|| {
            Error::api(
                ErrorCode::InvalidRequest,
                "This plan cannot switch billing interval",
            )
        })
}

/// Start a subscription checkout
///
/// **POST /teams/{slug}/billing/checkout**
///
/// Teams that never trialed get a 14 day trial that pauses when no payment
/// method is on file at its end.
pub async fn create_checkout(
    State(state): State<BillingState>,
    AuthUser(ctx): AuthUser,
    Path(slug): Path<String>,
    ValidatedJson(request): ValidatedJson<StartCheckoutRequest>,
) -> Result<ApiResponse<RedirectUrl>> {
    let (team, _) = billing_team(&state, &slug, ctx.user_id()).await?;

    if let Some(current) = state.repos.subscriptions.get_for_team(team.id).await? {
        if current.status.is_live() && !current.is_canceled() {
            return Err(Error::api(
                ErrorCode::InvalidRequest,
                "Team already has a subscription; change it from the billing portal",
            ));
        }
    }

    let price = state
        .payments
        .find_price_by_lookup_key(&request.lookup_key)
        .await
        .map_err(|e| payment_error("find_price_by_lookup_key", e))?
        .ok_or_else(|| Error::api(ErrorCode::InvalidRequest, "Unknown plan"))?;

    let customer_id = ensure_customer(&state, &team, ctx.user_id()).await?;

    let session = state
        .payments
        .create_checkout_session(CheckoutRequest {
            customer_id,
            price_id: price.id,
            success_url: state.config.team_link(&team.slug, "billing?checkout=success"),
            cancel_url: state.config.team_link(&team.slug, "plans"),
            trial_period_days: trial_days_for(&team),
            metadata: vec![(TEAM_ID_METADATA_KEY.to_string(), team.id.to_string())],
        })
        .await
        .map_err(|e| payment_error("create_checkout_session", e))?;

    let url = session.url.ok_or_else(|| {
        Error::Unexpected(anyhow::anyhow!("checkout session {} has no url", session.id))
    })?;

    tracing::info!(
        team_id = %team.id,
        lookup_key = %request.lookup_key,
        trial = !team.has_trialed(),
        "Checkout session created"
    );
    Ok(ApiResponse::data(RedirectUrl { url }))
}

/// Open the billing portal, optionally inside a pre-filled flow
///
/// **POST /teams/{slug}/billing/portal**
pub async fn open_portal(
    State(state): State<BillingState>,
    AuthUser(ctx): AuthUser,
    Path(slug): Path<String>,
    ValidatedJson(request): ValidatedJson<OpenPortalRequest>,
) -> Result<ApiResponse<RedirectUrl>> {
    let (team, _) = billing_team(&state, &slug, ctx.user_id()).await?;

    let flow = match request.flow {
        None => None,
        Some(PortalTarget::UpdatePaymentMethod) => Some(PortalFlow::PaymentMethodUpdate),
        Some(target) => {
            let subscription =
                changeable(state.repos.subscriptions.get_for_team(team.id).await?)?;
            let subscription_id = subscription.stripe_subscription_id;
            Some(match target {
                PortalTarget::CancelSubscription => PortalFlow::SubscriptionCancel { subscription_id },
                _ => PortalFlow::SubscriptionUpdate { subscription_id },
            })
        }
    };

    let customer_id = ensure_customer(&state, &team, ctx.user_id()).await?;
    let return_url = state.config.team_link(&team.slug, "billing");

    let session = state
        .payments
        .create_portal_session(PortalRequest {
            customer_id,
            after_completion_url: flow.as_ref().map(|_| return_url.clone()),
            return_url,
            flow,
        })
        .await
        .map_err(|e| payment_error("create_portal_session", e))?;

    Ok(ApiResponse::data(RedirectUrl { url: session.url }))
}

/// Switch between monthly and annual billing of the current plan
///
/// **PATCH /teams/{slug}/billing/subscription**
///
/// Returns a portal confirmation page; the change lands through the
/// `customer.subscription.updated` webhook.
pub async fn switch_interval(
    State(state): State<BillingState>,
    AuthUser(ctx): AuthUser,
    Path(slug): Path<String>,
    ValidatedJson(request): ValidatedJson<SwitchIntervalRequest>,
) -> Result<ApiResponse<RedirectUrl>> {
    let (team, _) = billing_team(&state, &slug, ctx.user_id()).await?;
    let subscription = changeable(state.repos.subscriptions.get_for_team(team.id).await?)?;
    let lookup_key = switched_lookup_key(&subscription, request.interval)?;

    let price = state
        .payments
        .find_price_by_lookup_key(&lookup_key)
        .await
        .map_err(|e| payment_error("find_price_by_lookup_key", e))?
        .ok_or_else(|| Error::api(ErrorCode::InvalidRequest, "Unknown plan"))?;

    let remote = state
        .payments
        .get_subscription(&subscription.stripe_subscription_id)
        .await
        .map_err(|e| payment_error("get_subscription", e))?;
    let item_id = remote
        .primary_item()
        .map(|item| item.id.clone())
        .ok_or(ErrorCode::SubscriptionNotFound)?;

    let customer_id = ensure_customer(&state, &team, ctx.user_id()).await?;
    let return_url = state.config.team_link(&team.slug, "billing");

    let session = state
        .payments
        .create_portal_session(PortalRequest {
            customer_id,
            return_url: return_url.clone(),
            flow: Some(PortalFlow::SubscriptionUpdateConfirm {
                subscription_id: remote.id,
                item_id,
                price_id: price.id,
            }),
            after_completion_url: Some(return_url),
        })
        .await
        .map_err(|e| payment_error("create_portal_session", e))?;

    tracing::info!(
        team_id = %team.id,
        from = %subscription.billing_interval,
        to = %request.interval,
        "Interval switch started"
    );
    Ok(ApiResponse::data(RedirectUrl { url: session.url }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    use crate::domain::entities::{PlanType, SubscriptionStatus};

    fn subscription(lookup_key: &str, interval: BillingInterval) -> TeamSubscription {
        TeamSubscription {
            id: Uuid::new_v4(),
            team_id: Uuid::new_v4(),
            status: SubscriptionStatus::Active,
            plan_type: PlanType::Pro,
            billing_interval: interval,
            lookup_key: Some(lookup_key.to_string()),
            stripe_price_id: None,
            stripe_product_id: None,
            stripe_subscription_id: "sub_1".to_string(),
            trial_start: None,
            trial_end: None,
            trial_days: None,
            cancel_at: None,
            canceled_at: None,
            failure_code: None,
            failure_message: None,
            invoice_payment_failed_at: None,
            has_valid_payment_method: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_switch_to_same_interval_is_rejected() {
        let sub = subscription("pro_monthly", BillingInterval::Month);
        let err = switched_lookup_key(&sub, BillingInterval::Month).unwrap_err();
        assert_eq!(err.code(), ErrorCode::IntervalUnchanged);
    }

    #[test]
    fn test_switch_resolves_alternate_key() {
        let sub = subscription("premium_annually", BillingInterval::Year);
        assert_eq!(
            switched_lookup_key(&sub, BillingInterval::Month).unwrap(),
            "premium_monthly"
        );
    }

    #[test]
    fn test_switch_without_alternate_is_invalid() {
        let sub = subscription("enterprise_custom", BillingInterval::Month);
        let err = switched_lookup_key(&sub, BillingInterval::Year).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidRequest);
    }

    #[test]
    fn test_changeable_guards() {
        assert_eq!(
            changeable(None).unwrap_err().code(),
            ErrorCode::SubscriptionNotFound
        );
        let mut canceled = subscription("pro_monthly", BillingInterval::Month);
        canceled.cancel_at = Some(Utc::now());
        assert_eq!(
            changeable(Some(canceled)).unwrap_err().code(),
            ErrorCode::SubscriptionAlreadyCanceled
        );
        assert!(changeable(Some(subscription("pro_monthly", BillingInterval::Month))).is_ok());
    }

    #[test]
    fn test_portal_request_flow_names() {
        let request: OpenPortalRequest =
            serde_json::from_value(serde_json::json!({ "flow": "cancel_subscription" })).unwrap();
        assert_eq!(request.flow, Some(PortalTarget::CancelSubscription));
        let empty: OpenPortalRequest = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(empty.flow, None);
    }
}
