//! Payment provider webhook handler
//!
//! Deliveries are at-least-once and may arrive out of order. Each event is
//! projected onto the team's single subscription row by overwriting fields,
//! so replays leave the row unchanged. Events for a subscription whose
//! creation has not been projected yet fail with a non-2xx status and are
//! retried by the provider.

use std::collections::HashMap;

use axum::{body::Bytes, extract::State, http::HeaderMap};
use chrono::{DateTime, Utc};
use tenantry_common::{ApiResponse, Error, ErrorCode, Result};
use tenantry_stripe::webhook::{BillingEvent, SIGNATURE_HEADER};
use tenantry_stripe::{PaymentError, Subscription};
use tenantry_teams::{NewPrompt, PromptType, Team};

use crate::api::middleware::{BillingConfig, BillingState};
use crate::api::support::payment_error;
use crate::domain::entities::SubscriptionStatus;
use crate::domain::plans::{classify_change, PlanChange};
use crate::domain::projection::{
    from_unix, metadata_team_id, trial_ending_now, SetupFailure, SubscriptionSnapshot,
};
use crate::repository::transactions::{link_team_subscription_tx, upsert_subscription_tx};

pub const PAYMENT_METHOD_PROMPT_TITLE: &str = "Add Payment Method";

/// **POST /webhooks/stripe**
pub async fn stripe_webhook(
    State(state): State<BillingState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<ApiResponse<()>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(ErrorCode::InvalidSignature)?;

    let event = match state.payments.construct_event(&body, signature) {
        Ok(event) => event,
        Err(PaymentError::InvalidPayload(detail)) => {
            tracing::warn!(detail = %detail, "Unparseable payment webhook acknowledged");
            return Ok(ApiResponse::message("Ignored"));
        }
        Err(e) => return Err(payment_error("construct_event", e)),
    };

    let classified = match event.classify() {
        Ok(classified) => classified,
        Err(e) => {
            tracing::warn!(
                error = %e,
                event_id = %event.id,
                event = %event.kind,
                "Payment webhook payload not understood"
            );
            return Ok(ApiResponse::message("Ignored"));
        }
    };

    let occurred_at = event.created.and_then(from_unix).unwrap_or_else(Utc::now);
    apply_event(&state, classified, occurred_at).await?;

    tracing::debug!(event_id = %event.id, event = %event.kind, "Payment webhook applied");
    Ok(ApiResponse::message("OK"))
}

/// Failure for events that reference a subscription row not created yet
fn not_projected(subscription_id: &str) -> Error {
    tracing::warn!(
        subscription_id = %subscription_id,
        "Subscription event before creation was projected"
    );
    Error::api(
        ErrorCode::TeamNotFound,
        format!("No subscription projected for {subscription_id}"),
    )
}

fn unmapped_customer(customer_id: &str) -> Error {
    tracing::warn!(customer_id = %customer_id, "Payment webhook for unknown customer");
    Error::api(
        ErrorCode::InvalidPayload,
        format!("No team for customer {customer_id}"),
    )
}

/// Non-dismissible upsell asking an owner to add a card before the trial ends
pub fn payment_method_prompt(config: &BillingConfig, team: &Team, user_id: uuid::Uuid) -> NewPrompt {
    NewPrompt {
        user_id,
        team_id: Some(team.id),
        prompt_type: PromptType::Upsell,
        title: PAYMENT_METHOD_PROMPT_TITLE.to_string(),
        body: "Your free trial is ending. Add a payment method to keep your plan.".to_string(),
        action_label: Some("Choose a plan".to_string()),
        action_url: Some(config.team_link(&team.slug, "plans")),
        priority: 100,
        dismissible: false,
    }
}

async fn team_for_customer(
    state: &BillingState,
    customer_id: &str,
    metadata: Option<&HashMap<String, String>>,
) -> Result<Team> {
    if let Some(team_id) = metadata.and_then(metadata_team_id) {
        if let Some(team) = state.repos.teams.get_by_id(team_id).await? {
            return Ok(team);
        }
    }
    state
        .repos
        .teams
        .find_by_stripe_customer(customer_id)
        .await?
        .ok_or_else(|| unmapped_customer(customer_id))
}

async fn has_payment_method(state: &BillingState, subscription: &Subscription) -> Result<bool> {
    if subscription.default_payment_method.is_some() {
        return Ok(true);
    }
    let methods = state
        .payments
        .list_payment_methods(&subscription.customer)
        .await
        .map_err(|e| payment_error("list_payment_methods", e))?;
    Ok(!methods.is_empty())
}

/// Current provider status of a subscription
async fn provider_status(state: &BillingState, subscription_id: &str) -> Result<SubscriptionStatus> {
    let subscription = state
        .payments
        .get_subscription(subscription_id)
        .await
        .map_err(|e| payment_error("get_subscription", e))?;
    Ok(subscription.status.into())
}

async fn apply_event(
    state: &BillingState,
    event: BillingEvent,
    occurred_at: DateTime<Utc>,
) -> Result<()> {
    match event {
        BillingEvent::SubscriptionCreated(subscription) => {
            subscription_created(state, &subscription, occurred_at).await
        }
        BillingEvent::SubscriptionUpdated {
            subscription,
            previous_attributes,
        } => subscription_updated(state, &subscription, previous_attributes.as_ref()).await,
        BillingEvent::SubscriptionDeleted(subscription) => {
            let snapshot = SubscriptionSnapshot::from_subscription(&subscription);
            let row = state
                .repos
                .subscriptions
                .apply_snapshot(&snapshot)
                .await?
                .ok_or_else(|| not_projected(&subscription.id))?;
            tracing::info!(team_id = %row.team_id, status = ?row.status, "Subscription ended");
            Ok(())
        }
        BillingEvent::TrialWillEnd(subscription) => {
            trial_will_end(state, &subscription, occurred_at).await
        }
        BillingEvent::InvoicePaymentFailed(invoice) => {
            let Some(subscription_id) = invoice.subscription.as_deref() else {
                tracing::debug!(invoice_id = ?invoice.id, "Failed invoice without subscription");
                return Ok(());
            };
            let status = provider_status(state, subscription_id).await?;
            let row = state
                .repos
                .subscriptions
                .record_invoice_failure(subscription_id, status, occurred_at)
                .await?
                .ok_or_else(|| not_projected(subscription_id))?;
            tracing::info!(team_id = %row.team_id, status = ?row.status, "Invoice payment failed");
            Ok(())
        }
        BillingEvent::InvoicePaymentSucceeded(invoice) => {
            let Some(subscription_id) = invoice.subscription.as_deref() else {
                tracing::debug!(invoice_id = ?invoice.id, "Paid invoice without subscription");
                return Ok(());
            };
            let row = state
                .repos
                .subscriptions
                .find_by_stripe_id(subscription_id)
                .await?
                .ok_or_else(|| not_projected(subscription_id))?;
            let status = provider_status(state, subscription_id).await?;
            state
                .repos
                .subscriptions
                .clear_payment_failure(row.team_id, status)
                .await?;
            Ok(())
        }
        BillingEvent::PaymentIntentSucceeded(intent) => {
            let Some(customer_id) = intent.customer.as_deref() else {
                tracing::debug!(payment_intent_id = %intent.id, "Payment without customer");
                return Ok(());
            };
            let team = team_for_customer(state, customer_id, None).await?;
            let Some(row) = state.repos.subscriptions.get_for_team(team.id).await? else {
                tracing::debug!(team_id = %team.id, "Payment for team without subscription");
                return Ok(());
            };
            let status = provider_status(state, &row.stripe_subscription_id).await?;
            state
                .repos
                .subscriptions
                .clear_payment_failure(team.id, status)
                .await?;
            Ok(())
        }
        BillingEvent::ChargeFailed(charge) => {
            let Some(customer_id) = charge.customer.as_deref() else {
                tracing::debug!(charge_id = %charge.id, "Failed charge without customer");
                return Ok(());
            };
            let team = team_for_customer(state, customer_id, None).await?;
            let row = state
                .repos
                .subscriptions
                .record_charge_failure(
                    team.id,
                    charge.failure_code.as_deref(),
                    charge.failure_message.as_deref(),
                )
                .await?;
            if row.is_none() {
                tracing::debug!(team_id = %team.id, "Failed charge for team without subscription");
            } else {
                tracing::info!(
                    team_id = %team.id,
                    failure_code = ?charge.failure_code,
                    "Charge failed"
                );
            }
            Ok(())
        }
        BillingEvent::SetupIntentFailed(intent) | BillingEvent::SetupIntentSucceeded(intent)
            if intent.customer.is_none() =>
        {
            tracing::debug!(setup_intent_id = %intent.id, "Setup intent without customer");
            Ok(())
        }
        BillingEvent::SetupIntentFailed(intent) => {
            let customer_id = intent.customer.as_deref().unwrap_or_default();
            let team = team_for_customer(state, customer_id, None).await?;
            let failure = SetupFailure::from_setup_intent(&intent);
            state
                .repos
                .subscriptions
                .set_setup_failure(team.id, &failure)
                .await?;
            tracing::info!(team_id = %team.id, code = ?failure.code, "Card setup failed");
            Ok(())
        }
        BillingEvent::SetupIntentSucceeded(intent) => {
            let customer_id = intent.customer.as_deref().unwrap_or_default();
            let team = team_for_customer(state, customer_id, None).await?;
            state
                .repos
                .subscriptions
                .set_setup_failure(team.id, &SetupFailure::default())
                .await?;
            Ok(())
        }
        BillingEvent::PaymentMethodAttached(payment_method) => {
            let Some(customer_id) = payment_method.customer.as_deref() else {
                tracing::debug!(payment_method_id = %payment_method.id, "Attach without customer");
                return Ok(());
            };
            let team = team_for_customer(state, customer_id, None).await?;
            state
                .repos
                .subscriptions
                .set_payment_method(team.id, true)
                .await?;
            Ok(())
        }
        BillingEvent::PaymentMethodDetached {
            payment_method,
            customer,
        } => {
            let Some(customer_id) = customer.as_deref() else {
                tracing::debug!(payment_method_id = %payment_method.id, "Detach without customer");
                return Ok(());
            };
            let team = team_for_customer(state, customer_id, None).await?;
            let remaining = state
                .payments
                .list_payment_methods(customer_id)
                .await
                .map_err(|e| payment_error("list_payment_methods", e))?;
            state
                .repos
                .subscriptions
                .set_payment_method(team.id, !remaining.is_empty())
                .await?;
            Ok(())
        }
        BillingEvent::Ignored(kind) => {
            tracing::debug!(event = %kind, "Payment webhook ignored");
            Ok(())
        }
    }
}

async fn subscription_created(
    state: &BillingState,
    subscription: &Subscription,
    occurred_at: DateTime<Utc>,
) -> Result<()> {
    let team = team_for_customer(state, &subscription.customer, Some(&subscription.metadata)).await?;
    let snapshot = SubscriptionSnapshot::from_subscription(subscription);
    let has_payment_method = has_payment_method(state, subscription).await?;

    let free_trial_at = snapshot
        .is_trialing()
        .then(|| snapshot.trial_start.unwrap_or(occurred_at));

    let mut transaction = state.repos.begin().await?;
    let row = upsert_subscription_tx(&mut transaction, team.id, &snapshot, has_payment_method).await?;
    link_team_subscription_tx(&mut transaction, team.id, row.id, free_trial_at, occurred_at).await?;
    transaction.commit().await?;

    tracing::info!(
        team_id = %team.id,
        status = ?row.status,
        plan_type = %row.plan_type,
        interval = %row.billing_interval,
        trial_days = ?row.trial_days,
        "Subscription created"
    );
    Ok(())
}

async fn subscription_updated(
    state: &BillingState,
    subscription: &Subscription,
    previous_attributes: Option<&serde_json::Value>,
) -> Result<()> {
    let current = state
        .repos
        .subscriptions
        .find_by_stripe_id(&subscription.id)
        .await?
        .ok_or_else(|| not_projected(&subscription.id))?;

    let snapshot = SubscriptionSnapshot::from_subscription(subscription);
    let change = classify_change(current.lookup_key.as_deref(), snapshot.lookup_key.as_deref());
    let changed: Vec<&str> = previous_attributes
        .and_then(|p| p.as_object())
        .map(|fields| fields.keys().map(String::as_str).collect())
        .unwrap_or_default();

    let row = state
        .repos
        .subscriptions
        .apply_snapshot(&snapshot)
        .await?
        .ok_or_else(|| not_projected(&subscription.id))?;

    match change {
        PlanChange::Upgrade | PlanChange::Downgrade => tracing::info!(
            team_id = %row.team_id,
            change = %change,
            from = ?current.lookup_key,
            to = ?row.lookup_key,
            "Subscription plan changed"
        ),
        PlanChange::Lateral | PlanChange::Unranked => tracing::debug!(
            team_id = %row.team_id,
            status = ?row.status,
            changed = ?changed,
            "Subscription updated"
        ),
    }
    Ok(())
}

async fn trial_will_end(
    state: &BillingState,
    subscription: &Subscription,
    occurred_at: DateTime<Utc>,
) -> Result<()> {
    let team = team_for_customer(state, &subscription.customer, Some(&subscription.metadata)).await?;
    let snapshot = SubscriptionSnapshot::from_subscription(subscription);

    state
        .repos
        .subscriptions
        .apply_snapshot(&snapshot)
        .await?
        .ok_or_else(|| not_projected(&subscription.id))?;

    // Judged against the event time so a late redelivery marks the same way
    if let Some(trial_end) = snapshot
        .trial_end
        .filter(|end| trial_ending_now(Some(*end), occurred_at))
    {
        state
            .repos
            .subscriptions
            .mark_trial_ending(&subscription.id, trial_end, occurred_at)
            .await?;
    }

    if has_payment_method(state, subscription).await? {
        return Ok(());
    }

    let owners = state.repos.members.list_active_owners(team.id).await?;
    for user_id in owners.iter().filter_map(|owner| owner.user_id) {
        let prompt = payment_method_prompt(&state.config, &team, user_id);
        if state.repos.prompts.create_if_absent(&prompt).await?.is_some() {
            tracing::info!(team_id = %team.id, user_id = %user_id, "Payment method prompt created");
        }
    }
    state
        .repos
        .subscriptions
        .set_payment_method(team.id, false)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn team() -> Team {
        Team {
            id: Uuid::new_v4(),
            name: "Acme".to_string(),
            slug: "acme".to_string(),
            external_org_id: None,
            stripe_customer_id: Some("cus_1".to_string()),
            created_by: None,
            subscription_id: None,
            subscription_tier_chosen_at: None,
            free_trial_at: None,
            onboarding_completed_at: None,
            stripe_setup_error_code: None,
            stripe_setup_decline_code: None,
            stripe_setup_error_message: None,
            current_team_invite_id: None,
            deleted_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_payment_method_prompt_is_pinned_upsell() {
        let config = BillingConfig {
            app_url: "https://app.tenantry.test".to_string(),
        };
        let team = team();
        let user_id = Uuid::new_v4();
        let prompt = payment_method_prompt(&config, &team, user_id);
        assert_eq!(prompt.title, PAYMENT_METHOD_PROMPT_TITLE);
        assert_eq!(prompt.prompt_type, PromptType::Upsell);
        assert!(!prompt.dismissible);
        assert_eq!(prompt.team_id, Some(team.id));
        assert_eq!(
            prompt.action_url.as_deref(),
            Some("https://app.tenantry.test/teams/acme/plans")
        );
    }

    #[test]
    fn test_unprojected_subscription_is_retryable() {
        let err = not_projected("sub_1");
        assert_eq!(err.code(), ErrorCode::TeamNotFound);
        assert!(err.status_code().is_client_error());
    }

    #[test]
    fn test_unknown_customer_is_invalid_payload() {
        assert_eq!(unmapped_customer("cus_x").code(), ErrorCode::InvalidPayload);
    }
}
