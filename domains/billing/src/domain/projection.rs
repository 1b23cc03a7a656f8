//! Pure projections from payment provider objects onto the subscription row
//!
//! Every field is derived from the event alone so applying an event twice
//! writes the same values.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tenantry_stripe::{RecurringInterval, SetupIntent, Subscription};
use uuid::Uuid;

use crate::domain::entities::{BillingInterval, PlanType, SubscriptionStatus};
use crate::domain::plans::{interval_from_lookup_key, plan_type_from_lookup_key};

/// Metadata key linking provider objects back to a team
pub const TEAM_ID_METADATA_KEY: &str = "team_id";

/// Window around trial end inside which the trial counts as ending now
pub const TRIAL_ENDING_WINDOW: Duration = Duration::hours(1);

/// Fields of the subscription row derived from a provider subscription
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionSnapshot {
    pub stripe_subscription_id: String,
    pub stripe_customer_id: String,
    pub status: SubscriptionStatus,
    pub plan_type: PlanType,
    pub billing_interval: BillingInterval,
    pub lookup_key: Option<String>,
    pub stripe_price_id: Option<String>,
    pub stripe_product_id: Option<String>,
    pub trial_start: Option<DateTime<Utc>>,
    pub trial_end: Option<DateTime<Utc>>,
    pub trial_days: Option<i32>,
    pub cancel_at: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
}

impl SubscriptionSnapshot {
    pub fn from_subscription(subscription: &Subscription) -> Self {
        let price = subscription.price();
        let lookup_key = price.and_then(|p| p.lookup_key.clone());

        let billing_interval = price
            .and_then(|p| p.recurring.as_ref())
            .and_then(|r| match r.interval {
                RecurringInterval::Month => Some(BillingInterval::Month),
                RecurringInterval::Year => Some(BillingInterval::Year),
                RecurringInterval::Day | RecurringInterval::Week => None,
            })
            .or_else(|| lookup_key.as_deref().and_then(interval_from_lookup_key))
            .unwrap_or_default();

        let trial_start = subscription.trial_start.and_then(from_unix);
        let trial_end = subscription.trial_end.and_then(from_unix);
        let trial_days = match (trial_start, trial_end) {
            (Some(start), Some(end)) => i32::try_from((end - start).num_days()).ok(),
            _ => None,
        };

        // A period-end cancellation carries no cancel_at of its own
        let cancel_at = subscription.cancel_at.and_then(from_unix).or_else(|| {
            subscription
                .cancel_at_period_end
                .then_some(subscription.current_period_end)
                .flatten()
                .and_then(from_unix)
        });

        Self {
            stripe_subscription_id: subscription.id.clone(),
            stripe_customer_id: subscription.customer.clone(),
            status: subscription.status.into(),
            plan_type: plan_type_from_lookup_key(lookup_key.as_deref()),
            billing_interval,
            lookup_key,
            stripe_price_id: price.map(|p| p.id.clone()),
            stripe_product_id: price.map(|p| p.product.clone()),
            trial_start,
            trial_end,
            trial_days,
            cancel_at,
            canceled_at: subscription.canceled_at.and_then(from_unix),
        }
    }

    pub fn is_trialing(&self) -> bool {
        self.status == SubscriptionStatus::Trialing
    }
}

/// Setup failure fields stored on the team; all `None` clears them
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SetupFailure {
    pub code: Option<String>,
    pub decline_code: Option<String>,
    pub message: Option<String>,
}

impl SetupFailure {
    pub fn from_setup_intent(intent: &SetupIntent) -> Self {
        intent
            .last_setup_error
            .as_ref()
            .map(|e| Self {
                code: e.code.clone(),
                decline_code: e.decline_code.clone(),
                message: e.message.clone(),
            })
            .unwrap_or_default()
    }
}

pub fn from_unix(seconds: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(seconds, 0)
}

/// Team id carried in provider metadata
pub fn metadata_team_id(metadata: &HashMap<String, String>) -> Option<Uuid> {
    metadata
        .get(TEAM_ID_METADATA_KEY)
        .and_then(|raw| Uuid::parse_str(raw).ok())
}

/// Is the trial ending within an hour either side of `now`?
pub fn trial_ending_now(trial_end: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    trial_end.is_some_and(|end| (end - now).abs() <= TRIAL_ENDING_WINDOW)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subscription(json: serde_json::Value) -> Subscription {
        serde_json::from_value(json).unwrap()
    }

    fn trialing() -> Subscription {
        subscription(serde_json::json!({
            "id": "sub_1",
            "customer": "cus_1",
            "status": "trialing",
            "items": { "data": [{
                "id": "si_1",
                "price": { "id": "price_pro_monthly", "product": "prod_pro",
                           "lookup_key": "pro_monthly",
                           "recurring": { "interval": "month" } }
            }]},
            "trial_start": 1_700_000_000,
            "trial_end": 1_700_000_000 + 14 * 86_400,
            "metadata": { "team_id": "0b8f3c4e-8a43-4d7e-9d4e-1f0c2a4b5c6d" }
        }))
    }

    #[test]
    fn test_snapshot_of_trialing_subscription() {
        let snapshot = SubscriptionSnapshot::from_subscription(&trialing());
        assert!(snapshot.is_trialing());
        assert_eq!(snapshot.plan_type, PlanType::Pro);
        assert_eq!(snapshot.billing_interval, BillingInterval::Month);
        assert_eq!(snapshot.trial_days, Some(14));
        assert_eq!(snapshot.stripe_price_id.as_deref(), Some("price_pro_monthly"));
        assert_eq!(snapshot.stripe_product_id.as_deref(), Some("prod_pro"));
        assert_eq!(snapshot.cancel_at, None);
    }

    #[test]
    fn test_snapshot_without_price_falls_back_to_basic() {
        let snapshot = SubscriptionSnapshot::from_subscription(&subscription(serde_json::json!({
            "id": "sub_2", "customer": "cus_2", "status": "active"
        })));
        assert_eq!(snapshot.plan_type, PlanType::Basic);
        assert_eq!(snapshot.billing_interval, BillingInterval::Month);
        assert_eq!(snapshot.lookup_key, None);
        assert_eq!(snapshot.trial_days, None);
    }

    #[test]
    fn test_period_end_cancellation_projects_cancel_at() {
        let sub = subscription(serde_json::json!({
            "id": "sub_3", "customer": "cus_3", "status": "active",
            "cancel_at_period_end": true,
            "current_period_end": 1_702_592_000
        }));
        let first = SubscriptionSnapshot::from_subscription(&sub);
        let replay = SubscriptionSnapshot::from_subscription(&sub);
        assert_eq!(first.cancel_at, from_unix(1_702_592_000));
        assert_eq!(first, replay);
    }

    #[test]
    fn test_annual_interval_from_lookup_key_when_recurring_missing() {
        let snapshot = SubscriptionSnapshot::from_subscription(&subscription(serde_json::json!({
            "id": "sub_4", "customer": "cus_4", "status": "active",
            "items": { "data": [{
                "id": "si_4",
                "price": { "id": "price_4", "product": "prod_premium",
                           "lookup_key": "premium_annually" }
            }]}
        })));
        assert_eq!(snapshot.billing_interval, BillingInterval::Year);
        assert_eq!(snapshot.plan_type, PlanType::Premium);
    }

    #[test]
    fn test_metadata_team_id() {
        assert!(metadata_team_id(&trialing().metadata).is_some());
        let mut bad = HashMap::new();
        bad.insert(TEAM_ID_METADATA_KEY.to_string(), "not-a-uuid".to_string());
        assert_eq!(metadata_team_id(&bad), None);
    }

    #[test]
    fn test_trial_ending_window() {
        let now = Utc::now();
        assert!(trial_ending_now(Some(now + Duration::minutes(59)), now));
        assert!(trial_ending_now(Some(now - Duration::minutes(30)), now));
        assert!(!trial_ending_now(Some(now + Duration::days(3)), now));
        assert!(!trial_ending_now(None, now));
    }
}
