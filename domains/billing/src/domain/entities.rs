//! Domain entities for the Tenantry billing domain

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Enums
// ============================================================================

/// Local mirror of the payment provider's subscription lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "subscription_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Incomplete,
    IncompleteExpired,
    Trialing,
    Active,
    PastDue,
    Canceled,
    Unpaid,
    Paused,
}

impl SubscriptionStatus {
    /// Statuses that grant access to paid features
    pub fn is_live(&self) -> bool {
        matches!(self, SubscriptionStatus::Trialing | SubscriptionStatus::Active)
    }
}

impl From<tenantry_stripe::SubscriptionStatus> for SubscriptionStatus {
    fn from(status: tenantry_stripe::SubscriptionStatus) -> Self {
        use tenantry_stripe::SubscriptionStatus as Provider;
        match status {
            Provider::Incomplete => SubscriptionStatus::Incomplete,
            Provider::IncompleteExpired => SubscriptionStatus::IncompleteExpired,
            Provider::Trialing => SubscriptionStatus::Trialing,
            Provider::Active => SubscriptionStatus::Active,
            Provider::PastDue => SubscriptionStatus::PastDue,
            Provider::Canceled => SubscriptionStatus::Canceled,
            Provider::Unpaid => SubscriptionStatus::Unpaid,
            Provider::Paused => SubscriptionStatus::Paused,
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Default,
)]
#[sqlx(type_name = "plan_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PlanType {
    #[default]
    Basic,
    Pro,
    Premium,
    Enterprise,
}

impl PlanType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanType::Basic => "basic",
            PlanType::Pro => "pro",
            PlanType::Premium => "premium",
            PlanType::Enterprise => "enterprise",
        }
    }
}

impl std::fmt::Display for PlanType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Default,
)]
#[sqlx(type_name = "billing_interval", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BillingInterval {
    #[default]
    Month,
    Year,
}

impl BillingInterval {
    /// Lookup-key suffix for prices billed at this interval
    pub fn lookup_suffix(&self) -> &'static str {
        match self {
            BillingInterval::Month => "monthly",
            BillingInterval::Year => "annually",
        }
    }
}

impl std::fmt::Display for BillingInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BillingInterval::Month => f.write_str("month"),
            BillingInterval::Year => f.write_str("year"),
        }
    }
}

// ============================================================================
// TeamSubscription
// ============================================================================

/// One row per team, written only by the payment webhook projection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TeamSubscription {
    pub id: Uuid,
    pub team_id: Uuid,
    pub status: SubscriptionStatus,
    pub plan_type: PlanType,
    pub billing_interval: BillingInterval,
    pub lookup_key: Option<String>,
    #[serde(skip)]
    pub stripe_price_id: Option<String>,
    #[serde(skip)]
    pub stripe_product_id: Option<String>,
    #[serde(skip)]
    pub stripe_subscription_id: String,
    pub trial_start: Option<DateTime<Utc>>,
    pub trial_end: Option<DateTime<Utc>>,
    pub trial_days: Option<i32>,
    pub cancel_at: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub failure_code: Option<String>,
    pub failure_message: Option<String>,
    pub invoice_payment_failed_at: Option<DateTime<Utc>>,
    pub has_valid_payment_method: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TeamSubscription {
    /// Canceled, or scheduled to cancel
    pub fn is_canceled(&self) -> bool {
        self.status == SubscriptionStatus::Canceled
            || self.cancel_at.is_some()
            || self.canceled_at.is_some()
    }
}
