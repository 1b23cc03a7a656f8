//! Repository implementations for the Billing domain
//!
//! Subscription rows are written only by the webhook projection. Team, member
//! and prompt access reuses the Teams domain repositories.

pub mod subscriptions;
pub mod transactions;

use sqlx::{PgPool, Postgres, Transaction};
use tenantry_teams::{MemberRepository, PromptRepository, TeamRepository, UserRepository};

pub use subscriptions::SubscriptionRepository;

pub(crate) const SUBSCRIPTION_COLUMNS: &str = "id, team_id, status, plan_type, billing_interval, \
    lookup_key, stripe_price_id, stripe_product_id, stripe_subscription_id, trial_start, \
    trial_end, trial_days, cancel_at, canceled_at, failure_code, failure_message, \
    invoice_payment_failed_at, has_valid_payment_method, created_at, updated_at";

/// Combined repository access for the Billing domain
#[derive(Clone)]
pub struct BillingRepositories {
    pool: PgPool,
    pub subscriptions: SubscriptionRepository,
    pub teams: TeamRepository,
    pub members: MemberRepository,
    pub prompts: PromptRepository,
    pub users: UserRepository,
}

impl BillingRepositories {
    pub fn new(pool: PgPool) -> Self {
        Self {
            subscriptions: SubscriptionRepository::new(pool.clone()),
            teams: TeamRepository::new(pool.clone()),
            members: MemberRepository::new(pool.clone()),
            prompts: PromptRepository::new(pool.clone()),
            users: UserRepository::new(pool.clone()),
            pool,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Begin a new database transaction.
    pub async fn begin(&self) -> std::result::Result<Transaction<'static, Postgres>, sqlx::Error> {
        self.pool.begin().await
    }
}
