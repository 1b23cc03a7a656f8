//! Subscription projection repository
//!
//! Every write overwrites fields with values taken from a provider event, so
//! redelivered events leave the row unchanged.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tenantry_common::Result;
use uuid::Uuid;

use super::SUBSCRIPTION_COLUMNS;
use crate::domain::entities::{SubscriptionStatus, TeamSubscription};
use crate::domain::projection::{SetupFailure, SubscriptionSnapshot};

#[derive(Clone)]
pub struct SubscriptionRepository {
    pool: PgPool,
}

impl SubscriptionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get_for_team(&self, team_id: Uuid) -> Result<Option<TeamSubscription>> {
        let row = sqlx::query_as::<_, TeamSubscription>(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM team_subscriptions WHERE team_id = $1"
        ))
        .bind(team_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn find_by_stripe_id(
        &self,
        stripe_subscription_id: &str,
    ) -> Result<Option<TeamSubscription>> {
        let row = sqlx::query_as::<_, TeamSubscription>(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM team_subscriptions WHERE stripe_subscription_id = $1"
        ))
        .bind(stripe_subscription_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Overwrite lifecycle, price and schedule fields from a snapshot.
    ///
    /// A trial marked as ending keeps its cancellation while the snapshot
    /// carries none and the subscription is still trialing. `None` when the
    /// creation event has not been projected yet.
    pub async fn apply_snapshot(
        &self,
        snapshot: &SubscriptionSnapshot,
    ) -> Result<Option<TeamSubscription>> {
        let row = sqlx::query_as::<_, TeamSubscription>(&format!(
            r#"
            UPDATE team_subscriptions
            SET status = $2, plan_type = $3, billing_interval = $4, lookup_key = $5,
                stripe_price_id = $6, stripe_product_id = $7,
                trial_start = $8, trial_end = $9, trial_days = $10,
                cancel_at = COALESCE($11, CASE WHEN $2::subscription_status = 'trialing' THEN cancel_at END),
                canceled_at = COALESCE($12, CASE WHEN $2::subscription_status = 'trialing' THEN canceled_at END),
                updated_at = NOW()
            WHERE stripe_subscription_id = $1
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#
        ))
        .bind(&snapshot.stripe_subscription_id)
        .bind(snapshot.status)
        .bind(snapshot.plan_type)
        .bind(snapshot.billing_interval)
        .bind(&snapshot.lookup_key)
        .bind(&snapshot.stripe_price_id)
        .bind(&snapshot.stripe_product_id)
        .bind(snapshot.trial_start)
        .bind(snapshot.trial_end)
        .bind(snapshot.trial_days)
        .bind(snapshot.cancel_at)
        .bind(snapshot.canceled_at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Mark a trial that ends now as canceling at its end
    pub async fn mark_trial_ending(
        &self,
        stripe_subscription_id: &str,
        trial_end: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<Option<TeamSubscription>> {
        let row = sqlx::query_as::<_, TeamSubscription>(&format!(
            r#"
            UPDATE team_subscriptions
            SET cancel_at = COALESCE(cancel_at, $2),
                canceled_at = COALESCE(canceled_at, $3),
                updated_at = NOW()
            WHERE stripe_subscription_id = $1
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#
        ))
        .bind(stripe_subscription_id)
        .bind(trial_end)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn set_payment_method(
        &self,
        team_id: Uuid,
        has_valid_payment_method: bool,
    ) -> Result<Option<TeamSubscription>> {
        let row = sqlx::query_as::<_, TeamSubscription>(&format!(
            r#"
            UPDATE team_subscriptions
            SET has_valid_payment_method = $2, updated_at = NOW()
            WHERE team_id = $1
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#
        ))
        .bind(team_id)
        .bind(has_valid_payment_method)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn record_invoice_failure(
        &self,
        stripe_subscription_id: &str,
        status: SubscriptionStatus,
        failed_at: DateTime<Utc>,
    ) -> Result<Option<TeamSubscription>> {
        let row = sqlx::query_as::<_, TeamSubscription>(&format!(
            r#"
            UPDATE team_subscriptions
            SET status = $2, invoice_payment_failed_at = $3, updated_at = NOW()
            WHERE stripe_subscription_id = $1
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#
        ))
        .bind(stripe_subscription_id)
        .bind(status)
        .bind(failed_at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// A failed charge leaves the subscription incomplete
    pub async fn record_charge_failure(
        &self,
        team_id: Uuid,
        failure_code: Option<&str>,
        failure_message: Option<&str>,
    ) -> Result<Option<TeamSubscription>> {
        let row = sqlx::query_as::<_, TeamSubscription>(&format!(
            r#"
            UPDATE team_subscriptions
            SET status = 'incomplete', failure_code = $2, failure_message = $3,
                updated_at = NOW()
            WHERE team_id = $1
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#
        ))
        .bind(team_id)
        .bind(failure_code)
        .bind(failure_message)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn clear_payment_failure(
        &self,
        team_id: Uuid,
        status: SubscriptionStatus,
    ) -> Result<Option<TeamSubscription>> {
        let row = sqlx::query_as::<_, TeamSubscription>(&format!(
            r#"
            UPDATE team_subscriptions
            SET status = $2, failure_code = NULL, failure_message = NULL,
                invoice_payment_failed_at = NULL, updated_at = NOW()
            WHERE team_id = $1
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#
        ))
        .bind(team_id)
        .bind(status)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Store or clear the team's last card setup failure
    pub async fn set_setup_failure(&self, team_id: Uuid, failure: &SetupFailure) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE teams
            SET stripe_setup_error_code = $2, stripe_setup_decline_code = $3,
                stripe_setup_error_message = $4, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(team_id)
        .bind(&failure.code)
        .bind(&failure.decline_code)
        .bind(&failure.message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
