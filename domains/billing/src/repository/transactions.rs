//! Transactional free functions for the subscription creation projection

use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use super::SUBSCRIPTION_COLUMNS;
use crate::domain::entities::TeamSubscription;
use crate::domain::projection::SubscriptionSnapshot;

type TxResult<T> = std::result::Result<T, sqlx::Error>;

/// Insert the team's subscription row, or overwrite it from the snapshot.
///
/// A team resubscribing after cancellation reuses its row. The payment method
/// flag is only ever raised here; detach events lower it. A replayed creation
/// keeps a trial-ending mark on the same subscription.
pub async fn upsert_subscription_tx(
    transaction: &mut Transaction<'_, Postgres>,
    team_id: Uuid,
    snapshot: &SubscriptionSnapshot,
    has_valid_payment_method: bool,
) -> TxResult<TeamSubscription> {
    sqlx::query_as::<_, TeamSubscription>(&format!(
        r#"
        INSERT INTO team_subscriptions
            (team_id, status, plan_type, billing_interval, lookup_key, stripe_price_id,
             stripe_product_id, stripe_subscription_id, trial_start, trial_end, trial_days,
             cancel_at, canceled_at, has_valid_payment_method)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        ON CONFLICT (team_id) DO UPDATE
        SET status = EXCLUDED.status,
            plan_type = EXCLUDED.plan_type,
            billing_interval = EXCLUDED.billing_interval,
            lookup_key = EXCLUDED.lookup_key,
            stripe_price_id = EXCLUDED.stripe_price_id,
            stripe_product_id = EXCLUDED.stripe_product_id,
            stripe_subscription_id = EXCLUDED.stripe_subscription_id,
            trial_start = EXCLUDED.trial_start,
            trial_end = EXCLUDED.trial_end,
            trial_days = EXCLUDED.trial_days,
            cancel_at = COALESCE(EXCLUDED.cancel_at, CASE
                WHEN EXCLUDED.status = 'trialing'
                    AND team_subscriptions.stripe_subscription_id = EXCLUDED.stripe_subscription_id
                THEN team_subscriptions.cancel_at END),
            canceled_at = COALESCE(EXCLUDED.canceled_at, CASE
                WHEN EXCLUDED.status = 'trialing'
                    AND team_subscriptions.stripe_subscription_id = EXCLUDED.stripe_subscription_id
                THEN team_subscriptions.canceled_at END),
            has_valid_payment_method = team_subscriptions.has_valid_payment_method
                OR EXCLUDED.has_valid_payment_method,
            updated_at = NOW()
        RETURNING {SUBSCRIPTION_COLUMNS}
        "#
    ))
    .bind(team_id)
    .bind(snapshot.status)
    .bind(snapshot.plan_type)
    .bind(snapshot.billing_interval)
    .bind(&snapshot.lookup_key)
    .bind(&snapshot.stripe_price_id)
    .bind(&snapshot.stripe_product_id)
    .bind(&snapshot.stripe_subscription_id)
    .bind(snapshot.trial_start)
    .bind(snapshot.trial_end)
    .bind(snapshot.trial_days)
    .bind(snapshot.cancel_at)
    .bind(snapshot.canceled_at)
    .bind(has_valid_payment_method)
    .fetch_one(&mut **transaction)
    .await
}

/// Point the team at its subscription; the first trial date is kept
pub async fn link_team_subscription_tx(
    transaction: &mut Transaction<'_, Postgres>,
    team_id: Uuid,
    subscription_id: Uuid,
    free_trial_at: Option<DateTime<Utc>>,
    chosen_at: DateTime<Utc>,
) -> TxResult<()> {
    sqlx::query(
        r#"
        UPDATE teams
        SET subscription_id = $2,
            free_trial_at = COALESCE(free_trial_at, $3),
            subscription_tier_chosen_at = COALESCE(subscription_tier_chosen_at, $4),
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(team_id)
    .bind(subscription_id)
    .bind(free_trial_at)
    .bind(chosen_at)
    .execute(&mut **transaction)
    .await?;

    Ok(())
}
