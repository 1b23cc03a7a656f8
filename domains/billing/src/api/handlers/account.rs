//! Billing reads: customer, subscription, plans, invoices, payment methods
//!
//! Reads go to the local projection for the subscription and to the payment
//! provider for everything else. None of them write the subscription row.

use std::collections::HashMap;

use axum::extract::{Path, State};
use serde::Serialize;
use tenantry_auth::AuthUser;
use tenantry_common::{ApiResponse, ErrorCode, Result};
use tenantry_stripe::{Customer, Invoice, PaymentMethod, Price};

use crate::api::middleware::BillingState;
use crate::api::support::{billing_team, ensure_customer, payment_error};
use crate::domain::entities::{BillingInterval, PlanType, TeamSubscription};
use crate::domain::plans::{interval_from_lookup_key, plan_rank, plan_type_from_lookup_key};

/// Invoices returned by the history listing
const INVOICE_HISTORY_LIMIT: u32 = 24;

/// One purchasable price
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanOption {
    pub lookup_key: String,
    pub plan_type: PlanType,
    pub interval: BillingInterval,
    pub product_name: Option<String>,
    pub unit_amount: Option<i64>,
    pub currency: Option<String>,
}

/// Self-serve prices ordered by plan rank, monthly before annual
fn plan_options(prices: Vec<Price>, product_names: &HashMap<String, String>) -> Vec<PlanOption> {
    let mut options: Vec<(u8, PlanOption)> = prices
        .into_iter()
        .filter_map(|price| {
            let lookup_key = price.lookup_key?;
            let rank = plan_rank(&lookup_key)?;
            let interval = interval_from_lookup_key(&lookup_key)?;
            Some((
                rank,
                PlanOption {
                    plan_type: plan_type_from_lookup_key(Some(&lookup_key)),
                    interval,
                    product_name: product_names.get(&price.product).cloned(),
                    unit_amount: price.unit_amount,
                    currency: price.currency,
                    lookup_key,
                },
            ))
        })
        .collect();
    options.sort_by_key(|(rank, option)| (*rank, option.interval == BillingInterval::Year));
    options.into_iter().map(|(_, option)| option).collect()
}

/// **GET /teams/{slug}/billing/customer**
///
/// Creates the team's customer on first access.
pub async fn get_customer(
    State(state): State<BillingState>,
    AuthUser(ctx): AuthUser,
    Path(slug): Path<String>,
) -> Result<ApiResponse<Customer>> {
    let (team, _) = billing_team(&state, &slug, ctx.user_id()).await?;
    let customer_id = ensure_customer(&state, &team, ctx.user_id()).await?;
    let customer = state
        .payments
        .get_customer(&customer_id)
        .await
        .map_err(|e| payment_error("get_customer", e))?;
    Ok(ApiResponse::data(customer))
}

/// **GET /teams/{slug}/billing/subscription**
pub async fn get_subscription(
    State(state): State<BillingState>,
    AuthUser(ctx): AuthUser,
    Path(slug): Path<String>,
) -> Result<ApiResponse<TeamSubscription>> {
    let (team, _) = billing_team(&state, &slug, ctx.user_id()).await?;
    let subscription = state
        .repos
        .subscriptions
        .get_for_team(team.id)
        .await?
        .ok_or(ErrorCode::SubscriptionNotFound)?;
    Ok(ApiResponse::data(subscription))
}

/// **GET /teams/{slug}/billing/plans**
pub async fn list_plans(
    State(state): State<BillingState>,
    AuthUser(ctx): AuthUser,
    Path(slug): Path<String>,
) -> Result<ApiResponse<Vec<PlanOption>>> {
    billing_team(&state, &slug, ctx.user_id()).await?;

    let prices = state
        .payments
        .list_prices()
        .await
        .map_err(|e| payment_error("list_prices", e))?;

    let mut product_names = HashMap::new();
    for price in &prices {
        if product_names.contains_key(&price.product) {
            continue;
        }
        match state.payments.get_product(&price.product).await {
            Ok(product) => {
                product_names.insert(product.id, product.name);
            }
            Err(e) => {
                tracing::warn!(error = %e, product_id = %price.product, "Failed to load product");
            }
        }
    }

    Ok(ApiResponse::data(plan_options(prices, &product_names)))
}

/// **GET /teams/{slug}/billing/invoices**
pub async fn list_invoices(
    State(state): State<BillingState>,
    AuthUser(ctx): AuthUser,
    Path(slug): Path<String>,
) -> Result<ApiResponse<Vec<Invoice>>> {
    let (team, _) = billing_team(&state, &slug, ctx.user_id()).await?;
    let Some(customer_id) = team.stripe_customer_id.as_deref() else {
        return Ok(ApiResponse::data(Vec::new()));
    };
    let invoices = state
        .payments
        .list_invoices(customer_id, INVOICE_HISTORY_LIMIT)
        .await
        .map_err(|e| payment_error("list_invoices", e))?;
    Ok(ApiResponse::data(invoices))
}

/// **GET /teams/{slug}/billing/invoices/upcoming**
pub async fn upcoming_invoice(
    State(state): State<BillingState>,
    AuthUser(ctx): AuthUser,
    Path(slug): Path<String>,
) -> Result<ApiResponse<Option<Invoice>>> {
    let (team, _) = billing_team(&state, &slug, ctx.user_id()).await?;
    let Some(customer_id) = team.stripe_customer_id.as_deref() else {
        return Ok(ApiResponse::data(None));
    };
    let invoice = state
        .payments
        .upcoming_invoice(customer_id)
        .await
        .map_err(|e| payment_error("upcoming_invoice", e))?;
    Ok(ApiResponse::data(invoice))
}

/// **GET /teams/{slug}/billing/payment-methods**
pub async fn list_payment_methods(
    State(state): State<BillingState>,
    AuthUser(ctx): AuthUser,
    Path(slug): Path<String>,
) -> Result<ApiResponse<Vec<PaymentMethod>>> {
    let (team, _) = billing_team(&state, &slug, ctx.user_id()).await?;
    let Some(customer_id) = team.stripe_customer_id.as_deref() else {
        return Ok(ApiResponse::data(Vec::new()));
    };
    let methods = state
        .payments
        .list_payment_methods(customer_id)
        .await
        .map_err(|e| payment_error("list_payment_methods", e))?;
    Ok(ApiResponse::data(methods))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tenantry_stripe::{Recurring, RecurringInterval};

    fn price(lookup_key: Option<&str>, product: &str, amount: i64) -> Price {
        Price {
            id: format!("price_{}", lookup_key.unwrap_or("none")),
            lookup_key: lookup_key.map(String::from),
            product: product.to_string(),
            unit_amount: Some(amount),
            currency: Some("usd".to_string()),
            recurring: Some(Recurring {
                interval: RecurringInterval::Month,
            }),
        }
    }

    #[test]
    fn test_plan_options_sorted_and_filtered() {
        let prices = vec![
            price(Some("premium_monthly"), "prod_premium", 7900),
            price(Some("pro_annually"), "prod_pro", 29000),
            price(None, "prod_addon", 100),
            price(Some("enterprise_monthly"), "prod_ent", 0),
            price(Some("pro_monthly"), "prod_pro", 2900),
            price(Some("basic_monthly"), "prod_basic", 900),
        ];
        let mut names = HashMap::new();
        names.insert("prod_pro".to_string(), "Pro".to_string());

        let options = plan_options(prices, &names);
        let keys: Vec<&str> = options.iter().map(|o| o.lookup_key.as_str()).collect();
        assert_eq!(
            keys,
            ["basic_monthly", "pro_monthly", "pro_annually", "premium_monthly"]
        );
        assert_eq!(options[1].product_name.as_deref(), Some("Pro"));
        assert_eq!(options[2].interval, BillingInterval::Year);
        assert_eq!(options[0].product_name, None);
    }
}
