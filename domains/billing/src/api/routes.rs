//! Route definitions for Billing domain API

use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use tenantry_auth::{team_scope, AuthBackend};

use super::handlers::{account, checkout, upsells, webhooks};
use super::middleware::BillingState;

/// Create billing read routes
fn account_routes() -> Router<BillingState> {
    Router::new()
        .route("/teams/{slug}/billing/customer", get(account::get_customer))
        .route("/teams/{slug}/billing/plans", get(account::list_plans))
        .route("/teams/{slug}/billing/invoices", get(account::list_invoices))
        .route(
            "/teams/{slug}/billing/invoices/upcoming",
            get(account::upcoming_invoice),
        )
        .route(
            "/teams/{slug}/billing/payment-methods",
            get(account::list_payment_methods),
        )
        .route(
            "/teams/{slug}/billing/subscription",
            get(account::get_subscription).patch(checkout::switch_interval),
        )
        .route("/teams/{slug}/upsells", get(upsells::list_upsells))
}

/// Create checkout and portal routes
fn checkout_routes() -> Router<BillingState> {
    Router::new()
        .route("/teams/{slug}/billing/checkout", post(checkout::create_checkout))
        .route("/teams/{slug}/billing/portal", post(checkout::open_portal))
}

/// Create all Billing domain API routes
pub fn routes(auth: AuthBackend) -> Router<BillingState> {
    Router::new()
        .merge(account_routes())
        .merge(checkout_routes())
        .route_layer(from_fn_with_state(auth, team_scope))
        .route("/webhooks/stripe", post(webhooks::stripe_webhook))
}
