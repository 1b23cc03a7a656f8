//! Billing flows against a real database
//!
//! Checkout through the mock payment provider, then the subscription
//! projection driven by signed webhook deliveries.

mod common;

use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tenantry_stripe::PortalFlow;
use uuid::Uuid;

use crate::common::{subscription_event, unique_email, TestApp, TestUser};

struct BillingTeam {
    owner: TestUser,
    slug: String,
    team_id: Uuid,
    customer_id: String,
}

async fn billing_team(app: &TestApp) -> BillingTeam {
    let owner = app.signup(&unique_email("billing")).await;
    let (slug, team_id) = app.create_team(&owner, "Billing Co").await;

    let customer = app
        .get(&format!("/teams/{slug}/billing/customer"), Some(&owner.cookie))
        .await;
    assert_eq!(customer.status, StatusCode::OK, "{}", customer.body);
    let customer_id = customer.body["data"]["id"].as_str().unwrap().to_string();

    BillingTeam {
        owner,
        slug,
        team_id,
        customer_id,
    }
}

async fn subscription(app: &TestApp, team: &BillingTeam) -> Value {
    let response = app
        .get(
            &format!("/teams/{}/billing/subscription", team.slug),
            Some(&team.owner.cookie),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK, "{}", response.body);
    response.body["data"].clone()
}

fn timestamp(value: &Value) -> Option<i64> {
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.timestamp())
}

async fn upsells(app: &TestApp, team: &BillingTeam) -> Vec<Value> {
    let response = app
        .get(
            &format!("/teams/{}/upsells", team.slug),
            Some(&team.owner.cookie),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK, "{}", response.body);
    response.body["data"].as_array().cloned().unwrap_or_default()
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_customer_is_created_once() {
    let app = TestApp::new().await.unwrap();
    let team = billing_team(&app).await;

    let again = app
        .get(
            &format!("/teams/{}/billing/customer", team.slug),
            Some(&team.owner.cookie),
        )
        .await;
    assert_eq!(again.body["data"]["id"], team.customer_id.as_str());
    assert_eq!(app.payments.customers().len(), 1);
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_first_checkout_offers_trial() {
    let app = TestApp::new().await.unwrap();
    let team = billing_team(&app).await;

    let checkout = app
        .post(
            &format!("/teams/{}/billing/checkout", team.slug),
            json!({ "lookup_key": "pro_monthly" }),
            Some(&team.owner.cookie),
        )
        .await;
    assert_eq!(checkout.status, StatusCode::OK, "{}", checkout.body);
    assert!(checkout.body["data"]["url"].as_str().is_some());

    let request = app.payments.checkout_requests().pop().unwrap();
    assert_eq!(request.price_id, "price_pro_monthly");
    assert_eq!(request.trial_period_days, Some(14));
    assert_eq!(request.customer_id, team.customer_id);
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_checkout_rejects_unknown_plan() {
    let app = TestApp::new().await.unwrap();
    let team = billing_team(&app).await;

    let response = app
        .post(
            &format!("/teams/{}/billing/checkout", team.slug),
            json!({ "lookup_key": "platinum_monthly" }),
            Some(&team.owner.cookie),
        )
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.code(), Some("invalid_request"));
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_subscription_projection_from_webhooks() {
    let app = TestApp::new().await.unwrap();
    let team = billing_team(&app).await;
    let subscription_id = format!("sub_{}", Uuid::new_v4().simple());

    let missing = app
        .get(
            &format!("/teams/{}/billing/subscription", team.slug),
            Some(&team.owner.cookie),
        )
        .await;
    assert_eq!(missing.code(), Some("subscription_not_found"));

    let created = subscription_event(
        "customer.subscription.created",
        &subscription_id,
        &team.customer_id,
        team.team_id,
        "pro_monthly",
        "trialing",
    );
    assert_eq!(app.stripe_event(created.clone()).await.status, StatusCode::OK);

    let first = subscription(&app, &team).await;
    assert_eq!(first["status"], "trialing");
    assert_eq!(first["plan_type"], "pro");
    assert_eq!(first["billing_interval"], "month");
    assert_eq!(first["trial_days"], 14);

    // Replayed delivery leaves the row as it was
    assert_eq!(app.stripe_event(created).await.status, StatusCode::OK);
    let replayed = subscription(&app, &team).await;
    assert_eq!(replayed["id"], first["id"]);
    assert_eq!(replayed["status"], first["status"]);

    let updated = subscription_event(
        "customer.subscription.updated",
        &subscription_id,
        &team.customer_id,
        team.team_id,
        "premium_annually",
        "active",
    );
    assert_eq!(app.stripe_event(updated).await.status, StatusCode::OK);

    let upgraded = subscription(&app, &team).await;
    assert_eq!(upgraded["status"], "active");
    assert_eq!(upgraded["plan_type"], "premium");
    assert_eq!(upgraded["billing_interval"], "year");

    // A live subscription is changed through the portal, not a new checkout
    let checkout = app
        .post(
            &format!("/teams/{}/billing/checkout", team.slug),
            json!({ "lookup_key": "basic_monthly" }),
            Some(&team.owner.cookie),
        )
        .await;
    assert_eq!(checkout.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_update_before_creation_is_retried() {
    let app = TestApp::new().await.unwrap();
    let team = billing_team(&app).await;

    let response = app
        .stripe_event(subscription_event(
            "customer.subscription.updated",
            "sub_not_projected",
            &team.customer_id,
            team.team_id,
            "pro_monthly",
            "active",
        ))
        .await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_interval_switch_opens_confirmation() {
    let app = TestApp::new().await.unwrap();
    let team = billing_team(&app).await;
    let subscription_id = format!("sub_{}", Uuid::new_v4().simple());

    let created = subscription_event(
        "customer.subscription.created",
        &subscription_id,
        &team.customer_id,
        team.team_id,
        "pro_monthly",
        "active",
    );
    app.payments
        .insert_subscription(serde_json::from_value(created["data"]["object"].clone()).unwrap());
    assert_eq!(app.stripe_event(created).await.status, StatusCode::OK);

    let unchanged = app
        .patch(
            &format!("/teams/{}/billing/subscription", team.slug),
            json!({ "interval": "month" }),
            Some(&team.owner.cookie),
        )
        .await;
    assert_eq!(unchanged.code(), Some("interval_unchanged"));

    let switched = app
        .patch(
            &format!("/teams/{}/billing/subscription", team.slug),
            json!({ "interval": "year" }),
            Some(&team.owner.cookie),
        )
        .await;
    assert_eq!(switched.status, StatusCode::OK, "{}", switched.body);

    let portal = app.payments.portal_requests().pop().unwrap();
    assert_eq!(
        portal.flow,
        Some(PortalFlow::SubscriptionUpdateConfirm {
            subscription_id,
            item_id: "si_1".to_string(),
            price_id: "price_pro_annually".to_string(),
        })
    );

    // Nothing changes locally until the provider reports the update
    assert_eq!(subscription(&app, &team).await["billing_interval"], "month");
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_upsells_listed_for_members() {
    let app = TestApp::new().await.unwrap();
    let team = billing_team(&app).await;

    let response = app
        .get(
            &format!("/teams/{}/upsells", team.slug),
            Some(&team.owner.cookie),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert!(response.body["data"].is_array());
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_trial_ending_within_the_hour() {
    let app = TestApp::new().await.unwrap();
    let team = billing_team(&app).await;
    let subscription_id = format!("sub_{}", Uuid::new_v4().simple());
    let now = Utc::now().timestamp();
    let trial_end = now + 30 * 60;

    let mut created = subscription_event(
        "customer.subscription.created",
        &subscription_id,
        &team.customer_id,
        team.team_id,
        "pro_monthly",
        "trialing",
    );
    created["data"]["object"]["trial_start"] = json!(trial_end - 14 * 24 * 3600);
    created["data"]["object"]["trial_end"] = json!(trial_end);
    assert_eq!(app.stripe_event(created.clone()).await.status, StatusCode::OK);

    let mut ending = created.clone();
    ending["id"] = json!(format!("evt_{}", Uuid::new_v4().simple()));
    ending["type"] = json!("customer.subscription.trial_will_end");
    ending["created"] = json!(now);
    let applied = app.stripe_event(ending.clone()).await;
    assert_eq!(applied.status, StatusCode::OK, "{}", applied.body);

    let marked = subscription(&app, &team).await;
    assert_eq!(timestamp(&marked["cancel_at"]), Some(trial_end));
    assert_eq!(timestamp(&marked["canceled_at"]), Some(now));
    assert_eq!(marked["has_valid_payment_method"], false);

    let prompts = upsells(&app, &team).await;
    let pinned: Vec<&Value> = prompts
        .iter()
        .filter(|p| p["title"] == "Add Payment Method")
        .collect();
    assert_eq!(pinned.len(), 1);
    assert_eq!(pinned[0]["dismissible"], false);

    // Redelivery leaves the row and the prompt as they were
    assert_eq!(app.stripe_event(ending).await.status, StatusCode::OK);
    let replayed = subscription(&app, &team).await;
    assert_eq!(replayed["cancel_at"], marked["cancel_at"]);
    assert_eq!(replayed["canceled_at"], marked["canceled_at"]);
    let prompts = upsells(&app, &team).await;
    assert_eq!(
        prompts
            .iter()
            .filter(|p| p["title"] == "Add Payment Method")
            .count(),
        1
    );

    // A later update without its own cancellation keeps the mark while trialing
    let mut updated = created;
    updated["id"] = json!(format!("evt_{}", Uuid::new_v4().simple()));
    updated["type"] = json!("customer.subscription.updated");
    assert_eq!(app.stripe_event(updated).await.status, StatusCode::OK);
    let after_update = subscription(&app, &team).await;
    assert_eq!(after_update["cancel_at"], marked["cancel_at"]);
    assert_eq!(after_update["canceled_at"], marked["canceled_at"]);
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_trial_ending_days_ahead_only_prompts() {
    let app = TestApp::new().await.unwrap();
    let team = billing_team(&app).await;
    let subscription_id = format!("sub_{}", Uuid::new_v4().simple());

    let created = subscription_event(
        "customer.subscription.created",
        &subscription_id,
        &team.customer_id,
        team.team_id,
        "basic_monthly",
        "trialing",
    );
    assert_eq!(app.stripe_event(created.clone()).await.status, StatusCode::OK);

    let mut ending = created;
    ending["type"] = json!("customer.subscription.trial_will_end");
    assert_eq!(app.stripe_event(ending).await.status, StatusCode::OK);

    let row = subscription(&app, &team).await;
    assert!(row["cancel_at"].is_null());
    assert!(row["canceled_at"].is_null());
    assert_eq!(row["has_valid_payment_method"], false);
    assert!(upsells(&app, &team)
        .await
        .iter()
        .any(|p| p["title"] == "Add Payment Method"));
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_period_end_cancellation_replayed() {
    let app = TestApp::new().await.unwrap();
    let team = billing_team(&app).await;
    let subscription_id = format!("sub_{}", Uuid::new_v4().simple());

    let created = subscription_event(
        "customer.subscription.created",
        &subscription_id,
        &team.customer_id,
        team.team_id,
        "pro_monthly",
        "active",
    );
    assert_eq!(app.stripe_event(created).await.status, StatusCode::OK);
    assert!(subscription(&app, &team).await["cancel_at"].is_null());

    let period_end = Utc::now().timestamp() + 20 * 24 * 3600;
    let mut canceling = subscription_event(
        "customer.subscription.updated",
        &subscription_id,
        &team.customer_id,
        team.team_id,
        "pro_monthly",
        "active",
    );
    canceling["data"]["object"]["cancel_at_period_end"] = json!(true);
    canceling["data"]["object"]["current_period_end"] = json!(period_end);

    assert_eq!(app.stripe_event(canceling.clone()).await.status, StatusCode::OK);
    let first = subscription(&app, &team).await;
    assert_eq!(timestamp(&first["cancel_at"]), Some(period_end));
    assert_eq!(first["status"], "active");

    assert_eq!(app.stripe_event(canceling).await.status, StatusCode::OK);
    let second = subscription(&app, &team).await;
    assert_eq!(second["cancel_at"], first["cancel_at"]);
    assert_eq!(second["canceled_at"], first["canceled_at"]);
    assert_eq!(second["status"], first["status"]);
    assert_eq!(second["plan_type"], first["plan_type"]);
}
