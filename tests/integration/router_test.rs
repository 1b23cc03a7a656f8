//! Router-level tests that need no database
//!
//! Health, fallback, authentication rejection, webhook signature checks and
//! rate limiting all answer before any query runs.

mod common;

use std::time::Duration;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
};
use serde_json::json;
use tenantry_app::RateLimiter;

use crate::common::{json_request, TestApp};

#[tokio::test]
async fn test_health_check() {
    let app = TestApp::offline();
    let response = app.get("/health", None).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body, json!("OK"));
}

#[tokio::test]
async fn test_unknown_route_is_not_found() {
    let app = TestApp::offline();
    let response = app.get("/no/such/route", None).await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(response.code(), Some("not_found"));
}

mod authentication {
    use super::*;

    #[tokio::test]
    async fn test_missing_cookie_is_rejected() {
        let app = TestApp::offline();
        let response = app.get("/teams", None).await;
        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        assert_eq!(response.code(), Some("missing_token"));
    }

    #[tokio::test]
    async fn test_team_scoped_route_without_cookie() {
        let app = TestApp::offline();
        let response = app.get("/teams/acme/billing/subscription", None).await;
        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        assert_eq!(response.code(), Some("missing_token"));
    }

    #[tokio::test]
    async fn test_garbage_cookie_is_invalid_token() {
        let app = TestApp::offline();
        let response = app.get("/teams", Some("auth-token=not.a.jwt")).await;
        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        assert_eq!(response.code(), Some("invalid_token"));
    }

    #[tokio::test]
    async fn test_signup_rejects_weak_password() {
        let app = TestApp::offline();
        let response = app
            .post(
                "/auth/signup",
                json!({ "email": "weak@tenantry.test", "password": "password" }),
                None,
            )
            .await;
        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        assert_eq!(response.code(), Some("weak_password"));
    }
}

mod webhooks {
    use super::*;

    fn stripe_request(signature: Option<&str>, payload: &str) -> Request<Body> {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/webhooks/stripe")
            .header("content-type", "application/json");
        if let Some(signature) = signature {
            builder = builder.header("stripe-signature", signature);
        }
        builder.body(Body::from(payload.to_string())).unwrap()
    }

    #[tokio::test]
    async fn test_stripe_webhook_requires_signature() {
        let app = TestApp::offline();
        let response = app.send(stripe_request(None, "{}")).await;
        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        assert_eq!(response.code(), Some("invalid_signature"));
    }

    #[tokio::test]
    async fn test_stripe_webhook_rejects_forged_signature() {
        let app = TestApp::offline();
        let response = app
            .send(stripe_request(Some("t=1,v1=deadbeef"), "{}"))
            .await;
        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        assert_eq!(response.code(), Some("invalid_signature"));
    }

    #[tokio::test]
    async fn test_stripe_webhook_acknowledges_unparseable_payload() {
        let app = TestApp::offline();
        let payload = "not json";
        let signature = app.payments.sign_webhook(payload.as_bytes());
        let response = app.send(stripe_request(Some(&signature), payload)).await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body["message"], "Ignored");
    }

    #[tokio::test]
    async fn test_stripe_webhook_ignores_unhandled_event_types() {
        let app = TestApp::offline();
        let response = app
            .stripe_event(json!({
                "id": "evt_schedule",
                "type": "subscription_schedule.updated",
                "data": { "object": { "id": "sub_sched_1" } }
            }))
            .await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body["message"], "OK");
    }

    #[tokio::test]
    async fn test_identity_webhook_requires_signature() {
        let app = TestApp::offline();
        let request = Request::builder()
            .method(Method::POST)
            .uri("/webhooks/workos")
            .header("content-type", "application/json")
            .body(Body::from("{}"))
            .unwrap();
        let response = app.send(request).await;
        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        assert_eq!(response.code(), Some("invalid_signature"));
    }
}

mod rate_limiting {
    use super::*;

    fn health_from(ip: &str) -> Request<Body> {
        Request::builder()
            .uri("/health")
            .header("x-forwarded-for", ip)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_requests_over_limit_are_rejected() {
        let app = TestApp::offline_with_limiter(RateLimiter::in_memory(2, Duration::from_secs(60)));

        assert_eq!(app.send(health_from("198.51.100.7")).await.status, StatusCode::OK);
        assert_eq!(app.send(health_from("198.51.100.7")).await.status, StatusCode::OK);

        let limited = app.send(health_from("198.51.100.7")).await;
        assert_eq!(limited.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(limited.code(), Some("too_many_requests"));

        // Other callers keep their own window
        assert_eq!(app.send(health_from("198.51.100.8")).await.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_limit_applies_across_routes() {
        let app = TestApp::offline_with_limiter(RateLimiter::in_memory(1, Duration::from_secs(60)));

        let first = app.send(json_request(Method::GET, "/health", None, None)).await;
        assert_eq!(first.status, StatusCode::OK);

        let second = app.get("/teams", None).await;
        assert_eq!(second.status, StatusCode::TOO_MANY_REQUESTS);
    }
}
