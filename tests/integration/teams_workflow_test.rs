//! Team lifecycle against a real database
//!
//! Sign up, create a team, invite by email and by shared link, change roles,
//! remove and leave. Run with `cargo test -- --ignored` and a reachable
//! `TEST_DATABASE_URL`.

mod common;

use std::time::Duration;

use axum::http::StatusCode;
use serde_json::json;
use tenantry_auth::TokenType;
use tenantry_email::EmailKind;

use crate::common::{cookie_value, unique_email, TestApp, TEST_PASSWORD};

mod accounts {
    use super::*;

    #[tokio::test]
    #[ignore = "requires PostgreSQL"]
    async fn test_signup_sends_confirmation_and_starts_session() {
        let app = TestApp::new().await.unwrap();
        let email = unique_email("signup");

        let user = app.signup(&email).await;
        assert!(user.cookie.contains("auth-token="));
        assert!(app.email.was_sent(&email, EmailKind::EmailConfirmation));

        let teams = app.get("/teams", Some(&user.cookie)).await;
        assert_eq!(teams.status, StatusCode::OK);
        assert_eq!(teams.body["data"], json!([]));
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL"]
    async fn test_duplicate_signup_is_conflict() {
        let app = TestApp::new().await.unwrap();
        let email = unique_email("dupe");
        app.signup(&email).await;

        let response = app
            .post(
                "/auth/signup",
                json!({ "email": email, "password": TEST_PASSWORD }),
                None,
            )
            .await;
        assert_eq!(response.status, StatusCode::CONFLICT);
        assert_eq!(response.code(), Some("email_taken"));
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL"]
    async fn test_login_failures_look_identical() {
        let app = TestApp::new().await.unwrap();
        let email = unique_email("login");
        app.signup(&email).await;

        let wrong_password = app
            .post(
                "/auth/login",
                json!({ "email": email, "password": "Wrong-Horse-1" }),
                None,
            )
            .await;
        let unknown_email = app
            .post(
                "/auth/login",
                json!({ "email": unique_email("nobody"), "password": TEST_PASSWORD }),
                None,
            )
            .await;

        assert_eq!(wrong_password.status, unknown_email.status);
        assert_eq!(wrong_password.code(), Some("invalid_credentials"));
        assert_eq!(unknown_email.code(), Some("invalid_credentials"));

        let ok = app
            .post(
                "/auth/login",
                json!({ "email": email, "password": TEST_PASSWORD }),
                None,
            )
            .await;
        assert_eq!(ok.status, StatusCode::OK);
        assert!(ok.cookie_header().contains("refresh-token="));
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL"]
    async fn test_logout_revokes_session() {
        let app = TestApp::new().await.unwrap();
        let user = app.signup(&unique_email("logout")).await;

        let logout = app.post("/auth/logout", json!({}), Some(&user.cookie)).await;
        assert_eq!(logout.status, StatusCode::OK);

        let after = app.get("/teams", Some(&user.cookie)).await;
        assert_eq!(after.status, StatusCode::UNAUTHORIZED);
    }
}

mod sessions {
    use super::*;

    #[tokio::test]
    #[ignore = "requires PostgreSQL"]
    async fn test_password_change_fences_old_credentials() {
        let app = TestApp::new().await.unwrap();
        let user = app.signup(&unique_email("fence")).await;

        let changed = app
            .patch(
                "/users",
                json!({
                    "current_password": TEST_PASSWORD,
                    "new_password": "Battery-Staple-7",
                    "confirm_password": "Battery-Staple-7",
                }),
                Some(&user.cookie),
            )
            .await;
        assert_eq!(changed.status, StatusCode::OK, "{}", changed.body);
        let fresh_cookie = changed.cookie_header();

        // Access token minted before the change
        let stale = app.get("/teams", Some(&user.cookie)).await;
        assert_eq!(stale.status, StatusCode::UNAUTHORIZED);
        assert_eq!(stale.code(), Some("session_expired"));
        assert_eq!(stale.set_cookie("auth-token").as_deref(), Some(""));
        assert_eq!(stale.set_cookie("refresh-token").as_deref(), Some(""));

        // Refresh token minted before the change
        let refresh = app.get("/auth/refresh", Some(&user.cookie)).await;
        assert_eq!(refresh.status, StatusCode::UNAUTHORIZED);
        assert_eq!(refresh.code(), Some("session_expired"));

        let current = app.get("/teams", Some(&fresh_cookie)).await;
        assert_eq!(current.status, StatusCode::OK);

        let old_login = app
            .post(
                "/auth/login",
                json!({ "email": user.email, "password": TEST_PASSWORD }),
                None,
            )
            .await;
        assert_eq!(old_login.code(), Some("invalid_credentials"));
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL"]
    async fn test_refresh_keeps_session_and_extends_expiry() {
        let app = TestApp::new().await.unwrap();
        let user = app.signup(&unique_email("refresh")).await;
        let before = app.claims(
            &cookie_value(&user.cookie, "auth-token").unwrap(),
            TokenType::Auth,
        );

        // Expiry is in whole seconds
        tokio::time::sleep(Duration::from_millis(1_100)).await;

        let refreshed = app.get("/auth/refresh", Some(&user.cookie)).await;
        assert_eq!(refreshed.status, StatusCode::OK, "{}", refreshed.body);

        let after = app.claims(&refreshed.set_cookie("auth-token").unwrap(), TokenType::Auth);
        assert_eq!(after.user_id, before.user_id);
        assert_eq!(after.session_id, before.session_id);
        assert!(after.exp > before.exp);
        assert_eq!(
            refreshed.body["data"]["session_id"],
            json!(before.session_id.unwrap())
        );

        let refresh_claims = app.claims(
            &refreshed.set_cookie("refresh-token").unwrap(),
            TokenType::Refresh,
        );
        assert_eq!(refresh_claims.session_id, before.session_id);

        // Refreshing again with the new cookies is still the same session
        let again = app.get("/auth/refresh", Some(&refreshed.cookie_header())).await;
        assert_eq!(again.status, StatusCode::OK);
        let latest = app.claims(&again.set_cookie("auth-token").unwrap(), TokenType::Auth);
        assert_eq!(latest.session_id, before.session_id);
        assert!(latest.exp >= after.exp);
    }
}

mod teams {
    use super::*;

    #[tokio::test]
    #[ignore = "requires PostgreSQL"]
    async fn test_create_team_makes_caller_owner() {
        let app = TestApp::new().await.unwrap();
        let owner = app.signup(&unique_email("owner")).await;

        let (slug, _) = app.create_team(&owner, "Acme Studio").await;
        assert!(slug.starts_with("acme-studio"));

        let member = app
            .get(&format!("/teams/{slug}/member"), Some(&owner.cookie))
            .await;
        assert_eq!(member.status, StatusCode::OK);
        assert_eq!(member.body["data"]["role"], "owner");
        assert_eq!(member.body["data"]["status"], "active");

        let teams = app.get("/teams", Some(&owner.cookie)).await;
        assert_eq!(teams.body["data"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL"]
    async fn test_outsider_sees_team_not_found() {
        let app = TestApp::new().await.unwrap();
        let owner = app.signup(&unique_email("owner")).await;
        let outsider = app.signup(&unique_email("outsider")).await;
        let (slug, _) = app.create_team(&owner, "Private Team").await;

        let response = app
            .get(&format!("/teams/{slug}/members"), Some(&outsider.cookie))
            .await;
        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert_eq!(response.code(), Some("team_not_found"));
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL"]
    async fn test_sole_owner_cannot_leave() {
        let app = TestApp::new().await.unwrap();
        let owner = app.signup(&unique_email("owner")).await;
        let (slug, _) = app.create_team(&owner, "Solo").await;

        let response = app
            .post(&format!("/teams/{slug}/leave"), json!({}), Some(&owner.cookie))
            .await;
        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        assert_eq!(response.code(), Some("no_team_owner"));
    }
}

mod invites {
    use super::*;

    #[tokio::test]
    #[ignore = "requires PostgreSQL"]
    async fn test_email_invite_round_trip() {
        let app = TestApp::new().await.unwrap();
        let owner = app.signup(&unique_email("owner")).await;
        let (slug, _) = app.create_team(&owner, "Invite Co").await;
        let invitee_email = unique_email("invitee");

        let invited = app
            .post(
                &format!("/teams/{slug}/invite"),
                json!({ "emails": [invitee_email], "role": "member" }),
                Some(&owner.cookie),
            )
            .await;
        assert_eq!(invited.status, StatusCode::CREATED, "{}", invited.body);

        let token = app.invite_token(&invitee_email);

        let preview = app
            .get(&format!("/teams/{slug}/join/{token}"), None)
            .await;
        assert_eq!(preview.status, StatusCode::OK);
        assert_eq!(preview.body["data"]["role"], "member");

        let invitee = app.signup(&invitee_email).await;
        let accepted = app
            .post(
                &format!("/team/{slug}/join/{token}"),
                json!({}),
                Some(&invitee.cookie),
            )
            .await;
        assert_eq!(accepted.status, StatusCode::OK, "{}", accepted.body);

        // Accepting again is a no-op with the same redirect
        let again = app
            .post(
                &format!("/team/{slug}/join/{token}"),
                json!({}),
                Some(&invitee.cookie),
            )
            .await;
        assert_eq!(again.status, StatusCode::OK);
        assert_eq!(
            again.body["data"]["redirect_url"],
            accepted.body["data"]["redirect_url"]
        );

        let members = app
            .get(&format!("/teams/{slug}/members"), Some(&owner.cookie))
            .await;
        let active = members.body["data"]
            .as_array()
            .unwrap()
            .iter()
            .filter(|m| m["status"] == "active")
            .count();
        assert_eq!(active, 2);
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL"]
    async fn test_invite_for_someone_else_is_refused() {
        let app = TestApp::new().await.unwrap();
        let owner = app.signup(&unique_email("owner")).await;
        let (slug, _) = app.create_team(&owner, "Strict Co").await;
        let invitee_email = unique_email("intended");

        app.post(
            &format!("/teams/{slug}/invite"),
            json!({ "emails": [invitee_email], "role": "member" }),
            Some(&owner.cookie),
        )
        .await;
        let token = app.invite_token(&invitee_email);

        let stranger = app.signup(&unique_email("stranger")).await;
        let response = app
            .post(
                &format!("/team/{slug}/join/{token}"),
                json!({}),
                Some(&stranger.cookie),
            )
            .await;
        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        assert_eq!(response.code(), Some("invalid_invite_link"));
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL"]
    async fn test_member_cannot_grant_admin() {
        let app = TestApp::new().await.unwrap();
        let owner = app.signup(&unique_email("owner")).await;
        let (slug, _) = app.create_team(&owner, "Ranks").await;
        let member_email = unique_email("member");

        app.post(
            &format!("/teams/{slug}/invite"),
            json!({ "emails": [member_email], "role": "member" }),
            Some(&owner.cookie),
        )
        .await;
        let token = app.invite_token(&member_email);
        let member = app.signup(&member_email).await;
        app.post(&format!("/team/{slug}/join/{token}"), json!({}), Some(&member.cookie))
            .await;

        let response = app
            .post(
                &format!("/teams/{slug}/invite"),
                json!({ "emails": [unique_email("friend")], "role": "admin" }),
                Some(&member.cookie),
            )
            .await;
        assert_eq!(response.status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL"]
    async fn test_shared_link_join_and_regenerate() {
        let app = TestApp::new().await.unwrap();
        let owner = app.signup(&unique_email("owner")).await;
        let (slug, _) = app.create_team(&owner, "Open Door").await;

        let link = app
            .get(&format!("/teams/{slug}/invite-link"), Some(&owner.cookie))
            .await;
        assert_eq!(link.status, StatusCode::OK);
        let url = link.body["data"]["url"].as_str().unwrap().to_string();
        let token = url.rsplit('/').next().unwrap().to_string();

        let joiner = app.signup(&unique_email("joiner")).await;
        let joined = app
            .post(&format!("/team/{slug}/join/{token}"), json!({}), Some(&joiner.cookie))
            .await;
        assert_eq!(joined.status, StatusCode::OK, "{}", joined.body);

        let rotated = app
            .post(&format!("/teams/{slug}/invite-link"), json!({}), Some(&owner.cookie))
            .await;
        assert_eq!(rotated.status, StatusCode::OK);
        assert_ne!(rotated.body["data"]["url"].as_str().unwrap(), url);

        // The old link stops working once rotated
        let late = app.signup(&unique_email("late")).await;
        let refused = app
            .post(&format!("/team/{slug}/join/{token}"), json!({}), Some(&late.cookie))
            .await;
        assert!(refused.status.is_client_error());
    }
}
