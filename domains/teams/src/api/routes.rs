//! Route definitions for Teams domain API

use axum::{
    middleware::from_fn_with_state,
    routing::{delete, get, patch, post},
    Router,
};
use tenantry_auth::{team_scope, AuthBackend};

use super::handlers::{
    auth, invites, members, prompts, sessions, teams, tokens, users, webhooks,
};
use super::middleware::TeamsState;

/// Create sign-in, sign-up and session routes
fn auth_routes() -> Router<TeamsState> {
    Router::new()
        .route("/auth/signup", post(auth::signup))
        .route("/auth/login", post(auth::login))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/confirm", get(auth::confirm_email))
        .route("/auth/callback", get(auth::callback))
        .route("/auth/verify", get(auth::verify))
        .route("/auth/verify-email", get(auth::resend_confirmation))
        .route("/auth/authorize/{provider}", get(auth::authorize))
        .route("/auth/forgot-password", post(auth::forgot_password))
        .route("/auth/reset-password", post(auth::reset_password))
        .route("/auth/identity", get(sessions::identity))
        .route("/auth/refresh", get(sessions::refresh))
        .route(
            "/auth/sessions",
            get(sessions::list_sessions).delete(sessions::revoke_all_sessions),
        )
        .route("/auth/sessions/{id}", delete(sessions::revoke_session))
}

/// Create account routes
fn user_routes() -> Router<TeamsState> {
    Router::new()
        .route(
            "/users",
            patch(users::update_user).delete(users::delete_user),
        )
        .route("/users/accept-terms", post(users::accept_terms))
        .route("/prompts/{id}/dismiss", patch(prompts::dismiss_prompt))
}

/// Create API key management routes
fn token_routes() -> Router<TeamsState> {
    Router::new()
        .route("/tokens", get(tokens::list_tokens).post(tokens::create_token))
        .route("/tokens/{id}", delete(tokens::revoke_token))
}

/// Create routes addressing a team by slug
///
/// Wrapped in `team_scope` so provider tokens follow the addressed team.
fn team_routes(auth: AuthBackend) -> Router<TeamsState> {
    Router::new()
        .route("/teams/{slug}", get(teams::get_team))
        .route("/teams/{slug}/member", get(teams::get_member))
        .route("/teams/{slug}/onboarding", post(teams::complete_onboarding))
        .route("/teams/{slug}/members", get(members::list_members))
        .route(
            "/teams/{slug}/members/{member_id}",
            patch(members::update_member_role).delete(members::remove_member),
        )
        .route("/teams/{slug}/leave", post(members::leave_team))
        .route("/teams/{slug}/invite", post(invites::invite_members))
        .route("/teams/{slug}/invites", get(invites::list_invites))
        .route(
            "/teams/{slug}/invites/{invite_id}",
            delete(invites::cancel_invite),
        )
        .route(
            "/teams/{slug}/invite-link",
            get(invites::get_invite_link).post(invites::regenerate_invite_link),
        )
        .route_layer(from_fn_with_state(auth, team_scope))
}

/// Create routes reachable without team membership
fn public_routes() -> Router<TeamsState> {
    Router::new()
        .route(
            "/teams",
            get(teams::list_teams).post(teams::create_team),
        )
        .route("/teams/{slug}/join/{token}", get(invites::preview_invite))
        .route("/team/{slug}/join/{token}", post(invites::accept_invite))
        .route("/webhooks/workos", post(webhooks::workos_webhook))
}

/// Create all Teams domain API routes
pub fn routes(auth: AuthBackend) -> Router<TeamsState> {
    Router::new()
        .merge(auth_routes())
        .merge(user_routes())
        .merge(token_routes())
        .merge(team_routes(auth))
        .merge(public_routes())
}
