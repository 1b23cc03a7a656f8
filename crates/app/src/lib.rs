//! Tenantry application composition root
//!
//! Builds the provider handles once from configuration and composes the
//! domain routers, rate limiting and tracing into a single application.

pub mod rate_limit;

use std::sync::Arc;

use axum::{middleware::from_fn_with_state, routing::get, Router};
use sqlx::PgPool;
use tenantry_auth::{AuthBackend, AuthConfig};
use tenantry_billing::{BillingConfig, BillingRepositories, BillingState};
use tenantry_common::{Config, ErrorCode};
use tenantry_email::{EmailConfig, EmailService, EmailServiceFactory};
use tenantry_stripe::{PaymentConfig, PaymentProvider, PaymentProviderFactory};
use tenantry_teams::{TeamsConfig, TeamsRepositories, TeamsState};
use tenantry_workos::{IdentityConfig, IdentityProvider, IdentityProviderFactory};
use tower_http::trace::TraceLayer;

pub use rate_limit::RateLimiter;

/// External collaborators shared by every domain
#[derive(Clone)]
pub struct Services {
    pub identity: Arc<dyn IdentityProvider>,
    pub payments: Arc<dyn PaymentProvider>,
    pub email: Arc<dyn EmailService>,
    pub limiter: RateLimiter,
}

impl Services {
    /// Construct provider clients from the environment
    pub async fn from_env(config: &Config) -> Result<Self, anyhow::Error> {
        let identity = IdentityProviderFactory::create(IdentityConfig::from_env()?)?;
        let payments = PaymentProviderFactory::create(PaymentConfig::from_env()?)?;
        let email = EmailServiceFactory::create(EmailConfig::from_env()?).await?;

        let limiter = match config.redis_url() {
            Some(url) => {
                match RateLimiter::redis(
                    &url,
                    rate_limit::DEFAULT_MAX_REQUESTS,
                    rate_limit::DEFAULT_WINDOW,
                )
                .await
                {
                    Ok(limiter) => limiter,
                    Err(e) => {
                        tracing::warn!(error = %e, "Redis unavailable; using in-process rate limiter");
                        in_memory_limiter()
                    }
                }
            }
            None => in_memory_limiter(),
        };

        Ok(Self {
            identity,
            payments,
            email,
            limiter,
        })
    }
}

fn in_memory_limiter() -> RateLimiter {
    RateLimiter::in_memory(rate_limit::DEFAULT_MAX_REQUESTS, rate_limit::DEFAULT_WINDOW)
}

/// Compose the application router from already constructed services
pub fn build_router(config: &Config, pool: PgPool, services: Services) -> Router {
    let auth = AuthBackend::new(pool.clone(), AuthConfig::from(config), services.identity);

    let teams_state = TeamsState {
        repos: TeamsRepositories::new(pool.clone()),
        auth: auth.clone(),
        email: services.email,
        config: TeamsConfig::from(config),
    };

    let billing_state = BillingState {
        repos: BillingRepositories::new(pool),
        auth: auth.clone(),
        payments: services.payments,
        config: BillingConfig::from(config),
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/", get(|| async { "Tenantry API v0.0.1-SNAPSHOT" }))
        .merge(tenantry_teams::routes(auth.clone()).with_state(teams_state))
        .merge(tenantry_billing::routes(auth).with_state(billing_state))
        .fallback(|| async { tenantry_common::Error::from(ErrorCode::NotFound) })
        .layer(from_fn_with_state(services.limiter, rate_limit::rate_limit))
        .layer(TraceLayer::new_for_http())
}

/// Create the main application router with all routes and middleware
pub async fn create_app(config: &Config, pool: PgPool) -> Result<Router, anyhow::Error> {
    let services = Services::from_env(config).await?;
    Ok(build_router(config, pool, services))
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}
