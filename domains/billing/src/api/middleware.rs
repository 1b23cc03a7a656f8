//! Billing domain state and auth backend integration

use std::sync::Arc;

use axum::extract::FromRef;
use tenantry_auth::AuthBackend;
use tenantry_common::Config;
use tenantry_stripe::PaymentProvider;

use crate::repository::BillingRepositories;

/// URLs the payment provider sends users back to
#[derive(Debug, Clone)]
pub struct BillingConfig {
    /// SPA origin
    pub app_url: String,
}

impl BillingConfig {
    /// SPA page under a team, e.g. `/teams/acme/billing`
    pub fn team_link(&self, slug: &str, page: &str) -> String {
        format!("{}/teams/{}/{}", self.app_url.trim_end_matches('/'), slug, page)
    }
}

impl From<&Config> for BillingConfig {
    fn from(config: &Config) -> Self {
        Self {
            app_url: config.app_url.clone(),
        }
    }
}

/// Application state for the Billing domain
#[derive(Clone)]
pub struct BillingState {
    pub repos: BillingRepositories,
    pub auth: AuthBackend,
    pub payments: Arc<dyn PaymentProvider>,
    pub config: BillingConfig,
}

impl FromRef<BillingState> for AuthBackend {
    fn from_ref(state: &BillingState) -> Self {
        state.auth.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_team_link() {
        let config = BillingConfig {
            app_url: "https://app.tenantry.test/".to_string(),
        };
        assert_eq!(
            config.team_link("acme", "plans"),
            "https://app.tenantry.test/teams/acme/plans"
        );
    }
}
