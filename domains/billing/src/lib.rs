//! Billing domain: subscription projection, checkout and portal flows
//!
//! The payment provider is the source of truth for subscriptions. Its
//! webhooks are projected onto one `team_subscriptions` row per team, which
//! HTTP routes only read.

pub mod api;
pub mod domain;
pub mod repository;

// Re-export domain types at the crate root for convenience
pub use domain::entities::*;
pub use domain::plans::{alternate_lookup_key, classify_change, PlanChange};
pub use domain::projection::SubscriptionSnapshot;
// Re-export repository types
pub use repository::{BillingRepositories, SubscriptionRepository};

// Re-export API types
pub use api::routes;
pub use api::{BillingConfig, BillingState};
