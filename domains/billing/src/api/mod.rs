//! API layer for the Billing domain
//!
//! Contains HTTP handlers, routes, and domain state definition.

pub mod handlers;
pub mod middleware;
pub mod routes;
mod support;

pub use middleware::{BillingConfig, BillingState};
pub use routes::routes;
