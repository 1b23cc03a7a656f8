//! API layer for the Teams domain
//!
//! Contains HTTP handlers, routes, and domain state definition.

pub mod handlers;
pub mod middleware;
pub mod routes;
mod session;

pub use middleware::{TeamsConfig, TeamsState};
pub use routes::routes;
