//! Billing domain layer: subscription row, plan catalogue rules, projections

pub mod entities;
pub mod plans;
pub mod projection;
