//! HTTP handlers for the Billing domain

pub mod account;
pub mod checkout;
pub mod upsells;
pub mod webhooks;
