//! HTTP handlers for the Teams domain

pub mod auth;
pub mod invites;
pub mod members;
pub mod prompts;
pub mod sessions;
pub mod teams;
pub mod tokens;
pub mod users;
pub mod webhooks;
