//! Shared utilities, configuration, and error handling for Tenantry
//!
//! This crate provides common functionality used across the Tenantry application:
//! - Configuration management following 12-factor principles
//! - Error taxonomy and the JSON response envelope
//! - Database error classification
//! - Hashing utilities for API keys, passwords and invite tokens
//! - Request extractors (validated JSON, client context)

pub mod config;
pub mod context;
pub mod crypto;
pub mod db;
pub mod envelope;
pub mod error;
pub mod extractors;
pub mod state;

pub use config::Config;
pub use context::ClientContext;
pub use db::RepositoryError;
pub use envelope::{ApiResponse, Redirect};
pub use error::{Error, ErrorCode, Result};
pub use extractors::ValidatedJson;
pub use state::StateError;
