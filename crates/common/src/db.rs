//! Shared database types for Tenantry
//!
//! This module provides common database-related types used across domain repositories.

use std::future::Future;

use crate::error::{Error, ErrorCode};
use thiserror::Error;

/// Attempts made for a serializable transaction before the conflict is surfaced
pub const SERIALIZABLE_MAX_ATTEMPTS: usize = 3;

/// Database-specific error types
#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Record not found")]
    NotFound,

    #[error("Record already exists")]
    AlreadyExists,

    #[error("Database connection error: {0}")]
    Connection(#[from] sqlx::Error),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

impl RepositoryError {
    /// True when the store aborted a serializable transaction (SQLSTATE 40001)
    pub fn is_serialization_failure(&self) -> bool {
        match self {
            RepositoryError::Connection(e) => is_serialization_failure(e),
            _ => false,
        }
    }
}

impl From<RepositoryError> for Error {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound => Error::from(ErrorCode::NotFound),
            RepositoryError::AlreadyExists => {
                Error::api(ErrorCode::InvalidRequest, "Record already exists")
            }
            RepositoryError::Connection(e) => Error::Database(e),
            RepositoryError::InvalidData(msg) => Error::api(ErrorCode::InvalidRequest, msg),
        }
    }
}

fn sqlstate(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db) => db.code().map(|c| c.into_owned()),
        _ => None,
    }
}

/// SQLSTATE 40001: serialization failure, safe to retry the whole transaction
pub fn is_serialization_failure(err: &sqlx::Error) -> bool {
    sqlstate(err).as_deref() == Some("40001")
}

/// SQLSTATE 23505: unique constraint violation
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    sqlstate(err).as_deref() == Some("23505")
}

impl Error {
    /// True when this error wraps a retryable serialization failure
    pub fn is_serialization_failure(&self) -> bool {
        match self {
            Error::Database(e) => is_serialization_failure(e),
            _ => false,
        }
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or
/// [`SERIALIZABLE_MAX_ATTEMPTS`] serialization conflicts have been seen.
///
/// `op` must open and commit its own transaction on every call.
pub async fn retry_serializable<T, F, Fut>(mut op: F) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Err(e) if e.is_serialization_failure() && attempt < SERIALIZABLE_MAX_ATTEMPTS => {
                tracing::warn!(attempt, "Serializable transaction conflict, retrying");
                attempt += 1;
            }
            other => return other,
        }
    }
}
