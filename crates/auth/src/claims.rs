//! JWT claims types

use chrono::Duration;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Purpose of an internally issued token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    Auth,
    Refresh,
    EmailConfirmation,
    EmailResend,
    ResetPassword,
    ResetEmail,
    EmailUpdateConfirmation,
}

impl TokenType {
    /// Lifetime of a freshly issued token of this type
    pub fn ttl(&self) -> Duration {
        match self {
            TokenType::Auth => Duration::minutes(15),
            TokenType::Refresh => Duration::days(30),
            TokenType::EmailResend => Duration::hours(24),
            TokenType::ResetEmail => Duration::minutes(10),
            TokenType::EmailConfirmation
            | TokenType::ResetPassword
            | TokenType::EmailUpdateConfirmation => Duration::minutes(15),
        }
    }
}

/// Claims of an HS256 token issued by this service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InternalClaims {
    pub user_id: Uuid,
    /// Absent for tokens not bound to a session (email flows)
    #[serde(default)]
    pub session_id: Option<Uuid>,
    #[serde(rename = "type")]
    pub token_type: TokenType,
    /// Expiry, unix seconds
    pub exp: i64,
    /// Security version at issuance, unix milliseconds
    pub version: i64,
}
