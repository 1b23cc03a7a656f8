//! Common error types and handling for Tenantry
//!
//! Every failure surfaced to a client carries one of the [`ErrorCode`]s below.
//! Store and provider errors are classified into a code at the boundary; the
//! underlying detail is logged and never returned.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Common result type
pub type Result<T> = std::result::Result<T, Error>;

/// Machine-readable error codes returned in the `code` field of the failure envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    // Request shape
    EmptyBody,
    InvalidRequest,
    InvalidSlug,

    // Authn / authz
    MissingToken,
    InvalidToken,
    SessionExpired,
    Unauthorized,
    Forbidden,
    UserDeleted,

    // Credentials
    InvalidCredentials,
    WeakPassword,
    PasswordUnchanged,
    NewPasswordMismatch,
    MissingNewPassword,

    // Email
    EmailTaken,
    EmailAlreadyConfirmed,
    EmailUnchanged,

    // Team
    TeamNotFound,
    TeamNameLength,
    TeamNameInvalid,
    TeamNameConsecutive,

    // Invite
    InvalidInviteLink,
    InviteExpired,
    AlreadyInvited,
    DuplicateEmails,
    InvalidSelfInvite,
    TooManyInvites,
    TeamMembersAlreadyExist,
    NoTeamOwner,

    // Billing
    SubscriptionNotFound,
    SubscriptionAlreadyCanceled,
    IntervalUnchanged,
    InvalidPayload,
    InvalidSignature,

    // Generic
    NotFound,
    TooManyRequests,
    InternalServerError,
    NotImplemented,
    ServiceUnavailable,
}

impl ErrorCode {
    /// Wire representation of the code
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::EmptyBody => "empty_body",
            ErrorCode::InvalidRequest => "invalid_request",
            ErrorCode::InvalidSlug => "invalid_slug",
            ErrorCode::MissingToken => "missing_token",
            ErrorCode::InvalidToken => "invalid_token",
            ErrorCode::SessionExpired => "session_expired",
            ErrorCode::Unauthorized => "unauthorized",
            ErrorCode::Forbidden => "forbidden",
            ErrorCode::UserDeleted => "user_deleted",
            ErrorCode::InvalidCredentials => "invalid_credentials",
            ErrorCode::WeakPassword => "weak_password",
            ErrorCode::PasswordUnchanged => "password_unchanged",
            ErrorCode::NewPasswordMismatch => "new_password_mismatch",
            ErrorCode::MissingNewPassword => "missing_new_password",
            ErrorCode::EmailTaken => "email_taken",
            ErrorCode::EmailAlreadyConfirmed => "email_already_confirmed",
            ErrorCode::EmailUnchanged => "email_unchanged",
            ErrorCode::TeamNotFound => "team_not_found",
            ErrorCode::TeamNameLength => "team_name_length",
            ErrorCode::TeamNameInvalid => "team_name_invalid",
            ErrorCode::TeamNameConsecutive => "team_name_consecutive",
            ErrorCode::InvalidInviteLink => "invalid_invite_link",
            ErrorCode::InviteExpired => "invite_expired",
            ErrorCode::AlreadyInvited => "already_invited",
            ErrorCode::DuplicateEmails => "duplicate_emails",
            ErrorCode::InvalidSelfInvite => "invalid_self_invite",
            ErrorCode::TooManyInvites => "too_many_invites",
            ErrorCode::TeamMembersAlreadyExist => "team_members_already_exist",
            ErrorCode::NoTeamOwner => "no_team_owner",
            ErrorCode::SubscriptionNotFound => "subscription_not_found",
            ErrorCode::SubscriptionAlreadyCanceled => "subscription_already_canceled",
            ErrorCode::IntervalUnchanged => "interval_unchanged",
            ErrorCode::InvalidPayload => "invalid_payload",
            ErrorCode::InvalidSignature => "invalid_signature",
            ErrorCode::NotFound => "not_found",
            ErrorCode::TooManyRequests => "too_many_requests",
            ErrorCode::InternalServerError => "internal_server_error",
            ErrorCode::NotImplemented => "not_implemented",
            ErrorCode::ServiceUnavailable => "service_unavailable",
        }
    }

    /// HTTP status for the code
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::MissingToken
            | ErrorCode::InvalidToken
            | ErrorCode::SessionExpired
            | ErrorCode::Unauthorized
            | ErrorCode::InvalidCredentials => StatusCode::UNAUTHORIZED,
            ErrorCode::Forbidden | ErrorCode::UserDeleted => StatusCode::FORBIDDEN,
            ErrorCode::TeamNotFound
            | ErrorCode::SubscriptionNotFound
            | ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::EmailTaken => StatusCode::CONFLICT,
            ErrorCode::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::InternalServerError => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::NotImplemented => StatusCode::NOT_IMPLEMENTED,
            ErrorCode::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    /// Default human-readable message
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::EmptyBody => "Request body is empty",
            ErrorCode::InvalidRequest => "Invalid request",
            ErrorCode::InvalidSlug => "Invalid slug",
            ErrorCode::MissingToken => "Missing authentication token",
            ErrorCode::InvalidToken => "Invalid authentication token",
            ErrorCode::SessionExpired => "Session expired",
            ErrorCode::Unauthorized => "Unauthorized",
            ErrorCode::Forbidden => "Forbidden",
            ErrorCode::UserDeleted => "User account has been deleted",
            ErrorCode::InvalidCredentials => "Invalid email or password",
            ErrorCode::WeakPassword => "Password does not meet the strength requirements",
            ErrorCode::PasswordUnchanged => "New password must differ from the current password",
            ErrorCode::NewPasswordMismatch => "New password confirmation does not match",
            ErrorCode::MissingNewPassword => "New password is required",
            ErrorCode::EmailTaken => "Email is already in use",
            ErrorCode::EmailAlreadyConfirmed => "Email is already confirmed",
            ErrorCode::EmailUnchanged => "Email is unchanged",
            ErrorCode::TeamNotFound => "Team not found",
            ErrorCode::TeamNameLength => "Team name must be between 3 and 32 characters",
            ErrorCode::TeamNameInvalid => "Team name contains invalid characters",
            ErrorCode::TeamNameConsecutive => {
                "Team name cannot contain consecutive special characters"
            }
            ErrorCode::InvalidInviteLink => "Invalid invite link",
            ErrorCode::InviteExpired => "Invite has expired",
            ErrorCode::AlreadyInvited => "Email has already been invited",
            ErrorCode::DuplicateEmails => "Duplicate emails in request",
            ErrorCode::InvalidSelfInvite => "You cannot invite yourself",
            ErrorCode::TooManyInvites => "Too many invites in a single request",
            ErrorCode::TeamMembersAlreadyExist => "Team members already exist",
            ErrorCode::NoTeamOwner => "A team must have at least one owner",
            ErrorCode::SubscriptionNotFound => "Subscription not found",
            ErrorCode::SubscriptionAlreadyCanceled => "Subscription is already canceled",
            ErrorCode::IntervalUnchanged => "Billing interval is unchanged",
            ErrorCode::InvalidPayload => "Invalid payload",
            ErrorCode::InvalidSignature => "Invalid signature",
            ErrorCode::NotFound => "Not found",
            ErrorCode::TooManyRequests => "Too many requests",
            ErrorCode::InternalServerError => "Internal server error",
            ErrorCode::NotImplemented => "Not implemented",
            ErrorCode::ServiceUnavailable => "Service unavailable",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Common error type for the Tenantry application
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Unexpected error: {0}")]
    Unexpected(#[from] anyhow::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{code}: {message}")]
    Api { code: ErrorCode, message: String },
}

impl Error {
    /// Classified error with a custom message
    pub fn api(code: ErrorCode, message: impl Into<String>) -> Self {
        Error::Api {
            code,
            message: message.into(),
        }
    }

    /// Get the error code for API responses
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Api { code, .. } => *code,
            Error::Unexpected(_) | Error::Database(_) | Error::Serialization(_) => {
                ErrorCode::InternalServerError
            }
        }
    }

    /// Get the appropriate HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        self.code().status_code()
    }

    /// Message safe to return to the client
    pub fn public_message(&self) -> String {
        match self {
            Error::Api { code, message } if !code.status_code().is_server_error() => {
                message.clone()
            }
            other => other.code().default_message().to_string(),
        }
    }
}

impl From<ErrorCode> for Error {
    fn from(code: ErrorCode) -> Self {
        Error::Api {
            code,
            message: code.default_message().to_string(),
        }
    }
}

/// Failure envelope: `{ "error": string, "code": string, "data"?: any }`
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: ErrorCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Internals are logged, never returned
        if status.is_server_error() {
            tracing::error!(error = %self, "Internal server error");
        }

        let body = ErrorBody {
            error: self.public_message(),
            code: self.code(),
            data: None,
        };

        (status, Json(body)).into_response()
    }
}
