//! Authentication errors

use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::CookieJar;
use tenantry_common::{Error, ErrorCode};

use crate::cookies::clear_session_cookies;

/// Authentication error
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AuthError {
    #[error("missing token")]
    MissingToken,
    #[error("invalid token")]
    InvalidToken,
    /// Credential older than the user's security version, or session revoked
    #[error("session expired")]
    SessionExpired,
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("user deleted")]
    UserDeleted,
    /// Re-scoping to the requested team failed
    #[error("team not found")]
    TeamNotFound,
    #[error("authentication failed: {0}")]
    Internal(String),
}

impl AuthError {
    pub fn code(&self) -> ErrorCode {
        match self {
            AuthError::MissingToken => ErrorCode::MissingToken,
            AuthError::InvalidToken => ErrorCode::InvalidToken,
            AuthError::SessionExpired => ErrorCode::SessionExpired,
            AuthError::Unauthorized => ErrorCode::Unauthorized,
            AuthError::Forbidden => ErrorCode::Forbidden,
            AuthError::UserDeleted => ErrorCode::UserDeleted,
            AuthError::TeamNotFound => ErrorCode::TeamNotFound,
            AuthError::Internal(_) => ErrorCode::InternalServerError,
        }
    }
}

impl From<sqlx::Error> for AuthError {
    fn from(err: sqlx::Error) -> Self {
        AuthError::Internal(err.to_string())
    }
}

impl From<AuthError> for Error {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Internal(detail) => Error::Unexpected(anyhow::anyhow!(detail)),
            other => Error::from(other.code()),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let expired = self == AuthError::SessionExpired;
        let response = Error::from(self).into_response();
        if expired {
            (clear_session_cookies(CookieJar::new()), response).into_response()
        } else {
            response
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{header::SET_COOKIE, StatusCode};

    #[test]
    fn test_auth_error_status_codes() {
        let cases: Vec<(AuthError, StatusCode)> = vec![
            (AuthError::MissingToken, StatusCode::UNAUTHORIZED),
            (AuthError::InvalidToken, StatusCode::UNAUTHORIZED),
            (AuthError::SessionExpired, StatusCode::UNAUTHORIZED),
            (AuthError::Unauthorized, StatusCode::UNAUTHORIZED),
            (AuthError::Forbidden, StatusCode::FORBIDDEN),
            (AuthError::UserDeleted, StatusCode::FORBIDDEN),
            (AuthError::TeamNotFound, StatusCode::NOT_FOUND),
            (
                AuthError::Internal("db down".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, expected_status) in cases {
            let response = error.into_response();
            assert_eq!(response.status(), expected_status);
        }
    }

    #[test]
    fn test_session_expired_clears_cookies() {
        let response = AuthError::SessionExpired.into_response();
        let cleared: Vec<String> = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect();
        assert!(cleared.iter().any(|c| c.starts_with("auth-token=;")));
        assert!(cleared.iter().any(|c| c.starts_with("refresh-token=;")));
    }

    // Kills mutant: only the fence failure touches cookies
    #[test]
    fn test_other_errors_leave_cookies_alone() {
        let response = AuthError::InvalidToken.into_response();
        assert!(response.headers().get(SET_COOKIE).is_none());
    }
}
