//! Success envelope shared by every JSON route
//!
//! `{ "message"?: string, "code"?: string, "data"?: T }`. Each route picks a
//! concrete `T`, so the payload stays typed end to end.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T: Serialize> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn data(data: T) -> Self {
        Self {
            message: None,
            code: None,
            data: Some(data),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl ApiResponse<()> {
    /// Envelope carrying only a message
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            code: None,
            data: None,
        }
    }
}

/// Payload for routes whose only result is where the SPA should go next
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Redirect {
    pub redirect_url: String,
}

impl Redirect {
    pub fn to(url: impl Into<String>) -> ApiResponse<Redirect> {
        ApiResponse::data(Redirect {
            redirect_url: url.into(),
        })
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}
