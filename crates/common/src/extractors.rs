//! Custom axum extractors for Tenantry

use axum::{
    body::Bytes,
    extract::{FromRequest, Request},
    response::{IntoResponse, Response},
};
use serde::de::DeserializeOwned;
use validator::Validate;

use crate::{Error, ErrorCode};

/// JSON extractor that validates the deserialized value automatically.
///
/// - Missing or blank body → 400 `empty_body`
/// - Malformed JSON or failed validation → 400 `invalid_request`
#[derive(Debug)]
pub struct ValidatedJson<T>(pub T);

/// Rejection type for `ValidatedJson`
#[derive(Debug)]
pub struct ValidatedJsonRejection(pub Error);

impl IntoResponse for ValidatedJsonRejection {
    fn into_response(self) -> Response {
        self.0.into_response()
    }
}

impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = ValidatedJsonRejection;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|e| ValidatedJsonRejection(Error::api(ErrorCode::InvalidRequest, e.body_text())))?;

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Err(ValidatedJsonRejection(ErrorCode::EmptyBody.into()));
        }

        let value: T = serde_json::from_slice(&bytes).map_err(|e| {
            ValidatedJsonRejection(Error::api(
                ErrorCode::InvalidRequest,
                format!("Invalid JSON: {}", e),
            ))
        })?;

        value.validate().map_err(|e| {
            ValidatedJsonRejection(Error::api(
                ErrorCode::InvalidRequest,
                format!("Validation failed: {}", e),
            ))
        })?;

        Ok(ValidatedJson(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{self, Request as HttpRequest, StatusCode};
    use serde::Deserialize;

    #[derive(Debug, Deserialize, Validate)]
    struct TestPayload {
        #[validate(length(min = 1, max = 10))]
        name: String,
    }

    fn json_request(body: &str) -> HttpRequest<axum::body::Body> {
        HttpRequest::builder()
            .method(http::Method::POST)
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(axum::body::Body::from(body.to_string()))
            .unwrap()
    }

    async fn rejection_code(body: &str) -> ErrorCode {
        let req = json_request(body);
        let err = ValidatedJson::<TestPayload>::from_request(req, &())
            .await
            .unwrap_err();
        assert_eq!(err.0.status_code(), StatusCode::BAD_REQUEST);
        err.0.code()
    }

    #[tokio::test]
    async fn test_validated_json_valid_input() {
        let req = json_request(r#"{"name": "hello"}"#);
        let result = ValidatedJson::<TestPayload>::from_request(req, &()).await;
        assert_eq!(result.unwrap().0.name, "hello");
    }

    #[tokio::test]
    async fn test_validated_json_empty_body() {
        assert_eq!(rejection_code("").await, ErrorCode::EmptyBody);
        assert_eq!(rejection_code("  \n").await, ErrorCode::EmptyBody);
    }

    #[tokio::test]
    async fn test_validated_json_invalid_json() {
        assert_eq!(rejection_code("not json").await, ErrorCode::InvalidRequest);
    }

    #[tokio::test]
    async fn test_validated_json_wrong_type() {
        assert_eq!(
            rejection_code(r#"{"name": 123}"#).await,
            ErrorCode::InvalidRequest
        );
    }

    #[tokio::test]
    async fn test_validated_json_validation_failure() {
        assert_eq!(
            rejection_code(r#"{"name": ""}"#).await,
            ErrorCode::InvalidRequest
        );
    }
}
