//! API key management handlers
//!
//! - GET /tokens         - List the caller's keys
//! - POST /tokens        - Create a key; the raw value is returned once
//! - DELETE /tokens/{id} - Revoke a key

use axum::{
    extract::{Path, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tenantry_auth::{AuthUser, SessionUser, API_KEY_LOOKUP_LEN, API_KEY_PREFIX};
use tenantry_common::{crypto, ApiResponse, Error, ErrorCode, Result, ValidatedJson};
use uuid::Uuid;
use validator::Validate;

use crate::api::middleware::TeamsState;
use crate::domain::entities::ApiKey;

/// Random bytes behind every raw key
const API_KEY_ENTROPY_BYTES: usize = 24;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateTokenRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Creation response; `key` is never shown again
#[derive(Debug, Serialize)]
pub struct CreatedTokenResponse {
    pub api_key: ApiKey,
    pub key: String,
}

/// `tnt_` followed by hex-encoded random bytes
pub fn generate_raw_key() -> String {
    format!(
        "{API_KEY_PREFIX}{}",
        hex::encode(crypto::random_bytes::<API_KEY_ENTROPY_BYTES>())
    )
}

/// **GET /tokens**
pub async fn list_tokens(
    State(state): State<TeamsState>,
    AuthUser(ctx): AuthUser,
) -> Result<ApiResponse<Vec<ApiKey>>> {
    let keys = state.repos.api_keys.list_for_user(ctx.user_id()).await?;
    Ok(ApiResponse::data(keys))
}

/// **POST /tokens**
///
/// Only a browser session may mint keys; a key cannot create another key.
pub async fn create_token(
    State(state): State<TeamsState>,
    SessionUser(ctx): SessionUser,
    ValidatedJson(request): ValidatedJson<CreateTokenRequest>,
) -> Result<(StatusCode, ApiResponse<CreatedTokenResponse>)> {
    if let Some(expires_at) = request.expires_at {
        if expires_at <= Utc::now() {
            return Err(Error::api(
                ErrorCode::InvalidRequest,
                "expires_at must be in the future",
            ));
        }
    }

    let raw_key = generate_raw_key();
    let api_key = state
        .repos
        .api_keys
        .create(
            ctx.user_id(),
            request.name.trim(),
            &raw_key[..API_KEY_LOOKUP_LEN],
            &crypto::hash_key(&raw_key),
            request.expires_at,
        )
        .await?;

    tracing::info!(user_id = %ctx.user_id(), api_key_id = %api_key.id, "API key created");

    Ok((
        StatusCode::CREATED,
        ApiResponse::data(CreatedTokenResponse {
            api_key,
            key: raw_key,
        }),
    ))
}

/// **DELETE /tokens/{id}**
pub async fn revoke_token(
    State(state): State<TeamsState>,
    SessionUser(ctx): SessionUser,
    Path(key_id): Path<Uuid>,
) -> Result<ApiResponse<()>> {
    state
        .repos
        .api_keys
        .revoke(ctx.user_id(), key_id)
        .await?
        .ok_or(ErrorCode::NotFound)?;

    tracing::info!(user_id = %ctx.user_id(), api_key_id = %key_id, "API key revoked");
    Ok(ApiResponse::message("API key revoked"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_key_shape() {
        let key = generate_raw_key();
        assert!(key.starts_with(API_KEY_PREFIX));
        assert_eq!(key.len(), API_KEY_PREFIX.len() + API_KEY_ENTROPY_BYTES * 2);
        assert!(key.len() > API_KEY_LOOKUP_LEN);
        assert_ne!(generate_raw_key(), key);
    }

    #[test]
    fn test_raw_key_verifies_against_stored_hash() {
        let key = generate_raw_key();
        let stored = crypto::hash_key(&key);
        assert!(crypto::verify_key_hash(&key, &stored));
        assert!(!crypto::verify_key_hash(&generate_raw_key(), &stored));
    }

    #[test]
    fn test_create_request_validation() {
        let ok = CreateTokenRequest {
            name: "ci".to_string(),
            expires_at: None,
        };
        assert!(ok.validate().is_ok());
        let empty = CreateTokenRequest {
            name: String::new(),
            expires_at: None,
        };
        assert!(empty.validate().is_err());
    }
}
