//! Prompt handlers

use axum::extract::{Path, State};
use tenantry_auth::AuthUser;
use tenantry_common::{ApiResponse, Error, ErrorCode, Result};
use uuid::Uuid;

use crate::api::middleware::TeamsState;
use crate::domain::entities::Prompt;

/// Dismiss a prompt
///
/// **PATCH /prompts/{id}/dismiss**
///
/// Dismissing twice keeps the first timestamp. Non-dismissible prompts answer
/// `invalid_request`.
pub async fn dismiss_prompt(
    State(state): State<TeamsState>,
    AuthUser(ctx): AuthUser,
    Path(prompt_id): Path<Uuid>,
) -> Result<ApiResponse<Prompt>> {
    let prompt = state
        .repos
        .prompts
        .get(ctx.user_id(), prompt_id)
        .await?
        .ok_or(ErrorCode::NotFound)?;

    prompt
        .check_dismiss()
        .map_err(|e| Error::api(ErrorCode::InvalidRequest, e.to_string()))?;

    let dismissed = state
        .repos
        .prompts
        .dismiss(ctx.user_id(), prompt.id)
        .await?
        .ok_or(ErrorCode::NotFound)?;

    tracing::debug!(user_id = %ctx.user_id(), prompt_id = %dismissed.id, "Prompt dismissed");
    Ok(ApiResponse::data(dismissed))
}
