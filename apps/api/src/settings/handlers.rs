use axum::{extract::State, Json};

use crate::errors::AppError;
use crate::generation::prompts::PromptContext;
use crate::settings;
use crate::state::AppState;

/// GET /api/v1/settings
pub async fn handle_get_settings(
    State(state): State<AppState>,
) -> Result<Json<PromptContext>, AppError> {
    Ok(Json(settings::load(state.form_state.as_ref()).await?))
}

/// PUT /api/v1/settings
/// Saves the whole form on every edit; the stored value is what a later GET returns.
pub async fn handle_put_settings(
    State(state): State<AppState>,
    Json(context): Json<PromptContext>,
) -> Result<Json<PromptContext>, AppError> {
    settings::save(state.form_state.as_ref(), &context).await?;
    Ok(Json(context))
}
