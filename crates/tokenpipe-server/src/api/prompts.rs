use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::error::ApiError;
use crate::api::AppState;
use crate::generation::coordinator::ActiveGenerationInfo;
use crate::TokenpipeError;

#[derive(Debug, Serialize, Deserialize)]
pub struct QuickPromptRequest {
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QuickPromptResponse {
    pub chat_id: String,
    pub prompt_id: String,
}

/// POST /api/prompts - Create a fresh chat and submit `text` to it
pub async fn quick_prompt(
    State(state): State<AppState>,
    Json(payload): Json<QuickPromptRequest>,
) -> Result<(StatusCode, Json<QuickPromptResponse>), ApiError> {
    if payload.text.trim().is_empty() {
        return Err(TokenpipeError::InvalidRequest("Message is required".into()).into());
    }

    let chat_id = state.chats.create_chat(&state.settings.default_chat_name);
    let prompt = state.chats.submit_prompt(&chat_id, &payload.text)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(QuickPromptResponse {
            chat_id,
            prompt_id: prompt.id,
        }),
    ))
}

/// POST /api/prompts/:prompt_id/stop - Cancel an in-flight generation
pub async fn stop_generation(
    State(state): State<AppState>,
    Path(prompt_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.generations.stop_generation(&prompt_id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/generations - In-flight generations, oldest first
pub async fn list_generations(State(state): State<AppState>) -> Json<Vec<ActiveGenerationInfo>> {
    Json(state.generations.active_generations())
}
