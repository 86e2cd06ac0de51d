use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::error::ApiError;
use crate::api::AppState;
use crate::chat::LoggedToken;
use crate::models::{Chat, ChatSummary, Prompt};
use crate::TokenpipeError;

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateChatRequest {
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateChatResponse {
    pub chat_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RenameChatRequest {
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitPromptRequest {
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AggregatedTextResponse {
    pub chat_id: String,
    pub prompt_id: String,
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct TokensQuery {
    /// Return tokens after this cursor (exclusive)
    #[serde(default)]
    pub cursor: u64,
}

#[derive(Debug, Serialize)]
pub struct TokensResponse {
    pub tokens: Vec<LoggedToken>,
    /// Pass back as `cursor` to continue
    pub next_cursor: u64,
}

/// GET /api/chats - List chats, most recently updated first
pub async fn list_chats(State(state): State<AppState>) -> Json<Vec<ChatSummary>> {
    Json(state.chats.list_chats())
}

/// POST /api/chats - Create a chat
pub async fn create_chat(
    State(state): State<AppState>,
    Json(payload): Json<CreateChatRequest>,
) -> Result<(StatusCode, Json<CreateChatResponse>), ApiError> {
    if payload.name.trim().is_empty() {
        return Err(TokenpipeError::InvalidRequest("Chat name is required".into()).into());
    }
    let chat_id = state.chats.create_chat(&payload.name);
    Ok((StatusCode::CREATED, Json(CreateChatResponse { chat_id })))
}

/// GET /api/chats/:chat_id - Full chat with prompts and responses
pub async fn get_chat(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
) -> Result<Json<Chat>, ApiError> {
    Ok(Json(state.chats.get_chat(&chat_id)?))
}

/// PUT /api/chats/:chat_id - Rename a chat
pub async fn rename_chat(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    Json(payload): Json<RenameChatRequest>,
) -> Result<StatusCode, ApiError> {
    if payload.name.trim().is_empty() {
        return Err(TokenpipeError::InvalidRequest("Chat name is required".into()).into());
    }
    state.chats.rename_chat(&chat_id, &payload.name)?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/chats/:chat_id
pub async fn delete_chat(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.chats.delete_chat(&chat_id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/chats/:chat_id/prompts - Submit a prompt and start generating
pub async fn submit_prompt(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    Json(payload): Json<SubmitPromptRequest>,
) -> Result<(StatusCode, Json<Prompt>), ApiError> {
    if payload.text.trim().is_empty() {
        return Err(TokenpipeError::InvalidRequest("Message is required".into()).into());
    }
    let prompt = state.chats.submit_prompt(&chat_id, &payload.text)?;
    Ok((StatusCode::CREATED, Json(prompt)))
}

/// GET /api/chats/:chat_id/prompts/:prompt_id/text - Responses joined in order
pub async fn get_aggregated_text(
    State(state): State<AppState>,
    Path((chat_id, prompt_id)): Path<(String, String)>,
) -> Result<Json<AggregatedTextResponse>, ApiError> {
    let text = state.chats.aggregated_text(&chat_id, &prompt_id)?;
    Ok(Json(AggregatedTextResponse {
        chat_id,
        prompt_id,
        text,
    }))
}

/// GET /api/chats/:chat_id/prompts/:prompt_id/tokens?cursor=N - Replay tokens
pub async fn get_tokens(
    State(state): State<AppState>,
    Path((chat_id, prompt_id)): Path<(String, String)>,
    Query(query): Query<TokensQuery>,
) -> Result<Json<TokensResponse>, ApiError> {
    let tokens = state.chats.tokens_since(&chat_id, &prompt_id, query.cursor)?;
    let next_cursor = tokens.last().map(|t| t.cursor).unwrap_or(query.cursor);
    Ok(Json(TokensResponse {
        tokens,
        next_cursor,
    }))
}
