pub mod chats;
pub mod error;
pub mod events;
pub mod prompts;
pub mod stream;

use std::sync::Arc;

use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tokio::sync::{mpsc, Mutex};

use crate::app::Pipeline;
use crate::chat::{ChatService, StreamUpdate};
use crate::config::Settings;
use crate::event_bus::EventBus;
use crate::generation::GenerationCoordinator;
use crate::TokenpipeError;

// ============================================================================
// Application state
// ============================================================================

#[derive(Clone)]
pub struct AppState {
    pub chats: Arc<ChatService>,
    pub generations: Arc<GenerationCoordinator>,
    pub bus: EventBus,
    /// Single consumer of the delivery queue, shared by stream connections.
    pub updates: Arc<Mutex<mpsc::UnboundedReceiver<StreamUpdate>>>,
    pub settings: Settings,
}

impl AppState {
    pub fn new(pipeline: &Pipeline, settings: Settings) -> crate::Result<Self> {
        let updates = pipeline
            .chats
            .take_updates()
            .ok_or(TokenpipeError::DeliveryClaimed)?;
        Ok(Self {
            chats: pipeline.chats.clone(),
            generations: pipeline.generations.clone(),
            bus: pipeline.bus.clone(),
            updates: Arc::new(Mutex::new(updates)),
            settings,
        })
    }
}

// ============================================================================
// Routes
// ============================================================================

async fn health_check() -> Response {
    Json(json!({"status": "ok"})).into_response()
}

pub fn router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/api", get(health_check))
        // Chat routes
        .route("/api/chats", get(chats::list_chats).post(chats::create_chat))
        .route(
            "/api/chats/:chat_id",
            get(chats::get_chat)
                .put(chats::rename_chat)
                .delete(chats::delete_chat),
        )
        .route("/api/chats/:chat_id/prompts", post(chats::submit_prompt))
        .route(
            "/api/chats/:chat_id/prompts/:prompt_id/text",
            get(chats::get_aggregated_text),
        )
        .route(
            "/api/chats/:chat_id/prompts/:prompt_id/tokens",
            get(chats::get_tokens),
        )
        // Generation routes
        .route("/api/prompts", post(prompts::quick_prompt))
        .route("/api/prompts/:prompt_id/stop", post(prompts::stop_generation))
        .route("/api/generations", get(prompts::list_generations))
        // Raw event ingress
        .route("/api/events", post(events::publish_event))
        // Live token stream (SSE)
        .route("/api/stream", get(stream::stream_updates))
        .with_state(state)
}
