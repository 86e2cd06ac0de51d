pub mod api;
pub mod app;
pub mod chat;
pub mod config;
pub mod event_bus;
pub mod generation;
pub mod models;
pub mod store;

use axum::http::StatusCode;
use thiserror::Error;

use tokenpipe_protocol::EventError;

use crate::generation::GenerationError;
use crate::store::StoreError;

pub use app::Pipeline;

// ============================================================================
// Error types
// ============================================================================

#[derive(Error, Debug)]
pub enum TokenpipeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ::config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid event: {0}")]
    Event(#[from] EventError),

    #[error("Delivery queue already claimed")]
    DeliveryClaimed,
}

pub type Result<T> = std::result::Result<T, TokenpipeError>;

impl TokenpipeError {
    pub fn to_status_code(&self) -> StatusCode {
        match self {
            TokenpipeError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            TokenpipeError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            TokenpipeError::Store(_) => StatusCode::NOT_FOUND,
            TokenpipeError::Generation(GenerationError::NotFound(_)) => StatusCode::NOT_FOUND,
            TokenpipeError::Generation(GenerationError::Source(_)) => StatusCode::BAD_GATEWAY,
            TokenpipeError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            TokenpipeError::Event(_) => StatusCode::BAD_REQUEST,
            TokenpipeError::DeliveryClaimed => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
