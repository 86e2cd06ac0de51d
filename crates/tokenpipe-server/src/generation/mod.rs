// Generation
//
// Turns submitted prompts into streams of TokensGenerated events and reports
// how each generation ended.

pub mod coordinator;
pub mod ollama;
pub mod source;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

pub use coordinator::GenerationCoordinator;
pub use ollama::OllamaSource;
pub use source::{ScriptedSource, TickerSource, TokenSource, TokenStream};

use crate::config::SourceConfig;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    #[error("generation for prompt {0} not found or already completed")]
    NotFound(String),

    #[error("token source error: {0}")]
    Source(String),
}

/// Builds the token source selected in configuration.
pub fn source_from_config(config: &SourceConfig) -> Arc<dyn TokenSource> {
    match config {
        SourceConfig::Ticker {
            interval_ms,
            total_tokens,
        } => Arc::new(TickerSource::new(
            Duration::from_millis(*interval_ms),
            *total_tokens,
        )),
        SourceConfig::Ollama {
            base_url,
            model,
            temperature,
        } => Arc::new(OllamaSource::new(base_url, model, *temperature)),
    }
}
