use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use tokio_util::sync::CancellationToken;

use super::GenerationError;

/// Lazy sequence of generated tokens. Ends when the source is done or cancelled.
pub type TokenStream = BoxStream<'static, Result<String, GenerationError>>;

/// Token-producing capability (the language model, seen from the pipeline).
///
/// Implementations must watch `cancel` and stop yielding promptly once it fires.
/// Setup problems are returned from `generate`; problems mid-stream are yielded
/// as an `Err` item, after which the stream should end.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn generate(
        &self,
        cancel: CancellationToken,
        prompt: &str,
    ) -> Result<TokenStream, GenerationError>;
}

// ============================================================================
// Ticker source
// ============================================================================

/// Emits `Token-1` .. `Token-N`, waiting `interval` between tokens.
#[derive(Debug, Clone)]
pub struct TickerSource {
    pub interval: Duration,
    pub total_tokens: usize,
}

impl TickerSource {
    pub fn new(interval: Duration, total_tokens: usize) -> Self {
        Self {
            interval,
            total_tokens,
        }
    }
}

#[async_trait]
impl TokenSource for TickerSource {
    async fn generate(
        &self,
        cancel: CancellationToken,
        _prompt: &str,
    ) -> Result<TokenStream, GenerationError> {
        let interval = self.interval;
        let total = self.total_tokens;

        let tokens = stream::unfold(1usize, move |i| {
            let cancel = cancel.clone();
            async move {
                if i > total {
                    return None;
                }
                if i > 1 {
                    tokio::select! {
                        _ = cancel.cancelled() => return None,
                        _ = tokio::time::sleep(interval) => {}
                    }
                }
                if cancel.is_cancelled() {
                    return None;
                }
                Some((Ok(format!("Token-{}", i)), i + 1))
            }
        });

        Ok(tokens.boxed())
    }
}

// ============================================================================
// Scripted source
// ============================================================================

/// Replays a fixed token list; used by tests and demos.
#[derive(Debug, Default)]
pub struct ScriptedSource {
    tokens: Vec<String>,
    delay: Duration,
    setup_error: Option<String>,
    trailing_error: Option<String>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedSource {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tokens: tokens.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Wait `delay` before each token.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail in `generate` itself, before any token.
    pub fn failing_on_start(mut self, message: impl Into<String>) -> Self {
        self.setup_error = Some(message.into());
        self
    }

    /// Yield an error after the scripted tokens.
    pub fn failing_after_tokens(mut self, message: impl Into<String>) -> Self {
        self.trailing_error = Some(message.into());
        self
    }

    /// Prompt texts this source has been asked to generate for, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl TokenSource for ScriptedSource {
    async fn generate(
        &self,
        cancel: CancellationToken,
        prompt: &str,
    ) -> Result<TokenStream, GenerationError> {
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(prompt.to_string());

        if let Some(message) = &self.setup_error {
            return Err(GenerationError::Source(message.clone()));
        }

        let mut items: Vec<Result<String, GenerationError>> =
            self.tokens.iter().cloned().map(Ok).collect();
        if let Some(message) = &self.trailing_error {
            items.push(Err(GenerationError::Source(message.clone())));
        }

        let delay = self.delay;
        let tokens = stream::unfold(items.into_iter(), move |mut items| {
            let cancel = cancel.clone();
            async move {
                if !delay.is_zero() {
                    tokio::select! {
                        _ = cancel.cancelled() => return None,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                if cancel.is_cancelled() {
                    return None;
                }
                items.next().map(|item| (item, items))
            }
        });

        Ok(tokens.boxed())
    }
}
