use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use tokenpipe_protocol::event_bus::{
    GenerationCompletedData, GenerationStatus, PromptSubmittedData, TokensGeneratedData,
};

use super::source::TokenSource;
use super::GenerationError;
use crate::event_bus::{BusEvent, EventBus, EventHandler, Subscription, Topic};

/// One in-flight generation.
#[derive(Debug)]
struct ActiveGeneration {
    run_id: u64,
    chat_id: String,
    cancel: CancellationToken,
    started_at: DateTime<Utc>,
}

/// Snapshot of an in-flight generation.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ActiveGenerationInfo {
    pub chat_id: String,
    pub prompt_id: String,
    pub started_at: DateTime<Utc>,
}

struct CoordinatorInner {
    bus: EventBus,
    source: Arc<dyn TokenSource>,
    active: Mutex<HashMap<String, ActiveGeneration>>,
    root: CancellationToken,
    next_run: AtomicU64,
}

/// Runs one generation per submitted prompt and publishes its tokens.
///
/// In-flight generations are keyed by prompt id. Every generation ends with
/// exactly one `GenerationCompleted` event, published after its last token.
pub struct GenerationCoordinator {
    inner: Arc<CoordinatorInner>,
    subscription: Mutex<Option<Subscription>>,
}

impl GenerationCoordinator {
    pub fn new(bus: EventBus, source: Arc<dyn TokenSource>) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                bus,
                source,
                active: Mutex::new(HashMap::new()),
                root: CancellationToken::new(),
                next_run: AtomicU64::new(1),
            }),
            subscription: Mutex::new(None),
        }
    }

    /// Subscribe to `PromptSubmitted`. Calling twice keeps a single subscription.
    pub fn start(&self) {
        let mut subscription = self.subscription.lock().unwrap_or_else(|e| e.into_inner());
        if subscription.is_some() {
            debug!("generation coordinator already started");
            return;
        }
        let handler = Arc::new(PromptSubmittedHandler {
            inner: Arc::clone(&self.inner),
        });
        *subscription = Some(self.inner.bus.subscribe(Topic::PromptSubmitted, handler));
        info!("generation coordinator started");
    }

    /// Cancel the generation for `prompt_id`.
    ///
    /// The run still publishes its `GenerationCompleted` (status `cancelled`)
    /// once it has wound down.
    pub fn stop_generation(&self, prompt_id: &str) -> Result<(), GenerationError> {
        let generation = self
            .inner
            .active()
            .remove(prompt_id)
            .ok_or_else(|| GenerationError::NotFound(prompt_id.to_string()))?;

        generation.cancel.cancel();
        info!(
            chat_id = %generation.chat_id,
            prompt_id = %prompt_id,
            "generation stop requested"
        );
        Ok(())
    }

    pub fn is_active(&self, prompt_id: &str) -> bool {
        self.inner.active().contains_key(prompt_id)
    }

    pub fn active_count(&self) -> usize {
        self.inner.active().len()
    }

    pub fn active_generations(&self) -> Vec<ActiveGenerationInfo> {
        let mut generations: Vec<ActiveGenerationInfo> = self
            .inner
            .active()
            .iter()
            .map(|(prompt_id, generation)| ActiveGenerationInfo {
                chat_id: generation.chat_id.clone(),
                prompt_id: prompt_id.clone(),
                started_at: generation.started_at,
            })
            .collect();
        generations.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        generations
    }

    /// Stop accepting prompts and cancel everything in flight.
    pub fn shutdown(&self) {
        let subscription = self
            .subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(subscription) = subscription {
            subscription.unsubscribe();
        }

        self.inner.root.cancel();
        let drained = {
            let mut active = self.inner.active();
            let count = active.len();
            active.clear();
            count
        };
        info!(cancelled = drained, "generation coordinator shut down");
    }
}

impl Drop for GenerationCoordinator {
    fn drop(&mut self) {
        self.inner.root.cancel();
    }
}

struct PromptSubmittedHandler {
    inner: Arc<CoordinatorInner>,
}

#[async_trait]
impl EventHandler for PromptSubmittedHandler {
    async fn handle(&self, event: BusEvent) -> anyhow::Result<()> {
        match event {
            BusEvent::PromptSubmitted(data) => self.inner.begin(data),
            other => debug!(kind = %other.topic(), "coordinator ignoring event"),
        }
        Ok(())
    }
}

enum Outcome {
    Completed,
    Cancelled,
    Failed(String),
}

impl CoordinatorInner {
    fn active(&self) -> MutexGuard<'_, HashMap<String, ActiveGeneration>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn begin(self: &Arc<Self>, data: PromptSubmittedData) {
        if data.chat_id.is_empty() || data.prompt_id.is_empty() {
            warn!(
                chat_id = %data.chat_id,
                prompt_id = %data.prompt_id,
                "dropping prompt with missing identifiers"
            );
            return;
        }
        if self.root.is_cancelled() {
            debug!(prompt_id = %data.prompt_id, "coordinator shut down, ignoring prompt");
            return;
        }

        let cancel = self.root.child_token();
        let run_id = self.next_run.fetch_add(1, Ordering::Relaxed);
        let replaced = self.active().insert(
            data.prompt_id.clone(),
            ActiveGeneration {
                run_id,
                chat_id: data.chat_id.clone(),
                cancel: cancel.clone(),
                started_at: Utc::now(),
            },
        );
        if let Some(previous) = replaced {
            previous.cancel.cancel();
            warn!(prompt_id = %data.prompt_id, "replaced generation already running for prompt");
        }

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            inner.run(run_id, data, cancel).await;
        });
    }

    async fn run(&self, run_id: u64, data: PromptSubmittedData, cancel: CancellationToken) {
        let PromptSubmittedData {
            chat_id,
            prompt_id,
            prompt_text,
        } = data;
        info!(chat_id = %chat_id, prompt_id = %prompt_id, "generation started");

        let mut produced = 0usize;
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            opened = self.source.generate(cancel.clone(), &prompt_text) => Some(opened),
        };

        let outcome = match opened {
            None => Outcome::Cancelled,
            Some(Err(e)) if cancel.is_cancelled() => {
                debug!(prompt_id = %prompt_id, error = %e, "source failed after cancellation");
                Outcome::Cancelled
            }
            Some(Err(e)) => Outcome::Failed(e.to_string()),
            Some(Ok(mut tokens)) => loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break Outcome::Cancelled,
                    next = tokens.next() => next,
                };
                match next {
                    Some(Ok(token)) => {
                        self.bus.publish(BusEvent::TokensGenerated(TokensGeneratedData {
                            chat_id: chat_id.clone(),
                            prompt_id: prompt_id.clone(),
                            response_text: token,
                        }));
                        produced += 1;
                    }
                    Some(Err(_)) if cancel.is_cancelled() => break Outcome::Cancelled,
                    Some(Err(e)) => break Outcome::Failed(e.to_string()),
                    None if cancel.is_cancelled() => break Outcome::Cancelled,
                    None => break Outcome::Completed,
                }
            },
        };

        self.finish(run_id, &prompt_id);

        let (status, error) = match outcome {
            Outcome::Completed => {
                info!(chat_id = %chat_id, prompt_id = %prompt_id, tokens = produced, "generation completed");
                (GenerationStatus::Completed, None)
            }
            Outcome::Cancelled => {
                info!(chat_id = %chat_id, prompt_id = %prompt_id, tokens = produced, "generation cancelled");
                (GenerationStatus::Cancelled, None)
            }
            Outcome::Failed(message) => {
                error!(chat_id = %chat_id, prompt_id = %prompt_id, tokens = produced, error = %message, "generation failed");
                (GenerationStatus::Failed, Some(message))
            }
        };

        self.bus.publish(BusEvent::GenerationCompleted(GenerationCompletedData {
            chat_id,
            prompt_id,
            status,
            error,
        }));
    }

    /// Drop the entry for `prompt_id` unless a newer run has taken its place.
    fn finish(&self, run_id: u64, prompt_id: &str) {
        let mut active = self.active();
        if active.get(prompt_id).map(|g| g.run_id) == Some(run_id) {
            active.remove(prompt_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::*;
    use crate::event_bus::handler_fn;
    use crate::generation::{ScriptedSource, TickerSource};

    fn record(bus: &EventBus) -> (Subscription, mpsc::UnboundedReceiver<BusEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler: Arc<dyn EventHandler> = Arc::new(handler_fn(move |event| {
            let tx = tx.clone();
            async move {
                tx.send(event)?;
                Ok::<(), anyhow::Error>(())
            }
        }));
        let subscription =
            bus.subscribe_topics(&[Topic::TokensGenerated, Topic::GenerationCompleted], handler);
        (subscription, rx)
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<BusEvent>) -> BusEvent {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("channel closed")
    }

    fn submitted(chat_id: &str, prompt_id: &str) -> BusEvent {
        BusEvent::PromptSubmitted(PromptSubmittedData {
            chat_id: chat_id.to_string(),
            prompt_id: prompt_id.to_string(),
            prompt_text: "Say hello".to_string(),
        })
    }

    #[tokio::test]
    async fn test_publishes_tokens_then_completion() {
        let bus = EventBus::new();
        let source = Arc::new(ScriptedSource::new(["He", "llo"]));
        let coordinator = GenerationCoordinator::new(bus.clone(), source.clone());
        coordinator.start();
        let (_sub, mut rx) = record(&bus);

        bus.publish(submitted("c1", "p1"));

        let mut texts = Vec::new();
        for _ in 0..2 {
            match next(&mut rx).await {
                BusEvent::TokensGenerated(data) => {
                    assert_eq!(data.chat_id, "c1");
                    assert_eq!(data.prompt_id, "p1");
                    texts.push(data.response_text);
                }
                other => panic!("unexpected event: {:?}", other),
            }
        }
        assert_eq!(texts, vec!["He", "llo"]);

        match next(&mut rx).await {
            BusEvent::GenerationCompleted(data) => {
                assert_eq!(data.prompt_id, "p1");
                assert_eq!(data.status, GenerationStatus::Completed);
                assert!(data.error.is_none());
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(source.prompts(), vec!["Say hello".to_string()]);
        assert!(!coordinator.is_active("p1"));
    }

    #[tokio::test]
    async fn test_stop_generation_cancels_run() {
        let bus = EventBus::new();
        let source = Arc::new(TickerSource::new(Duration::from_millis(20), 100_000));
        let coordinator = GenerationCoordinator::new(bus.clone(), source);
        coordinator.start();
        let (_sub, mut rx) = record(&bus);

        bus.publish(submitted("c1", "p1"));
        assert!(matches!(next(&mut rx).await, BusEvent::TokensGenerated(_)));
        assert!(coordinator.is_active("p1"));

        coordinator.stop_generation("p1").unwrap();
        assert!(!coordinator.is_active("p1"));

        // At most the token already in flight may still arrive.
        let mut after_stop = 0;
        loop {
            match next(&mut rx).await {
                BusEvent::TokensGenerated(_) => after_stop += 1,
                BusEvent::GenerationCompleted(data) => {
                    assert_eq!(data.status, GenerationStatus::Cancelled);
                    assert!(data.error.is_none());
                    break;
                }
                other => panic!("unexpected event: {:?}", other),
            }
        }
        assert!(after_stop <= 1, "{} tokens after stop", after_stop);

        // The stream is not polled again once cancelled.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());

        assert_eq!(
            coordinator.stop_generation("p1"),
            Err(GenerationError::NotFound("p1".to_string()))
        );
    }

    #[tokio::test]
    async fn test_stop_unknown_prompt() {
        let bus = EventBus::new();
        let coordinator =
            GenerationCoordinator::new(bus, Arc::new(ScriptedSource::new(Vec::<String>::new())));
        let err = coordinator.stop_generation("missing").unwrap_err();
        assert_eq!(
            err.to_string(),
            "generation for prompt missing not found or already completed"
        );
    }

    #[tokio::test]
    async fn test_source_failure_reports_failed_status() {
        let bus = EventBus::new();
        let source = Arc::new(ScriptedSource::new(["partial"]).failing_after_tokens("model crashed"));
        let coordinator = GenerationCoordinator::new(bus.clone(), source);
        coordinator.start();
        let (_sub, mut rx) = record(&bus);

        bus.publish(submitted("c1", "p1"));

        assert!(matches!(next(&mut rx).await, BusEvent::TokensGenerated(_)));
        match next(&mut rx).await {
            BusEvent::GenerationCompleted(data) => {
                assert_eq!(data.status, GenerationStatus::Failed);
                assert_eq!(data.error.as_deref(), Some("token source error: model crashed"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_setup_failure_reports_failed_status() {
        let bus = EventBus::new();
        let source = Arc::new(ScriptedSource::new(["never"]).failing_on_start("no model"));
        let coordinator = GenerationCoordinator::new(bus.clone(), source);
        coordinator.start();
        let (_sub, mut rx) = record(&bus);

        bus.publish(submitted("c1", "p1"));

        match next(&mut rx).await {
            BusEvent::GenerationCompleted(data) => {
                assert_eq!(data.status, GenerationStatus::Failed);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_prompt_is_dropped() {
        let bus = EventBus::new();
        let coordinator =
            GenerationCoordinator::new(bus.clone(), Arc::new(ScriptedSource::new(["x"])));
        coordinator.start();
        let (_sub, mut rx) = record(&bus);

        bus.publish(submitted("c1", ""));
        bus.publish(submitted("c1", "p2"));

        // Only the valid prompt produces events.
        match next(&mut rx).await {
            BusEvent::TokensGenerated(data) => assert_eq!(data.prompt_id, "p2"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_shutdown_cancels_in_flight_and_unsubscribes() {
        let bus = EventBus::new();
        let source = Arc::new(TickerSource::new(Duration::from_millis(5), 100_000));
        let coordinator = GenerationCoordinator::new(bus.clone(), source);
        coordinator.start();
        coordinator.start();
        assert_eq!(bus.subscriber_count(Topic::PromptSubmitted), 1);

        let (_sub, mut rx) = record(&bus);
        bus.publish(submitted("c1", "p1"));
        bus.publish(submitted("c2", "p2"));

        let mut started = std::collections::HashSet::new();
        while started.len() < 2 {
            if let BusEvent::TokensGenerated(data) = next(&mut rx).await {
                started.insert(data.prompt_id);
            }
        }
        assert_eq!(coordinator.active_count(), 2);

        coordinator.shutdown();
        assert_eq!(coordinator.active_count(), 0);
        assert_eq!(bus.subscriber_count(Topic::PromptSubmitted), 0);

        let mut cancelled = 0;
        while cancelled < 2 {
            if let BusEvent::GenerationCompleted(data) = next(&mut rx).await {
                assert_eq!(data.status, GenerationStatus::Cancelled);
                cancelled += 1;
            }
        }
    }
}
