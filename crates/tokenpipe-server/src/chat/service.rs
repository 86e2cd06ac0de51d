use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use tokenpipe_protocol::event_bus::{
    ChatCreatedData, ChatDeletedData, ChatRenamedData, GenerationCompletedData,
    GenerationStatus, PromptSubmittedData, TokensGeneratedData,
};

use super::delivery::{LoggedToken, StreamUpdate, TokenLog};
use crate::event_bus::{BusEvent, EventBus, EventHandler, Subscription, Topic};
use crate::models::{Chat, ChatSummary, Prompt};
use crate::store::{ChatStore, StoreResult};

pub const DEFAULT_TOKEN_LOG_CAPACITY: usize = 10_000;

#[derive(Debug, Clone, Copy)]
pub struct ServiceOptions {
    /// Entries kept for cursor replay.
    pub token_log_capacity: usize,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            token_log_capacity: DEFAULT_TOKEN_LOG_CAPACITY,
        }
    }
}

struct ServiceInner {
    store: Arc<ChatStore>,
    bus: EventBus,
    /// Serializes user-facing operations and token appends.
    lock: Mutex<()>,
    updates_tx: Mutex<Option<mpsc::UnboundedSender<StreamUpdate>>>,
    token_log: TokenLog,
}

/// User-facing chat operations.
///
/// Mutates the store, announces each change on the bus, and folds generated
/// tokens back into the store as they arrive. Every accepted token is pushed to
/// the delivery queue and recorded in a [`TokenLog`] for replay.
pub struct ChatService {
    inner: Arc<ServiceInner>,
    subscription: Mutex<Option<Subscription>>,
    updates_rx: Mutex<Option<mpsc::UnboundedReceiver<StreamUpdate>>>,
}

impl ChatService {
    pub fn new(store: Arc<ChatStore>, bus: EventBus, options: ServiceOptions) -> Self {
        // Unbounded: a slow reader must never cost a token or block the store.
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(ServiceInner {
                store,
                bus,
                lock: Mutex::new(()),
                updates_tx: Mutex::new(Some(tx)),
                token_log: TokenLog::new(options.token_log_capacity),
            }),
            subscription: Mutex::new(None),
            updates_rx: Mutex::new(Some(rx)),
        }
    }

    /// Subscribe to generation events. Calling twice keeps a single subscription.
    pub fn start(&self) {
        let mut subscription = self.subscription.lock().unwrap_or_else(|e| e.into_inner());
        if subscription.is_some() {
            debug!("chat service already started");
            return;
        }
        // One mailbox for both topics: a prompt's Finished update always
        // follows its last token.
        let handler = Arc::new(GenerationEventHandler {
            inner: Arc::clone(&self.inner),
        });
        *subscription = Some(self.inner.bus.subscribe_topics(
            &[Topic::TokensGenerated, Topic::GenerationCompleted],
            handler,
        ));
        info!("chat service started");
    }

    /// Hand out the receiving end of the delivery queue. Only the first call gets it.
    pub fn take_updates(&self) -> Option<mpsc::UnboundedReceiver<StreamUpdate>> {
        self.updates_rx.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    pub fn create_chat(&self, name: &str) -> String {
        let _guard = self.inner.serialize();
        let chat_id = self.inner.store.create_chat(name);
        self.inner.bus.publish(BusEvent::ChatCreated(ChatCreatedData {
            chat_id: chat_id.clone(),
            name: name.to_string(),
        }));
        info!(chat_id = %chat_id, name = %name, "chat created");
        chat_id
    }

    pub fn rename_chat(&self, chat_id: &str, new_name: &str) -> StoreResult<()> {
        let _guard = self.inner.serialize();
        self.inner.store.rename_chat(chat_id, new_name)?;
        self.inner.bus.publish(BusEvent::ChatRenamed(ChatRenamedData {
            chat_id: chat_id.to_string(),
            new_name: new_name.to_string(),
        }));
        info!(chat_id = %chat_id, new_name = %new_name, "chat renamed");
        Ok(())
    }

    pub fn delete_chat(&self, chat_id: &str) -> StoreResult<()> {
        let _guard = self.inner.serialize();
        self.inner.store.delete_chat(chat_id)?;
        let forgotten = self.inner.token_log.forget_chat(chat_id);
        self.inner.bus.publish(BusEvent::ChatDeleted(ChatDeletedData {
            chat_id: chat_id.to_string(),
        }));
        info!(chat_id = %chat_id, forgotten_tokens = forgotten, "chat deleted");
        Ok(())
    }

    /// Store the prompt and announce it, which starts its generation.
    pub fn submit_prompt(&self, chat_id: &str, text: &str) -> StoreResult<Prompt> {
        let _guard = self.inner.serialize();
        let prompt = self.inner.store.submit_prompt(chat_id, text)?;
        self.inner.bus.publish(BusEvent::PromptSubmitted(PromptSubmittedData {
            chat_id: chat_id.to_string(),
            prompt_id: prompt.id.clone(),
            prompt_text: prompt.text.clone(),
        }));
        info!(chat_id = %chat_id, prompt_id = %prompt.id, "prompt submitted");
        Ok(prompt)
    }

    pub fn get_chat(&self, chat_id: &str) -> StoreResult<Chat> {
        self.inner.store.get_chat(chat_id)
    }

    pub fn list_chats(&self) -> Vec<ChatSummary> {
        self.inner.store.list_chats()
    }

    pub fn aggregated_text(&self, chat_id: &str, prompt_id: &str) -> StoreResult<String> {
        self.inner.store.aggregated_text(chat_id, prompt_id)
    }

    /// Replay accepted tokens of a prompt after `cursor`.
    ///
    /// Fails if the chat or prompt no longer exists.
    pub fn tokens_since(
        &self,
        chat_id: &str,
        prompt_id: &str,
        cursor: u64,
    ) -> StoreResult<Vec<LoggedToken>> {
        self.inner.store.ensure_prompt(chat_id, prompt_id)?;
        Ok(self.inner.token_log.tokens_since(chat_id, prompt_id, cursor))
    }

    pub fn latest_cursor(&self) -> u64 {
        self.inner.token_log.latest_cursor()
    }

    /// Unsubscribe and close the delivery queue.
    ///
    /// Updates already queued stay readable; the receiver then sees the end
    /// of the stream.
    pub fn shutdown(&self) {
        let subscription = self
            .subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(subscription) = subscription {
            subscription.unsubscribe();
        }
        self.inner
            .updates_tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        info!("chat service shut down");
    }
}

impl ServiceInner {
    fn serialize(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn on_tokens(&self, data: TokensGeneratedData) {
        // Append and record under one guard: a concurrent delete_chat either
        // purges the logged entry or makes the append fail.
        let recorded = {
            let _guard = self.serialize();
            self.store
                .append_response(&data.chat_id, &data.prompt_id, &data.response_text)
                .map(|_| {
                    self.token_log
                        .record(&data.chat_id, &data.prompt_id, &data.response_text)
                })
        };

        let cursor = match recorded {
            Ok(cursor) => cursor,
            Err(e) => {
                warn!(
                    chat_id = %data.chat_id,
                    prompt_id = %data.prompt_id,
                    error = %e,
                    "dropping generated token"
                );
                return;
            }
        };

        self.deliver(StreamUpdate::Token {
            cursor,
            chat_id: data.chat_id,
            prompt_id: data.prompt_id,
            text: data.response_text,
        });
    }

    fn on_completed(&self, data: GenerationCompletedData) {
        if data.status == GenerationStatus::Failed {
            warn!(
                chat_id = %data.chat_id,
                prompt_id = %data.prompt_id,
                error = data.error.as_deref().unwrap_or("unknown"),
                "generation failed"
            );
        }
        self.deliver(StreamUpdate::Finished {
            chat_id: data.chat_id,
            prompt_id: data.prompt_id,
            status: data.status,
            error: data.error,
        });
    }

    /// Never blocks. Updates are only discarded once the queue is shut down.
    fn deliver(&self, update: StreamUpdate) {
        let tx = self
            .updates_tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let Some(tx) = tx else {
            debug!(prompt_id = %update.prompt_id(), "delivery queue closed, update discarded");
            return;
        };

        if let Err(mpsc::error::SendError(update)) = tx.send(update) {
            debug!(prompt_id = %update.prompt_id(), "delivery receiver gone, update discarded");
        }
    }
}

struct GenerationEventHandler {
    inner: Arc<ServiceInner>,
}

#[async_trait]
impl EventHandler for GenerationEventHandler {
    async fn handle(&self, event: BusEvent) -> anyhow::Result<()> {
        match event {
            BusEvent::TokensGenerated(data) => self.inner.on_tokens(data),
            BusEvent::GenerationCompleted(data) => self.inner.on_completed(data),
            other => debug!(kind = %other.topic(), "chat service ignoring event"),
        }
        Ok(())
    }
}
