//! In-memory chat store.
//!
//! Owns every chat, prompt and response. All access goes through the methods
//! below, serialized by one mutex over the whole map; callers only ever get
//! cloned snapshots back.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{Chat, ChatSummary, Prompt, Response};

// ============================================================================
// Collaborators
// ============================================================================

/// Produces collision-free opaque identifiers for chats, prompts and responses.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> String;
}

/// Wall clock used for creation/update stamping.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn next_id(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("chat not found: {0}")]
    ChatNotFound(String),

    #[error("prompt {prompt_id} not found in chat {chat_id}")]
    PromptNotFound { chat_id: String, prompt_id: String },
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

// ============================================================================
// Chat store
// ============================================================================

pub struct ChatStore {
    chats: Mutex<HashMap<String, Chat>>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
}

impl ChatStore {
    pub fn new() -> Self {
        Self::with_collaborators(Arc::new(UuidGenerator), Arc::new(SystemClock))
    }

    pub fn with_collaborators(ids: Arc<dyn IdGenerator>, clock: Arc<dyn Clock>) -> Self {
        Self {
            chats: Mutex::new(HashMap::new()),
            ids,
            clock,
        }
    }

    /// The map stays consistent between statements, so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Chat>> {
        self.chats.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create an empty chat and return its id. Never fails.
    pub fn create_chat(&self, name: &str) -> String {
        let id = self.ids.next_id();
        let chat = Chat::new(id.clone(), name.to_string(), self.clock.now());
        self.lock().insert(id.clone(), chat);
        id
    }

    pub fn rename_chat(&self, chat_id: &str, new_name: &str) -> StoreResult<()> {
        let now = self.clock.now();
        let mut chats = self.lock();
        let chat = chats
            .get_mut(chat_id)
            .ok_or_else(|| StoreError::ChatNotFound(chat_id.to_string()))?;
        chat.name = new_name.to_string();
        chat.updated_at = now;
        Ok(())
    }

    /// Remove a chat together with all its prompts and responses.
    pub fn delete_chat(&self, chat_id: &str) -> StoreResult<()> {
        self.lock()
            .remove(chat_id)
            .map(|_| ())
            .ok_or_else(|| StoreError::ChatNotFound(chat_id.to_string()))
    }

    /// Append a new prompt to the chat and return a snapshot of it.
    ///
    /// An unknown chat leaves the store untouched.
    pub fn submit_prompt(&self, chat_id: &str, text: &str) -> StoreResult<Prompt> {
        let now = self.clock.now();
        let mut chats = self.lock();
        let chat = chats
            .get_mut(chat_id)
            .ok_or_else(|| StoreError::ChatNotFound(chat_id.to_string()))?;

        let prompt = Prompt::new(self.ids.next_id(), text.to_string(), now);
        chat.prompts.push(prompt.clone());
        chat.updated_at = now;
        Ok(prompt)
    }

    /// Append a response to a prompt, bumping both prompt and chat update times.
    pub fn append_response(
        &self,
        chat_id: &str,
        prompt_id: &str,
        text: &str,
    ) -> StoreResult<Response> {
        let now = self.clock.now();
        let mut chats = self.lock();
        let chat = chats
            .get_mut(chat_id)
            .ok_or_else(|| StoreError::ChatNotFound(chat_id.to_string()))?;
        let prompt = chat
            .prompt_mut(prompt_id)
            .ok_or_else(|| StoreError::PromptNotFound {
                chat_id: chat_id.to_string(),
                prompt_id: prompt_id.to_string(),
            })?;

        let response = Response {
            id: self.ids.next_id(),
            text: text.to_string(),
            created_at: now,
        };
        prompt.responses.push(response.clone());
        prompt.updated_at = now;
        chat.updated_at = now;
        Ok(response)
    }

    pub fn get_chat(&self, chat_id: &str) -> StoreResult<Chat> {
        self.lock()
            .get(chat_id)
            .cloned()
            .ok_or_else(|| StoreError::ChatNotFound(chat_id.to_string()))
    }

    /// Fails unless `prompt_id` belongs to `chat_id`. Copies nothing.
    pub fn ensure_prompt(&self, chat_id: &str, prompt_id: &str) -> StoreResult<()> {
        let chats = self.lock();
        let chat = chats
            .get(chat_id)
            .ok_or_else(|| StoreError::ChatNotFound(chat_id.to_string()))?;
        match chat.prompt(prompt_id) {
            Some(_) => Ok(()),
            None => Err(StoreError::PromptNotFound {
                chat_id: chat_id.to_string(),
                prompt_id: prompt_id.to_string(),
            }),
        }
    }

    /// Concatenated response texts of a prompt, in arrival order.
    pub fn aggregated_text(&self, chat_id: &str, prompt_id: &str) -> StoreResult<String> {
        let chats = self.lock();
        let chat = chats
            .get(chat_id)
            .ok_or_else(|| StoreError::ChatNotFound(chat_id.to_string()))?;
        chat.prompt(prompt_id)
            .map(Prompt::aggregated_text)
            .ok_or_else(|| StoreError::PromptNotFound {
                chat_id: chat_id.to_string(),
                prompt_id: prompt_id.to_string(),
            })
    }

    /// Chat summaries, most recently updated first.
    pub fn list_chats(&self) -> Vec<ChatSummary> {
        let mut summaries: Vec<ChatSummary> = self.lock().values().map(Chat::summary).collect();
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        summaries
    }

    pub fn chat_count(&self) -> usize {
        self.lock().len()
    }
}

impl Default for ChatStore {
    fn default() -> Self {
        Self::new()
    }
}
