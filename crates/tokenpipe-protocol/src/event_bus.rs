//! Structured event bus message definitions.
//!
//! Every topic carried by the in-process bus has a typed payload defined here,
//! so the server, the HTTP layer and tests agree on one wire shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Event Kind Constants
// ============================================================================

/// Event kind constants following the format: `<category>.<action>`
pub struct EventKind;

impl EventKind {
    // Chat lifecycle
    pub const CHAT_CREATED: &str = "chat.created";
    pub const CHAT_RENAMED: &str = "chat.renamed";
    pub const CHAT_DELETED: &str = "chat.deleted";

    // Prompt processing
    pub const PROMPT_SUBMITTED: &str = "prompt.submitted";
    pub const TOKENS_GENERATED: &str = "tokens.generated";
    pub const GENERATION_COMPLETED: &str = "generation.completed";
}

// ============================================================================
// Topic
// ============================================================================

/// Named event category on the bus. One topic per [`BusEvent`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    ChatCreated,
    ChatRenamed,
    ChatDeleted,
    PromptSubmitted,
    TokensGenerated,
    GenerationCompleted,
}

impl Topic {
    pub const ALL: [Topic; 6] = [
        Topic::ChatCreated,
        Topic::ChatRenamed,
        Topic::ChatDeleted,
        Topic::PromptSubmitted,
        Topic::TokensGenerated,
        Topic::GenerationCompleted,
    ];

    /// The kind string used on the wire for this topic.
    pub fn kind(&self) -> &'static str {
        match self {
            Topic::ChatCreated => EventKind::CHAT_CREATED,
            Topic::ChatRenamed => EventKind::CHAT_RENAMED,
            Topic::ChatDeleted => EventKind::CHAT_DELETED,
            Topic::PromptSubmitted => EventKind::PROMPT_SUBMITTED,
            Topic::TokensGenerated => EventKind::TOKENS_GENERATED,
            Topic::GenerationCompleted => EventKind::GENERATION_COMPLETED,
        }
    }

    pub fn from_kind(kind: &str) -> Option<Self> {
        Topic::ALL.into_iter().find(|t| t.kind() == kind)
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.kind())
    }
}

// ============================================================================
// Chat Data Structures
// ============================================================================

/// Data for chat.created event - emitted when a new chat is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCreatedData {
    /// Identifier of the new chat.
    pub chat_id: String,
    /// Display name given at creation.
    pub name: String,
}

/// Data for chat.renamed event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRenamedData {
    pub chat_id: String,
    pub new_name: String,
}

/// Data for chat.deleted event. The chat and all its prompts are gone when this is seen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatDeletedData {
    pub chat_id: String,
}

// ============================================================================
// Prompt Data Structures
// ============================================================================

/// Data for prompt.submitted event - emitted after a prompt has been stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptSubmittedData {
    /// Chat owning the prompt.
    pub chat_id: String,
    /// Identifier of the stored prompt.
    pub prompt_id: String,
    /// Prompt text handed to the token source.
    pub prompt_text: String,
}

/// Data for tokens.generated event - one event per token, in source order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokensGeneratedData {
    pub chat_id: String,
    pub prompt_id: String,
    /// The token (or token batch) text.
    pub response_text: String,
}

/// Terminal state of a generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStatus {
    /// The source finished on its own.
    Completed,
    /// Stopped through an explicit stop request or shutdown.
    Cancelled,
    /// The source reported an error.
    Failed,
}

/// Data for generation.completed event - emitted exactly once per generation,
/// after its last tokens.generated event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationCompletedData {
    pub chat_id: String,
    pub prompt_id: String,
    pub status: GenerationStatus,
    /// Source error message, set only when `status` is `failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// Bus Event
// ============================================================================

/// Typed event carried by the bus.
///
/// The enum is serialized with `#[serde(tag = "kind", content = "data")]`,
/// producing JSON like: `{"kind": "prompt.submitted", "data": {...}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data")]
pub enum BusEvent {
    #[serde(rename = "chat.created")]
    ChatCreated(ChatCreatedData),
    #[serde(rename = "chat.renamed")]
    ChatRenamed(ChatRenamedData),
    #[serde(rename = "chat.deleted")]
    ChatDeleted(ChatDeletedData),
    #[serde(rename = "prompt.submitted")]
    PromptSubmitted(PromptSubmittedData),
    #[serde(rename = "tokens.generated")]
    TokensGenerated(TokensGeneratedData),
    #[serde(rename = "generation.completed")]
    GenerationCompleted(GenerationCompletedData),
}

/// Errors raised while decoding events from their wire form.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("unknown event kind: {0}")]
    UnknownKind(String),
    #[error("invalid payload for {kind}: {message}")]
    InvalidPayload { kind: String, message: String },
}

impl BusEvent {
    pub fn topic(&self) -> Topic {
        match self {
            BusEvent::ChatCreated(_) => Topic::ChatCreated,
            BusEvent::ChatRenamed(_) => Topic::ChatRenamed,
            BusEvent::ChatDeleted(_) => Topic::ChatDeleted,
            BusEvent::PromptSubmitted(_) => Topic::PromptSubmitted,
            BusEvent::TokensGenerated(_) => Topic::TokensGenerated,
            BusEvent::GenerationCompleted(_) => Topic::GenerationCompleted,
        }
    }

    /// Chat this event refers to. Every topic is chat-scoped.
    pub fn chat_id(&self) -> &str {
        match self {
            BusEvent::ChatCreated(d) => &d.chat_id,
            BusEvent::ChatRenamed(d) => &d.chat_id,
            BusEvent::ChatDeleted(d) => &d.chat_id,
            BusEvent::PromptSubmitted(d) => &d.chat_id,
            BusEvent::TokensGenerated(d) => &d.chat_id,
            BusEvent::GenerationCompleted(d) => &d.chat_id,
        }
    }

    /// Build a typed event from a kind string and an untyped payload.
    ///
    /// This is the single place where shapes are checked at runtime; payloads
    /// missing required fields are rejected with [`EventError::InvalidPayload`].
    pub fn from_parts(kind: &str, data: Value) -> Result<Self, EventError> {
        let topic = Topic::from_kind(kind).ok_or_else(|| EventError::UnknownKind(kind.to_string()))?;
        let invalid = |e: serde_json::Error| EventError::InvalidPayload {
            kind: kind.to_string(),
            message: e.to_string(),
        };
        let event = match topic {
            Topic::ChatCreated => BusEvent::ChatCreated(serde_json::from_value(data).map_err(invalid)?),
            Topic::ChatRenamed => BusEvent::ChatRenamed(serde_json::from_value(data).map_err(invalid)?),
            Topic::ChatDeleted => BusEvent::ChatDeleted(serde_json::from_value(data).map_err(invalid)?),
            Topic::PromptSubmitted => {
                BusEvent::PromptSubmitted(serde_json::from_value(data).map_err(invalid)?)
            }
            Topic::TokensGenerated => {
                BusEvent::TokensGenerated(serde_json::from_value(data).map_err(invalid)?)
            }
            Topic::GenerationCompleted => {
                BusEvent::GenerationCompleted(serde_json::from_value(data).map_err(invalid)?)
            }
        };
        Ok(event)
    }

    /// Parse an event from its JSON wire form.
    pub fn from_json(json: &str) -> Result<Self, EventError> {
        #[derive(Deserialize)]
        struct Raw {
            kind: String,
            #[serde(default)]
            data: Value,
        }

        let raw: Raw = serde_json::from_str(json).map_err(|e| EventError::InvalidPayload {
            kind: String::new(),
            message: e.to_string(),
        })?;
        Self::from_parts(&raw.kind, raw.data)
    }

    /// Extract kind and data, the flat representation used for logging and replay.
    pub fn into_parts(self) -> (String, Value) {
        let kind = self.topic().kind().to_string();
        let data = match self {
            BusEvent::ChatCreated(d) => serde_json::to_value(d),
            BusEvent::ChatRenamed(d) => serde_json::to_value(d),
            BusEvent::ChatDeleted(d) => serde_json::to_value(d),
            BusEvent::PromptSubmitted(d) => serde_json::to_value(d),
            BusEvent::TokensGenerated(d) => serde_json::to_value(d),
            BusEvent::GenerationCompleted(d) => serde_json::to_value(d),
        };
        // Plain string/enum structs always serialize.
        (kind, data.unwrap_or(Value::Null))
    }
}

// ============================================================================
// Tests
// ============================================================================
