use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Response
// ============================================================================

/// One generated token (or token batch) appended to a prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Prompt
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    pub id: String,
    pub text: String,
    /// Responses in arrival order; append-only
    pub responses: Vec<Response>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Prompt {
    pub fn new(id: String, text: String, now: DateTime<Utc>) -> Self {
        Self {
            id,
            text,
            responses: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Concatenation of all response texts in arrival order
    pub fn aggregated_text(&self) -> String {
        self.responses.iter().map(|r| r.text.as_str()).collect()
    }
}

// ============================================================================
// Chat
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    pub id: String,
    pub name: String,
    /// Prompts in submission order
    pub prompts: Vec<Prompt>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Chat {
    pub fn new(id: String, name: String, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name,
            prompts: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Linear scan; per-chat prompt counts are small.
    pub fn prompt(&self, prompt_id: &str) -> Option<&Prompt> {
        self.prompts.iter().find(|p| p.id == prompt_id)
    }

    pub fn prompt_mut(&mut self, prompt_id: &str) -> Option<&mut Prompt> {
        self.prompts.iter_mut().find(|p| p.id == prompt_id)
    }

    pub fn summary(&self) -> ChatSummary {
        ChatSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            prompt_count: self.prompts.len(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Chat listing entry (without prompts)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSummary {
    pub id: String,
    pub name: String,
    pub prompt_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
