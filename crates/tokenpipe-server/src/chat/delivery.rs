use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;

use tokenpipe_protocol::event_bus::GenerationStatus;

/// Item on the outbound delivery queue.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamUpdate {
    Token {
        cursor: u64,
        chat_id: String,
        prompt_id: String,
        text: String,
    },
    Finished {
        chat_id: String,
        prompt_id: String,
        status: GenerationStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl StreamUpdate {
    pub fn prompt_id(&self) -> &str {
        match self {
            StreamUpdate::Token { prompt_id, .. } | StreamUpdate::Finished { prompt_id, .. } => {
                prompt_id
            }
        }
    }
}

/// A token that was appended to the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoggedToken {
    pub cursor: u64,
    pub chat_id: String,
    pub prompt_id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// Bounded, cursor-addressed history of accepted tokens.
///
/// Consumers that missed live updates (full queue, late subscriber) poll with
/// the last cursor they saw. Cursors start at 1 and only grow; the oldest
/// entries are evicted once `capacity` is reached.
pub struct TokenLog {
    inner: Mutex<LogInner>,
}

struct LogInner {
    entries: VecDeque<LoggedToken>,
    next_cursor: u64,
    capacity: usize,
}

impl TokenLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(LogInner {
                entries: VecDeque::new(),
                next_cursor: 1,
                capacity,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LogInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append a token; returns its cursor.
    pub fn record(&self, chat_id: &str, prompt_id: &str, text: &str) -> u64 {
        let mut inner = self.lock();
        let cursor = inner.next_cursor;
        inner.next_cursor += 1;

        if inner.capacity == 0 {
            return cursor;
        }
        while inner.entries.len() >= inner.capacity {
            inner.entries.pop_front();
        }
        inner.entries.push_back(LoggedToken {
            cursor,
            chat_id: chat_id.to_string(),
            prompt_id: prompt_id.to_string(),
            text: text.to_string(),
            created_at: Utc::now(),
        });
        cursor
    }

    /// Tokens of one prompt with a cursor greater than `cursor`, oldest first.
    pub fn tokens_since(&self, chat_id: &str, prompt_id: &str, cursor: u64) -> Vec<LoggedToken> {
        self.lock()
            .entries
            .iter()
            .filter(|t| t.cursor > cursor && t.chat_id == chat_id && t.prompt_id == prompt_id)
            .cloned()
            .collect()
    }

    /// Cursor of the most recently recorded token, 0 if none.
    pub fn latest_cursor(&self) -> u64 {
        self.lock().next_cursor - 1
    }

    /// Remove every entry belonging to `chat_id`.
    pub fn forget_chat(&self, chat_id: &str) -> usize {
        let mut inner = self.lock();
        let before = inner.entries.len();
        inner.entries.retain(|t| t.chat_id != chat_id);
        before - inner.entries.len()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursors_increase() {
        let log = TokenLog::new(10);
        assert_eq!(log.latest_cursor(), 0);
        assert_eq!(log.record("c1", "p1", "He"), 1);
        assert_eq!(log.record("c1", "p1", "llo"), 2);
        assert_eq!(log.latest_cursor(), 2);
    }

    #[test]
    fn test_tokens_since_filters_by_prompt_and_cursor() {
        let log = TokenLog::new(10);
        log.record("c1", "p1", "a");
        log.record("c1", "p2", "x");
        log.record("c1", "p1", "b");
        log.record("c2", "p1", "other chat");

        let all: Vec<String> = log
            .tokens_since("c1", "p1", 0)
            .into_iter()
            .map(|t| t.text)
            .collect();
        assert_eq!(all, vec!["a", "b"]);

        let tail = log.tokens_since("c1", "p1", 1);
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].cursor, 3);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let log = TokenLog::new(2);
        log.record("c1", "p1", "a");
        log.record("c1", "p1", "b");
        log.record("c1", "p1", "c");

        assert_eq!(log.len(), 2);
        let texts: Vec<String> = log
            .tokens_since("c1", "p1", 0)
            .into_iter()
            .map(|t| t.text)
            .collect();
        assert_eq!(texts, vec!["b", "c"]);
        assert_eq!(log.latest_cursor(), 3);
    }

    #[test]
    fn test_zero_capacity_keeps_cursor_only() {
        let log = TokenLog::new(0);
        assert_eq!(log.record("c1", "p1", "a"), 1);
        assert!(log.is_empty());
        assert_eq!(log.latest_cursor(), 1);
    }

    #[test]
    fn test_forget_chat() {
        let log = TokenLog::new(10);
        log.record("c1", "p1", "a");
        log.record("c2", "p1", "b");
        assert_eq!(log.forget_chat("c1"), 1);
        assert!(log.tokens_since("c1", "p1", 0).is_empty());
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_update_serialization() {
        let update = StreamUpdate::Finished {
            chat_id: "c1".to_string(),
            prompt_id: "p1".to_string(),
            status: GenerationStatus::Completed,
            error: None,
        };
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["type"], "finished");
        assert_eq!(json["status"], "completed");
        assert!(json.get("error").is_none());
        assert_eq!(update.prompt_id(), "p1");
    }
}
