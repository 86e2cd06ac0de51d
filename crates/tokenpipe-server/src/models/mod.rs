pub mod chat;

pub use chat::{Chat, ChatSummary, Prompt, Response};
