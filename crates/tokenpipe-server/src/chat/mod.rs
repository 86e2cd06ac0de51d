// Chat
//
// User-facing operations over the chat store and the outbound delivery of
// generated tokens.

pub mod delivery;
pub mod service;

pub use delivery::{LoggedToken, StreamUpdate, TokenLog};
pub use service::{ChatService, ServiceOptions};
