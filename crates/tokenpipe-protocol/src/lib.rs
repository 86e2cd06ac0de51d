//! Shared event definitions for the tokenpipe server and its clients.

pub mod event_bus;

pub use event_bus::{
    BusEvent, ChatCreatedData, ChatDeletedData, ChatRenamedData, EventError, EventKind,
    GenerationCompletedData, GenerationStatus, PromptSubmittedData, Topic, TokensGeneratedData,
};
