// Event Bus
//
// Typed, in-process publish/subscribe used to decouple the chat service from
// token generation. Events are not persisted.

pub mod bus;
pub mod handler;

pub use bus::{EventBus, Subscription};
pub use handler::{handler_fn, EventHandler, FnHandler};
pub use tokenpipe_protocol::event_bus::{BusEvent, EventKind, Topic};
