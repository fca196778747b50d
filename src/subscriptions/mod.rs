//! Topic fan-out over a single LISTEN/NOTIFY channel.

mod handler;
mod manager;
mod memory;
mod source;

pub use handler::{handler_fn, NotificationHandler};
pub use manager::{NotifyError, TopicMultiplexer, DISPATCH_TIMEOUT};
pub use memory::InMemoryNotifier;
pub use source::{ListenerChannel, Notification, NotificationSource, TopicListener};
