use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::BackendError;

/// One upstream message: a payload published to a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
  pub topic: String,
  pub payload: String,
}

impl Notification {
  pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
    Self {
      topic: topic.into(),
      payload: payload.into(),
    }
  }
}

/// An open upstream subscription plus the stream of everything it receives.
pub struct ListenerChannel {
  pub listener: Arc<dyn TopicListener>,
  pub notifications: mpsc::UnboundedReceiver<Notification>,
}

/// Handle to a single upstream subscription channel.
#[async_trait]
pub trait TopicListener: Send + Sync {
  /// Subscribe the channel to more topics. Re-subscribing is a no-op upstream.
  async fn listen(&self, topics: &[String]) -> Result<(), BackendError>;

  /// Unsubscribe everything and end the notification stream.
  async fn close(&self) -> Result<(), BackendError>;
}

/// A datastore offering LISTEN/NOTIFY-style pub/sub.
#[async_trait]
pub trait NotificationSource: Send + Sync {
  async fn open_listener(&self) -> Result<ListenerChannel, BackendError>;

  async fn notify(&self, topic: &str, payload: &str) -> Result<(), BackendError>;
}
