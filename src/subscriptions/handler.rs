use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

use super::source::Notification;
use crate::deadline::Deadline;

/// Callback invoked on the dispatch task for each matching notification.
///
/// The deadline is shared by every handler of the same notification. Errors
/// and panics are logged by the dispatcher and go no further.
#[async_trait]
pub trait NotificationHandler: Send + Sync {
  async fn handle(&self, notification: &Notification, deadline: Deadline) -> anyhow::Result<()>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> NotificationHandler for FnHandler<F>
where
  F: Fn(Notification, Deadline) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
  async fn handle(&self, notification: &Notification, deadline: Deadline) -> anyhow::Result<()> {
    (self.0)(notification.clone(), deadline).await
  }
}

/// Wrap an async closure as a handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn NotificationHandler>
where
  F: Fn(Notification, Deadline) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
  Arc::new(FnHandler(f))
}
