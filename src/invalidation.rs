//! Cross-instance cache invalidation over the notification channel.
//!
//! Every instance watches one topic; a payload published there is a key glob
//! that each instance revokes from its cache.

use std::sync::Arc;
use std::time::Duration;

use crate::cache::CacheAside;
use crate::deadline::Deadline;
use crate::subscriptions::{handler_fn, Notification, NotificationHandler};

/// Handler revoking the glob carried in each notification payload. Each
/// revocation is bounded by `op_timeout` or the dispatch deadline, whichever
/// ends first.
pub fn invalidation_handler(cache: CacheAside, op_timeout: Duration) -> Arc<dyn NotificationHandler> {
  handler_fn(move |notification, deadline| revoke_matching(cache.clone(), notification, deadline.cap(op_timeout)))
}

async fn revoke_matching(cache: CacheAside, notification: Notification, deadline: Deadline) -> anyhow::Result<()> {
  let pattern = notification.payload.trim();
  if pattern.is_empty() {
    tracing::warn!(topic = %notification.topic, "Ignoring empty invalidation pattern");
    return Ok(());
  }
  let removed = cache.revoke_by_pattern(pattern, deadline).await?;
  tracing::info!(pattern, removed, "Revoked cache keys on invalidation notice");
  Ok(())
}
