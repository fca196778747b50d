//! Cache invalidation driven by notifications.

use std::sync::Arc;
use std::time::Duration;
use telescope::cache::{CacheAside, CompressionPolicy, InMemoryBackend};
use telescope::invalidation::invalidation_handler;
use telescope::subscriptions::{InMemoryNotifier, TopicMultiplexer};
use telescope::Deadline;

fn deadline() -> Deadline {
  Deadline::after(Duration::from_secs(5))
}

async fn eventually<F, Fut>(mut check: F)
where
  F: FnMut() -> Fut,
  Fut: std::future::Future<Output = bool>,
{
  for _ in 0..100 {
    if check().await {
      return;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
  }
  panic!("condition not reached in time");
}

#[tokio::test]
async fn test_notification_revokes_matching_keys() {
  let backend = Arc::new(InMemoryBackend::new());
  let cache = CacheAside::new(backend.clone(), CompressionPolicy::default());
  let mux = TopicMultiplexer::new(Arc::new(InMemoryNotifier::new()));

  mux
    .watch(
      invalidation_handler(cache.clone(), Duration::from_secs(1)),
      &["cache_invalidation"],
      deadline(),
    )
    .await
    .unwrap();

  for i in 0..20 {
    cache
      .update(&format!("user-{}", i), &i, None, deadline())
      .await
      .unwrap();
  }
  cache
    .update("session-1", &"s", None, deadline())
    .await
    .unwrap();

  mux
    .notify("cache_invalidation", "user-*", deadline())
    .await
    .unwrap();

  eventually(|| {
    let backend = backend.clone();
    async move { backend.len() == 1 }
  })
  .await;
  let kept: String = cache.read("session-1", deadline()).await.unwrap();
  assert_eq!(kept, "s");
}

#[tokio::test]
async fn test_blank_pattern_revokes_nothing() {
  let backend = Arc::new(InMemoryBackend::new());
  let cache = CacheAside::new(backend.clone(), CompressionPolicy::default());
  let mux = TopicMultiplexer::new(Arc::new(InMemoryNotifier::new()));

  mux
    .watch(
      invalidation_handler(cache.clone(), Duration::from_secs(1)),
      &["cache_invalidation"],
      deadline(),
    )
    .await
    .unwrap();
  cache.update("a", &1u8, None, deadline()).await.unwrap();

  mux
    .notify("cache_invalidation", "   ", deadline())
    .await
    .unwrap();
  tokio::time::sleep(Duration::from_millis(100)).await;

  assert_eq!(backend.len(), 1);
}
