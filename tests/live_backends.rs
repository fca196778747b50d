//! Tests against real Redis and PostgreSQL servers.
//!
//! Skipped unless `TELESCOPE_TEST_REDIS_URL` / `TELESCOPE_TEST_PG_URL` are set,
//! e.g. `redis://127.0.0.1:6379/15` and `postgres://postgres@localhost/postgres`.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use telescope::cache::{
  CacheAside, CompressionPolicy, KeyTtl, KeyValueBackend, RedisBackend, GZIP_MAGIC,
};
use telescope::db::PostgresDatabase;
use telescope::subscriptions::{handler_fn, TopicMultiplexer};
use telescope::Deadline;
use tokio::sync::mpsc;

fn deadline() -> Deadline {
  Deadline::after(Duration::from_secs(10))
}

fn env_url(var: &str) -> Option<String> {
  match std::env::var(var) {
    Ok(url) if !url.is_empty() => Some(url),
    _ => {
      eprintln!("{} not set, skipping", var);
      None
    }
  }
}

// =============================================================================
// Redis
// =============================================================================

#[tokio::test]
async fn test_redis_cache_aside() {
  let Some(url) = env_url("TELESCOPE_TEST_REDIS_URL") else {
    return;
  };
  let backend = Arc::new(RedisBackend::connect(&url).await.unwrap());
  backend.ping().await.unwrap();
  let cache = CacheAside::new(backend.clone(), CompressionPolicy::default());

  let prefix = format!("telescope-test-{}", std::process::id());
  let small = format!("{}-small", prefix);
  let large = format!("{}-large", prefix);

  cache
    .update_bytes(&small, b"tiny".to_vec(), None, deadline())
    .await
    .unwrap();
  let big = "望远镜".repeat(1000).into_bytes();
  cache
    .update_bytes(&large, big.clone(), Some(Duration::from_secs(20)), deadline())
    .await
    .unwrap();

  assert!(!backend.get(&small).await.unwrap().unwrap().starts_with(&GZIP_MAGIC));
  assert!(backend.get(&large).await.unwrap().unwrap().starts_with(&GZIP_MAGIC));
  assert_eq!(cache.read_bytes(&large, deadline()).await.unwrap(), big);

  assert_eq!(cache.ttl(&small, deadline()).await.unwrap(), KeyTtl::Persistent);
  match cache.ttl(&large, deadline()).await.unwrap() {
    KeyTtl::Expires(left) => {
      assert!(left <= Duration::from_secs(20));
      assert!(left > Duration::from_secs(18));
    }
    other => panic!("expected expiring key, got {:?}", other),
  }

  cache.revoke(&[&small], deadline()).await.unwrap();
  cache.revoke(&[&small], deadline()).await.unwrap();
  assert!(cache
    .read_bytes(&small, deadline())
    .await
    .unwrap_err()
    .is_not_found());

  for i in 0..1500 {
    cache
      .update(&format!("{}-bulk-{}", prefix, i), &i, Some(Duration::from_secs(60)), deadline())
      .await
      .unwrap();
  }
  let removed = cache
    .revoke_by_pattern(&format!("{}-bulk-*", prefix), deadline())
    .await
    .unwrap();
  assert_eq!(removed, 1500);

  cache.revoke(&[&large], deadline()).await.unwrap();
}

// =============================================================================
// PostgreSQL
// =============================================================================

#[tokio::test]
async fn test_postgres_listen_notify() {
  let Some(url) = env_url("TELESCOPE_TEST_PG_URL") else {
    return;
  };
  let db = Arc::new(PostgresDatabase::new(&url, 4).unwrap());
  db.ping().await.unwrap();
  let mux = TopicMultiplexer::new(db);

  let log: Arc<Mutex<Vec<String>>> = Arc::default();
  let (tx, mut rx) = mpsc::unbounded_channel();
  for name in ["cb1", "cb2", "cb3"] {
    let log = log.clone();
    let tx = tx.clone();
    let topics: &[&str] = if name == "cb3" {
      &["topic1", "Topic2"]
    } else {
      &["topic1"]
    };
    let handler = handler_fn(move |n, _d| {
      log.lock().push(format!("{}:{}:{}", name, n.topic, n.payload));
      let _ = tx.send(());
      async { anyhow::Ok(()) }
    });
    mux.watch(handler, topics, deadline()).await.unwrap();
  }

  mux.notify("topic1", "hello", deadline()).await.unwrap();
  mux.notify("Topic2", "world", deadline()).await.unwrap();
  for _ in 0..4 {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
      .await
      .unwrap()
      .unwrap();
  }

  assert_eq!(
    *log.lock(),
    vec![
      "cb1:topic1:hello",
      "cb2:topic1:hello",
      "cb3:topic1:hello",
      "cb3:Topic2:world"
    ]
  );
  mux.close().await.unwrap();
}
