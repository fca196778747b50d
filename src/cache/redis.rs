//! Redis-compatible backend over a multiplexed connection.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Client;
use std::time::Duration;

use super::backend::{KeyTtl, KeyValueBackend};
use crate::error::BackendError;

/// Backend speaking RESP through a [`ConnectionManager`], which reconnects on
/// its own. Clones share the connection.
#[derive(Clone)]
pub struct RedisBackend {
  connection: ConnectionManager,
}

impl RedisBackend {
  pub async fn connect(url: &str) -> Result<Self, BackendError> {
    let client = Client::open(url)?;
    let connection = ConnectionManager::new(client).await?;
    tracing::debug!("Connected to Redis");
    Ok(Self { connection })
  }
}

#[async_trait]
impl KeyValueBackend for RedisBackend {
  async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError> {
    let mut conn = self.connection.clone();
    let value = redis::cmd("GET")
      .arg(key)
      .query_async::<Option<Vec<u8>>>(&mut conn)
      .await?;
    Ok(value)
  }

  async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), BackendError> {
    let mut conn = self.connection.clone();
    let mut cmd = redis::cmd("SET");
    cmd.arg(key).arg(value);
    if let Some(ttl) = ttl {
      // PX rejects 0, and sub-millisecond TTLs round up.
      let millis = ttl.as_millis().clamp(1, u64::MAX as u128) as u64;
      cmd.arg("PX").arg(millis);
    }
    cmd.query_async::<()>(&mut conn).await?;
    Ok(())
  }

  async fn unlink(&self, keys: &[String]) -> Result<u64, BackendError> {
    if keys.is_empty() {
      return Ok(0);
    }
    let mut conn = self.connection.clone();
    let removed = redis::cmd("UNLINK")
      .arg(keys)
      .query_async::<u64>(&mut conn)
      .await?;
    Ok(removed)
  }

  async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>), BackendError> {
    let mut conn = self.connection.clone();
    let page = redis::cmd("SCAN")
      .arg(cursor)
      .arg("MATCH")
      .arg(pattern)
      .arg("COUNT")
      .arg(count)
      .query_async::<(u64, Vec<String>)>(&mut conn)
      .await?;
    Ok(page)
  }

  async fn ttl(&self, key: &str) -> Result<KeyTtl, BackendError> {
    let mut conn = self.connection.clone();
    let millis = redis::cmd("PTTL")
      .arg(key)
      .query_async::<i64>(&mut conn)
      .await?;
    Ok(match millis {
      -2 => KeyTtl::Missing,
      -1 => KeyTtl::Persistent,
      ms => KeyTtl::Expires(Duration::from_millis(ms.max(0) as u64)),
    })
  }

  async fn ping(&self) -> Result<(), BackendError> {
    let mut conn = self.connection.clone();
    redis::cmd("PING").query_async::<()>(&mut conn).await?;
    Ok(())
  }
}
