use async_trait::async_trait;
use std::time::Duration;

use crate::error::BackendError;

/// Remaining lifetime of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
  Missing,
  Persistent,
  Expires(Duration),
}

/// The key-value primitives the cache is built on.
///
/// Implementations do not enforce deadlines themselves; callers wrap every
/// call in one.
#[async_trait]
pub trait KeyValueBackend: Send + Sync {
  async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError>;

  /// `ttl` of `None` stores the key without expiry.
  async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), BackendError>;

  /// Returns how many of `keys` existed.
  async fn unlink(&self, keys: &[String]) -> Result<u64, BackendError>;

  /// One step of an incremental scan. A returned cursor of 0 ends the scan.
  async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>), BackendError>;

  async fn ttl(&self, key: &str) -> Result<KeyTtl, BackendError>;

  async fn ping(&self) -> Result<(), BackendError>;
}
