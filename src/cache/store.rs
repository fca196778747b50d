use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::backend::{KeyTtl, KeyValueBackend};
use super::codec;
use super::compression::CompressionPolicy;
use super::error::CacheError;
use crate::deadline::Deadline;
use crate::error::BackendError;

/// Upper bound on keys per UNLINK.
pub const REVOKE_BATCH_SIZE: usize = 1000;

/// SCAN COUNT hint used by pattern revocation.
const SCAN_COUNT: usize = 1000;

/// Read-through / write-through cache over a key-value backend.
///
/// Values are MessagePack-encoded and gzip-wrapped when large. Nothing here
/// retries; callers decide what to do with a failure.
#[derive(Clone)]
pub struct CacheAside {
  backend: Arc<dyn KeyValueBackend>,
  compression: CompressionPolicy,
}

impl CacheAside {
  pub fn new(backend: Arc<dyn KeyValueBackend>, compression: CompressionPolicy) -> Self {
    Self {
      backend,
      compression,
    }
  }

  pub fn backend(&self) -> &Arc<dyn KeyValueBackend> {
    &self.backend
  }

  pub async fn read<T: DeserializeOwned>(&self, key: &str, deadline: Deadline) -> Result<T, CacheError> {
    let bytes = self.read_bytes(key, deadline).await?;
    codec::decode(&bytes).map_err(|source| CacheError::Codec {
      op: "decode",
      source,
    })
  }

  /// Fetch raw bytes, undoing compression. Absent keys are [`CacheError::NotFound`].
  pub async fn read_bytes(&self, key: &str, deadline: Deadline) -> Result<Vec<u8>, CacheError> {
    let raw = call(deadline, "GET", self.backend.get(key))
      .await?
      .ok_or_else(|| CacheError::NotFound {
        key: key.to_string(),
      })?;
    self
      .compression
      .decompress(raw)
      .map_err(|source| CacheError::Compression {
        op: "decompress",
        source,
      })
  }

  /// Store `value` under `key`. A `ttl` of `None` or zero never expires.
  pub async fn update<T: Serialize + ?Sized>(
    &self,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
    deadline: Deadline,
  ) -> Result<(), CacheError> {
    let bytes = codec::encode(value).map_err(|source| CacheError::Codec {
      op: "encode",
      source,
    })?;
    self.update_bytes(key, bytes, ttl, deadline).await
  }

  pub async fn update_bytes(
    &self,
    key: &str,
    bytes: Vec<u8>,
    ttl: Option<Duration>,
    deadline: Deadline,
  ) -> Result<(), CacheError> {
    let original_len = bytes.len();
    let stored = self
      .compression
      .maybe_compress(bytes)
      .map_err(|source| CacheError::Compression {
        op: "compress",
        source,
      })?;
    if stored.len() != original_len {
      tracing::trace!(key, original_len, stored_len = stored.len(), "compressed cache value");
    }

    let ttl = ttl.filter(|ttl| !ttl.is_zero());
    call(deadline, "SET", self.backend.set(key, stored, ttl)).await
  }

  /// Delete `keys`. Missing keys are not an error. Returns how many existed.
  pub async fn revoke<K: AsRef<str>>(&self, keys: &[K], deadline: Deadline) -> Result<u64, CacheError> {
    let mut removed = 0;
    for chunk in keys.chunks(REVOKE_BATCH_SIZE) {
      let batch: Vec<String> = chunk.iter().map(|k| k.as_ref().to_string()).collect();
      removed += call(deadline, "UNLINK", self.backend.unlink(&batch)).await?;
    }
    Ok(removed)
  }

  /// Delete every key matching the glob `pattern`.
  ///
  /// Walks the key space with SCAN and unlinks in batches of at most
  /// [`REVOKE_BATCH_SIZE`]. Not atomic: keys written during the walk may
  /// survive.
  pub async fn revoke_by_pattern(&self, pattern: &str, deadline: Deadline) -> Result<u64, CacheError> {
    let mut cursor = 0;
    let mut batch = Vec::with_capacity(REVOKE_BATCH_SIZE);
    let mut removed = 0;

    loop {
      let (next, keys) = call(deadline, "SCAN", self.backend.scan(cursor, pattern, SCAN_COUNT)).await?;
      for key in keys {
        batch.push(key);
        if batch.len() >= REVOKE_BATCH_SIZE {
          removed += call(deadline, "UNLINK", self.backend.unlink(&batch)).await?;
          batch.clear();
        }
      }
      if next == 0 {
        break;
      }
      cursor = next;
    }
    if !batch.is_empty() {
      removed += call(deadline, "UNLINK", self.backend.unlink(&batch)).await?;
    }

    tracing::debug!(pattern, removed, "revoked cache keys by pattern");
    Ok(removed)
  }

  pub async fn ttl(&self, key: &str, deadline: Deadline) -> Result<KeyTtl, CacheError> {
    call(deadline, "PTTL", self.backend.ttl(key)).await
  }
}

/// Run one backend round trip under `deadline`, tagging failures with `op`.
async fn call<T, F>(deadline: Deadline, op: &'static str, fut: F) -> Result<T, CacheError>
where
  F: Future<Output = Result<T, BackendError>>,
{
  if deadline.is_expired() {
    return Err(CacheError::DeadlineExceeded { op });
  }
  match deadline.run(fut).await {
    Ok(Ok(value)) => Ok(value),
    Ok(Err(source)) => Err(CacheError::Backend { op, source }),
    Err(_) => Err(CacheError::DeadlineExceeded { op }),
  }
}
