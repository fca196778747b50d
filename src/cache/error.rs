use thiserror::Error;

use super::codec::CodecError;
use super::compression::CompressionError;
use crate::error::BackendError;

#[derive(Debug, Error)]
pub enum CacheError {
  /// Cache miss. Expected control flow, not a fault.
  #[error("cache miss: {key}")]
  NotFound { key: String },
  #[error("{op}: {source}")]
  Codec {
    op: &'static str,
    #[source]
    source: CodecError,
  },
  #[error("{op}: {source}")]
  Compression {
    op: &'static str,
    #[source]
    source: CompressionError,
  },
  #[error("{op}: {source}")]
  Backend {
    op: &'static str,
    #[source]
    source: BackendError,
  },
  #[error("{op}: deadline exceeded")]
  DeadlineExceeded { op: &'static str },
}

impl CacheError {
  pub fn is_not_found(&self) -> bool {
    matches!(self, CacheError::NotFound { .. })
  }

  pub fn is_deadline_exceeded(&self) -> bool {
    matches!(self, CacheError::DeadlineExceeded { .. })
  }
}
