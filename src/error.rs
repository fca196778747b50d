use thiserror::Error;

/// Failure talking to the key-value or pub/sub backend.
#[derive(Debug, Error)]
pub enum BackendError {
  #[error(transparent)]
  Redis(#[from] redis::RedisError),
  #[error(transparent)]
  Postgres(#[from] tokio_postgres::Error),
  #[error(transparent)]
  Pool(#[from] deadpool_postgres::PoolError),
  #[error(transparent)]
  CreatePool(#[from] deadpool_postgres::CreatePoolError),
  #[error("backend connection closed")]
  Closed,
  #[error("{0}")]
  Other(String),
}
