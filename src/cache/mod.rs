//! Cache-aside storage.
//!
//! [`CacheAside`] layers the MessagePack [`codec`] and gzip
//! [`compression`] over any [`KeyValueBackend`].

pub mod backend;
pub mod codec;
pub mod compression;
pub mod error;
pub mod memory;
pub mod pool;
pub mod redis;
pub mod store;

pub use backend::{KeyTtl, KeyValueBackend};
pub use codec::CodecError;
pub use compression::{CoderPools, CompressionError, CompressionPolicy, COMPRESS_THRESHOLD, GZIP_MAGIC};
pub use error::CacheError;
pub use memory::InMemoryBackend;
pub use self::redis::RedisBackend;
pub use store::{CacheAside, REVOKE_BATCH_SIZE};
