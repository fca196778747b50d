mod config;
mod daemon;
pub mod routes;

pub use config::{
  CacheSection, LoggingSection, NotificationsSection, PostgresSection, RedisSection, ServerConfig,
  ServerSection,
};
pub use daemon::Daemon;
pub use routes::{router, ApiError, Envelope};
