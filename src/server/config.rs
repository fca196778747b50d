use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Substitute `$NAME`, `${NAME}` and `${NAME:-default}` with environment
/// values. Unset variables expand to the empty string, or to `default` when
/// one is given (also for variables set to ""); a lone `$` is kept.
fn expand_env_vars(input: &str) -> String {
  let mut out = String::with_capacity(input.len());
  let mut rest = input;

  while let Some(at) = rest.find('$') {
    out.push_str(&rest[..at]);
    let after = &rest[at + 1..];

    if let Some(braced) = after.strip_prefix('{') {
      if let Some(end) = braced.find('}') {
        let value = match braced[..end].split_once(":-") {
          Some((name, default)) => std::env::var(name)
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| default.to_string()),
          None => std::env::var(&braced[..end]).unwrap_or_default(),
        };
        out.push_str(&value);
        rest = &braced[end + 1..];
        continue;
      }
      out.push('$');
      rest = after;
      continue;
    }

    let name_len = after
      .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
      .unwrap_or(after.len());
    if name_len == 0 {
      out.push('$');
    } else {
      out.push_str(&std::env::var(&after[..name_len]).unwrap_or_default());
    }
    rest = &after[name_len..];
  }

  out.push_str(rest);
  out
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
  #[serde(default)]
  pub server: ServerSection,
  #[serde(default)]
  pub postgres: PostgresSection,
  #[serde(default)]
  pub redis: RedisSection,
  #[serde(default)]
  pub cache: CacheSection,
  #[serde(default)]
  pub notifications: NotificationsSection,
  #[serde(default)]
  pub logging: LoggingSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
  #[serde(default = "default_host")]
  pub host: String,
  #[serde(default = "default_port")]
  pub port: u16,
  /// Request bodies above this many bytes are rejected with 413.
  #[serde(default = "default_max_body_size")]
  pub max_body_size: usize,
  /// CORS allowed origins. `["*"]` (or empty) is permissive.
  #[serde(default = "default_cors_origins")]
  pub cors_origins: Vec<String>,
  /// How long in-flight requests get to drain on shutdown.
  #[serde(default = "default_shutdown_grace_secs")]
  pub shutdown_grace_secs: u64,
}

fn default_host() -> String {
  "0.0.0.0".into()
}

fn default_port() -> u16 {
  3000
}

fn default_max_body_size() -> usize {
  512 * 1024
}

fn default_cors_origins() -> Vec<String> {
  vec!["*".to_string()]
}

fn default_shutdown_grace_secs() -> u64 {
  10
}

impl Default for ServerSection {
  fn default() -> Self {
    Self {
      host: default_host(),
      port: default_port(),
      max_body_size: default_max_body_size(),
      cors_origins: default_cors_origins(),
      shutdown_grace_secs: default_shutdown_grace_secs(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresSection {
  #[serde(default = "default_pg_url")]
  pub url: String,
  #[serde(default = "default_max_conn")]
  pub max_connections: usize,
}

fn default_pg_url() -> String {
  "postgres://localhost/telescope".into()
}

fn default_max_conn() -> usize {
  20
}

impl Default for PostgresSection {
  fn default() -> Self {
    Self {
      url: default_pg_url(),
      max_connections: default_max_conn(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisSection {
  /// Full connection URL. When set, the discrete fields below are ignored.
  #[serde(default)]
  pub url: Option<String>,
  #[serde(default = "default_redis_host")]
  pub host: String,
  #[serde(default = "default_redis_port")]
  pub port: u16,
  #[serde(default)]
  pub password: Option<String>,
  #[serde(default)]
  pub database: u8,
  #[serde(default)]
  pub tls_enabled: bool,
}

fn default_redis_host() -> String {
  "127.0.0.1".into()
}

fn default_redis_port() -> u16 {
  6379
}

impl Default for RedisSection {
  fn default() -> Self {
    Self {
      url: None,
      host: default_redis_host(),
      port: default_redis_port(),
      password: None,
      database: 0,
      tls_enabled: false,
    }
  }
}

impl RedisSection {
  pub fn connection_url(&self) -> String {
    if let Some(url) = self.url.as_ref().filter(|u| !u.is_empty()) {
      return url.clone();
    }
    let scheme = if self.tls_enabled { "rediss" } else { "redis" };
    let auth = match &self.password {
      Some(pwd) if !pwd.is_empty() => format!(":{}@", pwd),
      _ => String::new(),
    };
    format!("{}://{}{}:{}/{}", scheme, auth, self.host, self.port, self.database)
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSection {
  /// Gzip level, 0-9.
  #[serde(default = "default_compression_level")]
  pub compression_level: u32,
  /// Idle compressor/decompressor states kept per pool.
  #[serde(default = "default_pool_max_idle")]
  pub pool_max_idle: usize,
  /// Default deadline for one cache operation.
  #[serde(default = "default_op_timeout_ms")]
  pub op_timeout_ms: u64,
}

fn default_compression_level() -> u32 {
  6
}

fn default_pool_max_idle() -> usize {
  64
}

fn default_op_timeout_ms() -> u64 {
  3000
}

impl Default for CacheSection {
  fn default() -> Self {
    Self {
      compression_level: default_compression_level(),
      pool_max_idle: default_pool_max_idle(),
      op_timeout_ms: default_op_timeout_ms(),
    }
  }
}

impl CacheSection {
  pub fn op_timeout(&self) -> Duration {
    Duration::from_millis(self.op_timeout_ms)
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsSection {
  #[serde(default = "default_dispatch_timeout_ms")]
  pub dispatch_timeout_ms: u64,
  /// Topic whose payloads are cache key globs to revoke on every instance.
  #[serde(default = "default_invalidation_topic")]
  pub invalidation_topic: String,
}

fn default_dispatch_timeout_ms() -> u64 {
  10_000
}

fn default_invalidation_topic() -> String {
  "cache_invalidation".into()
}

impl Default for NotificationsSection {
  fn default() -> Self {
    Self {
      dispatch_timeout_ms: default_dispatch_timeout_ms(),
      invalidation_topic: default_invalidation_topic(),
    }
  }
}

impl NotificationsSection {
  pub fn dispatch_timeout(&self) -> Duration {
    Duration::from_millis(self.dispatch_timeout_ms)
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
  #[serde(default = "default_log_level")]
  pub level: String,
  /// JSON lines instead of human-readable output.
  #[serde(default)]
  pub production: bool,
}

fn default_log_level() -> String {
  "info".into()
}

impl Default for LoggingSection {
  fn default() -> Self {
    Self {
      level: default_log_level(),
      production: false,
    }
  }
}

impl ServerConfig {
  pub fn from_file(path: impl AsRef<Path>) -> Result<Self, anyhow::Error> {
    let content = std::fs::read_to_string(&path)?;
    Self::from_yaml(&content)
  }

  pub fn from_yaml(content: &str) -> Result<Self, anyhow::Error> {
    Ok(serde_yaml::from_str(&expand_env_vars(content))?)
  }

  pub fn find_and_load() -> Result<Option<Self>, anyhow::Error> {
    for p in ["telescope.yaml", "telescope.yml"] {
      if Path::new(p).exists() {
        tracing::info!("Loading config from {}", p);
        return Ok(Some(Self::from_file(p)?));
      }
    }
    Ok(None)
  }

  pub fn to_yaml(&self) -> Result<String, anyhow::Error> {
    Ok(serde_yaml::to_string(self)?)
  }

  pub fn address(&self) -> String {
    format!("{}:{}", self.server.host, self.server.port)
  }
}
