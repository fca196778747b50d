use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use super::{routes, ServerConfig};
use crate::cache::{CacheAside, CoderPools, CompressionPolicy, KeyValueBackend, RedisBackend};
use crate::db::PostgresDatabase;
use crate::deadline::Deadline;
use crate::invalidation::invalidation_handler;
use crate::subscriptions::{NotificationSource, TopicMultiplexer};
use crate::version;

/// Time allowed for connecting to the backends at startup.
const BOOTSTRAP_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Daemon {
  config: ServerConfig,
  shutdown_tx: broadcast::Sender<()>,
}

impl Daemon {
  pub fn new(config: ServerConfig) -> Self {
    let (shutdown_tx, _) = broadcast::channel(1);
    Self {
      config,
      shutdown_tx,
    }
  }

  /// Trigger graceful shutdown of the HTTP server
  pub fn shutdown(&self) {
    tracing::info!("Initiating graceful shutdown...");
    let _ = self.shutdown_tx.send(());
  }

  pub async fn run(&self) -> Result<(), anyhow::Error> {
    let bootstrap = Deadline::after(BOOTSTRAP_TIMEOUT);

    let db = Arc::new(PostgresDatabase::new(
      &self.config.postgres.url,
      self.config.postgres.max_connections,
    )?);
    bootstrap
      .run(db.ping())
      .await
      .context("timed out connecting to PostgreSQL")?
      .context("PostgreSQL ping failed")?;
    tracing::info!("PostgreSQL connection pool ready");

    let redis = bootstrap
      .run(RedisBackend::connect(&self.config.redis.connection_url()))
      .await
      .context("timed out connecting to Redis")?
      .context("Redis connection failed")?;
    bootstrap
      .run(redis.ping())
      .await
      .context("timed out pinging Redis")?
      .context("Redis ping failed")?;
    tracing::info!("Redis connection ready");

    let pools = Arc::new(CoderPools::new(
      self.config.cache.compression_level,
      self.config.cache.pool_max_idle,
    ));
    let backend: Arc<dyn KeyValueBackend> = Arc::new(redis);
    let cache = CacheAside::new(backend, CompressionPolicy::new(pools));

    let source: Arc<dyn NotificationSource> = db;
    let notifier = TopicMultiplexer::with_dispatch_timeout(source, self.config.notifications.dispatch_timeout());
    let topic = &self.config.notifications.invalidation_topic;
    notifier
      .watch(
        invalidation_handler(cache, self.config.cache.op_timeout()),
        &[topic],
        bootstrap,
      )
      .await
      .with_context(|| format!("failed to watch topic {}", topic))?;
    tracing::info!("Watching {} for cache invalidation", topic);

    let app = routes::router(&self.config);
    let addr = self.config.address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("{} listening on {}", version::full_name(), addr);

    let mut shutdown_rx = self.shutdown_tx.subscribe();
    let served = axum::serve(listener, app.into_make_service())
      .with_graceful_shutdown(async move {
        let _ = shutdown_rx.recv().await;
        tracing::info!("HTTP server shutting down");
      })
      .await;

    if let Err(e) = notifier.close().await {
      tracing::warn!("Failed to close notification listener: {}", e);
    }
    served?;
    tracing::info!("Shutdown complete");
    Ok(())
  }
}
