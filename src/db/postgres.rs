use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_postgres::{AsyncMessage, NoTls};

use crate::error::BackendError;
use crate::subscriptions::{ListenerChannel, Notification, NotificationSource, TopicListener};
use crate::version;

/// PostgreSQL as the primary datastore: a connection pool for queries and
/// `pg_notify`, plus dedicated connections for LISTEN.
pub struct PostgresDatabase {
  pool: Pool,
  url: String,
}

impl PostgresDatabase {
  pub fn new(url: &str, max_connections: usize) -> Result<Self, BackendError> {
    let mut cfg = Config::new();
    cfg.url = Some(url.into());
    cfg.application_name = Some(version::full_name());
    cfg.manager = Some(ManagerConfig {
      recycling_method: RecyclingMethod::Fast,
    });
    cfg.pool = Some(PoolConfig::new(max_connections.max(1)));
    let pool = cfg.create_pool(Some(Runtime::Tokio1), NoTls)?;
    Ok(Self {
      pool,
      url: url.into(),
    })
  }

  pub fn pool(&self) -> &Pool {
    &self.pool
  }

  pub async fn ping(&self) -> Result<(), BackendError> {
    self.pool.get().await?.batch_execute("SELECT 1").await?;
    Ok(())
  }
}

#[async_trait]
impl NotificationSource for PostgresDatabase {
  async fn open_listener(&self) -> Result<ListenerChannel, BackendError> {
    // LISTEN is per session, so it gets a connection of its own outside the pool.
    let mut config: tokio_postgres::Config = self.url.parse()?;
    config.application_name(&listener_application_name());
    let (client, mut connection) = config.connect(NoTls).await?;
    let (tx, rx) = mpsc::unbounded_channel();

    let pump = tokio::spawn(async move {
      loop {
        match futures_util::future::poll_fn(|cx| connection.poll_message(cx)).await {
          Some(Ok(AsyncMessage::Notification(n))) => {
            if tx.send(Notification::new(n.channel(), n.payload())).is_err() {
              break;
            }
          }
          Some(Ok(AsyncMessage::Notice(notice))) => {
            tracing::debug!("PostgreSQL notice: {}", notice.message());
          }
          Some(Ok(_)) => {}
          Some(Err(e)) => {
            tracing::error!("PostgreSQL listener connection error: {}", e);
            break;
          }
          None => break,
        }
      }
      tracing::debug!("PostgreSQL listener connection closed");
    });

    tracing::info!("PostgreSQL LISTEN connection established");
    Ok(ListenerChannel {
      listener: Arc::new(PgListener { client, pump }),
      notifications: rx,
    })
  }

  async fn notify(&self, topic: &str, payload: &str) -> Result<(), BackendError> {
    self
      .pool
      .get()
      .await?
      .execute("SELECT pg_notify($1, $2)", &[&topic, &payload])
      .await?;
    Ok(())
  }
}

struct PgListener {
  client: tokio_postgres::Client,
  pump: JoinHandle<()>,
}

#[async_trait]
impl TopicListener for PgListener {
  async fn listen(&self, topics: &[String]) -> Result<(), BackendError> {
    let sql: String = topics
      .iter()
      .map(|t| format!("LISTEN {};", quote_ident(t)))
      .collect();
    self.client.batch_execute(&sql).await?;
    Ok(())
  }

  async fn close(&self) -> Result<(), BackendError> {
    let result = self.client.batch_execute("UNLISTEN *").await;
    self.pump.abort();
    result?;
    Ok(())
  }
}

impl Drop for PgListener {
  fn drop(&mut self) {
    self.pump.abort();
  }
}

/// Session name of the LISTEN connection, distinct from pooled sessions.
fn listener_application_name() -> String {
  format!("{} listener", version::full_name())
}

/// Quote a channel name as an identifier. Quoted names keep their case, which
/// matches how `pg_notify` treats its channel argument.
fn quote_ident(name: &str) -> String {
  format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_quote_ident() {
    assert_eq!(quote_ident("topic1"), "\"topic1\"");
    assert_eq!(quote_ident("Mixed.Case"), "\"Mixed.Case\"");
    assert_eq!(quote_ident("a\"b; DROP"), "\"a\"\"b; DROP\"");
  }

  #[test]
  fn test_listener_application_name() {
    let name = listener_application_name();
    assert!(name.starts_with(&version::full_name()));
    assert!(name.ends_with(" listener"));

    let mut config: tokio_postgres::Config = "postgres://localhost/app".parse().unwrap();
    config.application_name(&name);
    assert_eq!(config.get_application_name(), Some(name.as_str()));
  }
}
