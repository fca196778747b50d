use futures_util::FutureExt;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch, OnceCell};
use tokio::task::JoinHandle;

use super::handler::NotificationHandler;
use super::source::{Notification, NotificationSource, TopicListener};
use crate::deadline::Deadline;
use crate::error::BackendError;

/// Deadline handed to the handlers of one notification, and the most any
/// single handler may run.
pub const DISPATCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum NotifyError {
  #[error("notification multiplexer is closed")]
  Closed,
  #[error("{op}: {source}")]
  Backend {
    op: &'static str,
    #[source]
    source: BackendError,
  },
  #[error("{op}: deadline exceeded")]
  DeadlineExceeded { op: &'static str },
}

type Registry = HashMap<String, Vec<Arc<dyn NotificationHandler>>>;

/// Fans one upstream LISTEN channel out to per-topic handlers.
///
/// The channel is opened by the first successful [`watch`](Self::watch) and a
/// single dispatch task is started with it. Handlers for a notification run
/// one after another in registration order; notifications are dispatched in
/// the order the channel delivers them.
pub struct TopicMultiplexer {
  source: Arc<dyn NotificationSource>,
  listener: OnceCell<Arc<dyn TopicListener>>,
  /// Topic -> handlers in registration order.
  registry: Arc<RwLock<Registry>>,
  dispatch_timeout: Duration,
  shutdown_tx: watch::Sender<bool>,
  closed: AtomicBool,
  dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl TopicMultiplexer {
  pub fn new(source: Arc<dyn NotificationSource>) -> Self {
    Self::with_dispatch_timeout(source, DISPATCH_TIMEOUT)
  }

  pub fn with_dispatch_timeout(source: Arc<dyn NotificationSource>, dispatch_timeout: Duration) -> Self {
    let (shutdown_tx, _) = watch::channel(false);
    Self {
      source,
      listener: OnceCell::new(),
      registry: Arc::new(RwLock::new(HashMap::new())),
      dispatch_timeout,
      shutdown_tx,
      closed: AtomicBool::new(false),
      dispatcher: Mutex::new(None),
    }
  }

  /// Register `handler` for every topic in `topics`.
  ///
  /// Registration is additive: a handler added twice for a topic runs twice.
  /// An empty topic list does nothing.
  pub async fn watch<T: AsRef<str>>(
    &self,
    handler: Arc<dyn NotificationHandler>,
    topics: &[T],
    deadline: Deadline,
  ) -> Result<(), NotifyError> {
    if topics.is_empty() {
      return Ok(());
    }
    if self.is_closed() {
      return Err(NotifyError::Closed);
    }

    let listener = deadline
      .run(self.listener())
      .await
      .map_err(|_| NotifyError::DeadlineExceeded { op: "LISTEN" })??;
    if self.is_closed() {
      // Lost a race with close(); don't leave a fresh channel behind.
      let _ = listener.close().await;
      return Err(NotifyError::Closed);
    }

    let topics: Vec<String> = topics.iter().map(|t| t.as_ref().to_string()).collect();
    deadline
      .run(listener.listen(&topics))
      .await
      .map_err(|_| NotifyError::DeadlineExceeded { op: "LISTEN" })?
      .map_err(|source| NotifyError::Backend { op: "LISTEN", source })?;

    let mut registry = self.registry.write();
    for topic in topics {
      tracing::debug!(topic = %topic, "registered notification handler");
      registry.entry(topic).or_default().push(handler.clone());
    }
    Ok(())
  }

  /// Publish `payload` on `topic`.
  pub async fn notify(&self, topic: &str, payload: &str, deadline: Deadline) -> Result<(), NotifyError> {
    deadline
      .run(self.source.notify(topic, payload))
      .await
      .map_err(|_| NotifyError::DeadlineExceeded { op: "NOTIFY" })?
      .map_err(|source| NotifyError::Backend { op: "NOTIFY", source })
  }

  /// Stop dispatching and release the upstream channel.
  ///
  /// A handler already running is allowed to finish; it is bounded by the
  /// dispatch timeout, as is each handler still queued for that notification.
  /// Calling close twice is harmless.
  pub async fn close(&self) -> Result<(), NotifyError> {
    if self.closed.swap(true, Ordering::SeqCst) {
      return Ok(());
    }
    self.shutdown_tx.send_replace(true);

    let mut result = Ok(());
    if let Some(listener) = self.listener.get() {
      if let Err(source) = listener.close().await {
        result = Err(NotifyError::Backend {
          op: "UNLISTEN",
          source,
        });
      }
    }

    let dispatcher = self.dispatcher.lock().take();
    if let Some(handle) = dispatcher {
      if let Err(e) = handle.await {
        tracing::error!("Notification dispatcher ended abnormally: {}", e);
      }
    }
    tracing::info!("Notification multiplexer closed");
    result
  }

  pub fn is_active(&self) -> bool {
    self.listener.initialized() && !self.is_closed()
  }

  pub fn is_closed(&self) -> bool {
    self.closed.load(Ordering::SeqCst)
  }

  /// Topics with at least one handler, sorted.
  pub fn topics(&self) -> Vec<String> {
    let mut topics: Vec<String> = self.registry.read().keys().cloned().collect();
    topics.sort();
    topics
  }

  pub fn handler_count(&self, topic: &str) -> usize {
    self.registry.read().get(topic).map_or(0, Vec::len)
  }

  /// Open the upstream channel and start dispatching, exactly once. A failed
  /// attempt leaves the cell empty so the next caller tries again.
  async fn listener(&self) -> Result<&Arc<dyn TopicListener>, NotifyError> {
    self
      .listener
      .get_or_try_init(|| async {
        let channel = self
          .source
          .open_listener()
          .await
          .map_err(|source| NotifyError::Backend {
            op: "open listener",
            source,
          })?;
        let handle = tokio::spawn(dispatch(
          channel.notifications,
          self.registry.clone(),
          self.dispatch_timeout,
          self.shutdown_tx.subscribe(),
        ));
        *self.dispatcher.lock() = Some(handle);
        tracing::info!("Notification listener started");
        Ok::<_, NotifyError>(channel.listener)
      })
      .await
  }
}

async fn dispatch(
  mut notifications: mpsc::UnboundedReceiver<Notification>,
  registry: Arc<RwLock<Registry>>,
  timeout: Duration,
  mut shutdown: watch::Receiver<bool>,
) {
  loop {
    let stopping = *shutdown.borrow();
    if stopping {
      break;
    }
    let notification = tokio::select! {
      biased;
      changed = shutdown.changed() => {
        if changed.is_err() {
          // Multiplexer dropped without close().
          break;
        }
        continue;
      }
      received = notifications.recv() => match received {
        Some(n) => n,
        None => break,
      },
    };

    let handlers = registry
      .read()
      .get(&notification.topic)
      .cloned()
      .unwrap_or_default();
    if handlers.is_empty() {
      tracing::trace!(topic = %notification.topic, "notification without handlers");
      continue;
    }

    // One deadline per notification, passed to every handler; each call is
    // cut off separately.
    let deadline = Deadline::after(timeout);
    for handler in handlers {
      let call = AssertUnwindSafe(handler.handle(&notification, deadline)).catch_unwind();
      match Deadline::after(timeout).run(call).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => {
          tracing::warn!(topic = %notification.topic, "Notification handler failed: {:#}", e);
        }
        Ok(Err(_)) => {
          tracing::error!(topic = %notification.topic, "Notification handler panicked");
        }
        Err(_) => {
          tracing::warn!(
            topic = %notification.topic,
            "Notification handler cut off after {:?}",
            timeout
          );
        }
      }
    }
  }
  tracing::debug!("Notification dispatcher stopped");
}
