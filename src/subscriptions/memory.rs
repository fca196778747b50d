//! Process-local notification source.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::source::{ListenerChannel, Notification, NotificationSource, TopicListener};
use crate::error::BackendError;

struct MemoryListener {
  topics: RwLock<HashSet<String>>,
  tx: Mutex<Option<mpsc::UnboundedSender<Notification>>>,
}

impl MemoryListener {
  fn deliver(&self, notification: &Notification) -> bool {
    let tx = self.tx.lock();
    let Some(tx) = tx.as_ref() else {
      return false;
    };
    if self.topics.read().contains(&notification.topic) {
      return tx.send(notification.clone()).is_ok();
    }
    true
  }
}

#[async_trait]
impl TopicListener for MemoryListener {
  async fn listen(&self, topics: &[String]) -> Result<(), BackendError> {
    if self.tx.lock().is_none() {
      return Err(BackendError::Closed);
    }
    self.topics.write().extend(topics.iter().cloned());
    Ok(())
  }

  async fn close(&self) -> Result<(), BackendError> {
    self.topics.write().clear();
    self.tx.lock().take();
    Ok(())
  }
}

/// Delivers every `notify` to each open listener subscribed to the topic,
/// like sessions sharing one database.
pub struct InMemoryNotifier {
  listeners: Mutex<Vec<Arc<MemoryListener>>>,
  opened: AtomicUsize,
  available: AtomicBool,
}

impl InMemoryNotifier {
  pub fn new() -> Self {
    Self {
      listeners: Mutex::new(Vec::new()),
      opened: AtomicUsize::new(0),
      available: AtomicBool::new(true),
    }
  }

  /// Number of listener channels ever opened.
  pub fn listeners_opened(&self) -> usize {
    self.opened.load(Ordering::SeqCst)
  }

  /// Simulate an outage: while unavailable every call fails.
  pub fn set_available(&self, available: bool) {
    self.available.store(available, Ordering::SeqCst);
  }

  fn check_available(&self) -> Result<(), BackendError> {
    if self.available.load(Ordering::SeqCst) {
      Ok(())
    } else {
      Err(BackendError::Other("notifier unavailable".into()))
    }
  }
}

impl Default for InMemoryNotifier {
  fn default() -> Self {
    Self::new()
  }
}

#[async_trait]
impl NotificationSource for InMemoryNotifier {
  async fn open_listener(&self) -> Result<ListenerChannel, BackendError> {
    self.check_available()?;
    let (tx, rx) = mpsc::unbounded_channel();
    let listener = Arc::new(MemoryListener {
      topics: RwLock::new(HashSet::new()),
      tx: Mutex::new(Some(tx)),
    });
    self.listeners.lock().push(listener.clone());
    self.opened.fetch_add(1, Ordering::SeqCst);
    Ok(ListenerChannel {
      listener,
      notifications: rx,
    })
  }

  async fn notify(&self, topic: &str, payload: &str) -> Result<(), BackendError> {
    self.check_available()?;
    let notification = Notification::new(topic, payload);
    self
      .listeners
      .lock()
      .retain(|listener| listener.deliver(&notification));
    Ok(())
  }
}
