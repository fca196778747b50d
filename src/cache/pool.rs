//! Reusable object pool for expensive coder state.

use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};

/// State that can be returned to a pristine condition and handed out again.
pub trait Reusable {
  fn reset(&mut self);
}

impl Reusable for flate2::Compress {
  fn reset(&mut self) {
    flate2::Compress::reset(self);
  }
}

impl Reusable for flate2::Decompress {
  fn reset(&mut self) {
    // Raw deflate streams, no zlib header.
    flate2::Decompress::reset(self, false);
  }
}

type Factory<T> = Box<dyn Fn() -> T + Send + Sync>;

/// A concurrency-safe pool. Items are reset on the way out and returned on
/// drop of the [`Pooled`] guard, so every exit path gives them back.
pub struct Pool<T: Reusable> {
  idle: Mutex<Vec<T>>,
  max_idle: usize,
  factory: Factory<T>,
  created: AtomicUsize,
}

impl<T: Reusable> Pool<T> {
  pub fn new(max_idle: usize, factory: impl Fn() -> T + Send + Sync + 'static) -> Self {
    Self {
      idle: Mutex::new(Vec::with_capacity(max_idle)),
      max_idle,
      factory: Box::new(factory),
      created: AtomicUsize::new(0),
    }
  }

  pub fn acquire(&self) -> Pooled<'_, T> {
    let reused = self.idle.lock().pop();
    let item = match reused {
      Some(mut item) => {
        item.reset();
        item
      }
      None => {
        self.created.fetch_add(1, Ordering::Relaxed);
        (self.factory)()
      }
    };
    Pooled {
      pool: self,
      item: Some(item),
    }
  }

  fn release(&self, item: T) {
    let mut idle = self.idle.lock();
    if idle.len() < self.max_idle {
      idle.push(item);
    }
  }

  /// Items currently parked in the pool.
  pub fn idle(&self) -> usize {
    self.idle.lock().len()
  }

  /// Items ever constructed by the factory.
  pub fn created(&self) -> usize {
    self.created.load(Ordering::Relaxed)
  }
}

/// RAII handle to a pooled item.
pub struct Pooled<'a, T: Reusable> {
  pool: &'a Pool<T>,
  item: Option<T>,
}

impl<T: Reusable> Deref for Pooled<'_, T> {
  type Target = T;

  fn deref(&self) -> &T {
    // Only taken in Drop.
    self.item.as_ref().unwrap_or_else(|| unreachable!())
  }
}

impl<T: Reusable> DerefMut for Pooled<'_, T> {
  fn deref_mut(&mut self) -> &mut T {
    self.item.as_mut().unwrap_or_else(|| unreachable!())
  }
}

impl<T: Reusable> Drop for Pooled<'_, T> {
  fn drop(&mut self) {
    if let Some(item) = self.item.take() {
      self.pool.release(item);
    }
  }
}
