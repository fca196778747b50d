//! Process-local key-value backend.
//!
//! Used in tests and single-instance deployments without Redis. Expiry is lazy:
//! expired keys are dropped when touched or when a scan walks past them.

use async_trait::async_trait;
use parking_lot::RwLock;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use super::backend::{KeyTtl, KeyValueBackend};
use crate::error::BackendError;

struct Entry {
  value: Vec<u8>,
  expires_at: Option<Instant>,
  seq: u64,
}

impl Entry {
  fn is_expired(&self, now: Instant) -> bool {
    matches!(self.expires_at, Some(at) if now >= at)
  }
}

#[derive(Default)]
struct Inner {
  entries: HashMap<String, Entry>,
  /// Insertion sequence -> key. Scan cursors are sequence numbers, so a scan
  /// is unaffected by keys deleted behind it.
  order: BTreeMap<u64, String>,
  next_seq: u64,
}

impl Inner {
  fn remove(&mut self, key: &str) -> Option<Entry> {
    let entry = self.entries.remove(key)?;
    self.order.remove(&entry.seq);
    Some(entry)
  }

  fn live(&mut self, key: &str, now: Instant) -> Option<&Entry> {
    if self.entries.get(key)?.is_expired(now) {
      self.remove(key);
      return None;
    }
    self.entries.get(key)
  }
}

#[derive(Default)]
pub struct InMemoryBackend {
  inner: RwLock<Inner>,
}

impl InMemoryBackend {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    let now = Instant::now();
    self
      .inner
      .read()
      .entries
      .values()
      .filter(|e| !e.is_expired(now))
      .count()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

#[async_trait]
impl KeyValueBackend for InMemoryBackend {
  async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError> {
    let now = Instant::now();
    {
      let inner = self.inner.read();
      match inner.entries.get(key) {
        None => return Ok(None),
        Some(e) if !e.is_expired(now) => return Ok(Some(e.value.clone())),
        Some(_) => {}
      }
    }
    self.inner.write().live(key, now);
    Ok(None)
  }

  async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), BackendError> {
    let expires_at = ttl.map(|ttl| Instant::now() + ttl);
    let mut inner = self.inner.write();
    inner.remove(key);
    let seq = inner.next_seq;
    inner.next_seq += 1;
    inner.order.insert(seq, key.to_string());
    inner.entries.insert(
      key.to_string(),
      Entry {
        value,
        expires_at,
        seq,
      },
    );
    Ok(())
  }

  async fn unlink(&self, keys: &[String]) -> Result<u64, BackendError> {
    let now = Instant::now();
    let mut inner = self.inner.write();
    let mut removed = 0;
    for key in keys {
      if let Some(entry) = inner.remove(key) {
        if !entry.is_expired(now) {
          removed += 1;
        }
      }
    }
    Ok(removed)
  }

  async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>), BackendError> {
    let matcher = glob_to_regex(pattern)?;
    let now = Instant::now();
    let mut inner = self.inner.write();

    let mut keys = Vec::new();
    let mut expired = Vec::new();
    let mut last = None;
    for (seq, key) in inner.order.range(cursor..).take(count.max(1)) {
      last = Some(*seq);
      if inner.entries.get(key).is_some_and(|e| e.is_expired(now)) {
        expired.push(key.clone());
      } else if matcher.is_match(key) {
        keys.push(key.clone());
      }
    }
    for key in expired {
      inner.remove(&key);
    }

    let next = match last {
      Some(seq) if inner.order.range(seq + 1..).next().is_some() => seq + 1,
      _ => 0,
    };
    Ok((next, keys))
  }

  async fn ttl(&self, key: &str) -> Result<KeyTtl, BackendError> {
    let now = Instant::now();
    let mut inner = self.inner.write();
    Ok(match inner.live(key, now) {
      None => KeyTtl::Missing,
      Some(Entry {
        expires_at: None, ..
      }) => KeyTtl::Persistent,
      Some(Entry {
        expires_at: Some(at),
        ..
      }) => KeyTtl::Expires(at.saturating_duration_since(now)),
    })
  }

  async fn ping(&self) -> Result<(), BackendError> {
    Ok(())
  }
}

/// Translate a Redis-style glob (`*`, `?`, `[abc]`, `[^a-z]`, `\x`) into an
/// anchored regex.
fn glob_to_regex(pattern: &str) -> Result<Regex, BackendError> {
  let mut regex_str = String::with_capacity(pattern.len() * 2 + 6);
  // Keys may hold any byte, newlines included.
  regex_str.push_str("(?s)^");

  let mut chars = pattern.chars().peekable();
  while let Some(c) = chars.next() {
    match c {
      '*' => regex_str.push_str(".*"),
      '?' => regex_str.push('.'),
      '\\' => match chars.next() {
        Some(escaped) => regex_str.push_str(&regex::escape(&escaped.to_string())),
        None => regex_str.push_str("\\\\"),
      },
      '[' => {
        let mut class = String::from("[");
        if chars.peek() == Some(&'^') {
          chars.next();
          class.push('^');
        }
        let mut closed = false;
        while let Some(c) = chars.next() {
          match c {
            ']' => {
              closed = true;
              break;
            }
            '\\' => match chars.next() {
              Some(escaped) => push_class_char(&mut class, escaped, true),
              None => break,
            },
            _ => push_class_char(&mut class, c, false),
          }
        }
        if !closed {
          return Err(BackendError::Other(format!("unterminated class in glob {:?}", pattern)));
        }
        class.push(']');
        regex_str.push_str(&class);
      }
      _ => regex_str.push_str(&regex::escape(&c.to_string())),
    }
  }

  regex_str.push('$');
  Regex::new(&regex_str).map_err(|e| BackendError::Other(format!("invalid glob {:?}: {}", pattern, e)))
}

/// Add `c` to a bracket class. An unescaped `-` stays a range operator.
fn push_class_char(class: &mut String, c: char, escaped: bool) {
  let special = matches!(c, '\\' | '[' | ']' | '&' | '~' | '^');
  if special || (escaped && c.is_ascii_punctuation()) {
    class.push('\\');
  }
  class.push(c);
}
