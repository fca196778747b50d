//! Caller-supplied deadlines.
//!
//! Every data-layer operation takes a [`Deadline`]. Missing it surfaces as
//! [`DeadlineExceeded`]; the remote side may or may not have applied the
//! request by then.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("deadline exceeded")]
pub struct DeadlineExceeded;

/// A point in time after which an operation is abandoned, or no limit at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
  at: Option<Instant>,
}

impl Deadline {
  pub fn after(timeout: Duration) -> Self {
    Self {
      at: Some(Instant::now() + timeout),
    }
  }

  pub fn at(instant: Instant) -> Self {
    Self { at: Some(instant) }
  }

  pub fn never() -> Self {
    Self { at: None }
  }

  pub fn instant(&self) -> Option<Instant> {
    self.at
  }

  /// Time left before expiry. `None` means unbounded.
  pub fn remaining(&self) -> Option<Duration> {
    self
      .at
      .map(|at| at.saturating_duration_since(Instant::now()))
  }

  pub fn is_expired(&self) -> bool {
    matches!(self.at, Some(at) if Instant::now() >= at)
  }

  /// The earlier of `self` and a deadline `timeout` from now.
  pub fn cap(&self, timeout: Duration) -> Self {
    let capped = Instant::now() + timeout;
    match self.at {
      Some(at) if at <= capped => *self,
      _ => Self::at(capped),
    }
  }

  /// Drive `fut` to completion or give up at the deadline, dropping it.
  pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, DeadlineExceeded> {
    match self.at {
      Some(at) => tokio::time::timeout_at(at, fut)
        .await
        .map_err(|_| DeadlineExceeded),
      None => Ok(fut.await),
    }
  }
}

impl Default for Deadline {
  fn default() -> Self {
    Self::never()
  }
}
