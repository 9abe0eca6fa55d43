//! The cancellation and deadline signal handed to lifecycle hook actions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

/// Why a [`Context`] stopped permitting work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Interrupt {
  #[error("context was cancelled")]
  Cancelled,
  #[error("context deadline exceeded")]
  DeadlineExceeded,
}

/// An advisory cancellation/timeout signal for `start` and `stop`.
///
/// Clones share the same cancellation flag, so a clone handed to another
/// thread can cancel a running start sequence. The coordinator only checks the
/// signal between hooks; actions that block are expected to poll it themselves.
#[derive(Debug, Clone)]
pub struct Context {
  cancelled: Arc<AtomicBool>,
  deadline: Option<Instant>,
}

impl Default for Context {
  fn default() -> Self {
    Self::background()
  }
}

impl Context {
  /// A context that is never cancelled and has no deadline.
  pub fn background() -> Self {
    Self {
      cancelled: Arc::new(AtomicBool::new(false)),
      deadline: None,
    }
  }

  /// A context whose deadline is `timeout` from now. A timeout too large to
  /// represent as an instant means no deadline.
  pub fn with_timeout(timeout: Duration) -> Self {
    Self {
      cancelled: Arc::new(AtomicBool::new(false)),
      deadline: Instant::now().checked_add(timeout),
    }
  }

  pub fn with_deadline(deadline: Instant) -> Self {
    Self {
      cancelled: Arc::new(AtomicBool::new(false)),
      deadline: Some(deadline),
    }
  }

  /// Derives a context sharing this one's cancellation flag, with the earlier
  /// of the two deadlines.
  pub fn child_with_timeout(&self, timeout: Duration) -> Self {
    let candidate = Instant::now().checked_add(timeout);
    let deadline = match (self.deadline, candidate) {
      (Some(existing), Some(candidate)) => Some(existing.min(candidate)),
      (existing, candidate) => existing.or(candidate),
    };
    Self {
      cancelled: Arc::clone(&self.cancelled),
      deadline,
    }
  }

  pub fn cancel(&self) {
    self.cancelled.store(true, Ordering::Release);
  }

  pub fn is_cancelled(&self) -> bool {
    self.cancelled.load(Ordering::Acquire)
  }

  pub fn deadline(&self) -> Option<Instant> {
    self.deadline
  }

  /// Time left until the deadline. `None` means no deadline.
  pub fn remaining(&self) -> Option<Duration> {
    self
      .deadline
      .map(|deadline| deadline.saturating_duration_since(Instant::now()))
  }

  /// Returns the reason work should stop, if any. Cancellation wins over an
  /// expired deadline.
  pub fn check(&self) -> Result<(), Interrupt> {
    if self.is_cancelled() {
      return Err(Interrupt::Cancelled);
    }
    match self.deadline {
      Some(deadline) if Instant::now() >= deadline => Err(Interrupt::DeadlineExceeded),
      _ => Ok(()),
    }
  }
}
