//! The lifecycle coordinator: ordered start hooks, reverse-ordered stop hooks.

use crate::context::Context;
use crate::error::{BoxError, Error, HookFailure, Result};
use crate::event::{Emitter, EventKind, Outcome, Subject};

use std::fmt;
use std::ops::Range;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

type Action = Box<dyn FnOnce(&Context) -> Result<(), BoxError> + Send>;

/// A pair of optional start and stop actions.
///
/// # Examples
///
/// ```
/// use fibre_di::{BoxError, Hook};
///
/// let hook = Hook::new()
///   .on_start(|_ctx| {
///     println!("listening");
///     Ok::<(), BoxError>(())
///   })
///   .on_stop(|_ctx| {
///     println!("closed");
///     Ok::<(), BoxError>(())
///   });
/// # drop(hook);
/// ```
#[derive(Default)]
pub struct Hook {
  start: Option<Action>,
  stop: Option<Action>,
}

impl Hook {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn on_start<F, E>(mut self, action: F) -> Self
  where
    F: FnOnce(&Context) -> Result<(), E> + Send + 'static,
    E: Into<BoxError>,
  {
    self.start = Some(Box::new(move |ctx| action(ctx).map_err(Into::into)));
    self
  }

  pub fn on_stop<F, E>(mut self, action: F) -> Self
  where
    F: FnOnce(&Context) -> Result<(), E> + Send + 'static,
    E: Into<BoxError>,
  {
    self.stop = Some(Box::new(move |ctx| action(ctx).map_err(Into::into)));
    self
  }
}

impl fmt::Debug for Hook {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Hook")
      .field("has_start", &self.start.is_some())
      .field("has_stop", &self.stop.is_some())
      .finish()
  }
}

/// Where a single hook is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookState {
  Pending,
  Started,
  Stopped,
  /// Terminal: the start action failed.
  StartFailed,
  /// Terminal: the stop action failed.
  StopFailed,
}

/// Where the coordinator as a whole is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
  /// Hooks may still be appended.
  Constructing,
  Starting,
  Running,
  /// A start action failed or the start was interrupted; `stop` unwinds.
  StartFailed,
  Stopping,
  Stopped,
}

impl fmt::Display for Phase {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Phase::Constructing => "constructing",
      Phase::Starting => "starting",
      Phase::Running => "running",
      Phase::StartFailed => "start-failed",
      Phase::Stopping => "stopping",
      Phase::Stopped => "stopped",
    };
    f.write_str(name)
  }
}

struct HookSlot {
  owner: String,
  start: Option<Action>,
  stop: Option<Action>,
  state: HookState,
}

struct Inner {
  phase: Phase,
  hooks: Vec<HookSlot>,
}

/// Owns the ordered hook list and drives `start` and `stop`.
///
/// Actions run on the calling thread, one at a time, with the internal lock
/// released so an action may inspect [`Lifecycle::states`].
pub(crate) struct Lifecycle {
  inner: Mutex<Inner>,
  emitter: Arc<Emitter>,
}

impl Lifecycle {
  pub(crate) fn new(emitter: Arc<Emitter>) -> Self {
    Self {
      inner: Mutex::new(Inner {
        phase: Phase::Constructing,
        hooks: Vec::new(),
      }),
      emitter,
    }
  }

  pub(crate) fn phase(&self) -> Phase {
    self.inner.lock().phase
  }

  /// Appends `hook` and returns its index. Only valid before `start`.
  pub(crate) fn append(&self, owner: &str, hook: Hook) -> Result<usize> {
    self.commit(owner, vec![hook]).map(|indices| indices.start)
  }

  /// Fails with [`Error::HooksClosed`] unless hooks may still be appended.
  pub(crate) fn ensure_open(&self) -> Result<()> {
    let phase = self.inner.lock().phase;
    if phase != Phase::Constructing {
      return Err(Error::HooksClosed { phase });
    }
    Ok(())
  }

  /// Appends every hook of `hooks`, in order and contiguously, and returns
  /// their indices.
  pub(crate) fn commit(&self, owner: &str, hooks: Vec<Hook>) -> Result<Range<usize>> {
    let indices = {
      let mut inner = self.inner.lock();
      if inner.phase != Phase::Constructing {
        return Err(Error::HooksClosed { phase: inner.phase });
      }
      let first = inner.hooks.len();
      inner.hooks.extend(hooks.into_iter().map(|hook| HookSlot {
        owner: owner.to_owned(),
        start: hook.start,
        stop: hook.stop,
        state: HookState::Pending,
      }));
      first..inner.hooks.len()
    };

    for index in indices.clone() {
      tracing::trace!(index, owner, "hook appended");
      self.emitter.emit(
        EventKind::HookAppended,
        || Subject::Hook {
          index,
          owner: owner.to_owned(),
        },
        None,
        Outcome::Success,
      );
    }
    Ok(indices)
  }

  pub(crate) fn states(&self) -> Vec<(String, HookState)> {
    self
      .inner
      .lock()
      .hooks
      .iter()
      .map(|slot| (slot.owner.clone(), slot.state))
      .collect()
  }

  /// Runs every start action in registration order, halting on the first
  /// failure or when `ctx` fires between hooks. Hooks already started stay
  /// started.
  pub(crate) fn start(&self, ctx: &Context) -> Result<()> {
    let count = {
      let mut inner = self.inner.lock();
      if inner.phase != Phase::Constructing {
        return Err(Error::InvalidPhase {
          operation: "start",
          phase: inner.phase,
        });
      }
      inner.phase = Phase::Starting;
      inner.hooks.len()
    };

    let mut guard = UnwindGuard::new(self, Phase::StartFailed, HookState::StartFailed);
    let began = Instant::now();
    self
      .emitter
      .emit(EventKind::Starting, || Subject::Container, None, Outcome::Success);
    tracing::debug!(hooks = count, "starting lifecycle");

    let result = self.run_starts(ctx, count, &mut guard);
    guard.disarm();

    self.inner.lock().phase = match result {
      Ok(()) => Phase::Running,
      Err(_) => Phase::StartFailed,
    };
    self.emitter.emit(
      EventKind::Started,
      || Subject::Container,
      Some(began.elapsed()),
      Outcome::from_result(&result),
    );
    result
  }

  fn run_starts(&self, ctx: &Context, count: usize, guard: &mut UnwindGuard<'_>) -> Result<()> {
    for index in 0..count {
      let (owner, action) = {
        let mut inner = self.inner.lock();
        let slot = &mut inner.hooks[index];
        (slot.owner.clone(), slot.start.take())
      };

      if let Err(interrupt) = ctx.check() {
        tracing::debug!(index, owner = %owner, %interrupt, "start interrupted");
        return Err(Error::StartFailed {
          index,
          owner,
          cause: Box::new(interrupt),
        });
      }

      let began = Instant::now();
      guard.running = Some(index);
      let outcome = match action {
        Some(action) => action(ctx),
        None => Ok(()),
      };
      guard.running = None;
      let elapsed = began.elapsed();

      self.inner.lock().hooks[index].state = match outcome {
        Ok(()) => HookState::Started,
        Err(_) => HookState::StartFailed,
      };
      self.emitter.emit(
        EventKind::HookStarted,
        || Subject::Hook {
          index,
          owner: owner.clone(),
        },
        Some(elapsed),
        Outcome::from_result(&outcome),
      );

      if let Err(cause) = outcome {
        tracing::debug!(index, owner = %owner, error = %cause, "start hook failed");
        return Err(Error::StartFailed {
          index,
          owner,
          cause,
        });
      }
    }
    Ok(())
  }

  /// Runs the stop action of every started hook in reverse registration order.
  ///
  /// Every started hook gets an attempt: failures are collected, and `ctx` is
  /// passed to each action but never used to skip one.
  pub(crate) fn stop(&self, ctx: &Context) -> Result<()> {
    let count = {
      let mut inner = self.inner.lock();
      match inner.phase {
        Phase::Constructing | Phase::Running | Phase::StartFailed => {}
        phase => {
          return Err(Error::InvalidPhase {
            operation: "stop",
            phase,
          })
        }
      }
      inner.phase = Phase::Stopping;
      inner.hooks.len()
    };

    let mut guard = UnwindGuard::new(self, Phase::Stopped, HookState::StopFailed);
    let began = Instant::now();
    self
      .emitter
      .emit(EventKind::Stopping, || Subject::Container, None, Outcome::Success);
    tracing::debug!(hooks = count, "stopping lifecycle");

    let mut failures = Vec::new();
    for index in (0..count).rev() {
      let (owner, action) = {
        let mut inner = self.inner.lock();
        let slot = &mut inner.hooks[index];
        if slot.state != HookState::Started {
          continue;
        }
        (slot.owner.clone(), slot.stop.take())
      };

      let hook_began = Instant::now();
      guard.running = Some(index);
      let outcome = match action {
        Some(action) => action(ctx),
        None => Ok(()),
      };
      guard.running = None;
      let elapsed = hook_began.elapsed();

      self.inner.lock().hooks[index].state = match outcome {
        Ok(()) => HookState::Stopped,
        Err(_) => HookState::StopFailed,
      };
      self.emitter.emit(
        EventKind::HookStopped,
        || Subject::Hook {
          index,
          owner: owner.clone(),
        },
        Some(elapsed),
        Outcome::from_result(&outcome),
      );

      if let Err(cause) = outcome {
        tracing::warn!(index, owner = %owner, error = %cause, "stop hook failed");
        failures.push(HookFailure {
          index,
          owner,
          cause,
        });
      }
    }

    guard.disarm();
    self.inner.lock().phase = Phase::Stopped;
    let result = if failures.is_empty() {
      Ok(())
    } else {
      Err(Error::StopFailed { failures })
    };
    self.emitter.emit(
      EventKind::Stopped,
      || Subject::Container,
      Some(began.elapsed()),
      Outcome::from_result(&result),
    );
    result
  }
}

/// Settles the phase, and the state of the running hook, if a hook action panics.
struct UnwindGuard<'l> {
  lifecycle: &'l Lifecycle,
  phase: Phase,
  hook_state: HookState,
  running: Option<usize>,
  armed: bool,
}

impl<'l> UnwindGuard<'l> {
  fn new(lifecycle: &'l Lifecycle, phase: Phase, hook_state: HookState) -> Self {
    Self {
      lifecycle,
      phase,
      hook_state,
      running: None,
      armed: true,
    }
  }

  fn disarm(&mut self) {
    self.armed = false;
  }
}

impl Drop for UnwindGuard<'_> {
  fn drop(&mut self) {
    if !self.armed {
      return;
    }
    let mut inner = self.lifecycle.inner.lock();
    if let Some(index) = self.running {
      inner.hooks[index].state = self.hook_state;
    }
    inner.phase = self.phase;
    tracing::warn!(hook = ?self.running, phase = %self.phase, "hook action panicked");
  }
}

/// A handle for appending hooks, given to providers and invoked functions.
///
/// Every hook appended through a handle is attributed to the value or function
/// whose construction received it. Hooks are held back until that construction
/// succeeds; if it fails they are dropped and never run.
#[derive(Clone)]
pub struct Hooks {
  lifecycle: Arc<Lifecycle>,
  owner: Arc<str>,
  staging: Arc<Mutex<Staging>>,
}

enum Staging {
  /// The construction is still running.
  Open(Vec<Hook>),
  /// The construction succeeded; later appends go straight to the lifecycle.
  Committed,
  /// The construction failed.
  Discarded,
}

impl Hooks {
  pub(crate) fn new(lifecycle: Arc<Lifecycle>, owner: impl Into<Arc<str>>) -> Self {
    Self {
      lifecycle,
      owner: owner.into(),
      staging: Arc::new(Mutex::new(Staging::Open(Vec::new()))),
    }
  }

  /// Appends `hook` after every hook registered so far.
  ///
  /// Fails with [`Error::HooksClosed`] once the container has started, and with
  /// [`Error::HooksDiscarded`] if the owner's construction already failed.
  pub fn append(&self, hook: Hook) -> Result<()> {
    let mut staging = self.staging.lock();
    match &mut *staging {
      Staging::Open(hooks) => {
        self.lifecycle.ensure_open()?;
        hooks.push(hook);
        Ok(())
      }
      Staging::Committed => self.lifecycle.append(&self.owner, hook).map(|_| ()),
      Staging::Discarded => Err(Error::HooksDiscarded {
        owner: self.owner.to_string(),
      }),
    }
  }

  pub fn owner(&self) -> &str {
    &self.owner
  }

  /// Hands every held hook to the lifecycle. Called once the owner's
  /// construction has succeeded.
  pub(crate) fn commit(&self) -> Result<()> {
    let mut staging = self.staging.lock();
    match std::mem::replace(&mut *staging, Staging::Discarded) {
      Staging::Open(hooks) => {
        self.lifecycle.commit(&self.owner, hooks)?;
        *staging = Staging::Committed;
        Ok(())
      }
      settled => {
        *staging = settled;
        Ok(())
      }
    }
  }

  /// Drops every held hook. Called when the owner's construction failed.
  pub(crate) fn discard(&self) {
    let mut staging = self.staging.lock();
    if let Staging::Open(hooks) = &*staging {
      if !hooks.is_empty() {
        tracing::debug!(owner = %self.owner, hooks = hooks.len(), "discarding hooks of failed construction");
      }
      *staging = Staging::Discarded;
    }
  }
}

impl fmt::Debug for Hooks {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Hooks").field("owner", &self.owner).finish()
  }
}
