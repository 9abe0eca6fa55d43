//! Graph and lifecycle events, and the sinks that consume them.

use crate::key::TypeKey;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
  /// A provider output was registered.
  Provided,
  /// Resolution of a dependency graph began.
  Resolving,
  /// Resolution finished (successfully or not).
  Resolved,
  /// A provider ran (successfully or not).
  Constructed,
  /// An invoked function is about to run.
  Invoking,
  /// An invoked function returned.
  Invoked,
  /// A hook was appended to the lifecycle.
  HookAppended,
  /// The start sequence began.
  Starting,
  /// A hook's start action ran.
  HookStarted,
  /// The start sequence finished.
  Started,
  /// The stop sequence began.
  Stopping,
  /// A hook's stop action ran.
  HookStopped,
  /// The stop sequence finished.
  Stopped,
}

impl fmt::Display for EventKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      EventKind::Provided => "provided",
      EventKind::Resolving => "resolving",
      EventKind::Resolved => "resolved",
      EventKind::Constructed => "constructed",
      EventKind::Invoking => "invoking",
      EventKind::Invoked => "invoked",
      EventKind::HookAppended => "hook-appended",
      EventKind::Starting => "starting",
      EventKind::HookStarted => "hook-started",
      EventKind::Started => "started",
      EventKind::Stopping => "stopping",
      EventKind::HookStopped => "hook-stopped",
      EventKind::Stopped => "stopped",
    };
    f.write_str(name)
  }
}

/// What an event is about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subject {
  Type(TypeKey),
  Function(String),
  Hook { index: usize, owner: String },
  Container,
}

impl fmt::Display for Subject {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Subject::Type(key) => write!(f, "{}", key),
      Subject::Function(name) => write!(f, "fn {}", name),
      Subject::Hook { index, owner } => write!(f, "hook #{} ({})", index, owner),
      Subject::Container => f.write_str("container"),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
  Success,
  Failure(String),
}

impl Outcome {
  pub fn is_success(&self) -> bool {
    matches!(self, Outcome::Success)
  }

  pub(crate) fn from_result<T, E: fmt::Display>(result: &Result<T, E>) -> Self {
    match result {
      Ok(_) => Outcome::Success,
      Err(err) => Outcome::Failure(err.to_string()),
    }
  }
}

/// An immutable record of one step taken by the container.
#[derive(Debug, Clone)]
pub struct Event {
  /// Emission order within the owning container, starting at zero.
  pub seq: u64,
  pub kind: EventKind,
  pub subject: Subject,
  pub timestamp: DateTime<Utc>,
  /// How long the step took, for steps that do work.
  pub duration: Option<Duration>,
  pub outcome: Outcome,
}

/// Receives every event emitted by a container, in emission order.
///
/// `consume` is called synchronously on the thread doing the work, one event at
/// a time. A sink that blocks stalls construction and lifecycle execution, and
/// a sink must not drive the container that feeds it.
pub trait EventSink: Send + Sync {
  fn consume(&self, event: &Event);
}

impl<F> EventSink for F
where
  F: Fn(&Event) + Send + Sync,
{
  fn consume(&self, event: &Event) {
    self(event)
  }
}

/// Pushes events to the registered sink. Without a sink, events are never built.
///
/// Numbering and delivery happen under one lock, so the sink sees events in
/// `seq` order even when several threads emit at once.
pub(crate) struct Emitter {
  sink: Option<Arc<dyn EventSink>>,
  next_seq: Mutex<u64>,
}

impl Emitter {
  pub(crate) fn new(sink: Option<Arc<dyn EventSink>>) -> Self {
    Self {
      sink,
      next_seq: Mutex::new(0),
    }
  }

  pub(crate) fn emit(
    &self,
    kind: EventKind,
    subject: impl FnOnce() -> Subject,
    duration: Option<Duration>,
    outcome: Outcome,
  ) {
    let Some(sink) = &self.sink else {
      return;
    };
    let subject = subject();
    let mut next_seq = self.next_seq.lock();
    let event = Event {
      seq: *next_seq,
      kind,
      subject,
      timestamp: Utc::now(),
      duration,
      outcome,
    };
    *next_seq += 1;
    sink.consume(&event);
  }

  pub(crate) fn is_enabled(&self) -> bool {
    self.sink.is_some()
  }
}

/// Forwards events to `tracing` under the `fibre_di` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
  fn consume(&self, event: &Event) {
    let duration_us = event.duration.map(micros);
    match &event.outcome {
      Outcome::Success => tracing::info!(
        target: "fibre_di",
        seq = event.seq,
        kind = %event.kind,
        subject = %event.subject,
        duration_us,
        "{} {}",
        event.kind,
        event.subject
      ),
      Outcome::Failure(reason) => match event.kind {
        EventKind::HookStarted | EventKind::HookStopped | EventKind::Started | EventKind::Stopped => {
          tracing::warn!(
            target: "fibre_di",
            seq = event.seq,
            kind = %event.kind,
            subject = %event.subject,
            duration_us,
            error = %reason,
            "{} {} failed",
            event.kind,
            event.subject
          )
        }
        _ => tracing::error!(
          target: "fibre_di",
          seq = event.seq,
          kind = %event.kind,
          subject = %event.subject,
          duration_us,
          error = %reason,
          "{} {} failed",
          event.kind,
          event.subject
        ),
      },
    }
  }
}

/// Whole microseconds in `duration`, saturating at `u64::MAX`.
fn micros(duration: Duration) -> u64 {
  u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

/// An in-memory sink that keeps every event it receives.
///
/// Clones share the same log, so one clone can be handed to the container
/// while another is kept for inspection.
#[derive(Debug, Default, Clone)]
pub struct EventLog {
  events: Arc<Mutex<Vec<Event>>>,
}

impl EventLog {
  pub fn new() -> Self {
    Self::default()
  }

  /// A copy of every event received so far.
  pub fn events(&self) -> Vec<Event> {
    self.events.lock().clone()
  }

  /// The kinds and subjects of every event received so far, in order.
  pub fn summary(&self) -> Vec<(EventKind, Subject)> {
    self
      .events
      .lock()
      .iter()
      .map(|event| (event.kind, event.subject.clone()))
      .collect()
  }

  pub fn len(&self) -> usize {
    self.events.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.events.lock().is_empty()
  }
}

impl EventSink for EventLog {
  fn consume(&self, event: &Event) {
    self.events.lock().push(event.clone());
  }
}
