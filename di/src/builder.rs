use crate::container::Container;
use crate::error::BuildError;
use crate::event::{EventSink, TracingSink};

use core::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Settings that shape how a container drives its lifecycle.
///
/// With the `serde` feature enabled this can be loaded from any serde format;
/// missing fields fall back to their defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ContainerConfig {
  /// Deadline applied to [`Container::start`]. `None` means no deadline.
  pub start_timeout: Option<Duration>,
  /// Deadline handed to stop actions by [`Container::stop`]. Stop actions are
  /// never skipped when it passes; it is advisory to each action.
  pub stop_timeout: Option<Duration>,
}

/// A builder for creating [`Container`] instances.
#[derive(Default)]
pub struct ContainerBuilder {
  config: ContainerConfig,
  sink: Option<Arc<dyn EventSink>>,
}

impl fmt::Debug for ContainerBuilder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ContainerBuilder")
      .field("config", &self.config)
      .field("has_sink", &self.sink.is_some())
      .finish()
  }
}

impl ContainerBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  /// Replaces every setting with `config`.
  pub fn config(mut self, config: ContainerConfig) -> Self {
    self.config = config;
    self
  }

  pub fn start_timeout(mut self, timeout: Duration) -> Self {
    self.config.start_timeout = Some(timeout);
    self
  }

  pub fn stop_timeout(mut self, timeout: Duration) -> Self {
    self.config.stop_timeout = Some(timeout);
    self
  }

  /// Sets the sink that receives every event the container emits.
  ///
  /// Without a sink, events are not produced at all.
  pub fn event_sink<Sink>(mut self, sink: Sink) -> Self
  where
    Sink: EventSink + 'static,
  {
    self.sink = Some(Arc::new(sink));
    self
  }

  pub fn shared_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
    self.sink = Some(sink);
    self
  }

  /// Logs every event through `tracing`.
  pub fn trace_events(self) -> Self {
    self.event_sink(TracingSink)
  }

  pub fn build(self) -> Result<Container, BuildError> {
    if self.config.start_timeout == Some(Duration::ZERO) {
      return Err(BuildError::ZeroTimeout { which: "start" });
    }
    if self.config.stop_timeout == Some(Duration::ZERO) {
      return Err(BuildError::ZeroTimeout { which: "stop" });
    }
    Ok(Container::from_parts(self.config, self.sink))
  }
}
