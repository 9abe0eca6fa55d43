use crate::key::TypeKey;
use crate::lifecycle::Phase;

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// The error type accepted from provider functions, invoked functions and hook actions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A construction failure shared between the leader of a construction and every
/// caller that was waiting on it.
pub type SharedError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// The main error type for `fibre_di`.
#[derive(Debug, Error)]
pub enum Error {
  #[error("a provider for {key} is already registered by `{existing}`")]
  DuplicateProvider { key: TypeKey, existing: String },

  #[error("provider `{provider}` declares no output types")]
  EmptyProvider { provider: String },

  #[error("cannot register a provider for {key}: the container has already begun resolving")]
  RegistrationClosed { key: TypeKey },

  #[error("no provider registered for {key}{}", required_by_suffix(.required_by))]
  UnknownType {
    key: TypeKey,
    required_by: Option<String>,
  },

  #[error("cyclic dependency detected: {}", render_cycle(.cycle))]
  CyclicDependency { cycle: Vec<TypeKey> },

  #[error("failed to construct {key}: {cause}")]
  ConstructionFailed {
    key: TypeKey,
    #[source]
    cause: SharedError,
  },

  #[error("instance registered for {key} is not a `{expected}`")]
  TypeMismatch {
    key: TypeKey,
    expected: &'static str,
  },

  #[error("invoked function `{function}` failed: {cause}")]
  InvokeFailed {
    function: String,
    #[source]
    cause: BoxError,
  },

  #[error("hooks can no longer be appended (lifecycle is {phase})")]
  HooksClosed { phase: Phase },

  #[error("hooks of `{owner}` were discarded because its construction failed")]
  HooksDiscarded { owner: String },

  #[error("cannot {operation} while the lifecycle is {phase}")]
  InvalidPhase {
    operation: &'static str,
    phase: Phase,
  },

  #[error("start hook #{index} registered by `{owner}` failed: {cause}")]
  StartFailed {
    index: usize,
    owner: String,
    #[source]
    cause: BoxError,
  },

  #[error("{} stop hook(s) failed: {}", .failures.len(), render_failures(.failures))]
  StopFailed { failures: Vec<HookFailure> },
}

/// A specialized `Result` type for `fibre_di` operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// One failed stop action, as collected into [`Error::StopFailed`].
#[derive(Debug)]
pub struct HookFailure {
  pub index: usize,
  pub owner: String,
  pub cause: BoxError,
}

impl fmt::Display for HookFailure {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "#{} ({}): {}", self.index, self.owner, self.cause)
  }
}

fn required_by_suffix(required_by: &Option<String>) -> String {
  match required_by {
    Some(dependent) => format!(" (required by `{}`)", dependent),
    None => String::new(),
  }
}

fn render_cycle(cycle: &[TypeKey]) -> String {
  cycle
    .iter()
    .map(ToString::to_string)
    .collect::<Vec<_>>()
    .join(" -> ")
}

fn render_failures(failures: &[HookFailure]) -> String {
  failures
    .iter()
    .map(ToString::to_string)
    .collect::<Vec<_>>()
    .join("; ")
}

/// Errors that can occur when building a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
  /// A lifecycle timeout was configured as zero. Leave it unset for no deadline.
  ZeroTimeout { which: &'static str },
}

impl fmt::Display for BuildError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      BuildError::ZeroTimeout { which } => write!(f, "{} timeout cannot be zero", which),
    }
  }
}

impl std::error::Error for BuildError {}
